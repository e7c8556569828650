use draft_core::drawing::Document;
use draft_core::geometry::Point2;

fn main() {
    let mut doc = Document::new();
    let id = doc.add_sheet();

    let sheet = doc.sheet_mut(id).unwrap();
    let line = sheet.add_line(Point2::new(0.0, 0.0), Point2::new(10.0, 0.0));
    sheet.pin(Point2::new(0.0, 0.0));
    sheet.fixed_distance(Point2::new(5.0, 0.0));

    // Yank the free end away and watch the solver pull it back
    let b = sheet.thing(line).unwrap().handles()[1];
    sheet.set_handle_pos(b, Point2::new(30.0, 20.0));

    for pass in 0.. {
        let err = doc.total_error(id).unwrap();
        println!("pass {:3}  error {:10.4}", pass, err);
        if !doc.relax(id).unwrap() {
            break;
        }
    }

    let sheet = doc.sheet(id).unwrap();
    println!("final b = {:?}", sheet.handle_pos(b).unwrap());
    for (c, e) in doc.constraint_errors(id).unwrap() {
        println!("{:>24}  {:8.4}", c.tag(), e);
    }
}
