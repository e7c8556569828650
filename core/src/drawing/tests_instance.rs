use super::{Constraint, Document, DocumentError, SheetId, Thing};
use crate::geometry::{Point2, Vector2};
use std::f64::consts::FRAC_PI_2;

/// A master sheet holding a horizontal line with an attacher fused to
/// each endpoint. Bounds (0,0)..(10,0), center (5,0).
fn bar_master(doc: &mut Document) -> SheetId {
    let id = doc.add_sheet();
    let sheet = doc.sheet_mut(id).unwrap();
    sheet.add_line(Point2::new(0.0, 0.0), Point2::new(10.0, 0.0));
    sheet.add_attacher(Point2::new(0.0, 0.0));
    sheet.add_attacher(Point2::new(10.0, 0.0));
    id
}

fn attacher_positions(doc: &Document, host: SheetId, tid: super::ThingId) -> Vec<Point2> {
    let sheet = doc.sheet(host).unwrap();
    sheet
        .instance(tid)
        .unwrap()
        .attachers
        .iter()
        .filter_map(|&h| sheet.handle_pos(h))
        .collect()
}

fn settle(doc: &mut Document, id: SheetId) {
    for _ in 0..500 {
        if !doc.relax(id).unwrap() {
            return;
        }
    }
    panic!("relaxation did not settle");
}

#[test]
fn add_instance_places_attachers_through_the_transform() {
    let mut doc = Document::new();
    let master = bar_master(&mut doc);
    let host = doc.add_sheet();

    let tid = doc
        .add_instance(host, master, Point2::new(50.0, 50.0), 2.0, 0.0)
        .unwrap()
        .unwrap();

    // Master center (5,0) lands on the placement point; the endpoints
    // spread twice as far from it
    let pos = attacher_positions(&doc, host, tid);
    assert_eq!(pos, vec![Point2::new(40.0, 50.0), Point2::new(60.0, 50.0)]);

    let sheet = doc.sheet(host).unwrap();
    let ties = sheet
        .constraints()
        .iter()
        .filter(|c| matches!(c, Constraint::PointInstance { .. }))
        .count();
    assert_eq!(ties, 2);
    assert!(doc.total_error(host).unwrap() < 1e-9);
}

#[test]
fn instancing_a_sheet_into_itself_is_refused() {
    let mut doc = Document::new();
    let master = bar_master(&mut doc);
    let tid = doc
        .add_instance(master, master, Point2::new(50.0, 50.0), 1.0, 0.0)
        .unwrap();
    assert_eq!(tid, None);
    assert!(doc
        .sheet(master)
        .unwrap()
        .things()
        .all(|(_, t)| matches!(t, Thing::Line { .. })));
}

#[test]
fn non_positive_sizes_are_refused() {
    let mut doc = Document::new();
    let master = bar_master(&mut doc);
    let host = doc.add_sheet();

    assert_eq!(
        doc.add_instance(host, master, Point2::new(50.0, 50.0), 0.0, 0.0),
        Ok(None)
    );
    assert_eq!(
        doc.add_instance(host, master, Point2::new(50.0, 50.0), -2.0, 0.0),
        Ok(None)
    );
    assert_eq!(doc.sheet(host).unwrap().things().count(), 0);
}

#[test]
fn unknown_sheets_fail_loudly_or_quietly_by_role() {
    let mut doc = Document::new();
    let master = bar_master(&mut doc);
    let ghost = SheetId::new();

    // Unknown host is the caller's bug; unknown master degrades to a no-op
    assert_eq!(
        doc.add_instance(ghost, master, Point2::origin(), 1.0, 0.0),
        Err(DocumentError::UnknownSheet(ghost))
    );
    let host = doc.add_sheet();
    assert_eq!(
        doc.add_instance(host, ghost, Point2::origin(), 1.0, 0.0),
        Ok(None)
    );
}

#[test]
fn editing_the_master_pulls_instances_during_relax() {
    let mut doc = Document::new();
    let master = bar_master(&mut doc);
    let host = doc.add_sheet();
    let tid = doc
        .add_instance(host, master, Point2::new(50.0, 50.0), 2.0, 0.0)
        .unwrap()
        .unwrap();

    // Stretch the master bar to the right
    let master_sheet = doc.sheet_mut(master).unwrap();
    let line = master_sheet
        .things()
        .find_map(|(_, t)| match *t {
            Thing::Line { b, .. } => Some(b),
            _ => None,
        })
        .unwrap();
    master_sheet.set_handle_pos(line, Point2::new(20.0, 0.0));

    settle(&mut doc, host);

    // The second attacher follows the transformed endpoint (80, 50)
    let pos = attacher_positions(&doc, host, tid);
    let target = Point2::new(80.0, 50.0);
    assert!(crate::geometry::distance(pos[1], target) <= 1.0);
}

#[test]
fn resize_keeps_the_instance_center_fixed() {
    let mut doc = Document::new();
    let master = bar_master(&mut doc);
    let host = doc.add_sheet();
    let tid = doc
        .add_instance(host, master, Point2::new(50.0, 50.0), 1.0, 0.0)
        .unwrap()
        .unwrap();

    assert!(doc
        .resize_instance_at(host, Point2::new(50.0, 50.0), 2.0)
        .unwrap());
    let inst = doc.sheet(host).unwrap().instance(tid).unwrap();
    assert!((inst.transform.scaling() - 2.0).abs() < 1e-9);
    // Master center still maps to the placement point
    let center = inst.transform * Point2::new(5.0, 0.0);
    assert!(crate::geometry::distance(center, Point2::new(50.0, 50.0)) < 1e-9);
    // The stored attacher handles do not move; relaxation re-ties them
    assert!(doc.total_error(host).unwrap() > 1.0);
}

#[test]
fn rotate_keeps_the_instance_center_fixed() {
    let mut doc = Document::new();
    let master = bar_master(&mut doc);
    let host = doc.add_sheet();
    let tid = doc
        .add_instance(host, master, Point2::new(50.0, 50.0), 1.0, 0.0)
        .unwrap()
        .unwrap();

    assert!(!doc
        .rotate_instance_at(host, Point2::new(500.0, 500.0), FRAC_PI_2)
        .unwrap());
    assert!(doc
        .rotate_instance_at(host, Point2::new(50.0, 50.0), FRAC_PI_2)
        .unwrap());

    let inst = doc.sheet(host).unwrap().instance(tid).unwrap();
    assert!((inst.transform.isometry.rotation.angle() - FRAC_PI_2).abs() < 1e-9);
    // Master center still maps to the placement point
    let center = inst.transform * Point2::new(5.0, 0.0);
    assert!(crate::geometry::distance(center, Point2::new(50.0, 50.0)) < 1e-9);
}

#[test]
fn bounding_box_covers_handles_and_instance_footprints() {
    let mut doc = Document::new();
    let master = bar_master(&mut doc);
    let host = doc.add_sheet();

    assert_eq!(doc.bounding_box(host), Ok(None));
    assert_eq!(doc.size(host), Ok(None));

    doc.sheet_mut(host)
        .unwrap()
        .add_line(Point2::new(0.0, 0.0), Point2::new(10.0, 4.0));
    let (min, max) = doc.bounding_box(host).unwrap().unwrap();
    assert_eq!(min, Point2::new(0.0, 0.0));
    assert_eq!(max, Point2::new(10.0, 4.0));
    assert_eq!(doc.size(host).unwrap(), Some(Vector2::new(10.0, 4.0)));
    assert_eq!(doc.center(host).unwrap(), Some(Point2::new(5.0, 2.0)));

    // An instance widens the box by its transformed master bounds
    doc.add_instance(host, master, Point2::new(50.0, 50.0), 1.0, 0.0)
        .unwrap()
        .unwrap();
    let (min, max) = doc.bounding_box(host).unwrap().unwrap();
    assert_eq!(min, Point2::new(0.0, 0.0));
    assert_eq!(max, Point2::new(55.0, 50.0));
}

#[test]
fn full_size_records_a_unit_scale_ratio() {
    let mut doc = Document::new();
    let master = bar_master(&mut doc);
    let host = doc.add_sheet();
    let tid = doc
        .add_instance(host, master, Point2::new(50.0, 50.0), 2.0, 0.0)
        .unwrap()
        .unwrap();

    let sheet = doc.sheet_mut(host).unwrap();
    sheet.select(tid);
    assert!(sheet.full_size(Point2::origin()));
    let ratio = sheet
        .constraints()
        .iter()
        .find_map(|c| match c {
            Constraint::Size { ratio, .. } => Some(*ratio),
            _ => None,
        })
        .unwrap();
    assert!((ratio - 1.0).abs() < 1e-9);
    // Scale 2 against ratio 1 leaves unit error
    let err = doc
        .constraint_errors(host)
        .unwrap()
        .into_iter()
        .find_map(|(c, e)| matches!(c, Constraint::Size { .. }).then_some(e))
        .unwrap();
    assert!((err - 1.0).abs() < 1e-9);
}

#[test]
fn dismember_misses_plain_geometry() {
    let mut doc = Document::new();
    let host = doc.add_sheet();
    doc.sheet_mut(host)
        .unwrap()
        .add_line(Point2::new(0.0, 0.0), Point2::new(10.0, 0.0));
    assert!(!doc.dismember(host, Point2::new(5.0, 0.0)).unwrap());
}

#[test]
fn inline_scales_rotates_and_preserves_shared_corners() {
    let mut doc = Document::new();
    let master = doc.add_sheet();
    {
        let sheet = doc.sheet_mut(master).unwrap();
        // An L shape with a fused corner and a locked base length
        sheet.add_line(Point2::new(0.0, 0.0), Point2::new(10.0, 0.0));
        sheet.add_line(Point2::new(10.0, 0.0), Point2::new(10.0, 5.0));
        assert!(sheet.fixed_distance(Point2::new(5.0, 0.0)));
        sheet.add_attacher(Point2::new(0.0, 0.0));
    }

    let host = doc.add_sheet();
    let tid = doc
        .add_instance(host, master, Point2::new(100.0, 0.0), 2.0, FRAC_PI_2)
        .unwrap()
        .unwrap();
    assert!(doc.inline(host, tid).unwrap());

    let sheet = doc.sheet(host).unwrap();
    assert!(sheet.instance(tid).is_none());

    let lines: Vec<[super::HandleId; 2]> = sheet
        .things()
        .filter_map(|(_, t)| match *t {
            Thing::Line { a, b } => Some([a, b]),
            _ => None,
        })
        .collect();
    assert_eq!(lines.len(), 2);

    // Base doubled to 20 and rotated onto the y axis; master center
    // (5, 2.5) maps to (100, 0)
    let a = sheet.handle_pos(lines[0][0]).unwrap();
    let b = sheet.handle_pos(lines[0][1]).unwrap();
    assert!(crate::geometry::distance(a, Point2::new(105.0, -10.0)) < 1e-9);
    assert!(crate::geometry::distance(b, Point2::new(105.0, 10.0)) < 1e-9);

    // The fused corner survives as one shared handle
    assert_eq!(lines[0][1], lines[1][0]);

    // Captured length scaled by the placement
    let distance = sheet
        .constraints()
        .iter()
        .find_map(|c| match c {
            Constraint::FixedDistance { distance, .. } => Some(*distance),
            _ => None,
        })
        .unwrap();
    assert!((distance - 20.0).abs() < 1e-9);

    // The instance ties went with the instance
    assert!(!sheet
        .constraints()
        .iter()
        .any(|c| matches!(c, Constraint::PointInstance { .. })));
}

#[test]
fn inline_copies_nested_instances_with_composed_transforms() {
    let mut doc = Document::new();
    let grand = bar_master(&mut doc);
    let mid = doc.add_sheet();
    doc.add_instance(mid, grand, Point2::new(20.0, 0.0), 1.0, 0.0)
        .unwrap()
        .unwrap();

    let host = doc.add_sheet();
    let outer = doc
        .add_instance(host, mid, Point2::new(0.0, 100.0), 2.0, 0.0)
        .unwrap()
        .unwrap();
    assert!(doc.inline(host, outer).unwrap());

    let sheet = doc.sheet(host).unwrap();
    assert!(sheet.instance(outer).is_none());
    let (tid, nested) = sheet
        .things()
        .find_map(|(id, t)| match t {
            Thing::Instance(inst) => Some((id, inst.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(nested.master, grand);
    assert!((nested.transform.scaling() - 2.0).abs() < 1e-9);
    // Outer placement applied on top of the nested one: the master
    // endpoint (10, 0) sits at (25, 0) in mid and lands at (10, 100)
    let p = nested.transform * Point2::new(10.0, 0.0);
    assert!(crate::geometry::distance(p, Point2::new(10.0, 100.0)) < 1e-9);

    // The ties follow the copied instance and already hold exactly
    let ties: Vec<_> = sheet
        .constraints()
        .iter()
        .filter_map(|c| match c {
            Constraint::PointInstance { instance, .. } => Some(*instance),
            _ => None,
        })
        .collect();
    assert_eq!(ties, vec![tid, tid]);
    assert!(doc.total_error(host).unwrap() < 1e-9);
}

#[test]
fn inline_stitches_attachers_onto_the_copies() {
    let mut doc = Document::new();
    let master = bar_master(&mut doc);
    let host = doc.add_sheet();
    let tid = doc
        .add_instance(host, master, Point2::new(50.0, 50.0), 1.0, 0.0)
        .unwrap()
        .unwrap();

    // Pin one instance attacher, then inline: the pin must survive on
    // the corresponding copied endpoint
    let first = doc.sheet(host).unwrap().instance(tid).unwrap().attachers[0];
    let p = doc.sheet(host).unwrap().handle_pos(first).unwrap();
    assert!(doc.sheet_mut(host).unwrap().pin(p));
    assert!(doc.inline(host, tid).unwrap());

    let sheet = doc.sheet(host).unwrap();
    let pinned = sheet
        .constraints()
        .iter()
        .find_map(|c| match c {
            Constraint::FixedPoint { h, .. } => Some(*h),
            _ => None,
        })
        .unwrap();
    assert_eq!(sheet.handle_pos(pinned), Some(p));
    assert!(sheet.handle(first).is_none());
}
