use super::solver::ConstraintSet;
use super::types::ThingId;
use super::{Constraint, Document, Sheet};
use crate::geometry::Point2;
use std::collections::{HashMap, HashSet};

fn sheet_with_handles(n: usize) -> (Sheet, Vec<super::HandleId>) {
    let mut sheet = Sheet::new();
    let handles = (0..n)
        .map(|i| sheet.add_handle(Point2::new(i as f64 * 100.0, 0.0)))
        .collect();
    (sheet, handles)
}

#[test]
fn duplicate_signatures_are_rejected() {
    let (_, h) = sheet_with_handles(2);
    let mut set = ConstraintSet::new();

    assert!(set.add(Constraint::PointsEqual { p1: h[0], p2: h[1] }));
    // Same relation, either argument order, repeated insertion
    assert!(!set.add(Constraint::PointsEqual { p1: h[0], p2: h[1] }));
    assert!(!set.add(Constraint::PointsEqual { p1: h[1], p2: h[0] }));
    assert_eq!(set.len(), 1);
}

#[test]
fn different_kinds_over_same_operands_coexist() {
    let (_, h) = sheet_with_handles(2);
    let mut set = ConstraintSet::new();
    assert!(set.add(Constraint::PointsEqual { p1: h[0], p2: h[1] }));
    assert!(set.add(Constraint::HorizontalOrVertical { a: h[0], b: h[1] }));
    assert!(set.add(Constraint::FixedDistance {
        a: h[0],
        b: h[1],
        distance: 100.0
    }));
    assert_eq!(set.len(), 3);
}

#[test]
fn equal_distance_signature_is_order_normalized() {
    let (_, h) = sheet_with_handles(4);
    let mut set = ConstraintSet::new();
    assert!(set.add(Constraint::EqualDistance {
        a1: h[0],
        b1: h[1],
        a2: h[2],
        b2: h[3],
    }));
    assert!(!set.add(Constraint::EqualDistance {
        a1: h[2],
        b1: h[3],
        a2: h[0],
        b2: h[1],
    }));
    assert_eq!(set.len(), 1);
}

#[test]
fn remap_drops_degenerate_constraints() {
    let (_, h) = sheet_with_handles(3);
    let mut set = ConstraintSet::new();
    set.add(Constraint::PointsEqual { p1: h[0], p2: h[1] });
    set.add(Constraint::PointOnLine {
        p: h[2],
        a: h[0],
        b: h[1],
    });

    // Collapse h1 onto h0: coincidence becomes self-referential and
    // the on-line constraint loses its segment
    let map: HashMap<_, _> = [(h[1], Some(h[0]))].into_iter().collect();
    set.replace_handles(&map);
    assert!(set.is_empty());
}

#[test]
fn remap_drops_constraints_on_removed_handles() {
    let (_, h) = sheet_with_handles(3);
    let mut set = ConstraintSet::new();
    set.add(Constraint::FixedDistance {
        a: h[0],
        b: h[1],
        distance: 100.0,
    });
    set.add(Constraint::FixedDistance {
        a: h[1],
        b: h[2],
        distance: 100.0,
    });

    let map: HashMap<_, _> = [(h[2], None)].into_iter().collect();
    set.replace_handles(&map);
    assert_eq!(set.len(), 1);
    let survivor = set.iter().next().unwrap();
    assert!(survivor.host_handles().contains(&h[0]));
}

#[test]
fn remap_re_deduplicates_collisions() {
    let (_, h) = sheet_with_handles(3);
    let mut set = ConstraintSet::new();
    set.add(Constraint::HorizontalOrVertical { a: h[0], b: h[1] });
    set.add(Constraint::HorizontalOrVertical { a: h[0], b: h[2] });
    assert_eq!(set.len(), 2);

    // Rewriting h2 -> h1 makes the two constraints identical
    let map: HashMap<_, _> = [(h[2], Some(h[1]))].into_iter().collect();
    set.replace_handles(&map);
    assert_eq!(set.len(), 1);
}

#[test]
fn remove_things_prunes_instance_constraints() {
    let (_, h) = sheet_with_handles(1);
    let mut set = ConstraintSet::new();
    let dead = ThingId(7);
    set.add(Constraint::Size {
        instance: dead,
        ratio: 1.0,
    });
    set.add(Constraint::FixedPoint {
        h: h[0],
        target: [0.0, 0.0],
    });

    let gone: HashSet<ThingId> = [dead].into_iter().collect();
    set.remove_things(&gone);
    assert_eq!(set.len(), 1);
    assert!(matches!(
        set.iter().next().unwrap(),
        Constraint::FixedPoint { .. }
    ));
}

#[test]
fn toggle_select_flips_membership_and_misses_empty_space() {
    let mut sheet = Sheet::new();
    sheet.add_line(Point2::new(0.0, 0.0), Point2::new(10.0, 0.0));

    assert!(sheet.toggle_select(Point2::new(5.0, 0.0)));
    assert_eq!(sheet.selection().count(), 1);
    // A second toggle on the same thing deselects it
    assert!(sheet.toggle_select(Point2::new(5.0, 0.0)));
    assert_eq!(sheet.selection().count(), 0);
    assert!(!sheet.toggle_select(Point2::new(500.0, 500.0)));
}

#[test]
fn equal_distance_command_evens_selected_line_lengths() {
    let mut doc = Document::new();
    let id = doc.add_sheet();
    let sheet = doc.sheet_mut(id).unwrap();
    sheet.add_line(Point2::new(0.0, 0.0), Point2::new(10.0, 0.0));
    sheet.add_line(Point2::new(0.0, 50.0), Point2::new(30.0, 50.0));

    // Nothing selected, nothing to equalize
    assert!(!sheet.equal_distance());

    assert!(sheet.toggle_select(Point2::new(5.0, 0.0)));
    assert!(sheet.toggle_select(Point2::new(15.0, 50.0)));
    assert!(sheet.equal_distance());
    // Repeating the command adds no second constraint
    assert!(!sheet.equal_distance());

    for _ in 0..500 {
        if !doc.relax(id).unwrap() {
            break;
        }
    }
    let sheet = doc.sheet(id).unwrap();
    let lengths: Vec<f64> = sheet
        .things()
        .filter_map(|(_, t)| match *t {
            super::Thing::Line { a, b } => Some(crate::geometry::distance(
                sheet.handle_pos(a).unwrap(),
                sheet.handle_pos(b).unwrap(),
            )),
            _ => None,
        })
        .collect();
    assert_eq!(lengths.len(), 2);
    assert!((lengths[0] - lengths[1]).abs() <= 1.0);
}

#[test]
fn remove_by_signature() {
    let (_, h) = sheet_with_handles(2);
    let mut set = ConstraintSet::new();
    set.add(Constraint::PointsEqual { p1: h[0], p2: h[1] });
    // Removal matches by signature, so argument order is irrelevant
    set.remove(&Constraint::PointsEqual { p1: h[1], p2: h[0] });
    assert!(set.is_empty());
}
