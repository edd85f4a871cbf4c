//! Person / PPE ownership.
//!
//! An item belongs to a person when the item's box centre lies inside the
//! person's box, edges included. Person boxes overlap in crowded scenes, so
//! by default an item counts for every containing person.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::canon::CanonicalClass;
use crate::detect::{BoundingBox, Point};
use crate::zone::Zone;

/// A person detected in the current frame.
///
/// `id` is the person's index in detection order for this frame only; it is
/// not a track id and does not survive across frames.
#[derive(Clone, Debug, PartialEq)]
pub struct PersonEntity {
    pub id: usize,
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub zone: Zone,
    pub owned: BTreeSet<CanonicalClass>,
}

impl PersonEntity {
    pub fn new(id: usize, bbox: BoundingBox, confidence: f32, zone: Zone) -> Self {
        Self {
            id,
            bbox,
            confidence,
            zone,
            owned: BTreeSet::new(),
        }
    }
}

/// A non-person detection reduced to its class and centre.
#[derive(Clone, Debug, PartialEq)]
pub struct PpeItem {
    pub class: CanonicalClass,
    pub center: Point,
    pub confidence: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnershipPolicy {
    /// Every person whose box contains the item owns it.
    #[default]
    Shared,
    /// The first containing person in detection order claims the item.
    Exclusive,
}

/// Populate `owned` for each person. Returns the number of items no person
/// contains.
pub fn resolve(persons: &mut [PersonEntity], items: &[PpeItem], policy: OwnershipPolicy) -> usize {
    let mut unowned = 0;
    for item in items {
        let mut claimed = false;
        for person in persons.iter_mut() {
            if !person.bbox.contains(item.center) {
                continue;
            }
            person.owned.insert(item.class.clone());
            claimed = true;
            if policy == OwnershipPolicy::Exclusive {
                break;
            }
        }
        if !claimed {
            unowned += 1;
        }
    }
    unowned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(id: usize, b: [f32; 4]) -> PersonEntity {
        PersonEntity::new(id, BoundingBox::from(b), 0.9, Zone::Left)
    }

    fn item(class: &str, x: f64, y: f64) -> PpeItem {
        PpeItem {
            class: CanonicalClass::new(class),
            center: Point::new(x, y),
            confidence: 0.8,
        }
    }

    fn owned(p: &PersonEntity) -> Vec<&str> {
        p.owned.iter().map(|c| c.as_str()).collect()
    }

    #[test]
    fn items_are_assigned_by_centre_containment() {
        let mut persons = vec![
            person(0, [0.0, 0.0, 100.0, 200.0]),
            person(1, [300.0, 0.0, 400.0, 200.0]),
        ];
        let items = vec![
            item("helmet", 50.0, 20.0),
            item("shoes", 350.0, 190.0),
            item("goggles", 200.0, 50.0),
        ];
        let unowned = resolve(&mut persons, &items, OwnershipPolicy::Shared);
        assert_eq!(unowned, 1);
        assert_eq!(owned(&persons[0]), vec!["helmet"]);
        assert_eq!(owned(&persons[1]), vec!["shoes"]);
    }

    #[test]
    fn item_on_box_edge_is_owned() {
        let mut persons = vec![person(0, [10.0, 10.0, 50.0, 90.0])];
        let items = vec![item("helmet", 10.0, 10.0), item("shoes", 50.0, 90.0)];
        assert_eq!(resolve(&mut persons, &items, OwnershipPolicy::Shared), 0);
        assert_eq!(owned(&persons[0]), vec!["helmet", "shoes"]);
    }

    #[test]
    fn overlapping_boxes_share_items_by_default() {
        let mut persons = vec![
            person(0, [0.0, 0.0, 100.0, 100.0]),
            person(1, [50.0, 0.0, 150.0, 100.0]),
        ];
        let items = vec![item("helmet", 75.0, 10.0)];
        resolve(&mut persons, &items, OwnershipPolicy::Shared);
        assert_eq!(owned(&persons[0]), vec!["helmet"]);
        assert_eq!(owned(&persons[1]), vec!["helmet"]);
    }

    #[test]
    fn exclusive_policy_gives_item_to_first_container() {
        let mut persons = vec![
            person(0, [0.0, 0.0, 100.0, 100.0]),
            person(1, [50.0, 0.0, 150.0, 100.0]),
        ];
        let items = vec![item("helmet", 75.0, 10.0)];
        resolve(&mut persons, &items, OwnershipPolicy::Exclusive);
        assert_eq!(owned(&persons[0]), vec!["helmet"]);
        assert!(persons[1].owned.is_empty());
    }

    #[test]
    fn persons_without_items_are_fine() {
        let mut persons = vec![person(0, [0.0, 0.0, 10.0, 10.0])];
        assert_eq!(resolve(&mut persons, &[], OwnershipPolicy::Shared), 0);
        assert!(persons[0].owned.is_empty());
    }
}
