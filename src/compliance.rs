//! Compliance evaluation.
//!
//! For each required category `C` a person is non-compliant when they carry
//! the explicit `no_C` marker, or when neither `C` nor `no_C` was seen.
//! Absence counts as a violation, never as "unknown".

use serde::Serialize;
use std::collections::BTreeSet;

use crate::canon::CanonicalClass;
use crate::ownership::PersonEntity;
use crate::zone::{Zone, ZoneRequirements};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ComplianceResult {
    pub person_id: usize,
    pub zone: Zone,
    /// Missing positive categories, sorted lexicographically.
    pub missing: Vec<CanonicalClass>,
    pub compliant: bool,
}

impl ComplianceResult {
    /// Violation labels (`no_C`) for the missing categories, in order.
    pub fn violations(&self) -> impl Iterator<Item = CanonicalClass> + '_ {
        self.missing.iter().map(CanonicalClass::negative)
    }
}

/// Evaluate a person against an explicit required set.
pub fn evaluate(person: &PersonEntity, required: &BTreeSet<CanonicalClass>) -> ComplianceResult {
    // BTreeSet iteration keeps `missing` sorted.
    let missing: Vec<CanonicalClass> = required
        .iter()
        .filter(|category| {
            let negative = category.negative();
            person.owned.contains(&negative) || !person.owned.contains(*category)
        })
        .cloned()
        .collect();

    ComplianceResult {
        person_id: person.id,
        zone: person.zone,
        compliant: missing.is_empty(),
        missing,
    }
}

/// Evaluate a person against the requirements of the zone they stand in.
pub fn evaluate_in_zone(
    person: &PersonEntity,
    requirements: &ZoneRequirements,
) -> ComplianceResult {
    evaluate(person, &requirements.required_for(person.zone))
}
