//! Detector label canonicalization.
//!
//! Detectors trained by different teams name the same equipment differently
//! ("Hardhat", "safety helmet", "NO-Hardhat"). Everything downstream works on
//! canonical classes only.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Canonical name of the person class.
pub const PERSON: &str = "person";

/// Prefix of negative (explicit absence) markers.
pub const NEGATIVE_PREFIX: &str = "no_";

/// Canonical PPE / person class name.
///
/// Unknown detector labels still produce a `CanonicalClass` holding the
/// normalized label, so the set of values is open even though the default
/// vocabulary is fixed.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalClass(String);

impl CanonicalClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_person(&self) -> bool {
        self.0 == PERSON
    }

    pub fn is_negative(&self) -> bool {
        self.0.starts_with(NEGATIVE_PREFIX) && self.0.len() > NEGATIVE_PREFIX.len()
    }

    /// The `no_X` marker for a positive class `X`.
    pub fn negative(&self) -> CanonicalClass {
        CanonicalClass(format!("{}{}", NEGATIVE_PREFIX, self.0))
    }

    /// The positive class `X` for a `no_X` marker.
    pub fn positive(&self) -> Option<CanonicalClass> {
        if self.is_negative() {
            Some(CanonicalClass(self.0[NEGATIVE_PREFIX.len()..].to_string()))
        } else {
            None
        }
    }
}

impl fmt::Display for CanonicalClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lower-case and replace spaces with underscores.
pub fn normalize_label(raw: &str) -> String {
    raw.to_lowercase().replace(' ', "_")
}

/// Built-in vocabulary: canonical name -> synonyms (raw spellings are fine,
/// they are normalized when the table is built).
const DEFAULT_ALIASES: &[(&str, &[&str])] = &[
    (PERSON, &["person", "people", "worker"]),
    ("helmet", &["helmet", "hardhat", "safety_helmet", "Helmet"]),
    ("no_helmet", &["NO-Hardhat", "no_hardhat", "NO_helmet", "without_helmet"]),
    ("shoes", &["shoes", "safety_shoes", "boots", "Safety Shoes"]),
    (
        "no_shoes",
        &["no_safety_shoes", "NO_safetyshoes", "no_boots", "NO-Safety Shoes"],
    ),
    (
        "goggles",
        &["goggles", "safety_goggles", "glasses", "eye_protection", "Safety Goggles"],
    ),
    ("no_goggles", &["NO_goggles", "no_glasses", "no_safety_goggles"]),
    ("safety_vest", &["vest", "hi_vis_vest", "Safety Vest"]),
    ("no_safety_vest", &["NO-Safety Vest", "NO_Vest", "no_hi_vis_vest"]),
    ("pvc_suit", &["pvc_suit", "pvc", "chem_suit", "hazmat_suit", "PVC Suit"]),
    ("no_pvc_suit", &["no_pvc", "no_chem_suit", "no_hazmat_suit", "NO-PVC Suit"]),
    ("mask", &["face_mask", "Mask"]),
    ("no_mask", &["NO-Mask", "no_face_mask"]),
];

/// Normalized label -> canonical class lookup.
///
/// Built once from configuration and validated up front: a synonym that maps
/// to two different classes, or a `no_X` class without its positive `X`, is
/// rejected at load time.
#[derive(Clone, Debug)]
pub struct AliasTable {
    lookup: HashMap<String, CanonicalClass>,
    classes: BTreeSet<CanonicalClass>,
}

impl AliasTable {
    pub fn new<I, C, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (C, Vec<S>)>,
        C: AsRef<str>,
        S: AsRef<str>,
    {
        let entries: Vec<(String, Vec<String>)> = entries
            .into_iter()
            .map(|(canon, synonyms)| {
                (
                    normalize_label(canon.as_ref()),
                    synonyms
                        .iter()
                        .map(|s| normalize_label(s.as_ref()))
                        .collect(),
                )
            })
            .collect();

        let mut lookup: HashMap<String, CanonicalClass> = HashMap::new();
        let mut classes = BTreeSet::new();

        // Canonical names first so a synonym shadowing another class is caught.
        for (canon, _) in &entries {
            if canon.is_empty() {
                return Err(anyhow!("alias table: canonical name must not be empty"));
            }
            let class = CanonicalClass::new(canon.clone());
            if !classes.insert(class.clone()) {
                return Err(anyhow!("alias table: canonical name '{}' listed twice", canon));
            }
            lookup.insert(canon.clone(), class);
        }

        for (canon, synonyms) in &entries {
            for synonym in synonyms {
                if synonym.is_empty() {
                    return Err(anyhow!(
                        "alias table: empty synonym listed for '{}'",
                        canon
                    ));
                }
                match lookup.get(synonym) {
                    Some(existing) if existing.as_str() != canon => {
                        return Err(anyhow!(
                            "alias table: synonym '{}' maps to both '{}' and '{}'",
                            synonym,
                            existing,
                            canon
                        ));
                    }
                    Some(_) => {}
                    None => {
                        lookup.insert(synonym.clone(), CanonicalClass::new(canon.clone()));
                    }
                }
            }
        }

        let table = Self { lookup, classes };
        table.validate_vocabulary()?;
        Ok(table)
    }

    /// Load from a `canonical -> [synonyms]` map (configuration form).
    pub fn from_map(map: &BTreeMap<String, Vec<String>>) -> Result<Self> {
        Self::new(map.iter().map(|(k, v)| (k.as_str(), v.clone())))
    }

    /// Map a raw detector label to its canonical class.
    ///
    /// Unknown labels pass through normalized, so this never fails and
    /// `canonicalize(canonicalize(s)) == canonicalize(s)` holds.
    pub fn canonicalize(&self, raw: &str) -> CanonicalClass {
        let normalized = normalize_label(raw);
        match self.lookup.get(&normalized) {
            Some(class) => class.clone(),
            None => CanonicalClass::new(normalized),
        }
    }

    pub fn contains(&self, class: &CanonicalClass) -> bool {
        self.classes.contains(class)
    }

    pub fn classes(&self) -> impl Iterator<Item = &CanonicalClass> {
        self.classes.iter()
    }

    fn validate_vocabulary(&self) -> Result<()> {
        for class in &self.classes {
            if let Some(positive) = class.positive() {
                if !self.classes.contains(&positive) {
                    return Err(anyhow!(
                        "alias table: '{}' has no positive class '{}'",
                        class,
                        positive
                    ));
                }
            }
        }
        Ok(())
    }
}

impl Default for AliasTable {
    fn default() -> Self {
        Self::new(
            DEFAULT_ALIASES
                .iter()
                .map(|(canon, synonyms)| (*canon, synonyms.to_vec())),
        )
        .expect("built-in alias table is consistent")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_detector_spellings_to_canonical_names() {
        let table = AliasTable::default();
        assert_eq!(table.canonicalize("Hardhat").as_str(), "helmet");
        assert_eq!(table.canonicalize("Safety Shoes").as_str(), "shoes");
        assert_eq!(table.canonicalize("PVC Suit").as_str(), "pvc_suit");
        assert_eq!(table.canonicalize("NO-Hardhat").as_str(), "no_helmet");
        assert_eq!(table.canonicalize("NO-Safety Vest").as_str(), "no_safety_vest");
        assert_eq!(table.canonicalize("NO_safetyshoes").as_str(), "no_shoes");
        assert_eq!(table.canonicalize("Person").as_str(), "person");
    }

    #[test]
    fn unknown_labels_pass_through_normalized() {
        let table = AliasTable::default();
        assert_eq!(table.canonicalize("Fire Extinguisher").as_str(), "fire_extinguisher");
        assert_eq!(table.canonicalize("").as_str(), "");
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let table = AliasTable::default();
        for raw in [
            "Helmet",
            "NO-Mask",
            "Safety Goggles",
            "forklift",
            "  Mixed Case  ",
            "",
            "no_",
            "ÜBER Helm",
            "no_shoes",
        ] {
            let once = table.canonicalize(raw);
            let twice = table.canonicalize(once.as_str());
            assert_eq!(once, twice, "not idempotent for {:?}", raw);
        }
    }

    #[test]
    fn every_builtin_negative_has_a_positive() {
        let table = AliasTable::default();
        for class in table.classes() {
            if let Some(positive) = class.positive() {
                assert!(table.contains(&positive), "missing positive for {}", class);
                assert_eq!(positive.negative(), *class);
            }
        }
    }

    #[test]
    fn rejects_synonym_shared_by_two_classes() {
        let err = AliasTable::new(vec![
            ("helmet", vec!["hardhat"]),
            ("hood", vec!["Hardhat"]),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("maps to both"));
    }

    #[test]
    fn rejects_synonym_shadowing_another_canonical_name() {
        let err = AliasTable::new(vec![("helmet", vec!["goggles"]), ("goggles", vec![])])
            .unwrap_err();
        assert!(err.to_string().contains("maps to both"));
    }

    #[test]
    fn rejects_negative_without_positive() {
        let err = AliasTable::new(vec![("no_gloves", vec!["NO-Gloves"])]).unwrap_err();
        assert!(err.to_string().contains("no positive class"));
    }

    #[test]
    fn custom_table_from_config_map() {
        let mut map = BTreeMap::new();
        map.insert("gloves".to_string(), vec!["Work Gloves".to_string()]);
        map.insert("no_gloves".to_string(), vec!["bare hands".to_string()]);
        let table = AliasTable::from_map(&map).unwrap();
        assert_eq!(table.canonicalize("Work Gloves").as_str(), "gloves");
        assert_eq!(table.canonicalize("Bare Hands").as_str(), "no_gloves");
    }
}
