//! Spatial zones.
//!
//! A divider segment splits the frame into LEFT and RIGHT zones, each with
//! its own set of required PPE. Points exactly on the divider's supporting
//! line are ON_LINE and must satisfy every zone's requirements.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::canon::{AliasTable, CanonicalClass};
use crate::detect::Point;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Zone {
    Left,
    Right,
    OnLine,
}

impl Zone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Left => "LEFT",
            Zone::Right => "RIGHT",
            Zone::OnLine => "ON_LINE",
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Zone {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "LEFT" => Ok(Zone::Left),
            "RIGHT" => Ok(Zone::Right),
            "ON_LINE" => Ok(Zone::OnLine),
            other => Err(anyhow!("unknown zone '{}'", other)),
        }
    }
}

/// Directed line segment `start -> end`. Direction decides which side is LEFT.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Divider {
    pub start: Point,
    pub end: Point,
}

impl Divider {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            start: Point::new(x1, y1),
            end: Point::new(x2, y2),
        }
    }

    /// Vertical split at half width, drawn top to bottom.
    pub fn midline(width: u32, height: u32) -> Self {
        let x_mid = f64::from(width / 2);
        Self::new(x_mid, 0.0, x_mid, f64::from(height.saturating_sub(1)))
    }

    pub fn reversed(&self) -> Self {
        Self {
            start: self.end,
            end: self.start,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let coords = [self.start.x, self.start.y, self.end.x, self.end.y];
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(anyhow!("divider has non-finite coordinates"));
        }
        if self.start == self.end {
            return Err(anyhow!("divider endpoints must differ"));
        }
        Ok(())
    }

    /// Cross product sign: `(x2-x1)(py-y1) - (y2-y1)(px-x1)`.
    pub fn side_of(&self, p: Point) -> f64 {
        (self.end.x - self.start.x) * (p.y - self.start.y)
            - (self.end.y - self.start.y) * (p.x - self.start.x)
    }
}

/// Classify a point against the divider. Exact zero is ON_LINE.
pub fn classify(point: Point, divider: &Divider) -> Zone {
    let sign = divider.side_of(point);
    if sign > 0.0 {
        Zone::Left
    } else if sign < 0.0 {
        Zone::Right
    } else {
        Zone::OnLine
    }
}

/// Required positive PPE categories per zone.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ZoneRequirements {
    left: BTreeSet<CanonicalClass>,
    right: BTreeSet<CanonicalClass>,
}

impl ZoneRequirements {
    pub fn new(left: BTreeSet<CanonicalClass>, right: BTreeSet<CanonicalClass>) -> Result<Self> {
        for class in left.iter().chain(right.iter()) {
            if class.is_negative() {
                return Err(anyhow!(
                    "zone requirements must list positive categories, got '{}'",
                    class
                ));
            }
            if class.is_person() || class.as_str().is_empty() {
                return Err(anyhow!("'{}' is not a PPE category", class));
            }
        }
        Ok(Self { left, right })
    }

    /// Build from configuration names, canonicalizing each entry.
    ///
    /// Only LEFT and RIGHT may be configured; ON_LINE is always the union.
    pub fn from_config(map: &BTreeMap<Zone, Vec<String>>, aliases: &AliasTable) -> Result<Self> {
        let mut left = BTreeSet::new();
        let mut right = BTreeSet::new();
        for (zone, names) in map {
            let target = match zone {
                Zone::Left => &mut left,
                Zone::Right => &mut right,
                Zone::OnLine => {
                    return Err(anyhow!(
                        "ON_LINE requirements are derived from LEFT and RIGHT and cannot be configured"
                    ))
                }
            };
            target.extend(names.iter().map(|name| aliases.canonicalize(name)));
        }
        Self::new(left, right)
    }

    /// Required set for a zone. ON_LINE takes the union of all zones.
    pub fn required_for(&self, zone: Zone) -> BTreeSet<CanonicalClass> {
        match zone {
            Zone::Left => self.left.clone(),
            Zone::Right => self.right.clone(),
            Zone::OnLine => self.left.union(&self.right).cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> BTreeSet<CanonicalClass> {
        names.iter().map(|n| CanonicalClass::new(*n)).collect()
    }

    #[test]
    fn cross_product_sign_decides_side() {
        let d = Divider::new(0.0, 0.0, 0.0, 10.0);
        // sign = -10 * px along x=0 travelling +y.
        assert_eq!(classify(Point::new(-1.0, 5.0), &d), Zone::Left);
        assert_eq!(classify(Point::new(1.0, 5.0), &d), Zone::Right);
        assert_eq!(classify(Point::new(0.0, 5.0), &d), Zone::OnLine);
    }

    #[test]
    fn swapping_endpoints_flips_sides() {
        let d = Divider::new(810.0, 1080.0, 945.0, 500.0);
        let r = d.reversed();
        for p in [
            Point::new(100.0, 100.0),
            Point::new(1500.0, 900.0),
            Point::new(877.0, 790.0),
            Point::new(0.5, 1079.5),
        ] {
            let a = classify(p, &d);
            let b = classify(p, &r);
            match a {
                Zone::Left => assert_eq!(b, Zone::Right),
                Zone::Right => assert_eq!(b, Zone::Left),
                Zone::OnLine => assert_eq!(b, Zone::OnLine),
            }
        }
    }

    #[test]
    fn points_on_the_supporting_line_are_on_line() {
        let d = Divider::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(classify(Point::new(5.0, 5.0), &d), Zone::OnLine);
        // Beyond the segment, still on the supporting line.
        assert_eq!(classify(Point::new(25.0, 25.0), &d), Zone::OnLine);
        assert_eq!(classify(Point::new(5.0, 5.0), &d.reversed()), Zone::OnLine);
    }

    #[test]
    fn midline_splits_at_half_width() {
        let d = Divider::midline(1920, 1080);
        assert_eq!(d, Divider::new(960.0, 0.0, 960.0, 1079.0));
        assert_eq!(classify(Point::new(960.0, 300.0), &d), Zone::OnLine);
        assert_ne!(
            classify(Point::new(100.0, 300.0), &d),
            classify(Point::new(1800.0, 300.0), &d)
        );
    }

    #[test]
    fn degenerate_divider_is_rejected() {
        assert!(Divider::new(1.0, 1.0, 1.0, 1.0).validate().is_err());
        assert!(Divider::new(f64::NAN, 1.0, 1.0, 2.0).validate().is_err());
        assert!(Divider::new(0.0, 0.0, 1.0, 1.0).validate().is_ok());
    }

    #[test]
    fn on_line_requires_union_of_zones() {
        let reqs = ZoneRequirements::new(
            set(&["helmet", "shoes", "goggles"]),
            set(&["pvc_suit", "helmet"]),
        )
        .unwrap();
        assert_eq!(reqs.required_for(Zone::Left), set(&["goggles", "helmet", "shoes"]));
        assert_eq!(reqs.required_for(Zone::Right), set(&["helmet", "pvc_suit"]));
        assert_eq!(
            reqs.required_for(Zone::OnLine),
            set(&["goggles", "helmet", "pvc_suit", "shoes"])
        );
    }

    #[test]
    fn requirements_reject_negative_markers() {
        assert!(ZoneRequirements::new(set(&["no_helmet"]), set(&[])).is_err());
        assert!(ZoneRequirements::new(set(&[]), set(&["person"])).is_err());
    }

    #[test]
    fn config_names_are_canonicalized() {
        let aliases = AliasTable::default();
        let mut map = BTreeMap::new();
        map.insert(Zone::Left, vec!["Hardhat".to_string(), "Safety Shoes".to_string()]);
        map.insert(Zone::Right, vec!["PVC Suit".to_string()]);
        let reqs = ZoneRequirements::from_config(&map, &aliases).unwrap();
        assert_eq!(reqs.required_for(Zone::Left), set(&["helmet", "shoes"]));
        assert_eq!(reqs.required_for(Zone::Right), set(&["pvc_suit"]));

        map.insert(Zone::OnLine, vec!["helmet".to_string()]);
        assert!(ZoneRequirements::from_config(&map, &aliases).is_err());
    }

    #[test]
    fn zone_names_serialize_in_upper_snake_case() {
        assert_eq!(serde_json::to_string(&Zone::OnLine).unwrap(), "\"ON_LINE\"");
        let z: Zone = serde_json::from_str("\"LEFT\"").unwrap();
        assert_eq!(z, Zone::Left);
    }
}
