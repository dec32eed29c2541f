// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Capability negotiation.
//!
//! A process offers a set of simulation definitions (`name` + `version`). The
//! authority declares, per request, the minimum version it needs of each
//! simulation. A requirement is met when the offered version is greater than
//! or equal to the required one; exact matches are not needed.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Dotted numeric version (`major[.minor[.patch[.build]]]`).
///
/// Missing trailing components compare as zero, so `2` == `2.0.0`.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CapabilityVersion {
    parts: Vec<u64>,
}

/// Error returned for version strings that are not dotted numbers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version '{0}'")]
pub struct InvalidVersion(pub String);

impl CapabilityVersion {
    /// Build a version from explicit components.
    pub fn new(parts: impl Into<Vec<u64>>) -> Self {
        Self {
            parts: parts.into(),
        }
    }

    fn component(&self, index: usize) -> u64 {
        self.parts.get(index).copied().unwrap_or(0)
    }
}

impl FromStr for CapabilityVersion {
    type Err = InvalidVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches(['v', 'V']);
        if trimmed.is_empty() {
            return Err(InvalidVersion(s.to_string()));
        }
        let parts = trimmed
            .split('.')
            .map(|part| part.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| InvalidVersion(s.to_string()))?;
        Ok(Self { parts })
    }
}

impl TryFrom<String> for CapabilityVersion {
    type Error = InvalidVersion;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CapabilityVersion> for String {
    fn from(value: CapabilityVersion) -> Self {
        value.to_string()
    }
}

impl fmt::Display for CapabilityVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for part in &self.parts {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{}", part)?;
            first = false;
        }
        Ok(())
    }
}

impl PartialEq for CapabilityVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for CapabilityVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CapabilityVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

/// One capability a session offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationDefinition {
    pub name: String,
    pub version: CapabilityVersion,
}

impl SimulationDefinition {
    /// Create a definition from a name and a parsed version.
    pub fn new(name: impl Into<String>, version: CapabilityVersion) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Create a definition, parsing the version string.
    pub fn parse(name: impl Into<String>, version: &str) -> Result<Self, InvalidVersion> {
        Ok(Self::new(name, version.parse()?))
    }
}

/// Why a capability requirement was not met.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityMismatch {
    /// The required simulation is not offered at all.
    #[error("required simulation '{name}' is not offered")]
    Missing {
        /// Name of the missing simulation.
        name: String,
    },

    /// The simulation is offered in an older version than required.
    #[error("simulation '{name}' is offered in version {offered}, but {required} is required")]
    VersionTooLow {
        /// Name of the simulation.
        name: String,
        /// Minimum version demanded by the authority.
        required: CapabilityVersion,
        /// Version this process offers.
        offered: CapabilityVersion,
    },
}

/// Minimum versions demanded by the authority, keyed by simulation name.
pub type Requirements = BTreeMap<String, CapabilityVersion>;

/// Parse a raw `{name: version}` map into requirements.
pub fn parse_requirements(
    raw: &BTreeMap<String, String>,
) -> Result<Requirements, InvalidVersion> {
    raw.iter()
        .map(|(name, version)| Ok((name.clone(), version.parse()?)))
        .collect()
}

/// Simulations offered by a process or registered by a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    offered: BTreeMap<String, CapabilityVersion>,
}

impl CapabilitySet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a definition.
    pub fn insert(&mut self, definition: SimulationDefinition) {
        self.offered.insert(definition.name, definition.version);
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, definition: SimulationDefinition) -> Self {
        self.insert(definition);
        self
    }

    /// Version offered for `name`, if any.
    pub fn version_of(&self, name: &str) -> Option<&CapabilityVersion> {
        self.offered.get(name)
    }

    /// Number of offered simulations.
    pub fn len(&self) -> usize {
        self.offered.len()
    }

    /// Whether nothing is offered.
    pub fn is_empty(&self) -> bool {
        self.offered.is_empty()
    }

    /// Definitions in name order.
    pub fn definitions(&self) -> Vec<SimulationDefinition> {
        self.offered
            .iter()
            .map(|(name, version)| SimulationDefinition::new(name.clone(), version.clone()))
            .collect()
    }

    /// Check every requirement against this set.
    ///
    /// Returns the first unmet requirement in name order.
    pub fn check(&self, required: &Requirements) -> Result<(), CapabilityMismatch> {
        for (name, min_version) in required {
            match self.offered.get(name) {
                None => {
                    return Err(CapabilityMismatch::Missing { name: name.clone() });
                }
                Some(offered) if offered < min_version => {
                    return Err(CapabilityMismatch::VersionTooLow {
                        name: name.clone(),
                        required: min_version.clone(),
                        offered: offered.clone(),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

impl FromIterator<SimulationDefinition> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = SimulationDefinition>>(iter: T) -> Self {
        let mut set = Self::new();
        for definition in iter {
            set.insert(definition);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> CapabilityVersion {
        s.parse().unwrap()
    }

    fn offering(version: &str) -> CapabilitySet {
        CapabilitySet::new().with(SimulationDefinition::new("Foo", v(version)))
    }

    fn requiring(version: &str) -> Requirements {
        Requirements::from([("Foo".to_string(), v(version))])
    }

    #[test]
    fn test_version_ordering_is_numeric() {
        assert!(v("1.10.0") > v("1.9.0"));
        assert!(v("2.0.0") > v("1.99.99"));
        assert_eq!(v("2"), v("2.0.0"));
        assert!(v("1.0.0.1") > v("1.0"));
    }

    #[test]
    fn test_version_parse_rejects_garbage() {
        assert!("".parse::<CapabilityVersion>().is_err());
        assert!("1.x".parse::<CapabilityVersion>().is_err());
        assert!("1..2".parse::<CapabilityVersion>().is_err());
        assert_eq!(v("v1.2").to_string(), "1.2");
    }

    #[test]
    fn test_requirement_higher_than_offered_is_rejected() {
        let err = offering("1.5.0").check(&requiring("2.0.0")).unwrap_err();
        assert!(matches!(err, CapabilityMismatch::VersionTooLow { .. }));
        assert!(err.to_string().contains("1.5.0"));
        assert!(err.to_string().contains("2.0.0"));
    }

    #[test]
    fn test_requirement_equal_or_lower_is_accepted() {
        assert!(offering("2.0.0").check(&requiring("2.0.0")).is_ok());
        assert!(offering("3.0.0").check(&requiring("2.0.0")).is_ok());
    }

    #[test]
    fn test_missing_capability_is_distinguished() {
        let required = Requirements::from([("Bar".to_string(), v("1.0"))]);
        let err = offering("1.0").check(&required).unwrap_err();
        assert_eq!(
            err,
            CapabilityMismatch::Missing {
                name: "Bar".to_string()
            }
        );
    }

    #[test]
    fn test_empty_requirements_always_pass() {
        assert!(CapabilitySet::new().check(&Requirements::new()).is_ok());
    }

    #[test]
    fn test_parse_requirements() {
        let raw = BTreeMap::from([("Foo".to_string(), "1.2.3".to_string())]);
        let parsed = parse_requirements(&raw).unwrap();
        assert_eq!(parsed["Foo"], v("1.2.3"));

        let bad = BTreeMap::from([("Foo".to_string(), "latest".to_string())]);
        assert!(parse_requirements(&bad).is_err());
    }

    #[test]
    fn test_version_serde_as_string() {
        let def = SimulationDefinition::new("Foo", v("1.0.2"));
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["version"], "1.0.2");
        let back: SimulationDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(back, def);
    }
}
