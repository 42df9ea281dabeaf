//! Dotted numeric extension versions.
//!
//! Extension versions are one to four dot-separated integers ("1", "1.0",
//! "2.10.0.3"). They are not semver: there are no pre-release tags and
//! missing trailing components compare as zero, so `1.0 == 1.0.0`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::WardenError;

const MAX_COMPONENTS: usize = 4;

/// A parsed extension version.
#[derive(Debug, Clone)]
pub struct Version {
    components: Vec<u32>,
}

impl Version {
    /// Build a version from its components.
    pub fn new(components: &[u32]) -> Self {
        Self {
            components: components.to_vec(),
        }
    }

    /// The raw components as parsed.
    pub fn components(&self) -> &[u32] {
        &self.components
    }

    fn component(&self, index: usize) -> u32 {
        self.components.get(index).copied().unwrap_or(0)
    }
}

impl FromStr for Version {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || WardenError::InvalidVersion(s.to_string());

        if s.is_empty() {
            return Err(invalid());
        }

        let mut components = Vec::new();
        for part in s.split('.') {
            // Reject signs, whitespace and empty parts that u32 parsing would
            // otherwise let through or that hide typos.
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            components.push(part.parse::<u32>().map_err(|_| invalid())?);
        }

        if components.len() > MAX_COMPONENTS {
            return Err(invalid());
        }

        Ok(Self { components })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.components.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        for i in 0..len {
            match self.component(i).cmp(&other.component(i)) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
