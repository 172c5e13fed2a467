//! Foundation types shared by every layer.
//!
//! - `TimestampNs`: nanosecond timestamps as emitted by robot odometry
//! - `MissionId`: canonical identifier of one contiguous robot session
//! - `submap_hash`: stable per-path hash used to track submaps in flight

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Timestamps are nanoseconds since the robot's clock epoch.
pub type TimestampNs = i64;

/// Length of a canonical mission id: 128 bits as lowercase hex.
pub const MISSION_ID_LEN: usize = 32;

/// Minimum prefix length accepted when resolving a partial mission id.
pub const MIN_MISSION_ID_PREFIX: usize = 4;

/// Identifier of one contiguous mapping session of a single robot.
///
/// The canonical form is exactly 32 lowercase hexadecimal characters.
/// All prefix comparisons (partial-id deletion) happen on this form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MissionId(String);

impl MissionId {
    /// Parse and normalize a mission id string.
    ///
    /// Uppercase hex digits are accepted and folded to lowercase.
    pub fn parse(s: &str) -> Result<Self, String> {
        let normalized = s.trim().to_ascii_lowercase();
        if normalized.len() != MISSION_ID_LEN {
            return Err(format!(
                "mission id must be {} hex characters, got {} ('{}')",
                MISSION_ID_LEN,
                normalized.len(),
                s
            ));
        }
        if !normalized.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(format!("mission id contains non-hex characters: '{}'", s));
        }
        Ok(Self(normalized))
    }

    /// The canonical lowercase-hex string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id starts with the given (already lowercased) prefix.
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for MissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MissionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MissionId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<MissionId> for String {
    fn from(id: MissionId) -> Self {
        id.0
    }
}

/// Stable hash of a submap path.
///
/// Used as the unique handle for a submap while it is in flight: duplicate
/// notifications for the same path hash to the same value and are rejected,
/// and status reports tag per-submap commands with it.
pub fn submap_hash(path: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    hasher.finish()
}

/// Render a submap hash the way it appears in logs and status reports.
pub fn format_submap_hash(hash: u64) -> String {
    format!("{:016x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mission_id_parse_and_normalize() {
        let id = MissionId::parse("0123456789ABCDEF0123456789abcdef").unwrap();
        assert_eq!(id.as_str(), "0123456789abcdef0123456789abcdef");
    }

    #[test]
    fn test_mission_id_rejects_bad_length() {
        assert!(MissionId::parse("abcd").is_err());
        assert!(MissionId::parse("").is_err());
    }

    #[test]
    fn test_mission_id_rejects_non_hex() {
        assert!(MissionId::parse("zzzz456789abcdef0123456789abcdef").is_err());
    }

    #[test]
    fn test_mission_id_prefix_match() {
        let id = MissionId::parse("deadbeef89abcdef0123456789abcdef").unwrap();
        assert!(id.matches_prefix("dead"));
        assert!(!id.matches_prefix("beef"));
    }

    #[test]
    fn test_submap_hash_is_stable() {
        assert_eq!(submap_hash("/maps/s1"), submap_hash("/maps/s1"));
        assert_ne!(submap_hash("/maps/s1"), submap_hash("/maps/s2"));
    }
}
