use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HubsyncError;

/// Conflict policy applied when a fetched contact is written to the
/// destination table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteMode {
    /// Insert new ids, overwrite every non-key column of existing ones.
    #[default]
    Merge,
    /// Insert new ids, leave existing rows untouched.
    InsertOnly,
    /// Insert only ids numerically above the stored maximum id.
    ///
    /// Assumes the source assigns monotonically increasing integer ids.
    /// Updates to contacts below the watermark are never picked up.
    InsertIfNew,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Merge => "merge",
            WriteMode::InsertOnly => "insert-only",
            WriteMode::InsertIfNew => "insert-if-new",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WriteMode {
    type Err = HubsyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "merge" | "upsert" => Ok(WriteMode::Merge),
            "insert-only" => Ok(WriteMode::InsertOnly),
            "insert-if-new" => Ok(WriteMode::InsertIfNew),
            other => Err(HubsyncError::Config(format!(
                "unknown write mode '{other}' (expected merge, insert-only or insert-if-new)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_modes() {
        assert_eq!("merge".parse::<WriteMode>().unwrap(), WriteMode::Merge);
        assert_eq!(
            "insert-only".parse::<WriteMode>().unwrap(),
            WriteMode::InsertOnly
        );
        assert_eq!(
            "insert-if-new".parse::<WriteMode>().unwrap(),
            WriteMode::InsertIfNew
        );
    }

    #[test]
    fn parse_is_case_and_separator_insensitive() {
        assert_eq!(
            " INSERT_ONLY ".parse::<WriteMode>().unwrap(),
            WriteMode::InsertOnly
        );
        assert_eq!("Upsert".parse::<WriteMode>().unwrap(), WriteMode::Merge);
    }

    #[test]
    fn unknown_mode_is_config_error() {
        let err = "replace".parse::<WriteMode>().unwrap_err();
        assert!(matches!(err, HubsyncError::Config(_)));
        assert!(err.to_string().contains("replace"), "got: {err}");
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for mode in [WriteMode::Merge, WriteMode::InsertOnly, WriteMode::InsertIfNew] {
            assert_eq!(mode.to_string().parse::<WriteMode>().unwrap(), mode);
        }
    }

    #[test]
    fn default_is_merge() {
        assert_eq!(WriteMode::default(), WriteMode::Merge);
    }
}
