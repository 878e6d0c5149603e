use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Result, SharkError};

fn epic_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^E\d{2}$").unwrap())
}

fn feature_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^E\d{2}-F\d{2}$").unwrap())
}

fn feature_short_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^F\d{2}$").unwrap())
}

fn task_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^T-E\d{2}-F\d{2}-\d{3}$").unwrap())
}

/// Key grammar for the three-level hierarchy.
///
/// Epics are `E` + two digits, features append `-F` + two digits, tasks are
/// `T-` + feature key + `-` + three digits. The command surface accepts
/// lowercase and short forms; everything is normalized here before it
/// reaches a repository.
pub struct Keys;

impl Keys {
    /// Validate and normalize an epic key ("e1" is not accepted; "e01" is)
    pub fn epic(input: &str) -> Result<String> {
        let key = input.trim().to_uppercase();
        if epic_re().is_match(&key) {
            Ok(key)
        } else {
            Err(SharkError::validation(
                "epic key",
                format!("'{input}' does not match E##"),
            ))
        }
    }

    /// Validate and normalize a feature key. Accepts the full form
    /// ("E01-F02") or the short form ("F02") when an epic key gives context.
    pub fn feature(input: &str, epic: Option<&str>) -> Result<String> {
        let key = input.trim().to_uppercase();
        if feature_re().is_match(&key) {
            return Ok(key);
        }
        if feature_short_re().is_match(&key) {
            if let Some(epic) = epic {
                let epic = Self::epic(epic)?;
                return Ok(format!("{epic}-{key}"));
            }
        }
        Err(SharkError::validation(
            "feature key",
            format!("'{input}' does not match E##-F## (or F## with an epic)"),
        ))
    }

    /// Validate and normalize a task key
    pub fn task(input: &str) -> Result<String> {
        let key = input.trim().to_uppercase();
        if task_re().is_match(&key) {
            Ok(key)
        } else {
            Err(SharkError::validation(
                "task key",
                format!("'{input}' does not match T-E##-F##-###"),
            ))
        }
    }

    /// Compose an epic key from an ordinal (1 → "E01")
    pub fn epic_from_ordinal(ordinal: u32) -> Result<String> {
        if ordinal == 0 || ordinal > 99 {
            return Err(SharkError::validation(
                "epic key",
                format!("ordinal {ordinal} out of range 1-99"),
            ));
        }
        Ok(format!("E{ordinal:02}"))
    }

    /// Compose a feature key from its epic and an ordinal
    pub fn feature_from_ordinal(epic_key: &str, ordinal: u32) -> Result<String> {
        let epic = Self::epic(epic_key)?;
        if ordinal == 0 || ordinal > 99 {
            return Err(SharkError::validation(
                "feature key",
                format!("ordinal {ordinal} out of range 1-99"),
            ));
        }
        Ok(format!("{epic}-F{ordinal:02}"))
    }

    /// Compose a task key from its feature and an ordinal
    pub fn task_from_ordinal(feature_key: &str, ordinal: u32) -> Result<String> {
        let feature = Self::feature(feature_key, None)?;
        if ordinal == 0 || ordinal > 999 {
            return Err(SharkError::validation(
                "task key",
                format!("ordinal {ordinal} out of range 1-999"),
            ));
        }
        Ok(format!("T-{feature}-{ordinal:03}"))
    }

    /// The epic key embedded in a feature key ("E01-F02" → "E01")
    pub fn epic_of_feature(feature_key: &str) -> Result<String> {
        let feature = Self::feature(feature_key, None)?;
        Ok(feature[..3].to_string())
    }

    /// The feature key embedded in a task key ("T-E01-F02-003" → "E01-F02")
    pub fn feature_of_task(task_key: &str) -> Result<String> {
        let task = Self::task(task_key)?;
        Ok(task[2..9].to_string())
    }

    /// The trailing ordinal of a key of any kind
    pub fn ordinal(key: &str) -> Result<u32> {
        let digits: String = key
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        digits
            .parse()
            .map_err(|_| SharkError::validation("key", format!("'{key}' has no trailing ordinal")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epic_keys() {
        assert_eq!(Keys::epic("E01").unwrap(), "E01");
        assert_eq!(Keys::epic("e07").unwrap(), "E07");
        assert_eq!(Keys::epic(" e99 ").unwrap(), "E99");
        assert!(Keys::epic("E1").is_err());
        assert!(Keys::epic("E001").is_err());
        assert!(Keys::epic("F01").is_err());
        assert!(Keys::epic("").is_err());
    }

    #[test]
    fn test_feature_keys() {
        assert_eq!(Keys::feature("E01-F02", None).unwrap(), "E01-F02");
        assert_eq!(Keys::feature("e01-f02", None).unwrap(), "E01-F02");
        assert_eq!(Keys::feature("F02", Some("E01")).unwrap(), "E01-F02");
        assert_eq!(Keys::feature("f02", Some("e01")).unwrap(), "E01-F02");
        assert!(Keys::feature("F02", None).is_err());
        assert!(Keys::feature("E01F02", None).is_err());
        assert!(Keys::feature("E01-F2", Some("E01")).is_err());
    }

    #[test]
    fn test_task_keys() {
        assert_eq!(Keys::task("T-E01-F02-003").unwrap(), "T-E01-F02-003");
        assert_eq!(Keys::task("t-e01-f02-003").unwrap(), "T-E01-F02-003");
        assert!(Keys::task("E01-F02-003").is_err());
        assert!(Keys::task("T-E01-F02-3").is_err());
        assert!(Keys::task("T-E01-F02-0003").is_err());
    }

    #[test]
    fn test_composition() {
        assert_eq!(Keys::epic_from_ordinal(1).unwrap(), "E01");
        assert_eq!(Keys::feature_from_ordinal("E01", 2).unwrap(), "E01-F02");
        assert_eq!(
            Keys::task_from_ordinal("E01-F02", 3).unwrap(),
            "T-E01-F02-003"
        );
        assert!(Keys::epic_from_ordinal(0).is_err());
        assert!(Keys::epic_from_ordinal(100).is_err());
        assert!(Keys::task_from_ordinal("E01-F02", 1000).is_err());
    }

    #[test]
    fn test_decomposition() {
        assert_eq!(Keys::epic_of_feature("E01-F02").unwrap(), "E01");
        assert_eq!(Keys::feature_of_task("T-E01-F02-003").unwrap(), "E01-F02");
        assert_eq!(Keys::ordinal("T-E01-F02-003").unwrap(), 3);
        assert_eq!(Keys::ordinal("E01-F12").unwrap(), 12);
        assert_eq!(Keys::ordinal("E09").unwrap(), 9);
    }
}
