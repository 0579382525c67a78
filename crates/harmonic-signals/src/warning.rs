//! Warning-range tables and out-of-range rate checks.
//!
//! A table maps `(vital, sex, age band, confidence level)` to a normal
//! `[low, high]` rate interval in events per minute. Tables are loaded
//! all-or-nothing from TOML:
//!
//! ```toml
//! [[range]]
//! vital = "heart"
//! sex = "male"
//! age_min = 18
//! age_max = 29
//! confidence = "five_percents"
//! low = 52.0
//! high = 96.0
//! ```

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vital {
    #[default]
    Heart,
    Breath,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sex {
    Male,
    Female,
}

/// Share of the population expected outside the interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    FiftyPercents,
    TwentyPercents,
    TenPercents,
    FivePercents,
    TwoPercents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningDirection {
    Low,
    High,
}

/// Result of a table load, one value per failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Success,
    FileOpenError,
    FileExistanceError,
    ReadError,
    ParseFailure,
}

#[derive(Error, Debug)]
pub enum WarningTableError {
    #[error("warning table {0} does not exist")]
    Missing(PathBuf),
    #[error("cannot open warning table: {0}")]
    Open(#[source] std::io::Error),
    #[error("cannot read warning table: {0}")]
    Read(#[source] std::io::Error),
    #[error("warning table parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid warning table: {0}")]
    Invalid(String),
}

impl WarningTableError {
    pub fn status(&self) -> LoadStatus {
        match self {
            Self::Missing(_) => LoadStatus::FileExistanceError,
            Self::Open(_) => LoadStatus::FileOpenError,
            Self::Read(_) => LoadStatus::ReadError,
            Self::Parse(_) | Self::Invalid(_) => LoadStatus::ParseFailure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarningRange {
    #[serde(default)]
    pub vital: Vital,
    pub sex: Sex,
    pub age_min: u32,
    pub age_max: u32,
    pub confidence: ConfidenceLevel,
    pub low: f64,
    pub high: f64,
}

impl WarningRange {
    fn matches(&self, vital: Vital, sex: Sex, age: u32, confidence: ConfidenceLevel) -> bool {
        self.vital == vital
            && self.sex == sex
            && self.confidence == confidence
            && (self.age_min..=self.age_max).contains(&age)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarningRangeTable {
    #[serde(rename = "range")]
    ranges: Vec<WarningRange>,
}

impl WarningRangeTable {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, WarningTableError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(WarningTableError::Missing(path.to_path_buf()));
        }
        let mut file = File::open(path).map_err(WarningTableError::Open)?;
        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(WarningTableError::Read)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, WarningTableError> {
        let table: WarningRangeTable = toml::from_str(content)?;
        table.validate()?;
        Ok(table)
    }

    fn validate(&self) -> Result<(), WarningTableError> {
        if self.ranges.is_empty() {
            return Err(WarningTableError::Invalid("no [[range]] rows".to_string()));
        }
        for (i, row) in self.ranges.iter().enumerate() {
            if !(row.low.is_finite() && row.high.is_finite()) || row.low >= row.high {
                return Err(WarningTableError::Invalid(format!(
                    "row {i}: low must be < high"
                )));
            }
            if row.age_min > row.age_max {
                return Err(WarningTableError::Invalid(format!(
                    "row {i}: age_min must be <= age_max"
                )));
            }
        }
        Ok(())
    }

    pub fn ranges(&self) -> &[WarningRange] {
        &self.ranges
    }

    /// First row matching the query.
    pub fn lookup(
        &self,
        vital: Vital,
        sex: Sex,
        age: u32,
        confidence: ConfidenceLevel,
    ) -> Option<&WarningRange> {
        self.ranges
            .iter()
            .find(|row| row.matches(vital, sex, age, confidence))
    }
}

/// Who the rates are checked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarningProfile {
    pub sex: Sex,
    pub age: u32,
    pub confidence: ConfidenceLevel,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateWarning {
    pub vital: Vital,
    pub rate_bpm: f64,
    pub low: f64,
    pub high: f64,
    pub direction: WarningDirection,
}

#[derive(Debug, Clone, Default)]
pub struct WarningEngine {
    table: Option<WarningRangeTable>,
    profile: Option<WarningProfile>,
}

impl WarningEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace table and profile. On failure both stay as they were.
    pub fn load<P: AsRef<Path>>(&mut self, path: P, profile: WarningProfile) -> LoadStatus {
        let path = path.as_ref();
        match WarningRangeTable::from_file(path) {
            Ok(table) => {
                log::info!(
                    "loaded {} warning ranges from {}",
                    table.ranges.len(),
                    path.display()
                );
                self.table = Some(table);
                self.profile = Some(profile);
                LoadStatus::Success
            }
            Err(e) => {
                log::warn!("warning table load failed: {e}");
                e.status()
            }
        }
    }

    pub fn table(&self) -> Option<&WarningRangeTable> {
        self.table.as_ref()
    }

    pub fn profile(&self) -> Option<WarningProfile> {
        self.profile
    }

    /// Check a rate in events per minute against the active profile.
    pub fn check(&self, vital: Vital, rate_bpm: f64) -> Option<RateWarning> {
        let (Some(table), Some(profile)) = (&self.table, self.profile) else {
            log::debug!("no warning profile loaded, {vital:?} rate not checked");
            return None;
        };
        let Some(range) = table.lookup(vital, profile.sex, profile.age, profile.confidence) else {
            log::debug!("no {vital:?} warning range for {profile:?}");
            return None;
        };

        let direction = if rate_bpm < range.low {
            WarningDirection::Low
        } else if rate_bpm > range.high {
            WarningDirection::High
        } else {
            return None;
        };
        Some(RateWarning {
            vital,
            rate_bpm,
            low: range.low,
            high: range.high,
            direction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::{tempdir, NamedTempFile};

    const TABLE: &str = r#"
        [[range]]
        sex = "male"
        age_min = 18
        age_max = 39
        confidence = "five_percents"
        low = 52.0
        high = 96.0

        [[range]]
        vital = "breath"
        sex = "male"
        age_min = 18
        age_max = 39
        confidence = "five_percents"
        low = 10.0
        high = 22.0

        [[range]]
        sex = "female"
        age_min = 18
        age_max = 39
        confidence = "five_percents"
        low = 56.0
        high = 100.0
    "#;

    fn profile() -> WarningProfile {
        WarningProfile {
            sex: Sex::Male,
            age: 30,
            confidence: ConfidenceLevel::FivePercents,
        }
    }

    fn table_file(content: &str) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), content).unwrap();
        file
    }

    #[test]
    fn test_lookup() {
        let table = WarningRangeTable::from_toml_str(TABLE).unwrap();
        assert_eq!(table.ranges().len(), 3);

        let heart = table
            .lookup(Vital::Heart, Sex::Female, 25, ConfidenceLevel::FivePercents)
            .unwrap();
        assert_eq!(heart.low, 56.0);

        let breath = table
            .lookup(Vital::Breath, Sex::Male, 39, ConfidenceLevel::FivePercents)
            .unwrap();
        assert_eq!(breath.high, 22.0);

        assert!(table
            .lookup(Vital::Heart, Sex::Male, 40, ConfidenceLevel::FivePercents)
            .is_none());
        assert!(table
            .lookup(Vital::Heart, Sex::Male, 30, ConfidenceLevel::TwoPercents)
            .is_none());
    }

    #[test]
    fn test_check_directions() {
        let file = table_file(TABLE);
        let mut engine = WarningEngine::new();
        assert_eq!(engine.load(file.path(), profile()), LoadStatus::Success);

        assert!(engine.check(Vital::Heart, 70.0).is_none());
        let low = engine.check(Vital::Heart, 45.0).unwrap();
        assert_eq!(low.direction, WarningDirection::Low);
        let high = engine.check(Vital::Breath, 30.0).unwrap();
        assert_eq!(high.direction, WarningDirection::High);
        assert_eq!((high.low, high.high), (10.0, 22.0));
    }

    #[test]
    fn test_no_table_no_warning() {
        let engine = WarningEngine::new();
        assert!(engine.check(Vital::Heart, 300.0).is_none());
    }

    #[test]
    fn test_load_statuses() {
        let mut engine = WarningEngine::new();
        let dir = tempdir().unwrap();

        let missing = dir.path().join("absent.toml");
        assert_eq!(engine.load(&missing, profile()), LoadStatus::FileExistanceError);

        // a directory exists but cannot be read as a file
        let status = engine.load(dir.path(), profile());
        assert!(
            matches!(status, LoadStatus::FileOpenError | LoadStatus::ReadError),
            "{status:?}"
        );

        let garbage = table_file("[[range]]\nsex = \"unknown\"\n");
        assert_eq!(engine.load(garbage.path(), profile()), LoadStatus::ParseFailure);

        let non_utf8 = NamedTempFile::new().unwrap();
        fs::write(non_utf8.path(), [0xff, 0xfe, 0xfd]).unwrap();
        assert_eq!(engine.load(non_utf8.path(), profile()), LoadStatus::ReadError);

        assert!(engine.table().is_none());
    }

    #[test]
    fn test_failed_load_keeps_previous_table() {
        let good = table_file(TABLE);
        let mut engine = WarningEngine::new();
        assert_eq!(engine.load(good.path(), profile()), LoadStatus::Success);
        let before = engine.table().cloned();

        let inverted = table_file(
            r#"
            [[range]]
            sex = "male"
            age_min = 18
            age_max = 39
            confidence = "five_percents"
            low = 100.0
            high = 50.0
        "#,
        );
        let other = WarningProfile {
            sex: Sex::Female,
            ..profile()
        };
        assert_eq!(engine.load(inverted.path(), other), LoadStatus::ParseFailure);
        assert_eq!(engine.table().cloned(), before);
        assert_eq!(engine.profile(), Some(profile()));
    }

    #[test]
    fn test_empty_table_rejected() {
        let err = WarningRangeTable::from_toml_str("range = []").unwrap_err();
        assert_eq!(err.status(), LoadStatus::ParseFailure);
    }
}
