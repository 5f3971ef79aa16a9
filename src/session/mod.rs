mod store;

pub use store::{SessionStore, SqliteSessionStore, StorageError};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned identifier of a sleep session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub i64);

impl SessionId {
    /// Placeholder carried by records that have not been inserted yet.
    pub const UNASSIGNED: Self = Self(0);

    pub fn is_assigned(self) -> bool {
        self != Self::UNASSIGNED
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How well the user slept, on the 0..=5 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepQuality {
    VeryBad = 0,
    Poor = 1,
    SoSo = 2,
    Ok = 3,
    PrettyGood = 4,
    Excellent = 5,
}

impl SleepQuality {
    pub fn score(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::VeryBad => "Very bad",
            Self::Poor => "Poor",
            Self::SoSo => "So-so",
            Self::Ok => "OK",
            Self::PrettyGood => "Pretty good",
            Self::Excellent => "Excellent",
        }
    }
}

impl TryFrom<u8> for SleepQuality {
    type Error = String;

    fn try_from(score: u8) -> Result<Self, Self::Error> {
        match score {
            0 => Ok(Self::VeryBad),
            1 => Ok(Self::Poor),
            2 => Ok(Self::SoSo),
            3 => Ok(Self::Ok),
            4 => Ok(Self::PrettyGood),
            5 => Ok(Self::Excellent),
            _ => Err(format!("Sleep quality must be between 0 and 5, got {score}")),
        }
    }
}

impl fmt::Display for SleepQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One sleep interval.
///
/// A record whose end time equals its start time is still in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub quality: Option<SleepQuality>,
}

impl SessionRecord {
    /// Create an unsaved, in-progress record starting at `now_ms`.
    pub fn new(now_ms: i64) -> Self {
        Self {
            id: SessionId::UNASSIGNED,
            start_time_ms: now_ms,
            end_time_ms: now_ms,
            quality: None,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.end_time_ms == self.start_time_ms
    }

    pub fn is_closed(&self) -> bool {
        self.end_time_ms > self.start_time_ms
    }

    /// Time slept. Zero while the session is in progress.
    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::milliseconds((self.end_time_ms - self.start_time_ms).max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_in_progress() {
        let record = SessionRecord::new(1_000);
        assert!(record.is_in_progress());
        assert!(!record.is_closed());
        assert!(!record.id.is_assigned());
        assert_eq!(record.duration(), chrono::Duration::zero());
    }

    #[test]
    fn test_closed_record_duration() {
        let mut record = SessionRecord::new(0);
        record.end_time_ms = 7 * 3_600_000 + 30 * 60_000;
        assert!(record.is_closed());
        assert_eq!(record.duration().num_minutes(), 7 * 60 + 30);
    }

    #[test]
    fn test_quality_scale() {
        assert_eq!(SleepQuality::try_from(0), Ok(SleepQuality::VeryBad));
        assert_eq!(SleepQuality::try_from(5), Ok(SleepQuality::Excellent));
        assert!(SleepQuality::try_from(6).is_err());
        assert_eq!(SleepQuality::PrettyGood.score(), 4);
        assert_eq!(SleepQuality::SoSo.to_string(), "So-so");
    }
}
