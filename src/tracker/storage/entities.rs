use std::{collections::BTreeMap, fmt::Display, sync::Arc};

use chrono::{DateTime, Duration, TimeZone};
use serde::{Deserialize, Serialize};

use crate::utils::time::{date_label, time_label};

/// Identity of a tracked document. Documents without a path share the unidentified key, which is
/// tracked in memory but never written to the log.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SubjectKey {
    Path(Arc<str>),
    Unidentified,
}

impl SubjectKey {
    /// Key used in the log for documents that were never saved.
    pub const UNIDENTIFIED: &'static str = "None";

    pub fn from_path(path: impl AsRef<str>) -> Self {
        let path = path.as_ref();
        if path.is_empty() || path == Self::UNIDENTIFIED {
            SubjectKey::Unidentified
        } else {
            SubjectKey::Path(path.into())
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, SubjectKey::Path(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            SubjectKey::Path(path) => path.as_ref(),
            SubjectKey::Unidentified => Self::UNIDENTIFIED,
        }
    }
}

impl Display for SubjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SubjectKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SubjectKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(SubjectKey::from_path(s))
    }
}

/// One save checkpoint. Durations are what accrued since the previous checkpoint, not totals, so
/// each entry stays meaningful after older ones are evicted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    #[serde(rename = "date")]
    pub date_label: String,
    #[serde(rename = "time")]
    pub time_label: String,
    #[serde(rename = "open_time", with = "seconds_ser")]
    pub open_delta: Duration,
    #[serde(rename = "active_time", with = "seconds_ser")]
    pub active_delta: Duration,
}

impl CheckpointEntry {
    /// Builds an entry labelled with `moment` as seen in its own time zone.
    pub fn stamped<Tz: TimeZone>(
        moment: &DateTime<Tz>,
        open_delta: Duration,
        active_delta: Duration,
    ) -> Self
    where
        Tz::Offset: Display,
    {
        Self {
            date_label: date_label(moment),
            time_label: time_label(moment),
            open_delta,
            active_delta,
        }
    }
}

/// Everything the log keeps for one subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectRecord {
    #[serde(with = "seconds_ser", default)]
    pub total_open_time: Duration,
    #[serde(with = "seconds_ser", default)]
    pub total_active_time: Duration,
    /// Oldest first.
    #[serde(default)]
    pub history: Vec<CheckpointEntry>,
}

/// The whole backing file. It is always read and written as a unit.
pub type LogStore = BTreeMap<SubjectKey, SubjectRecord>;

/// Durations are stored as fractional seconds with millisecond resolution.
pub mod seconds_ser {
    use chrono::Duration;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.num_milliseconds() as f64 / 1000.)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        let millis = (seconds * 1000.).round();
        if !(0.0..i64::MAX as f64).contains(&millis) {
            return Err(serde::de::Error::custom(format!(
                "duration must be a non-negative number of seconds within range, got {seconds}"
            )));
        }
        Duration::try_milliseconds(millis as i64).ok_or_else(|| {
            serde::de::Error::custom(format!("duration {seconds}s is out of range"))
        })
    }
}

/// Cuts `value` down to whole milliseconds, the resolution the log keeps.
pub fn truncate_to_millis(value: Duration) -> Duration {
    Duration::milliseconds(value.num_milliseconds())
}
