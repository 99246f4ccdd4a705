use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::records::StreamRecord;

/// Seconds between the Unix epoch and `0001-01-01T00:00:00Z`.
const ZERO_TIMESTAMP_SECS: i64 = -62_135_596_800;

/// Composite position in the `(created_at, id)` ascending order of a stream.
///
/// The derived ordering is lexicographic over the fields in declaration
/// order, which is exactly the stream's total order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Watermark {
    #[cfg_attr(
        feature = "serde",
        serde(deserialize_with = "timestamp::deserialize")
    )]
    pub last_created_at: DateTime<Utc>,
    pub last_id: i64,
}

impl Watermark {
    pub fn new(last_created_at: DateTime<Utc>, last_id: i64) -> Self {
        Self {
            last_created_at,
            last_id,
        }
    }

    /// The "nothing processed yet" position.
    pub fn zero() -> Self {
        Self {
            last_created_at: zero_timestamp(),
            last_id: 0,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::zero()
    }

    /// Position of a single record.
    pub fn of<R: StreamRecord + ?Sized>(record: &R) -> Self {
        Self::new(record.created_at(), record.id())
    }

    /// Whether a record at `(created_at, id)` lies strictly after this
    /// watermark.
    pub fn admits(&self, created_at: DateTime<Utc>, id: i64) -> bool {
        match created_at.cmp(&self.last_created_at) {
            Ordering::Greater => true,
            Ordering::Equal => id > self.last_id,
            Ordering::Less => false,
        }
    }

    pub fn admits_record<R: StreamRecord + ?Sized>(&self, record: &R) -> bool {
        self.admits(record.created_at(), record.id())
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {})",
            self.last_created_at.to_rfc3339(),
            self.last_id
        )
    }
}

fn zero_timestamp() -> DateTime<Utc> {
    DateTime::from_timestamp(ZERO_TIMESTAMP_SECS, 0).unwrap_or_default()
}

/// Accepts either an RFC3339 string or integer epoch seconds.
#[cfg(feature = "serde")]
mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, de::Error};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Rfc3339(String),
        EpochSeconds(i64),
    }

    pub(super) fn deserialize<'de, D>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match RawTimestamp::deserialize(deserializer)? {
            RawTimestamp::Rfc3339(raw) => DateTime::parse_from_rfc3339(&raw)
                .map(|parsed| parsed.with_timezone(&Utc))
                .map_err(|err| {
                    D::Error::custom(format!("invalid timestamp '{raw}': {err}"))
                }),
            RawTimestamp::EpochSeconds(secs) => DateTime::from_timestamp(
                secs, 0,
            )
            .ok_or_else(|| {
                D::Error::custom(format!("epoch seconds out of range: {secs}"))
            }),
        }
    }
}
