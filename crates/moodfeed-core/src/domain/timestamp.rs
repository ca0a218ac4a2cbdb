use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

use crate::ValidationError;

/// Wall-clock UTC timestamp reported to operators (cache status, disable windows, mock data).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UtcDateTime(OffsetDateTime);

impl UtcDateTime {
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    /// Timestamp `offset` from now; used to report when a disable window ends.
    pub fn from_now(offset: Duration) -> Self {
        let offset = time::Duration::try_from(offset).unwrap_or(time::Duration::MAX);
        Self(
            OffsetDateTime::now_utc()
                .checked_add(offset)
                .unwrap_or(OffsetDateTime::now_utc()),
        )
    }

    /// Timestamp `offset` before now.
    pub fn ago(offset: Duration) -> Self {
        let offset = time::Duration::try_from(offset).unwrap_or(time::Duration::MAX);
        Self(
            OffsetDateTime::now_utc()
                .checked_sub(offset)
                .unwrap_or(OffsetDateTime::UNIX_EPOCH),
        )
    }

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let parsed = OffsetDateTime::parse(input, &Rfc3339).map_err(|_| {
            ValidationError::TimestampNotUtc {
                value: input.to_owned(),
            }
        })?;

        if parsed.offset() != UtcOffset::UTC {
            return Err(ValidationError::TimestampNotUtc {
                value: input.to_owned(),
            });
        }

        Ok(Self(parsed))
    }

    pub fn unix_millis(self) -> i64 {
        (self.0.unix_timestamp_nanos() / 1_000_000) as i64
    }

    /// Calendar date in `YYYY-MM-DD` form, as providers report trading days.
    pub fn date_string(self) -> String {
        let date = self.0.date();
        format!(
            "{:04}-{:02}-{:02}",
            date.year(),
            u8::from(date.month()),
            date.day()
        )
    }

    /// `YYYY-MM-DD HH:MM:SS`, the layout intraday series use as keys.
    pub fn datetime_string(self) -> String {
        let clock = self.0.time();
        format!(
            "{} {:02}:{:02}:{:02}",
            self.date_string(),
            clock.hour(),
            clock.minute(),
            clock.second()
        )
    }

    pub fn format_rfc3339(self) -> String {
        self.0
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.0.unix_timestamp().to_string())
    }
}

impl Display for UtcDateTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format_rfc3339())
    }
}

impl Serialize for UtcDateTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.format_rfc3339())
    }
}

impl<'de> Deserialize<'de> for UtcDateTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value).map_err(D::Error::custom)
    }
}
