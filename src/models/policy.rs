//! Retention policy and the invocation payload that can override it.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

/// Retention applied when neither the payload nor `RETENTION_DAYS` provides one.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Which bucket to sweep and how many days of objects to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub bucket_name: String,
    pub retention_days: u32,
}

impl RetentionPolicy {
    pub fn new(bucket_name: impl Into<String>, retention_days: u32) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            retention_days,
        }
    }

    /// Instant before which objects are eligible for deletion.
    ///
    /// Callers compute this once per sweep and hold it for the whole traversal.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(Duration::days(i64::from(self.retention_days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Optional JSON payload of an invocation. Every field overlays the
/// environment default when present.
#[derive(Debug, Default, Clone, Deserialize, PartialEq, Eq)]
pub struct SweepPayload {
    #[serde(default, rename = "bucketName", alias = "bucket-name")]
    pub bucket_name: Option<String>,

    #[serde(default, rename = "retentionDays", alias = "retention-days")]
    pub retention_days: Option<u32>,
}

impl SweepPayload {
    /// Parse a raw request body. An empty body or a JSON `null` yields the
    /// empty payload.
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        Ok(serde_json::from_slice::<Option<Self>>(body)?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn cutoff_subtracts_whole_days() {
        let now = Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap();
        let policy = RetentionPolicy::new("logs", 30);
        assert_eq!(
            policy.cutoff(now),
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn zero_days_cuts_off_at_now() {
        let now = Utc::now();
        assert_eq!(RetentionPolicy::new("logs", 0).cutoff(now), now);
    }

    #[test]
    fn huge_retention_saturates() {
        let now = Utc::now();
        let cutoff = RetentionPolicy::new("logs", u32::MAX).cutoff(now);
        assert_eq!(cutoff, DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn empty_body_is_empty_payload() {
        assert_eq!(SweepPayload::parse(b"").unwrap(), SweepPayload::default());
        assert_eq!(SweepPayload::parse(b"  \n").unwrap(), SweepPayload::default());
        assert_eq!(SweepPayload::parse(b"null").unwrap(), SweepPayload::default());
    }

    #[test]
    fn accepts_camel_and_kebab_keys() {
        let camel = SweepPayload::parse(br#"{"bucketName":"a","retentionDays":7}"#).unwrap();
        let kebab = SweepPayload::parse(br#"{"bucket-name":"a","retention-days":7}"#).unwrap();
        assert_eq!(camel, kebab);
        assert_eq!(camel.bucket_name.as_deref(), Some("a"));
        assert_eq!(camel.retention_days, Some(7));
    }

    #[test]
    fn rejects_negative_retention() {
        assert!(SweepPayload::parse(br#"{"retentionDays":-1}"#).is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(SweepPayload::parse(b"{bucket").is_err());
    }
}
