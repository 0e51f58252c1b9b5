//! The user record and its derived policy values.

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};
use uuid::Uuid;

use crate::AuthError;

/// One tunnel user, as held by the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Canonical lowercase hyphenated UUID.
    pub id: String,
    /// Creation time as a unix timestamp.
    pub created_at: i64,
    /// `YYYY-MM-DD`, UTC.
    pub expiration_date: Option<String>,
    /// `HH:MM:SS` (or `HH:MM`), UTC.
    pub expiration_time: Option<String>,
    pub note: String,
    /// Byte cap, 0 = unlimited.
    pub data_cap: u64,
    /// Cumulative bytes used.
    pub data_used: u64,
    /// Max distinct concurrent client addresses, 0 = unlimited.
    pub ip_limit: u32,
}

impl UserRecord {
    /// A fresh record with no expiry set, which means it is already expired.
    pub fn new(id: impl Into<String>, created_at: i64) -> Self {
        Self {
            id: id.into(),
            created_at,
            expiration_date: None,
            expiration_time: None,
            note: String::new(),
            data_cap: 0,
            data_used: 0,
            ip_limit: 0,
        }
    }

    /// The UTC instant the account stops working, if both fields parse.
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        let date = parse_date(self.expiration_date.as_deref()?)?;
        let time = parse_time(self.expiration_time.as_deref()?)?;
        Some(PrimitiveDateTime::new(date, time).assume_utc())
    }

    /// Missing or malformed expiry counts as expired.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        match self.expires_at() {
            Some(at) => now >= at,
            None => true,
        }
    }

    /// True once `data_used + session_bytes` reaches a non-zero cap.
    #[inline]
    pub fn over_quota(&self, session_bytes: u64) -> bool {
        self.data_cap > 0 && self.data_used.saturating_add(session_bytes) >= self.data_cap
    }

    /// Bytes left before the cap, `None` when unlimited.
    pub fn remaining(&self) -> Option<u64> {
        (self.data_cap > 0).then(|| self.data_cap.saturating_sub(self.data_used))
    }
}

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub expiration_date: Option<String>,
    pub expiration_time: Option<String>,
    pub note: Option<String>,
    pub data_cap: Option<u64>,
    pub ip_limit: Option<u32>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn apply(&self, record: &mut UserRecord) {
        if let Some(v) = &self.expiration_date {
            record.expiration_date = Some(v.clone());
        }
        if let Some(v) = &self.expiration_time {
            record.expiration_time = Some(v.clone());
        }
        if let Some(v) = &self.note {
            record.note = v.clone();
        }
        if let Some(v) = self.data_cap {
            record.data_cap = v;
        }
        if let Some(v) = self.ip_limit {
            record.ip_limit = v;
        }
    }

    /// Reject date/time strings the expiry check could not parse.
    pub fn validate(&self) -> Result<(), AuthError> {
        if let Some(d) = &self.expiration_date
            && parse_date(d).is_none()
        {
            return Err(AuthError::InvalidField(format!("expiration date: {d}")));
        }
        if let Some(t) = &self.expiration_time
            && parse_time(t).is_none()
        {
            return Err(AuthError::InvalidField(format!("expiration time: {t}")));
        }
        Ok(())
    }
}

/// Canonicalize a user identifier, rejecting anything that is not a UUID.
pub fn canonical_id(raw: &str) -> Result<String, AuthError> {
    Uuid::parse_str(raw.trim())
        .map(|id| id.hyphenated().to_string())
        .map_err(|_| AuthError::InvalidId(raw.to_string()))
}

pub(crate) fn parse_date(s: &str) -> Option<Date> {
    Date::parse(s.trim(), format_description!("[year]-[month]-[day]")).ok()
}

pub(crate) fn parse_time(s: &str) -> Option<Time> {
    let s = s.trim();
    Time::parse(s, format_description!("[hour]:[minute]:[second]"))
        .or_else(|_| Time::parse(s, format_description!("[hour]:[minute]")))
        .ok()
}

/// Split an instant into the stored date and time strings.
pub fn format_expiration(at: OffsetDateTime) -> (String, String) {
    let at = at.to_offset(time::UtcOffset::UTC);
    let date = at
        .date()
        .format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_default();
    let time = at
        .time()
        .format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_default();
    (date, time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn user(date: Option<&str>, time: Option<&str>) -> UserRecord {
        UserRecord {
            expiration_date: date.map(str::to_string),
            expiration_time: time.map(str::to_string),
            ..UserRecord::new("d342d11e-d424-4583-b36e-524ab1f0afa4", 0)
        }
    }

    #[test]
    fn expiry_is_utc_instant_from_date_and_time() {
        let u = user(Some("2020-01-01"), Some("00:00:00"));
        assert_eq!(u.expires_at(), Some(datetime!(2020-01-01 0:00 UTC)));
        assert!(u.is_expired(datetime!(2024-01-01 0:00 UTC)));
        assert!(u.is_expired(datetime!(2020-01-01 0:00 UTC)));
        assert!(!u.is_expired(datetime!(2019-12-31 23:59:59 UTC)));
    }

    #[test]
    fn missing_or_bad_expiry_is_expired() {
        let now = datetime!(2000-01-01 0:00 UTC);
        assert!(user(None, Some("00:00:00")).is_expired(now));
        assert!(user(Some("2099-01-01"), None).is_expired(now));
        assert!(user(Some("01/01/2099"), Some("00:00:00")).is_expired(now));
    }

    #[test]
    fn short_time_form_is_accepted() {
        let u = user(Some("2030-06-01"), Some("12:30"));
        assert_eq!(u.expires_at(), Some(datetime!(2030-06-01 12:30 UTC)));
    }

    #[test]
    fn quota_uses_inclusive_cap() {
        let mut u = user(None, None);
        u.data_cap = 1_000_000;
        u.data_used = 999_999;
        assert!(!u.over_quota(0));
        assert!(u.over_quota(1));
        assert_eq!(u.remaining(), Some(1));

        u.data_cap = 0;
        assert!(!u.over_quota(u64::MAX));
        assert_eq!(u.remaining(), None);
    }

    #[test]
    fn canonical_id_lowercases_and_rejects_garbage() {
        assert_eq!(
            canonical_id("D342D11E-D424-4583-B36E-524AB1F0AFA4").unwrap(),
            "d342d11e-d424-4583-b36e-524ab1f0afa4"
        );
        assert!(matches!(canonical_id("not-a-uuid"), Err(AuthError::InvalidId(_))));
    }

    #[test]
    fn update_applies_only_set_fields() {
        let mut u = user(Some("2030-01-01"), Some("00:00:00"));
        u.note = "keep".into();
        let update = UserUpdate {
            data_cap: Some(10),
            ..Default::default()
        };
        update.apply(&mut u);
        assert_eq!(u.data_cap, 10);
        assert_eq!(u.note, "keep");
        assert!(UserUpdate::default().is_empty());
        assert!(
            UserUpdate {
                expiration_date: Some("2030-13-40".into()),
                ..Default::default()
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn format_expiration_round_trips() {
        let (d, t) = format_expiration(datetime!(2031-02-03 04:05:06 UTC));
        assert_eq!(d, "2031-02-03");
        assert_eq!(t, "04:05:06");
        assert_eq!(
            user(Some(&d), Some(&t)).expires_at(),
            Some(datetime!(2031-02-03 04:05:06 UTC))
        );
    }
}
