//! Validity policy: pure decisions about whether a credential can be served.
//!
//! Nothing here touches storage or crypto. Every function takes the current
//! instant explicitly so callers evaluate one operation against one clock
//! reading.

use super::Credentials;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;

/// Why a cached credential cannot be returned as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    Forced,
    Expiring,
    ScopeChanged,
}

/// True when an access token expiring at `expires_at` will be expired
/// `min_ttl` seconds from `now`.
pub fn will_expire(expires_at: DateTime<Utc>, min_ttl: u64, now: DateTime<Utc>) -> bool {
    expires_within(expires_at.timestamp_millis(), min_ttl, now)
}

/// Cheap validity check used before any decryption.
///
/// `expires_at_millis` is the plaintext mirror (epoch ms). A missing mirror
/// means the record predates it and never expires by time; a stored value is
/// compared as-is, epoch and earlier included. A slot with no blob is never
/// valid; otherwise the record is valid if it does not expire within
/// `min_ttl` or it can be refreshed.
pub fn is_valid(
    has_blob: bool,
    expires_at_millis: Option<i64>,
    min_ttl: u64,
    can_refresh: bool,
    now: DateTime<Utc>,
) -> bool {
    if !has_blob {
        return false;
    }
    let expiring = expires_at_millis.is_some_and(|ms| expires_within(ms, min_ttl, now));
    !expiring || can_refresh
}

/// Compares scopes as whitespace separated sets.
///
/// A `None` requested scope means "keep whatever was granted" and is never a
/// change.
pub fn has_scope_changed(stored: Option<&str>, requested: Option<&str>) -> bool {
    let Some(requested) = requested else {
        return false;
    };
    scope_set(stored.unwrap_or_default()) != scope_set(requested)
}

/// Decides whether `credentials` must be refreshed to satisfy the request.
///
/// Expiry is reported ahead of a scope change; either one alone is enough.
pub fn needs_refresh(
    credentials: &Credentials,
    requested_scope: Option<&str>,
    min_ttl: u64,
    force: bool,
    now: DateTime<Utc>,
) -> Option<RefreshReason> {
    if force {
        Some(RefreshReason::Forced)
    } else if will_expire(credentials.expires_at, min_ttl, now) {
        Some(RefreshReason::Expiring)
    } else if has_scope_changed(credentials.scope.as_deref(), requested_scope) {
        Some(RefreshReason::ScopeChanged)
    } else {
        None
    }
}

/// Whole seconds left before `expires_at`, negative once expired.
pub fn remaining_lifetime(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (expires_at - now).num_seconds()
}

fn expires_within(expires_at_millis: i64, min_ttl: u64, now: DateTime<Utc>) -> bool {
    let horizon = now.timestamp_millis().saturating_add(ttl_millis(min_ttl));
    expires_at_millis <= horizon
}

fn ttl_millis(min_ttl: u64) -> i64 {
    i64::try_from(min_ttl)
        .ok()
        .and_then(Duration::try_seconds)
        .map(|d| d.num_milliseconds())
        .unwrap_or(i64::MAX)
}

fn scope_set(scope: &str) -> BTreeSet<&str> {
    scope.split_whitespace().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds_expiring_in(seconds: i64, scope: Option<&str>) -> (Credentials, DateTime<Utc>) {
        let now = Utc::now();
        let creds = Credentials::new(
            "",
            "access",
            "Bearer",
            None,
            now + Duration::seconds(seconds),
            scope.map(str::to_string),
        );
        (creds, now)
    }

    #[test]
    fn test_will_expire() {
        let now = Utc::now();
        let in_one_hour = now + Duration::hours(1);
        let past = now - Duration::seconds(1);

        assert!(!will_expire(in_one_hour, 0, now));
        assert!(!will_expire(in_one_hour, 3_599, now));
        assert!(will_expire(in_one_hour, 3_601, now));
        assert!(will_expire(past, 0, now));
    }

    #[test]
    fn test_missing_mirror_never_expires() {
        let now = Utc::now();
        assert!(is_valid(true, None, 60, false, now));
        assert!(is_valid(true, None, u64::MAX, false, now));
    }

    #[test]
    fn test_epoch_expiry_is_expired() {
        let now = Utc::now();
        let epoch = DateTime::from_timestamp_millis(0).unwrap();
        let before_epoch = epoch - Duration::days(1);

        assert!(will_expire(epoch, 0, now));
        assert!(will_expire(before_epoch, 0, now));
        assert!(!is_valid(true, Some(0), 0, false, now));
        assert!(!is_valid(true, Some(before_epoch.timestamp_millis()), 0, false, now));
        assert!(is_valid(true, Some(0), 0, true, now));
    }

    #[test]
    fn test_huge_min_ttl_saturates() {
        let now = Utc::now();
        let far = now + Duration::days(3650);
        assert!(will_expire(far, u64::MAX, now));
    }

    #[test]
    fn test_is_valid() {
        let now = Utc::now();
        let future = Some((now + Duration::hours(1)).timestamp_millis());
        let past = Some((now - Duration::hours(1)).timestamp_millis());

        assert!(!is_valid(false, future, 0, true, now));
        assert!(is_valid(true, future, 0, false, now));
        assert!(!is_valid(true, past, 0, false, now));
        assert!(is_valid(true, past, 0, true, now));
        assert!(!is_valid(true, future, 7_200, false, now));
        assert!(is_valid(true, future, 7_200, true, now));
    }

    #[test]
    fn test_scope_change() {
        assert!(!has_scope_changed(Some("openid profile"), None));
        assert!(!has_scope_changed(None, None));
        assert!(!has_scope_changed(Some("openid profile"), Some("profile  openid")));
        assert!(has_scope_changed(Some("openid"), Some("openid email")));
        assert!(has_scope_changed(None, Some("openid")));
    }

    #[test]
    fn test_needs_refresh_precedence() {
        let (creds, now) = creds_expiring_in(30, Some("openid"));

        assert_eq!(
            needs_refresh(&creds, Some("openid email"), 60, true, now),
            Some(RefreshReason::Forced)
        );
        assert_eq!(
            needs_refresh(&creds, Some("openid email"), 60, false, now),
            Some(RefreshReason::Expiring)
        );
        assert_eq!(
            needs_refresh(&creds, Some("openid email"), 0, false, now),
            Some(RefreshReason::ScopeChanged)
        );
        assert_eq!(needs_refresh(&creds, None, 0, false, now), None);
        assert_eq!(needs_refresh(&creds, Some("openid"), 10, false, now), None);
    }

    #[test]
    fn test_remaining_lifetime() {
        let now = Utc::now();
        assert_eq!(remaining_lifetime(now + Duration::seconds(90), now), 90);
        assert_eq!(remaining_lifetime(now - Duration::seconds(5), now), -5);
    }
}
