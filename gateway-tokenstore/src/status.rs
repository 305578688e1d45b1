//! Shared "compute status from timestamps" logic (§4.1: "`status` is
//! computed from `revoked_at`/`expires_at` at fetch time, not stored").

use chrono::{DateTime, Utc};
use gateway_core::TokenStatus;

pub fn compute_status(revoked_at: Option<DateTime<Utc>>, expires_at: Option<DateTime<Utc>>) -> TokenStatus {
    if revoked_at.is_some() {
        return TokenStatus::Revoked;
    }
    if let Some(expiry) = expires_at {
        if expiry <= Utc::now() {
            return TokenStatus::Expired;
        }
    }
    TokenStatus::Active
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn no_timestamps_is_active() {
        assert_eq!(compute_status(None, None), TokenStatus::Active);
    }

    #[test]
    fn revoked_wins_over_expiry() {
        let future = Utc::now() + ChronoDuration::hours(1);
        assert_eq!(compute_status(Some(Utc::now()), Some(future)), TokenStatus::Revoked);
    }

    #[test]
    fn past_expiry_is_expired() {
        let past = Utc::now() - ChronoDuration::hours(1);
        assert_eq!(compute_status(None, Some(past)), TokenStatus::Expired);
    }

    #[test]
    fn future_expiry_is_active() {
        let future = Utc::now() + ChronoDuration::hours(1);
        assert_eq!(compute_status(None, Some(future)), TokenStatus::Active);
    }
}
