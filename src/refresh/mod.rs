//! Refresh policy engine
//!
//! Decides when an expensive discovery pass has to run again and keeps the
//! resulting identifier set alongside its refresh timestamp.

mod ids;

pub use ids::{read_id_file, resolve_ids, write_id_file, IdSetOptions, IdSource, ResolvedIds};

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// How often a discovery aggregate is re-enumerated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshPolicy {
    Never,
    Daily,
    #[default]
    Weekly,
    Monthly,
    Always,
}

impl RefreshPolicy {
    /// Minimum age of the last refresh before another is due
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Self::Never | Self::Always => None,
            Self::Daily => Some(Duration::hours(24)),
            Self::Weekly => Some(Duration::days(7)),
            Self::Monthly => Some(Duration::days(30)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Always => "always",
        }
    }
}

impl fmt::Display for RefreshPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefreshPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "never" => Ok(Self::Never),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "always" => Ok(Self::Always),
            other => Err(format!("unknown refresh policy '{}'", other)),
        }
    }
}

/// Whether discovery must run again
///
/// A missing `last_refresh_at` always refreshes, whatever the policy.
pub fn needs_refresh(
    policy: RefreshPolicy,
    last_refresh_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    let Some(last) = last_refresh_at else {
        return true;
    };

    match policy {
        RefreshPolicy::Always => true,
        RefreshPolicy::Never => false,
        _ => policy
            .interval()
            .is_some_and(|interval| now - last >= interval),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daily_boundary() {
        let now = Utc::now();
        let just_inside = now - (Duration::hours(23) + Duration::minutes(59));
        let just_outside = now - (Duration::hours(24) + Duration::minutes(1));

        assert!(!needs_refresh(RefreshPolicy::Daily, Some(just_inside), now));
        assert!(needs_refresh(RefreshPolicy::Daily, Some(just_outside), now));
    }

    #[test]
    fn test_never_refreshes_only_first_time() {
        let now = Utc::now();
        assert!(!needs_refresh(
            RefreshPolicy::Never,
            Some(now - Duration::days(365)),
            now
        ));
        assert!(needs_refresh(RefreshPolicy::Never, None, now));
    }

    #[test]
    fn test_always_and_first_run() {
        let now = Utc::now();
        assert!(needs_refresh(RefreshPolicy::Always, Some(now), now));
        for policy in [
            RefreshPolicy::Daily,
            RefreshPolicy::Weekly,
            RefreshPolicy::Monthly,
        ] {
            assert!(needs_refresh(policy, None, now));
            assert!(!needs_refresh(policy, Some(now), now));
        }
    }

    #[test]
    fn test_weekly_and_monthly_thresholds() {
        let now = Utc::now();
        assert!(needs_refresh(
            RefreshPolicy::Weekly,
            Some(now - Duration::days(7)),
            now
        ));
        assert!(!needs_refresh(
            RefreshPolicy::Monthly,
            Some(now - Duration::days(29)),
            now
        ));
        assert!(needs_refresh(
            RefreshPolicy::Monthly,
            Some(now - Duration::days(30)),
            now
        ));
    }

    #[test]
    fn test_parse_policy() {
        assert_eq!("Daily".parse::<RefreshPolicy>(), Ok(RefreshPolicy::Daily));
        assert!("hourly".parse::<RefreshPolicy>().is_err());
        assert_eq!(RefreshPolicy::default(), RefreshPolicy::Weekly);
    }
}
