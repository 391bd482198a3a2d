//! Age-based suspicious-account classifier.

use chrono::{DateTime, Utc};

use crate::{config::DEFAULT_SUSPICIOUS_AGE_DAYS, notify::Urgency};

const MS_PER_DAY: f64 = 86_400_000.0;

/// Account age in (fractional) days. Clock skew that puts creation in the future yields 0.
pub fn account_age_days(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let ms = now.signed_duration_since(created_at).num_milliseconds();
    (ms.max(0) as f64) / MS_PER_DAY
}

/// Suspicious when strictly younger than the threshold.
pub fn is_suspicious(age_days: f64, threshold_days: f64) -> bool {
    age_days < threshold_days
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RiskAssessment {
    pub age_days: f64,
    pub suspicious: bool,
}

impl RiskAssessment {
    pub fn urgency(&self) -> Urgency {
        if self.suspicious {
            Urgency::Urgent
        } else {
            Urgency::Normal
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RiskClassifier {
    threshold_days: f64,
}

impl Default for RiskClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_SUSPICIOUS_AGE_DAYS)
    }
}

impl RiskClassifier {
    pub fn new(threshold_days: f64) -> Self {
        Self { threshold_days }
    }

    pub fn assess(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> RiskAssessment {
        let age_days = account_age_days(created_at, now);
        RiskAssessment {
            age_days,
            suspicious: is_suspicious(age_days, self.threshold_days),
        }
    }
}
