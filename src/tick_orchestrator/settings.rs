//! Runtime-mutable engine settings

use crate::error::{Error, Result};
use crate::frame_classifier::ClassifierThresholds;
use serde::{Deserialize, Serialize};

/// Upper bound for every seconds-valued setting (ten years)
pub const MAX_WINDOW_SECS: i64 = 10 * 365 * 24 * 60 * 60;

fn check_secs(name: &str, value: i64, min: i64) -> Result<()> {
    if (min..=MAX_WINDOW_SECS).contains(&value) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "{} must be within {}..={}",
            name, min, MAX_WINDOW_SECS
        )))
    }
}

/// Settings read at the start of every tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    pub overstay_threshold_secs: i64,
    pub hourly_rate: f64,
    pub assign_threshold: f64,
    pub fill_threshold: f64,
    pub alert_cooldown_secs: i64,
    pub reservation_window_secs: i64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let thresholds = ClassifierThresholds::default();
        Self {
            overstay_threshold_secs: 180,
            hourly_rate: 5.0,
            assign_threshold: thresholds.assign,
            fill_threshold: thresholds.fill,
            alert_cooldown_secs: 60,
            reservation_window_secs: 900,
        }
    }
}

impl EngineSettings {
    pub fn thresholds(&self) -> ClassifierThresholds {
        ClassifierThresholds {
            assign: self.assign_threshold,
            fill: self.fill_threshold,
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_secs("overstay_threshold_secs", self.overstay_threshold_secs, 0)?;
        if !self.hourly_rate.is_finite() || self.hourly_rate < 0.0 {
            return Err(Error::Validation("hourly_rate must be >= 0".to_string()));
        }
        for (name, value) in [
            ("assign_threshold", self.assign_threshold),
            ("fill_threshold", self.fill_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Validation(format!("{} must be within 0..=1", name)));
            }
        }
        check_secs("alert_cooldown_secs", self.alert_cooldown_secs, 0)?;
        check_secs("reservation_window_secs", self.reservation_window_secs, 1)?;
        Ok(())
    }

    /// Copy of these settings with the update applied, validated
    pub fn apply(&self, update: &SettingsUpdate) -> Result<Self> {
        let mut next = self.clone();
        if let Some(v) = update.overstay_threshold_secs {
            next.overstay_threshold_secs = v;
        }
        if let Some(v) = update.hourly_rate {
            next.hourly_rate = v;
        }
        if let Some(v) = update.assign_threshold {
            next.assign_threshold = v;
        }
        if let Some(v) = update.fill_threshold {
            next.fill_threshold = v;
        }
        if let Some(v) = update.alert_cooldown_secs {
            next.alert_cooldown_secs = v;
        }
        if let Some(v) = update.reservation_window_secs {
            next.reservation_window_secs = v;
        }
        next.validate()?;
        Ok(next)
    }
}

/// Partial settings update (PUT /api/settings)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub overstay_threshold_secs: Option<i64>,
    pub hourly_rate: Option<f64>,
    pub assign_threshold: Option<f64>,
    pub fill_threshold: Option<f64>,
    pub alert_cooldown_secs: Option<i64>,
    pub reservation_window_secs: Option<i64>,
}
