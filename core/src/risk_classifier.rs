//! Risk classifier — pure mapping from a forecast to a risk level and an
//! alert flag.
//!
//! The level comes from the point forecast. The flag comes from the upper
//! confidence bound against its own, higher threshold, so a low point
//! forecast with a wide upper bound can still be flagged.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;

pub const HIGH_THRESHOLD: f64 = 1.0;
pub const MEDIUM_THRESHOLD: f64 = 0.5;
pub const LOW_MODERATE_THRESHOLD: f64 = 0.2;
/// Upper bound at or above which a forecast is flagged.
pub const FLAG_UPPER_BOUND: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "Very Low")]
    VeryLow,
    #[serde(rename = "Low-Moderate")]
    LowModerate,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::VeryLow     => "Very Low",
            RiskLevel::LowModerate => "Low-Moderate",
            RiskLevel::Medium      => "Medium",
            RiskLevel::High        => "High",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Very Low"     => Ok(RiskLevel::VeryLow),
            "Low-Moderate" => Ok(RiskLevel::LowModerate),
            "Medium"       => Ok(RiskLevel::Medium),
            "High"         => Ok(RiskLevel::High),
            other => Err(PipelineError::UnknownRiskLevel { value: other.to_string() }),
        }
    }
}

/// Forecast values after clamping. Always satisfies
/// `0 <= lower <= predicted <= upper`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClampedForecast {
    pub predicted: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Published forecasts never show negative counts. Predicted and lower are
/// raised to zero; the bounds are then widened to bracket the prediction.
pub fn clamp(predicted: f64, lower: f64, upper: f64) -> ClampedForecast {
    let predicted = predicted.max(0.0);
    let lower = lower.max(0.0).min(predicted);
    let upper = upper.max(predicted);
    ClampedForecast {
        predicted,
        lower,
        upper,
    }
}

pub fn risk_level(predicted: f64) -> RiskLevel {
    if predicted >= HIGH_THRESHOLD {
        RiskLevel::High
    } else if predicted >= MEDIUM_THRESHOLD {
        RiskLevel::Medium
    } else if predicted >= LOW_MODERATE_THRESHOLD {
        RiskLevel::LowModerate
    } else {
        RiskLevel::VeryLow
    }
}

pub fn risk_flag(upper_bound: f64) -> bool {
    upper_bound >= FLAG_UPPER_BOUND
}

/// `risk(predictedValue, upperBound) -> (riskLevel, riskFlag)`.
/// Callers pass clamped values.
pub fn risk(predicted: f64, upper_bound: f64) -> (RiskLevel, bool) {
    (risk_level(predicted), risk_flag(upper_bound))
}
