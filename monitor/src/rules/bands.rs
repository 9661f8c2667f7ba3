use serde::{Deserialize, Serialize};

use super::Severity;
use crate::error::EngineError;

/// Lower-inclusive severity thresholds for a ratio metric.
///
/// `[medium, high)` is Medium, `[high, critical)` is High and
/// `[critical, ∞)` is Critical. Without a critical band High is the ceiling.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeverityBands {
    pub medium: f64,
    pub high: f64,
    #[serde(default)]
    pub critical: Option<f64>,
}

impl SeverityBands {
    pub const fn new(medium: f64, high: f64, critical: Option<f64>) -> Self {
        Self {
            medium,
            high,
            critical,
        }
    }

    /// Returns the band `value` falls into and the threshold it crossed.
    pub fn classify(&self, value: f64) -> Option<(Severity, f64)> {
        if !value.is_finite() {
            return None;
        }

        if let Some(critical) = self.critical {
            if value >= critical {
                return Some((Severity::Critical, critical));
            }
        }
        if value >= self.high {
            return Some((Severity::High, self.high));
        }
        if value >= self.medium {
            return Some((Severity::Medium, self.medium));
        }
        None
    }

    pub fn validate(&self, name: &str) -> Result<(), EngineError> {
        let positive = |label: &str, v: f64| {
            if !v.is_finite() || v <= 0.0 {
                return Err(EngineError::config(format!(
                    "{name}.{label} must be a positive finite number, got {v}"
                )));
            }
            Ok(())
        };

        positive("medium", self.medium)?;
        positive("high", self.high)?;
        if self.medium >= self.high {
            return Err(EngineError::config(format!(
                "{name}: medium ({}) must be below high ({})",
                self.medium, self.high
            )));
        }

        if let Some(critical) = self.critical {
            positive("critical", critical)?;
            if self.high >= critical {
                return Err(EngineError::config(format!(
                    "{name}: high ({}) must be below critical ({critical})",
                    self.high
                )));
            }
        }
        Ok(())
    }
}
