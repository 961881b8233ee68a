use crate::error::{DispatchError, Result};

pub const DEFAULT_RADIUS_KM: f64 = 10.0;
pub const DEFAULT_MAX_RADIUS_KM: f64 = 50.0;
pub const DEFAULT_CANDIDATE_LIMIT: usize = 20;
pub const DEFAULT_CURRENCY: &str = "INR";

/// Tunables for dispatch and settlement.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Radius used when a request does not name its own.
    pub default_radius_km: f64,
    /// Upper bound on any request's broadcast radius.
    pub max_radius_km: f64,
    /// Maximum providers offered a single broadcast.
    pub candidate_limit: usize,
    /// ISO currency code sent to the payment gateway.
    pub currency: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_radius_km: DEFAULT_RADIUS_KM,
            max_radius_km: DEFAULT_MAX_RADIUS_KM,
            candidate_limit: DEFAULT_CANDIDATE_LIMIT,
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn new(
        default_radius_km: f64,
        max_radius_km: f64,
        candidate_limit: usize,
        currency: impl Into<String>,
    ) -> Result<Self> {
        let config = Self {
            default_radius_km,
            max_radius_km,
            candidate_limit,
            currency: currency.into(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.default_radius_km.is_finite() && self.default_radius_km > 0.0) {
            return Err(DispatchError::ValidationError(
                "Default radius must be positive".to_string(),
            ));
        }
        if !(self.max_radius_km.is_finite() && self.max_radius_km >= self.default_radius_km) {
            return Err(DispatchError::ValidationError(
                "Max radius must be at least the default radius".to_string(),
            ));
        }
        if self.candidate_limit == 0 {
            return Err(DispatchError::ValidationError(
                "Candidate limit must be at least 1".to_string(),
            ));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(DispatchError::ValidationError(format!(
                "Currency must be a 3-letter ISO code, got {:?}",
                self.currency
            )));
        }
        Ok(())
    }

    /// Resolves a request's radius against the configured default and cap.
    pub fn resolve_radius(&self, requested: Option<f64>) -> Result<f64> {
        match requested {
            None => Ok(self.default_radius_km),
            Some(km) if km.is_finite() && km > 0.0 && km <= self.max_radius_km => Ok(km),
            Some(km) => Err(DispatchError::ValidationError(format!(
                "Broadcast radius must be in (0, {}] km, got {km}",
                self.max_radius_km
            ))),
        }
    }
}
