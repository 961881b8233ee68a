use super::actor::UserId;
use crate::error::DispatchError;
use serde::{Deserialize, Serialize};

/// Mean Earth radius used for great-circle distances.
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Result<Self, DispatchError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(DispatchError::ValidationError(format!(
                "Latitude out of range: {lat}"
            )));
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(DispatchError::ValidationError(format!(
                "Longitude out of range: {lng}"
            )));
        }
        Ok(Self { lat, lng })
    }

    /// Haversine distance in kilometres.
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let d_lat = lat2 - lat1;
        let d_lng = (other.lng - self.lng).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_KM * c
    }
}

/// Current position and dispatch eligibility of one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderPosition {
    pub provider_id: UserId,
    pub location: GeoPoint,
    /// Provider has toggled themselves as accepting work.
    pub available: bool,
    /// Account is verified and not suspended.
    pub active: bool,
    /// Running average of review stars, 0.0 when unrated.
    pub rating: f64,
}

impl ProviderPosition {
    pub fn is_eligible(&self) -> bool {
        self.available && self.active
    }
}
