use crate::domain::actor::UserId;
use crate::domain::geo::{GeoPoint, ProviderPosition};
use crate::domain::ports::ProviderDirectoryRef;
use crate::error::Result;

/// A provider in range of a request, with the figures it was ranked by.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub provider_id: UserId,
    pub distance_km: f64,
    pub rating: f64,
}

/// Finds eligible providers around a point. Read-only: it never changes
/// provider or request state.
#[derive(Clone)]
pub struct CandidateFinder {
    providers: ProviderDirectoryRef,
}

impl CandidateFinder {
    pub fn new(providers: ProviderDirectoryRef) -> Self {
        Self { providers }
    }

    /// Eligible providers within `radius_km`, nearest first, ties broken by
    /// rating. An empty list means nobody is available, not a failure.
    pub async fn find_candidates(
        &self,
        location: &GeoPoint,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<UserId>> {
        Ok(self
            .rank(location, radius_km, limit, &[])
            .await?
            .into_iter()
            .map(|c| c.provider_id)
            .collect())
    }

    pub async fn rank(
        &self,
        location: &GeoPoint,
        radius_km: f64,
        limit: usize,
        exclude: &[UserId],
    ) -> Result<Vec<Candidate>> {
        let positions = self.providers.positions().await?;
        Ok(rank_positions(&positions, location, radius_km, limit, exclude))
    }
}

pub fn rank_positions(
    positions: &[ProviderPosition],
    location: &GeoPoint,
    radius_km: f64,
    limit: usize,
    exclude: &[UserId],
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = positions
        .iter()
        .filter(|p| p.is_eligible() && !exclude.contains(&p.provider_id))
        .map(|p| Candidate {
            provider_id: p.provider_id,
            distance_km: location.distance_km(&p.location),
            rating: p.rating,
        })
        .filter(|c| c.distance_km <= radius_km)
        .collect();

    candidates.sort_by(|a, b| {
        a.distance_km
            .total_cmp(&b.distance_km)
            .then_with(|| b.rating.total_cmp(&a.rating))
            .then_with(|| a.provider_id.cmp(&b.provider_id))
    });
    candidates.truncate(limit);
    candidates
}
