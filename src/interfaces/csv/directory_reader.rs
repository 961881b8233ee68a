use crate::domain::actor::{Role, UserId};
use crate::domain::geo::{GeoPoint, ProviderPosition};
use crate::error::{DispatchError, Result};
use crate::infrastructure::in_memory::InMemoryDirectory;
use serde::Deserialize;
use std::io::Read;

/// A row of `user,role,lat,lng,available,rating`. Position columns only
/// apply to providers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DirectoryEntry {
    pub user: u32,
    pub role: Role,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub available: Option<bool>,
    pub rating: Option<f64>,
}

impl DirectoryEntry {
    /// The provider's position, or `None` for customers and admins.
    pub fn position(&self) -> Result<Option<ProviderPosition>> {
        if self.role != Role::Provider {
            return Ok(None);
        }
        let (Some(lat), Some(lng)) = (self.lat, self.lng) else {
            return Err(DispatchError::ValidationError(format!(
                "Provider {} needs lat and lng",
                self.user
            )));
        };
        Ok(Some(ProviderPosition {
            provider_id: UserId(self.user),
            location: GeoPoint::new(lat, lng)?,
            available: self.available.unwrap_or(true),
            active: true,
            rating: self.rating.unwrap_or(0.0),
        }))
    }
}

/// Reads actors and provider positions from a CSV source.
pub struct DirectoryReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> DirectoryReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    pub fn entries(self) -> impl Iterator<Item = Result<DirectoryEntry>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(DispatchError::from))
    }

    /// Loads every row into `directory`. Bad rows are logged and skipped;
    /// returns how many were loaded.
    pub async fn load_into(self, directory: &InMemoryDirectory) -> usize {
        let mut loaded = 0;
        for entry in self.entries() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable directory row");
                    continue;
                }
            };
            match entry.position() {
                Ok(Some(position)) => directory.upsert_provider(position).await,
                Ok(None) => directory.register(UserId(entry.user), entry.role).await,
                Err(e) => {
                    tracing::warn!(user = entry.user, error = %e, "Skipping directory row");
                    continue;
                }
            }
            loaded += 1;
        }
        loaded
    }
}
