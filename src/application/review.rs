use crate::domain::actor::Actor;
use crate::domain::ids::RequestId;
use crate::domain::ports::{ProviderDirectoryRef, RequestStoreRef, ReviewStoreRef};
use crate::domain::request::RequestStatus;
use crate::domain::review::{Review, Stars};
use crate::error::{DispatchError, Result};
use chrono::Utc;

#[derive(Clone)]
pub struct ReviewService {
    requests: RequestStoreRef,
    reviews: ReviewStoreRef,
    providers: ProviderDirectoryRef,
}

impl ReviewService {
    pub fn new(
        requests: RequestStoreRef,
        reviews: ReviewStoreRef,
        providers: ProviderDirectoryRef,
    ) -> Self {
        Self {
            requests,
            reviews,
            providers,
        }
    }

    /// Stores the customer's review of a completed request and feeds the
    /// stars into the provider's rating. One review per request.
    pub async fn submit(
        &self,
        request_id: RequestId,
        actor: &Actor,
        stars: Stars,
        comment: &str,
    ) -> Result<Review> {
        let request = self
            .requests
            .get(request_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("request", request_id))?;

        if actor.id != request.customer_id {
            return Err(DispatchError::Unauthorized(format!(
                "Only the customer may review request {request_id}"
            )));
        }
        if request.status != RequestStatus::Completed {
            return Err(DispatchError::ValidationError(format!(
                "Request {} is {}; only completed requests can be reviewed",
                request_id, request.status
            )));
        }
        let provider_id = request.provider_id.ok_or_else(|| {
            DispatchError::Invariant(format!("completed request {request_id} has no provider"))
        })?;

        let review = Review {
            request_id,
            customer_id: request.customer_id,
            provider_id,
            stars,
            comment: comment.trim().to_string(),
            created_at: Utc::now(),
            admin_response: None,
            responded_at: None,
        };
        if !self.reviews.insert_if_absent(review.clone()).await? {
            return Err(DispatchError::ReviewExists(request_id.to_string()));
        }

        if let Err(e) = self.providers.record_rating(provider_id, stars).await {
            tracing::warn!(%request_id, %provider_id, error = %e, "Could not update provider rating");
        }
        tracing::info!(%request_id, %provider_id, stars = stars.value(), "Review submitted");
        Ok(review)
    }

    pub async fn respond(
        &self,
        request_id: RequestId,
        actor: &Actor,
        response: &str,
    ) -> Result<Review> {
        if !actor.is_admin() {
            return Err(DispatchError::Unauthorized(format!(
                "Only an admin may respond to the review of request {request_id}"
            )));
        }
        self.reviews
            .respond(request_id, response.to_string(), Utc::now())
            .await?
            .ok_or_else(|| DispatchError::not_found("review", request_id))
    }

    pub async fn get(&self, request_id: RequestId) -> Result<Option<Review>> {
        self.reviews.get(request_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::actor::UserId;
    use crate::domain::geo::{GeoPoint, ProviderPosition};
    use crate::domain::ports::{ProviderDirectory, RequestStore};
    use crate::domain::request::{IssueCategory, RequestDetails, ServiceRequest};
    use crate::infrastructure::in_memory::{
        InMemoryDirectory, InMemoryRequestStore, InMemoryReviewStore,
    };
    use std::sync::Arc;

    async fn setup(status: RequestStatus) -> (ReviewService, Arc<InMemoryDirectory>, RequestId) {
        let requests = Arc::new(InMemoryRequestStore::new());
        let location = GeoPoint::new(26.91, 75.78).unwrap();
        let details = RequestDetails::new(IssueCategory::FlatTyre, location, "MI Road");
        let mut request =
            ServiceRequest::new(RequestId::new(), UserId(1), details, 10.0, Utc::now());
        request.assign(UserId(10), Utc::now());
        request.status = status;
        let id = request.id;
        requests.insert(request).await.unwrap();

        let directory = Arc::new(InMemoryDirectory::new());
        directory
            .upsert_provider(ProviderPosition {
                provider_id: UserId(10),
                location,
                available: true,
                active: true,
                rating: 0.0,
            })
            .await;

        let service = ReviewService::new(
            requests,
            Arc::new(InMemoryReviewStore::new()),
            directory.clone(),
        );
        (service, directory, id)
    }

    #[tokio::test]
    async fn test_review_once_and_feeds_rating() {
        let (reviews, directory, id) = setup(RequestStatus::Completed).await;
        let customer = Actor::customer(1);

        let review = reviews
            .submit(id, &customer, Stars::new(4).unwrap(), " quick and polite ")
            .await
            .unwrap();
        assert_eq!(review.comment, "quick and polite");

        assert!(matches!(
            reviews.submit(id, &customer, Stars::new(5).unwrap(), "").await,
            Err(DispatchError::ReviewExists(_))
        ));

        let positions = directory.positions().await.unwrap();
        assert_eq!(positions[0].rating, 4.0);
    }

    #[tokio::test]
    async fn test_review_requires_completed_and_customer() {
        let (reviews, _, id) = setup(RequestStatus::InProgress).await;
        assert!(matches!(
            reviews
                .submit(id, &Actor::customer(1), Stars::new(3).unwrap(), "")
                .await,
            Err(DispatchError::ValidationError(_))
        ));

        let (reviews, _, id) = setup(RequestStatus::Completed).await;
        assert!(matches!(
            reviews
                .submit(id, &Actor::provider(10), Stars::new(5).unwrap(), "")
                .await,
            Err(DispatchError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_admin_response() {
        let (reviews, _, id) = setup(RequestStatus::Completed).await;
        assert!(matches!(
            reviews.respond(id, &Actor::admin(900), "thanks").await,
            Err(DispatchError::NotFound { .. })
        ));

        reviews
            .submit(id, &Actor::customer(1), Stars::new(2).unwrap(), "late")
            .await
            .unwrap();
        assert!(matches!(
            reviews.respond(id, &Actor::customer(1), "hm").await,
            Err(DispatchError::Unauthorized(_))
        ));

        let answered = reviews
            .respond(id, &Actor::admin(900), "We have spoken to the provider")
            .await
            .unwrap();
        assert_eq!(
            answered.admin_response.as_deref(),
            Some("We have spoken to the provider")
        );
        assert!(reviews.respond(id, &Actor::admin(900), "again").await.is_err());
    }
}
