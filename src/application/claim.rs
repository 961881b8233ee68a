use super::cas::update_request;
use crate::domain::actor::UserId;
use crate::domain::ids::RequestId;
use crate::domain::ports::RequestStoreRef;
use crate::domain::request::{ClaimEligibility, RequestStatus, ServiceRequest};
use crate::error::{DispatchError, Result};
use chrono::Utc;

/// Outcome of a provider's attempt to take a request.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimResult {
    Success(ServiceRequest),
    /// Another provider won the race.
    AlreadyClaimed,
    NotFound,
    /// Cancelled, or direct-targeted at a different provider.
    InvalidState,
}

impl ClaimResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ClaimResult::Success(_))
    }

    /// Folds the outcome into the error taxonomy for callers that prefer `?`.
    pub fn into_result(self, request_id: RequestId, provider: UserId) -> Result<ServiceRequest> {
        match self {
            ClaimResult::Success(request) => Ok(request),
            ClaimResult::AlreadyClaimed => Err(DispatchError::AlreadyClaimed),
            ClaimResult::NotFound => Err(DispatchError::not_found("request", request_id)),
            ClaimResult::InvalidState => Err(DispatchError::InvalidTransition {
                from: RequestStatus::Pending,
                to: RequestStatus::Assigned,
                actor: provider,
            }),
        }
    }
}

/// Resolves concurrent acceptances: the first conditional write that still
/// sees the request open wins; everyone after sees it taken.
#[derive(Clone)]
pub struct ClaimCoordinator {
    requests: RequestStoreRef,
}

impl ClaimCoordinator {
    pub fn new(requests: RequestStoreRef) -> Self {
        Self { requests }
    }

    pub async fn claim(&self, request_id: RequestId, provider: UserId) -> Result<ClaimResult> {
        let now = Utc::now();
        let attempt = update_request(self.requests.as_ref(), request_id, |request| {
            match request.claim_eligibility(provider) {
                ClaimEligibility::Open => {
                    request.assign(provider, now);
                    Ok(())
                }
                ClaimEligibility::AlreadyClaimed => Err(DispatchError::AlreadyClaimed),
                ClaimEligibility::InvalidState => Err(DispatchError::InvalidTransition {
                    from: request.status,
                    to: RequestStatus::Assigned,
                    actor: provider,
                }),
            }
        })
        .await;

        match attempt {
            Ok((request, ())) => {
                tracing::info!(%request_id, %provider, "Request claimed");
                Ok(ClaimResult::Success(request))
            }
            Err(DispatchError::AlreadyClaimed) => {
                tracing::debug!(%request_id, %provider, "Claim lost to another provider");
                Ok(ClaimResult::AlreadyClaimed)
            }
            Err(DispatchError::InvalidTransition { from, .. }) => {
                tracing::debug!(%request_id, %provider, status = %from, "Request not claimable by provider");
                Ok(ClaimResult::InvalidState)
            }
            Err(DispatchError::NotFound { .. }) => Ok(ClaimResult::NotFound),
            Err(e) => Err(e),
        }
    }
}
