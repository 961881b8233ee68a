use super::cas::update_request;
use crate::domain::actor::{Actor, UserId};
use crate::domain::ids::RequestId;
use crate::domain::money::Amount;
use crate::domain::ports::RequestStoreRef;
use crate::domain::request::{LifecycleEvent, RequestStatus, ServiceRequest};
use crate::error::{DispatchError, Result};
use chrono::Utc;

/// A transition that was applied, with the edge it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub request: ServiceRequest,
    pub from: RequestStatus,
    pub to: RequestStatus,
    /// Provider bound before the transition; reject and cancel clear it.
    pub previous_provider: Option<UserId>,
}

/// Applies post-claim changes to a request. Every write is a conditional
/// update re-validated against the record it replaces.
#[derive(Clone)]
pub struct LifecycleService {
    requests: RequestStoreRef,
}

impl LifecycleService {
    pub fn new(requests: RequestStoreRef) -> Self {
        Self { requests }
    }

    pub async fn transition(
        &self,
        request_id: RequestId,
        actor: &Actor,
        event: &LifecycleEvent,
    ) -> Result<Transition> {
        let now = Utc::now();
        let (request, (from, to, previous_provider)) =
            update_request(self.requests.as_ref(), request_id, |request| {
                let from = request.status;
                let previous_provider = request.provider_id;
                let to = request.apply(actor, event, now)?;
                Ok((from, to, previous_provider))
            })
            .await?;

        tracing::info!(
            %request_id,
            actor = %actor.id,
            event = event.name(),
            %from,
            %to,
            "Request transitioned"
        );
        Ok(Transition {
            request,
            from,
            to,
            previous_provider,
        })
    }

    pub async fn set_quotation(
        &self,
        request_id: RequestId,
        actor: &Actor,
        amount: Amount,
    ) -> Result<ServiceRequest> {
        let (request, ()) = update_request(self.requests.as_ref(), request_id, |request| {
            request.set_quotation(actor, amount)
        })
        .await?;
        tracing::info!(%request_id, provider = %actor.id, %amount, "Quotation set");
        Ok(request)
    }

    /// Remembers who the latest broadcast went to. Only pending requests are
    /// broadcast.
    pub async fn record_broadcast(
        &self,
        request_id: RequestId,
        candidates: Vec<UserId>,
    ) -> Result<ServiceRequest> {
        let (request, ()) = update_request(self.requests.as_ref(), request_id, |request| {
            if request.status != RequestStatus::Pending {
                return Err(DispatchError::ValidationError(format!(
                    "Cannot broadcast request {} while it is {}",
                    request.id, request.status
                )));
            }
            request.candidates = candidates.clone();
            Ok(())
        })
        .await?;
        Ok(request)
    }

    /// Records the settled amount on a completed request that was closed on
    /// its quotation alone. A request that already has one keeps it.
    pub async fn fill_final_amount(
        &self,
        request_id: RequestId,
        amount: Amount,
    ) -> Result<ServiceRequest> {
        let (request, ()) = update_request(self.requests.as_ref(), request_id, |request| {
            if request.status != RequestStatus::Completed {
                return Err(DispatchError::Invariant(format!(
                    "Settled request {} is {}",
                    request.id, request.status
                )));
            }
            if request.final_amount.is_none() {
                request.final_amount = Some(amount);
            }
            Ok(())
        })
        .await?;
        Ok(request)
    }
}
