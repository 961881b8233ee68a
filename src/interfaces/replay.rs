//! Replays a CSV event script against a [`DispatchEngine`].
//!
//! Request labels in the script map to stable ids
//! ([`RequestId::from_label`]), so replaying against a persisted store picks
//! up where an earlier run left off.

use super::csv::event_reader::{ScriptEvent, ScriptOp};
use super::csv::request_writer::RequestRow;
use crate::application::claim::ClaimResult;
use crate::application::engine::DispatchEngine;
use crate::domain::actor::UserId;
use crate::domain::conversation::MessageKind;
use crate::domain::geo::GeoPoint;
use crate::domain::ids::{PaymentId, RequestId};
use crate::domain::money::Amount;
use crate::domain::payment::{GatewayCallback, PaymentStatus};
use crate::domain::request::{IssueCategory, LifecycleEvent, RequestDetails};
use crate::error::{DispatchError, Result};
use crate::infrastructure::gateway::HmacGateway;
use std::collections::HashMap;

pub struct ScriptRunner {
    engine: DispatchEngine,
    gateway: HmacGateway,
    /// Labels in order of first appearance.
    labels: Vec<String>,
    /// Last genuine callback delivered per request, for replays.
    callbacks: HashMap<RequestId, (PaymentId, GatewayCallback)>,
}

impl ScriptRunner {
    /// `gateway` must be the client the engine was built with, so that the
    /// callbacks it simulates carry valid signatures.
    pub fn new(engine: DispatchEngine, gateway: HmacGateway) -> Self {
        Self {
            engine,
            gateway,
            labels: Vec::new(),
            callbacks: HashMap::new(),
        }
    }

    pub fn engine(&self) -> &DispatchEngine {
        &self.engine
    }

    /// Applies one event. Failures are logged and returned; the caller
    /// decides whether to carry on.
    pub async fn apply(&mut self, event: &ScriptEvent) -> Result<()> {
        if !self.labels.contains(&event.request) {
            self.labels.push(event.request.clone());
        }
        let result = self.dispatch(event).await;
        if let Err(e) = &result {
            if e.is_expected() {
                tracing::debug!(op = ?event.op, request = %event.request, error = %e, "Expected outcome");
            } else {
                tracing::warn!(op = ?event.op, request = %event.request, error = %e, "Event failed");
            }
        }
        result
    }

    async fn dispatch(&mut self, event: &ScriptEvent) -> Result<()> {
        let request_id = RequestId::from_label(&event.request);
        match event.op {
            ScriptOp::Create => {
                let (Some(lat), Some(lng)) = (event.lat, event.lng) else {
                    return Err(event.missing("lat/lng"));
                };
                let issue: IssueCategory = event.issue.as_deref().unwrap_or_default().parse()?;
                let mut details =
                    RequestDetails::new(issue, GeoPoint::new(lat, lng)?, event.text());
                if let Some(target) = event.target {
                    details = details.targeting(UserId(target));
                }
                self.engine
                    .create_request_with_id(request_id, UserId(event.actor()?), details)
                    .await?;
            }
            ScriptOp::Broadcast => {
                self.engine.broadcast(request_id).await?;
            }
            ScriptOp::Claim => {
                let provider = UserId(event.actor()?);
                let result = self.engine.claim(request_id, provider).await?;
                if !matches!(result, ClaimResult::Success(_)) {
                    return result.into_result(request_id, provider).map(|_| ());
                }
            }
            ScriptOp::Quote => {
                let amount = event.amount.ok_or_else(|| event.missing("amount"))?;
                self.engine
                    .set_quotation(request_id, UserId(event.actor()?), Amount::new(amount)?)
                    .await?;
            }
            ScriptOp::Reject => self.transition(event, LifecycleEvent::Reject).await?,
            ScriptOp::Travel => self.transition(event, LifecycleEvent::StartTravel).await?,
            ScriptOp::Start => self.transition(event, LifecycleEvent::StartWork).await?,
            ScriptOp::Complete => {
                let final_amount = event.amount.map(Amount::new).transpose()?;
                self.transition(event, LifecycleEvent::Complete { final_amount })
                    .await?
            }
            ScriptOp::Cancel => {
                let reason = event.text().to_string();
                self.transition(event, LifecycleEvent::Cancel { reason })
                    .await?
            }
            ScriptOp::Pay => self.pay(request_id).await?,
            ScriptOp::Forge => {
                let order = self.engine.initiate_settlement(request_id).await?;
                let callback = GatewayCallback {
                    order_id: order.order_id,
                    gateway_payment_id: "pay_forged".to_string(),
                    signature: "00".repeat(32),
                };
                self.engine
                    .verify_settlement(order.payment_id, &callback)
                    .await?;
            }
            ScriptOp::Refund => {
                let payment = self
                    .engine
                    .settled_payment(request_id)
                    .await?
                    .ok_or_else(|| DispatchError::not_found("settled payment", request_id))?;
                self.engine.refund(payment.id, event.text()).await?;
            }
            ScriptOp::Message => {
                let conversation = self.engine.get_or_create_conversation(request_id).await?;
                self.engine
                    .post_message(
                        conversation.id,
                        UserId(event.actor()?),
                        event.text(),
                        MessageKind::Text,
                    )
                    .await?;
            }
            ScriptOp::Read => {
                let conversation = self.engine.get_or_create_conversation(request_id).await?;
                self.engine
                    .mark_read(conversation.id, UserId(event.actor()?))
                    .await?;
            }
            ScriptOp::Review => {
                let rating = event.rating.ok_or_else(|| event.missing("rating"))?;
                self.engine
                    .submit_review(request_id, UserId(event.actor()?), rating, event.text())
                    .await?;
            }
            ScriptOp::Respond => {
                self.engine
                    .respond_to_review(request_id, UserId(event.actor()?), event.text())
                    .await?;
            }
        }
        Ok(())
    }

    async fn transition(&self, event: &ScriptEvent, lifecycle: LifecycleEvent) -> Result<()> {
        let request_id = RequestId::from_label(&event.request);
        self.engine
            .transition(request_id, UserId(event.actor()?), lifecycle)
            .await?;
        Ok(())
    }

    /// Pays the open settlement with a genuine callback. On a request that
    /// is already settled, the earlier callback is delivered again.
    async fn pay(&mut self, request_id: RequestId) -> Result<()> {
        if self.engine.settled_payment(request_id).await?.is_some()
            && let Some((payment_id, callback)) = self.callbacks.get(&request_id)
        {
            self.engine.verify_settlement(*payment_id, callback).await?;
            return Ok(());
        }

        let order = self.engine.initiate_settlement(request_id).await?;
        let callback = self.gateway.simulate_callback(&order.order_id)?;
        self.engine
            .verify_settlement(order.payment_id, &callback)
            .await?;
        self.callbacks
            .insert(request_id, (order.payment_id, callback));
        Ok(())
    }

    /// Final state of every scripted request, in script order. Labels whose
    /// request was never created are left out.
    pub async fn rows(&self) -> Result<Vec<RequestRow>> {
        let mut rows = Vec::with_capacity(self.labels.len());
        for label in &self.labels {
            let request_id = RequestId::from_label(label);
            let request = match self.engine.request(request_id).await {
                Ok(request) => request,
                Err(DispatchError::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            };
            let payment = match self.engine.settled_payment(request_id).await? {
                Some(settled) => Some(settled.status),
                None => {
                    let attempts = self.engine.payments_for_request(request_id).await?;
                    attempts
                        .iter()
                        .find(|p| p.status == PaymentStatus::Refunded)
                        .or(attempts.last())
                        .map(|p| p.status)
                }
            };
            rows.push(RequestRow::new(label, &request, payment));
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::engine::{Collaborators, Stores};
    use crate::config::EngineConfig;
    use crate::domain::actor::Role;
    use crate::domain::geo::ProviderPosition;
    use crate::domain::request::RequestStatus;
    use crate::infrastructure::in_memory::InMemoryDirectory;
    use crate::interfaces::csv::event_reader::EventReader;
    use std::sync::Arc;

    async fn runner() -> ScriptRunner {
        let directory = Arc::new(InMemoryDirectory::new());
        directory.register(UserId(1), Role::Customer).await;
        directory
            .upsert_provider(ProviderPosition {
                provider_id: UserId(10),
                location: GeoPoint::new(12.98, 77.59).unwrap(),
                available: true,
                active: true,
                rating: 4.0,
            })
            .await;
        let gateway = HmacGateway::new("replay").unwrap();
        let engine = DispatchEngine::new(
            EngineConfig::default(),
            Stores::in_memory(),
            Collaborators {
                identity: directory.clone(),
                providers: directory,
                gateway: Arc::new(gateway.clone()),
            },
        )
        .unwrap();
        ScriptRunner::new(engine, gateway)
    }

    #[tokio::test]
    async fn test_script_runs_to_settlement_and_replay_is_duplicate() {
        let script = "op,request,actor,target,lat,lng,amount,rating,text\n\
                      create,r1,1,,12.97,77.59,,,MG Road\n\
                      broadcast,r1,,,,,,,\n\
                      claim,r1,10,,,,,,\n\
                      travel,r1,10,,,,,,\n\
                      start,r1,10,,,,,,\n\
                      complete,r1,10,,,,700,,\n\
                      pay,r1,,,,,,,\n\
                      pay,r1,,,,,,,";
        let mut runner = runner().await;
        let mut outcomes = Vec::new();
        for event in EventReader::new(script.as_bytes()).events() {
            outcomes.push(runner.apply(&event.unwrap()).await);
        }

        assert!(outcomes[..7].iter().all(|o| o.is_ok()));
        assert!(matches!(
            outcomes[7],
            Err(DispatchError::DuplicateSettlement { .. })
        ));

        let rows = runner.rows().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, RequestStatus::Completed);
        assert_eq!(rows[0].provider, Some(10));
        assert_eq!(rows[0].final_amount.as_deref(), Some("700"));
        assert_eq!(rows[0].payment, Some(PaymentStatus::Success));
    }
}
