use super::candidates::CandidateFinder;
use super::claim::{ClaimCoordinator, ClaimResult};
use super::conversation::ConversationBinder;
use super::lifecycle::LifecycleService;
use super::review::ReviewService;
use super::settlement::SettlementCoordinator;
use crate::config::EngineConfig;
use crate::domain::actor::{Actor, Role, UserId};
use crate::domain::conversation::{Conversation, Message, MessageKind};
use crate::domain::event::{DispatchEvent, EventKind};
use crate::domain::ids::{ConversationId, PaymentId, RequestId};
use crate::domain::money::Amount;
use crate::domain::payment::{GatewayCallback, Payment, SettlementOrder};
use crate::domain::ports::{
    ConversationStoreRef, IdentityProviderRef, PaymentGatewayRef, PaymentStoreRef,
    ProviderDirectoryRef, RequestStoreRef, ReviewStoreRef,
};
use crate::domain::request::{LifecycleEvent, RequestDetails, ServiceRequest};
use crate::domain::review::{Review, Stars};
use crate::domain::view::RequestView;
use crate::error::{DispatchError, Result};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::in_memory::{
    InMemoryConversationStore, InMemoryPaymentStore, InMemoryRequestStore, InMemoryReviewStore,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;

/// The durable records the engine owns.
#[derive(Clone)]
pub struct Stores {
    pub requests: RequestStoreRef,
    pub conversations: ConversationStoreRef,
    pub payments: PaymentStoreRef,
    pub reviews: ReviewStoreRef,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            requests: Arc::new(InMemoryRequestStore::new()),
            conversations: Arc::new(InMemoryConversationStore::new()),
            payments: Arc::new(InMemoryPaymentStore::new()),
            reviews: Arc::new(InMemoryReviewStore::new()),
        }
    }
}

/// Services the engine consumes but does not own.
#[derive(Clone)]
pub struct Collaborators {
    pub identity: IdentityProviderRef,
    pub providers: ProviderDirectoryRef,
    pub gateway: PaymentGatewayRef,
}

/// The main entry point for dispatch.
///
/// `DispatchEngine` exposes one method per external operation. Each call is
/// an independent unit of work against the shared stores; the only state the
/// engine itself holds is configuration and the event bus. Callers are
/// identified by user id and resolved to an [`Actor`] through the identity
/// collaborator on every call.
pub struct DispatchEngine {
    config: EngineConfig,
    requests: RequestStoreRef,
    identity: IdentityProviderRef,
    finder: CandidateFinder,
    claims: ClaimCoordinator,
    lifecycle: LifecycleService,
    conversations: ConversationBinder,
    settlement: SettlementCoordinator,
    reviews: ReviewService,
    events: EventBus,
}

impl DispatchEngine {
    pub fn new(config: EngineConfig, stores: Stores, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            finder: CandidateFinder::new(collaborators.providers.clone()),
            claims: ClaimCoordinator::new(stores.requests.clone()),
            lifecycle: LifecycleService::new(stores.requests.clone()),
            conversations: ConversationBinder::new(
                stores.requests.clone(),
                stores.conversations.clone(),
            ),
            settlement: SettlementCoordinator::new(
                stores.requests.clone(),
                stores.payments.clone(),
                collaborators.gateway.clone(),
                config.currency.clone(),
            ),
            reviews: ReviewService::new(
                stores.requests.clone(),
                stores.reviews.clone(),
                collaborators.providers.clone(),
            ),
            requests: stores.requests,
            identity: collaborators.identity,
            events: EventBus::default(),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events.subscribe()
    }

    /// Resolves `user` to an actor; unknown users are unauthorized.
    pub async fn authenticate(&self, user: UserId) -> Result<Actor> {
        match self.identity.role_of(user).await? {
            Some(role) => Ok(Actor::new(user, role)),
            None => Err(DispatchError::Unauthorized(format!(
                "User {user} is not authenticated"
            ))),
        }
    }

    async fn authenticate_as(&self, user: UserId, role: Role) -> Result<Actor> {
        let actor = self.authenticate(user).await?;
        if actor.role != role {
            return Err(DispatchError::Unauthorized(format!(
                "User {user} is a {}, not a {role}",
                actor.role
            )));
        }
        Ok(actor)
    }

    pub async fn create_request(
        &self,
        customer: UserId,
        details: RequestDetails,
    ) -> Result<ServiceRequest> {
        self.create_request_with_id(RequestId::new(), customer, details)
            .await
    }

    /// Like [`Self::create_request`] with a caller-chosen id, for replays
    /// that must map the same label to the same request.
    pub async fn create_request_with_id(
        &self,
        id: RequestId,
        customer: UserId,
        details: RequestDetails,
    ) -> Result<ServiceRequest> {
        let actor = self.authenticate_as(customer, Role::Customer).await?;
        if let Some(target) = details.target_provider
            && self.identity.role_of(target).await? != Some(Role::Provider)
        {
            return Err(DispatchError::ValidationError(format!(
                "Targeted user {target} is not a provider"
            )));
        }
        let radius_km = self.config.resolve_radius(details.broadcast_radius_km)?;

        let request = ServiceRequest::new(id, actor.id, details, radius_km, Utc::now());
        self.requests.insert(request.clone()).await?;

        tracing::info!(
            request_id = %request.id,
            customer = %actor.id,
            target = ?request.target_provider,
            radius_km,
            "Request created"
        );
        self.events.publish(
            DispatchEvent::new(EventKind::RequestCreated, request.id)
                .to([request.customer_id])
                .to(request.target_provider),
        );
        Ok(request)
    }

    /// Offers a pending request to the providers around it and returns who
    /// it went to. Providers that already declined it are left out. A
    /// direct-targeted request goes to its target only.
    ///
    /// An empty list means nobody is available; the request stays pending.
    pub async fn broadcast(&self, request_id: RequestId) -> Result<Vec<UserId>> {
        let request = self.load(request_id).await?;

        let candidates = match request.target_provider {
            Some(target) => vec![target],
            None => self
                .finder
                .rank(
                    &request.location,
                    request.broadcast_radius_km,
                    self.config.candidate_limit,
                    &request.rejected_by,
                )
                .await?
                .into_iter()
                .map(|c| c.provider_id)
                .collect(),
        };

        let request = self
            .lifecycle
            .record_broadcast(request_id, candidates.clone())
            .await?;

        if candidates.is_empty() {
            tracing::info!(%request_id, radius_km = request.broadcast_radius_km, "No providers available in range");
        } else {
            tracing::info!(%request_id, candidates = candidates.len(), "Request broadcast");
        }
        self.events.publish(
            DispatchEvent::new(EventKind::RequestBroadcast, request_id)
                .to(candidates.iter().copied())
                .to([request.customer_id]),
        );
        Ok(candidates)
    }

    /// A provider's attempt to take a request. Exactly one concurrent caller
    /// wins; it gets the conversation bound and the other candidates are
    /// told the request is gone.
    pub async fn claim(&self, request_id: RequestId, provider: UserId) -> Result<ClaimResult> {
        let actor = self.authenticate_as(provider, Role::Provider).await?;
        let result = self.claims.claim(request_id, actor.id).await?;

        if let ClaimResult::Success(request) = &result {
            match self.conversations.bind(request).await {
                Ok(_) => {}
                Err(e) if e.is_expected() => {
                    tracing::debug!(%request_id, error = %e, "Request moved on before its conversation was bound");
                }
                Err(e) => {
                    tracing::warn!(%request_id, error = %e, "Conversation not bound at claim time");
                }
            }
            self.events.publish(
                DispatchEvent::new(EventKind::RequestClaimed { provider_id: actor.id }, request_id)
                    .to([request.customer_id, actor.id]),
            );
            let losers: Vec<UserId> = request
                .candidates
                .iter()
                .copied()
                .filter(|c| *c != actor.id)
                .collect();
            if !losers.is_empty() {
                self.events.publish(
                    DispatchEvent::new(EventKind::NoLongerAvailable, request_id).to(losers),
                );
            }
        }
        Ok(result)
    }

    /// Drives the state machine for `actor`. Rejection and cancellation
    /// close the conversation; completion opens the settlement.
    ///
    /// Once the transition is stored it is reported as done. A conversation
    /// that cannot be closed is logged; a settlement that cannot be opened is
    /// logged and recorded as a failed attempt.
    pub async fn transition(
        &self,
        request_id: RequestId,
        actor: UserId,
        event: LifecycleEvent,
    ) -> Result<ServiceRequest> {
        let actor = self.authenticate(actor).await?;
        let transition = self
            .lifecycle
            .transition(request_id, &actor, &event)
            .await?;
        let request = transition.request;

        self.events.publish(
            DispatchEvent::new(
                EventKind::StatusChanged {
                    from: transition.from,
                    to: transition.to,
                },
                request_id,
            )
            .to([request.customer_id])
            .to(transition.previous_provider),
        );

        match event {
            LifecycleEvent::Reject | LifecycleEvent::Cancel { .. } => {
                if let Err(e) = self.conversations.deactivate(request_id).await {
                    tracing::warn!(%request_id, status = %request.status, error = %e, "Conversation not closed after transition");
                }
            }
            LifecycleEvent::Complete { .. } => match self.settlement.initiate(request_id).await {
                Ok(order) => self.publish_settlement_initiated(&request, &order),
                Err(e) => {
                    tracing::warn!(%request_id, error = %e, "Settlement could not be initiated on completion");
                }
            },
            LifecycleEvent::StartTravel | LifecycleEvent::StartWork => {}
        }
        Ok(request)
    }

    pub async fn set_quotation(
        &self,
        request_id: RequestId,
        provider: UserId,
        amount: Amount,
    ) -> Result<ServiceRequest> {
        let actor = self.authenticate(provider).await?;
        let request = self
            .lifecycle
            .set_quotation(request_id, &actor, amount)
            .await?;
        self.events.publish(
            DispatchEvent::new(EventKind::QuotationUpdated, request_id).to([request.customer_id]),
        );
        Ok(request)
    }

    /// The request as `actor` is allowed to see it.
    pub async fn get_request(&self, request_id: RequestId, actor: UserId) -> Result<RequestView> {
        let actor = self.authenticate(actor).await?;
        let request = self.load(request_id).await?;
        RequestView::for_actor(&request, &actor)
    }

    pub async fn get_or_create_conversation(&self, request_id: RequestId) -> Result<Conversation> {
        self.conversations.get_or_create(request_id).await
    }

    pub async fn post_message(
        &self,
        conversation_id: ConversationId,
        sender: UserId,
        body: &str,
        kind: MessageKind,
    ) -> Result<Message> {
        let actor = self.authenticate(sender).await?;
        let conversation = self.conversations.get(conversation_id).await?;
        let message = self
            .conversations
            .post_message(conversation_id, actor.id, body, kind)
            .await?;
        self.events.publish(
            DispatchEvent::new(EventKind::MessagePosted { conversation_id }, conversation.request_id)
                .to(conversation.counterpart(actor.id)),
        );
        Ok(message)
    }

    pub async fn mark_read(&self, conversation_id: ConversationId, reader: UserId) -> Result<usize> {
        let actor = self.authenticate(reader).await?;
        self.conversations.mark_read(conversation_id, actor.id).await
    }

    pub async fn list_messages(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
    ) -> Result<Vec<Message>> {
        let actor = self.authenticate(reader).await?;
        self.conversations.messages(conversation_id, &actor).await
    }

    pub async fn unread_count(&self, conversation_id: ConversationId, reader: UserId) -> Result<usize> {
        let actor = self.authenticate(reader).await?;
        self.conversations.unread_count(conversation_id, actor.id).await
    }

    pub async fn initiate_settlement(&self, request_id: RequestId) -> Result<SettlementOrder> {
        let order = self.settlement.initiate(request_id).await?;
        let request = self.load(request_id).await?;
        self.publish_settlement_initiated(&request, &order);
        Ok(order)
    }

    /// Verifies a gateway callback for `payment_id`. On success a request
    /// completed on its quotation gets the settled amount recorded.
    pub async fn verify_settlement(
        &self,
        payment_id: PaymentId,
        callback: &GatewayCallback,
    ) -> Result<Payment> {
        match self.settlement.verify(payment_id, callback).await {
            Ok(payment) => {
                if let Err(e) = self
                    .lifecycle
                    .fill_final_amount(payment.request_id, payment.amount)
                    .await
                {
                    tracing::warn!(request_id = %payment.request_id, error = %e, "Final amount not recorded");
                }
                self.events.publish(
                    DispatchEvent::new(
                        EventKind::PaymentSucceeded { payment_id },
                        payment.request_id,
                    )
                    .to([payment.customer_id, payment.provider_id]),
                );
                Ok(payment)
            }
            Err(DispatchError::GatewayVerificationFailed { payment_id }) => {
                if let Some(payment) = self.settlement.payment(payment_id).await? {
                    self.events.publish(
                        DispatchEvent::new(
                            EventKind::PaymentFailed { payment_id },
                            payment.request_id,
                        )
                        .to([payment.customer_id]),
                    );
                }
                Err(DispatchError::GatewayVerificationFailed { payment_id })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn refund(&self, payment_id: PaymentId, reason: &str) -> Result<Payment> {
        let payment = self.settlement.refund(payment_id, reason).await?;
        self.events.publish(
            DispatchEvent::new(EventKind::PaymentRefunded { payment_id }, payment.request_id)
                .to([payment.customer_id, payment.provider_id]),
        );
        Ok(payment)
    }

    pub async fn payments_for_request(&self, request_id: RequestId) -> Result<Vec<Payment>> {
        self.settlement.payments_for_request(request_id).await
    }

    pub async fn settled_payment(&self, request_id: RequestId) -> Result<Option<Payment>> {
        self.settlement.settled_payment(request_id).await
    }

    pub async fn submit_review(
        &self,
        request_id: RequestId,
        customer: UserId,
        stars: u8,
        comment: &str,
    ) -> Result<Review> {
        let actor = self.authenticate(customer).await?;
        let stars = Stars::new(stars)?;
        let review = self
            .reviews
            .submit(request_id, &actor, stars, comment)
            .await?;
        self.events.publish(
            DispatchEvent::new(EventKind::ReviewSubmitted, request_id).to([review.provider_id]),
        );
        Ok(review)
    }

    pub async fn respond_to_review(
        &self,
        request_id: RequestId,
        admin: UserId,
        response: &str,
    ) -> Result<Review> {
        let actor = self.authenticate(admin).await?;
        self.reviews.respond(request_id, &actor, response).await
    }

    pub async fn review(&self, request_id: RequestId) -> Result<Option<Review>> {
        self.reviews.get(request_id).await
    }

    /// Unprojected record, for operators and reporting.
    pub async fn request(&self, request_id: RequestId) -> Result<ServiceRequest> {
        self.load(request_id).await
    }

    pub async fn all_requests(&self) -> Result<Vec<ServiceRequest>> {
        self.requests.all().await
    }

    async fn load(&self, request_id: RequestId) -> Result<ServiceRequest> {
        self.requests
            .get(request_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("request", request_id))
    }

    fn publish_settlement_initiated(&self, request: &ServiceRequest, order: &SettlementOrder) {
        self.events.publish(
            DispatchEvent::new(
                EventKind::SettlementInitiated {
                    payment_id: order.payment_id,
                },
                request.id,
            )
            .to([request.customer_id]),
        );
    }
}
