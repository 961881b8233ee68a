use super::actor::{Actor, Role, UserId};
use super::geo::GeoPoint;
use super::ids::RequestId;
use super::money::Amount;
use crate::error::{DispatchError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Assigned,
    Enroute,
    InProgress,
    Completed,
    Cancelled,
}

impl RequestStatus {
    /// States in which a provider is bound to the request.
    pub fn has_provider(&self) -> bool {
        matches!(
            self,
            RequestStatus::Assigned
                | RequestStatus::Enroute
                | RequestStatus::InProgress
                | RequestStatus::Completed
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Assigned => "assigned",
            RequestStatus::Enroute => "enroute",
            RequestStatus::InProgress => "in_progress",
            RequestStatus::Completed => "completed",
            RequestStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    FlatTyre,
    Battery,
    Fuel,
    Towing,
    Lockout,
    Engine,
    Other,
}

impl FromStr for IssueCategory {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flat_tyre" | "flat_tire" => Ok(IssueCategory::FlatTyre),
            "battery" => Ok(IssueCategory::Battery),
            "fuel" => Ok(IssueCategory::Fuel),
            "towing" => Ok(IssueCategory::Towing),
            "lockout" => Ok(IssueCategory::Lockout),
            "engine" => Ok(IssueCategory::Engine),
            "other" | "" => Ok(IssueCategory::Other),
            other => Err(DispatchError::ValidationError(format!(
                "Unknown issue category: {other}"
            ))),
        }
    }
}

/// Vehicle details copied onto the request at creation time, so later
/// profile edits never change what the provider was dispatched for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleSnapshot {
    pub kind: String,
    pub model: String,
    pub plate: String,
}

/// Customer-supplied input for a new request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDetails {
    pub issue: IssueCategory,
    pub description: String,
    pub vehicle: VehicleSnapshot,
    pub image_refs: Vec<String>,
    pub location: GeoPoint,
    pub address: String,
    /// Falls back to the engine's configured default when absent.
    pub broadcast_radius_km: Option<f64>,
    /// Direct booking: only this provider may claim the request.
    pub target_provider: Option<UserId>,
}

impl RequestDetails {
    pub fn new(issue: IssueCategory, location: GeoPoint, address: impl Into<String>) -> Self {
        Self {
            issue,
            description: String::new(),
            vehicle: VehicleSnapshot::default(),
            image_refs: Vec::new(),
            location,
            address: address.into(),
            broadcast_radius_km: None,
            target_provider: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_vehicle(mut self, vehicle: VehicleSnapshot) -> Self {
        self.vehicle = vehicle;
        self
    }

    pub fn with_radius_km(mut self, radius_km: f64) -> Self {
        self.broadcast_radius_km = Some(radius_km);
        self
    }

    pub fn targeting(mut self, provider: UserId) -> Self {
        self.target_provider = Some(provider);
        self
    }
}

/// Something an actor asks to happen to an assigned or pending request.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// The assigned provider declines; the request reopens.
    Reject,
    StartTravel,
    StartWork,
    Complete { final_amount: Option<Amount> },
    Cancel { reason: String },
}

impl LifecycleEvent {
    /// The status the event asks to move to.
    pub fn target(&self) -> RequestStatus {
        match self {
            LifecycleEvent::Reject => RequestStatus::Pending,
            LifecycleEvent::StartTravel => RequestStatus::Enroute,
            LifecycleEvent::StartWork => RequestStatus::InProgress,
            LifecycleEvent::Complete { .. } => RequestStatus::Completed,
            LifecycleEvent::Cancel { .. } => RequestStatus::Cancelled,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Reject => "reject",
            LifecycleEvent::StartTravel => "start_travel",
            LifecycleEvent::StartWork => "start_work",
            LifecycleEvent::Complete { .. } => "complete",
            LifecycleEvent::Cancel { .. } => "cancel",
        }
    }
}

/// How a claim attempt relates to the current state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimEligibility {
    Open,
    AlreadyClaimed,
    /// Direct-targeted at someone else, or no longer claimable at all.
    InvalidState,
}

/// What a conditional write must observe unchanged for it to apply: the
/// `{status, provider}` tuple plus the record version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestGuard {
    pub status: RequestStatus,
    pub provider_id: Option<UserId>,
    pub version: u64,
}

impl RequestGuard {
    pub fn matches(&self, request: &ServiceRequest) -> bool {
        self.status == request.status
            && self.provider_id == request.provider_id
            && self.version == request.version
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: RequestId,
    pub customer_id: UserId,
    pub provider_id: Option<UserId>,
    pub target_provider: Option<UserId>,
    pub issue: IssueCategory,
    pub description: String,
    pub vehicle: VehicleSnapshot,
    pub image_refs: Vec<String>,
    pub location: GeoPoint,
    pub address: String,
    pub broadcast_radius_km: f64,
    pub quotation: Option<Amount>,
    pub final_amount: Option<Amount>,
    pub status: RequestStatus,
    /// Providers the latest broadcast was offered to.
    pub candidates: Vec<UserId>,
    /// Providers that declined this request after claiming it.
    pub rejected_by: Vec<UserId>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Bumped by the store on every applied conditional write.
    pub version: u64,
}

impl ServiceRequest {
    pub fn new(
        id: RequestId,
        customer_id: UserId,
        details: RequestDetails,
        broadcast_radius_km: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            customer_id,
            provider_id: None,
            target_provider: details.target_provider,
            issue: details.issue,
            description: details.description,
            vehicle: details.vehicle,
            image_refs: details.image_refs,
            location: details.location,
            address: details.address,
            broadcast_radius_km,
            quotation: None,
            final_amount: None,
            status: RequestStatus::Pending,
            candidates: Vec::new(),
            rejected_by: Vec::new(),
            cancellation_reason: None,
            cancelled_by: None,
            created_at: now,
            assigned_at: None,
            completed_at: None,
            cancelled_at: None,
            version: 0,
        }
    }

    pub fn guard(&self) -> RequestGuard {
        RequestGuard {
            status: self.status,
            provider_id: self.provider_id,
            version: self.version,
        }
    }

    pub fn is_participant(&self, user: UserId) -> bool {
        self.customer_id == user || self.provider_id == Some(user)
    }

    /// `provider_id` is set exactly when the status carries a provider.
    pub fn provider_invariant_holds(&self) -> bool {
        self.provider_id.is_some() == self.status.has_provider()
    }

    pub fn claim_eligibility(&self, provider: UserId) -> ClaimEligibility {
        if let Some(target) = self.target_provider
            && target != provider
        {
            return ClaimEligibility::InvalidState;
        }
        match (self.status, self.provider_id) {
            (RequestStatus::Pending, None) => ClaimEligibility::Open,
            (RequestStatus::Cancelled, _) => ClaimEligibility::InvalidState,
            _ => ClaimEligibility::AlreadyClaimed,
        }
    }

    /// Binds `provider` to the request. Callers establish eligibility first
    /// and persist through a conditional write on the pre-claim guard.
    ///
    /// `assigned_at` records the first assignment and survives later
    /// rejections and re-claims.
    pub fn assign(&mut self, provider: UserId, now: DateTime<Utc>) {
        self.provider_id = Some(provider);
        self.status = RequestStatus::Assigned;
        self.assigned_at.get_or_insert(now);
    }

    /// Checks the transition graph and the acting party for `event`,
    /// returning the status it leads to.
    pub fn next_status(&self, actor: &Actor, event: &LifecycleEvent) -> Result<RequestStatus> {
        use RequestStatus::*;

        let to = event.target();
        let edge_exists = matches!(
            (self.status, event),
            (Assigned, LifecycleEvent::Reject)
                | (Assigned, LifecycleEvent::StartTravel)
                | (Enroute, LifecycleEvent::StartWork)
                | (InProgress, LifecycleEvent::Complete { .. })
                | (Pending | Assigned | Enroute, LifecycleEvent::Cancel { .. })
        );
        let actor_allowed = match event {
            LifecycleEvent::Cancel { .. } => actor.id == self.customer_id || actor.is_admin(),
            _ => actor.role == Role::Provider && self.provider_id == Some(actor.id),
        };

        if edge_exists && actor_allowed {
            Ok(to)
        } else {
            Err(DispatchError::InvalidTransition {
                from: self.status,
                to,
                actor: actor.id,
            })
        }
    }

    /// Applies `event` in place after validating it. Nothing is mutated when
    /// an error is returned.
    pub fn apply(
        &mut self,
        actor: &Actor,
        event: &LifecycleEvent,
        now: DateTime<Utc>,
    ) -> Result<RequestStatus> {
        let to = self.next_status(actor, event)?;

        match event {
            LifecycleEvent::Reject => {
                self.provider_id = None;
                // A declined direct booking falls back to an open broadcast.
                self.target_provider = None;
                self.candidates.clear();
                if !self.rejected_by.contains(&actor.id) {
                    self.rejected_by.push(actor.id);
                }
            }
            LifecycleEvent::StartTravel | LifecycleEvent::StartWork => {}
            LifecycleEvent::Complete { final_amount } => {
                if final_amount.is_none() && self.settlement_amount().is_none() {
                    return Err(DispatchError::ValidationError(
                        "Completion requires a quotation or a final amount".to_string(),
                    ));
                }
                if let Some(amount) = final_amount {
                    self.final_amount = Some(*amount);
                }
                self.completed_at = Some(now);
            }
            LifecycleEvent::Cancel { reason } => {
                let reason = reason.trim();
                if reason.is_empty() {
                    return Err(DispatchError::ValidationError(
                        "Cancellation reason is required".to_string(),
                    ));
                }
                self.provider_id = None;
                self.cancellation_reason = Some(reason.to_string());
                self.cancelled_by = Some(actor.id);
                self.cancelled_at = Some(now);
            }
        }

        self.status = to;
        Ok(to)
    }

    /// Sets the provider's price quote while the job is live.
    pub fn set_quotation(&mut self, actor: &Actor, amount: Amount) -> Result<()> {
        if actor.role != Role::Provider || self.provider_id != Some(actor.id) {
            return Err(DispatchError::Unauthorized(format!(
                "Only the assigned provider may quote request {}",
                self.id
            )));
        }
        if !matches!(
            self.status,
            RequestStatus::Assigned | RequestStatus::Enroute | RequestStatus::InProgress
        ) {
            return Err(DispatchError::ValidationError(format!(
                "Cannot quote a request that is {}",
                self.status
            )));
        }
        self.quotation = Some(amount);
        Ok(())
    }

    pub fn settlement_amount(&self) -> Option<Amount> {
        self.final_amount.or(self.quotation)
    }
}
