//! Role-specific projections of a [`ServiceRequest`].
//!
//! Each party sees a different slice of the same record; the projection is
//! chosen from the caller's role and relationship to the request, never from
//! which optional fields happen to be populated.

use super::actor::{Actor, Role, UserId};
use super::geo::GeoPoint;
use super::ids::RequestId;
use super::money::Amount;
use super::request::{
    ClaimEligibility, IssueCategory, RequestStatus, ServiceRequest, VehicleSnapshot,
};
use crate::error::{DispatchError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "view", rename_all = "lowercase")]
pub enum RequestView {
    Customer(CustomerView),
    Provider(ProviderView),
    Admin(Box<ServiceRequest>),
}

/// What the requesting customer sees of their own request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerView {
    pub id: RequestId,
    pub status: RequestStatus,
    pub issue: IssueCategory,
    pub description: String,
    pub vehicle: VehicleSnapshot,
    pub address: String,
    pub provider_id: Option<UserId>,
    pub quotation: Option<Amount>,
    pub final_amount: Option<Amount>,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

/// What a provider sees: the job itself, plus the customer only once the
/// provider is the one bound to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderView {
    pub id: RequestId,
    pub status: RequestStatus,
    pub issue: IssueCategory,
    pub description: String,
    pub vehicle: VehicleSnapshot,
    pub location: GeoPoint,
    pub address: String,
    pub quotation: Option<Amount>,
    pub final_amount: Option<Amount>,
    pub customer_id: Option<UserId>,
    pub assigned_to_you: bool,
    pub created_at: DateTime<Utc>,
}

impl RequestView {
    /// Projects `request` for `actor`, refusing callers with no stake in it.
    pub fn for_actor(request: &ServiceRequest, actor: &Actor) -> Result<Self> {
        match actor.role {
            Role::Admin => Ok(RequestView::Admin(Box::new(request.clone()))),
            Role::Customer if request.customer_id == actor.id => {
                Ok(RequestView::Customer(CustomerView::from(request)))
            }
            Role::Provider if request.provider_id == Some(actor.id) => {
                Ok(RequestView::Provider(ProviderView::project(request, true)))
            }
            Role::Provider if request.claim_eligibility(actor.id) == ClaimEligibility::Open => {
                Ok(RequestView::Provider(ProviderView::project(request, false)))
            }
            _ => Err(DispatchError::Unauthorized(format!(
                "{} {} may not view request {}",
                actor.role, actor.id, request.id
            ))),
        }
    }
}

impl From<&ServiceRequest> for CustomerView {
    fn from(r: &ServiceRequest) -> Self {
        Self {
            id: r.id,
            status: r.status,
            issue: r.issue,
            description: r.description.clone(),
            vehicle: r.vehicle.clone(),
            address: r.address.clone(),
            provider_id: r.provider_id,
            quotation: r.quotation,
            final_amount: r.final_amount,
            created_at: r.created_at,
            assigned_at: r.assigned_at,
            completed_at: r.completed_at,
            cancelled_at: r.cancelled_at,
            cancellation_reason: r.cancellation_reason.clone(),
        }
    }
}

impl ProviderView {
    fn project(r: &ServiceRequest, assigned_to_you: bool) -> Self {
        Self {
            id: r.id,
            status: r.status,
            issue: r.issue,
            description: r.description.clone(),
            vehicle: r.vehicle.clone(),
            location: r.location,
            address: r.address.clone(),
            quotation: r.quotation,
            final_amount: r.final_amount,
            customer_id: assigned_to_you.then_some(r.customer_id),
            assigned_to_you,
            created_at: r.created_at,
        }
    }
}
