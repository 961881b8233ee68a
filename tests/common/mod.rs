#![allow(dead_code)]

use roadside_dispatch::application::engine::{Collaborators, DispatchEngine, Stores};
use roadside_dispatch::config::EngineConfig;
use roadside_dispatch::domain::actor::{Role, UserId};
use roadside_dispatch::domain::geo::{GeoPoint, ProviderPosition};
use roadside_dispatch::domain::ids::RequestId;
use roadside_dispatch::domain::money::Amount;
use roadside_dispatch::domain::ports::PaymentGatewayRef;
use roadside_dispatch::domain::request::{IssueCategory, LifecycleEvent, RequestDetails};
use roadside_dispatch::infrastructure::gateway::HmacGateway;
use roadside_dispatch::infrastructure::in_memory::InMemoryDirectory;
use rust_decimal_macros::dec;
use std::sync::Arc;

pub const CUSTOMER: u32 = 1;
pub const OTHER_CUSTOMER: u32 = 2;
pub const ADMIN: u32 = 900;
/// Providers 10..=14, each a little further north of the customer.
pub const PROVIDERS: [u32; 5] = [10, 11, 12, 13, 14];

pub struct Harness {
    pub engine: Arc<DispatchEngine>,
    pub gateway: HmacGateway,
    pub directory: Arc<InMemoryDirectory>,
}

pub fn origin() -> GeoPoint {
    GeoPoint::new(12.9716, 77.5946).unwrap()
}

pub fn details() -> RequestDetails {
    RequestDetails::new(IssueCategory::FlatTyre, origin(), "MG Road, Bengaluru")
        .with_description("Rear left tyre flat")
}

pub fn amount(value: rust_decimal::Decimal) -> Amount {
    Amount::new(value).unwrap()
}

pub async fn directory() -> Arc<InMemoryDirectory> {
    let directory = Arc::new(InMemoryDirectory::new());
    directory.register(UserId(CUSTOMER), Role::Customer).await;
    directory.register(UserId(OTHER_CUSTOMER), Role::Customer).await;
    directory.register(UserId(ADMIN), Role::Admin).await;
    for (i, id) in PROVIDERS.iter().enumerate() {
        directory
            .upsert_provider(ProviderPosition {
                provider_id: UserId(*id),
                location: GeoPoint::new(12.9750 + 0.005 * i as f64, 77.5946).unwrap(),
                available: true,
                active: true,
                rating: 4.0,
            })
            .await;
    }
    directory
}

pub async fn harness() -> Harness {
    let gateway = HmacGateway::new("integration-secret").unwrap();
    harness_with_gateway(gateway.clone(), Arc::new(gateway)).await
}

/// Builds the engine against `engine_gateway`, keeping `gateway` around to
/// sign callbacks.
pub async fn harness_with_gateway(
    gateway: HmacGateway,
    engine_gateway: PaymentGatewayRef,
) -> Harness {
    build(gateway, engine_gateway, Stores::in_memory()).await
}

/// Builds the engine over `stores`, so a test can reach them directly.
pub async fn harness_with_stores(stores: Stores) -> Harness {
    let gateway = HmacGateway::new("integration-secret").unwrap();
    build(gateway.clone(), Arc::new(gateway), stores).await
}

async fn build(gateway: HmacGateway, engine_gateway: PaymentGatewayRef, stores: Stores) -> Harness {
    let directory = directory().await;
    let engine = DispatchEngine::new(
        EngineConfig::default(),
        stores,
        Collaborators {
            identity: directory.clone(),
            providers: directory.clone(),
            gateway: engine_gateway,
        },
    )
    .unwrap();
    Harness {
        engine: Arc::new(engine),
        gateway,
        directory,
    }
}

impl Harness {
    pub async fn pending(&self) -> RequestId {
        self.engine
            .create_request(UserId(CUSTOMER), details())
            .await
            .unwrap()
            .id
    }

    pub async fn assigned_to(&self, provider: u32) -> RequestId {
        let id = self.pending().await;
        assert!(
            self.engine
                .claim(id, UserId(provider))
                .await
                .unwrap()
                .is_success()
        );
        id
    }

    /// A request `provider` has quoted and started working on.
    pub async fn in_progress(&self, provider: u32) -> RequestId {
        let id = self.assigned_to(provider).await;
        self.engine
            .set_quotation(id, UserId(provider), amount(dec!(500)))
            .await
            .unwrap();
        for event in [LifecycleEvent::StartTravel, LifecycleEvent::StartWork] {
            self.engine
                .transition(id, UserId(provider), event)
                .await
                .unwrap();
        }
        id
    }

    pub async fn completed(&self, provider: u32) -> RequestId {
        let id = self.in_progress(provider).await;
        self.engine
            .transition(id, UserId(provider), LifecycleEvent::Complete { final_amount: None })
            .await
            .unwrap();
        id
    }
}
