//! Payment gateway client that signs and verifies callbacks locally.
//!
//! Orders and refunds are issued in-process. Callback signatures follow the
//! common hosted-checkout scheme: hex HMAC-SHA-256 over
//! `"{order_id}|{gateway_payment_id}"` keyed by the shared secret.

use crate::domain::money::Amount;
use crate::domain::payment::{GatewayCallback, GatewayOrder};
use crate::domain::ports::PaymentGateway;
use crate::error::{DispatchError, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct HmacGateway {
    secret: Arc<Vec<u8>>,
}

impl std::fmt::Debug for HmacGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacGateway").finish_non_exhaustive()
    }
}

impl HmacGateway {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(DispatchError::ValidationError(
                "Gateway secret must not be empty".to_string(),
            ));
        }
        Ok(Self {
            secret: Arc::new(secret.to_vec()),
        })
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| DispatchError::Gateway("Invalid gateway key".to_string()))
    }

    /// Signature the gateway attaches to a genuine callback.
    pub fn sign(&self, order_id: &str, gateway_payment_id: &str) -> Result<String> {
        let mut mac = self.mac()?;
        mac.update(order_id.as_bytes());
        mac.update(b"|");
        mac.update(gateway_payment_id.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Builds the callback a customer's successful checkout would produce.
    pub fn simulate_callback(&self, order_id: &str) -> Result<GatewayCallback> {
        let gateway_payment_id = format!("pay_{}", Uuid::new_v4().simple());
        let signature = self.sign(order_id, &gateway_payment_id)?;
        Ok(GatewayCallback {
            order_id: order_id.to_string(),
            gateway_payment_id,
            signature,
        })
    }
}

#[async_trait]
impl PaymentGateway for HmacGateway {
    async fn create_order(
        &self,
        amount: Amount,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder> {
        let order = GatewayOrder {
            order_id: format!("order_{}", Uuid::new_v4().simple()),
            amount,
            currency: currency.to_string(),
        };
        tracing::debug!(order_id = %order.order_id, %receipt, minor_units = %amount.minor_units(), %currency, "Gateway order created");
        Ok(order)
    }

    async fn verify_signature(&self, callback: &GatewayCallback) -> Result<bool> {
        let signature = match hex::decode(&callback.signature) {
            Ok(bytes) => bytes,
            Err(_) => return Ok(false),
        };
        let mut mac = self.mac()?;
        mac.update(callback.order_id.as_bytes());
        mac.update(b"|");
        mac.update(callback.gateway_payment_id.as_bytes());
        // Constant-time comparison.
        Ok(mac.verify_slice(&signature).is_ok())
    }

    async fn refund(&self, gateway_payment_id: &str, amount: Amount) -> Result<String> {
        if gateway_payment_id.is_empty() {
            return Err(DispatchError::Gateway(
                "Refund requires a gateway payment id".to_string(),
            ));
        }
        let refund_id = format!("rfnd_{}", Uuid::new_v4().simple());
        tracing::debug!(%gateway_payment_id, %refund_id, %amount, "Gateway refund issued");
        Ok(refund_id)
    }
}
