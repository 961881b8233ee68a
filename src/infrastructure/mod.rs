//! Adapters behind the domain ports: storage backends, the payment gateway
//! client and the in-process event bus.

pub mod event_bus;
pub mod gateway;
pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
