//! Domain layer: the records the engine owns, the request state machine,
//! and the ports through which it reaches storage and collaborators.

pub mod actor;
pub mod conversation;
pub mod event;
pub mod geo;
pub mod ids;
pub mod money;
pub mod payment;
pub mod ports;
pub mod request;
pub mod review;
pub mod view;
