//! Application layer orchestrating dispatch.
//!
//! [`engine::DispatchEngine`] is the entry point. It composes one service per
//! concern: candidate search, claiming, lifecycle transitions, conversations,
//! settlement and reviews. Every request mutation funnels through
//! [`cas::update_request`], a single conditional write against the store.

pub mod candidates;
pub mod cas;
pub mod claim;
pub mod conversation;
pub mod engine;
pub mod lifecycle;
pub mod review;
pub mod settlement;
