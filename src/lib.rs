//! Dispatch and lifecycle engine for roadside-assistance requests.
//!
//! Matches a customer's request with a nearby provider, enforces the request
//! state machine, binds a private conversation to each assignment and
//! settles payment at most once per request.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
