//! # Commission server
//! The HTTP face of the commission engine. It is responsible for:
//! * receiving invoice-fulfilment webhooks and turning them into referral registrations,
//! * kicking off and reporting on monthly commission builds,
//! * exposing referral and payout status administration.
//!
//! ## Configuration
//! The server is configured via `CCE_`-prefixed environment variables. See [config](config/index.html).
//!
//! ## Jobs
//! Every instance hosts its own in-process job dispatcher. Builds requested over HTTP are queued on it and the
//! request returns 202 immediately; the dispatcher drains outstanding jobs before the process exits.
pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod routes;
pub mod server;

#[cfg(test)]
mod endpoint_tests;
