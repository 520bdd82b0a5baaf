//! Happy Hour - billing reconciliation and voucher redemption for a
//! restaurant deals marketplace.
//!
//! The library holds the HTTP handlers, persistence and billing-provider
//! integration; `main.rs` wires them into a server.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod id;
pub mod jobs;
pub mod models;
pub mod payments;
