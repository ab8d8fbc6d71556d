//! IMAI generation job lifecycle reconciliation.
//!
//! Tracks async image-generation jobs submitted to IMAI Studio and keeps a
//! single authoritative record per job, whether the outcome arrives by
//! webhook, by a status query, or both. Also contains the client-side poller
//! and the asset rehost pipeline run by the `worker` binary.

pub mod app_state;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
