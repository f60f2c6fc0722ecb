//! Shipwright
//!
//! Build-and-deploy orchestration core: submits builds to a remote build
//! provider, tracks their lifecycle through relayed notifications and
//! polling, and records every status transition in an append-only log.

pub mod app;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod orchestrator;
pub mod provider;
pub mod relay;
pub mod server;
pub mod staging;
pub mod status;
pub mod storage;
pub mod store;
pub mod utils;
pub mod workers;
