//! Outbound HTTP

pub mod client;

pub use client::{Auth, HttpClient};
