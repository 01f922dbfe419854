//! IP Tracking Service
//!
//! Request interception with IP blocklisting and geolocation-enriched
//! request logging, plus a periodic scanner that flags abusive IPs.

pub mod api;
pub mod config;
pub mod core;
pub mod models;
pub mod storage;
pub mod utils;
