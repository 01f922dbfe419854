//! API endpoints for the IP tracking service.
//!
//! This module provides HTTP endpoints for service health, Prometheus
//! metrics and read access to the scanner's suspicious-IP findings.

use std::sync::Arc;

use actix_web::{web, HttpResponse, Responder};
use log::error;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

use crate::storage::SuspiciousIpStore;

pub struct ApiState {
    pub suspicious: Arc<dyn SuspiciousIpStore>,
    pub metrics: Option<PrometheusHandle>,
}

/// API configuration function for Actix-web
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/health").route(web::get().to(health_check)))
            .service(web::resource("/suspicious-ips").route(web::get().to(list_suspicious_ips)))
    )
    .service(web::resource("/metrics").route(web::get().to(render_metrics)));
}

/// Health check endpoint response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Error body for failed reads
#[derive(Serialize)]
struct ErrorResponse {
    message: String,
}

/// Health check endpoint
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Suspicious IP listing endpoint
async fn list_suspicious_ips(state: web::Data<ApiState>) -> impl Responder {
    match state.suspicious.list().await {
        Ok(rows) => HttpResponse::Ok().json(rows),
        Err(e) => {
            error!("Failed to list suspicious IPs: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                message: "Failed to list suspicious IPs".to_string(),
            })
        }
    }
}

/// Prometheus scrape endpoint
async fn render_metrics(state: web::Data<ApiState>) -> impl Responder {
    match &state.metrics {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::NotFound().finish(),
    }
}
