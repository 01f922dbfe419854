//! Request interception for the IP tracking service.
//!
//! Every inbound request is logged (with its resolved location) and checked
//! against the blocklist before it reaches the wrapped service. Blocked IPs
//! receive a 403; everything else is forwarded untouched. Nothing on this
//! path is allowed to fail the request: resolver, persistence and blocklist
//! errors are logged and the request continues.

use std::rc::Rc;
use std::sync::Arc;

use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{Error, HttpMessage, HttpResponse};
use chrono::{DateTime, Utc};
use futures::future::{ready, LocalBoxFuture, Ready};
use log::{error, info, warn};
use metrics::increment_counter;

use crate::core::geo_resolver::GeoResolver;
use crate::models::RequestLogEntry;
use crate::storage::{BlocklistStore, RequestLogStore};
use crate::utils::ip_or_unknown;

/// Body of the deny response
pub const DENY_BODY: &str = "Access denied";

/// Ingress time of a request. Set upstream to override the clock; inserted
/// by the middleware otherwise.
#[derive(Debug, Clone, Copy)]
pub struct RequestTime(pub DateTime<Utc>);

/// What the interceptor decided for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Forward,
    Deny,
}

/// The fields captured at ingress
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub ip_address: String,
    pub timestamp: DateTime<Utc>,
    pub path: String,
}

impl RequestContext {
    fn from_request(req: &ServiceRequest) -> Self {
        let upstream = req.extensions().get::<RequestTime>().copied();
        let timestamp = match upstream {
            Some(RequestTime(timestamp)) => timestamp,
            None => {
                let now = Utc::now();
                req.extensions_mut().insert(RequestTime(now));
                now
            }
        };

        let peer = req.peer_addr().map(|addr| addr.ip().to_string());

        Self {
            ip_address: ip_or_unknown(peer.as_deref()),
            timestamp,
            path: req.path().to_string(),
        }
    }
}

/// Logging and blocklist gate shared by every worker
pub struct Interceptor {
    resolver: Arc<GeoResolver>,
    logs: Arc<dyn RequestLogStore>,
    blocklist: Arc<dyn BlocklistStore>,
}

impl Interceptor {
    pub fn new(
        resolver: Arc<GeoResolver>,
        logs: Arc<dyn RequestLogStore>,
        blocklist: Arc<dyn BlocklistStore>,
    ) -> Self {
        Self { resolver, logs, blocklist }
    }

    /// Log the request, then decide whether it may proceed
    pub async fn inspect(&self, ctx: &RequestContext) -> Verdict {
        info!(
            "Request from {} at {}. Path: {}",
            ctx.ip_address,
            ctx.timestamp.to_rfc3339(),
            ctx.path
        );
        increment_counter!("requests_total");

        let location = self.resolver.resolve(&ctx.ip_address).await;

        let entry = RequestLogEntry {
            ip_address: ctx.ip_address.clone(),
            timestamp: ctx.timestamp,
            path: ctx.path.clone(),
            country: location.known_country(),
            city: location.known_city(),
        };
        if let Err(e) = self.logs.append(&entry).await {
            error!("Failed to persist request log for {}: {}", ctx.ip_address, e);
            increment_counter!("request_log_failures_total");
        }

        match self.blocklist.is_blocked(&ctx.ip_address).await {
            Ok(true) => {
                warn!("Blocked request from {} to {}", ctx.ip_address, ctx.path);
                increment_counter!("requests_blocked_total");
                Verdict::Deny
            }
            Ok(false) => Verdict::Forward,
            Err(e) => {
                error!("Blocklist lookup failed for {}, forwarding: {}", ctx.ip_address, e);
                Verdict::Forward
            }
        }
    }
}

/// actix-web middleware factory wrapping an [`Interceptor`]
#[derive(Clone)]
pub struct RequestInterception {
    interceptor: Arc<Interceptor>,
}

impl RequestInterception {
    pub fn new(interceptor: Arc<Interceptor>) -> Self {
        Self { interceptor }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestInterception
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RequestInterceptionService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestInterceptionService {
            service: Rc::new(service),
            interceptor: Arc::clone(&self.interceptor),
        }))
    }
}

pub struct RequestInterceptionService<S> {
    service: Rc<S>,
    interceptor: Arc<Interceptor>,
}

impl<S, B> Service<ServiceRequest> for RequestInterceptionService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let interceptor = Arc::clone(&self.interceptor);

        Box::pin(async move {
            let ctx = RequestContext::from_request(&req);

            match interceptor.inspect(&ctx).await {
                Verdict::Deny => {
                    let response = HttpResponse::Forbidden()
                        .content_type("text/plain; charset=utf-8")
                        .body(DENY_BODY);
                    Ok(req.into_response(response).map_into_right_body())
                }
                Verdict::Forward => service
                    .call(req)
                    .await
                    .map(ServiceResponse::map_into_left_body),
            }
        })
    }
}
