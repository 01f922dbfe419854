//! Batch anomaly detection over the request log.
//!
//! Each scan covers the trailing hour `[now - 1h, now)` and applies two
//! rules: volumetric abuse (more than 100 requests from one IP) and
//! sensitive-path probing. Findings are upserted into the suspicious-IP
//! store keyed on the exact (ip, reason) pair, so repeating a scan over
//! unchanged data creates nothing new.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use log::{error, info};
use metrics::{counter, increment_counter};
use uuid::Uuid;

use crate::core::scheduler::ScheduledJob;
use crate::models::SuspiciousIp;
use crate::storage::{IpRequestCount, PathHit, RequestLogStore, StoreError, SuspiciousIpStore};

/// Requests per window above which an IP is flagged (exclusive)
pub const HEAVY_TRAFFIC_THRESHOLD: u64 = 100;

/// Paths whose access is always recorded
pub const SENSITIVE_PATHS: [&str; 2] = ["/admin/", "/login"];

/// Length of the trailing window
pub fn scan_window() -> Duration {
    Duration::hours(1)
}

/// Outcome of one scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub logs_scanned: u64,
    pub heavy_traffic_ips: usize,
    pub sensitive_hits: usize,
    pub created: usize,
    pub failed: usize,
}

pub fn heavy_traffic_reason(total_requests: u64) -> String {
    format!("Heavy traffic: {} requests in the past hour", total_requests)
}

pub fn sensitive_path_reason(path: &str) -> String {
    format!("Accessing sensitive path: {}", path)
}

/// Rule A: IPs whose request count exceeds the threshold
pub fn heavy_traffic_findings(counts: &[IpRequestCount], threshold: u64) -> Vec<SuspiciousIp> {
    counts
        .iter()
        .filter(|count| count.total_requests > threshold)
        .map(|count| SuspiciousIp {
            ip_address: count.ip_address.clone(),
            reason: heavy_traffic_reason(count.total_requests),
        })
        .collect()
}

/// Rule B: one finding per distinct (ip, sensitive path)
pub fn sensitive_path_findings(hits: &[PathHit]) -> Vec<SuspiciousIp> {
    hits.iter()
        .filter(|hit| SENSITIVE_PATHS.contains(&hit.path.as_str()))
        .map(|hit| SuspiciousIp {
            ip_address: hit.ip_address.clone(),
            reason: sensitive_path_reason(&hit.path),
        })
        .collect()
}

pub struct AnomalyScanner {
    logs: Arc<dyn RequestLogStore>,
    suspicious: Arc<dyn SuspiciousIpStore>,
    upsert_concurrency: usize,
}

impl AnomalyScanner {
    pub fn new(
        logs: Arc<dyn RequestLogStore>,
        suspicious: Arc<dyn SuspiciousIpStore>,
        upsert_concurrency: usize,
    ) -> Self {
        Self {
            logs,
            suspicious,
            upsert_concurrency: upsert_concurrency.max(1),
        }
    }

    /// Scan `[now - 1h, now)` and record findings.
    ///
    /// A rule whose query fails contributes no candidates; a candidate whose
    /// upsert fails is counted in `failed`. Neither stops the rest of the scan.
    pub async fn scan(&self, now: DateTime<Utc>) -> ScanReport {
        let run_id = Uuid::new_v4();
        let start = now - scan_window();
        let mut report = ScanReport::default();

        match self.logs.count_between(start, now).await {
            Ok(total) => report.logs_scanned = total,
            Err(e) => {
                error!("[scan {}] Failed to count request logs: {}", run_id, e);
                report.failed += 1;
            }
        }
        info!("[scan {}] Past hour logs: {}", run_id, report.logs_scanned);

        let heavy = match self.logs.counts_by_ip(start, now).await {
            Ok(counts) => heavy_traffic_findings(&counts, HEAVY_TRAFFIC_THRESHOLD),
            Err(e) => {
                error!("[scan {}] Failed to aggregate request counts: {}", run_id, e);
                report.failed += 1;
                Vec::new()
            }
        };
        report.heavy_traffic_ips = heavy.len();
        info!("[scan {}] Heavy traffic IPs: {}", run_id, report.heavy_traffic_ips);

        let sensitive = match self.logs.path_hits(start, now, &SENSITIVE_PATHS).await {
            Ok(hits) => sensitive_path_findings(&hits),
            Err(e) => {
                error!("[scan {}] Failed to query sensitive path hits: {}", run_id, e);
                report.failed += 1;
                Vec::new()
            }
        };
        report.sensitive_hits = sensitive.len();
        info!("[scan {}] Sensitive hits: {}", run_id, report.sensitive_hits);

        // Distinct keys only, so no two in-flight upserts share an (ip, reason).
        let mut seen = HashSet::new();
        let candidates: Vec<SuspiciousIp> = heavy
            .into_iter()
            .chain(sensitive)
            .filter(|finding| seen.insert(finding.clone()))
            .collect();

        let results: Vec<(SuspiciousIp, Result<bool, StoreError>)> = stream::iter(candidates)
            .map(|finding| async move {
                let result = self
                    .suspicious
                    .get_or_create(&finding.ip_address, &finding.reason)
                    .await;
                (finding, result)
            })
            .buffer_unordered(self.upsert_concurrency)
            .collect()
            .await;

        for (finding, result) in results {
            match result {
                Ok(true) => report.created += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(
                        "[scan {}] Failed to record {} ({}): {}",
                        run_id, finding.ip_address, finding.reason, e
                    );
                    increment_counter!("scanner_candidate_failures_total");
                    report.failed += 1;
                }
            }
        }
        counter!("suspicious_ips_created_total", report.created as u64);

        info!(
            "[scan {}] Finished: {} new suspicious entries, {} failures",
            run_id, report.created, report.failed
        );

        report
    }
}

#[async_trait]
impl ScheduledJob for AnomalyScanner {
    fn name(&self) -> &str {
        "anomaly_scanner"
    }

    async fn run(&self, now: DateTime<Utc>) {
        self.scan(now).await;
    }
}
