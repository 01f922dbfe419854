//! Adds operator-supplied IPs to the blocklist.

use std::fmt;

use log::{error, info, warn};

use crate::storage::BlocklistStore;
use crate::utils::normalize_ip;

/// Result of seeding one IP
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedOutcome {
    Added(String),
    AlreadyBlocked(String),
    Invalid(String),
    Failed { ip: String, error: String },
}

impl SeedOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SeedOutcome::Added(_) | SeedOutcome::AlreadyBlocked(_))
    }
}

impl fmt::Display for SeedOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeedOutcome::Added(ip) => write!(f, "Ip {} added to blocklist", ip),
            SeedOutcome::AlreadyBlocked(ip) => write!(f, "Ip {} is already blocked", ip),
            SeedOutcome::Invalid(raw) => write!(f, "Invalid IP address: {}", raw),
            SeedOutcome::Failed { ip, error } => write!(f, "Error blocking ip {}: {}", ip, error),
        }
    }
}

/// Block each IP in turn. A bad entry is reported and the batch continues.
pub async fn seed_blocklist<I, S>(store: &dyn BlocklistStore, ips: I) -> Vec<SeedOutcome>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut outcomes = Vec::new();

    for raw in ips {
        let raw = raw.as_ref();
        let Some(ip) = normalize_ip(raw) else {
            warn!("Rejected invalid IP {:?}", raw);
            outcomes.push(SeedOutcome::Invalid(raw.to_string()));
            continue;
        };

        let outcome = match store.is_blocked(&ip).await {
            Ok(true) => SeedOutcome::AlreadyBlocked(ip),
            Ok(false) => match store.block(&ip).await {
                Ok(()) => {
                    info!("Blocked {}", ip);
                    SeedOutcome::Added(ip)
                }
                Err(e) => {
                    error!("Failed to block {}: {}", ip, e);
                    SeedOutcome::Failed { ip, error: e.to_string() }
                }
            },
            Err(e) => {
                error!("Failed to check blocklist for {}: {}", ip, e);
                SeedOutcome::Failed { ip, error: e.to_string() }
            }
        };
        outcomes.push(outcome);
    }

    outcomes
}
