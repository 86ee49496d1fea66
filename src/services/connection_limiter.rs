//! Connection Limiter Service
//!
//! Caps simultaneous outbound probe connections across every batch sharing
//! the limiter, and keeps per-host in-flight counts for diagnostics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::utils::url::UrlUtils;

const UNKNOWN_HOST: &str = "<unknown>";

#[derive(Debug, Error)]
pub enum LimitError {
    #[error("connection limiter is closed")]
    Closed,
}

type HostCounts = Arc<Mutex<HashMap<String, u32>>>;

/// Connection limiter service
#[derive(Clone)]
pub struct ConnectionLimiter {
    max_connections: usize,
    semaphore: Arc<Semaphore>,
    /// Key: host[:port], Value: current in-flight probe count
    active_hosts: HostCounts,
}

impl ConnectionLimiter {
    pub fn new(max_connections: usize) -> Self {
        let max_connections = max_connections.max(1);
        Self {
            max_connections,
            semaphore: Arc::new(Semaphore::new(max_connections)),
            active_hosts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wait for a free connection slot and register it against the URL's host
    pub async fn acquire(&self, url: &str) -> Result<ConnectionPermit, LimitError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LimitError::Closed)?;

        let host = UrlUtils::host_key(url).unwrap_or_else(|| UNKNOWN_HOST.to_string());
        let host_count = {
            let mut hosts = lock_counts(&self.active_hosts);
            let count = hosts.entry(host.clone()).or_insert(0);
            *count += 1;
            *count
        };

        debug!(
            "Registered probe connection - host {}: {}, available permits: {}",
            host,
            host_count,
            self.semaphore.available_permits()
        );

        Ok(ConnectionPermit {
            hosts: self.active_hosts.clone(),
            host,
            _permit: permit,
        })
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Get current in-flight counts for every host
    pub fn get_connection_counts(&self) -> HashMap<String, u32> {
        lock_counts(&self.active_hosts).clone()
    }

    /// Get current in-flight count for one host key
    pub fn get_connection_count(&self, host: &str) -> u32 {
        lock_counts(&self.active_hosts)
            .get(host)
            .copied()
            .unwrap_or(0)
    }
}

fn lock_counts(counts: &HostCounts) -> std::sync::MutexGuard<'_, HashMap<String, u32>> {
    counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Held for the duration of one probe; releases the slot and host count on drop
pub struct ConnectionPermit {
    hosts: HostCounts,
    host: String,
    _permit: OwnedSemaphorePermit,
}

impl ConnectionPermit {
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        let mut hosts = lock_counts(&self.hosts);
        if let Some(count) = hosts.get_mut(&self.host) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                hosts.remove(&self.host);
            }
        }
        debug!("Released probe connection - host: {}", self.host);
    }
}
