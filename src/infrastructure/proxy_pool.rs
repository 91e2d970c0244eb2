//! # Proxy Pool
//!
//! Fixed set of outbound proxy addresses shared by every enrichment worker of
//! every pipeline instance. Each address is held by at most one fetch at a
//! time; acquirers wait in FIFO order until one is returned.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::infrastructure::config::ConfigError;

/// Port used for bare proxy hosts
pub const DEFAULT_PROXY_PORT: u16 = 3128;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProxyPoolError {
    #[error("Proxy pool is closed")]
    Closed,
}

#[derive(Debug)]
pub struct ProxyPool {
    permits: Arc<Semaphore>,
    free: Mutex<VecDeque<String>>,
    size: usize,
}

impl ProxyPool {
    #[must_use]
    pub fn new(addresses: Vec<String>) -> Arc<Self> {
        if addresses.is_empty() {
            warn!("Proxy pool is empty; every fetch will wait forever");
        }
        let size = addresses.len();
        Arc::new(Self {
            permits: Arc::new(Semaphore::new(size)),
            free: Mutex::new(addresses.into()),
            size,
        })
    }

    /// Loads a proxy list: one entry per line, `#` comments and blank lines
    /// ignored. A bare host gets the default port and `http://` scheme.
    pub async fn from_file(path: &Path) -> Result<Arc<Self>, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::ProxyList {
                path: path.display().to_string(),
                source,
            })?;
        let addresses: Vec<String> = content.lines().filter_map(parse_proxy_line).collect();
        info!(path = %path.display(), proxies = addresses.len(), "Proxy list loaded");
        Ok(Self::new(addresses))
    }

    /// Waits for a free address
    pub async fn acquire(self: &Arc<Self>) -> Result<ProxyLease, ProxyPoolError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ProxyPoolError::Closed)?;
        let address = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or(ProxyPoolError::Closed)?;
        debug!(proxy = %address, "Proxy leased");
        Ok(ProxyLease {
            pool: self.clone(),
            address: Some(address),
            _permit: permit,
        })
    }

    /// Returns a lease explicitly; dropping it has the same effect
    pub fn release(lease: ProxyLease) {
        drop(lease);
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Number of addresses not currently leased
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    fn give_back(&self, address: String) {
        debug!(proxy = %address, "Proxy returned");
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(address);
    }
}

/// An exclusively held proxy address; returned to the pool on drop
#[derive(Debug)]
pub struct ProxyLease {
    pool: Arc<ProxyPool>,
    address: Option<String>,
    // released after the address is back in the queue
    _permit: OwnedSemaphorePermit,
}

impl ProxyLease {
    #[must_use]
    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or_default()
    }
}

impl Drop for ProxyLease {
    fn drop(&mut self) {
        if let Some(address) = self.address.take() {
            self.pool.give_back(address);
        }
    }
}

fn parse_proxy_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    Some(if line.contains("://") {
        line.to_string()
    } else if line.contains(':') {
        format!("http://{line}")
    } else {
        format!("http://{line}:{DEFAULT_PROXY_PORT}")
    })
}
