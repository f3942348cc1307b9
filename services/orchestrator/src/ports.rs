use std::collections::HashSet;

use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::error::EngineError;

const MAX_PROBES: usize = 16;

/// Hands out ephemeral host ports for runtime containers.
///
/// The OS picks the port (bind to port 0, read it back, release). The
/// window between releasing the probe socket and the container binding
/// the port cannot be closed from here, so issued-but-unconfirmed ports
/// are tracked in an own set: two concurrent starts can never be handed
/// the same port, and a bind conflict against a foreign process is
/// handled by the supervisor re-allocating.
pub struct PortAllocator {
    issued: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self {
            issued: Mutex::new(HashSet::new()),
        }
    }

    pub async fn allocate(&self) -> Result<u16, EngineError> {
        for _ in 0..MAX_PROBES {
            let listener = TcpListener::bind(("127.0.0.1", 0))
                .await
                .map_err(|_| EngineError::NoFreePort)?;
            let port = listener
                .local_addr()
                .map_err(|_| EngineError::NoFreePort)?
                .port();
            drop(listener);

            let mut issued = self.issued.lock().await;
            if issued.insert(port) {
                return Ok(port);
            }
            // port is already out with another start in flight; probe again
        }
        Err(EngineError::NoFreePort)
    }

    /// The container is up and owns the port; the OS won't offer it again.
    pub async fn confirm(&self, port: u16) {
        self.issued.lock().await.remove(&port);
    }

    /// The start failed; the port goes back to the OS pool.
    pub async fn release(&self, port: u16) {
        self.issued.lock().await.remove(&port);
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allocate_tracks_issued_ports() {
        let alloc = PortAllocator::new();
        let a = alloc.allocate().await.unwrap();
        let b = alloc.allocate().await.unwrap();
        assert_ne!(a, b);
        assert_eq!(alloc.issued.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_confirm_and_release_clear_bookkeeping() {
        let alloc = PortAllocator::new();
        let a = alloc.allocate().await.unwrap();
        let b = alloc.allocate().await.unwrap();
        alloc.confirm(a).await;
        alloc.release(b).await;
        assert!(alloc.issued.lock().await.is_empty());
    }
}
