//! Host port allocation for database containers.
//!
//! Hands out unique ports from a configured inclusive range. The held set
//! is in-process only; it is not rebuilt from surviving containers after a
//! restart, so every candidate is additionally probed with an OS-level
//! bind before being handed out.

use std::collections::HashSet;
use std::net::TcpListener;
use std::sync::Mutex;

use tracing::debug;

use crate::error::{Error, Result};

/// Mutex-guarded allocator over an inclusive port range.
///
/// All operations serialize under a single lock, which is held across the
/// bind probe so two concurrent allocations can never race on the same
/// candidate port.
pub struct PortAllocator {
    lo: u16,
    hi: u16,
    held: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    /// Create an allocator over `lo..=hi`.
    pub fn new(lo: u16, hi: u16) -> Self {
        Self {
            lo,
            hi,
            held: Mutex::new(HashSet::new()),
        }
    }

    /// Allocate the first free port in the range.
    ///
    /// A port is free when it is not currently held by this process and a
    /// loopback TCP listener can be bound to it. The bind probe rejects
    /// ports owned by surviving containers or unrelated processes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PortExhausted`] when no port qualifies.
    pub fn allocate(&self) -> Result<u16> {
        let mut held = self.held.lock().expect("port allocator lock poisoned");

        for port in self.lo..=self.hi {
            if held.contains(&port) {
                continue;
            }
            if !probe_bind(port) {
                debug!(port, "port in use on host, skipping");
                continue;
            }
            held.insert(port);
            return Ok(port);
        }

        Err(Error::PortExhausted {
            lo: self.lo,
            hi: self.hi,
        })
    }

    /// Release a previously allocated port. Releasing an unheld port is a
    /// no-op.
    pub fn release(&self, port: u16) {
        let mut held = self.held.lock().expect("port allocator lock poisoned");
        held.remove(&port);
    }

    /// Whether a port is currently held by this process.
    pub fn is_held(&self, port: u16) -> bool {
        self.held
            .lock()
            .expect("port allocator lock poisoned")
            .contains(&port)
    }

    /// All currently held ports.
    pub fn held(&self) -> Vec<u16> {
        let held = self.held.lock().expect("port allocator lock poisoned");
        let mut ports: Vec<u16> = held.iter().copied().collect();
        ports.sort_unstable();
        ports
    }

    /// Inclusive range bounds.
    pub fn range(&self) -> (u16, u16) {
        (self.lo, self.hi)
    }
}

/// Check that a loopback listener can be bound to the port right now.
fn probe_bind(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}
