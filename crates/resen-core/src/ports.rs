//! Local port allocation.
//!
//! A port is free when no bucket records it and a TCP listener can bind it
//! on the loopback interface. The probe listener is dropped straight away,
//! so another process can still take the port before the container binds
//! it.

use std::net::{Ipv4Addr, TcpListener};

use resen_common::error::{ResenError, Result};

/// Hands out unused local ports starting from a base.
#[derive(Debug, Clone, Copy)]
pub struct PortAllocator {
    base: u16,
}

impl PortAllocator {
    /// Creates an allocator starting at `base`.
    #[must_use]
    pub const fn new(base: u16) -> Self {
        Self { base }
    }

    /// First port tried.
    #[must_use]
    pub const fn base(&self) -> u16 {
        self.base
    }

    /// Returns the lowest port at or above the base that is not in
    /// `assigned` and can currently be bound.
    ///
    /// # Errors
    ///
    /// Returns `ResenError::Validation` when every port up to 65535 is taken.
    pub fn allocate(&self, assigned: &[u16]) -> Result<u16> {
        let port = (self.base..=u16::MAX)
            .filter(|port| !assigned.contains(port))
            .find(|port| is_bindable(*port))
            .ok_or_else(|| ResenError::Validation {
                message: format!("no free local port at or above {}", self.base),
            })?;
        tracing::debug!(port, "allocated local port");
        Ok(port)
    }
}

/// Whether a TCP listener can bind `127.0.0.1:<port>` right now.
#[must_use]
pub fn is_bindable(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_allocations_never_repeat() {
        let allocator = PortAllocator::new(20_000);
        let mut assigned = Vec::new();
        for _ in 0..5 {
            let port = allocator.allocate(&assigned).expect("allocate");
            assert!(!assigned.contains(&port));
            assert!(port >= allocator.base());
            assigned.push(port);
        }
    }

    #[test]
    fn skips_ports_bound_by_other_processes() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("bind");
        let taken = listener.local_addr().expect("addr").port();
        if taken == u16::MAX {
            return;
        }
        let port = PortAllocator::new(taken).allocate(&[]).expect("allocate");
        assert!(port > taken);
    }

    #[test]
    fn skips_recorded_ports() {
        let allocator = PortAllocator::new(21_000);
        let first = allocator.allocate(&[]).expect("allocate");
        let second = allocator.allocate(&[first]).expect("allocate");
        assert_ne!(first, second);
    }

    #[test]
    fn exhausted_range_is_validation_error() {
        let err = PortAllocator::new(u16::MAX).allocate(&[u16::MAX]).unwrap_err();
        assert!(matches!(err, ResenError::Validation { .. }));
    }
}
