//! Loopback port allocation.
//!
//! Ports are reserved by binding an ephemeral listener and letting the OS
//! pick an unused port. The returned [`PortReservation`] keeps the socket
//! open; callers hold it until just before the port is handed to a child
//! process, which closes the window in which two allocations could race to
//! the same port.

use std::net::TcpListener;

use crate::error::{Error, Result};

/// A loopback port reserved for this session.
///
/// The backing socket stays bound for the lifetime of the reservation.
/// Dropping the reservation releases the port for the child process that
/// will actually listen on it.
#[derive(Debug)]
pub struct PortReservation {
    port: u16,
    // Held only to keep the port bound.
    _listener: TcpListener,
}

impl PortReservation {
    /// The reserved port number.
    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Reserve a free TCP port on 127.0.0.1.
///
/// Each endpoint that needs a port gets its own independent allocation;
/// port numbers are never assumed sequential or predictable.
///
/// # Errors
///
/// Returns [`Error::Resource`] if the ephemeral range is exhausted. This is
/// fatal to the session; there is no retry.
pub fn allocate_port() -> Result<PortReservation> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).map_err(Error::Resource)?;
    let port = listener.local_addr().map_err(Error::Resource)?.port();
    Ok(PortReservation {
        port,
        _listener: listener,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn allocates_a_nonzero_port() {
        let reservation = allocate_port().expect("allocation failed");
        assert!(reservation.port() > 0);
    }

    #[test]
    fn held_reservations_never_collide() {
        // Two ports per session, several sessions' worth at once.
        let reservations: Vec<PortReservation> =
            (0..10).map(|_| allocate_port().expect("allocation failed")).collect();

        let distinct: HashSet<u16> = reservations.iter().map(|r| r.port()).collect();
        assert_eq!(distinct.len(), reservations.len());
    }

    #[test]
    fn dropping_the_reservation_releases_the_port() {
        let reservation = allocate_port().expect("allocation failed");
        let port = reservation.port();
        drop(reservation);

        // The port must be bindable again once released.
        TcpListener::bind(("127.0.0.1", port)).expect("port was not released");
    }
}
