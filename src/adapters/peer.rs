//! Control-peer link watchdog.
//!
//! The transport layer calls [`PeerLink::note_contact`] whenever the
//! client node talks to us.  The link reads as connected until
//! `timeout_ms` passes without contact, so a stalled connection demotes
//! the controller to `Idle` instead of hanging it in `Working`.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use log::{info, warn};

use crate::app::ports::{Clock, PeerPort};

pub struct PeerLink<C: Clock> {
    clock: C,
    timeout_ms: u32,
    last_contact_ms: AtomicU32,
    /// No contact yet since boot.
    seen: AtomicBool,
    /// Last reported state, for edge logging only.
    reported: AtomicBool,
}

impl<C: Clock> PeerLink<C> {
    pub fn new(clock: C, timeout_ms: u32) -> Self {
        Self {
            clock,
            timeout_ms,
            last_contact_ms: AtomicU32::new(0),
            seen: AtomicBool::new(false),
            reported: AtomicBool::new(false),
        }
    }

    /// Record traffic from the peer.
    pub fn note_contact(&self) {
        self.last_contact_ms
            .store(self.clock.now_ms(), Ordering::Release);
        self.seen.store(true, Ordering::Release);
    }

    /// Drop the link immediately (transport closed the socket).
    pub fn disconnect(&self) {
        self.seen.store(false, Ordering::Release);
    }

    fn connected_at(&self, now_ms: u32) -> bool {
        if !self.seen.load(Ordering::Acquire) {
            return false;
        }
        let last = self.last_contact_ms.load(Ordering::Acquire);
        now_ms.wrapping_sub(last) < self.timeout_ms
    }
}

impl<C: Clock> PeerPort for PeerLink<C> {
    fn is_connected(&self) -> bool {
        let connected = self.connected_at(self.clock.now_ms());
        if self.reported.swap(connected, Ordering::Relaxed) != connected {
            if connected {
                info!(target: "peer", "control peer connected");
            } else {
                warn!(target: "peer", "control peer lost");
            }
        }
        connected
    }
}
