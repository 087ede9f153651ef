//! Delivery Audit Trail
//!
//! Records every message the simulated kernel hands back to a caller, in
//! order, together with the path it took.
//!
//! ## Philosophy
//!
//! - Test-only: this is NOT production logging, it's for test verification
//! - Deterministic: deliveries are recorded in order for reproducible tests
//! - Queryable: tests can assert on who was answered, with what, and how
//!
//! ## Example
//!
//! ```
//! use sim_kernel::delivery_audit::{DeliveryAuditLog, DeliveryRoute};
//! use core_types::CallerId;
//! use ipc::Message;
//!
//! let mut audit_log = DeliveryAuditLog::new();
//! audit_log.record(CallerId::new(1), Message::empty(4), DeliveryRoute::Reply);
//!
//! assert_eq!(audit_log.len(), 1);
//! assert_eq!(audit_log.to_caller(CallerId::new(1)).len(), 1);
//! ```

use core_types::{CallerId, SlotId};
use ipc::Message;

/// How a message reached its caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryRoute {
    /// Plain reply to the current caller
    Reply,
    /// Reply half of a combined reply-then-receive
    ReplyRecv,
    /// One-shot send through a saved caller slot
    Slot(SlotId),
}

/// A single delivered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub caller: CallerId,
    pub message: Message,
    pub route: DeliveryRoute,
}

/// Audit log of deliveries
///
/// A disabled log only counts; long benchmark runs use one so memory stays
/// flat no matter how many replies go out.
#[derive(Debug)]
pub struct DeliveryAuditLog {
    deliveries: Vec<Delivery>,
    enabled: bool,
    total: usize,
}

impl DeliveryAuditLog {
    /// Creates a new empty audit log
    pub fn new() -> Self {
        Self {
            deliveries: Vec::new(),
            enabled: true,
            total: 0,
        }
    }

    /// Creates a log that counts deliveries without keeping them
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Records a delivery
    pub fn record(&mut self, caller: CallerId, message: Message, route: DeliveryRoute) {
        self.total += 1;
        if !self.enabled {
            return;
        }
        self.deliveries.push(Delivery {
            caller,
            message,
            route,
        });
    }

    /// Returns the number of deliveries seen, kept or not
    pub fn total(&self) -> usize {
        self.total
    }

    /// Returns all deliveries in order
    pub fn all(&self) -> &[Delivery] {
        &self.deliveries
    }

    /// Returns deliveries to a specific caller, in order
    pub fn to_caller(&self, caller: CallerId) -> Vec<&Delivery> {
        self.deliveries
            .iter()
            .filter(|d| d.caller == caller)
            .collect()
    }

    /// Returns the position of the first delivery to `caller`
    pub fn position_of_first(&self, caller: CallerId) -> Option<usize> {
        self.deliveries.iter().position(|d| d.caller == caller)
    }

    /// Counts deliveries matching the predicate
    pub fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Delivery) -> bool,
    {
        self.deliveries.iter().filter(|d| predicate(d)).count()
    }

    /// Returns the number of recorded deliveries
    pub fn len(&self) -> usize {
        self.deliveries.len()
    }

    /// Checks if the audit log is empty
    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }
}

impl Default for DeliveryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}
