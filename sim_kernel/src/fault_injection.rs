//! Deterministic fault injection for testing
//!
//! This module lets tests make the simulated kernel fail at a chosen point:
//! run the slot allocator dry, refuse to save a caller, or break the
//! transport on a receive.
//!
//! ## Design Philosophy
//!
//! - **Deterministic**: faults trigger on the n-th operation, never randomly
//! - **Composable**: a plan can combine several faults
//! - **Test-focused**: not intended for production use
//!
//! ## Example
//!
//! ```
//! use sim_kernel::fault_injection::FaultPlan;
//!
//! let plan = FaultPlan::new()
//!     .with_slot_limit(2)
//!     .with_save_caller_failure_on(3);
//! assert_eq!(plan.slot_limit(), Some(2));
//! ```

/// A plan describing all faults to inject
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultPlan {
    /// Maximum number of slots allocated at once
    slot_limit: Option<usize>,
    /// Fail the n-th save-caller operation (1-based)
    fail_save_caller_on: Option<usize>,
    /// Fail the n-th receive operation (1-based)
    fail_receive_on: Option<usize>,
}

impl FaultPlan {
    /// Creates a new empty fault plan
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the number of simultaneously allocated slots
    pub fn with_slot_limit(mut self, limit: usize) -> Self {
        self.slot_limit = Some(limit);
        self
    }

    /// Makes the n-th save-caller operation fail
    pub fn with_save_caller_failure_on(mut self, nth: usize) -> Self {
        self.fail_save_caller_on = Some(nth);
        self
    }

    /// Makes the n-th receive (plain or combined) fail
    pub fn with_receive_failure_on(mut self, nth: usize) -> Self {
        self.fail_receive_on = Some(nth);
        self
    }

    /// Returns the slot limit, if any
    pub fn slot_limit(&self) -> Option<usize> {
        self.slot_limit
    }
}

/// Fault injector that applies a plan to kernel operations
#[derive(Debug)]
pub struct FaultInjector {
    plan: FaultPlan,
    save_caller_calls: usize,
    receive_calls: usize,
}

impl FaultInjector {
    /// Creates a new fault injector with the given plan
    pub fn new(plan: FaultPlan) -> Self {
        Self {
            plan,
            save_caller_calls: 0,
            receive_calls: 0,
        }
    }

    /// Returns the plan in force
    pub fn plan(&self) -> &FaultPlan {
        &self.plan
    }

    /// Counts a save-caller operation; returns true if it must fail
    pub fn should_fail_save_caller(&mut self) -> bool {
        self.save_caller_calls += 1;
        self.plan.fail_save_caller_on == Some(self.save_caller_calls)
    }

    /// Counts a receive operation; returns true if it must fail
    pub fn should_fail_receive(&mut self) -> bool {
        self.receive_calls += 1;
        self.plan.fail_receive_on == Some(self.receive_calls)
    }

    /// Returns whether allocating one more slot would exceed the plan
    pub fn slot_limit_reached(&self, in_use: usize) -> bool {
        matches!(self.plan.slot_limit, Some(limit) if in_use >= limit)
    }
}
