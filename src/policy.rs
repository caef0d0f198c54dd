use serde::{Deserialize, Serialize};

use crate::model::Ms;

/// Immutable booking-policy configuration, injected into the engine at
/// construction so tests can pin deterministic policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Guests may cancel a confirmed booking free of charge until this
    /// many days before check-in. Staff cancellations ignore the cutoff.
    pub cancellation_cutoff_days: i64,
    /// Percent of the paid amount refunded when cancelling inside the
    /// cutoff window. Default 0: no graduated schedule configured.
    pub late_cancellation_refund_pct: u32,
    /// Percent of the per-night rate refunded for nights cancelled by an
    /// early checkout.
    pub early_checkout_refund_pct: u32,
    /// How long an unpaid pending booking is held before the sweep
    /// auto-cancels it.
    pub unpaid_grace: Ms,
    /// When set, date-change requests that pass the availability re-check
    /// are applied immediately instead of waiting for staff.
    pub auto_approve_date_changes: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            cancellation_cutoff_days: 30,
            late_cancellation_refund_pct: 0,
            early_checkout_refund_pct: 50,
            unpaid_grace: 24 * 3_600_000,
            auto_approve_date_changes: false,
        }
    }
}

impl PolicyConfig {
    /// Percentages above 100 would mint money on refunds.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.late_cancellation_refund_pct > 100 {
            return Err("late_cancellation_refund_pct must be <= 100");
        }
        if self.early_checkout_refund_pct > 100 {
            return Err("early_checkout_refund_pct must be <= 100");
        }
        if self.cancellation_cutoff_days < 0 {
            return Err("cancellation_cutoff_days must be >= 0");
        }
        if self.unpaid_grace < 0 {
            return Err("unpaid_grace must be >= 0");
        }
        Ok(())
    }
}
