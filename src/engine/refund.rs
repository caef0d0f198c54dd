use chrono::NaiveDate;

use crate::model::{Booking, BookingStatus, CancelActor, Money};
use crate::policy::PolicyConfig;

use super::EngineError;

/// Half-up percentage of an amount. The single rounding step in every
/// refund computation.
pub fn pct_of(amount: Money, pct: u32) -> Money {
    (amount * pct as i64 + 50) / 100
}

/// May this booking be cancelled at all, and by this actor?
///
/// Terminal bookings and in-house stays are never cancellable. Pending
/// bookings are always cancellable. Confirmed bookings inside the cutoff
/// window require a staff (or system) actor.
pub fn can_cancel(
    booking: &Booking,
    actor: &CancelActor,
    today: NaiveDate,
    policy: &PolicyConfig,
) -> Result<(), EngineError> {
    match booking.status {
        BookingStatus::Pending => Ok(()),
        BookingStatus::Confirmed => {
            if actor.overrides_cutoff() {
                return Ok(());
            }
            let days_until_check_in = (booking.stay.start - today).num_days();
            if days_until_check_in < policy.cancellation_cutoff_days {
                Err(EngineError::CancellationNotAllowed(
                    "check-in is within the cancellation cutoff",
                ))
            } else {
                Ok(())
            }
        }
        BookingStatus::PaymentPending | BookingStatus::Active => {
            Err(EngineError::CancellationNotAllowed(
                "booking is not in a cancellable status",
            ))
        }
        BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::Rejected => {
            Err(EngineError::CancellationNotAllowed("booking is already closed"))
        }
    }
}

/// Refund for a full cancellation: everything paid when cancelled before
/// the cutoff, the policy's late percentage (default 0) inside it.
pub fn cancellation_refund(
    booking: &Booking,
    paid: Money,
    today: NaiveDate,
    policy: &PolicyConfig,
) -> Money {
    if paid <= 0 {
        return 0;
    }
    let days_until_check_in = (booking.stay.start - today).num_days();
    if days_until_check_in >= policy.cancellation_cutoff_days {
        paid
    } else {
        pct_of(paid, policy.late_cancellation_refund_pct)
    }
}

/// Refund for an early checkout: the cancelled nights at the room rate,
/// scaled by the policy percentage.
pub fn early_checkout_refund(
    nightly_rate: Money,
    nights_cancelled: i64,
    policy: &PolicyConfig,
) -> Money {
    if nights_cancelled <= 0 {
        return 0;
    }
    pct_of(nightly_rate * nights_cancelled, policy.early_checkout_refund_pct)
}
