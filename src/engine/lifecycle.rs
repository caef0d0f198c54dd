use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::RwLock;
use tracing::{debug, info};
use ulid::Ulid;

use crate::model::*;

use super::availability::check_stay;
use super::pricing::quote;
use super::refund;
use super::{Engine, EngineError};

/// Outcome of a cancellation: the closed booking and the refund owed.
#[derive(Debug, Clone)]
pub struct Cancellation {
    pub booking: Booking,
    pub refund_amount: Money,
}

/// Outcome of an early-checkout request. `record` is `None` for dry
/// runs (`confirm = false`) and when no nights were cancelled.
#[derive(Debug, Clone)]
pub struct EarlyCheckoutOutcome {
    pub refund_amount: Money,
    pub record: Option<EarlyCheckoutRecord>,
}

impl Engine {
    // ── Property / room administration ───────────────────────

    pub async fn create_property(&self, id: Ulid, name: Option<String>) -> Result<(), EngineError> {
        if self.properties.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let event = Event::PropertyCreated { id, name: name.clone() };
        self.persist_root(&event).await?;
        self.properties
            .insert(id, Arc::new(RwLock::new(PropertyState::new(id, name))));
        Ok(())
    }

    /// Close the whole property for a date range (renovation, season end).
    pub async fn add_closure(
        &self,
        id: Ulid,
        property_id: Ulid,
        range: DateRange,
    ) -> Result<(), EngineError> {
        if range.start >= range.end {
            return Err(EngineError::InvalidDates("closure range is empty"));
        }
        let ps = self
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(property_id))?;
        let mut guard = ps.write().await;
        let event = Event::ClosureAdded { id, property_id, range };
        self.persist_root(&event).await?;
        guard.insert_closure(Closure { id, range });
        self.closure_to_property.insert(id, property_id);
        Ok(())
    }

    pub async fn remove_closure(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let property_id = self
            .closure_to_property
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(id))?;
        let ps = self
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(property_id))?;
        let mut guard = ps.write().await;
        let event = Event::ClosureRemoved { id, property_id };
        self.persist_root(&event).await?;
        guard.remove_closure(id);
        self.closure_to_property.remove(&id);
        Ok(property_id)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_room(
        &self,
        id: Ulid,
        property_id: Option<Ulid>,
        name: Option<String>,
        price_per_night: Money,
        capacity: u32,
        min_nights: u32,
        max_nights: u32,
    ) -> Result<(), EngineError> {
        if self.rooms.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if let Some(pid) = property_id
            && !self.properties.contains_key(&pid) {
                return Err(EngineError::NotFound(pid));
            }
        validate_room_shape(price_per_night, capacity, min_nights, max_nights)?;

        let event = Event::RoomCreated {
            id,
            property_id,
            name: name.clone(),
            price_per_night,
            capacity,
            min_nights,
            max_nights,
            active: true,
        };
        self.persist_root(&event).await?;
        let rs = RoomState::new(id, property_id, name, price_per_night, capacity, min_nights, max_nights, true);
        self.rooms.insert(id, Arc::new(RwLock::new(rs)));
        if let Some(pid) = property_id {
            self.property_rooms.entry(pid).or_default().push(id);
        }
        Ok(())
    }

    pub async fn update_room(
        &self,
        id: Ulid,
        name: Option<String>,
        price_per_night: Money,
        capacity: u32,
        min_nights: u32,
        max_nights: u32,
    ) -> Result<(), EngineError> {
        validate_room_shape(price_per_night, capacity, min_nights, max_nights)?;
        let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        let event = Event::RoomUpdated { id, name, price_per_night, capacity, min_nights, max_nights };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Retire or reopen a room. Existing bookings are untouched; new
    /// stays on an inactive room are refused by the availability check.
    pub async fn set_room_active(&self, id: Ulid, active: bool) -> Result<(), EngineError> {
        let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        let event = Event::RoomActiveSet { id, active };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── Booking lifecycle ────────────────────────────────────

    /// Create a booking in `pending`. The availability check runs again
    /// under the room's write lock, so of two racing requests for
    /// overlapping dates exactly one succeeds — the loser gets
    /// `RoomUnavailable` and must re-quote; there is no automatic retry.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_booking(
        &self,
        id: Ulid,
        room_id: Ulid,
        guest_id: Option<Ulid>,
        check_in: NaiveDate,
        check_out: NaiveDate,
        guests: u32,
        promo_code: Option<&str>,
        metadata: serde_json::Value,
    ) -> Result<Booking, EngineError> {
        if self.booking_to_room.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        // Resolve the promo before taking the room lock; a dead code is
        // not an error, it just prices without discount.
        let resolved = match promo_code {
            Some(code) => self.promos.resolve(code).await.map(|d| (code, d)),
            None => None,
        };

        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        let closures = self.collect_closures(guard.property_id).await;
        let today = self.clock.today();

        check_stay(&guard, &closures, today, check_in, check_out, guests, None).into_result()?;
        let stay = DateRange::new(check_in, check_out);

        let promo = resolved
            .as_ref()
            .filter(|(_, d)| d.active_on(today))
            .map(|(code, d)| (*code, d));
        let price = quote(guard.price_per_night, &stay, promo);

        let booking = Booking {
            id,
            room_id,
            guest_id,
            stay,
            guests,
            status: BookingStatus::Pending,
            total_price: price.total,
            metadata: metadata.to_string(),
            created_at: self.clock.now_ms(),
            confirmed_at: None,
            cancelled_at: None,
            cancel_reason: None,
            refund_amount: None,
            payment_id: None,
        };
        let event = Event::BookingCreated { booking: booking.clone() };
        self.persist_and_apply(&mut guard, &event).await?;

        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
        info!(booking = %id, room = %room_id, nights = stay.nights(), total = price.total, "booking created");
        Ok(booking)
    }

    /// The guest opened a payment flow; the room stays blocked while the
    /// gateway settles.
    pub async fn mark_payment_pending(&self, id: Ulid) -> Result<Booking, EngineError> {
        let (room_id, mut guard) = self.resolve_booking_write(&id).await?;
        let status = booking_status(&guard, id)?;
        if status != BookingStatus::Pending {
            return Err(EngineError::IllegalTransition { from: status, action: "start payment for" });
        }
        let event = Event::PaymentPendingMarked { booking_id: id, room_id, at: self.clock.now_ms() };
        self.persist_and_apply(&mut guard, &event).await?;
        cloned_booking(&guard, id)
    }

    pub async fn confirm_booking(&self, id: Ulid, staff_id: Ulid) -> Result<Booking, EngineError> {
        let (room_id, mut guard) = self.resolve_booking_write(&id).await?;
        let status = booking_status(&guard, id)?;
        if !matches!(status, BookingStatus::Pending | BookingStatus::PaymentPending) {
            return Err(EngineError::IllegalTransition { from: status, action: "confirm" });
        }
        let event = Event::BookingConfirmed {
            booking_id: id,
            room_id,
            staff_id,
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(booking = %id, staff = %staff_id, "booking confirmed");
        cloned_booking(&guard, id)
    }

    /// Staff rejection. Refunds the full paid amount when the gateway
    /// reports a completed payment.
    pub async fn reject_booking(
        &self,
        id: Ulid,
        staff_id: Ulid,
        reason: &str,
    ) -> Result<Booking, EngineError> {
        if reason.trim().is_empty() {
            return Err(EngineError::InvalidInput("rejection requires a reason"));
        }
        let (room_id, mut guard) = self.resolve_booking_write(&id).await?;
        let status = booking_status(&guard, id)?;
        if !matches!(status, BookingStatus::Pending | BookingStatus::PaymentPending) {
            return Err(EngineError::IllegalTransition { from: status, action: "reject" });
        }
        let total = cloned_booking(&guard, id)?.total_price;
        let refund = if self.payments.has_completed_payment(id).await {
            total
        } else {
            0
        };
        let event = Event::BookingRejected {
            booking_id: id,
            room_id,
            staff_id,
            reason: reason.to_string(),
            refund,
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(booking = %id, staff = %staff_id, refund, "booking rejected");
        cloned_booking(&guard, id)
    }

    /// Time-triggered: the stay begins. Run in bulk by the sweep.
    pub async fn activate_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let (room_id, mut guard) = self.resolve_booking_write(&id).await?;
        let status = booking_status(&guard, id)?;
        if status != BookingStatus::Confirmed {
            return Err(EngineError::IllegalTransition { from: status, action: "activate" });
        }
        let check_in = cloned_booking(&guard, id)?.stay.start;
        if check_in > self.clock.today() {
            return Err(EngineError::InvalidDates("check-in date has not arrived"));
        }
        let event = Event::BookingActivated { booking_id: id, room_id };
        self.persist_and_apply(&mut guard, &event).await?;
        cloned_booking(&guard, id)
    }

    /// Time-triggered: the stay is over. Run in bulk by the sweep.
    pub async fn complete_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let (room_id, mut guard) = self.resolve_booking_write(&id).await?;
        let status = booking_status(&guard, id)?;
        if status != BookingStatus::Active {
            return Err(EngineError::IllegalTransition { from: status, action: "complete" });
        }
        let check_out = cloned_booking(&guard, id)?.stay.end;
        if check_out > self.clock.today() {
            return Err(EngineError::InvalidDates("check-out date has not arrived"));
        }
        let event = Event::BookingCompleted { booking_id: id, room_id };
        self.persist_and_apply(&mut guard, &event).await?;
        cloned_booking(&guard, id)
    }

    /// Guest or staff cancellation. The refund is computed first (pure,
    /// retry-safe) and applied with the status change in one write.
    pub async fn cancel_booking(
        &self,
        id: Ulid,
        actor: CancelActor,
        reason: &str,
        refund_requested: bool,
    ) -> Result<Cancellation, EngineError> {
        let (room_id, mut guard) = self.resolve_booking_write(&id).await?;
        let booking = cloned_booking(&guard, id)?;
        let today = self.clock.today();
        refund::can_cancel(&booking, &actor, today, &self.policy)?;

        let paid = if self.payments.has_completed_payment(id).await {
            booking.total_price
        } else {
            0
        };
        let refund = if refund_requested {
            refund::cancellation_refund(&booking, paid, today, &self.policy)
        } else {
            0
        };

        let event = Event::BookingCancelled {
            booking_id: id,
            room_id,
            actor,
            reason: reason.to_string(),
            refund,
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(booking = %id, refund, "booking cancelled");
        Ok(Cancellation {
            booking: cloned_booking(&guard, id)?,
            refund_amount: refund,
        })
    }

    /// Sweep helper: cancel a pending booking whose grace period ran out
    /// without a completed payment. `Ok(None)` means the booking is not
    /// (or no longer) due — still inside grace, or paid after all.
    pub async fn auto_cancel_unpaid(&self, id: Ulid) -> Result<Option<Booking>, EngineError> {
        let (room_id, mut guard) = self.resolve_booking_write(&id).await?;
        let status = booking_status(&guard, id)?;
        if status != BookingStatus::Pending {
            return Err(EngineError::IllegalTransition { from: status, action: "auto-cancel" });
        }
        let booking = cloned_booking(&guard, id)?;
        let now = self.clock.now_ms();
        if now - booking.created_at < self.policy.unpaid_grace {
            return Ok(None);
        }
        if self.payments.has_completed_payment(id).await {
            return Ok(None);
        }

        let event = Event::BookingCancelled {
            booking_id: id,
            room_id,
            actor: CancelActor::System,
            reason: "payment not received within grace period".to_string(),
            refund: 0,
            at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        debug!(booking = %id, "auto-cancelled unpaid booking");
        Ok(Some(cloned_booking(&guard, id)?))
    }

    // ── Date changes ─────────────────────────────────────────

    /// Record a request to move the booking to a new stay interval. The
    /// new interval must be available (the booking's own dates don't
    /// count against it). The request is applied immediately only when
    /// policy auto-approval is on; otherwise staff resolve it.
    pub async fn request_date_change(
        &self,
        booking_id: Ulid,
        new_check_in: NaiveDate,
        new_check_out: NaiveDate,
        reason: &str,
        requested_by: Option<Ulid>,
    ) -> Result<DateChangeRequest, EngineError> {
        let (room_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let booking = cloned_booking(&guard, booking_id)?;
        if !matches!(booking.status, BookingStatus::Pending | BookingStatus::Confirmed) {
            return Err(EngineError::IllegalTransition {
                from: booking.status,
                action: "change dates of",
            });
        }

        let closures = self.collect_closures(guard.property_id).await;
        let today = self.clock.today();
        check_stay(
            &guard,
            &closures,
            today,
            new_check_in,
            new_check_out,
            booking.guests,
            Some(booking_id),
        )
        .into_result()?;

        let proposed = DateRange::new(new_check_in, new_check_out);
        let new_total = quote(guard.price_per_night, &proposed, None).total;
        let mut request = DateChangeRequest {
            id: Ulid::new(),
            booking_id,
            room_id,
            current: booking.stay,
            proposed,
            price_difference: new_total - booking.total_price,
            status: ApprovalStatus::Pending,
            reason: reason.to_string(),
            requested_by,
            requested_at: self.clock.now_ms(),
        };
        let event = Event::DateChangeRequested { request: request.clone() };
        self.persist_and_apply(&mut guard, &event).await?;

        if self.policy.auto_approve_date_changes {
            let event = Event::DateChangeApproved {
                request_id: request.id,
                booking_id,
                room_id,
                stay: proposed,
                total_price: new_total,
                at: self.clock.now_ms(),
            };
            self.persist_and_apply(&mut guard, &event).await?;
            request.status = ApprovalStatus::Approved;
            info!(booking = %booking_id, request = %request.id, "date change auto-approved");
        }

        Ok(request)
    }

    /// Staff resolution of a pending date-change request. Approval
    /// re-checks availability against the current calendar before
    /// applying the recorded interval and price.
    pub async fn resolve_date_change(
        &self,
        request_id: Ulid,
        staff_id: Ulid,
        approve: bool,
    ) -> Result<DateChangeRequest, EngineError> {
        let request = self
            .date_changes
            .get(&request_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(request_id))?;
        if request.status != ApprovalStatus::Pending {
            return Err(EngineError::Conflict(request_id));
        }

        let (room_id, mut guard) = self.resolve_booking_write(&request.booking_id).await?;
        // Re-read under the room lock: request mutations are serialized
        // by it, so a concurrent resolver may have won the race.
        let current = self.date_changes.get(&request_id).map(|e| e.value().status);
        if current != Some(ApprovalStatus::Pending) {
            return Err(EngineError::Conflict(request_id));
        }
        let booking = cloned_booking(&guard, request.booking_id)?;

        if approve {
            if !matches!(booking.status, BookingStatus::Pending | BookingStatus::Confirmed) {
                return Err(EngineError::Conflict(request_id));
            }
            let closures = self.collect_closures(guard.property_id).await;
            let today = self.clock.today();
            check_stay(
                &guard,
                &closures,
                today,
                request.proposed.start,
                request.proposed.end,
                booking.guests,
                Some(request.booking_id),
            )
            .into_result()?;

            let event = Event::DateChangeApproved {
                request_id,
                booking_id: request.booking_id,
                room_id,
                stay: request.proposed,
                total_price: booking.total_price + request.price_difference,
                at: self.clock.now_ms(),
            };
            self.persist_and_apply(&mut guard, &event).await?;
        } else {
            let event = Event::DateChangeRejected {
                request_id,
                booking_id: request.booking_id,
                room_id,
                at: self.clock.now_ms(),
            };
            self.persist_and_apply(&mut guard, &event).await?;
        }

        info!(request = %request_id, staff = %staff_id, approve, "date change resolved");
        self.date_changes
            .get(&request_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(request_id))
    }

    /// Sweep housekeeping: reject a pending request whose booking has
    /// already reached a terminal status. Returns whether it acted.
    pub(crate) async fn expire_orphaned_date_change(
        &self,
        request_id: Ulid,
    ) -> Result<bool, EngineError> {
        let request = self
            .date_changes
            .get(&request_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(request_id))?;
        if request.status != ApprovalStatus::Pending {
            return Ok(false);
        }
        let (room_id, mut guard) = self.resolve_booking_write(&request.booking_id).await?;
        let current = self.date_changes.get(&request_id).map(|e| e.value().status);
        if current != Some(ApprovalStatus::Pending) {
            return Ok(false);
        }
        let booking = cloned_booking(&guard, request.booking_id)?;
        if !booking.status.is_terminal() {
            return Ok(false);
        }
        let event = Event::DateChangeRejected {
            request_id,
            booking_id: request.booking_id,
            room_id,
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(true)
    }

    // ── Early checkout ───────────────────────────────────────

    /// Compute (and with `confirm` apply) an early checkout: the stay is
    /// shortened to `new_check_out`, the cancelled nights are refunded at
    /// the policy percentage. The booking stays `active`.
    pub async fn apply_early_checkout(
        &self,
        booking_id: Ulid,
        new_check_out: NaiveDate,
        reason: &str,
        confirm: bool,
    ) -> Result<EarlyCheckoutOutcome, EngineError> {
        let (room_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let booking = cloned_booking(&guard, booking_id)?;
        if booking.status != BookingStatus::Active {
            return Err(EngineError::IllegalTransition {
                from: booking.status,
                action: "check out early from",
            });
        }

        let today = self.clock.today();
        if new_check_out < today {
            return Err(EngineError::InvalidDates("new check-out is in the past"));
        }
        if new_check_out > booking.stay.end {
            return Err(EngineError::InvalidDates("new check-out is after the booked check-out"));
        }
        if new_check_out <= booking.stay.start {
            return Err(EngineError::InvalidDates("new check-out must be after check-in"));
        }

        let nights_cancelled = (booking.stay.end - new_check_out).num_days();
        let refund =
            refund::early_checkout_refund(guard.price_per_night, nights_cancelled, &self.policy);

        if !confirm || nights_cancelled == 0 {
            return Ok(EarlyCheckoutOutcome { refund_amount: refund, record: None });
        }

        let record = EarlyCheckoutRecord {
            id: Ulid::new(),
            booking_id,
            room_id,
            original_check_out: booking.stay.end,
            new_check_out,
            nights_cancelled,
            refund_amount: refund,
            reason: reason.to_string(),
            applied_at: self.clock.now_ms(),
        };
        let event = Event::EarlyCheckoutApplied {
            record: record.clone(),
            booking_refund_total: booking.refund_amount.unwrap_or(0) + refund,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(booking = %booking_id, nights = nights_cancelled, refund, "early checkout applied");
        Ok(EarlyCheckoutOutcome { refund_amount: refund, record: Some(record) })
    }
}

fn validate_room_shape(
    price_per_night: Money,
    capacity: u32,
    min_nights: u32,
    max_nights: u32,
) -> Result<(), EngineError> {
    if price_per_night < 0 {
        return Err(EngineError::InvalidInput("price_per_night must be >= 0"));
    }
    if capacity == 0 {
        return Err(EngineError::InvalidInput("capacity must be >= 1"));
    }
    if min_nights == 0 || min_nights > max_nights {
        return Err(EngineError::InvalidInput("night bounds must satisfy 1 <= min <= max"));
    }
    Ok(())
}

fn booking_status(rs: &RoomState, id: Ulid) -> Result<BookingStatus, EngineError> {
    rs.booking(id)
        .map(|b| b.status)
        .ok_or(EngineError::NotFound(id))
}

fn cloned_booking(rs: &RoomState, id: Ulid) -> Result<Booking, EngineError> {
    rs.booking(id).cloned().ok_or(EngineError::NotFound(id))
}
