mod availability;
mod error;
mod lifecycle;
mod pricing;
mod queries;
mod refund;

pub use availability::{
    check_stay, free_ranges, merge_ranges, subtract_ranges, AvailabilityResult, DenialReason,
};
pub use error::EngineError;
pub use lifecycle::{Cancellation, EarlyCheckoutOutcome};
pub use pricing::{quote, AppliedDiscount, PriceQuote};
pub use refund::{can_cancel, cancellation_refund, early_checkout_refund, pct_of};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::clock::Clock;
use crate::collaborators::{PaymentLookup, PromoResolver};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::policy::PolicyConfig;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;
pub type SharedPropertyState = Arc<RwLock<PropertyState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(crate) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The booking engine. One per deployment; rooms are the unit of locking,
/// the WAL is the unit of durability.
pub struct Engine {
    pub(crate) rooms: DashMap<Ulid, SharedRoomState>,
    pub(crate) properties: DashMap<Ulid, SharedPropertyState>,
    /// Reverse lookup: booking id → room id.
    pub(crate) booking_to_room: DashMap<Ulid, Ulid>,
    /// Reverse lookup: closure id → property id.
    pub(crate) closure_to_property: DashMap<Ulid, Ulid>,
    /// Property → rooms index for closure fan-out.
    pub(crate) property_rooms: DashMap<Ulid, Vec<Ulid>>,
    pub(crate) date_changes: DashMap<Ulid, DateChangeRequest>,
    pub(crate) early_checkouts: DashMap<Ulid, EarlyCheckoutRecord>,
    pub(crate) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(crate) policy: PolicyConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) payments: Arc<dyn PaymentLookup>,
    pub(crate) promos: Arc<dyn PromoResolver>,
}

/// Apply an event directly to a RoomState (no locking — caller holds the lock).
fn apply_to_room(rs: &mut RoomState, event: &Event) {
    match event {
        Event::BookingCreated { booking } => {
            rs.insert_booking(booking.clone());
        }
        Event::PaymentPendingMarked { booking_id, .. } => {
            if let Some(b) = rs.booking_mut(*booking_id) {
                b.status = BookingStatus::PaymentPending;
            }
        }
        Event::BookingConfirmed { booking_id, at, .. } => {
            if let Some(b) = rs.booking_mut(*booking_id) {
                b.status = BookingStatus::Confirmed;
                b.confirmed_at = Some(*at);
            }
        }
        Event::BookingRejected { booking_id, reason, refund, at, .. } => {
            if let Some(b) = rs.booking_mut(*booking_id) {
                b.status = BookingStatus::Rejected;
                b.cancelled_at = Some(*at);
                b.cancel_reason = Some(reason.clone());
                b.refund_amount = Some(*refund);
            }
        }
        Event::BookingActivated { booking_id, .. } => {
            if let Some(b) = rs.booking_mut(*booking_id) {
                b.status = BookingStatus::Active;
            }
        }
        Event::BookingCompleted { booking_id, .. } => {
            if let Some(b) = rs.booking_mut(*booking_id) {
                b.status = BookingStatus::Completed;
            }
        }
        Event::BookingCancelled { booking_id, reason, refund, at, .. } => {
            if let Some(b) = rs.booking_mut(*booking_id) {
                b.status = BookingStatus::Cancelled;
                b.cancelled_at = Some(*at);
                b.cancel_reason = Some(reason.clone());
                b.refund_amount = Some(*refund);
            }
        }
        Event::DateChangeApproved { booking_id, stay, total_price, .. } => {
            // Remove + reinsert keeps the by-check-in sort order intact.
            if let Some(mut b) = rs.remove_booking(*booking_id) {
                b.stay = *stay;
                b.total_price = *total_price;
                rs.insert_booking(b);
            }
        }
        Event::EarlyCheckoutApplied { record, booking_refund_total } => {
            if let Some(b) = rs.booking_mut(record.booking_id) {
                b.stay.end = record.new_check_out;
                b.refund_amount = Some(*booking_refund_total);
            }
        }
        Event::RoomUpdated { name, price_per_night, capacity, min_nights, max_nights, .. } => {
            rs.name = name.clone();
            rs.price_per_night = *price_per_night;
            rs.capacity = *capacity;
            rs.min_nights = *min_nights;
            rs.max_nights = *max_nights;
        }
        Event::RoomActiveSet { active, .. } => {
            rs.active = *active;
        }
        Event::DateChangeRequested { .. } | Event::DateChangeRejected { .. } => {
            // Request bookkeeping lives in the engine-level map.
        }
        // Creation/property events are handled at the map level, not here
        Event::RoomCreated { .. }
        | Event::PropertyCreated { .. }
        | Event::ClosureAdded { .. }
        | Event::ClosureRemoved { .. } => {}
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        policy: PolicyConfig,
        clock: Arc<dyn Clock>,
        payments: Arc<dyn PaymentLookup>,
        promos: Arc<dyn PromoResolver>,
    ) -> io::Result<Self> {
        policy
            .validate()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            properties: DashMap::new(),
            booking_to_room: DashMap::new(),
            closure_to_property: DashMap::new(),
            property_rooms: DashMap::new(),
            date_changes: DashMap::new(),
            early_checkouts: DashMap::new(),
            wal_tx,
            notify,
            policy,
            clock,
            payments,
            promos,
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context.
        for event in &events {
            match event {
                Event::PropertyCreated { id, name } => {
                    let ps = PropertyState::new(*id, name.clone());
                    engine.properties.insert(*id, Arc::new(RwLock::new(ps)));
                }
                Event::ClosureAdded { id, property_id, range } => {
                    if let Some(entry) = engine.properties.get(property_id) {
                        let ps = entry.value().clone();
                        let mut guard = ps.try_write().expect("replay: uncontended write");
                        guard.insert_closure(Closure { id: *id, range: *range });
                        engine.closure_to_property.insert(*id, *property_id);
                    }
                }
                Event::ClosureRemoved { id, property_id } => {
                    if let Some(entry) = engine.properties.get(property_id) {
                        let ps = entry.value().clone();
                        let mut guard = ps.try_write().expect("replay: uncontended write");
                        guard.remove_closure(*id);
                        engine.closure_to_property.remove(id);
                    }
                }
                Event::RoomCreated {
                    id,
                    property_id,
                    name,
                    price_per_night,
                    capacity,
                    min_nights,
                    max_nights,
                    active,
                } => {
                    let rs = RoomState::new(
                        *id,
                        *property_id,
                        name.clone(),
                        *price_per_night,
                        *capacity,
                        *min_nights,
                        *max_nights,
                        *active,
                    );
                    engine.rooms.insert(*id, Arc::new(RwLock::new(rs)));
                    if let Some(pid) = property_id {
                        engine.property_rooms.entry(*pid).or_default().push(*id);
                    }
                }
                other => {
                    if let Some(room_id) = other.room_id()
                        && let Some(entry) = engine.rooms.get(&room_id) {
                            let rs_arc = entry.value().clone();
                            let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                            apply_to_room(&mut guard, other);
                            engine.index_event(other);
                        }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(crate) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn get_property(&self, id: &Ulid) -> Option<SharedPropertyState> {
        self.properties.get(id).map(|e| e.value().clone())
    }

    pub fn room_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_room.get(booking_id).map(|e| *e.value())
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    /// Update the engine-level indexes (booking → room, request and
    /// early-checkout maps) for an event. Shared by replay and live writes.
    fn index_event(&self, event: &Event) {
        match event {
            Event::BookingCreated { booking } => {
                self.booking_to_room.insert(booking.id, booking.room_id);
            }
            Event::DateChangeRequested { request } => {
                self.date_changes.insert(request.id, request.clone());
            }
            Event::DateChangeApproved { request_id, .. } => {
                if let Some(mut req) = self.date_changes.get_mut(request_id) {
                    req.status = ApprovalStatus::Approved;
                }
            }
            Event::DateChangeRejected { request_id, .. } => {
                if let Some(mut req) = self.date_changes.get_mut(request_id) {
                    req.status = ApprovalStatus::Rejected;
                }
            }
            Event::EarlyCheckoutApplied { record, .. } => {
                self.early_checkouts.insert(record.id, record.clone());
            }
            _ => {}
        }
    }

    /// WAL-append + apply + index + notify in one call.
    pub(crate) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event);
        self.index_event(event);
        metrics::counter!(
            crate::observability::EVENTS_TOTAL,
            "event" => crate::observability::event_label(event)
        )
        .increment(1);
        self.notify.send(event);
        Ok(())
    }

    /// WAL-append + index + notify for property-level events; the caller
    /// updates the property/room maps itself.
    pub(crate) async fn persist_root(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.index_event(event);
        metrics::counter!(
            crate::observability::EVENTS_TOTAL,
            "event" => crate::observability::event_label(event)
        )
        .increment(1);
        self.notify.send(event);
        Ok(())
    }

    /// Lookup booking → room, get room, acquire write lock.
    pub(crate) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<RoomState>), EngineError> {
        let room_id = self
            .room_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.write_owned().await;
        Ok((room_id, guard))
    }

    /// Closure ranges of the room's owning property. Empty when the room
    /// is standalone.
    pub(crate) async fn collect_closures(&self, property_id: Option<Ulid>) -> Vec<DateRange> {
        let Some(pid) = property_id else {
            return Vec::new();
        };
        let Some(ps) = self.get_property(&pid) else {
            return Vec::new();
        };
        let guard = ps.read().await;
        guard.closures.iter().map(|c| c.range).collect()
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for entry in self.properties.iter() {
            let ps = entry.value().clone();
            let guard = ps.try_read().expect("compact: uncontended read");
            events.push(Event::PropertyCreated {
                id: guard.id,
                name: guard.name.clone(),
            });
            for closure in &guard.closures {
                events.push(Event::ClosureAdded {
                    id: closure.id,
                    property_id: guard.id,
                    range: closure.range,
                });
            }
        }

        for entry in self.rooms.iter() {
            let rs = entry.value().clone();
            let guard = rs.try_read().expect("compact: uncontended read");
            events.push(Event::RoomCreated {
                id: guard.id,
                property_id: guard.property_id,
                name: guard.name.clone(),
                price_per_night: guard.price_per_night,
                capacity: guard.capacity,
                min_nights: guard.min_nights,
                max_nights: guard.max_nights,
                active: guard.active,
            });
            for booking in &guard.bookings {
                events.push(Event::BookingCreated {
                    booking: booking.clone(),
                });
            }
        }

        for entry in self.date_changes.iter() {
            events.push(Event::DateChangeRequested {
                request: entry.value().clone(),
            });
        }

        // Re-emit early-checkout records oldest-first per booking so the
        // replayed refund totals land on the latest value.
        let mut records: Vec<EarlyCheckoutRecord> =
            self.early_checkouts.iter().map(|e| e.value().clone()).collect();
        records.sort_by_key(|r| (r.booking_id, r.applied_at));
        let mut running: std::collections::HashMap<Ulid, Money> = std::collections::HashMap::new();
        for record in records {
            let total = running.entry(record.booking_id).or_insert(0);
            *total += record.refund_amount;
            let booking_refund_total = *total;
            events.push(Event::EarlyCheckoutApplied { record, booking_refund_total });
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
