use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only timestamp type.
pub type Ms = i64;

/// Minor currency units (cents) — the only money type.
pub type Money = i64;

/// Half-open calendar interval `[start, end)`: a guest checking out on
/// `end` does not conflict with a guest checking in on `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start < end, "DateRange start must be before end");
        Self { start, end }
    }

    /// Returns `None` for empty or inverted ranges.
    pub fn try_new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_date(&self, d: NaiveDate) -> bool {
        self.start <= d && d < self.end
    }

    /// Iterate the nights of the stay: every date in `[start, end)`.
    pub fn iter_dates(self) -> impl Iterator<Item = NaiveDate> {
        let mut d = self.start;
        std::iter::from_fn(move || {
            if d < self.end {
                let out = d;
                d = d.succ_opt().expect("date overflow");
                Some(out)
            } else {
                None
            }
        })
    }
}

/// Canonical booking status. Closed set — every transition matches
/// exhaustively on this, so an illegal state cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    PaymentPending,
    Confirmed,
    Active,
    Completed,
    Cancelled,
    Rejected,
}

impl BookingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::Rejected
        )
    }

    /// Non-terminal statuses still occupy the room's calendar.
    pub fn blocks_calendar(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::PaymentPending => "payment_pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Active => "active",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who asked for a cancellation. Staff may override the cutoff policy;
/// the system actor is used by the scheduled sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelActor {
    Guest(Option<Ulid>),
    Staff(Ulid),
    System,
}

impl CancelActor {
    pub fn overrides_cutoff(&self) -> bool {
        matches!(self, CancelActor::Staff(_) | CancelActor::System)
    }
}

/// A reservation of one room for a contiguous night range.
/// Never deleted: terminal bookings are retained for audit and receipts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub guest_id: Option<Ulid>,
    pub stay: DateRange,
    pub guests: u32,
    pub status: BookingStatus,
    pub total_price: Money,
    /// Opaque JSON document supplied by the caller (channel, notes, …).
    pub metadata: String,
    pub created_at: Ms,
    pub confirmed_at: Option<Ms>,
    pub cancelled_at: Option<Ms>,
    pub cancel_reason: Option<String>,
    pub refund_amount: Option<Money>,
    pub payment_id: Option<Ulid>,
}

/// Percentage or fixed-amount promotion, optionally windowed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discount {
    pub kind: DiscountKind,
    pub valid_from: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscountKind {
    /// Whole percent off the subtotal.
    Percentage(u32),
    /// Fixed amount off, capped at the subtotal.
    Fixed(Money),
}

impl Discount {
    pub fn percentage(pct: u32) -> Self {
        Self { kind: DiscountKind::Percentage(pct), valid_from: None, valid_until: None }
    }

    pub fn fixed(amount: Money) -> Self {
        Self { kind: DiscountKind::Fixed(amount), valid_from: None, valid_until: None }
    }

    pub fn active_on(&self, date: NaiveDate) -> bool {
        self.valid_from.is_none_or(|from| from <= date)
            && self.valid_until.is_none_or(|until| date <= until)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// A proposed move of a booking to a new stay interval. Recorded rather
/// than applied immediately; resolved by staff or by policy auto-approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateChangeRequest {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub room_id: Ulid,
    pub current: DateRange,
    pub proposed: DateRange,
    /// Positive: additional payment owed. Negative: partial refund due.
    pub price_difference: Money,
    pub status: ApprovalStatus,
    pub reason: String,
    pub requested_by: Option<Ulid>,
    pub requested_at: Ms,
}

/// One early-checkout action: the booking's check-out was reduced and a
/// refund for the cancelled nights was computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarlyCheckoutRecord {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub room_id: Ulid,
    pub original_check_out: NaiveDate,
    pub new_check_out: NaiveDate,
    pub nights_cancelled: i64,
    pub refund_amount: Money,
    pub reason: String,
    pub applied_at: Ms,
}

/// A dated closure of a whole property (renovation, seasonal shutdown).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Closure {
    pub id: Ulid,
    pub range: DateRange,
}

#[derive(Debug, Clone)]
pub struct PropertyState {
    pub id: Ulid,
    pub name: Option<String>,
    /// Closure ranges, sorted by `range.start`.
    pub closures: Vec<Closure>,
}

impl PropertyState {
    pub fn new(id: Ulid, name: Option<String>) -> Self {
        Self { id, name, closures: Vec::new() }
    }

    pub fn insert_closure(&mut self, closure: Closure) {
        let pos = self
            .closures
            .binary_search_by_key(&closure.range.start, |c| c.range.start)
            .unwrap_or_else(|e| e);
        self.closures.insert(pos, closure);
    }

    pub fn remove_closure(&mut self, id: Ulid) -> Option<Closure> {
        self.closures
            .iter()
            .position(|c| c.id == id)
            .map(|pos| self.closures.remove(pos))
    }
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub property_id: Option<Ulid>,
    pub name: Option<String>,
    pub price_per_night: Money,
    /// Maximum guests the room sleeps.
    pub capacity: u32,
    pub min_nights: u32,
    pub max_nights: u32,
    pub active: bool,
    /// All bookings ever made on this room, sorted by `stay.start`.
    /// Terminal bookings stay in the list; overlap checks filter on status.
    pub bookings: Vec<Booking>,
}

impl RoomState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Ulid,
        property_id: Option<Ulid>,
        name: Option<String>,
        price_per_night: Money,
        capacity: u32,
        min_nights: u32,
        max_nights: u32,
        active: bool,
    ) -> Self {
        Self {
            id,
            property_id,
            name,
            price_per_night,
            capacity,
            min_nights,
            max_nights,
            active,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by stay.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.stay.start, |b| b.stay.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        self.bookings
            .iter()
            .position(|b| b.id == id)
            .map(|pos| self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings whose stay overlaps the query window, any status.
    /// Binary search skips bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.stay.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.stay.end > query.start)
    }
}

/// The event types — one per state change. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    PropertyCreated {
        id: Ulid,
        name: Option<String>,
    },
    ClosureAdded {
        id: Ulid,
        property_id: Ulid,
        range: DateRange,
    },
    ClosureRemoved {
        id: Ulid,
        property_id: Ulid,
    },
    RoomCreated {
        id: Ulid,
        property_id: Option<Ulid>,
        name: Option<String>,
        price_per_night: Money,
        capacity: u32,
        min_nights: u32,
        max_nights: u32,
        active: bool,
    },
    RoomUpdated {
        id: Ulid,
        name: Option<String>,
        price_per_night: Money,
        capacity: u32,
        min_nights: u32,
        max_nights: u32,
    },
    RoomActiveSet {
        id: Ulid,
        active: bool,
    },
    /// Carries the full record so WAL compaction can re-emit current state.
    BookingCreated {
        booking: Booking,
    },
    PaymentPendingMarked {
        booking_id: Ulid,
        room_id: Ulid,
        at: Ms,
    },
    BookingConfirmed {
        booking_id: Ulid,
        room_id: Ulid,
        staff_id: Ulid,
        at: Ms,
    },
    BookingRejected {
        booking_id: Ulid,
        room_id: Ulid,
        staff_id: Ulid,
        reason: String,
        refund: Money,
        at: Ms,
    },
    BookingActivated {
        booking_id: Ulid,
        room_id: Ulid,
    },
    BookingCompleted {
        booking_id: Ulid,
        room_id: Ulid,
    },
    BookingCancelled {
        booking_id: Ulid,
        room_id: Ulid,
        actor: CancelActor,
        reason: String,
        refund: Money,
        at: Ms,
    },
    DateChangeRequested {
        request: DateChangeRequest,
    },
    DateChangeApproved {
        request_id: Ulid,
        booking_id: Ulid,
        room_id: Ulid,
        stay: DateRange,
        total_price: Money,
        at: Ms,
    },
    DateChangeRejected {
        request_id: Ulid,
        booking_id: Ulid,
        room_id: Ulid,
        at: Ms,
    },
    /// `booking_refund_total` is the booking's resulting refund total
    /// (absolute, not a delta) so replay and compaction stay idempotent.
    EarlyCheckoutApplied {
        record: EarlyCheckoutRecord,
        booking_refund_total: Money,
    },
}

impl Event {
    /// The room a booking-level event belongs to, for notify routing and
    /// replay. Property-level events return `None`.
    pub fn room_id(&self) -> Option<Ulid> {
        match self {
            Event::RoomCreated { id, .. }
            | Event::RoomUpdated { id, .. }
            | Event::RoomActiveSet { id, .. } => Some(*id),
            Event::BookingCreated { booking } => Some(booking.room_id),
            Event::PaymentPendingMarked { room_id, .. }
            | Event::BookingConfirmed { room_id, .. }
            | Event::BookingRejected { room_id, .. }
            | Event::BookingActivated { room_id, .. }
            | Event::BookingCompleted { room_id, .. }
            | Event::BookingCancelled { room_id, .. }
            | Event::DateChangeApproved { room_id, .. }
            | Event::DateChangeRejected { room_id, .. } => Some(*room_id),
            Event::DateChangeRequested { request } => Some(request.room_id),
            Event::EarlyCheckoutApplied { record, .. } => Some(record.room_id),
            Event::PropertyCreated { .. }
            | Event::ClosureAdded { .. }
            | Event::ClosureRemoved { .. } => None,
        }
    }

    pub fn booking_id(&self) -> Option<Ulid> {
        match self {
            Event::BookingCreated { booking } => Some(booking.id),
            Event::PaymentPendingMarked { booking_id, .. }
            | Event::BookingConfirmed { booking_id, .. }
            | Event::BookingRejected { booking_id, .. }
            | Event::BookingActivated { booking_id, .. }
            | Event::BookingCompleted { booking_id, .. }
            | Event::BookingCancelled { booking_id, .. }
            | Event::DateChangeApproved { booking_id, .. }
            | Event::DateChangeRejected { booking_id, .. } => Some(*booking_id),
            Event::DateChangeRequested { request } => Some(request.booking_id),
            Event::EarlyCheckoutApplied { record, .. } => Some(record.booking_id),
            _ => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomInfo {
    pub id: Ulid,
    pub property_id: Option<Ulid>,
    pub name: Option<String>,
    pub price_per_night: Money,
    pub capacity: u32,
    pub min_nights: u32,
    pub max_nights: u32,
    pub active: bool,
}

impl From<&RoomState> for RoomInfo {
    fn from(rs: &RoomState) -> Self {
        Self {
            id: rs.id,
            property_id: rs.property_id,
            name: rs.name.clone(),
            price_per_night: rs.price_per_night,
            capacity: rs.capacity,
            min_nights: rs.min_nights,
            max_nights: rs.max_nights,
            active: rs.active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn make_booking(id: Ulid, start: &str, end: &str, status: BookingStatus) -> Booking {
        Booking {
            id,
            room_id: Ulid::new(),
            guest_id: None,
            stay: DateRange::new(d(start), d(end)),
            guests: 2,
            status,
            total_price: 10_000,
            metadata: "{}".into(),
            created_at: 0,
            confirmed_at: None,
            cancelled_at: None,
            cancel_reason: None,
            refund_amount: None,
            payment_id: None,
        }
    }

    #[test]
    fn nights_count() {
        let r = DateRange::new(d("2024-06-01"), d("2024-06-04"));
        assert_eq!(r.nights(), 3);
    }

    #[test]
    fn range_adjacent_not_overlapping() {
        let a = DateRange::new(d("2024-06-01"), d("2024-06-04"));
        let b = DateRange::new(d("2024-06-04"), d("2024-06-06"));
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
    }

    #[test]
    fn range_partial_overlap() {
        let a = DateRange::new(d("2024-06-01"), d("2024-06-04"));
        let b = DateRange::new(d("2024-06-03"), d("2024-06-05"));
        assert!(a.overlaps(&b));
    }

    #[test]
    fn range_contains_is_half_open() {
        let r = DateRange::new(d("2024-06-01"), d("2024-06-04"));
        assert!(r.contains_date(d("2024-06-01")));
        assert!(r.contains_date(d("2024-06-03")));
        assert!(!r.contains_date(d("2024-06-04")));
    }

    #[test]
    fn try_new_rejects_empty_and_inverted() {
        assert!(DateRange::try_new(d("2024-06-01"), d("2024-06-01")).is_none());
        assert!(DateRange::try_new(d("2024-06-02"), d("2024-06-01")).is_none());
        assert!(DateRange::try_new(d("2024-06-01"), d("2024-06-02")).is_some());
    }

    #[test]
    fn iter_dates_covers_nights_only() {
        let r = DateRange::new(d("2024-06-01"), d("2024-06-04"));
        let dates: Vec<_> = r.iter_dates().collect();
        assert_eq!(dates, vec![d("2024-06-01"), d("2024-06-02"), d("2024-06-03")]);
    }

    #[test]
    fn status_terminal_partition() {
        for s in [
            BookingStatus::Pending,
            BookingStatus::PaymentPending,
            BookingStatus::Confirmed,
            BookingStatus::Active,
        ] {
            assert!(!s.is_terminal());
            assert!(s.blocks_calendar());
        }
        for s in [
            BookingStatus::Completed,
            BookingStatus::Cancelled,
            BookingStatus::Rejected,
        ] {
            assert!(s.is_terminal());
            assert!(!s.blocks_calendar());
        }
    }

    #[test]
    fn booking_ordering_maintained() {
        let mut rs = RoomState::new(Ulid::new(), None, None, 5000, 2, 1, 30, true);
        rs.insert_booking(make_booking(Ulid::new(), "2024-07-10", "2024-07-12", BookingStatus::Pending));
        rs.insert_booking(make_booking(Ulid::new(), "2024-07-01", "2024-07-03", BookingStatus::Pending));
        rs.insert_booking(make_booking(Ulid::new(), "2024-07-05", "2024-07-08", BookingStatus::Pending));
        assert_eq!(rs.bookings[0].stay.start, d("2024-07-01"));
        assert_eq!(rs.bookings[1].stay.start, d("2024-07-05"));
        assert_eq!(rs.bookings[2].stay.start, d("2024-07-10"));
    }

    #[test]
    fn overlapping_skips_disjoint() {
        let mut rs = RoomState::new(Ulid::new(), None, None, 5000, 2, 1, 30, true);
        rs.insert_booking(make_booking(Ulid::new(), "2024-07-01", "2024-07-03", BookingStatus::Pending));
        rs.insert_booking(make_booking(Ulid::new(), "2024-07-04", "2024-07-08", BookingStatus::Pending));
        rs.insert_booking(make_booking(Ulid::new(), "2024-07-20", "2024-07-22", BookingStatus::Pending));

        let query = DateRange::new(d("2024-07-03"), d("2024-07-05"));
        let hits: Vec<_> = rs.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].stay.start, d("2024-07-04"));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut rs = RoomState::new(Ulid::new(), None, None, 5000, 2, 1, 30, true);
        rs.insert_booking(make_booking(Ulid::new(), "2024-07-01", "2024-07-03", BookingStatus::Pending));
        let query = DateRange::new(d("2024-07-03"), d("2024-07-06"));
        assert_eq!(rs.overlapping(&query).count(), 0);
    }

    #[test]
    fn remove_booking_preserves_order() {
        let mut rs = RoomState::new(Ulid::new(), None, None, 5000, 2, 1, 30, true);
        let ids: Vec<Ulid> = (0..3).map(|_| Ulid::new()).collect();
        rs.insert_booking(make_booking(ids[0], "2024-07-01", "2024-07-03", BookingStatus::Pending));
        rs.insert_booking(make_booking(ids[1], "2024-07-05", "2024-07-08", BookingStatus::Pending));
        rs.insert_booking(make_booking(ids[2], "2024-07-10", "2024-07-12", BookingStatus::Pending));
        rs.remove_booking(ids[1]);
        assert_eq!(rs.bookings.len(), 2);
        assert_eq!(rs.bookings[0].id, ids[0]);
        assert_eq!(rs.bookings[1].id, ids[2]);
        assert!(rs.remove_booking(Ulid::new()).is_none());
    }

    #[test]
    fn closure_ordering_maintained() {
        let mut ps = PropertyState::new(Ulid::new(), Some("Seaside".into()));
        ps.insert_closure(Closure { id: Ulid::new(), range: DateRange::new(d("2024-09-01"), d("2024-09-10")) });
        ps.insert_closure(Closure { id: Ulid::new(), range: DateRange::new(d("2024-01-01"), d("2024-01-05")) });
        assert_eq!(ps.closures[0].range.start, d("2024-01-01"));
        assert_eq!(ps.closures[1].range.start, d("2024-09-01"));
    }

    #[test]
    fn discount_window() {
        let mut disc = Discount::percentage(10);
        assert!(disc.active_on(d("2024-06-01")));
        disc.valid_from = Some(d("2024-06-01"));
        disc.valid_until = Some(d("2024-06-30"));
        assert!(disc.active_on(d("2024-06-01")));
        assert!(disc.active_on(d("2024-06-30")));
        assert!(!disc.active_on(d("2024-05-31")));
        assert!(!disc.active_on(d("2024-07-01")));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let booking = make_booking(Ulid::new(), "2024-06-01", "2024-06-04", BookingStatus::Pending);
        let event = Event::BookingCreated { booking };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn event_routing_ids() {
        let booking = make_booking(Ulid::new(), "2024-06-01", "2024-06-04", BookingStatus::Pending);
        let bid = booking.id;
        let rid = booking.room_id;
        let event = Event::BookingCreated { booking };
        assert_eq!(event.room_id(), Some(rid));
        assert_eq!(event.booking_id(), Some(bid));

        let prop = Event::PropertyCreated { id: Ulid::new(), name: None };
        assert_eq!(prop.room_id(), None);
        assert_eq!(prop.booking_id(), None);
    }
}
