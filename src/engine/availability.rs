use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{DateRange, RoomState};

use super::EngineError;

/// Why a stay was refused. Ordered: the first failing check wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    InvalidDates(&'static str),
    RoomInactive(Ulid),
    CapacityExceeded { requested: u32, capacity: u32 },
    NightsOutOfRange { nights: i64, min: u32, max: u32 },
    PropertyClosed(NaiveDate),
    RoomUnavailable,
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", EngineError::from(*self))
    }
}

impl From<DenialReason> for EngineError {
    fn from(reason: DenialReason) -> Self {
        match reason {
            DenialReason::InvalidDates(msg) => EngineError::InvalidDates(msg),
            DenialReason::RoomInactive(id) => EngineError::RoomInactive(id),
            DenialReason::CapacityExceeded { requested, capacity } => {
                EngineError::CapacityExceeded { requested, capacity }
            }
            DenialReason::NightsOutOfRange { nights, min, max } => {
                EngineError::NightsOutOfRange { nights, min, max }
            }
            DenialReason::PropertyClosed(date) => EngineError::PropertyClosed(date),
            DenialReason::RoomUnavailable => EngineError::RoomUnavailable,
        }
    }
}

/// Result of an availability check: bookable, or the first reason it isn't.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityResult {
    pub available: bool,
    pub reason: Option<DenialReason>,
}

impl AvailabilityResult {
    pub fn ok() -> Self {
        Self { available: true, reason: None }
    }

    pub fn denied(reason: DenialReason) -> Self {
        Self { available: false, reason: Some(reason) }
    }

    pub fn into_result(self) -> Result<(), EngineError> {
        match self.reason {
            None => Ok(()),
            Some(reason) => Err(reason.into()),
        }
    }
}

/// Pure bookability check for one room and one requested stay.
///
/// Validation order (first failure wins): date sanity, room active,
/// guest capacity, stay length, property closures, then calendar
/// conflicts against bookings in a calendar-blocking status.
/// `exclude_booking` skips the booking being re-checked for a date change.
pub fn check_stay(
    room: &RoomState,
    closures: &[DateRange],
    today: NaiveDate,
    check_in: NaiveDate,
    check_out: NaiveDate,
    guests: u32,
    exclude_booking: Option<Ulid>,
) -> AvailabilityResult {
    let Some(stay) = DateRange::try_new(check_in, check_out) else {
        return AvailabilityResult::denied(DenialReason::InvalidDates(
            "check-out must be after check-in",
        ));
    };
    if check_in < today {
        return AvailabilityResult::denied(DenialReason::InvalidDates(
            "check-in must not be in the past",
        ));
    }

    if !room.active {
        return AvailabilityResult::denied(DenialReason::RoomInactive(room.id));
    }

    if guests == 0 {
        return AvailabilityResult::denied(DenialReason::CapacityExceeded {
            requested: 0,
            capacity: room.capacity,
        });
    }
    if guests > room.capacity {
        return AvailabilityResult::denied(DenialReason::CapacityExceeded {
            requested: guests,
            capacity: room.capacity,
        });
    }

    let nights = stay.nights();
    if nights < room.min_nights as i64 || nights > room.max_nights as i64 {
        return AvailabilityResult::denied(DenialReason::NightsOutOfRange {
            nights,
            min: room.min_nights,
            max: room.max_nights,
        });
    }

    for closure in closures {
        if closure.overlaps(&stay) {
            let first_closed = closure.start.max(stay.start);
            return AvailabilityResult::denied(DenialReason::PropertyClosed(first_closed));
        }
    }

    let conflict = room.overlapping(&stay).any(|b| {
        b.status.blocks_calendar() && exclude_booking != Some(b.id)
    });
    if conflict {
        return AvailabilityResult::denied(DenialReason::RoomUnavailable);
    }

    AvailabilityResult::ok()
}

/// Free date-ranges of a room inside a query window: the window minus
/// past dates, property closures, and calendar-blocking bookings.
pub fn free_ranges(
    room: &RoomState,
    closures: &[DateRange],
    window: &DateRange,
    today: NaiveDate,
) -> Vec<DateRange> {
    let start = window.start.max(today);
    let Some(base) = DateRange::try_new(start, window.end) else {
        return Vec::new();
    };

    let mut blocked: Vec<DateRange> = Vec::new();
    for closure in closures {
        if closure.overlaps(&base) {
            blocked.push(clamp(closure, &base));
        }
    }
    for booking in room.overlapping(&base) {
        if booking.status.blocks_calendar() {
            blocked.push(clamp(&booking.stay, &base));
        }
    }

    if blocked.is_empty() {
        return vec![base];
    }
    blocked.sort_by_key(|r| r.start);
    let blocked = merge_ranges(&blocked);
    subtract_ranges(&[base], &blocked)
}

fn clamp(range: &DateRange, window: &DateRange) -> DateRange {
    DateRange::new(range.start.max(window.start), range.end.min(window.end))
}

/// Merge sorted overlapping/adjacent ranges into disjoint ranges.
pub fn merge_ranges(sorted: &[DateRange]) -> Vec<DateRange> {
    let mut merged: Vec<DateRange> = Vec::new();
    for &range in sorted {
        if let Some(last) = merged.last_mut()
            && range.start <= last.end {
                last.end = last.end.max(range.end);
                continue;
            }
        merged.push(range);
    }
    merged
}

/// Subtract sorted disjoint `to_remove` ranges from sorted `base` ranges.
pub fn subtract_ranges(base: &[DateRange], to_remove: &[DateRange]) -> Vec<DateRange> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(DateRange::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(DateRange::new(current_start, current_end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Booking, BookingStatus};

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn r(start: &str, end: &str) -> DateRange {
        DateRange::new(d(start), d(end))
    }

    fn make_room(capacity: u32, min_nights: u32, max_nights: u32) -> RoomState {
        RoomState::new(Ulid::new(), None, None, 5000, capacity, min_nights, max_nights, true)
    }

    fn booking_with_status(stay: DateRange, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            room_id: Ulid::new(),
            guest_id: None,
            stay,
            guests: 2,
            status,
            total_price: 0,
            metadata: "{}".into(),
            created_at: 0,
            confirmed_at: None,
            cancelled_at: None,
            cancel_reason: None,
            refund_amount: None,
            payment_id: None,
        }
    }

    const TODAY: &str = "2024-06-01";

    #[test]
    fn accepts_clean_stay() {
        let room = make_room(2, 1, 30);
        let res = check_stay(&room, &[], d(TODAY), d("2024-06-10"), d("2024-06-13"), 2, None);
        assert!(res.available);
        assert_eq!(res.reason, None);
    }

    #[test]
    fn rejects_inverted_and_past_dates() {
        let room = make_room(2, 1, 30);
        let res = check_stay(&room, &[], d(TODAY), d("2024-06-13"), d("2024-06-10"), 2, None);
        assert!(matches!(res.reason, Some(DenialReason::InvalidDates(_))));

        let res = check_stay(&room, &[], d(TODAY), d("2024-05-20"), d("2024-05-23"), 2, None);
        assert!(matches!(res.reason, Some(DenialReason::InvalidDates(_))));
    }

    #[test]
    fn rejects_inactive_room() {
        let mut room = make_room(2, 1, 30);
        room.active = false;
        let res = check_stay(&room, &[], d(TODAY), d("2024-06-10"), d("2024-06-13"), 2, None);
        assert!(matches!(res.reason, Some(DenialReason::RoomInactive(_))));
    }

    #[test]
    fn rejects_over_capacity() {
        let room = make_room(2, 1, 30);
        let res = check_stay(&room, &[], d(TODAY), d("2024-06-10"), d("2024-06-13"), 3, None);
        assert_eq!(
            res.reason,
            Some(DenialReason::CapacityExceeded { requested: 3, capacity: 2 })
        );
    }

    #[test]
    fn rejects_stay_length_outside_bounds() {
        let room = make_room(2, 2, 5);
        let res = check_stay(&room, &[], d(TODAY), d("2024-06-10"), d("2024-06-11"), 2, None);
        assert_eq!(
            res.reason,
            Some(DenialReason::NightsOutOfRange { nights: 1, min: 2, max: 5 })
        );

        let res = check_stay(&room, &[], d(TODAY), d("2024-06-10"), d("2024-06-20"), 2, None);
        assert_eq!(
            res.reason,
            Some(DenialReason::NightsOutOfRange { nights: 10, min: 2, max: 5 })
        );
    }

    #[test]
    fn rejects_property_closure_overlap() {
        let room = make_room(2, 1, 30);
        let closures = vec![r("2024-06-12", "2024-06-15")];
        let res = check_stay(&room, &closures, d(TODAY), d("2024-06-10"), d("2024-06-13"), 2, None);
        assert_eq!(res.reason, Some(DenialReason::PropertyClosed(d("2024-06-12"))));

        // Closure ending exactly at check-in does not block (half-open)
        let closures = vec![r("2024-06-05", "2024-06-10")];
        let res = check_stay(&room, &closures, d(TODAY), d("2024-06-10"), d("2024-06-13"), 2, None);
        assert!(res.available);
    }

    #[test]
    fn rejects_overlapping_nonterminal_booking() {
        let mut room = make_room(2, 1, 30);
        room.insert_booking(booking_with_status(r("2024-06-11", "2024-06-14"), BookingStatus::Confirmed));

        let res = check_stay(&room, &[], d(TODAY), d("2024-06-10"), d("2024-06-13"), 2, None);
        assert_eq!(res.reason, Some(DenialReason::RoomUnavailable));
    }

    #[test]
    fn terminal_bookings_free_the_calendar() {
        let mut room = make_room(2, 1, 30);
        for status in [
            BookingStatus::Cancelled,
            BookingStatus::Rejected,
            BookingStatus::Completed,
        ] {
            room.insert_booking(booking_with_status(r("2024-06-10", "2024-06-13"), status));
        }
        let res = check_stay(&room, &[], d(TODAY), d("2024-06-10"), d("2024-06-13"), 2, None);
        assert!(res.available);
    }

    #[test]
    fn payment_pending_blocks_calendar() {
        let mut room = make_room(2, 1, 30);
        room.insert_booking(booking_with_status(
            r("2024-06-10", "2024-06-13"),
            BookingStatus::PaymentPending,
        ));
        let res = check_stay(&room, &[], d(TODAY), d("2024-06-10"), d("2024-06-13"), 2, None);
        assert_eq!(res.reason, Some(DenialReason::RoomUnavailable));
    }

    #[test]
    fn back_to_back_stays_allowed() {
        let mut room = make_room(2, 1, 30);
        room.insert_booking(booking_with_status(r("2024-06-10", "2024-06-13"), BookingStatus::Confirmed));

        // Check-in on the other booking's check-out day
        let res = check_stay(&room, &[], d(TODAY), d("2024-06-13"), d("2024-06-16"), 2, None);
        assert!(res.available);
    }

    #[test]
    fn exclude_skips_own_booking() {
        let mut room = make_room(2, 1, 30);
        let own = booking_with_status(r("2024-06-10", "2024-06-13"), BookingStatus::Confirmed);
        let own_id = own.id;
        room.insert_booking(own);

        // Shifting the same booking by one day overlaps itself only
        let res = check_stay(&room, &[], d(TODAY), d("2024-06-11"), d("2024-06-14"), 2, Some(own_id));
        assert!(res.available);

        let res = check_stay(&room, &[], d(TODAY), d("2024-06-11"), d("2024-06-14"), 2, None);
        assert_eq!(res.reason, Some(DenialReason::RoomUnavailable));
    }

    #[test]
    fn check_is_pure() {
        let mut room = make_room(2, 1, 30);
        room.insert_booking(booking_with_status(r("2024-06-11", "2024-06-14"), BookingStatus::Pending));
        let first = check_stay(&room, &[], d(TODAY), d("2024-06-10"), d("2024-06-13"), 2, None);
        let second = check_stay(&room, &[], d(TODAY), d("2024-06-10"), d("2024-06-13"), 2, None);
        assert_eq!(first, second);
    }

    // ── free_ranges ──────────────────────────────────────

    #[test]
    fn free_ranges_empty_room_is_whole_window() {
        let room = make_room(2, 1, 30);
        let window = r("2024-06-10", "2024-06-20");
        assert_eq!(free_ranges(&room, &[], &window, d(TODAY)), vec![window]);
    }

    #[test]
    fn free_ranges_punched_by_booking_and_closure() {
        let mut room = make_room(2, 1, 30);
        room.insert_booking(booking_with_status(r("2024-06-12", "2024-06-14"), BookingStatus::Confirmed));
        let closures = vec![r("2024-06-17", "2024-06-18")];

        let free = free_ranges(&room, &closures, &r("2024-06-10", "2024-06-20"), d(TODAY));
        assert_eq!(
            free,
            vec![
                r("2024-06-10", "2024-06-12"),
                r("2024-06-14", "2024-06-17"),
                r("2024-06-18", "2024-06-20"),
            ]
        );
    }

    #[test]
    fn free_ranges_clips_past_dates() {
        let room = make_room(2, 1, 30);
        let free = free_ranges(&room, &[], &r("2024-05-20", "2024-06-05"), d(TODAY));
        assert_eq!(free, vec![r("2024-06-01", "2024-06-05")]);

        // Window entirely in the past
        let free = free_ranges(&room, &[], &r("2024-05-01", "2024-05-10"), d(TODAY));
        assert!(free.is_empty());
    }

    #[test]
    fn free_ranges_ignores_cancelled_bookings() {
        let mut room = make_room(2, 1, 30);
        room.insert_booking(booking_with_status(r("2024-06-12", "2024-06-14"), BookingStatus::Cancelled));
        let window = r("2024-06-10", "2024-06-20");
        assert_eq!(free_ranges(&room, &[], &window, d(TODAY)), vec![window]);
    }

    // ── merge / subtract ─────────────────────────────────

    #[test]
    fn merge_overlapping_and_adjacent() {
        let spans = vec![
            r("2024-06-01", "2024-06-05"),
            r("2024-06-03", "2024-06-08"),
            r("2024-06-08", "2024-06-10"),
            r("2024-06-15", "2024-06-16"),
        ];
        let merged = merge_ranges(&spans);
        assert_eq!(
            merged,
            vec![r("2024-06-01", "2024-06-10"), r("2024-06-15", "2024-06-16")]
        );
    }

    #[test]
    fn subtract_middle_punch() {
        let base = vec![r("2024-06-01", "2024-06-30")];
        let remove = vec![r("2024-06-10", "2024-06-12")];
        assert_eq!(
            subtract_ranges(&base, &remove),
            vec![r("2024-06-01", "2024-06-10"), r("2024-06-12", "2024-06-30")]
        );
    }

    #[test]
    fn subtract_full_cover() {
        let base = vec![r("2024-06-10", "2024-06-12")];
        let remove = vec![r("2024-06-01", "2024-06-30")];
        assert!(subtract_ranges(&base, &remove).is_empty());
    }

    #[test]
    fn subtract_no_overlap() {
        let base = vec![r("2024-06-01", "2024-06-05"), r("2024-06-10", "2024-06-15")];
        let remove = vec![r("2024-06-05", "2024-06-10")];
        assert_eq!(subtract_ranges(&base, &remove), base);
    }
}
