use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::{check_stay, free_ranges, AvailabilityResult};
use super::pricing::{quote, PriceQuote};
use super::{Engine, EngineError};

impl Engine {
    /// Pure availability query against current state: no side effects,
    /// repeating it without intervening writes yields the same answer.
    /// The authoritative check re-runs inside `create_booking`'s write.
    pub async fn check_availability(
        &self,
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        guests: u32,
        exclude_booking: Option<Ulid>,
    ) -> Result<AvailabilityResult, EngineError> {
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        let closures = self.collect_closures(guard.property_id).await;
        let result = check_stay(
            &guard,
            &closures,
            self.clock.today(),
            check_in,
            check_out,
            guests,
            exclude_booking,
        );
        if !result.available {
            metrics::counter!(crate::observability::AVAILABILITY_DENIALS_TOTAL).increment(1);
        }
        Ok(result)
    }

    /// Quote a stay, applying `promo_code` when it resolves to a discount
    /// active today. Dead codes are not an error — the quote simply
    /// reports no discount.
    pub async fn calculate_price(
        &self,
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        guests: u32,
        promo_code: Option<&str>,
    ) -> Result<PriceQuote, EngineError> {
        let Some(stay) = DateRange::try_new(check_in, check_out) else {
            return Err(EngineError::InvalidDates("check-out must be after check-in"));
        };
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        if guests > guard.capacity {
            return Err(EngineError::CapacityExceeded {
                requested: guests,
                capacity: guard.capacity,
            });
        }

        let resolved = match promo_code {
            Some(code) => self.promos.resolve(code).await.map(|d| (code, d)),
            None => None,
        };
        let today = self.clock.today();
        let promo = resolved
            .as_ref()
            .filter(|(_, d)| d.active_on(today))
            .map(|(code, d)| (*code, d));

        metrics::counter!(crate::observability::QUOTES_TOTAL).increment(1);
        Ok(quote(guard.price_per_night, &stay, promo))
    }

    pub async fn get_booking(&self, id: Ulid) -> Option<Booking> {
        let room_id = self.room_for_booking(&id)?;
        let rs = self.get_room(&room_id)?;
        let guard = rs.read().await;
        guard.booking(id).cloned()
    }

    pub async fn bookings_for_room(&self, room_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard.bookings.clone())
    }

    pub fn rooms_for_property(&self, property_id: Ulid) -> Vec<RoomInfo> {
        let ids = self
            .property_rooms
            .get(&property_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.iter()
            .filter_map(|id| self.get_room(id))
            .map(|rs| {
                let guard = rs.try_read().expect("rooms_for_property: uncontended read");
                RoomInfo::from(&*guard)
            })
            .collect()
    }

    pub fn list_rooms(&self) -> Vec<RoomInfo> {
        self.rooms
            .iter()
            .map(|entry| {
                let rs = entry.value().clone();
                let guard = rs.try_read().expect("list_rooms: uncontended read");
                RoomInfo::from(&*guard)
            })
            .collect()
    }

    /// Guest search: every active room that can host the party for the
    /// stay. Scans all rooms; each is checked against its own calendar
    /// and its property's closures.
    pub async fn find_available_rooms(
        &self,
        check_in: NaiveDate,
        check_out: NaiveDate,
        guests: u32,
    ) -> Result<Vec<RoomInfo>, EngineError> {
        if DateRange::try_new(check_in, check_out).is_none() {
            return Err(EngineError::InvalidDates("check-out must be after check-in"));
        }
        let today = self.clock.today();
        let room_ids: Vec<Ulid> = self.rooms.iter().map(|e| *e.key()).collect();

        let mut found = Vec::new();
        for room_id in room_ids {
            let Some(rs) = self.get_room(&room_id) else {
                continue;
            };
            let guard = rs.read().await;
            let closures = self.collect_closures(guard.property_id).await;
            let result = check_stay(&guard, &closures, today, check_in, check_out, guests, None);
            if result.available {
                found.push(RoomInfo::from(&*guard));
            }
        }
        found.sort_by_key(|r| r.id);
        Ok(found)
    }

    /// The room's open date-ranges inside a window — its availability
    /// calendar after subtracting closures and blocking bookings.
    pub async fn room_calendar(
        &self,
        room_id: Ulid,
        window_start: NaiveDate,
        window_end: NaiveDate,
    ) -> Result<Vec<DateRange>, EngineError> {
        let Some(window) = DateRange::try_new(window_start, window_end) else {
            return Err(EngineError::InvalidDates("window end must be after window start"));
        };
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        let closures = self.collect_closures(guard.property_id).await;
        Ok(free_ranges(&guard, &closures, &window, self.clock.today()))
    }

    pub fn get_date_change(&self, request_id: Ulid) -> Option<DateChangeRequest> {
        self.date_changes.get(&request_id).map(|e| e.value().clone())
    }

    pub fn date_changes_for_booking(&self, booking_id: Ulid) -> Vec<DateChangeRequest> {
        let mut requests: Vec<DateChangeRequest> = self
            .date_changes
            .iter()
            .filter(|e| e.value().booking_id == booking_id)
            .map(|e| e.value().clone())
            .collect();
        requests.sort_by_key(|r| r.requested_at);
        requests
    }

    pub fn early_checkouts_for_booking(&self, booking_id: Ulid) -> Vec<EarlyCheckoutRecord> {
        let mut records: Vec<EarlyCheckoutRecord> = self
            .early_checkouts
            .iter()
            .filter(|e| e.value().booking_id == booking_id)
            .map(|e| e.value().clone())
            .collect();
        records.sort_by_key(|r| r.applied_at);
        records
    }
}
