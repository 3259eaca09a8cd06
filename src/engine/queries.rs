use chrono::{Local, NaiveDate, NaiveDateTime};

use crate::model::*;

use super::Engine;
use super::availability::bookable_starts;

impl Engine {
    /// Bookable start slots for `duration` slots, as of the venue's local now.
    pub async fn get_availability(&self, room_name: &str, date: NaiveDate, duration: Slot) -> Vec<Slot> {
        self.availability_at(room_name, date, duration, Local::now().naive_local())
            .await
    }

    /// Bookable start slots with an explicit "now" for the retroactive cutoff.
    pub async fn availability_at(
        &self,
        room_name: &str,
        date: NaiveDate,
        duration: Slot,
        now: NaiveDateTime,
    ) -> Vec<Slot> {
        let snapshot = self.store.list_for_room_day(room_name, date).await;
        let earliest = self.clock.earliest_start(date, now);
        bookable_starts(&snapshot, duration, &self.clock, earliest)
    }

    pub async fn list_reservations(&self, owner_id: &str) -> Vec<Reservation> {
        self.store.list_for_owner(owner_id).await
    }

    pub async fn list_for_room_day(&self, room_name: &str, date: NaiveDate) -> Vec<Reservation> {
        self.store.list_for_room_day(room_name, date).await
    }

    pub async fn occupancy(&self, room_name: &str, date: NaiveDate) -> Vec<SlotSpan> {
        self.store.occupied(room_name, date).await
    }
}
