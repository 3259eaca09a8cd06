use chrono::NaiveDate;
use tracing::{info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability::{BOOKINGS_TOTAL, CANCELLATIONS_TOTAL, WAL_COMPACTIONS_TOTAL, outcome_label};

use super::{Engine, EngineError};

impl Engine {
    /// Validate, commit, publish. A `Conflict` is returned to the caller
    /// untouched; picking another slot is the caller's decision.
    pub async fn book(
        &self,
        room_name: &str,
        date: NaiveDate,
        begin_slot: Slot,
        duration: Slot,
        owner_id: &str,
    ) -> Result<Reservation, EngineError> {
        let result = self
            .try_book(room_name, date, begin_slot, duration, owner_id)
            .await;
        metrics::counter!(BOOKINGS_TOTAL, "outcome" => outcome_label(&result)).increment(1);
        match &result {
            Ok(r) => info!(
                "{owner_id} booked {room_name} {date} [{begin_slot}, {}) as {}",
                begin_slot + duration,
                r.id
            ),
            Err(e @ EngineError::Conflict { .. }) => {
                info!("{owner_id} lost {room_name} {date} slot {begin_slot}: {e}")
            }
            Err(e) => warn!("{owner_id} booking {room_name} {date} rejected: {e}"),
        }
        result
    }

    async fn try_book(
        &self,
        room_name: &str,
        date: NaiveDate,
        begin_slot: Slot,
        duration: Slot,
        owner_id: &str,
    ) -> Result<Reservation, EngineError> {
        self.clock.check_range(begin_slot, duration)?;
        let candidate = NewReservation {
            room_name: room_name.to_string(),
            date,
            begin_slot,
            duration,
            owner_id: owner_id.to_string(),
        };
        let bus = &self.bus;
        self.store
            .insert(candidate, |r, seq| {
                bus.publish(DomainEvent::created(r.clone(), seq));
            })
            .await
    }

    /// Owner-only cancellation; publishes once the removal is durable.
    pub async fn cancel(&self, id: Ulid, requester: &str) -> Result<Reservation, EngineError> {
        let bus = &self.bus;
        let result = self
            .store
            .remove(id, requester, |r, seq| {
                bus.publish(DomainEvent::cancelled(r.clone(), seq));
            })
            .await;
        metrics::counter!(CANCELLATIONS_TOTAL, "outcome" => outcome_label(&result)).increment(1);
        match &result {
            Ok(r) => info!("{requester} cancelled {id} ({} {})", r.room_name, r.date),
            Err(e) => warn!("{requester} cancel {id} rejected: {e}"),
        }
        result
    }

    /// Rewrite the WAL down to the live reservations.
    pub async fn compact_wal(&self) -> Result<usize, EngineError> {
        let written = self.store.compact_wal().await?;
        metrics::counter!(WAL_COMPACTIONS_TOTAL).increment(1);
        info!("WAL compacted to {written} records");
        Ok(written)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.store.wal_appends_since_compact().await
    }
}
