use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{debug, info};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

use super::availability::occupied;
use super::conflict::{check_no_conflict, validate_names};
use super::{EngineError, WalCommand, spawn_wal_writer};

pub type SharedDayState = Arc<RwLock<DayState>>;

/// Sole owner of committed reservations.
///
/// Each RoomDay sits behind its own `RwLock`: `insert` and `remove` hold the
/// write lock across check, WAL append and apply, so two commits on the same
/// RoomDay never interleave while unrelated RoomDays proceed in parallel.
pub struct ReservationStore {
    days: DashMap<RoomDay, SharedDayState>,
    by_id: DashMap<Ulid, RoomDay>,
    by_owner: DashMap<String, Vec<Ulid>>,
    /// Last assigned commit sequence number. Held while a commit is applied
    /// and its hook runs, which fixes the global commit order.
    commit_seq: Mutex<u64>,
    /// Mutations share it; compaction takes it exclusively.
    compaction_gate: RwLock<()>,
    wal_tx: mpsc::Sender<WalCommand>,
}

/// Apply a WAL record to one RoomDay. Caller holds the day's write lock.
fn apply_event(
    day: &mut DayState,
    event: &Event,
    by_id: &DashMap<Ulid, RoomDay>,
    by_owner: &DashMap<String, Vec<Ulid>>,
) {
    match event {
        Event::ReservationCreated(r) => {
            by_id.insert(r.id, day.key.clone());
            by_owner.entry(r.owner_id.clone()).or_default().push(r.id);
            day.insert(r.clone());
        }
        Event::ReservationCancelled { id, .. } => {
            by_id.remove(id);
            if let Some(removed) = day.remove(*id)
                && let Some(mut ids) = by_owner.get_mut(&removed.owner_id)
            {
                ids.retain(|other| other != id);
            }
        }
    }
}

fn event_room_day(event: &Event) -> RoomDay {
    match event {
        Event::ReservationCreated(r) => r.room_day(),
        Event::ReservationCancelled { room_name, date, .. } => RoomDay::new(room_name, *date),
    }
}

impl ReservationStore {
    /// Replay the WAL at `wal_path` and start its group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn open(wal_path: &Path) -> io::Result<Self> {
        let events = Wal::recover(wal_path)?;
        let wal = Wal::open(wal_path)?;

        let by_id = DashMap::new();
        let by_owner = DashMap::new();
        let mut days: HashMap<RoomDay, DayState> = HashMap::new();
        for event in &events {
            let key = event_room_day(event);
            let day = days
                .entry(key.clone())
                .or_insert_with(|| DayState::new(key));
            apply_event(day, event, &by_id, &by_owner);
        }
        info!(
            "replayed {} WAL records: {} reservations across {} room-days",
            events.len(),
            by_id.len(),
            days.len()
        );

        Ok(Self {
            days: days
                .into_iter()
                .map(|(key, day)| (key, Arc::new(RwLock::new(day))))
                .collect(),
            by_id,
            by_owner,
            commit_seq: Mutex::new(0),
            compaction_gate: RwLock::new(()),
            wal_tx: spawn_wal_writer(wal),
        })
    }

    fn day(&self, key: &RoomDay) -> SharedDayState {
        self.days
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RwLock::new(DayState::new(key.clone()))))
            .clone()
    }

    fn existing_day(&self, key: &RoomDay) -> Option<SharedDayState> {
        self.days.get(key).map(|e| e.value().clone())
    }

    /// Write a record via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
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

    /// Make a persisted record visible and run `hook` with its sequence number.
    fn commit(&self, day: &mut DayState, event: &Event, hook: impl FnOnce(u64)) {
        let mut seq = self.commit_seq.lock().unwrap_or_else(|e| e.into_inner());
        *seq += 1;
        apply_event(day, event, &self.by_id, &self.by_owner);
        hook(*seq);
    }

    /// Re-check overlap under the RoomDay write lock, then persist and apply.
    /// `on_commit` runs inside the commit section with the new sequence number.
    pub async fn insert<F>(
        &self,
        candidate: NewReservation,
        on_commit: F,
    ) -> Result<Reservation, EngineError>
    where
        F: FnOnce(&Reservation, u64) + Send,
    {
        validate_names(&candidate.room_name, &candidate.owner_id)?;
        let _gate = self.compaction_gate.read().await;
        let day = self.day(&candidate.room_day());
        let mut guard = day.write().await;

        check_no_conflict(&guard, &candidate.span())?;

        let reservation = candidate.into_reservation(Ulid::new());
        let event = Event::ReservationCreated(reservation.clone());
        self.wal_append(&event).await?;
        self.commit(&mut guard, &event, |seq| on_commit(&reservation, seq));
        debug!(
            "committed {} {} {} [{}, {})",
            reservation.id,
            reservation.room_name,
            reservation.date,
            reservation.begin_slot,
            reservation.begin_slot + reservation.duration
        );
        Ok(reservation)
    }

    /// Owner-only removal. Returns the removed reservation.
    pub async fn remove<F>(
        &self,
        id: Ulid,
        requester: &str,
        on_commit: F,
    ) -> Result<Reservation, EngineError>
    where
        F: FnOnce(&Reservation, u64) + Send,
    {
        let _gate = self.compaction_gate.read().await;
        let key = self
            .by_id
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(id))?;
        let day = self.existing_day(&key).ok_or(EngineError::NotFound(id))?;
        let mut guard = day.write().await;

        // a concurrent cancel may have won the lock first
        let existing = guard.get(id).cloned().ok_or(EngineError::NotFound(id))?;
        if existing.owner_id != requester {
            return Err(EngineError::Forbidden(id));
        }

        let event = Event::ReservationCancelled {
            id,
            room_name: existing.room_name.clone(),
            date: existing.date,
        };
        self.wal_append(&event).await?;
        self.commit(&mut guard, &event, |seq| on_commit(&existing, seq));
        debug!("removed {id}");
        Ok(existing)
    }

    /// Snapshot of one RoomDay in slot order.
    pub async fn list_for_room_day(&self, room_name: &str, date: NaiveDate) -> Vec<Reservation> {
        match self.existing_day(&RoomDay::new(room_name, date)) {
            Some(day) => day.read().await.reservations.clone(),
            None => Vec::new(),
        }
    }

    /// Every reservation held by `owner_id`, ordered by date, slot, room.
    pub async fn list_for_owner(&self, owner_id: &str) -> Vec<Reservation> {
        let ids = self
            .by_owner
            .get(owner_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(r) = self.get(id).await {
                out.push(r);
            }
        }
        out.sort_by(|a, b| {
            (a.date, a.begin_slot, &a.room_name).cmp(&(b.date, b.begin_slot, &b.room_name))
        });
        out
    }

    pub async fn get(&self, id: Ulid) -> Option<Reservation> {
        let key = self.by_id.get(&id).map(|e| e.value().clone())?;
        let day = self.existing_day(&key)?;
        let guard = day.read().await;
        guard.get(id).cloned()
    }

    /// Merged occupied slot ranges of one RoomDay.
    pub async fn occupied(&self, room_name: &str, date: NaiveDate) -> Vec<SlotSpan> {
        occupied(&self.list_for_room_day(room_name, date).await)
    }

    pub fn reservation_count(&self) -> usize {
        self.by_id.len()
    }

    /// Sequence number of the most recent commit; 0 before the first.
    pub fn last_seq(&self) -> u64 {
        *self.commit_seq.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Rewrite the WAL as one `ReservationCreated` record per live reservation.
    /// Mutations wait on the gate until the swap is done.
    pub async fn compact_wal(&self) -> Result<usize, EngineError> {
        let _gate = self.compaction_gate.write().await;

        let days: Vec<SharedDayState> = self.days.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for day in days {
            let guard = day.read().await;
            events.extend(
                guard
                    .reservations
                    .iter()
                    .cloned()
                    .map(Event::ReservationCreated),
            );
        }
        let written = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        Ok(written)
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
