use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Half-hour unit counted from midnight. 16 = 08:00.
pub type Slot = u32;

/// Half-open slot range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSpan {
    pub start: Slot,
    pub end: Slot,
}

impl SlotSpan {
    pub fn new(start: Slot, end: Slot) -> Self {
        debug_assert!(start < end, "SlotSpan start must be before end");
        Self { start, end }
    }

    pub fn len(&self) -> Slot {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &SlotSpan) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn slots(&self) -> std::ops::Range<Slot> {
        self.start..self.end
    }
}

/// A committed booking of one room for a contiguous slot range on one day.
/// Never mutated in place: a change is a cancel followed by a new booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: Ulid,
    pub room_name: String,
    pub date: NaiveDate,
    pub begin_slot: Slot,
    pub duration: Slot,
    pub owner_id: String,
}

impl Reservation {
    pub fn span(&self) -> SlotSpan {
        SlotSpan::new(self.begin_slot, self.begin_slot + self.duration)
    }

    pub fn room_day(&self) -> RoomDay {
        RoomDay::new(&self.room_name, self.date)
    }
}

/// A booking request before the store has accepted it and assigned an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub room_name: String,
    pub date: NaiveDate,
    pub begin_slot: Slot,
    pub duration: Slot,
    pub owner_id: String,
}

impl NewReservation {
    pub fn span(&self) -> SlotSpan {
        SlotSpan::new(self.begin_slot, self.begin_slot + self.duration)
    }

    pub fn room_day(&self) -> RoomDay {
        RoomDay::new(&self.room_name, self.date)
    }

    pub fn into_reservation(self, id: Ulid) -> Reservation {
        Reservation {
            id,
            room_name: self.room_name,
            date: self.date,
            begin_slot: self.begin_slot,
            duration: self.duration,
            owner_id: self.owner_id,
        }
    }
}

/// Grouping key for availability: one room on one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomDay {
    pub room_name: String,
    pub date: NaiveDate,
}

impl RoomDay {
    pub fn new(room_name: &str, date: NaiveDate) -> Self {
        Self {
            room_name: room_name.to_string(),
            date,
        }
    }
}

/// Reservations of one RoomDay, kept sorted by `begin_slot`.
#[derive(Debug, Clone)]
pub struct DayState {
    pub key: RoomDay,
    pub reservations: Vec<Reservation>,
}

impl DayState {
    pub fn new(key: RoomDay) -> Self {
        Self {
            key,
            reservations: Vec::new(),
        }
    }

    /// Insert maintaining sort order by begin slot.
    pub fn insert(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.begin_slot <= reservation.begin_slot);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Reservations whose range overlaps `query`. Everything at or past the
    /// partition point starts at or after `query.end` and cannot overlap.
    pub fn overlapping(&self, query: &SlotSpan) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.begin_slot < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.begin_slot + r.duration > query.start)
    }
}

/// WAL record format. Flat, one variant per committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated(Reservation),
    ReservationCancelled {
        id: Ulid,
        room_name: String,
        date: NaiveDate,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "reservation-created")]
    Created,
    #[serde(rename = "reservation-cancelled")]
    Cancelled,
}

/// Immutable notification of one committed create or cancel, broadcast once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainEvent {
    /// Position in the global commit order.
    pub seq: u64,
    pub kind: EventKind,
    pub reservation: Reservation,
}

/// Wire payload pushed to live sessions.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload<'a> {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub room_name: &'a str,
    pub date: NaiveDate,
    pub begin_slot: Slot,
    pub duration_slots: Slot,
    pub reservation_id: Ulid,
    pub seq: u64,
}

impl DomainEvent {
    pub fn created(reservation: Reservation, seq: u64) -> Self {
        Self {
            seq,
            kind: EventKind::Created,
            reservation,
        }
    }

    pub fn cancelled(reservation: Reservation, seq: u64) -> Self {
        Self {
            seq,
            kind: EventKind::Cancelled,
            reservation,
        }
    }

    pub fn payload(&self) -> NotificationPayload<'_> {
        NotificationPayload {
            kind: self.kind,
            room_name: &self.reservation.room_name,
            date: self.reservation.date,
            begin_slot: self.reservation.begin_slot,
            duration_slots: self.reservation.duration,
            reservation_id: self.reservation.id,
            seq: self.seq,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.payload())
    }
}
