use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::model::Slot;

/// Minutes per slot.
pub const SLOT_MINUTES: u32 = 30;

/// Slots in a calendar day.
pub const SLOTS_PER_DAY: Slot = 48;

/// Default opening: 08:00.
pub const DEFAULT_OPEN_SLOT: Slot = 16;

/// Default closing: 21:00.
pub const DEFAULT_CLOSE_SLOT: Slot = 42;

#[derive(Debug, Clone, PartialEq)]
pub enum ClockError {
    OutOfWindow { slot: Slot, open: Slot, close: Slot },
    InvalidDuration(String),
    InvalidWindow { open: Slot, close: Slot },
}

impl std::fmt::Display for ClockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClockError::OutOfWindow { slot, open, close } => {
                write!(f, "slot {slot} outside operating window [{open}, {close})")
            }
            ClockError::InvalidDuration(d) => {
                write!(f, "invalid duration {d}: must be a positive multiple of 0.5 hours")
            }
            ClockError::InvalidWindow { open, close } => {
                write!(f, "invalid operating window [{open}, {close})")
            }
        }
    }
}

impl std::error::Error for ClockError {}

/// Converts between venue-local wall-clock time and half-hour slot indices
/// inside the operating window `[open, close)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotClock {
    open: Slot,
    close: Slot,
}

impl Default for SlotClock {
    fn default() -> Self {
        Self {
            open: DEFAULT_OPEN_SLOT,
            close: DEFAULT_CLOSE_SLOT,
        }
    }
}

impl SlotClock {
    pub fn new(open: Slot, close: Slot) -> Result<Self, ClockError> {
        if open >= close || close > SLOTS_PER_DAY {
            return Err(ClockError::InvalidWindow { open, close });
        }
        Ok(Self { open, close })
    }

    pub fn open_slot(&self) -> Slot {
        self.open
    }

    pub fn close_slot(&self) -> Slot {
        self.close
    }

    /// Number of slots in the operating window.
    pub fn window_len(&self) -> Slot {
        self.close - self.open
    }

    fn out_of_window(&self, slot: Slot) -> ClockError {
        ClockError::OutOfWindow {
            slot,
            open: self.open,
            close: self.close,
        }
    }

    /// Slot containing `time`, rounded down to the half-hour boundary.
    pub fn to_slot(&self, time: NaiveTime) -> Result<Slot, ClockError> {
        let slot = raw_slot(time);
        if slot < self.open || slot >= self.close {
            return Err(self.out_of_window(slot));
        }
        Ok(slot)
    }

    /// Start time of a slot in the window.
    pub fn to_time(&self, slot: Slot) -> Result<NaiveTime, ClockError> {
        if slot < self.open || slot >= self.close {
            return Err(self.out_of_window(slot));
        }
        self.boundary_time(slot)
    }

    /// Time of a slot boundary; unlike [`to_time`](Self::to_time) this accepts
    /// `close`, so the end of the last slot can be rendered.
    pub fn boundary_time(&self, boundary: Slot) -> Result<NaiveTime, ClockError> {
        if boundary < self.open || boundary > self.close {
            return Err(self.out_of_window(boundary));
        }
        let minutes = boundary * SLOT_MINUTES;
        NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0).ok_or(self.out_of_window(boundary))
    }

    /// Convert a length in hours to a slot count. 1.5 → 3.
    pub fn duration_to_slots(hours: f64) -> Result<Slot, ClockError> {
        let halves = hours * 2.0;
        if !hours.is_finite() || hours <= 0.0 || halves.fract() != 0.0 || halves > Slot::MAX as f64 {
            return Err(ClockError::InvalidDuration(hours.to_string()));
        }
        Ok(halves as Slot)
    }

    /// Validate a booking range: `duration >= 1` and `[begin, begin + duration)`
    /// inside the window.
    pub fn check_range(&self, begin: Slot, duration: Slot) -> Result<(), ClockError> {
        if duration == 0 {
            return Err(ClockError::InvalidDuration("0 slots".into()));
        }
        if begin < self.open || begin >= self.close {
            return Err(self.out_of_window(begin));
        }
        match begin.checked_add(duration) {
            Some(end) if end <= self.close => Ok(()),
            _ => Err(self.out_of_window(begin.saturating_add(duration).saturating_sub(1))),
        }
    }

    /// Earliest start slot still bookable on `date` as seen at `now`.
    ///
    /// `None` for future dates. For today, the slot containing `now`. For past
    /// dates, `close`, which leaves nothing bookable.
    pub fn earliest_start(&self, date: NaiveDate, now: NaiveDateTime) -> Option<Slot> {
        let today = now.date();
        if date > today {
            None
        } else if date == today {
            Some(raw_slot(now.time()))
        } else {
            Some(self.close)
        }
    }
}

fn raw_slot(time: NaiveTime) -> Slot {
    (time.hour() * 60 + time.minute()) / SLOT_MINUTES
}
