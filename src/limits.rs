/// Longest accepted room name, in bytes.
pub const MAX_ROOM_NAME_LEN: usize = 128;

/// Longest accepted owner id, in bytes.
pub const MAX_OWNER_ID_LEN: usize = 256;

/// Upper bound on reservations held for a single room on a single day.
/// A 48-slot day can never legitimately exceed this.
pub const MAX_RESERVATIONS_PER_ROOM_DAY: usize = 48;

/// Upper bound on concurrently registered live sessions.
pub const MAX_SESSIONS: usize = 10_000;

/// Channel name used for LISTEN / NOTIFY.
pub const NOTIFY_CHANNEL: &str = "reservations";
