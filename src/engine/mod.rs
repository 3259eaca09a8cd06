mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;
#[cfg(test)]
mod tests;

pub use availability::{bookable_starts, blocked_starts, merge_overlapping, occupied, subtract_intervals};
pub use error::EngineError;
pub use store::{ReservationStore, SharedDayState};

use std::io;
use std::path::Path;

use tokio::sync::{mpsc, oneshot};
use tracing::error;

use crate::bus::EventBus;
use crate::clock::SlotClock;
use crate::model::Event;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
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

fn spawn_wal_writer(wal: Wal) -> mpsc::Sender<WalCommand> {
    let (tx, rx) = mpsc::channel(4096);
    tokio::spawn(wal_writer_loop(wal, rx));
    tx
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued behind it.
/// 3. One flush_sync for the whole batch, then answer every sender.
///
/// A non-append command seen mid-drain closes the batch and runs after it.
async fn wal_writer_loop(wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut writer = WalWriter { wal, stopped: None };
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            writer.handle_non_append(cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = writer.flush_batch(&batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);

        if let Some(cmd) = deferred {
            writer.handle_non_append(cmd);
        }
    }
}

type Pending = (Event, oneshot::Sender<io::Result<()>>);

struct WalWriter {
    wal: Wal,
    /// Set once a failed write could not be rolled back. The file may then
    /// hold records that were reported as failed, so nothing more is written.
    stopped: Option<String>,
}

impl WalWriter {
    fn check_running(&self) -> io::Result<()> {
        match &self.stopped {
            Some(reason) => Err(io::Error::other(format!("WAL writer stopped: {reason}"))),
            None => Ok(()),
        }
    }

    /// Append and sync `batch` as one unit. On failure none of it stays in
    /// the log.
    fn flush_batch(&mut self, batch: &[Pending]) -> io::Result<()> {
        self.check_running()?;
        let result = batch
            .iter()
            .try_for_each(|(event, _)| self.wal.append_buffered(event))
            .and_then(|()| self.wal.flush_sync());
        if let Err(e) = &result {
            error!("WAL flush failed for {} records: {e}", batch.len());
            self.roll_back();
        }
        result
    }

    fn roll_back(&mut self) {
        if let Err(e) = self.wal.discard_unsynced() {
            error!(
                "could not roll {} back to {} bytes, refusing further writes: {e}",
                self.wal.path().display(),
                self.wal.synced_len()
            );
            self.stopped = Some(e.to_string());
        }
    }

    fn handle_non_append(&mut self, cmd: WalCommand) {
        match cmd {
            WalCommand::Compact { events, response } => {
                let result = self.check_running().and_then(|()| {
                    Wal::write_compact_file(self.wal.path(), &events)
                        .and_then(|()| self.wal.swap_compact_file())
                });
                let _ = response.send(result);
            }
            WalCommand::AppendsSinceCompact { response } => {
                let _ = response.send(self.wal.appends_since_compact());
            }
            WalCommand::Append { event, response } => {
                let batch = vec![(event, response)];
                let result = self.flush_batch(&batch);
                respond_batch(batch, &result);
            }
        }
    }
}

fn respond_batch(batch: Vec<Pending>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// The booking service: validates through the [`SlotClock`], commits through
/// the [`ReservationStore`] and publishes every commit on the [`EventBus`].
pub struct Engine {
    pub store: ReservationStore,
    pub bus: EventBus,
    pub clock: SlotClock,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer.
    /// Must be called inside a tokio runtime.
    pub fn open(wal_path: &Path, clock: SlotClock, bus: EventBus) -> io::Result<Self> {
        Ok(Self {
            store: ReservationStore::open(wal_path)?,
            bus,
            clock,
        })
    }
}
