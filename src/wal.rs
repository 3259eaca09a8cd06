use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Encode one record as `[len][bincode][crc32]`, returning its encoded size.
fn encode_record(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(8 + payload.len() as u64)
}

/// `Ok(None)` on a clean end of file or a torn trailing record.
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<Option<()>> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(Some(())),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

/// Decode the next record and its encoded size. `Ok(None)` stops replay: end
/// of log, a truncated tail, a CRC mismatch or an undecodable payload.
fn read_record(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if read_exact_or_eof(reader, &mut len_buf)?.is_none() {
        return Ok(None);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
    if read_exact_or_eof(reader, &mut payload)?.is_none() {
        warn!("WAL ends in a truncated record, discarding it");
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if read_exact_or_eof(reader, &mut crc_buf)?.is_none() {
        warn!("WAL ends in a truncated record, discarding it");
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        warn!("WAL record failed CRC check, stopping replay");
        return Ok(None);
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Some((event, 8 + payload.len() as u64))),
        Err(e) => {
            warn!("undecodable WAL record, stopping replay: {e}");
            Ok(None)
        }
    }
}

/// Append-only log of committed reservation changes.
///
/// Format per record: `[u32: len][bincode: Event][u32: crc32]`, little endian.
/// `len` counts only the payload. A crash mid-append leaves a torn tail that
/// replay drops.
///
/// Bytes past `synced_len` are not yet durable. After a failed append or
/// flush they must be dropped with [`discard_unsynced`](Self::discard_unsynced)
/// before the log is used again, or a later flush would persist records whose
/// callers were told the write failed.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    synced_len: u64,
    pending_len: u64,
    appends_since_compact: u64,
    pending_appends: u64,
    #[cfg(test)]
    pub(crate) faults: Faults,
}

/// Injected failures for exercising the writer's error path.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct Faults {
    /// The next sync fails after the buffer has reached the file.
    pub sync: bool,
    /// Every discard fails.
    pub discard: bool,
}

impl Wal {
    /// Open (or create) the log at `path` for appending.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = Self::open_append(path)?;
        let synced_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            synced_len,
            pending_len: 0,
            appends_since_compact: 0,
            pending_appends: 0,
            #[cfg(test)]
            faults: Faults::default(),
        })
    }

    fn open_append(path: &Path) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }

    /// Append and fsync a single record.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer a record. Durable only after the next [`flush_sync`](Self::flush_sync).
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.pending_len += encode_record(&mut self.writer, event)?;
        self.pending_appends += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        #[cfg(test)]
        if std::mem::take(&mut self.faults.sync) {
            return Err(io::Error::other("injected sync failure"));
        }
        self.writer.get_ref().sync_all()?;
        self.synced_len += self.pending_len;
        self.appends_since_compact += self.pending_appends;
        self.pending_len = 0;
        self.pending_appends = 0;
        Ok(())
    }

    /// Throw away every record appended since the last successful
    /// [`flush_sync`](Self::flush_sync): the unwritten buffer is dropped and
    /// whatever part of it already reached the file is truncated away.
    pub fn discard_unsynced(&mut self) -> io::Result<()> {
        let fresh = BufWriter::new(self.writer.get_ref().try_clone()?);
        // into_parts hands back the file without flushing the stale buffer
        let (_, _unwritten) = std::mem::replace(&mut self.writer, fresh).into_parts();
        self.pending_len = 0;
        self.pending_appends = 0;
        #[cfg(test)]
        if self.faults.discard {
            return Err(io::Error::other("injected discard failure"));
        }
        let file = self.writer.get_ref();
        if file.metadata()?.len() > self.synced_len {
            file.set_len(self.synced_len)?;
            file.sync_all()?;
        }
        Ok(())
    }

    /// Length of the log up to the last durable record.
    pub fn synced_len(&self) -> u64 {
        self.synced_len
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write `events` to the side file and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_path(path))?);
        for event in events {
            encode_record(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the side file over the log and reopen it for appending.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_path(&self.path), &self.path)?;
        let file = Self::open_append(&self.path)?;
        self.synced_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.pending_len = 0;
        self.appends_since_compact = 0;
        self.pending_appends = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Every intact record, oldest first. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(Self::scan(path)?.0)
    }

    /// Replay, then cut off whatever follows the last intact record so that
    /// records appended from now on stay reachable by the next replay.
    pub fn recover(path: &Path) -> io::Result<Vec<Event>> {
        let (events, valid_len) = Self::scan(path)?;
        if let Ok(meta) = fs::metadata(path)
            && meta.len() > valid_len
        {
            warn!(
                "truncating {} unreadable bytes from {}",
                meta.len() - valid_len,
                path.display()
            );
            OpenOptions::new().write(true).open(path)?.set_len(valid_len)?;
        }
        Ok(events)
    }

    fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut valid_len = 0;
        while let Some((event, size)) = read_record(&mut reader)? {
            events.push(event);
            valid_len += size;
        }
        Ok((events, valid_len))
    }
}
