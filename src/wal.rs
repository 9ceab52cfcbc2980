use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Upper bound on a single serialized event. A length prefix above this is
/// treated as a corrupt tail, not an allocation request.
const MAX_EVENT_BYTES: usize = 1 << 20;

/// Append-only write-ahead log of booking events.
///
/// Entry framing: `[u32 len][bincode Event][u32 crc32]`, all little-endian,
/// where `len` covers only the bincode payload. Replay stops at the first
/// entry that is truncated or fails its checksum, which makes a crash during
/// an append recoverable by simply dropping the torn tail.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

fn frame(event: &Event) -> io::Result<Vec<u8>> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut buf = Vec::with_capacity(payload.len() + 8);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(buf)
}

fn open_for_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

/// Read one framed entry. `Ok(None)` means a clean end of file; a torn or
/// corrupt entry is reported as `InvalidData` so the caller can stop there.
fn read_entry(reader: &mut impl Read) -> io::Result<Option<Event>> {
    let mut word = [0u8; 4];
    match reader.read_exact(&mut word) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_EVENT_BYTES {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "event length out of range"));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    reader.read_exact(&mut word)?;
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "checksum mismatch"));
    }

    bincode::deserialize(&payload)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

impl Wal {
    /// Open (or create) the log file at `path` for appending.
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            writer: open_for_append(path)?,
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Buffer one event without flushing. The entry is not durable until the
    /// next `flush_sync`; the group-commit writer batches several of these
    /// per fsync.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.writer.write_all(&frame(event)?)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush buffered entries and fsync the file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Buffer and immediately commit one event. Test convenience; production
    /// writes go through `append_buffered` + one `flush_sync` per batch.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Phase one of compaction: write the replacement log to a sibling temp
    /// file and fsync it. Slow I/O, safe to run while appends continue.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path.with_extension("wal.tmp"))?);
        for event in events {
            writer.write_all(&frame(event)?)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Phase two: rename the temp file over the live log and reopen the
    /// append handle. Must run with no append in flight.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(self.path.with_extension("wal.tmp"), &self.path)?;
        self.writer = open_for_append(&self.path)?;
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Both compaction phases back to back. Test convenience.
    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// Read every intact entry from the log. A missing file is an empty log;
    /// a torn or corrupt tail is discarded with a warning.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        loop {
            match read_entry(&mut reader) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => break,
                Err(e) if matches!(e.kind(), io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof) => {
                    tracing::warn!(
                        "discarding torn WAL tail after {} entries: {e}",
                        events.len()
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(events)
    }
}
