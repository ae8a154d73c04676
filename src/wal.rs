use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// File magic followed by the format version.
const HEADER: [u8; 5] = *b"APTW\x01";

/// Encode a single event to [len][bincode][crc32] format.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Read one `[len][payload][crc]` record. `None` on clean end of file, on a
/// torn tail, and on a record whose checksum or payload does not verify.
fn read_record(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Some((event, (len + 8) as u64))),
        Err(_) => Ok(None),
    }
}

/// `read_exact` that reports a short read as `false` instead of an error.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Valid events and the byte length they occupy, header included.
fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);

    let mut header = [0u8; HEADER.len()];
    if !read_full(&mut reader, &mut header)? {
        // Crashed while creating the file.
        return Ok((Vec::new(), 0));
    }
    if header != HEADER {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} is not an appointment log", path.display()),
        ));
    }

    let mut events = Vec::new();
    let mut valid = HEADER.len() as u64;
    while let Some((event, size)) = read_record(&mut reader)? {
        events.push(event);
        valid += size;
    }
    Ok((events, valid))
}

fn write_header(file: &mut File) -> io::Result<()> {
    file.write_all(&HEADER)?;
    file.sync_all()
}

/// Append-only Write-Ahead Log of one business.
///
/// Layout: a 5-byte header (`APTW` + version), then per entry
/// `[u32: len][bincode: Event][u32: crc32]`. `len` counts the payload only.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the WAL at `path`, returning the events it holds.
    ///
    /// A torn or corrupt tail is cut off so that new appends land directly
    /// after the last good record.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, valid) = scan(path)?;
        if valid == 0 {
            let mut file = File::create(path)?;
            write_header(&mut file)?;
        } else if fs::metadata(path)?.len() > valid {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid)?;
            file.sync_all()?;
            tracing::warn!(path = %path.display(), valid_bytes = valid, "discarded torn WAL tail");
        }

        let file = OpenOptions::new().append(true).open(path)?;
        let wal = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: events.len() as u64,
        };
        Ok((wal, events))
    }

    /// Append a single event to the WAL and fsync. Used by tests only;
    /// the writer task uses `append_buffered` + `flush_sync` for group commit.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Append a single event to the BufWriter without flushing or syncing.
    /// Call `flush_sync()` after the batch to durably commit all buffered events.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush the BufWriter and fsync the underlying file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write compacted events to a temp file and fsync.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let mut file = File::create(&tmp_path)?;
        file.write_all(&HEADER)?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Atomic swap: rename temp file over the WAL and reopen.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// Records written since the last compaction (or since startup replay).
    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read every valid event without touching the file.
    #[cfg(test)]
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        scan(path).map(|(events, _)| events)
    }
}
