use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// File header. Bump the trailing version byte when `Event` changes shape.
const MAGIC: &[u8; 8] = b"RBKWAL\x00\x01";

/// Upper bound on a single record; anything larger is treated as corruption.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Encode one event as `[u32 len][bincode payload][u32 crc32]`, little-endian.
fn encode_frame(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

enum Frame {
    /// An intact event and the number of bytes its frame occupies.
    Event(Event, u64),
    /// Clean end of file.
    End,
    /// Partial or corrupt record; everything from here on is discarded.
    Torn,
}

fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn decode_frame(reader: &mut impl Read) -> io::Result<Frame> {
    let mut len_buf = [0u8; 4];
    let mut first = [0u8; 1];
    // Distinguish a clean EOF (no bytes at all) from a torn length prefix.
    if reader.read(&mut first)? == 0 {
        return Ok(Frame::End);
    }
    len_buf[0] = first[0];
    if !read_exact_or_eof(reader, &mut len_buf[1..])? {
        return Ok(Frame::Torn);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Ok(Frame::Torn);
    }

    let mut payload = vec![0u8; len];
    if !read_exact_or_eof(reader, &mut payload)? {
        return Ok(Frame::Torn);
    }
    let mut crc_buf = [0u8; 4];
    if !read_exact_or_eof(reader, &mut crc_buf)? {
        return Ok(Frame::Torn);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Frame::Torn);
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Frame::Event(event, (len + 8) as u64)),
        Err(_) => Ok(Frame::Torn),
    }
}

fn open_for_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    if writer.get_ref().metadata()?.len() == 0 {
        writer.write_all(MAGIC)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    Ok(writer)
}

/// Append-only write-ahead log of booking events.
///
/// Layout: an 8-byte header, then one frame per event. A crash can leave a torn
/// final frame; `recover` keeps everything before it and truncates the rest.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            writer: open_for_append(path)?,
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append and fsync one event. Production code batches via
    /// `append_buffered` + `flush_sync`.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_frame(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Write a compacted log to `<path>.tmp` and fsync it. Slow; the writer task
    /// runs it between batches.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        writer.write_all(MAGIC)?;
        for event in events {
            encode_frame(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the compacted file over the log and reopen it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        self.writer = open_for_append(&self.path)?;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// Read every intact event. A missing file is an empty log; a file with a
    /// foreign header is an error.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(scan(path)?.map(|(events, _)| events).unwrap_or_default())
    }

    /// Replay the log, then cut it back to the end of the last intact frame so
    /// later appends follow committed data instead of a torn tail. A partial
    /// header is cut to zero and rewritten by `open`.
    pub fn recover(path: &Path) -> io::Result<Vec<Event>> {
        let Some((events, valid_len)) = scan(path)? else {
            return Ok(Vec::new());
        };
        let file = OpenOptions::new().write(true).open(path)?;
        let len = file.metadata()?.len();
        if len > valid_len {
            tracing::warn!(
                "WAL {}: truncating {} trailing bytes",
                path.display(),
                len - valid_len
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok(events)
    }
}

/// Intact events plus the byte length they span, header included. `None` when
/// the file does not exist.
fn scan(path: &Path) -> io::Result<Option<(Vec<Event>, u64)>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    if file_len < MAGIC.len() as u64 {
        // Crash while writing the header: nothing was ever committed.
        let mut partial = Vec::new();
        reader.read_to_end(&mut partial)?;
        if !MAGIC.starts_with(&partial) {
            return Err(not_a_wal(path));
        }
        return Ok(Some((Vec::new(), 0)));
    }
    let mut header = [0u8; 8];
    reader.read_exact(&mut header)?;
    if &header != MAGIC {
        return Err(not_a_wal(path));
    }

    let mut events = Vec::new();
    let mut valid_len = MAGIC.len() as u64;
    loop {
        match decode_frame(&mut reader)? {
            Frame::Event(event, frame_len) => {
                events.push(event);
                valid_len += frame_len;
            }
            Frame::End => break,
            Frame::Torn => {
                tracing::warn!(
                    "WAL {}: discarding torn tail after {} events",
                    path.display(),
                    events.len()
                );
                break;
            }
        }
    }
    Ok(Some((events, valid_len)))
}

fn not_a_wal(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("{} is not a roombook WAL", path.display()),
    )
}
