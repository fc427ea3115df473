use std::{
    fs::File,
    io::{self, BufWriter, Cursor, Seek, SeekFrom, Write},
    path::Path,
};

use anyhow::{bail, Context, Result};

/// Capacity of the write buffer of buffered destinations
const OUTPUT_BUFFER_CAPACITY: usize = 1 << 16;

/// The destination medium a sink writes its bytes to.
///
/// Destinations differ in whether they can be seeked: files, in-memory buffers and the null medium can
/// (so headers can be patched after streaming), while pipes such as the standard output can only be
/// appended to. Sinks must query [is_seekable](OutputStream::is_seekable) instead of trying a seek and
/// handling the failure.
pub enum OutputStream {
    BufferedFile(BufWriter<File>),
    UnbufferedFile(File),
    /// An append-only destination. `position` counts the bytes written so far
    Pipe {
        writer: Box<dyn Write + Send>,
        position: u64,
    },
    Memory(Cursor<Vec<u8>>),
    /// Discards all bytes but keeps track of a virtual position and length
    Null { position: u64, len: u64 },
}

impl OutputStream {
    /// Creates (or truncates) the file at `path`
    pub fn create_file<P: AsRef<Path>>(path: P, buffered: bool) -> Result<Self> {
        let file = File::create(path.as_ref()).context(format!(
            "Could not open file {} for writing",
            path.as_ref().display()
        ))?;
        if buffered {
            Ok(Self::BufferedFile(BufWriter::with_capacity(
                OUTPUT_BUFFER_CAPACITY,
                file,
            )))
        } else {
            Ok(Self::UnbufferedFile(file))
        }
    }

    /// An append-only stream to the standard output of this process
    pub fn stdout(buffered: bool) -> Self {
        let writer: Box<dyn Write + Send> = if buffered {
            Box::new(BufWriter::with_capacity(
                OUTPUT_BUFFER_CAPACITY,
                io::stdout(),
            ))
        } else {
            Box::new(io::stdout())
        };
        Self::pipe(writer)
    }

    /// An append-only stream to an arbitrary writer
    pub fn pipe(writer: Box<dyn Write + Send>) -> Self {
        Self::Pipe {
            writer,
            position: 0,
        }
    }

    pub fn memory() -> Self {
        Self::Memory(Cursor::new(Vec::new()))
    }

    pub fn null() -> Self {
        Self::Null {
            position: 0,
            len: 0,
        }
    }

    /// Can this stream seek back to already written bytes?
    pub fn is_seekable(&self) -> bool {
        !matches!(self, Self::Pipe { .. })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null { .. })
    }

    /// Current write position in bytes. Never seeks, so this is valid for pipes as well
    pub fn position(&mut self) -> io::Result<u64> {
        match self {
            Self::Pipe { position, .. } => Ok(*position),
            Self::Null { position, .. } => Ok(*position),
            _ => self.seek(SeekFrom::Current(0)),
        }
    }

    /// Overwrites the bytes at `offset` with `bytes` and returns to the current write position
    ///
    /// # Errors
    ///
    /// Fails without touching the stream if it is not seekable
    pub fn overwrite_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        if !self.is_seekable() {
            bail!("OutputStream::overwrite_at: {:?} is not seekable", self);
        }
        let current_position = self.seek(SeekFrom::Current(0))?;
        self.seek(SeekFrom::Start(offset))?;
        self.write_all(bytes)?;
        self.seek(SeekFrom::Start(current_position))?;
        Ok(())
    }

    /// Returns the written bytes of an in-memory stream
    pub fn into_memory(self) -> Option<Vec<u8>> {
        match self {
            Self::Memory(cursor) => Some(cursor.into_inner()),
            _ => None,
        }
    }
}

impl Write for OutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::BufferedFile(writer) => writer.write(buf),
            Self::UnbufferedFile(file) => file.write(buf),
            Self::Pipe { writer, position } => {
                let written = writer.write(buf)?;
                *position += written as u64;
                Ok(written)
            }
            Self::Memory(cursor) => cursor.write(buf),
            Self::Null { position, len } => {
                *position += buf.len() as u64;
                *len = (*len).max(*position);
                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::BufferedFile(writer) => writer.flush(),
            Self::UnbufferedFile(file) => file.flush(),
            Self::Pipe { writer, .. } => writer.flush(),
            Self::Memory(cursor) => cursor.flush(),
            Self::Null { .. } => Ok(()),
        }
    }
}

impl Seek for OutputStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Self::BufferedFile(writer) => writer.seek(pos),
            Self::UnbufferedFile(file) => file.seek(pos),
            Self::Memory(cursor) => cursor.seek(pos),
            Self::Pipe { position, .. } => match pos {
                // Querying the position is the only 'seek' an append-only stream supports
                SeekFrom::Current(0) => Ok(*position),
                _ => Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "Cannot seek in an append-only output stream",
                )),
            },
            Self::Null { position, len } => {
                let target = match pos {
                    SeekFrom::Start(offset) => Some(offset),
                    SeekFrom::End(delta) => offset_by(*len, delta),
                    SeekFrom::Current(delta) => offset_by(*position, delta),
                };
                let target = target.ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "Seek to a negative position in the null output stream",
                    )
                })?;
                *position = target;
                Ok(target)
            }
        }
    }
}

fn offset_by(base: u64, delta: i64) -> Option<u64> {
    if delta >= 0 {
        base.checked_add(delta as u64)
    } else {
        base.checked_sub(delta.unsigned_abs())
    }
}

impl std::fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BufferedFile(_) => write!(f, "OutputStream::BufferedFile"),
            Self::UnbufferedFile(_) => write!(f, "OutputStream::UnbufferedFile"),
            Self::Pipe { position, .. } => write!(f, "OutputStream::Pipe(at {})", position),
            Self::Memory(cursor) => write!(f, "OutputStream::Memory({} bytes)", cursor.get_ref().len()),
            Self::Null { len, .. } => write!(f, "OutputStream::Null({} bytes)", len),
        }
    }
}
