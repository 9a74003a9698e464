//! Buffered, CRC-framed binary stream codec. One `StreamWriter` or
//! `StreamReader` owns one file in one direction, holding an advisory `fs4`
//! lock on it (exclusive for writers, shared for readers) and closing it on
//! drop, the same "a storage handle owns its file descriptor, closed on
//! drop" convention used elsewhere in this lineage of storage-engine crates.
//! Grounded in `examples/original_source/serializer.{hpp,cpp}` for the
//! buffering/flush discipline and header layout; normalizes the original's
//! host-endian primitive I/O to explicit little-endian via `byteorder`, the
//! crate the rest of the retrieval pack reaches for whenever it needs
//! portable fixed-width encoding.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use fs4::fs_std::FileExt;

use crate::crc;
use crate::error::CodecError;

const MAGIC: &[u8; 4] = b"OSMb";
const VERSION: u16 = 1;
const HEADER_LEN: u64 = 16;

const FLAG_NO_CRC32: u16 = 0b0100;

/// Tunable buffer sizing. Flush granularity is always half of `buffer_size`
/// so that no single primitive (max width 8 bytes) can ever be split across
/// a flush boundary relative to the remaining headroom.
#[derive(Clone, Copy, Debug)]
pub struct StreamOptions {
    pub buffer_size: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        StreamOptions { buffer_size: 8192 }
    }
}

impl StreamOptions {
    fn flush_granularity(&self) -> usize {
        self.buffer_size / 2
    }
}

fn decode_short_uint_from(byte0: u8, mut next: impl FnMut() -> Result<u8, CodecError>) -> Result<u32, CodecError> {
    if byte0 & 0x80 == 0 {
        return Ok(byte0 as u32);
    }
    let byte1 = next()?;
    if byte1 & 0x80 == 0 {
        return Ok((byte0 & 0x7F) as u32 | ((byte1 as u32) << 7));
    }
    let byte2 = next()?;
    let byte3 = next()?;
    let lo = (byte0 & 0x7F) as u32 | (((byte1 & 0x7F) as u32) << 7);
    let hi = (byte2 as u32) << 14 | (byte3 as u32) << 22;
    Ok(lo | hi)
}

/// Encodes into a 4-byte scratch buffer and returns how many of its bytes are
/// used, avoiding a heap allocation for what is the hottest path in the node
/// and way sections.
fn encode_short_uint(v: u32) -> Result<([u8; 4], usize), CodecError> {
    if v < (1 << 7) {
        Ok(([v as u8, 0, 0, 0], 1))
    } else if v < (1 << 14) {
        Ok(([((v & 0x7F) | 0x80) as u8, (v >> 7) as u8, 0, 0], 2))
    } else if v < (1 << 30) {
        Ok((
            [
                ((v & 0x7F) | 0x80) as u8,
                (((v >> 7) & 0x7F) | 0x80) as u8,
                ((v >> 14) & 0xFF) as u8,
                ((v >> 22) & 0xFF) as u8,
            ],
            4,
        ))
    } else {
        Err(CodecError::EncodingOverflow)
    }
}

fn encode_short_int(v: i32) -> Result<([u8; 4], usize), CodecError> {
    let mag = v.unsigned_abs();
    if mag >= (1 << 29) {
        return Err(CodecError::EncodingOverflow);
    }
    let sign = if v < 0 { 1u32 } else { 0u32 };
    encode_short_uint((mag << 1) | sign)
}

fn decode_short_int_value(encoded: u32) -> i32 {
    let sign = encoded & 1;
    let mag = (encoded >> 1) as i32;
    if sign == 1 {
        -mag
    } else {
        mag
    }
}

/// Writer half of the codec: owns the file, buffers writes, and back-patches
/// the header CRC on close.
pub struct StreamWriter {
    file: File,
    buffer: Vec<u8>,
    position_in_buffer: usize,
    position_in_file: u64,
    flush_granularity: usize,
    running_crc: u32,
    incremental_crc_enabled: bool,
    finished: bool,
}

impl StreamWriter {
    /// Create (truncating) the file at `path`, write the placeholder header,
    /// and return a writer ready to accept section data starting at byte 16.
    pub fn create(path: impl AsRef<Path>, options: StreamOptions) -> Result<Self, CodecError> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.try_lock_exclusive().map_err(CodecError::Lock)?;

        let mut header = [0u8; HEADER_LEN as usize];
        header[0..4].copy_from_slice(MAGIC);
        LittleEndian::write_u16(&mut header[4..6], VERSION);
        LittleEndian::write_u16(&mut header[6..8], 0);
        file.write_all(&header)?;

        Ok(StreamWriter {
            file,
            buffer: vec![0u8; options.buffer_size],
            position_in_buffer: 0,
            position_in_file: HEADER_LEN,
            flush_granularity: options.flush_granularity(),
            running_crc: crc::INITIAL,
            incremental_crc_enabled: true,
            finished: false,
        })
    }

    /// Virtual write cursor: bytes already flushed plus bytes staged in the
    /// buffer.
    pub fn current_position(&self) -> u64 {
        self.position_in_file + self.position_in_buffer as u64
    }

    fn flush_chunk(&mut self) -> Result<(), CodecError> {
        let amount = self.flush_granularity.min(self.position_in_buffer);
        if amount == 0 {
            return Ok(());
        }
        self.file.write_all(&self.buffer[..amount])?;
        if self.incremental_crc_enabled {
            self.running_crc = crc::update(self.running_crc, &self.buffer[..amount]);
        }
        self.buffer.copy_within(amount..self.position_in_buffer, 0);
        self.position_in_buffer -= amount;
        self.position_in_file += amount as u64;
        Ok(())
    }

    fn ensure_room(&mut self) -> Result<(), CodecError> {
        if self.position_in_buffer >= self.flush_granularity {
            self.flush_chunk()?;
        }
        Ok(())
    }

    fn write_fixed(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.ensure_room()?;
        let start = self.position_in_buffer;
        self.buffer[start..start + bytes.len()].copy_from_slice(bytes);
        self.position_in_buffer += bytes.len();
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> Result<(), CodecError> {
        self.write_fixed(&[v])
    }

    pub fn write_u32(&mut self, v: u32) -> Result<(), CodecError> {
        let mut b = [0u8; 4];
        LittleEndian::write_u32(&mut b, v);
        self.write_fixed(&b)
    }

    pub fn write_u64(&mut self, v: u64) -> Result<(), CodecError> {
        let mut b = [0u8; 8];
        LittleEndian::write_u64(&mut b, v);
        self.write_fixed(&b)
    }

    pub fn write_f64(&mut self, v: f64) -> Result<(), CodecError> {
        let mut b = [0u8; 8];
        LittleEndian::write_f64(&mut b, v);
        self.write_fixed(&b)
    }

    pub fn write_short_uint(&mut self, v: u32) -> Result<(), CodecError> {
        let (bytes, len) = encode_short_uint(v)?;
        self.write_fixed(&bytes[..len])
    }

    pub fn write_short_int(&mut self, v: i32) -> Result<(), CodecError> {
        let (bytes, len) = encode_short_int(v)?;
        self.write_fixed(&bytes[..len])
    }

    /// Write at most `flush_granularity` bytes of `bytes`, returning the
    /// number actually written. The caller loops until all bytes are moved.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<usize, CodecError> {
        self.ensure_room()?;
        let n = bytes.len().min(self.flush_granularity);
        let start = self.position_in_buffer;
        self.buffer[start..start + n].copy_from_slice(&bytes[..n]);
        self.position_in_buffer += n;
        Ok(n)
    }

    /// Flush pending writes, reposition the OS file pointer, and disable
    /// incremental CRC for the rest of this writer's life: the header CRC
    /// will be recomputed from scratch on `finish`.
    pub fn set_position(&mut self, pos: u64) -> Result<(), CodecError> {
        self.file.write_all(&self.buffer[..self.position_in_buffer])?;
        self.position_in_buffer = 0;
        self.file.seek(SeekFrom::Start(pos))?;
        self.position_in_file = pos;
        self.incremental_crc_enabled = false;
        Ok(())
    }

    /// Flush all outstanding bytes, finalize or recompute the header CRC,
    /// back-patch bytes 8..16, and close the file.
    pub fn finish(mut self) -> Result<(), CodecError> {
        self.finish_inner()
    }

    fn finish_inner(&mut self) -> Result<(), CodecError> {
        if self.finished {
            return Ok(());
        }
        self.file.write_all(&self.buffer[..self.position_in_buffer])?;
        if self.incremental_crc_enabled {
            self.running_crc = crc::update(self.running_crc, &self.buffer[..self.position_in_buffer]);
        }
        self.position_in_file += self.position_in_buffer as u64;
        self.position_in_buffer = 0;

        let crc = if self.incremental_crc_enabled {
            crc::finalize(self.running_crc)
        } else {
            self.recompute_crc()?
        };

        let mut tail = [0u8; 8];
        LittleEndian::write_u32(&mut tail[0..4], crc);
        LittleEndian::write_u32(&mut tail[4..8], !crc);
        self.file.seek(SeekFrom::Start(8))?;
        self.file.write_all(&tail)?;
        self.file.flush()?;
        self.finished = true;
        Ok(())
    }

    fn recompute_crc(&mut self) -> Result<u32, CodecError> {
        self.file.seek(SeekFrom::Start(HEADER_LEN))?;
        let mut crc = crc::INITIAL;
        let mut chunk = vec![0u8; self.buffer.len()];
        loop {
            let n = self.file.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            crc = crc::update(crc, &chunk[..n]);
        }
        Ok(crc::finalize(crc))
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        let _ = self.finish_inner();
    }
}

/// Reader half of the codec: validates the header on open, then supports
/// sequential reads with the same primitive set as the writer. `set_position`
/// is intentionally not exposed — the format's only backwards seek is the
/// writer's own header patching.
pub struct StreamReader {
    file: File,
    buffer: Vec<u8>,
    position_in_buffer: usize,
    buffer_used: usize,
    position_in_file: u64,
    bytes_in_file: u64,
    running_crc: u32,
    header_crc: u32,
    finished: bool,
}

impl StreamReader {
    pub fn open(path: impl AsRef<Path>, options: StreamOptions) -> Result<Self, CodecError> {
        let mut file = File::open(path)?;
        file.try_lock_shared().map_err(CodecError::Lock)?;
        let bytes_in_file = file.metadata()?.len();

        let mut header = [0u8; HEADER_LEN as usize];
        file.read_exact(&mut header)?;
        if &header[0..4] != MAGIC {
            return Err(CodecError::CorruptHeader("bad magic"));
        }
        let flags = LittleEndian::read_u16(&header[6..8]);
        let crc = LittleEndian::read_u32(&header[8..12]);
        let inv_crc = LittleEndian::read_u32(&header[12..16]);
        if crc ^ inv_crc != 0xFFFF_FFFF {
            return Err(CodecError::CorruptHeader("crc / inv_crc mismatch"));
        }
        let _ = flags & FLAG_NO_CRC32;

        Ok(StreamReader {
            file,
            buffer: vec![0u8; options.buffer_size],
            position_in_buffer: 0,
            buffer_used: 0,
            position_in_file: HEADER_LEN,
            bytes_in_file,
            running_crc: crc::INITIAL,
            header_crc: crc,
            finished: false,
        })
    }

    /// Virtual read cursor: bytes consumed from the file minus the
    /// still-unread tail currently sitting in the buffer.
    pub fn current_position(&self) -> u64 {
        self.position_in_file - (self.buffer_used - self.position_in_buffer) as u64
    }

    fn refill(&mut self) -> Result<(), CodecError> {
        let tail = self.buffer_used - self.position_in_buffer;
        self.buffer.copy_within(self.position_in_buffer..self.buffer_used, 0);
        self.position_in_buffer = 0;
        self.buffer_used = tail;

        let remaining_in_file = self.bytes_in_file - self.position_in_file;
        let room = self.buffer.len() - self.buffer_used;
        let to_read = remaining_in_file.min(room as u64) as usize;
        if to_read == 0 {
            return Ok(());
        }
        let n = self.file.read(&mut self.buffer[self.buffer_used..self.buffer_used + to_read])?;
        self.running_crc = crc::update(self.running_crc, &self.buffer[self.buffer_used..self.buffer_used + n]);
        self.buffer_used += n;
        self.position_in_file += n as u64;
        Ok(())
    }

    fn ensure_available(&mut self, n: usize) -> Result<(), CodecError> {
        if self.buffer_used - self.position_in_buffer < n {
            self.refill()?;
        }
        if self.buffer_used - self.position_in_buffer < n {
            return Err(CodecError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stream ended before the expected number of bytes were available",
            )));
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> &[u8] {
        let start = self.position_in_buffer;
        self.position_in_buffer += n;
        &self.buffer[start..start + n]
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        self.ensure_available(1)?;
        Ok(self.take(1)[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        self.ensure_available(4)?;
        Ok(LittleEndian::read_u32(self.take(4)))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        self.ensure_available(8)?;
        Ok(LittleEndian::read_u64(self.take(8)))
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        self.ensure_available(8)?;
        Ok(LittleEndian::read_f64(self.take(8)))
    }

    pub fn read_short_uint(&mut self) -> Result<u32, CodecError> {
        let byte0 = self.read_u8()?;
        self.read_short_uint_continuing(byte0)
    }

    /// Decode a `short_uint` whose first byte has already been consumed by
    /// the caller (used by the ways decoder to peek the ref-escape sentinel
    /// without a dedicated "unread" operation).
    pub fn read_short_uint_continuing(&mut self, byte0: u8) -> Result<u32, CodecError> {
        decode_short_uint_from(byte0, || self.read_u8())
    }

    pub fn read_short_int(&mut self) -> Result<i32, CodecError> {
        let encoded = self.read_short_uint()?;
        Ok(decode_short_int_value(encoded))
    }

    pub fn read_short_int_continuing(&mut self, byte0: u8) -> Result<i32, CodecError> {
        let encoded = self.read_short_uint_continuing(byte0)?;
        Ok(decode_short_int_value(encoded))
    }

    /// Read at most `buf.len()` bytes (capped at the flush granularity),
    /// returning the number actually read; 0 means EOF.
    pub fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let want = buf.len().min(self.buffer.len() / 2);
        if self.buffer_used - self.position_in_buffer < want {
            self.refill()?;
        }
        let avail = self.buffer_used - self.position_in_buffer;
        let n = avail.min(want);
        buf[..n].copy_from_slice(self.take(n));
        Ok(n)
    }

    pub fn assert_position(&self, expected: u64) -> Result<(), CodecError> {
        let actual = self.current_position();
        if actual != expected {
            return Err(CodecError::DesyncAssertion {
                expected: expected as u32,
                actual: actual as u32,
            });
        }
        Ok(())
    }

    /// Validate the running CRC against the header once the caller believes
    /// it has consumed the entire body. Reads and CRC-folds any bytes the
    /// caller left unconsumed, so it's safe to call as soon as the caller is
    /// done decoding rather than only after reading the literal last byte.
    /// Idempotent: the unread-bytes catch-up only runs once, but every call
    /// re-reports the same CRC-match verdict. Also run from `Drop`, so this
    /// check isn't opt-in for callers that don't call it explicitly (e.g. if
    /// they drop a reader mid-decode).
    pub fn finish(&mut self) -> Result<(), CodecError> {
        self.finish_inner()
    }

    fn finish_inner(&mut self) -> Result<(), CodecError> {
        if !self.finished {
            while self.position_in_file < self.bytes_in_file {
                self.refill()?;
                if self.buffer_used == self.position_in_buffer {
                    break;
                }
                self.position_in_buffer = self.buffer_used;
            }
            self.finished = true;
        }
        let computed = crc::finalize(self.running_crc);
        if computed != self.header_crc {
            return Err(CodecError::CrcMismatch { expected: self.header_crc, computed });
        }
        Ok(())
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        let _ = self.finish_inner();
    }
}
