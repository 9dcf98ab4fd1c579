//! PKWARE Data Compression Library "explode" decoder
//!
//! Decompresses the `implode` format used inside DBC containers. The stream
//! starts with two bytes (literal mode, dictionary size) followed by an
//! LSB-first bit stream of literals and length/distance pairs coded with
//! fixed Huffman tables. A length of 519 terminates the stream.
//!
//! The decoder keeps a 4 KiB sliding window and flushes it to the writer
//! whenever it fills, so memory use does not depend on the payload size.

use crate::error::{Error, ExplodeError, Result};
use std::io::{self, Read, Write};
use std::sync::LazyLock;

/// Longest Huffman code in the fixed tables
const MAX_BITS: usize = 13;

/// Size of the sliding window (largest dictionary)
const WINDOW_SIZE: usize = 4096;

/// Length value that marks the end of the stream
const END_OF_STREAM: usize = 519;

/// Run-length coded bit lengths of the literal code (256 symbols)
const LITERAL_LENGTHS: [u8; 98] = [
    11, 124, 8, 7, 28, 7, 188, 13, 76, 4, 10, 8, 12, 10, 12, 10, 8, 23, 8, 9, 7, 6, 7, 8, 7, 6, 55,
    8, 23, 24, 12, 11, 7, 9, 11, 12, 6, 7, 22, 5, 7, 24, 6, 11, 9, 6, 7, 22, 7, 11, 38, 7, 9, 8, 25,
    11, 8, 11, 9, 12, 8, 12, 5, 38, 5, 38, 5, 11, 7, 5, 6, 21, 6, 10, 53, 8, 7, 24, 10, 27, 44, 253,
    253, 253, 252, 252, 252, 13, 12, 45, 12, 45, 12, 61, 12, 45, 44, 173,
];

/// Run-length coded bit lengths of the length code (16 symbols)
const LENGTH_LENGTHS: [u8; 6] = [2, 35, 36, 53, 38, 23];

/// Run-length coded bit lengths of the distance code (64 symbols)
const DISTANCE_LENGTHS: [u8; 7] = [2, 20, 53, 230, 247, 151, 248];

/// Base match length for each length symbol
const LENGTH_BASE: [u16; 16] = [3, 2, 4, 5, 6, 7, 8, 9, 10, 12, 16, 24, 40, 72, 136, 264];

/// Extra bits following each length symbol
const LENGTH_EXTRA: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8];

static LITERAL_CODE: LazyLock<Huffman> = LazyLock::new(|| Huffman::from_rep(&LITERAL_LENGTHS));
static LENGTH_CODE: LazyLock<Huffman> = LazyLock::new(|| Huffman::from_rep(&LENGTH_LENGTHS));
static DISTANCE_CODE: LazyLock<Huffman> = LazyLock::new(|| Huffman::from_rep(&DISTANCE_LENGTHS));

/// Canonical Huffman decoding table
struct Huffman {
    /// Number of codes of each length
    count: [u16; MAX_BITS + 1],
    /// Symbols ordered by code
    symbol: Vec<u16>,
}

impl Huffman {
    /// Build a table from run-length coded bit lengths.
    ///
    /// Each byte describes `(byte >> 4) + 1` consecutive symbols of bit length `byte & 15`.
    fn from_rep(rep: &[u8]) -> Self {
        let lengths: Vec<usize> = rep
            .iter()
            .flat_map(|&b| std::iter::repeat_n(usize::from(b & 15), usize::from(b >> 4) + 1))
            .collect();

        let mut count = [0u16; MAX_BITS + 1];
        for &len in &lengths {
            count[len] += 1;
        }

        let mut offsets = [0usize; MAX_BITS + 1];
        for len in 1..MAX_BITS {
            offsets[len + 1] = offsets[len] + usize::from(count[len]);
        }

        let mut symbol = vec![0u16; lengths.len()];
        for (sym, &len) in lengths.iter().enumerate() {
            if len != 0 {
                symbol[offsets[len]] = sym as u16;
                offsets[len] += 1;
            }
        }

        Self { count, symbol }
    }
}

/// LSB-first bit reader over a buffered byte source
struct BitReader<R> {
    inner: R,
    buf: Box<[u8]>,
    pos: usize,
    filled: usize,
    bit_buf: u32,
    bit_count: u32,
    consumed: u64,
}

impl<R: Read> BitReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            buf: vec![0u8; 16 * 1024].into_boxed_slice(),
            pos: 0,
            filled: 0,
            bit_buf: 0,
            bit_count: 0,
            consumed: 0,
        }
    }

    fn next_byte(&mut self) -> Result<u8> {
        if self.pos == self.filled {
            self.filled = loop {
                match self.inner.read(&mut self.buf) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(Error::Io(e)),
                }
            };
            self.pos = 0;
            if self.filled == 0 {
                return Err(ExplodeError::UnexpectedEof.into());
            }
        }
        let byte = self.buf[self.pos];
        self.pos += 1;
        self.consumed += 1;
        Ok(byte)
    }

    /// Read `need` bits (at most 16), least significant first
    fn bits(&mut self, need: u32) -> Result<u32> {
        while self.bit_count < need {
            self.bit_buf |= u32::from(self.next_byte()?) << self.bit_count;
            self.bit_count += 8;
        }
        let value = self.bit_buf & ((1u32 << need) - 1);
        self.bit_buf >>= need;
        self.bit_count -= need;
        Ok(value)
    }

    /// Decode one symbol. Codes are stored bit-inverted in the stream.
    fn decode(&mut self, table: &Huffman) -> Result<usize> {
        let mut code: i32 = 0;
        let mut first: i32 = 0;
        let mut index: i32 = 0;
        for len in 1..=MAX_BITS {
            code |= (self.bits(1)? ^ 1) as i32;
            let count = i32::from(table.count[len]);
            if code < first + count {
                return Ok(usize::from(table.symbol[(index + code - first) as usize]));
            }
            index += count;
            first += count;
            first <<= 1;
            code <<= 1;
        }
        Err(ExplodeError::InvalidCode.into())
    }

    /// Discard whatever input follows the end code, returning its length
    fn drain(mut self) -> io::Result<u64> {
        let buffered = (self.filled - self.pos) as u64;
        let rest = io::copy(&mut self.inner, &mut io::sink())?;
        Ok(buffered + rest)
    }
}

/// Sliding window that flushes to the output whenever it fills
struct Window<'w, W: Write + ?Sized> {
    out: &'w mut W,
    buf: Box<[u8; WINDOW_SIZE]>,
    next: usize,
    total: u64,
}

impl<'w, W: Write + ?Sized> Window<'w, W> {
    fn new(out: &'w mut W) -> Self {
        Self {
            out,
            buf: Box::new([0u8; WINDOW_SIZE]),
            next: 0,
            total: 0,
        }
    }

    fn push(&mut self, byte: u8) -> Result<()> {
        self.buf[self.next] = byte;
        self.next += 1;
        self.total += 1;
        if self.next == WINDOW_SIZE {
            self.out.write_all(&self.buf[..])?;
            self.next = 0;
        }
        Ok(())
    }

    fn copy_match(&mut self, distance: usize, length: usize) -> Result<()> {
        if distance as u64 > self.total {
            return Err(ExplodeError::DistanceTooFar {
                distance,
                available: self.total,
            }
            .into());
        }
        for _ in 0..length {
            let byte = self.buf[(self.next + WINDOW_SIZE - distance) % WINDOW_SIZE];
            self.push(byte)?;
        }
        Ok(())
    }

    fn finish(self) -> Result<u64> {
        self.out.write_all(&self.buf[..self.next])?;
        Ok(self.total)
    }
}

/// Counters from one explode run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExplodeStats {
    /// Compressed bytes consumed up to and including the end code
    pub bytes_in: u64,
    /// Decompressed bytes written
    pub bytes_out: u64,
    /// Bytes found after the end code and ignored
    pub trailing: u64,
}

/// Decompress an implode stream from `input` into `output`
pub fn explode<R: Read, W: Write + ?Sized>(input: R, output: &mut W) -> Result<ExplodeStats> {
    let mut reader = BitReader::new(input);

    let literal_mode = reader.bits(8)? as u8;
    if literal_mode > 1 {
        return Err(ExplodeError::InvalidLiteralMode(literal_mode).into());
    }
    let coded_literals = literal_mode == 1;

    let dict = reader.bits(8)? as u8;
    if !(4..=6).contains(&dict) {
        return Err(ExplodeError::InvalidDictionarySize(dict).into());
    }
    let dict_bits = u32::from(dict);

    let mut window = Window::new(output);
    loop {
        if reader.bits(1)? == 1 {
            let symbol = reader.decode(&LENGTH_CODE)?;
            let length = usize::from(LENGTH_BASE[symbol])
                + reader.bits(u32::from(LENGTH_EXTRA[symbol]))? as usize;
            if length == END_OF_STREAM {
                break;
            }
            let low_bits = if length == 2 { 2 } else { dict_bits };
            let distance = (reader.decode(&DISTANCE_CODE)? << low_bits)
                + reader.bits(low_bits)? as usize
                + 1;
            window.copy_match(distance, length)?;
        } else {
            let byte = if coded_literals {
                reader.decode(&LITERAL_CODE)? as u8
            } else {
                reader.bits(8)? as u8
            };
            window.push(byte)?;
        }
    }

    let bytes_out = window.finish()?;
    let bytes_in = reader.consumed;
    let trailing = reader.drain()?;
    if trailing > 0 {
        tracing::debug!(trailing, "Ignoring bytes after implode end-of-stream code");
    }

    Ok(ExplodeStats {
        bytes_in,
        bytes_out,
        trailing,
    })
}
