//! DBC container codec
//!
//! A DBC file is a DBF table whose record area has been compressed with the
//! PKWARE DCL implode algorithm:
//!
//! ```text
//! [10-byte pre-header][headerSize - 10 extended header][4-byte CRC32][implode payload]
//! ```
//!
//! `headerSize` is the little-endian u16 at pre-header offsets 8-9. Decoding
//! copies the pre-header and extended header unchanged and appends the
//! decompressed payload, which reproduces the original DBF byte for byte.
//!
//! [`decode_stream`] works over any `Read`/`Write` pair with bounded memory,
//! [`decode`] is the in-memory convenience form and [`decode_file`] runs the
//! streaming decoder on Tokio's blocking pool.

pub mod explode;

use crate::config::DecodeOptions;
use crate::error::{Error, Result};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

pub use explode::{ExplodeStats, explode};

/// Length of the fixed pre-header
pub const PRE_HEADER_LEN: usize = 10;

/// Length of the CRC32 field that follows the header
pub const CRC_LEN: usize = 4;

/// Parsed DBC header
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DbcHeader {
    /// The 10-byte pre-header, copied verbatim to the output
    pub pre_header: [u8; PRE_HEADER_LEN],
    /// `header_size - 10` bytes of field descriptors, copied verbatim to the output
    pub extended: Vec<u8>,
    /// CRC32 trailer stored after the header
    pub crc32: u32,
}

impl DbcHeader {
    /// Read the header and CRC32 field, leaving `reader` at the start of the payload
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut pre_header = [0u8; PRE_HEADER_LEN];
        let available = read_up_to(reader, &mut pre_header)?;
        if available < PRE_HEADER_LEN {
            return Err(Error::MissingHeader { available });
        }

        let declared = u16::from_le_bytes([pre_header[8], pre_header[9]]);
        if usize::from(declared) < PRE_HEADER_LEN {
            return Err(Error::InvalidHeaderSize {
                declared,
                reason: format!("smaller than the {PRE_HEADER_LEN}-byte pre-header"),
            });
        }

        let mut extended = vec![0u8; usize::from(declared) - PRE_HEADER_LEN];
        let found = read_up_to(reader, &mut extended)?;
        if found < extended.len() {
            return Err(Error::InvalidHeaderSize {
                declared,
                reason: format!(
                    "input ends {} bytes into the header",
                    PRE_HEADER_LEN + found
                ),
            });
        }

        let mut crc = [0u8; CRC_LEN];
        if read_up_to(reader, &mut crc)? < CRC_LEN {
            return Err(Error::InvalidHeaderSize {
                declared,
                reason: "input ends inside the CRC32 field".to_string(),
            });
        }

        Ok(Self {
            pre_header,
            extended,
            crc32: u32::from_le_bytes(crc),
        })
    }

    /// Declared header size (pre-header plus extended header)
    pub fn header_size(&self) -> u16 {
        u16::from_le_bytes([self.pre_header[8], self.pre_header[9]])
    }

    /// Number of records declared by the DBF pre-header
    pub fn record_count(&self) -> u32 {
        u32::from_le_bytes([
            self.pre_header[4],
            self.pre_header[5],
            self.pre_header[6],
            self.pre_header[7],
        ])
    }

    /// Length of one record, when the header is long enough to carry it
    pub fn record_length(&self) -> Option<u16> {
        match self.extended.as_slice() {
            [lo, hi, ..] => Some(u16::from_le_bytes([*lo, *hi])),
            _ => None,
        }
    }

    /// Write the header bytes that open the decoded DBF
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.pre_header)?;
        writer.write_all(&self.extended)
    }
}

/// Counters from one decode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Declared header size
    pub header_size: u16,
    /// Records declared by the header
    pub record_count: u32,
    /// Compressed payload bytes consumed
    pub compressed_bytes: u64,
    /// Decompressed payload bytes produced
    pub payload_bytes: u64,
    /// Total bytes written (header plus payload)
    pub output_bytes: u64,
    /// CRC32 comparison result, when verification was requested
    pub crc_matches: Option<bool>,
}

/// DBC decoder with options
#[derive(Clone, Copy, Debug, Default)]
pub struct Decoder {
    options: DecodeOptions,
}

impl Decoder {
    /// Create a decoder
    pub fn new(options: DecodeOptions) -> Self {
        Self { options }
    }

    /// Decode a DBC stream into a DBF stream
    pub fn decode_stream<R: Read, W: Write + ?Sized>(
        &self,
        mut input: R,
        output: &mut W,
    ) -> Result<DecodeStats> {
        let header = DbcHeader::read_from(&mut input)?;
        header.write_to(output)?;

        let (stats, crc_matches) = if self.options.verify_crc {
            let mut hashing = CrcWriter::new(&mut *output);
            let stats = explode(input, &mut hashing)?;
            let actual = hashing.finalize();
            if actual != header.crc32 {
                tracing::warn!(
                    expected = %format!("{:#010x}", header.crc32),
                    actual = %format!("{:#010x}", actual),
                    "DBC CRC32 mismatch"
                );
            }
            (stats, Some(actual == header.crc32))
        } else {
            (explode(input, &mut *output)?, None)
        };
        output.flush()?;

        let header_size = header.header_size();
        Ok(DecodeStats {
            header_size,
            record_count: header.record_count(),
            compressed_bytes: stats.bytes_in,
            payload_bytes: stats.bytes_out,
            output_bytes: u64::from(header_size) + stats.bytes_out,
            crc_matches,
        })
    }

    /// Decode an in-memory DBC container
    pub fn decode(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(input.len().saturating_mul(4));
        self.decode_stream(input, &mut out)?;
        Ok(out)
    }

    /// Decode `src` into `dst` on the blocking thread pool
    pub async fn decode_file(&self, src: &Path, dst: &Path) -> Result<DecodeStats> {
        let decoder = *self;
        let src = src.to_path_buf();
        let dst = dst.to_path_buf();
        tokio::task::spawn_blocking(move || decoder.decode_path(&src, &dst)).await?
    }

    fn decode_path(&self, src: &Path, dst: &Path) -> Result<DecodeStats> {
        let input = BufReader::new(std::fs::File::open(src)?);
        let mut output = BufWriter::new(std::fs::File::create(dst)?);
        let stats = self.decode_stream(input, &mut output)?;
        output.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        tracing::debug!(
            src = %src.display(),
            dst = %dst.display(),
            records = stats.record_count,
            bytes = stats.output_bytes,
            "Decoded DBC file"
        );
        Ok(stats)
    }
}

/// Decode a DBC stream into a DBF stream with default options
pub fn decode_stream<R: Read, W: Write + ?Sized>(input: R, output: &mut W) -> Result<DecodeStats> {
    Decoder::default().decode_stream(input, output)
}

/// Decode an in-memory DBC container with default options
pub fn decode(input: &[u8]) -> Result<Vec<u8>> {
    Decoder::default().decode(input)
}

/// Decode the file at `src` into `dst` with default options
pub async fn decode_file(src: &Path, dst: &Path) -> Result<DecodeStats> {
    Decoder::default().decode_file(src, dst).await
}

/// Whether a file name carries the `.dbc` extension (case-insensitive)
pub fn is_dbc_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("dbc"))
}

/// Output name for a decoded file: `.dbc` becomes `.dbf`, preserving case style
pub fn decoded_name(name: &str) -> PathBuf {
    let path = Path::new(name);
    match path.extension().and_then(|e| e.to_str()) {
        Some("DBC") => path.with_extension("DBF"),
        Some(ext) if ext.eq_ignore_ascii_case("dbc") => path.with_extension("dbf"),
        _ => path.to_path_buf(),
    }
}

/// Fill as much of `buf` as the reader can supply, returning the count
fn read_up_to<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Writer that hashes everything passing through it
struct CrcWriter<W> {
    inner: W,
    hasher: crc32fast::Hasher,
}

impl<W: Write> CrcWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
        }
    }

    fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}

impl<W: Write> Write for CrcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
