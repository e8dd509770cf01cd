//! Whole-file compression for pack files and text input, detected by magic bytes.

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;
use std::str::FromStr;

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};

use crate::error::PackError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Default zstd level used when none is given.
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Compression applied to a whole file.
///
/// Serde: serialized as an internally tagged table
/// (e.g. `compression = { type = "zstd", level = 3 }`); also deserialized from the
/// [`FromStr`] spelling (`"gzip"`, `"zstd:5"`), which is what environment variables carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", try_from = "CompressionSetting")]
pub enum CompressionMode {
    #[default]
    None,
    Gzip,
    Zstd {
        #[serde(default = "default_zstd_level")]
        level: i32,
    },
}

fn default_zstd_level() -> i32 {
    DEFAULT_ZSTD_LEVEL
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CompressionSetting {
    Name(String),
    Table(TaggedMode),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum TaggedMode {
    None,
    Gzip,
    Zstd {
        #[serde(default = "default_zstd_level")]
        level: i32,
    },
}

impl TryFrom<CompressionSetting> for CompressionMode {
    type Error = PackError;

    fn try_from(setting: CompressionSetting) -> Result<Self, Self::Error> {
        match setting {
            CompressionSetting::Name(name) => name.parse(),
            CompressionSetting::Table(TaggedMode::None) => Ok(CompressionMode::None),
            CompressionSetting::Table(TaggedMode::Gzip) => Ok(CompressionMode::Gzip),
            CompressionSetting::Table(TaggedMode::Zstd { level }) => Ok(CompressionMode::Zstd { level }),
        }
    }
}

impl CompressionMode {
    /// Identifies the compression of a stream from its first bytes.
    pub fn detect(prefix: &[u8]) -> Self {
        if prefix.starts_with(&GZIP_MAGIC) {
            CompressionMode::Gzip
        } else if prefix.starts_with(&ZSTD_MAGIC) {
            CompressionMode::Zstd {
                level: DEFAULT_ZSTD_LEVEL,
            }
        } else {
            CompressionMode::None
        }
    }

    pub fn is_compressed(self) -> bool {
        self != CompressionMode::None
    }

    /// Wraps `inner` in an encoder for this mode.
    pub fn encoder<W: Write>(self, inner: W) -> Result<Encoder<W>, PackError> {
        Ok(match self {
            CompressionMode::None => Encoder::Plain(inner),
            CompressionMode::Gzip => Encoder::Gzip(GzEncoder::new(inner, flate2::Compression::default())),
            CompressionMode::Zstd { level } => Encoder::Zstd(zstd::stream::write::Encoder::new(inner, level)?),
        })
    }
}

impl fmt::Display for CompressionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionMode::None => f.write_str("none"),
            CompressionMode::Gzip => f.write_str("gzip"),
            CompressionMode::Zstd { level } => write!(f, "zstd:{}", level),
        }
    }
}

impl FromStr for CompressionMode {
    type Err = PackError;

    /// Accepts `none`, `gzip`, `zstd` and `zstd:<level>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "none" | "" => Ok(CompressionMode::None),
            "gzip" | "gz" => Ok(CompressionMode::Gzip),
            "zstd" | "zst" => Ok(CompressionMode::Zstd {
                level: DEFAULT_ZSTD_LEVEL,
            }),
            other => match other.strip_prefix("zstd:") {
                Some(level) => level
                    .parse::<i32>()
                    .map(|level| CompressionMode::Zstd { level })
                    .map_err(|e| PackError::InvalidArgument(format!("bad zstd level {:?}: {}", level, e))),
                None => Err(PackError::InvalidArgument(format!(
                    "unknown compression {:?} (expected none, gzip, zstd or zstd:<level>)",
                    s
                ))),
            },
        }
    }
}

/// A writer that compresses according to a [`CompressionMode`].
///
/// Must be closed with [`Encoder::finish`]; dropping it may leave a truncated stream.
pub enum Encoder<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> Encoder<W> {
    /// Writes any trailer and returns the inner writer.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Encoder::Plain(w) => Ok(w),
            Encoder::Gzip(e) => e.finish(),
            Encoder::Zstd(e) => e.finish(),
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Plain(w) => w.write(buf),
            Encoder::Gzip(e) => e.write(buf),
            Encoder::Zstd(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Plain(w) => w.flush(),
            Encoder::Gzip(e) => e.flush(),
            Encoder::Zstd(e) => e.flush(),
        }
    }
}

/// Wraps `reader` in a decoder chosen from its leading bytes.
pub fn decompressing_reader<R: Read + Send + 'static>(
    reader: R,
) -> Result<(Box<dyn BufRead + Send>, CompressionMode), PackError> {
    let mut buffered = BufReader::new(reader);
    let mode = CompressionMode::detect(buffered.fill_buf()?);
    let out: Box<dyn BufRead + Send> = match mode {
        CompressionMode::None => Box::new(buffered),
        CompressionMode::Gzip => Box::new(BufReader::new(MultiGzDecoder::new(buffered))),
        CompressionMode::Zstd { .. } => Box::new(BufReader::new(zstd::stream::read::Decoder::with_buffer(
            buffered,
        )?)),
    };
    Ok((out, mode))
}

/// Opens `path` for buffered reading, transparently decompressing gzip or zstd.
pub fn open_decompressed(path: &Path) -> Result<(Box<dyn BufRead + Send>, CompressionMode), PackError> {
    decompressing_reader(File::open(path)?)
}

/// Reads all of `path`, decompressing it if needed.
pub fn read_decompressed(path: &Path) -> Result<(Vec<u8>, CompressionMode), PackError> {
    let (mut reader, mode) = open_decompressed(path)?;
    let mut out = Vec::new();
    reader.read_to_end(&mut out)?;
    Ok((out, mode))
}

/// Peeks at the first bytes of `path` to identify its compression.
pub fn detect_file(path: &Path) -> Result<CompressionMode, PackError> {
    let mut f = File::open(path)?;
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        match f.read(&mut prefix[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(CompressionMode::detect(&prefix[..filled]))
}
