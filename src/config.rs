use serde::{Deserialize, Serialize};

use crate::compression::CompressionMode;
use crate::error::PackError;
use crate::format::PackFlags;

/// Settings for turning delimited rating text into a pack.
///
/// Serde: every field is optional in TOML and falls back to [`PackConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackConfig {
    /// Store timestamps in the pack (`TIMESTAMPS` flag). Default: true.
    pub include_timestamps: bool,
    /// Compression of the finished pack file. Table form in TOML:
    /// `[compression]` with `type = "none"`, `type = "gzip"` or `type = "zstd", level = 3`.
    pub compression: CompressionMode,
    /// Field separator of the input text. `"tab"` or `"\t"` select a tab. Default: `,`.
    pub delimiter: String,
    /// Leading input lines to skip (e.g. a CSV header). Default: 0.
    pub skip_header_lines: usize,
}

impl Default for PackConfig {
    fn default() -> Self {
        PackConfig {
            include_timestamps: true,
            compression: CompressionMode::None,
            delimiter: ",".to_string(),
            skip_header_lines: 0,
        }
    }
}

impl PackConfig {
    pub fn flags(&self) -> PackFlags {
        if self.include_timestamps {
            PackFlags::TIMESTAMPS
        } else {
            PackFlags::empty()
        }
    }

    /// The delimiter with its aliases resolved.
    pub fn field_delimiter(&self) -> &str {
        match self.delimiter.as_str() {
            "tab" | "\\t" => "\t",
            other => other,
        }
    }

    pub fn validate(&self) -> Result<(), PackError> {
        if self.delimiter.is_empty() {
            return Err(PackError::Config("delimiter must not be empty".to_string()));
        }
        if let CompressionMode::Zstd { level } = self.compression {
            if !(1..=22).contains(&level) {
                return Err(PackError::Config(format!(
                    "zstd level {} out of range 1..=22",
                    level
                )));
            }
        }
        Ok(())
    }
}
