/*!
Typed output buffer and the deterministic binary→text / binary→JSON
translators consuming it.
*/
mod buffer;
mod header;
mod json;
mod sanitize;
mod text;
mod value_fmt;

pub use buffer::{OutputBuffer, RowReader};
pub use header::{read_schema, write_schema, HostInfo};
pub use json::JsonTranslator;
pub use sanitize::sanitize_utf8;
pub use text::TextTranslator;

use std::collections::HashSet;

/// IPv4 address representation in textual output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ip4Format {
    /// Dotted quad.
    #[default]
    Normal,
    /// Dotted quad, groups padded with zeros.
    Normalized,
    /// One 0x-prefixed 32-bit hex number.
    Hex,
    /// Decimal u32.
    Uint32,
}

/// IPv6 address representation in textual output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ip6Format {
    /// Compressed (RFC 5952 style).
    #[default]
    Compressed,
    /// Eight fully expanded hex groups.
    Uncompressed,
    /// One 0x-prefixed 128-bit hex number.
    Hex128,
    /// Two 0x-prefixed 64-bit hex numbers.
    Hex64Pair,
}

/// MAC address representation in textual output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MacFormat {
    /// Six groups joined by the configured separator.
    #[default]
    Separated,
    /// One 0x-prefixed 64-bit hex number.
    Hex64,
    /// Decimal u64.
    Uint64,
}

/// Timestamp representation in textual output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeFormat {
    /// `secs.frac` Unix time.
    #[default]
    UnixFrac,
    /// ISO 8601 with timezone offset (durations stay `secs.frac`).
    Iso8601,
}

/// Formatting options shared by the text and JSON translators.
#[derive(Debug, Clone)]
pub struct TextFormat {
    pub ip4: Ip4Format,
    pub ip6: Ip6Format,
    pub mac: MacFormat,
    /// Separator between MAC bytes for [`MacFormat::Separated`].
    pub mac_sep: String,
    /// Uppercase hex digits everywhere hex is printed.
    pub hex_upper: bool,
    pub time: TimeFormat,
    /// Column separator of the text translator.
    pub separator: String,
    /// Representation of an absent address in IPvX columns.
    pub non_ip_str: String,
}

impl Default for TextFormat {
    fn default() -> Self {
        TextFormat {
            ip4: Ip4Format::default(),
            ip6: Ip6Format::default(),
            mac: MacFormat::default(),
            mac_sep: ":".to_string(),
            hex_upper: false,
            time: TimeFormat::default(),
            separator: "\t".to_string(),
            non_ip_str: "-".to_string(),
        }
    }
}

/// JSON-translator specific options.
#[derive(Debug, Clone, Default)]
pub struct JsonFormat {
    /// Also emit empty repeating fields.
    pub keep_empty: bool,
    /// Add spaces after separators.
    pub pretty: bool,
    /// When set, only the named columns are emitted.
    pub select: Option<HashSet<String>>,
}

impl JsonFormat {
    /// Load a key selection from a text file with one column name per line
    /// (`#` comments and blank lines ignored).
    pub fn select_from_file(path: &std::path::Path) -> std::io::Result<HashSet<String>> {
        let content = std::fs::read_to_string(path)?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect())
    }
}
