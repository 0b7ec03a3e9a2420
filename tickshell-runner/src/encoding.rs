//! Text codecs for child stdout/stderr.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Codec used to turn raw child output into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputEncoding {
    /// UTF-8; invalid sequences become U+FFFD.
    Utf8,
    /// ISO-8859-1, every byte maps to the code point of the same value.
    Latin1,
}

impl OutputEncoding {
    /// Codec implied by the locale environment (`LC_ALL`, `LC_CTYPE`, `LANG`,
    /// first non-empty wins). Anything unrecognised falls back to UTF-8.
    pub fn system() -> Self {
        let locale = ["LC_ALL", "LC_CTYPE", "LANG"]
            .iter()
            .filter_map(|key| std::env::var(key).ok())
            .find(|value| !value.trim().is_empty());
        locale.as_deref().map_or(Self::Utf8, Self::from_locale)
    }

    /// Codec named by a locale string such as `de_DE.ISO-8859-1`.
    pub fn from_locale(locale: &str) -> Self {
        let charset = locale
            .split_once('.')
            .map_or("", |(_, rest)| rest.split('@').next().unwrap_or(rest));
        Self::parse(charset).unwrap_or(Self::Utf8)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "utf8" | "utf-8" => Some(Self::Utf8),
            "latin1" | "latin-1" | "iso-8859-1" | "iso8859-1" => Some(Self::Latin1),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Utf8 => "utf8",
            Self::Latin1 => "latin1",
        }
    }

    /// Decode one line of raw bytes.
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Self::Latin1 => bytes.iter().map(|&byte| char::from(byte)).collect(),
        }
    }
}

impl Default for OutputEncoding {
    fn default() -> Self {
        Self::system()
    }
}

impl fmt::Display for OutputEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputEncoding {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value).ok_or_else(|| format!("unsupported encoding `{value}`"))
    }
}
