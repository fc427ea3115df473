use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use super::OpenError;

/// Format code that means 'no format specified'
pub const FORMAT_CODE_DEFAULT: u32 = 0;
/// Format name that means 'no format specified'
pub const FORMAT_NAME_DEFAULT: &str = "default";

/// The output formats a `WriteOpener` can open sinks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Las,
    Laz,
    Bin,
    Txt,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 4] = [Self::Las, Self::Laz, Self::Bin, Self::Txt];

    pub fn code(self) -> u32 {
        match self {
            Self::Las => 1,
            Self::Laz => 2,
            Self::Bin => 3,
            Self::Txt => 6,
        }
    }

    /// Canonical name, which is also the default file extension
    pub fn name(self) -> &'static str {
        match self {
            Self::Las => "las",
            Self::Laz => "laz",
            Self::Bin => "bin",
            Self::Txt => "txt",
        }
    }

    pub fn extension(self) -> &'static str {
        self.name()
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|format| format.code() == code)
    }

    /// Looks up a format by its canonical name, ignoring case and an optional leading dot
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.strip_prefix('.').unwrap_or(name);
        Self::ALL
            .iter()
            .copied()
            .find(|format| format.name().eq_ignore_ascii_case(name))
    }

    /// Infers the format from a file extension (without the dot)
    pub fn from_extension(extension: &str) -> Option<Self> {
        if extension.eq_ignore_ascii_case("csv") {
            return Some(Self::Txt);
        }
        Self::from_name(extension)
    }

    /// Can points of this format reference waveform packets in a companion file?
    pub fn supports_waveform13(self) -> bool {
        matches!(self, Self::Las | Self::Laz)
    }
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OutputFormat {
    type Err = OpenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| OpenError::UnknownFormat(s.to_owned()))
    }
}
