use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ascii::AsciiOptions;

use super::OutputFormat;

/// Declarative description of where and how points are written. This is the state a `WriteOpener`
/// resolves into sinks, and it can be stored as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteTargetConfig {
    /// Replaces the directory of the file name
    pub directory: Option<PathBuf>,
    /// Base file name. `-` or `stdout` select the standard output, `nil` discards all points
    pub file_name: Option<String>,
    /// Inserted between the stem and the extension
    pub appendix: Option<String>,
    /// Number of trailing characters removed from the stem
    pub cut: usize,
    /// If set, outputs are numbered with this many digits
    pub digits: Option<usize>,
    /// Explicit output format. If not set, the format is inferred from the file name
    pub format: Option<OutputFormat>,
    /// Overwrite existing files
    pub force: bool,
    /// Points per compressed chunk, zero selects the default of the format
    pub chunk_size: u32,
    pub ascii: AsciiOptions,
    pub use_stdout: bool,
    pub use_nil: bool,
    pub buffered: bool,
}

impl Default for WriteTargetConfig {
    fn default() -> Self {
        Self {
            directory: None,
            file_name: None,
            appendix: None,
            cut: 0,
            digits: None,
            format: None,
            force: false,
            chunk_size: 0,
            ascii: AsciiOptions::default(),
            use_stdout: false,
            use_nil: false,
            buffered: true,
        }
    }
}

impl WriteTargetConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Could not parse write target configuration")
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Loads a configuration from the JSON file at `path`. Missing fields take their default values
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(
            File::open(path).context(format!("Could not open configuration {}", path.display()))?,
        );
        serde_json::from_reader(reader).context(format!(
            "Could not parse write target configuration {}",
            path.display()
        ))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(
            File::create(path).context(format!("Could not create configuration {}", path.display()))?,
        );
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer
            .flush()
            .context(format!("Could not write configuration {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use scopeguard::defer;

    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() -> Result<()> {
        let config = WriteTargetConfig::from_json_str(
            r#"{ "file_name": "flight.laz", "digits": 3, "format": "laz", "ascii": { "separator": "," } }"#,
        )?;
        assert_eq!(Some("flight.laz".to_owned()), config.file_name);
        assert_eq!(Some(3), config.digits);
        assert_eq!(Some(OutputFormat::Laz), config.format);
        assert_eq!(",", config.ascii.separator);
        assert_eq!("xyz", config.ascii.parse_string);
        assert!(config.buffered);
        Ok(())
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        assert!(WriteTargetConfig::from_json_str(r#"{ "format": "ply" }"#).is_err());
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let path = std::env::temp_dir().join("lasflow_test_write_target_config.json");
        defer! {
            std::fs::remove_file(&path).expect("Could not remove test file");
        }
        let config = WriteTargetConfig {
            directory: Some(PathBuf::from("tiles")),
            file_name: Some("flight".to_owned()),
            appendix: Some("_ground".to_owned()),
            cut: 2,
            format: Some(OutputFormat::Bin),
            use_nil: true,
            ..Default::default()
        };
        config.save(&path)?;
        assert_eq!(config, WriteTargetConfig::load(&path)?);
        Ok(())
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_save_reports_failed_flush() {
        // Writes to /dev/full fail with ENOSPC once the buffer is flushed
        let config = WriteTargetConfig::default();
        assert!(config.save("/dev/full").is_err());
    }
}
