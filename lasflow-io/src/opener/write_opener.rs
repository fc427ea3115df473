use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lasflow_core::meta::PointCloudHeader;
use log::info;

use crate::{
    ascii::{separator_from_name, AsciiSink},
    base::{NullSink, OutputStream, PointSink},
    las::{LasSink, LazSink},
    terrasolid::BinSink,
    waveform::Waveform13Writer,
};

use super::{
    cut_characters, FileNameParts, OpenError, OutputFormat, WriteTargetConfig, FORMAT_CODE_DEFAULT,
    FORMAT_NAME_DEFAULT,
};

/// File names that select the standard output
const STDOUT_SENTINELS: [&str; 2] = ["-", "stdout"];
/// File name that selects the null target
const NIL_SENTINEL: &str = "nil";
/// Extension of the waveform companion file
const WAVEFORM13_EXTENSION: &str = "wdp";

/// The kinds of destinations a `WriteOpener` can resolve to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    File,
    /// A sequence of files, one per sequence number
    NumberedFiles,
    /// The standard output
    Piped,
    /// Points are counted but not persisted
    Null,
}

/// Resolves a `WriteTargetConfig` into point sinks.
///
/// The opener holds no resources, so it can open any number of sinks one after the other, e.g. one per
/// tile of a numbered output. The output format is taken from the explicit format setting, or inferred
/// from the extension of the file name, or defaults to LAS for piped, null and extension-less targets.
///
/// ```no_run
/// # use lasflow_core::meta::PointCloudHeader;
/// # use lasflow_io::{base::PointSink, opener::WriteOpener};
/// # fn main() -> anyhow::Result<()> {
/// let mut opener = WriteOpener::new();
/// opener.set_file_name("flight.laz");
/// let mut sink = opener.open(&PointCloudHeader::new((1, 2), 1))?;
/// // write points...
/// sink.close(true)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct WriteOpener {
    config: WriteTargetConfig,
}

impl WriteOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: WriteTargetConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WriteTargetConfig {
        &self.config
    }

    pub fn into_config(self) -> WriteTargetConfig {
        self.config
    }

    pub fn set_directory<P: Into<PathBuf>>(&mut self, directory: P) {
        self.config.directory = Some(directory.into());
    }

    pub fn set_file_name(&mut self, file_name: &str) {
        self.config.file_name = Some(file_name.to_owned());
    }

    pub fn set_appendix(&mut self, appendix: &str) {
        self.config.appendix = Some(appendix.to_owned());
    }

    pub fn set_cut(&mut self, cut: usize) {
        self.config.cut = cut;
    }

    /// Numbers all outputs with the given number of digits. Zero disables the numbering
    pub fn set_digits(&mut self, digits: usize) {
        self.config.digits = if digits == 0 { None } else { Some(digits) };
    }

    /// Sets the format by its code. The code `FORMAT_CODE_DEFAULT` removes an explicit format. An unknown
    /// code leaves the format unchanged
    pub fn set_format(&mut self, code: u32) -> Result<(), OpenError> {
        if code == FORMAT_CODE_DEFAULT {
            self.config.format = None;
            return Ok(());
        }
        let format =
            OutputFormat::from_code(code).ok_or_else(|| OpenError::UnknownFormat(code.to_string()))?;
        self.config.format = Some(format);
        Ok(())
    }

    /// Sets the format by its name, ignoring case and an optional leading dot. The name `default` removes
    /// an explicit format. An unknown name leaves the format unchanged
    pub fn set_format_name(&mut self, name: &str) -> Result<(), OpenError> {
        let trimmed = name.strip_prefix('.').unwrap_or(name);
        if trimmed.eq_ignore_ascii_case(FORMAT_NAME_DEFAULT) {
            self.config.format = None;
            return Ok(());
        }
        self.config.format = Some(name.parse()?);
        Ok(())
    }

    pub fn set_force(&mut self, force: bool) {
        self.config.force = force;
    }

    pub fn set_chunk_size(&mut self, chunk_size: u32) {
        self.config.chunk_size = chunk_size;
    }

    pub fn set_parse_string(&mut self, parse_string: &str) {
        self.config.ascii.parse_string = parse_string.to_owned();
    }

    /// Sets the column separator of text output, either by name (`comma`, `tab`, ...) or literally
    pub fn set_separator(&mut self, separator: &str) {
        self.config.ascii.separator = separator_from_name(separator);
    }

    pub fn set_scale_rgb(&mut self, scale_rgb: f32) {
        self.config.ascii.scale_rgb = scale_rgb;
    }

    pub fn set_use_stdout(&mut self, use_stdout: bool) {
        self.config.use_stdout = use_stdout;
    }

    pub fn set_use_nil(&mut self, use_nil: bool) {
        self.config.use_nil = use_nil;
    }

    pub fn set_buffered(&mut self, buffered: bool) {
        self.config.buffered = buffered;
    }

    pub fn get_directory(&self) -> Option<&Path> {
        self.config.directory.as_deref()
    }

    pub fn get_file_name(&self) -> Option<&str> {
        self.config.file_name.as_deref()
    }

    pub fn get_appendix(&self) -> Option<&str> {
        self.config.appendix.as_deref()
    }

    pub fn get_cut(&self) -> usize {
        self.config.cut
    }

    pub fn get_digits(&self) -> Option<usize> {
        self.config.digits
    }

    pub fn get_chunk_size(&self) -> u32 {
        self.config.chunk_size
    }

    /// The stem of the configured file name, without directory and extension
    pub fn get_file_name_base(&self) -> Option<&str> {
        self.real_file_name()
            .and_then(|file_name| Path::new(file_name).file_stem())
            .and_then(|stem| stem.to_str())
    }

    pub fn format_was_specified(&self) -> bool {
        self.config.format.is_some()
    }

    /// Code of the format that `open` would use, or `FORMAT_CODE_DEFAULT` if none can be resolved
    pub fn get_format(&self) -> u32 {
        self.resolve_format()
            .map(OutputFormat::code)
            .unwrap_or(FORMAT_CODE_DEFAULT)
    }

    /// Name of the format that `open` would use, or `default` if none can be resolved
    pub fn get_format_name(&self) -> &'static str {
        self.resolve_format()
            .map(OutputFormat::name)
            .unwrap_or(FORMAT_NAME_DEFAULT)
    }

    /// Is enough configured to attempt `open`?
    pub fn active(&self) -> bool {
        self.target_kind().is_ok()
    }

    /// Does this opener write to the standard output? Sinks of piped outputs cannot patch their headers
    pub fn is_piped(&self) -> bool {
        self.target_kind() == Ok(TargetKind::Piped)
    }

    pub fn is_null(&self) -> bool {
        self.target_kind() == Ok(TargetKind::Null)
    }

    /// Classifies the configured destination. The null target takes precedence over the standard output
    pub fn target_kind(&self) -> Result<TargetKind, OpenError> {
        let file_name = self.config.file_name.as_deref();
        if self.config.use_nil || file_name == Some(NIL_SENTINEL) {
            return Ok(TargetKind::Null);
        }
        if self.config.use_stdout || file_name.map_or(false, |name| STDOUT_SENTINELS.contains(&name)) {
            return Ok(TargetKind::Piped);
        }
        match (file_name, self.config.digits) {
            (None, _) => Err(OpenError::NotActive),
            (Some(_), Some(_)) => Ok(TargetKind::NumberedFiles),
            (Some(_), None) => Ok(TargetKind::File),
        }
    }

    /// The configured file name, unless it is a sentinel
    fn real_file_name(&self) -> Option<&str> {
        self.config
            .file_name
            .as_deref()
            .filter(|name| *name != NIL_SENTINEL && !STDOUT_SENTINELS.contains(name))
    }

    /// The output format: the explicit format, else the one the extension of the file name implies, else LAS
    fn resolve_format(&self) -> Result<OutputFormat, OpenError> {
        if let Some(format) = self.config.format {
            return Ok(format);
        }
        match self.target_kind()? {
            TargetKind::Piped | TargetKind::Null => Ok(OutputFormat::Las),
            TargetKind::File | TargetKind::NumberedFiles => {
                let extension = self
                    .real_file_name()
                    .and_then(|name| Path::new(name).extension())
                    .and_then(|extension| extension.to_str());
                match extension {
                    None => Ok(OutputFormat::Las),
                    Some(extension) => OutputFormat::from_extension(extension)
                        .ok_or_else(|| OpenError::UnknownFormat(extension.to_owned())),
                }
            }
        }
    }

    /// Applies directory override, cut, appendix and numbering to `file_name`. The extension is the one
    /// of `file_name` if it denotes `format`, otherwise the default extension of `format`
    fn compose_file_name(
        &self,
        file_name: &Path,
        format: OutputFormat,
        number: Option<u64>,
    ) -> Result<PathBuf, OpenError> {
        let stem = file_name
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or(OpenError::MissingFileName)?;
        let extension = match file_name.extension().and_then(|extension| extension.to_str()) {
            Some(extension) if OutputFormat::from_extension(extension) == Some(format) => extension.to_owned(),
            _ => format.extension().to_owned(),
        };
        let directory = self.config.directory.clone().or_else(|| {
            file_name
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .map(Path::to_path_buf)
        });
        let digits = self.config.digits.unwrap_or(0);
        if let Some(number) = number {
            if digits > 0 && digits < 20 && number >= 10u64.pow(digits as u32) {
                return Err(OpenError::SequenceNumberOutOfRange { number, digits });
            }
        }
        let parts = FileNameParts {
            directory,
            stem: cut_characters(stem, self.config.cut).to_owned(),
            appendix: self.config.appendix.clone().unwrap_or_default(),
            number,
            digits,
            extension,
        };
        if parts.stem.is_empty() && parts.appendix.is_empty() && parts.number.is_none() {
            return Err(OpenError::MissingFileName);
        }
        Ok(parts.compose())
    }

    /// Derives an output file name from the name of an input file, e.g. when converting many inputs. The
    /// extension is taken from the explicit format, or kept if it names a known format, or replaced by `las`.
    pub fn make_file_name<P: AsRef<Path>>(&self, input_file_name: P, number: Option<u64>) -> Result<PathBuf, OpenError> {
        let input_file_name = input_file_name.as_ref();
        let format = match self.config.format {
            Some(format) => format,
            None => input_file_name
                .extension()
                .and_then(|extension| extension.to_str())
                .and_then(OutputFormat::from_extension)
                .unwrap_or(OutputFormat::Las),
        };
        self.compose_file_name(input_file_name, format, number)
    }

    /// The file name of the output with the given sequence number
    pub fn make_numbered_file_name(&self, number: u64) -> Result<PathBuf, OpenError> {
        if self.config.digits.is_none() {
            return Err(OpenError::UnsupportedCombination(
                "numbered file names require a number of digits".to_owned(),
            ));
        }
        self.output_path(Some(number))
    }

    /// The path `open` would write to, for file targets
    pub fn output_path(&self, number: Option<u64>) -> Result<PathBuf, OpenError> {
        let format = self.resolve_format()?;
        let file_name = self.real_file_name().ok_or(OpenError::MissingFileName)?;
        self.compose_file_name(Path::new(file_name), format, number)
    }

    fn create_output_file(&self, path: &Path) -> Result<OutputStream> {
        if path.exists() && !self.config.force {
            return Err(OpenError::Unauthorized(path.to_path_buf()).into());
        }
        OutputStream::create_file(path, self.config.buffered)
    }

    /// Opens a sink of the resolved format on the configured target with `header` as prototype. Numbered
    /// targets must be opened with `open_numbered`.
    ///
    /// # Errors
    ///
    /// Fails with an `OpenError` if the configuration cannot be resolved or the output file exists and
    /// overwriting is not forced, and with the error of the sink if it rejects `header`
    pub fn open(&self, header: &PointCloudHeader) -> Result<Box<dyn PointSink>> {
        match self.target_kind()? {
            TargetKind::NumberedFiles => Err(OpenError::MissingSequenceNumber {
                digits: self.config.digits.unwrap_or(0),
            }
            .into()),
            kind => self.open_target(kind, None, header),
        }
    }

    /// Opens the sink with the given sequence number of a numbered target. For piped and null targets the
    /// number is ignored
    pub fn open_numbered(&self, header: &PointCloudHeader, number: u64) -> Result<Box<dyn PointSink>> {
        match self.target_kind()? {
            TargetKind::File => Err(OpenError::UnsupportedCombination(
                "the output is not numbered, set the number of digits first".to_owned(),
            )
            .into()),
            kind => self.open_target(kind, Some(number), header),
        }
    }

    fn open_target(
        &self,
        kind: TargetKind,
        number: Option<u64>,
        header: &PointCloudHeader,
    ) -> Result<Box<dyn PointSink>> {
        let format = self.resolve_format()?;
        match kind {
            TargetKind::Null => Ok(Box::new(NullSink::new(header))),
            TargetKind::Piped => {
                info!("Writing {} points to the standard output", format);
                self.open_stream(OutputStream::stdout(self.config.buffered), header)
            }
            TargetKind::File | TargetKind::NumberedFiles => {
                let number = if kind == TargetKind::NumberedFiles { number } else { None };
                let path = self.output_path(number)?;
                info!("Writing {} points to {}", format, path.display());
                let stream = self.create_output_file(&path)?;
                self.open_stream(stream, header)
                    .with_context(|| format!("Could not open {} sink for {}", format, path.display()))
            }
        }
    }

    /// Opens a sink of the resolved format on an arbitrary `stream`, bypassing the target configuration
    pub fn open_stream(&self, stream: OutputStream, header: &PointCloudHeader) -> Result<Box<dyn PointSink>> {
        let format = match self.config.format {
            Some(format) => format,
            None => self.resolve_format().unwrap_or(OutputFormat::Las),
        };
        let sink: Box<dyn PointSink> = match format {
            OutputFormat::Las => Box::new(LasSink::new(stream, header)?),
            OutputFormat::Laz => Box::new(LazSink::new(stream, header, self.config.chunk_size)?),
            OutputFormat::Bin => Box::new(BinSink::new(stream, header)?),
            OutputFormat::Txt => Box::new(AsciiSink::new(stream, header, &self.config.ascii)?),
        };
        Ok(sink)
    }

    /// Opens the waveform companion file of the configured output. Returns `None` if the output format or
    /// the point format of `header` have no waveform packets, or if the output is piped. Null targets get a
    /// writer that discards the packets
    pub fn open_waveform13(&self, header: &PointCloudHeader) -> Result<Option<Waveform13Writer>> {
        match self.target_kind()? {
            TargetKind::NumberedFiles => Err(OpenError::MissingSequenceNumber {
                digits: self.config.digits.unwrap_or(0),
            }
            .into()),
            kind => self.open_waveform13_target(kind, None, header),
        }
    }

    /// Opens the waveform companion file of the output with the given sequence number
    pub fn open_waveform13_numbered(
        &self,
        header: &PointCloudHeader,
        number: u64,
    ) -> Result<Option<Waveform13Writer>> {
        let kind = self.target_kind()?;
        self.open_waveform13_target(kind, Some(number), header)
    }

    fn open_waveform13_target(
        &self,
        kind: TargetKind,
        number: Option<u64>,
        header: &PointCloudHeader,
    ) -> Result<Option<Waveform13Writer>> {
        let format = self.resolve_format()?;
        if !format.supports_waveform13() || !header.has_waveform() {
            return Ok(None);
        }
        match kind {
            TargetKind::Piped => Ok(None),
            TargetKind::Null => Ok(Some(Waveform13Writer::new(OutputStream::null())?)),
            TargetKind::File | TargetKind::NumberedFiles => {
                let number = if kind == TargetKind::NumberedFiles { number } else { None };
                let path = self
                    .output_path(number)?
                    .with_extension(WAVEFORM13_EXTENSION);
                info!("Writing waveform packets to {}", path.display());
                let stream = self.create_output_file(&path)?;
                Ok(Some(Waveform13Writer::new(stream)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use lasflow_core::{nalgebra::Vector3, point::Point};
    use scopeguard::defer;

    use super::*;

    fn opener_for(file_name: &str) -> WriteOpener {
        let mut opener = WriteOpener::new();
        opener.set_file_name(file_name);
        opener
    }

    #[test]
    fn test_explicit_format_wins_over_extension() -> Result<()> {
        let mut opener = opener_for("out/flight.las");
        assert_eq!(1, opener.get_format());
        assert!(!opener.format_was_specified());
        opener.set_format_name("laz")?;
        assert!(opener.format_was_specified());
        assert_eq!("laz", opener.get_format_name());
        assert_eq!(PathBuf::from("out/flight.laz"), opener.output_path(None)?);
        Ok(())
    }

    #[test]
    fn test_unknown_format_keeps_previous_state() -> Result<()> {
        let mut opener = opener_for("flight.las");
        opener.set_format(3)?;
        assert_eq!(Err(OpenError::UnknownFormat("ply".to_owned())), opener.set_format_name("ply"));
        assert_eq!(Err(OpenError::UnknownFormat("5".to_owned())), opener.set_format(5));
        assert_eq!("bin", opener.get_format_name());
        opener.set_format_name("default")?;
        assert_eq!("las", opener.get_format_name());
        Ok(())
    }

    #[test]
    fn test_format_name_is_inverse_of_set_format_name() -> Result<()> {
        let mut opener = opener_for("flight");
        for format in OutputFormat::ALL.iter().copied() {
            opener.set_format_name(format.name())?;
            let name = opener.get_format_name();
            let code = opener.get_format();
            opener.set_format_name(name)?;
            assert_eq!(code, opener.get_format());
            opener.set_format(code)?;
            assert_eq!(name, opener.get_format_name());
        }
        Ok(())
    }

    #[test]
    fn test_csv_extension_is_kept_for_text() -> Result<()> {
        let opener = opener_for("points.csv");
        assert_eq!("txt", opener.get_format_name());
        assert_eq!(PathBuf::from("points.csv"), opener.output_path(None)?);
        Ok(())
    }

    #[test]
    fn test_unknown_extension_without_format() {
        let opener = opener_for("points.xyz");
        assert_eq!(FORMAT_CODE_DEFAULT, opener.get_format());
        let err = opener.open(&PointCloudHeader::default()).err().expect("open must fail");
        assert_eq!(
            Some(&OpenError::UnknownFormat("xyz".to_owned())),
            err.downcast_ref::<OpenError>()
        );
    }

    #[test]
    fn test_extension_less_name_defaults_to_las() -> Result<()> {
        let opener = opener_for("flight");
        assert_eq!(PathBuf::from("flight.las"), opener.output_path(None)?);
        Ok(())
    }

    #[test]
    fn test_target_classification() {
        assert_eq!(Err(OpenError::NotActive), WriteOpener::new().target_kind());
        assert!(!WriteOpener::new().active());
        assert_eq!(Ok(TargetKind::Piped), opener_for("-").target_kind());
        assert_eq!(Ok(TargetKind::Piped), opener_for("stdout").target_kind());
        assert_eq!(Ok(TargetKind::Null), opener_for("nil").target_kind());
        assert_eq!(Ok(TargetKind::File), opener_for("a.las").target_kind());

        let mut numbered = opener_for("a.las");
        numbered.set_digits(2);
        assert_eq!(Ok(TargetKind::NumberedFiles), numbered.target_kind());

        let mut flags = WriteOpener::new();
        flags.set_use_stdout(true);
        assert!(flags.is_piped());
        assert!(flags.active());
        flags.set_use_nil(true);
        assert!(flags.is_null());
        assert!(!flags.is_piped());
    }

    #[test]
    fn test_piped_target_ignores_naming() -> Result<()> {
        let mut opener = opener_for("-");
        opener.set_directory("ignored");
        opener.set_digits(3);
        assert!(opener.is_piped());
        assert_eq!(Err(OpenError::MissingFileName), opener.output_path(Some(1)));
        assert_eq!(None, opener.get_file_name_base());
        assert_eq!("las", opener.get_format_name());
        Ok(())
    }

    #[test]
    fn test_name_composition() -> Result<()> {
        let mut opener = opener_for("input/flight_12.laz");
        opener.set_directory("tiles");
        opener.set_cut(3);
        opener.set_appendix("_ground");
        opener.set_digits(4);
        assert_eq!(Some("flight_12"), opener.get_file_name_base());
        assert_eq!(
            PathBuf::from("tiles/flight_ground0042.laz"),
            opener.make_numbered_file_name(42)?
        );
        assert_eq!(
            Err(OpenError::SequenceNumberOutOfRange { number: 10_000, digits: 4 }),
            opener.make_numbered_file_name(10_000)
        );
        Ok(())
    }

    #[test]
    fn test_make_file_name_from_input() -> Result<()> {
        let mut opener = WriteOpener::new();
        opener.set_appendix("_1");
        assert_eq!(PathBuf::from("data/scan_1.laz"), opener.make_file_name("data/scan.laz", None)?);
        opener.set_format(6)?;
        opener.set_directory("text");
        assert_eq!(PathBuf::from("text/scan_1.txt"), opener.make_file_name("data/scan.laz", None)?);
        Ok(())
    }

    #[test]
    fn test_numbered_target_requires_number() {
        let mut opener = opener_for("flight");
        opener.set_digits(3);
        let err = opener.open(&PointCloudHeader::default()).err().expect("open must fail");
        assert_eq!(
            Some(&OpenError::MissingSequenceNumber { digits: 3 }),
            err.downcast_ref::<OpenError>()
        );
    }

    #[test]
    fn test_existing_file_requires_force() -> Result<()> {
        let path = std::env::temp_dir().join("lasflow_test_existing_file_requires_force.las");
        defer! {
            std::fs::remove_file(&path).expect("Could not remove test file");
        }
        std::fs::write(&path, b"occupied")?;
        let mut opener = opener_for(path.to_str().expect("utf-8 temp dir"));
        let err = opener.open(&PointCloudHeader::default()).err().expect("open must fail");
        assert_eq!(
            Some(&OpenError::Unauthorized(path.clone())),
            err.downcast_ref::<OpenError>()
        );
        assert_eq!(b"occupied".to_vec(), std::fs::read(&path)?);

        opener.set_force(true);
        let mut sink = opener.open(&PointCloudHeader::default())?;
        sink.write_point(&Point::at(Vector3::new(1.0, 2.0, 3.0)))?;
        assert_eq!(1, sink.close(true)?);
        Ok(())
    }

    #[test]
    fn test_null_target_for_any_format() -> Result<()> {
        let mut opener = opener_for("nil");
        opener.set_format_name("txt")?;
        let mut sink = opener.open(&PointCloudHeader::default())?;
        sink.write_point(&Point::at(Vector3::new(1.0, 2.0, 3.0)))?;
        sink.chunk()?;
        assert_eq!(1, sink.close(true)?);
        Ok(())
    }

    #[test]
    fn test_waveform13_availability() -> Result<()> {
        let waveform_header = PointCloudHeader::new((1, 3), 4);
        let mut opener = opener_for("nil");
        assert!(opener.open_waveform13(&waveform_header)?.is_some());
        assert!(opener.open_waveform13(&PointCloudHeader::new((1, 2), 1))?.is_none());
        opener.set_format_name("bin")?;
        assert!(opener.open_waveform13(&waveform_header)?.is_none());

        let piped = opener_for("-");
        assert!(piped.open_waveform13(&waveform_header)?.is_none());
        Ok(())
    }

    #[test]
    fn test_open_stream_uses_ascii_options() -> Result<()> {
        let mut opener = WriteOpener::new();
        opener.set_format_name("txt")?;
        opener.set_parse_string("zyx");
        opener.set_separator("semicolon");
        let mut sink = opener.open_stream(OutputStream::null(), &PointCloudHeader::default())?;
        sink.write_point(&Point::at(Vector3::new(1.0, 2.0, 3.0)))?;
        assert_eq!(1, sink.close(true)?);
        Ok(())
    }
}
