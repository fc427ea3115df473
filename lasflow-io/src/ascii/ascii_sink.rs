use std::{fmt::Write as _, io::Write};

use anyhow::{bail, Result};
use lasflow_core::{meta::PointCloudHeader, point::Point};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::base::{CloseErrors, OutputStream, PointSink, SinkState};

use super::{trim_unnecessary_tailing_zeros, Column};

/// Number of decimals printed for GPS time stamps before trimming trailing zeros
const GPS_TIME_DECIMALS: usize = 6;

/// Parameters of the text projection of points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsciiOptions {
    /// One character per column, see `AsciiSink` for the meaning of the characters
    pub parse_string: String,
    pub separator: String,
    /// Factor applied to each colour channel before it is printed
    pub scale_rgb: f32,
}

impl Default for AsciiOptions {
    fn default() -> Self {
        Self {
            parse_string: "xyz".to_owned(),
            separator: " ".to_owned(),
            scale_rgb: 1.0,
        }
    }
}

/// `PointSink` that prints one line of text per point.
///
/// The columns of each line are given by a parse string with one character per column: `x`, `y`, `z`
/// for the coordinates, `X`, `Y`, `Z` for the quantized coordinates, `i` intensity, `a` scan angle,
/// `r` return number, `n` number of returns, `c` classification, `u` user data, `p` point source ID,
/// `e` edge of flight line, `d` scan direction, `t` GPS time, `R`, `G`, `B` colour and `I` NIR. An `s`
/// skips the column. Coordinates are printed with as many decimals as the scale of the quantizer resolves.
/// Text output has no header, so `update_header` only takes the quantizer as long as no point is written.
pub struct AsciiSink {
    state: SinkState,
    stream: OutputStream,
    layout: Vec<Column>,
    separator: String,
    scale_rgb: f32,
    line: String,
}

impl AsciiSink {
    pub fn new(stream: OutputStream, header: &PointCloudHeader, options: &AsciiOptions) -> Result<Self> {
        let layout = Column::parse_layout(&options.parse_string)?;
        if !header.quantizer.is_valid() {
            bail!("Scale factors in the header must be finite and non-zero");
        }
        if !options.scale_rgb.is_finite() {
            bail!("RGB scale factor {} is not finite", options.scale_rgb);
        }
        info!(
            "Opening ASCII sink with parse string '{}' on {:?}",
            options.parse_string, stream
        );
        Ok(Self {
            state: SinkState::new(header.quantizer, header.number_of_points),
            stream,
            layout,
            separator: options.separator.clone(),
            scale_rgb: options.scale_rgb,
            line: String::new(),
        })
    }

    pub fn into_inner(self) -> OutputStream {
        self.stream
    }

    fn scaled_color(&self, channel: u16) -> i64 {
        (channel as f32 * self.scale_rgb).round() as i64
    }

    /// Formats `point` into the line buffer, without the line break
    fn format_line(&mut self, point: &Point) -> Result<()> {
        let needs_raw_coordinates = self.layout.iter().any(|column| {
            matches!(
                column,
                Column::RawCoordinateX | Column::RawCoordinateY | Column::RawCoordinateZ
            )
        });
        let raw_position = if needs_raw_coordinates {
            Some(self.state.quantizer().quantize(&point.position)?)
        } else {
            None
        };
        let decimals = self.state.quantizer().decimal_digits();

        let mut line = std::mem::take(&mut self.line);
        line.clear();
        let mut first_column = true;
        for column in &self.layout {
            if *column == Column::Skip {
                continue;
            }
            if !first_column {
                line.push_str(&self.separator);
            }
            first_column = false;
            match column {
                Column::Skip => {}
                Column::CoordinateX => write!(line, "{:.1$}", point.position.x, decimals)?,
                Column::CoordinateY => write!(line, "{:.1$}", point.position.y, decimals)?,
                Column::CoordinateZ => write!(line, "{:.1$}", point.position.z, decimals)?,
                Column::RawCoordinateX => write!(line, "{}", raw_position.map_or(0, |p| p.x))?,
                Column::RawCoordinateY => write!(line, "{}", raw_position.map_or(0, |p| p.y))?,
                Column::RawCoordinateZ => write!(line, "{}", raw_position.map_or(0, |p| p.z))?,
                Column::Intensity => write!(line, "{}", point.intensity)?,
                Column::ScanAngle => line.push_str(trim_unnecessary_tailing_zeros(&format!(
                    "{:.3}",
                    point.scan_angle
                ))),
                Column::ReturnNumber => write!(line, "{}", point.return_number)?,
                Column::NumberOfReturns => write!(line, "{}", point.number_of_returns)?,
                Column::Classification => write!(line, "{}", point.classification)?,
                Column::UserData => write!(line, "{}", point.user_data)?,
                Column::PointSourceID => write!(line, "{}", point.point_source_id)?,
                Column::EdgeOfFlightLine => write!(line, "{}", point.edge_of_flight_line as u8)?,
                Column::ScanDirectionFlag => write!(line, "{}", point.scan_direction_flag as u8)?,
                Column::GpsTime => line.push_str(trim_unnecessary_tailing_zeros(&format!(
                    "{:.1$}",
                    point.gps_time, GPS_TIME_DECIMALS
                ))),
                Column::ColorR => write!(line, "{}", self.scaled_color(point.color.x))?,
                Column::ColorG => write!(line, "{}", self.scaled_color(point.color.y))?,
                Column::ColorB => write!(line, "{}", self.scaled_color(point.color.z))?,
                Column::Nir => write!(line, "{}", point.nir)?,
            }
        }
        line.push('\n');
        self.line = line;
        Ok(())
    }
}

impl PointSink for AsciiSink {
    fn state(&self) -> &SinkState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SinkState {
        &mut self.state
    }

    fn write_record(&mut self, point: &Point) -> Result<()> {
        self.format_line(point)?;
        self.stream.write_all(self.line.as_bytes())?;
        Ok(())
    }

    fn chunk(&mut self) -> Result<()> {
        self.state.ensure_open("chunk")
    }

    fn update_header(
        &mut self,
        header: &PointCloudHeader,
        use_inventory: bool,
        _update_extra_attributes: bool,
    ) -> Result<()> {
        self.state.ensure_open("update_header")?;
        let merged = self.state.merged_header(header, use_inventory);
        if self.state.written_point_count() == 0 {
            if !merged.quantizer.is_valid() {
                bail!("Scale factors in the header must be finite and non-zero");
            }
            self.state.set_quantizer(merged.quantizer);
        } else if merged.quantizer != *self.state.quantizer() {
            debug!("Ignoring quantizer change of an ASCII sink that already printed points");
        }
        self.state.set_point_count(merged.number_of_points);
        Ok(())
    }

    fn close(&mut self, _patch_point_count: bool) -> Result<u64> {
        self.state.mark_closed()?;
        let mut errors = CloseErrors::default();
        errors.attempt(self.stream.flush().map_err(Into::into));
        let written = self.state.written_point_count();
        self.state.set_point_count(written);
        info!("Closed ASCII sink after {} points", written);
        errors.finish(written)
    }
}
