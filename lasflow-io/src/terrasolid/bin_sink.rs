use std::{convert::TryFrom, io::Write};

use anyhow::{anyhow, bail, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use lasflow_core::{
    math::Quantizer,
    meta::PointCloudHeader,
    point::Point,
};
use log::{info, warn};

use crate::base::{CloseErrors, OutputStream, PointSink, SinkState};

/// Size of the Terrasolid BIN header in bytes
pub const BIN_HEADER_SIZE: usize = 56;
/// Version of the BIN layout that stores 16-byte point rows
pub const BIN_VERSION: i32 = 20_020_715;
const BIN_RECOGNITION_VALUE: i32 = 970_401;
const BIN_RECOGNITION_STRING: &[u8; 4] = b"CXYZ";
/// Unit of the 32-bit GPS time stamps in seconds
const BIN_TIME_UNIT: f64 = 0.0002;
const INTENSITY_MASK: u16 = 0x3FFF;

/// Echo classes of a point row
const ECHO_ONLY: u16 = 0;
const ECHO_FIRST: u16 = 1;
const ECHO_INTERMEDIATE: u16 = 2;
const ECHO_LAST: u16 = 3;

/// Header fields of a Terrasolid BIN file
#[derive(Debug, Clone, Copy, PartialEq)]
struct BinHeader {
    number_of_points: i32,
    units: i32,
    quantizer: Quantizer,
    has_time: bool,
    has_color: bool,
}

impl BinHeader {
    fn from_header(header: &PointCloudHeader) -> Result<Self> {
        let units = units_of(&header.quantizer)?;
        let number_of_points = i32::try_from(header.number_of_points).map_err(|_| {
            anyhow!(
                "{} points exceed the capacity of a Terrasolid BIN file",
                header.number_of_points
            )
        })?;
        Ok(Self {
            number_of_points,
            units,
            quantizer: header.quantizer,
            has_time: matches!(header.point_format, 1 | 3..=10),
            has_color: matches!(header.point_format, 2 | 3 | 5 | 7 | 8 | 10),
        })
    }

    fn row_size(&self) -> usize {
        16 + if self.has_time { 4 } else { 0 } + if self.has_color { 4 } else { 0 }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(BIN_HEADER_SIZE);
        bytes.write_i32::<LittleEndian>(BIN_HEADER_SIZE as i32)?;
        bytes.write_i32::<LittleEndian>(BIN_VERSION)?;
        bytes.write_i32::<LittleEndian>(BIN_RECOGNITION_VALUE)?;
        bytes.write_all(BIN_RECOGNITION_STRING)?;
        bytes.write_i32::<LittleEndian>(self.number_of_points)?;
        bytes.write_i32::<LittleEndian>(self.units)?;
        bytes.write_f64::<LittleEndian>(self.quantizer.offset.x)?;
        bytes.write_f64::<LittleEndian>(self.quantizer.offset.y)?;
        bytes.write_f64::<LittleEndian>(self.quantizer.offset.z)?;
        bytes.write_i32::<LittleEndian>(self.has_time as i32)?;
        bytes.write_i32::<LittleEndian>(self.has_color as i32)?;
        Ok(bytes)
    }
}

/// BIN stores one resolution for all axes as 'units per meter', so the scale must be the same on all
/// axes and the inverse of an integer
fn units_of(quantizer: &Quantizer) -> Result<i32> {
    let scale = quantizer.scale;
    if !quantizer.is_valid() || scale.x != scale.y || scale.x != scale.z || scale.x <= 0.0 {
        bail!(
            "Terrasolid BIN requires the same positive scale on all axes, got {:?}",
            scale
        );
    }
    let units = (1.0 / scale.x).round();
    if units < 1.0 || units > i32::MAX as f64 || ((units * scale.x) - 1.0).abs() > 1e-6 {
        bail!(
            "Terrasolid BIN requires a scale of the form 1/n, got {}",
            scale.x
        );
    }
    Ok(units as i32)
}

fn echo_of(point: &Point) -> u16 {
    if point.number_of_returns <= 1 {
        ECHO_ONLY
    } else if point.return_number <= 1 {
        ECHO_FIRST
    } else if point.return_number >= point.number_of_returns {
        ECHO_LAST
    } else {
        ECHO_INTERMEDIATE
    }
}

/// `PointSink` for the legacy Terrasolid BIN format. Each row stores classification, flight line, echo
/// class and 14 bits of intensity followed by the fixed-point position, optionally followed by a 32-bit
/// time stamp and an RGBA colour
pub struct BinSink {
    state: SinkState,
    stream: OutputStream,
    header: BinHeader,
    emitted: bool,
    row_buffer: Vec<u8>,
}

impl BinSink {
    pub fn new(stream: OutputStream, header: &PointCloudHeader) -> Result<Self> {
        let bin_header = BinHeader::from_header(header)?;
        info!(
            "Opening Terrasolid BIN sink with {} units per meter on {:?}",
            bin_header.units, stream
        );
        Ok(Self {
            state: SinkState::new(header.quantizer, header.number_of_points),
            stream,
            row_buffer: Vec::with_capacity(bin_header.row_size()),
            header: bin_header,
            emitted: false,
        })
    }

    pub fn into_inner(self) -> OutputStream {
        self.stream
    }

    fn emit_header(&mut self) -> Result<()> {
        if self.emitted {
            return Ok(());
        }
        self.stream.write_all(&self.header.encode()?)?;
        self.emitted = true;
        Ok(())
    }

    fn rewrite_header(&mut self) -> Result<()> {
        let bytes = self.header.encode()?;
        self.stream.overwrite_at(0, &bytes)
    }

    fn encode_row(&mut self, point: &Point) -> Result<()> {
        let local_position = self.state.quantizer().quantize(&point.position)?;
        let buffer = &mut self.row_buffer;
        buffer.clear();
        buffer.write_u8(point.classification)?;
        buffer.write_u8(point.point_source_id as u8)?;
        buffer.write_u16::<LittleEndian>(echo_of(point) << 14 | (point.intensity & INTENSITY_MASK))?;
        buffer.write_i32::<LittleEndian>(local_position.x)?;
        buffer.write_i32::<LittleEndian>(local_position.y)?;
        buffer.write_i32::<LittleEndian>(local_position.z)?;
        if self.header.has_time {
            let time = (point.gps_time / BIN_TIME_UNIT).round();
            if !(0.0..=u32::MAX as f64).contains(&time) {
                bail!(
                    "GPS time {} cannot be stored in the 32-bit time stamps of Terrasolid BIN",
                    point.gps_time
                );
            }
            buffer.write_u32::<LittleEndian>(time as u32)?;
        }
        if self.header.has_color {
            buffer.write_u8((point.color.x >> 8) as u8)?;
            buffer.write_u8((point.color.y >> 8) as u8)?;
            buffer.write_u8((point.color.z >> 8) as u8)?;
            buffer.write_u8(0)?;
        }
        Ok(())
    }
}

impl PointSink for BinSink {
    fn state(&self) -> &SinkState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SinkState {
        &mut self.state
    }

    fn write_record(&mut self, point: &Point) -> Result<()> {
        self.emit_header()?;
        if self.state.written_point_count() >= i32::MAX as u64 {
            bail!("Terrasolid BIN files cannot hold more than {} points", i32::MAX);
        }
        self.encode_row(point)?;
        self.stream.write_all(&self.row_buffer)?;
        Ok(())
    }

    fn chunk(&mut self) -> Result<()> {
        self.state.ensure_open("chunk")?;
        self.emit_header()
    }

    fn update_header(
        &mut self,
        header: &PointCloudHeader,
        use_inventory: bool,
        _update_extra_attributes: bool,
    ) -> Result<()> {
        self.state.ensure_open("update_header")?;
        let merged = self.state.merged_header(header, use_inventory);
        let new_header = BinHeader::from_header(&merged)?;
        if self.emitted {
            if new_header.quantizer != self.header.quantizer {
                bail!("Cannot change scale or offset after points were written");
            }
            if new_header.row_size() != self.header.row_size() {
                bail!("Cannot change the point attributes of a BIN file after points were written");
            }
        }
        self.header = new_header;
        self.state.set_quantizer(merged.quantizer);
        self.state.set_point_count(merged.number_of_points);
        if !self.emitted {
            return Ok(());
        }
        if self.stream.is_seekable() {
            self.rewrite_header()
        } else {
            warn!("BIN header was already written to an unseekable medium, the update is not persisted");
            Ok(())
        }
    }

    fn close(&mut self, patch_point_count: bool) -> Result<u64> {
        self.state.mark_closed()?;
        let mut errors = CloseErrors::default();
        errors.attempt(self.emit_header());
        let written = self.state.written_point_count();
        if patch_point_count {
            if self.stream.is_seekable() {
                // `write_record` keeps the count within i32
                self.header.number_of_points = written as i32;
                self.state.set_point_count(written);
                errors.attempt(self.rewrite_header());
            } else {
                warn!(
                    "Not patching the point count of a BIN stream on an unseekable medium ({} points written)",
                    written
                );
            }
        }
        errors.attempt(self.stream.flush().map_err(Into::into));
        info!("Closed BIN sink after {} points", written);
        errors.finish(written)
    }
}
