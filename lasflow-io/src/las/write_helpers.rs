use std::io::Write;

use anyhow::{bail, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use las::point::Format;
use lasflow_core::{math::Quantizer, point::Point};

/// Largest scan angle (in degrees) that the scan angle rank of the regular point formats can hold
const MAX_SCAN_ANGLE_RANK: f32 = 90.0;
/// Resolution of the scan angle of the extended point formats in degrees
const EXTENDED_SCAN_ANGLE_UNIT: f32 = 0.006;
const MAX_EXTENDED_SCAN_ANGLE: f32 = 30_000.0;

#[derive(Debug, Copy, Clone)]
pub(crate) struct BitAttributesRegular {
    pub return_number: u8,
    pub number_of_returns: u8,
    pub scan_direction_flag: u8,
    pub edge_of_flight_line: u8,
}

#[derive(Debug, Copy, Clone)]
pub(crate) struct BitAttributesExtended {
    pub return_number: u8,
    pub number_of_returns: u8,
    pub classification_flags: u8,
    pub scanner_channel: u8,
    pub scan_direction_flag: u8,
    pub edge_of_flight_line: u8,
}

#[derive(Debug, Copy, Clone)]
pub(crate) enum BitAttributes {
    Regular(BitAttributesRegular),
    Extended(BitAttributesExtended),
}

impl BitAttributes {
    /// Extracts the bit attributes of `point` for the given format, failing if a value does not fit into
    /// its bit field
    pub(crate) fn from_point(point: &Point, format: &Format) -> Result<Self> {
        let scan_direction_flag = point.scan_direction_flag as u8;
        let edge_of_flight_line = point.edge_of_flight_line as u8;
        if format.is_extended {
            if point.return_number > 15 || point.number_of_returns > 15 {
                bail!(
                    "Return number {} of {} exceeds the 4 bits of the extended point formats",
                    point.return_number,
                    point.number_of_returns
                );
            }
            if point.scanner_channel > 3 {
                bail!(
                    "Scanner channel {} exceeds the 2 bits of the extended point formats",
                    point.scanner_channel
                );
            }
            Ok(Self::Extended(BitAttributesExtended {
                return_number: point.return_number,
                number_of_returns: point.number_of_returns,
                classification_flags: point.classification_flags,
                scanner_channel: point.scanner_channel,
                scan_direction_flag,
                edge_of_flight_line,
            }))
        } else {
            if point.return_number > 7 || point.number_of_returns > 7 {
                bail!(
                    "Return number {} of {} exceeds the 3 bits of point format {:?}, consider using an extended point format",
                    point.return_number,
                    point.number_of_returns,
                    format
                );
            }
            Ok(Self::Regular(BitAttributesRegular {
                return_number: point.return_number,
                number_of_returns: point.number_of_returns,
                scan_direction_flag,
                edge_of_flight_line,
            }))
        }
    }
}

/// Writes the given `BitAttributes` in LAS format to the given `writer`
pub(crate) fn write_las_bit_attributes<T: Write>(
    bit_attributes: BitAttributes,
    mut writer: T,
) -> Result<()> {
    match bit_attributes {
        BitAttributes::Regular(attributes) => {
            let mask = (attributes.return_number & 0b111)
                | (attributes.number_of_returns & 0b111) << 3
                | (attributes.scan_direction_flag & 0b1) << 6
                | (attributes.edge_of_flight_line & 0b1) << 7;
            writer.write_u8(mask)?;
        }
        BitAttributes::Extended(attributes) => {
            let low_mask =
                (attributes.return_number & 0b1111) | (attributes.number_of_returns & 0b1111) << 4;
            let high_mask = (attributes.classification_flags & 0b1111)
                | (attributes.scanner_channel & 0b11) << 4
                | (attributes.scan_direction_flag & 0b1) << 6
                | (attributes.edge_of_flight_line & 0b1) << 7;
            writer.write_u8(low_mask)?;
            writer.write_u8(high_mask)?;
        }
    }

    Ok(())
}

/// Classification byte of the regular point formats: 5 bits of class, followed by the synthetic,
/// key-point and withheld flags
fn regular_classification(point: &Point) -> Result<u8> {
    if point.classification > 31 {
        bail!(
            "Classification {} exceeds the 5 bits of the regular point formats, consider using an extended point format",
            point.classification
        );
    }
    Ok(point.classification | (point.classification_flags & 0b111) << 5)
}

pub(crate) fn scan_angle_rank(scan_angle: f32) -> i8 {
    scan_angle
        .round()
        .clamp(-MAX_SCAN_ANGLE_RANK, MAX_SCAN_ANGLE_RANK) as i8
}

pub(crate) fn extended_scan_angle(scan_angle: f32) -> i16 {
    (scan_angle / EXTENDED_SCAN_ANGLE_UNIT)
        .round()
        .clamp(-MAX_EXTENDED_SCAN_ANGLE, MAX_EXTENDED_SCAN_ANGLE) as i16
}

/// Encodes `point` as a LAS point record of the given `format` into `buffer`, replacing its contents.
/// Attributes that the format has no field for are dropped. If the point carries no extra bytes but the
/// format requires some, they are filled with zeros.
pub(crate) fn encode_las_point(
    point: &Point,
    format: &Format,
    quantizer: &Quantizer,
    buffer: &mut Vec<u8>,
) -> Result<()> {
    buffer.clear();
    let extra_bytes = format.extra_bytes as usize;
    if !point.extra_bytes.is_empty() && point.extra_bytes.len() != extra_bytes {
        bail!(
            "Point carries {} extra bytes but the point records of this output have {}",
            point.extra_bytes.len(),
            extra_bytes
        );
    }
    let bit_attributes = BitAttributes::from_point(point, format)?;
    let local_position = quantizer.quantize(&point.position)?;

    buffer.write_i32::<LittleEndian>(local_position.x)?;
    buffer.write_i32::<LittleEndian>(local_position.y)?;
    buffer.write_i32::<LittleEndian>(local_position.z)?;
    buffer.write_u16::<LittleEndian>(point.intensity)?;
    write_las_bit_attributes(bit_attributes, &mut *buffer)?;

    if format.is_extended {
        buffer.write_u8(point.classification)?;
        buffer.write_u8(point.user_data)?;
        buffer.write_i16::<LittleEndian>(extended_scan_angle(point.scan_angle))?;
    } else {
        buffer.write_u8(regular_classification(point)?)?;
        buffer.write_i8(scan_angle_rank(point.scan_angle))?;
        buffer.write_u8(point.user_data)?;
    }
    buffer.write_u16::<LittleEndian>(point.point_source_id)?;

    if format.has_gps_time {
        buffer.write_f64::<LittleEndian>(point.gps_time)?;
    }

    if format.has_color {
        buffer.write_u16::<LittleEndian>(point.color.x)?;
        buffer.write_u16::<LittleEndian>(point.color.y)?;
        buffer.write_u16::<LittleEndian>(point.color.z)?;
    }

    if format.has_nir {
        buffer.write_u16::<LittleEndian>(point.nir)?;
    }

    if format.has_waveform {
        let packet = &point.wave_packet;
        buffer.write_u8(packet.descriptor_index)?;
        buffer.write_u64::<LittleEndian>(packet.byte_offset)?;
        buffer.write_u32::<LittleEndian>(packet.packet_size)?;
        buffer.write_f32::<LittleEndian>(packet.return_point_location)?;
        buffer.write_f32::<LittleEndian>(packet.parameters.x)?;
        buffer.write_f32::<LittleEndian>(packet.parameters.y)?;
        buffer.write_f32::<LittleEndian>(packet.parameters.z)?;
    }

    if point.extra_bytes.is_empty() {
        buffer.resize(buffer.len() + extra_bytes, 0);
    } else {
        buffer.write_all(&point.extra_bytes)?;
    }

    Ok(())
}
