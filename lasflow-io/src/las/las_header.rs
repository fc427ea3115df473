use std::{convert::TryFrom, io::Write};

use anyhow::{anyhow, bail, Context, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use las::{
    point::Format,
    raw::header::{Evlr, LargeFile},
    Version,
};
use lasflow_core::{
    math::AABB,
    meta::{ExtraAttribute, PointCloudHeader, Vlr},
    nalgebra::Point3,
};
use laz::{
    las::laszip::{LASZIP_DESCRIPTION, LASZIP_RECORD_ID, LASZIP_USER_ID},
    LazItemRecordBuilder, LazVlr, LazVlrBuilder,
};
use log::debug;

use super::LazResultExt;

/// Size of the header that precedes the payload of every VLR
const VLR_HEADER_SIZE: usize = 54;
/// Size of a single extra bytes descriptor inside the extra bytes VLR
const EXTRA_BYTES_DESCRIPTOR_SIZE: usize = 192;
const EXTRA_BYTES_USER_ID: &str = "LASF_Spec";
const EXTRA_BYTES_RECORD_ID: u16 = 4;
/// Bit that marks a point data record format as compressed
const COMPRESSED_FORMAT_BIT: u8 = 0x80;
/// Signature that LAS 1.0 expects between the VLRs and the point data
const LAS_1_0_POINT_DATA_SIGNATURE: [u8; 2] = [0xDD, 0xCC];

/// Checks that the given LAS version exists and supports the given point format
pub fn check_version_and_format(version: (u8, u8), point_format: u8) -> Result<()> {
    let (major, minor) = version;
    if major != 1 || minor > 4 {
        bail!("LAS version {}.{} is not supported", major, minor);
    }
    let minimum_minor = match point_format {
        0 | 1 => 0,
        2 | 3 => 2,
        4 | 5 => 3,
        6..=10 => 4,
        _ => bail!("Point format {} is not a valid LAS point format", point_format),
    };
    if minor < minimum_minor {
        bail!(
            "Point format {} requires at least LAS version 1.{} (header has version 1.{})",
            point_format,
            minimum_minor,
            minor
        );
    }
    Ok(())
}

/// Size of the public header block of the given LAS version
pub(crate) fn header_size(version: (u8, u8)) -> u16 {
    match version.1 {
        0..=2 => 227,
        3 => 235,
        _ => 375,
    }
}

/// The las `Format` of the given header, including its extra bytes
pub(crate) fn las_format_of(header: &PointCloudHeader) -> Result<Format> {
    let mut format = Format::new(header.point_format)?;
    format.extra_bytes = header.extra_bytes;
    Ok(format)
}

/// Checks everything about `header` that must hold before a LAS or LAZ stream can be opened with it
pub(crate) fn validate_header(header: &PointCloudHeader) -> Result<()> {
    check_version_and_format(header.version, header.point_format)?;
    if !header.quantizer.is_valid() {
        bail!("Scale factors in the header must be finite and non-zero");
    }
    let described = header.described_extra_bytes();
    if described > header.extra_bytes as usize {
        bail!(
            "Extra attributes describe {} bytes but points only carry {} extra bytes",
            described,
            header.extra_bytes
        );
    }
    if header.version.1 < 4 && header.number_of_points > u32::MAX as u64 {
        bail!(
            "{} points exceed the 32-bit point count of LAS {}.{}, use LAS 1.4 instead",
            header.number_of_points,
            header.version.0,
            header.version.1
        );
    }
    Ok(())
}

/// Copies `text` into a fixed-size, zero-padded field, truncating it if necessary
pub(crate) fn fixed_size_field<const N: usize>(text: &str) -> [u8; N] {
    let mut field = [0; N];
    for (target, source) in field.iter_mut().zip(text.bytes()) {
        *target = source;
    }
    field
}

fn write_vlr<W: Write>(vlr: &Vlr, mut writer: W) -> Result<()> {
    let record_length = u16::try_from(vlr.data.len()).map_err(|_| {
        anyhow!(
            "VLR {} / {} with {} bytes is too large for a variable length record",
            vlr.user_id,
            vlr.record_id,
            vlr.data.len()
        )
    })?;
    writer.write_u16::<LittleEndian>(0)?;
    writer.write_all(&fixed_size_field::<16>(&vlr.user_id))?;
    writer.write_u16::<LittleEndian>(vlr.record_id)?;
    writer.write_u16::<LittleEndian>(record_length)?;
    writer.write_all(&fixed_size_field::<32>(&vlr.description))?;
    writer.write_all(&vlr.data)?;
    Ok(())
}

fn write_extra_bytes_descriptor<W: Write>(attribute: &ExtraAttribute, mut writer: W) -> Result<()> {
    const SCALE_BIT: u8 = 1 << 3;
    const OFFSET_BIT: u8 = 1 << 4;

    writer.write_all(&[0; 2])?;
    writer.write_u8(attribute.data_type.code())?;
    let options = match attribute.data_type.size() {
        // For undocumented bytes, the options field holds the number of bytes
        None => attribute.undocumented_size,
        Some(_) => {
            let mut options = 0;
            if attribute.scale.is_some() {
                options |= SCALE_BIT;
            }
            if attribute.offset.is_some() {
                options |= OFFSET_BIT;
            }
            options
        }
    };
    writer.write_u8(options)?;
    writer.write_all(&fixed_size_field::<32>(&attribute.name))?;
    writer.write_all(&[0; 4])?;
    // no_data, min and max
    writer.write_all(&[0; 72])?;
    let scale = attribute.scale.unwrap_or_default();
    let offset = attribute.offset.unwrap_or_default();
    for _ in 0..3 {
        writer.write_f64::<LittleEndian>(scale)?;
    }
    for _ in 0..3 {
        writer.write_f64::<LittleEndian>(offset)?;
    }
    writer.write_all(&fixed_size_field::<32>(&attribute.description))?;
    Ok(())
}

/// The `LASF_Spec` VLR that describes the extra attributes of each point
pub(crate) fn extra_bytes_vlr(attributes: &[ExtraAttribute]) -> Result<Vlr> {
    let mut data = Vec::with_capacity(attributes.len() * EXTRA_BYTES_DESCRIPTOR_SIZE);
    for attribute in attributes {
        write_extra_bytes_descriptor(attribute, &mut data)?;
    }
    Ok(Vlr {
        user_id: EXTRA_BYTES_USER_ID.to_owned(),
        record_id: EXTRA_BYTES_RECORD_ID,
        description: "Extra bytes".to_owned(),
        data,
    })
}

fn is_extra_bytes_vlr(vlr: &Vlr) -> bool {
    vlr.user_id == EXTRA_BYTES_USER_ID && vlr.record_id == EXTRA_BYTES_RECORD_ID
}

fn is_laszip_vlr(vlr: &Vlr) -> bool {
    vlr.user_id == LASZIP_USER_ID && vlr.record_id == LASZIP_RECORD_ID
}

/// The LASzip VLR for compressing points of the given format in variable-sized chunks
pub(crate) fn laz_vlr_for_format(format: &Format) -> Result<LazVlr> {
    let items = LazItemRecordBuilder::default_for_point_format_id(format.to_u8()?, format.extra_bytes)
        .laz_context("Building the LASzip item records")?;
    Ok(LazVlrBuilder::new(items).with_variable_chunk_size().build())
}

fn laz_vlr_as_vlr(laz_vlr: &LazVlr) -> Result<Vlr> {
    let mut data = Vec::new();
    laz_vlr.write_to(&mut data)?;
    Ok(Vlr {
        user_id: LASZIP_USER_ID.to_owned(),
        record_id: LASZIP_RECORD_ID,
        description: LASZIP_DESCRIPTION.to_owned(),
        data,
    })
}

/// The header of a LAS or LAZ output as it is kept by a sink. It knows how to encode itself into the
/// header block (public header, VLRs and, for LAS 1.0, the point data signature) and remembers the
/// length of the block it emitted so that later rewrites can be checked for compatibility.
#[derive(Debug, Clone)]
pub(crate) struct LasHeaderBlock {
    header: PointCloudHeader,
    format: Format,
    compressed: bool,
    emitted_len: Option<usize>,
}

impl LasHeaderBlock {
    pub(crate) fn new(header: &PointCloudHeader, compressed: bool) -> Result<Self> {
        validate_header(header)?;
        Ok(Self {
            header: header.clone(),
            format: las_format_of(header)?,
            compressed,
            emitted_len: None,
        })
    }

    pub(crate) fn header(&self) -> &PointCloudHeader {
        &self.header
    }

    pub(crate) fn format(&self) -> &Format {
        &self.format
    }

    pub(crate) fn is_emitted(&self) -> bool {
        self.emitted_len.is_some()
    }

    pub(crate) fn mark_emitted(&mut self, len: usize) {
        self.emitted_len = Some(len);
    }

    /// Replaces the kept header with `new_header`. Once the header block was emitted, the point record layout
    /// and the block length are fixed, so changes to the point format, the extra bytes, the quantizer or the
    /// VLRs are rejected and leave the kept header untouched. If `update_extra_attributes` is false, the
    /// extra attribute descriptors of the kept header are retained.
    pub(crate) fn replace(&mut self, new_header: PointCloudHeader, update_extra_attributes: bool) -> Result<()> {
        let mut new_header = new_header;
        if !update_extra_attributes {
            new_header.extra_attributes = self.header.extra_attributes.clone();
        }
        validate_header(&new_header)?;
        if self.is_emitted() {
            if new_header.point_format != self.header.point_format {
                bail!(
                    "Cannot change the point format from {} to {} after points were written",
                    self.header.point_format,
                    new_header.point_format
                );
            }
            if new_header.extra_bytes != self.header.extra_bytes {
                bail!(
                    "Cannot change the extra bytes per point from {} to {} after points were written",
                    self.header.extra_bytes,
                    new_header.extra_bytes
                );
            }
            if new_header.quantizer != self.header.quantizer {
                bail!("Cannot change scale or offset after points were written");
            }
        }
        let candidate = Self {
            format: las_format_of(&new_header)?,
            header: new_header,
            compressed: self.compressed,
            emitted_len: self.emitted_len,
        };
        // An emitted block is rewritten in place, so the replacement must encode to the same length
        if candidate.is_emitted() {
            candidate.encode()?;
        }
        *self = candidate;
        Ok(())
    }

    /// Sets the point counts of the kept header
    pub(crate) fn set_point_counts(&mut self, number_of_points: u64, by_return: Option<&[u64; 15]>) {
        self.header.number_of_points = number_of_points;
        if let Some(by_return) = by_return {
            self.header.number_of_points_by_return = *by_return;
        }
    }

    pub(crate) fn set_bounds(&mut self, bounds: AABB<f64>) {
        self.header.bounds = Some(bounds);
    }

    /// All VLRs in the order they are written: the LASzip VLR, the extra bytes VLR and then the pass-through
    /// VLRs of the header. Pass-through VLRs that would duplicate one of the generated ones are skipped
    fn vlrs(&self) -> Result<Vec<Vlr>> {
        let mut vlrs = vec![];
        if self.compressed {
            vlrs.push(laz_vlr_as_vlr(&laz_vlr_for_format(&self.format)?)?);
        }
        if !self.header.extra_attributes.is_empty() {
            vlrs.push(extra_bytes_vlr(&self.header.extra_attributes)?);
        }
        vlrs.extend(
            self.header
                .vlrs
                .iter()
                .filter(|vlr| {
                    !is_laszip_vlr(vlr)
                        && !(is_extra_bytes_vlr(vlr) && !self.header.extra_attributes.is_empty())
                })
                .cloned(),
        );
        Ok(vlrs)
    }

    fn raw_header(&self, number_of_vlrs: usize, offset_to_point_data: usize) -> Result<las::raw::Header> {
        let header = &self.header;
        let (major, minor) = header.version;
        let is_v14 = minor >= 4;
        let number_of_points = header.number_of_points;

        let count_fits_legacy_fields = number_of_points <= u32::MAX as u64 && header.point_format < 6;
        if !is_v14 && number_of_points > u32::MAX as u64 {
            bail!(
                "{} points exceed the 32-bit point count of LAS {}.{}, use LAS 1.4 instead",
                number_of_points,
                major,
                minor
            );
        }
        let mut legacy_by_return = [0u32; 5];
        if count_fits_legacy_fields {
            for (legacy, count) in legacy_by_return
                .iter_mut()
                .zip(header.number_of_points_by_return.iter())
            {
                *legacy = u32::try_from(*count).unwrap_or(0);
            }
        }

        let (day, year) = header.creation_day_and_year();
        let quantizer = &header.quantizer;
        let (min, max) = match &header.bounds {
            Some(bounds) => (*bounds.min(), *bounds.max()),
            None => (Point3::origin(), Point3::origin()),
        };

        let mut point_data_record_format = header.point_format;
        if self.compressed {
            point_data_record_format |= COMPRESSED_FORMAT_BIT;
        }

        Ok(las::raw::Header {
            file_source_id: header.file_source_id,
            global_encoding: header.global_encoding,
            version: Version::new(major, minor),
            system_identifier: fixed_size_field::<32>(&header.system_identifier),
            generating_software: fixed_size_field::<32>(&header.generating_software),
            file_creation_day_of_year: day,
            file_creation_year: year,
            header_size: header_size(header.version),
            offset_to_point_data: u32::try_from(offset_to_point_data)?,
            number_of_variable_length_records: u32::try_from(number_of_vlrs)?,
            point_data_record_format,
            point_data_record_length: self.format.len(),
            number_of_point_records: if count_fits_legacy_fields {
                number_of_points as u32
            } else {
                0
            },
            number_of_points_by_return: legacy_by_return,
            x_scale_factor: quantizer.scale.x,
            y_scale_factor: quantizer.scale.y,
            z_scale_factor: quantizer.scale.z,
            x_offset: quantizer.offset.x,
            y_offset: quantizer.offset.y,
            z_offset: quantizer.offset.z,
            max_x: max.x,
            min_x: min.x,
            max_y: max.y,
            min_y: min.y,
            max_z: max.z,
            min_z: min.z,
            start_of_waveform_data_packet_record: if minor >= 3 { Some(0) } else { None },
            evlr: if is_v14 {
                Some(Evlr {
                    start_of_first_evlr: 0,
                    number_of_evlrs: 0,
                })
            } else {
                None
            },
            large_file: if is_v14 {
                Some(LargeFile {
                    number_of_point_records: number_of_points,
                    number_of_points_by_return: header.number_of_points_by_return,
                })
            } else {
                None
            },
            ..Default::default()
        })
    }

    /// Encodes the complete header block. If the block was emitted before, the new encoding must have
    /// exactly the same length so that it can replace the old one in place
    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        let vlrs = self.vlrs()?;
        let signature_len = if self.header.version.1 == 0 {
            LAS_1_0_POINT_DATA_SIGNATURE.len()
        } else {
            0
        };
        let offset_to_point_data = header_size(self.header.version) as usize
            + vlrs
                .iter()
                .map(|vlr| VLR_HEADER_SIZE + vlr.data.len())
                .sum::<usize>()
            + signature_len;

        let raw_header = self
            .raw_header(vlrs.len(), offset_to_point_data)
            .context("Could not build LAS header")?;
        let mut block = Vec::with_capacity(offset_to_point_data);
        raw_header.write_to(&mut block)?;
        for vlr in &vlrs {
            write_vlr(vlr, &mut block)?;
        }
        if signature_len > 0 {
            block.write_all(&LAS_1_0_POINT_DATA_SIGNATURE)?;
        }

        if block.len() != offset_to_point_data {
            bail!(
                "Encoded LAS header block has {} bytes, expected {}",
                block.len(),
                offset_to_point_data
            );
        }
        if let Some(emitted_len) = self.emitted_len {
            if emitted_len != block.len() {
                bail!(
                    "Rewritten LAS header block has {} bytes but the emitted one had {}, VLRs cannot change after points were written",
                    block.len(),
                    emitted_len
                );
            }
        }
        debug!(
            "Encoded LAS {}.{} header block with {} VLRs ({} bytes)",
            self.header.version.0,
            self.header.version.1,
            vlrs.len(),
            block.len()
        );
        Ok(block)
    }
}
