use std::{convert::TryFrom, fmt::Display};

use anyhow::{bail, Result};
use chrono::{Datelike, NaiveDate};

use crate::math::{Quantizer, AABB};

use super::Inventory;

/// Bits of the global encoding field of a LAS header
pub mod global_encoding {
    /// GPS times are adjusted standard GPS times instead of GPS week times
    pub const GPS_STANDARD_TIME: u16 = 1 << 0;
    /// Waveform data packets are stored inside the point cloud file
    pub const WAVEFORM_DATA_INTERNAL: u16 = 1 << 1;
    /// Waveform data packets are stored in a companion file
    pub const WAVEFORM_DATA_EXTERNAL: u16 = 1 << 2;
    /// Coordinate reference system is stored as WKT
    pub const WKT: u16 = 1 << 4;
}

/// Maximum number of returns a per-return count array can describe
pub const MAX_RETURN_NUMBERS: usize = 15;

/// Data type of an extra per-point attribute
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExtraBytesDataType {
    Undocumented,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl ExtraBytesDataType {
    /// Returns the byte size of a single value of this type, or `None` for undocumented bytes
    pub fn size(&self) -> Option<usize> {
        match self {
            Self::U8 | Self::I8 => Some(1),
            Self::U16 | Self::I16 => Some(2),
            Self::U32 | Self::I32 | Self::F32 => Some(4),
            Self::U64 | Self::I64 | Self::F64 => Some(8),
            Self::Undocumented => None,
        }
    }

    /// The numeric code of this data type as stored in an extra bytes descriptor
    pub fn code(&self) -> u8 {
        match self {
            Self::Undocumented => 0,
            Self::U8 => 1,
            Self::I8 => 2,
            Self::U16 => 3,
            Self::I16 => 4,
            Self::U32 => 5,
            Self::I32 => 6,
            Self::U64 => 7,
            Self::I64 => 8,
            Self::F32 => 9,
            Self::F64 => 10,
        }
    }
}

impl TryFrom<u8> for ExtraBytesDataType {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::Undocumented,
            1 => Self::U8,
            2 => Self::I8,
            3 => Self::U16,
            4 => Self::I16,
            5 => Self::U32,
            6 => Self::I32,
            7 => Self::U64,
            8 => Self::I64,
            9 => Self::F32,
            10 => Self::F64,
            _ => bail!("Extra bytes data type {} is deprecated or reserved", value),
        })
    }
}

impl Display for ExtraBytesDataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Descriptor of one additional per-point attribute stored in the extra bytes of each point record
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExtraAttribute {
    pub data_type: ExtraBytesDataType,
    /// Size in bytes for `ExtraBytesDataType::Undocumented`, ignored otherwise
    pub undocumented_size: u8,
    pub name: String,
    pub description: String,
    pub scale: Option<f64>,
    pub offset: Option<f64>,
}

impl ExtraAttribute {
    pub fn new(name: &str, data_type: ExtraBytesDataType) -> Self {
        Self {
            data_type,
            undocumented_size: 0,
            name: name.to_owned(),
            description: String::new(),
            scale: None,
            offset: None,
        }
    }

    /// Number of bytes this attribute occupies in each point record
    pub fn size(&self) -> usize {
        self.data_type
            .size()
            .unwrap_or(self.undocumented_size as usize)
    }
}

/// An opaque variable length record that is passed through to the output
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Vlr {
    pub user_id: String,
    pub record_id: u16,
    pub description: String,
    pub data: Vec<u8>,
}

/// Prototype header of a point cloud output. Sinks read the quantizer, point format and descriptive fields
/// from it when they are opened, and write counts and bounds back into their copy of it when the header
/// is finalized.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PointCloudHeader {
    /// Major and minor LAS version
    pub version: (u8, u8),
    pub point_format: u8,
    /// Number of bytes following the standard point record. Must be at least the summed size of `extra_attributes`
    pub extra_bytes: u16,
    pub extra_attributes: Vec<ExtraAttribute>,
    pub quantizer: Quantizer,
    pub number_of_points: u64,
    /// Number of points by return, index 0 counts first returns
    pub number_of_points_by_return: [u64; MAX_RETURN_NUMBERS],
    pub bounds: Option<AABB<f64>>,
    pub file_source_id: u16,
    pub global_encoding: u16,
    pub system_identifier: String,
    pub generating_software: String,
    pub creation_date: Option<NaiveDate>,
    pub vlrs: Vec<Vlr>,
}

impl PointCloudHeader {
    pub fn new(version: (u8, u8), point_format: u8) -> Self {
        Self {
            version,
            point_format,
            ..Default::default()
        }
    }

    /// Appends the given extra attribute and grows the per-point extra bytes accordingly
    pub fn add_extra_attribute(&mut self, attribute: ExtraAttribute) {
        self.extra_bytes += attribute.size() as u16;
        self.extra_attributes.push(attribute);
    }

    /// Summed size of all described extra attributes
    pub fn described_extra_bytes(&self) -> usize {
        self.extra_attributes.iter().map(ExtraAttribute::size).sum()
    }

    /// Does the point format of this header carry a waveform packet reference?
    pub fn has_waveform(&self) -> bool {
        matches!(self.point_format, 4 | 5 | 9 | 10)
    }

    /// Day of year and year of the creation date, falling back to today if no date is set
    pub fn creation_day_and_year(&self) -> (u16, u16) {
        let date = self
            .creation_date
            .unwrap_or_else(|| chrono::Utc::now().date_naive());
        (date.ordinal() as u16, date.year() as u16)
    }

    /// Takes point counts, per-return counts and bounds from the given `inventory`
    pub fn update_from_inventory(&mut self, inventory: &Inventory) {
        self.number_of_points = inventory.number_of_points();
        for (index, count) in self.number_of_points_by_return.iter_mut().enumerate() {
            *count = inventory.number_of_points_by_return(index as u8 + 1);
        }
        if let Some(bounds) = inventory.bounds() {
            self.bounds = Some(bounds);
        }
    }
}

impl Default for PointCloudHeader {
    fn default() -> Self {
        Self {
            version: (1, 2),
            point_format: 0,
            extra_bytes: 0,
            extra_attributes: vec![],
            quantizer: Quantizer::default(),
            number_of_points: 0,
            number_of_points_by_return: [0; MAX_RETURN_NUMBERS],
            bounds: None,
            file_source_id: 0,
            global_encoding: 0,
            system_identifier: "lasflow".to_owned(),
            generating_software: concat!("lasflow ", env!("CARGO_PKG_VERSION")).to_owned(),
            creation_date: None,
            vlrs: vec![],
        }
    }
}
