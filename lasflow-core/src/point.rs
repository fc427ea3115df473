use nalgebra::Vector3;

/// Reference to a waveform packet that is stored outside of the point record, either in the same file
/// or in a companion waveform file
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WavePacket {
    pub descriptor_index: u8,
    /// Byte offset of the packet, relative to the start of the waveform data packet record
    pub byte_offset: u64,
    pub packet_size: u32,
    pub return_point_location: f32,
    pub parameters: Vector3<f32>,
}

/// A single point record as it flows from a reader or filter stage into a sink.
///
/// Positions are stored in world space; sinks quantize them using their own [Quantizer](crate::math::Quantizer)
/// when they encode the record. Which of the remaining fields end up in the output depends on the point
/// format of the sink.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Point {
    pub position: Vector3<f64>,
    pub intensity: u16,
    pub return_number: u8,
    pub number_of_returns: u8,
    pub classification: u8,
    /// Synthetic, key-point, withheld and overlap bits (in this order, starting at the lowest bit)
    pub classification_flags: u8,
    pub scanner_channel: u8,
    pub scan_direction_flag: bool,
    pub edge_of_flight_line: bool,
    pub user_data: u8,
    /// Scan angle in degrees
    pub scan_angle: f32,
    pub point_source_id: u16,
    pub gps_time: f64,
    pub color: Vector3<u16>,
    pub nir: u16,
    pub wave_packet: WavePacket,
    /// Raw bytes of additional per-point attributes, described by the extra attributes of the header
    pub extra_bytes: Vec<u8>,
}

impl Point {
    /// Creates a single-return point at the given position with all other attributes set to their defaults
    pub fn at(position: Vector3<f64>) -> Self {
        Self {
            position,
            return_number: 1,
            number_of_returns: 1,
            ..Default::default()
        }
    }
}
