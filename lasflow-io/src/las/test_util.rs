use lasflow_core::{
    math::AABB,
    nalgebra::{Point3, Vector3},
    point::Point,
};

pub(crate) fn format_has_gps_times(format: u8) -> bool {
    matches!(format, 1 | 3..=10)
}

pub(crate) fn format_has_colors(format: u8) -> bool {
    matches!(format, 2 | 3 | 5 | 7 | 8 | 10)
}

pub(crate) fn format_has_nir(format: u8) -> bool {
    matches!(format, 8 | 10)
}

pub(crate) fn format_has_wavepacket(format: u8) -> bool {
    matches!(format, 4 | 5 | 9 | 10)
}

/// Bounds of the positions returned by `test_points` for `count` points
pub(crate) fn test_data_bounds(count: usize) -> AABB<f64> {
    let max = (count - 1) as f64;
    AABB::from_min_max_unchecked(Point3::new(0.0, 0.0, 0.0), Point3::new(max, max * 0.5, max * 2.0))
}

/// `count` points with values that every attribute of the given point format can represent exactly
pub(crate) fn test_points(format: u8, count: usize) -> Vec<Point> {
    (0..count)
        .map(|index| {
            let mut point = Point::at(Vector3::new(
                index as f64,
                index as f64 * 0.5,
                index as f64 * 2.0,
            ));
            point.intensity = (index * 100) as u16;
            point.number_of_returns = (index % 5) as u8 + 1;
            point.return_number = (index % 5) as u8 + 1;
            point.classification = (index % 10) as u8;
            point.scan_direction_flag = index % 2 == 0;
            point.edge_of_flight_line = index % 3 == 0;
            point.user_data = index as u8;
            point.scan_angle = index as f32 - 5.0;
            point.point_source_id = 1000 + index as u16;
            if format_has_gps_times(format) {
                point.gps_time = 1000.0 + index as f64 * 0.25;
            }
            if format_has_colors(format) {
                point.color = Vector3::new(index as u16 * 256, 65535 - index as u16, 42);
            }
            if format_has_nir(format) {
                point.nir = 7 * index as u16;
            }
            if format_has_wavepacket(format) {
                point.wave_packet.descriptor_index = 1;
                point.wave_packet.byte_offset = 60 + index as u64 * 16;
                point.wave_packet.packet_size = 16;
            }
            if format >= 6 {
                point.scanner_channel = (index % 4) as u8;
            }
            point
        })
        .collect()
}
