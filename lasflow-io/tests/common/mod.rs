use std::{
    io::{self, Write},
    sync::{Arc, Mutex},
};

use lasflow_core::{nalgebra::Vector3, point::Point};
use rand::{distributions::Uniform, prelude::Distribution, Rng};

/// Random points whose positions lie on the grid of the default quantizer, so they survive a write/read cycle
/// unchanged. Only attributes that point format `format` stores are set
pub struct TestPointDistribution {
    pub format: u8,
}

impl Distribution<Point> for TestPointDistribution {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Point {
        let coordinate = Uniform::new(-100_000i32, 100_000i32);
        let mut point = Point::at(Vector3::new(
            rng.sample(coordinate) as f64 / 100.0,
            rng.sample(coordinate) as f64 / 100.0,
            rng.sample(coordinate) as f64 / 100.0,
        ));
        let number_of_returns = rng.sample(Uniform::new_inclusive(1u8, 5));
        point.number_of_returns = number_of_returns;
        point.return_number = rng.sample(Uniform::new_inclusive(1u8, number_of_returns));
        point.intensity = rng.gen();
        point.classification = rng.sample(Uniform::new(0u8, 12));
        point.scan_direction_flag = rng.gen();
        point.edge_of_flight_line = rng.gen();
        point.user_data = rng.gen();
        point.scan_angle = rng.sample(Uniform::new_inclusive(-90i8, 90)) as f32;
        point.point_source_id = rng.gen();
        if matches!(self.format, 1 | 3..=10) {
            point.gps_time = rng.sample(Uniform::new(0u32, 1_000_000)) as f64 * 0.5;
        }
        if matches!(self.format, 2 | 3 | 5 | 7 | 8 | 10) {
            point.color = Vector3::new(rng.gen(), rng.gen(), rng.gen());
        }
        point
    }
}

/// Asserts that `actual`, as read back by the `las` crate, matches the `expected` point
pub fn assert_las_point_eq(expected: &Point, actual: &las::Point, index: usize) {
    let position = Vector3::new(actual.x, actual.y, actual.z);
    assert!(
        (expected.position - position).norm() < 1e-6,
        "Position of point {} does not match: {} vs. {}",
        index,
        expected.position,
        position
    );
    assert_eq!(expected.intensity, actual.intensity, "Intensity of point {}", index);
    assert_eq!(expected.return_number, actual.return_number, "Return number of point {}", index);
    assert_eq!(
        expected.number_of_returns, actual.number_of_returns,
        "Number of returns of point {}",
        index
    );
    assert_eq!(
        expected.classification,
        u8::from(actual.classification),
        "Classification of point {}",
        index
    );
    assert_eq!(expected.user_data, actual.user_data, "User data of point {}", index);
    assert_eq!(expected.point_source_id, actual.point_source_id, "Point source ID of point {}", index);
    if let Some(gps_time) = actual.gps_time {
        assert_eq!(expected.gps_time, gps_time, "GPS time of point {}", index);
    }
    if let Some(color) = actual.color {
        assert_eq!(
            expected.color,
            Vector3::new(color.red, color.green, color.blue),
            "Color of point {}",
            index
        );
    }
}

/// An append-only writer whose bytes can be inspected after the sink that owns it is gone
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().expect("Buffer lock was poisoned").clone()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "Buffer lock was poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
