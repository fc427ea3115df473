use nalgebra::{Point3, Vector3};
use rand::Rng;

use crate::{math::AABB, point::Point};

pub(crate) fn random_point<R: Rng + ?Sized>(rng: &mut R) -> Point {
    let number_of_returns = rng.gen_range(1..=5);
    Point {
        position: Vector3::new(
            rng.gen_range(-1000.0..1000.0),
            rng.gen_range(-1000.0..1000.0),
            rng.gen_range(-50.0..50.0),
        ),
        intensity: rng.gen(),
        return_number: rng.gen_range(1..=number_of_returns),
        number_of_returns,
        classification: rng.gen_range(0..32),
        gps_time: rng.gen_range(0.0..1.0e6),
        ..Default::default()
    }
}

pub(crate) fn reference_bounds(points: &[Point]) -> AABB<f64> {
    let fold_axis = |axis: usize, init: f64, op: fn(f64, f64) -> f64| {
        points.iter().map(|p| p.position[axis]).fold(init, op)
    };
    AABB::from_min_max(
        Point3::new(
            fold_axis(0, f64::MAX, f64::min),
            fold_axis(1, f64::MAX, f64::min),
            fold_axis(2, f64::MAX, f64::min),
        ),
        Point3::new(
            fold_axis(0, f64::MIN, f64::max),
            fold_axis(1, f64::MIN, f64::max),
            fold_axis(2, f64::MIN, f64::max),
        ),
    )
}
