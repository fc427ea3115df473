use nalgebra::Point3;

use crate::{math::AABB, point::Point};

/// Running aggregate over all points that were written to a sink so far. This is the only source for
/// header fields that cannot be known before the stream has ended, such as the bounding box.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inventory {
    number_of_points: u64,
    /// Indexed by return number, so index 0 collects points with an (invalid) return number of zero
    number_of_points_by_return: [u64; 16],
    bounds: Option<AABB<f64>>,
    intensity_range: Option<(u16, u16)>,
}

impl Inventory {
    /// Folds the attributes of `point` into this inventory
    pub fn add(&mut self, point: &Point) {
        self.number_of_points += 1;
        let return_index = (point.return_number as usize).min(15);
        self.number_of_points_by_return[return_index] += 1;

        let position = Point3::from(point.position);
        self.bounds = Some(match &self.bounds {
            Some(bounds) => AABB::extend_with_point(bounds, &position),
            None => AABB::from_point(position),
        });

        self.intensity_range = Some(match self.intensity_range {
            Some((min, max)) => (min.min(point.intensity), max.max(point.intensity)),
            None => (point.intensity, point.intensity),
        });
    }

    /// Resets this inventory to its initial, empty state
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Returns `true` if at least one point was added
    pub fn is_active(&self) -> bool {
        self.number_of_points > 0
    }

    pub fn number_of_points(&self) -> u64 {
        self.number_of_points
    }

    /// Number of points with the given return number. Return numbers above 15 are counted as 15
    pub fn number_of_points_by_return(&self, return_number: u8) -> u64 {
        self.number_of_points_by_return[(return_number as usize).min(15)]
    }

    pub fn bounds(&self) -> Option<AABB<f64>> {
        self.bounds
    }

    /// Minimum and maximum intensity of all added points
    pub fn intensity_range(&self) -> Option<(u16, u16)> {
        self.intensity_range
    }
}
