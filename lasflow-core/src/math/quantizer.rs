use std::convert::TryFrom;

use anyhow::{anyhow, bail, Result};
use nalgebra::Vector3;

/// Scale and offset that map world space coordinates to the 32-bit fixed-point coordinates stored in a
/// point cloud file. A world space coordinate `c` is stored as `round((c - offset) / scale)`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Quantizer {
    pub scale: Vector3<f64>,
    pub offset: Vector3<f64>,
}

impl Quantizer {
    pub fn new(scale: Vector3<f64>, offset: Vector3<f64>) -> Self {
        Self { scale, offset }
    }

    /// Returns `true` if none of the scale factors is zero or non-finite
    pub fn is_valid(&self) -> bool {
        self.scale
            .iter()
            .all(|scale| *scale != 0.0 && scale.is_finite())
    }

    /// Converts the given world space position into fixed-point coordinates
    ///
    /// # Errors
    ///
    /// If a scale factor is zero, or if one of the resulting coordinates does not fit into an `i32`, an
    /// error is returned
    pub fn quantize(&self, world_space_position: &Vector3<f64>) -> Result<Vector3<i32>> {
        if !self.is_valid() {
            bail!("Quantizer::quantize: Scale factors must be finite and non-zero!");
        }
        let quantize_axis = |axis: usize| -> Result<i32> {
            let local = ((world_space_position[axis] - self.offset[axis]) / self.scale[axis]).round();
            if !local.is_finite() {
                bail!("Quantizer::quantize: Non-finite coordinate on axis {}", axis);
            }
            i32::try_from(local as i64).map_err(|_| {
                anyhow!(
                    "Quantizer::quantize: Coordinate {} is out of bounds given offset {} and scale {}",
                    world_space_position[axis],
                    self.offset[axis],
                    self.scale[axis]
                )
            })
        };
        Ok(Vector3::new(
            quantize_axis(0)?,
            quantize_axis(1)?,
            quantize_axis(2)?,
        ))
    }

    /// Converts the given fixed-point coordinates back into world space
    pub fn dequantize(&self, local_position: &Vector3<i32>) -> Vector3<f64> {
        Vector3::new(
            local_position.x as f64 * self.scale.x + self.offset.x,
            local_position.y as f64 * self.scale.y + self.offset.y,
            local_position.z as f64 * self.scale.z + self.offset.z,
        )
    }

    /// Number of decimal digits required to print a coordinate without losing precision, based on the
    /// smallest scale factor. A scale of `0.01` yields 2, a scale of `0.5` yields 1, a scale of `1.0` yields 0
    pub fn decimal_digits(&self) -> usize {
        let smallest_scale = self.scale.iter().fold(f64::MAX, |acc, s| acc.min(s.abs()));
        let mut digits = 0;
        let mut resolution = 1.0;
        while digits < 10 && smallest_scale < resolution * 0.999_999 {
            resolution /= 10.0;
            digits += 1;
        }
        digits
    }
}

impl Default for Quantizer {
    fn default() -> Self {
        Self {
            scale: Vector3::new(0.01, 0.01, 0.01),
            offset: Vector3::zeros(),
        }
    }
}
