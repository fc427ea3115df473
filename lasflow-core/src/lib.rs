#![warn(clippy::all)]

//! Core data structures for streaming point cloud output
//!
//! This crate holds everything a point sink needs to know about the data flowing through it: the
//! [Point](crate::point::Point) record itself, the [PointCloudHeader](crate::meta::PointCloudHeader)
//! prototype that describes an output file, the [Quantizer](crate::math::Quantizer) that maps world
//! space coordinates to the fixed-point values stored on disk, and the [Inventory](crate::meta::Inventory)
//! that accumulates the statistics required to finalize a header once the stream has ended.

pub extern crate nalgebra;

/// Useful mathematical tools when working with point cloud data
pub mod math;
/// Data structures for handling point cloud metadata
pub mod meta;
/// The point record passed through all sinks
pub mod point;

#[cfg(test)]
pub(crate) mod test_utils;
