#![warn(clippy::all)]

//! Streaming point sinks for LAS, LAZ, TerraSolid BIN and ASCII output
//!
//! All sinks implement the [PointSink](crate::base::PointSink) trait: points are written one at a time,
//! the header can be updated while the stream is running and is patched with the final counts and bounds
//! when the sink is closed. Which sink is opened for a given destination is decided by the
//! [WriteOpener](crate::opener::WriteOpener), which resolves file names, numbering and output formats
//! from a [WriteTargetConfig](crate::opener::WriteTargetConfig).

pub use ::las as las_rs;

/// Output media and the `PointSink` contract shared by all sinks
pub mod base;
/// LAS and LAZ sinks
pub mod las;
/// Sink for the TerraSolid BIN format
pub mod terrasolid;
/// Sink for delimited text output
pub mod ascii;
/// Companion files for LAS 1.3 waveform packets
pub mod waveform;
/// Resolution of write targets into sinks
pub mod opener;
