use std::io::Write;

use anyhow::{bail, Result};
use lasflow_core::{meta::PointCloudHeader, point::Point};
use log::{debug, info, warn};

use crate::base::{CloseErrors, OutputStream, PointSink, SinkState};

use super::{encode_las_point, LasHeaderBlock};

/// Applies a header update to `block` and the sink `state`. Returns `true` if the block was emitted
/// before and has to be rewritten in place
pub(crate) fn apply_header_update(
    block: &mut LasHeaderBlock,
    state: &mut SinkState,
    header: &PointCloudHeader,
    use_inventory: bool,
    update_extra_attributes: bool,
) -> Result<bool> {
    let merged = state.merged_header(header, use_inventory);
    block.replace(merged, update_extra_attributes)?;
    state.set_quantizer(block.header().quantizer);
    state.set_point_count(block.header().number_of_points);
    Ok(block.is_emitted())
}

/// Sets the true number of written points in `block`, together with the per-return counts and bounds of
/// the inventory if it covers exactly the written points
pub(crate) fn apply_final_counts(block: &mut LasHeaderBlock, state: &mut SinkState) -> Result<()> {
    let written = state.written_point_count();
    let inventory = state.inventory();
    if inventory.number_of_points() == written && inventory.is_active() {
        let mut header = block.header().clone();
        header.update_from_inventory(inventory);
        block.replace(header, true)?;
    } else {
        block.set_point_counts(written, None);
    }
    state.set_point_count(written);
    Ok(())
}

/// `PointSink` that writes uncompressed LAS files of versions 1.0 to 1.4.
///
/// The header block is written lazily right before the first point (or on `chunk`/`close`), so header
/// updates before streaming also work on media that cannot be seeked. After that, header updates and
/// the point count patch on `close` rewrite the header block in place, which requires a seekable medium.
pub struct LasSink {
    state: SinkState,
    stream: OutputStream,
    header: LasHeaderBlock,
    record_buffer: Vec<u8>,
}

impl LasSink {
    /// Creates a new `LasSink` that writes to `stream` using the given `header` as prototype
    ///
    /// # Errors
    ///
    /// If the version and point format of `header` are incompatible, or if its scale is invalid, an error is returned
    pub fn new(stream: OutputStream, header: &PointCloudHeader) -> Result<Self> {
        let header_block = LasHeaderBlock::new(header, false)?;
        let record_length = header_block.format().len() as usize;
        info!(
            "Opening LAS {}.{} sink with point format {} on {:?}",
            header.version.0, header.version.1, header.point_format, stream
        );
        Ok(Self {
            state: SinkState::new(header.quantizer, header.number_of_points),
            stream,
            header: header_block,
            record_buffer: Vec::with_capacity(record_length),
        })
    }

    /// The current header of this sink
    pub fn header(&self) -> &PointCloudHeader {
        self.header.header()
    }

    /// Consumes this sink and returns the underlying medium
    pub fn into_inner(self) -> OutputStream {
        self.stream
    }

    fn emit_header(&mut self) -> Result<()> {
        if self.header.is_emitted() {
            return Ok(());
        }
        let block = self.header.encode()?;
        self.stream.write_all(&block)?;
        self.header.mark_emitted(block.len());
        Ok(())
    }

    fn rewrite_header(&mut self) -> Result<()> {
        let block = self.header.encode()?;
        self.stream.overwrite_at(0, &block)?;
        debug!("Rewrote LAS header block ({} bytes)", block.len());
        Ok(())
    }
}

impl PointSink for LasSink {
    fn state(&self) -> &SinkState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SinkState {
        &mut self.state
    }

    fn write_record(&mut self, point: &Point) -> Result<()> {
        self.emit_header()?;
        if self.header.header().version.1 < 4 && self.state.written_point_count() >= u32::MAX as u64 {
            bail!("LAS versions before 1.4 cannot hold more than {} points", u32::MAX);
        }
        encode_las_point(
            point,
            self.header.format(),
            self.state.quantizer(),
            &mut self.record_buffer,
        )?;
        self.stream.write_all(&self.record_buffer)?;
        Ok(())
    }

    fn chunk(&mut self) -> Result<()> {
        self.state.ensure_open("chunk")?;
        self.emit_header()
    }

    fn update_header(
        &mut self,
        header: &PointCloudHeader,
        use_inventory: bool,
        update_extra_attributes: bool,
    ) -> Result<()> {
        self.state.ensure_open("update_header")?;
        let needs_rewrite = apply_header_update(
            &mut self.header,
            &mut self.state,
            header,
            use_inventory,
            update_extra_attributes,
        )?;
        if !needs_rewrite {
            return Ok(());
        }
        if self.stream.is_seekable() {
            self.rewrite_header()
        } else {
            warn!("LAS header was already written to an unseekable medium, the update is not persisted");
            Ok(())
        }
    }

    fn close(&mut self, patch_point_count: bool) -> Result<u64> {
        self.state.mark_closed()?;
        let mut errors = CloseErrors::default();
        errors.attempt(self.emit_header());
        if patch_point_count {
            if self.stream.is_seekable() {
                let patched = apply_final_counts(&mut self.header, &mut self.state)
                    .and_then(|_| self.rewrite_header());
                errors.attempt(patched);
            } else {
                warn!(
                    "Not patching the point count of a LAS stream on an unseekable medium ({} points written)",
                    self.state.written_point_count()
                );
            }
        }
        errors.attempt(self.stream.flush().map_err(Into::into));
        info!(
            "Closed LAS sink after {} points",
            self.state.written_point_count()
        );
        errors.finish(self.state.written_point_count())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use las::Read;
    use lasflow_core::{math::Quantizer, meta::Vlr, nalgebra::Vector3};

    use crate::{base::test_pipe::SharedPipe, las::test_util::test_points};

    use super::*;

    fn read_back(bytes: Vec<u8>) -> Result<(las::Header, Vec<las::Point>)> {
        let mut reader = las::Reader::new(Cursor::new(bytes))?;
        let points = reader.points().collect::<Result<Vec<_>, _>>()?;
        Ok((reader.header().clone(), points))
    }

    macro_rules! las_sink_tests {
        ($name:ident, $version:expr, $format:expr) => {
            mod $name {
                use super::*;

                #[test]
                fn test_las_sink_round_trip() -> Result<()> {
                    let header = PointCloudHeader::new($version, $format);
                    let expected = test_points($format, 10);

                    let mut sink = LasSink::new(OutputStream::memory(), &header)?;
                    for point in &expected {
                        sink.write_point(point)?;
                    }
                    assert_eq!(10, sink.close(true)?);
                    let bytes = sink.into_inner().into_memory().expect("memory stream");

                    let (read_header, points) = read_back(bytes)?;
                    assert_eq!(10, read_header.number_of_points());
                    assert_eq!($format, read_header.point_format().to_u8()?);
                    assert_eq!(expected.len(), points.len());
                    for (expected, actual) in expected.iter().zip(points.iter()) {
                        assert!((expected.position.x - actual.x).abs() < 0.005);
                        assert!((expected.position.y - actual.y).abs() < 0.005);
                        assert!((expected.position.z - actual.z).abs() < 0.005);
                        assert_eq!(expected.intensity, actual.intensity);
                        assert_eq!(expected.return_number, actual.return_number);
                        assert_eq!(expected.number_of_returns, actual.number_of_returns);
                        assert_eq!(expected.point_source_id, actual.point_source_id);
                    }
                    Ok(())
                }
            }
        };
    }

    las_sink_tests!(las_1_0_format_0, (1, 0), 0);
    las_sink_tests!(las_1_2_format_1, (1, 2), 1);
    las_sink_tests!(las_1_2_format_3, (1, 2), 3);
    las_sink_tests!(las_1_3_format_4, (1, 3), 4);
    las_sink_tests!(las_1_4_format_6, (1, 4), 6);
    las_sink_tests!(las_1_4_format_8, (1, 4), 8);
    las_sink_tests!(las_1_4_format_10, (1, 4), 10);

    #[test]
    fn test_close_patches_count_and_bounds() -> Result<()> {
        let header = PointCloudHeader::new((1, 2), 0);
        let mut sink = LasSink::new(OutputStream::memory(), &header)?;
        sink.write_point(&Point::at(Vector3::new(1.0, 2.0, 3.0)))?;
        sink.write_point(&Point::at(Vector3::new(-1.0, 5.0, 0.0)))?;
        sink.close(true)?;
        let (read_header, _) = read_back(sink.into_inner().into_memory().expect("memory"))?;
        assert_eq!(2, read_header.number_of_points());
        let bounds = read_header.bounds();
        assert_eq!(-1.0, bounds.min.x);
        assert_eq!(5.0, bounds.max.y);
        assert_eq!(3.0, bounds.max.z);
        Ok(())
    }

    #[test]
    fn test_close_without_patch_keeps_declared_count() -> Result<()> {
        let mut header = PointCloudHeader::new((1, 2), 0);
        header.number_of_points = 7;
        let mut sink = LasSink::new(OutputStream::memory(), &header)?;
        sink.write_point(&Point::at(Vector3::new(1.0, 2.0, 3.0)))?;
        assert_eq!(1, sink.close(false)?);
        assert_eq!(7, sink.point_count());
        Ok(())
    }

    #[test]
    fn test_piped_close_does_not_seek() -> Result<()> {
        let pipe = SharedPipe::default();
        let header = PointCloudHeader::new((1, 2), 1);
        let mut sink = LasSink::new(OutputStream::pipe(Box::new(pipe.clone())), &header)?;
        for point in test_points(1, 3) {
            sink.write_point(&point)?;
        }
        sink.update_header(&header, true, false)?;
        assert_eq!(3, sink.close(true)?);
        // The header was emitted with the declared count of zero
        let (read_header, _) = read_back(pipe.bytes())?;
        assert_eq!(0, read_header.number_of_points());
        assert_eq!(227 + 3 * 28, pipe.bytes().len());
        Ok(())
    }

    #[test]
    fn test_header_update_before_streaming_works_on_pipes() -> Result<()> {
        let pipe = SharedPipe::default();
        let mut sink = LasSink::new(
            OutputStream::pipe(Box::new(pipe.clone())),
            &PointCloudHeader::new((1, 2), 0),
        )?;
        let mut header = PointCloudHeader::new((1, 2), 0);
        header.number_of_points = 2;
        header.quantizer = Quantizer::new(Vector3::new(0.001, 0.001, 0.001), Vector3::new(10.0, 10.0, 0.0));
        sink.update_header(&header, false, false)?;
        sink.write_point(&Point::at(Vector3::new(10.5, 11.0, 1.0)))?;
        sink.write_point(&Point::at(Vector3::new(12.5, 13.0, 2.0)))?;
        sink.close(true)?;
        let (read_header, points) = read_back(pipe.bytes())?;
        assert_eq!(2, read_header.number_of_points());
        assert_eq!(0.001, read_header.transforms().x.scale);
        assert!((points[1].x - 12.5).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_incompatible_header_update_after_streaming() -> Result<()> {
        let header = PointCloudHeader::new((1, 2), 1);
        let mut sink = LasSink::new(OutputStream::memory(), &header)?;
        sink.write_point(&Point::at(Vector3::new(1.0, 2.0, 3.0)))?;
        let mut changed = header.clone();
        changed.point_format = 3;
        assert!(sink.update_header(&changed, true, true).is_err());
        let mut rescaled = header;
        rescaled.quantizer = Quantizer::new(Vector3::new(0.1, 0.1, 0.1), Vector3::zeros());
        assert!(sink.update_header(&rescaled, true, true).is_err());
        Ok(())
    }

    #[test]
    fn test_rejected_vlr_change_keeps_count_patch() -> Result<()> {
        let header = PointCloudHeader::new((1, 2), 1);
        let mut sink = LasSink::new(OutputStream::memory(), &header)?;
        for point in test_points(1, 3) {
            sink.write_point(&point)?;
        }
        let mut extra_vlr = header;
        extra_vlr.number_of_points = 99;
        extra_vlr.vlrs.push(Vlr {
            user_id: "lasflow".to_owned(),
            record_id: 7,
            description: String::new(),
            data: vec![0; 30],
        });
        assert!(sink.update_header(&extra_vlr, false, false).is_err());
        assert!(sink.header().vlrs.is_empty());
        assert_ne!(99, sink.point_count());

        assert_eq!(3, sink.close(true)?);
        let (read_header, points) = read_back(sink.into_inner().into_memory().expect("memory"))?;
        assert_eq!(3, read_header.number_of_points());
        assert_eq!(3, points.len());
        Ok(())
    }

    #[test]
    fn test_failed_write_does_not_count() -> Result<()> {
        let header = PointCloudHeader::new((1, 2), 0);
        let mut sink = LasSink::new(OutputStream::memory(), &header)?;
        let mut point = Point::at(Vector3::new(1.0, 2.0, 3.0));
        point.return_number = 9;
        assert!(sink.write_point(&point).is_err());
        assert_eq!(0, sink.written_point_count());
        assert!(!sink.inventory().is_active());
        Ok(())
    }

    #[test]
    fn test_no_operation_after_close() -> Result<()> {
        let mut sink = LasSink::new(OutputStream::memory(), &PointCloudHeader::default())?;
        sink.close(true)?;
        assert!(sink.is_closed());
        assert!(sink.write_point(&Point::at(Vector3::new(0.0, 0.0, 0.0))).is_err());
        assert!(sink.chunk().is_err());
        assert!(sink
            .update_header(&PointCloudHeader::default(), false, false)
            .is_err());
        assert!(sink.close(true).is_err());
        Ok(())
    }

    #[test]
    fn test_invalid_version_and_format() {
        assert!(LasSink::new(OutputStream::memory(), &PointCloudHeader::new((1, 2), 6)).is_err());
    }
}
