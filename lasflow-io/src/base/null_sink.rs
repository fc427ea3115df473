use anyhow::Result;
use lasflow_core::{meta::PointCloudHeader, point::Point};
use log::info;

use super::{PointSink, SinkState};

/// `PointSink` that accepts, counts and inventories points but persists nothing. Header updates are
/// recorded so that callers can inspect the header a real sink would have written
pub struct NullSink {
    state: SinkState,
    header: PointCloudHeader,
}

impl NullSink {
    pub fn new(header: &PointCloudHeader) -> Self {
        info!("Opening null sink, no points will be persisted");
        Self {
            state: SinkState::new(header.quantizer, header.number_of_points),
            header: header.clone(),
        }
    }

    /// The most recently recorded header
    pub fn header(&self) -> &PointCloudHeader {
        &self.header
    }
}

impl PointSink for NullSink {
    fn state(&self) -> &SinkState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SinkState {
        &mut self.state
    }

    fn write_record(&mut self, _point: &Point) -> Result<()> {
        Ok(())
    }

    fn chunk(&mut self) -> Result<()> {
        self.state.ensure_open("chunk")
    }

    fn update_header(
        &mut self,
        header: &PointCloudHeader,
        use_inventory: bool,
        update_extra_attributes: bool,
    ) -> Result<()> {
        self.state.ensure_open("update_header")?;
        let mut merged = self.state.merged_header(header, use_inventory);
        if !update_extra_attributes {
            merged.extra_attributes = self.header.extra_attributes.clone();
        }
        self.state.set_point_count(merged.number_of_points);
        self.header = merged;
        Ok(())
    }

    fn close(&mut self, patch_point_count: bool) -> Result<u64> {
        self.state.mark_closed()?;
        let written = self.state.written_point_count();
        if patch_point_count {
            self.header.number_of_points = written;
            self.state.set_point_count(written);
        }
        info!("Closed null sink after {} points", written);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use lasflow_core::nalgebra::{Point3, Vector3};
    use rand::{thread_rng, Rng};

    use super::*;

    #[test]
    fn test_null_sink_counts_and_inventories() -> Result<()> {
        let mut rng = thread_rng();
        let mut sink = NullSink::new(&PointCloudHeader::default());
        let count = rng.gen_range(1..200);
        for _ in 0..count {
            let position = Vector3::new(rng.gen_range(-10.0..10.0), rng.gen_range(-10.0..10.0), 0.0);
            sink.write_point(&Point::at(position))?;
        }
        assert_eq!(count, sink.written_point_count());
        assert_eq!(count, sink.inventory().number_of_points());
        sink.update_header(&PointCloudHeader::default(), true, false)?;
        assert_eq!(count, sink.header().number_of_points);
        assert_eq!(count, sink.close(true)?);
        assert!(sink.write_point(&Point::default()).is_err());
        Ok(())
    }

    #[test]
    fn test_manual_inventory() -> Result<()> {
        let mut sink = NullSink::new(&PointCloudHeader::default());
        sink.set_inventory_tracking(false);
        let point = Point::at(Vector3::new(1.0, 2.0, 3.0));
        sink.write_point(&point)?;
        assert!(!sink.inventory().is_active());
        sink.update_inventory(&point);
        assert_eq!(1, sink.inventory().number_of_points());
        assert_eq!(
            Some(Point3::new(1.0, 2.0, 3.0)),
            sink.inventory().bounds().map(|bounds| *bounds.min())
        );
        Ok(())
    }
}
