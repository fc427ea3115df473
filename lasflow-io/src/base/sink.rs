use anyhow::{bail, Result};
use lasflow_core::{
    math::Quantizer,
    meta::{Inventory, PointCloudHeader},
    point::Point,
};
use log::warn;

/// State that every sink carries, independent of its output format
#[derive(Debug, Clone)]
pub struct SinkState {
    quantizer: Quantizer,
    point_count: u64,
    written_point_count: u64,
    inventory: Inventory,
    track_inventory: bool,
    closed: bool,
}

impl SinkState {
    pub fn new(quantizer: Quantizer, point_count: u64) -> Self {
        Self {
            quantizer,
            point_count,
            written_point_count: 0,
            inventory: Inventory::default(),
            track_inventory: true,
            closed: false,
        }
    }

    pub fn quantizer(&self) -> &Quantizer {
        &self.quantizer
    }

    /// Number of points the header claims
    pub fn point_count(&self) -> u64 {
        self.point_count
    }

    /// Number of points that were successfully written so far
    pub fn written_point_count(&self) -> u64 {
        self.written_point_count
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn inventory_mut(&mut self) -> &mut Inventory {
        &mut self.inventory
    }

    pub fn tracks_inventory(&self) -> bool {
        self.track_inventory
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn set_point_count(&mut self, point_count: u64) {
        self.point_count = point_count;
    }

    pub(crate) fn set_quantizer(&mut self, quantizer: Quantizer) {
        self.quantizer = quantizer;
    }

    pub(crate) fn ensure_open(&self, operation: &str) -> Result<()> {
        if self.closed {
            bail!("{} called on a sink that was already closed", operation);
        }
        Ok(())
    }

    /// Transitions into the closed state. Fails if the sink was closed before
    pub(crate) fn mark_closed(&mut self) -> Result<()> {
        self.ensure_open("close")?;
        self.closed = true;
        Ok(())
    }

    /// The header counts that result from the given `header` and, if requested and available, from the
    /// inventory of this sink
    pub(crate) fn merged_header(&self, header: &PointCloudHeader, use_inventory: bool) -> PointCloudHeader {
        let mut merged = header.clone();
        if use_inventory && self.inventory.is_active() {
            merged.update_from_inventory(&self.inventory);
        }
        merged
    }
}

/// Base trait for all streaming point sinks.
///
/// A sink is created by a [WriteOpener](crate::opener::WriteOpener) (or directly through the constructors of
/// the concrete sinks), accepts points one at a time, and is finalized with [close](PointSink::close). Header
/// metadata can be provided before streaming or derived from the stream afterwards through
/// [update_header](PointSink::update_header). No operation is valid after `close`.
pub trait PointSink: Send {
    fn state(&self) -> &SinkState;
    fn state_mut(&mut self) -> &mut SinkState;

    /// Encodes and writes a single point record to the medium. This is called by
    /// [write_point](PointSink::write_point), which takes care of the lifecycle checks and the point counters.
    /// An error must leave the medium in a state where no partial record is considered written.
    fn write_record(&mut self, point: &Point) -> Result<()>;

    /// Closes the current internal segment and opens a new one. Sinks without segments succeed doing nothing
    fn chunk(&mut self) -> Result<()>;

    /// Writes (or rewrites) the header metadata. If `use_inventory` is true, counts and bounds are taken from
    /// the inventory of this sink instead of from `header`. If `update_extra_attributes` is true, the
    /// descriptors of the extra per-point attributes are taken from `header` as well.
    fn update_header(
        &mut self,
        header: &PointCloudHeader,
        use_inventory: bool,
        update_extra_attributes: bool,
    ) -> Result<()>;

    /// Finalizes the output and releases the medium. If `patch_point_count` is true and the medium is
    /// seekable, the true number of written points is patched into the header. Returns the number of
    /// written points.
    fn close(&mut self, patch_point_count: bool) -> Result<u64>;

    /// Appends `point` to the output
    fn write_point(&mut self, point: &Point) -> Result<()> {
        self.state().ensure_open("write_point")?;
        self.write_record(point)?;
        self.state_mut().written_point_count += 1;
        if self.state().tracks_inventory() {
            self.update_inventory(point);
        }
        Ok(())
    }

    /// Folds `point` into the inventory of this sink
    fn update_inventory(&mut self, point: &Point) {
        self.state_mut().inventory_mut().add(point);
    }

    /// Enables or disables the automatic inventory update for written points. Callers that disable it are
    /// expected to call [update_inventory](PointSink::update_inventory) themselves
    fn set_inventory_tracking(&mut self, enabled: bool) {
        self.state_mut().track_inventory = enabled;
    }

    fn quantizer(&self) -> &Quantizer {
        self.state().quantizer()
    }

    fn point_count(&self) -> u64 {
        self.state().point_count()
    }

    fn written_point_count(&self) -> u64 {
        self.state().written_point_count()
    }

    fn inventory(&self) -> &Inventory {
        self.state().inventory()
    }

    fn is_closed(&self) -> bool {
        self.state().is_closed()
    }
}

/// Collects the errors of the individual steps of a `close` so that all steps are attempted and the first
/// error is propagated
#[derive(Default)]
pub(crate) struct CloseErrors {
    first: Option<anyhow::Error>,
}

impl CloseErrors {
    pub(crate) fn attempt(&mut self, step: Result<()>) {
        if let Err(err) = step {
            match self.first {
                None => self.first = Some(err),
                Some(_) => warn!("Additional error while closing sink: {:#}", err),
            }
        }
    }

    pub(crate) fn finish(self, written_points: u64) -> Result<u64> {
        match self.first {
            Some(err) => Err(err),
            None => Ok(written_points),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_errors_keep_first() {
        let mut errors = CloseErrors::default();
        errors.attempt(Ok(()));
        errors.attempt(Err(anyhow::anyhow!("first")));
        errors.attempt(Err(anyhow::anyhow!("second")));
        let err = errors.finish(3).unwrap_err();
        assert_eq!("first", err.to_string());
    }

    #[test]
    fn test_state_refuses_second_close() {
        let mut state = SinkState::new(Quantizer::default(), 0);
        state.mark_closed().unwrap();
        assert!(state.mark_closed().is_err());
        assert!(state.ensure_open("chunk").is_err());
    }
}
