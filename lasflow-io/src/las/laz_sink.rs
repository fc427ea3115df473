use std::io::Write;

use anyhow::{anyhow, bail, Result};
use lasflow_core::{meta::PointCloudHeader, point::Point};
use laz::LasZipCompressor;
use log::{debug, info, warn};

use crate::base::{CloseErrors, OutputStream, PointSink, SinkState};

use super::{
    apply_final_counts, apply_header_update, encode_las_point, laz_vlr_for_format, LazResultExt,
    LasHeaderBlock,
};

/// Number of points per compressed chunk if no chunk size is configured
pub const DEFAULT_LAZ_CHUNK_SIZE: u32 = 50_000;
/// Size of the in-memory spool of a piped LAZ stream above which a warning is logged
pub const LAZ_SPOOL_WARN_BYTES: u64 = 1 << 30;

enum Compression {
    /// The header block was not written yet, so no compressor exists
    Pending(OutputStream),
    Active(LasZipCompressor<'static, OutputStream>),
    Finished(OutputStream),
    /// A compressor could not be created or finished, the medium is gone
    Failed,
}

/// `PointSink` that writes LAZ compressed LAS files.
///
/// Points are compressed in variable-sized chunks: a chunk is closed automatically every `chunk_size`
/// points and explicitly on every call to `chunk`. LAZ needs to seek back into the stream to store its
/// chunk table, so on an unseekable medium the compressed stream is spooled in memory and forwarded to
/// the medium on `close`. The spool holds the whole compressed file, so piping a LAZ stream needs memory
/// in the order of the output size. A warning is logged once the spool exceeds `LAZ_SPOOL_WARN_BYTES`
/// and writing to a seekable file avoids the spool altogether.
pub struct LazSink {
    state: SinkState,
    header: LasHeaderBlock,
    compression: Compression,
    /// The actual destination if the compressed stream is spooled in memory
    pipe: Option<OutputStream>,
    spool_warned: bool,
    chunk_size: u32,
    points_in_chunk: u64,
    record_buffer: Vec<u8>,
}

impl LazSink {
    /// Creates a new `LazSink` that writes to `stream` using the given `header` as prototype. A
    /// `chunk_size` of zero selects `DEFAULT_LAZ_CHUNK_SIZE`
    pub fn new(stream: OutputStream, header: &PointCloudHeader, chunk_size: u32) -> Result<Self> {
        let header_block = LasHeaderBlock::new(header, true)?;
        let record_length = header_block.format().len() as usize;
        let chunk_size = if chunk_size == 0 {
            DEFAULT_LAZ_CHUNK_SIZE
        } else {
            chunk_size
        };
        info!(
            "Opening LAZ {}.{} sink with point format {} and chunk size {} on {:?}",
            header.version.0, header.version.1, header.point_format, chunk_size, stream
        );
        let (working_stream, pipe) = if stream.is_seekable() {
            (stream, None)
        } else {
            (OutputStream::memory(), Some(stream))
        };
        Ok(Self {
            state: SinkState::new(header.quantizer, header.number_of_points),
            header: header_block,
            compression: Compression::Pending(working_stream),
            pipe,
            spool_warned: false,
            chunk_size,
            points_in_chunk: 0,
            record_buffer: Vec::with_capacity(record_length),
        })
    }

    pub fn header(&self) -> &PointCloudHeader {
        self.header.header()
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Number of compressed bytes currently held in memory for an unseekable medium. `None` if the sink
    /// writes to its medium directly
    pub fn spooled_bytes(&mut self) -> Option<u64> {
        if self.pipe.is_none() {
            return None;
        }
        self.stream_mut().and_then(|spool| spool.position().ok())
    }

    /// Consumes this sink and returns the underlying medium. Returns `None` if the medium was lost
    /// because of an earlier error, or if it is still owned by the compressor because the sink was not closed
    pub fn into_inner(self) -> Option<OutputStream> {
        if let Some(pipe) = self.pipe {
            return Some(pipe);
        }
        match self.compression {
            Compression::Pending(stream) | Compression::Finished(stream) => Some(stream),
            _ => None,
        }
    }

    /// Writes the header block and starts the compressor
    fn start_compression(&mut self) -> Result<&mut LasZipCompressor<'static, OutputStream>> {
        if let Compression::Pending(_) = self.compression {
            let block = self.header.encode()?;
            let laz_vlr = laz_vlr_for_format(self.header.format())?;
            if let Compression::Pending(mut stream) =
                std::mem::replace(&mut self.compression, Compression::Failed)
            {
                stream.write_all(&block)?;
                self.header.mark_emitted(block.len());
                self.compression = Compression::Active(
                    LasZipCompressor::new(stream, laz_vlr).laz_context("Starting the LAZ compressor")?,
                );
            }
        }
        match &mut self.compression {
            Compression::Active(compressor) => Ok(compressor),
            _ => Err(anyhow!("LAZ compressor is not available anymore")),
        }
    }

    fn stream_mut(&mut self) -> Option<&mut OutputStream> {
        match &mut self.compression {
            Compression::Pending(stream) | Compression::Finished(stream) => Some(stream),
            Compression::Active(compressor) => Some(compressor.get_mut()),
            Compression::Failed => None,
        }
    }

    fn rewrite_header(&mut self) -> Result<()> {
        let block = self.header.encode()?;
        let stream = self
            .stream_mut()
            .ok_or_else(|| anyhow!("LAZ medium is not available anymore"))?;
        stream.overwrite_at(0, &block)?;
        debug!("Rewrote LAZ header block ({} bytes)", block.len());
        Ok(())
    }

    fn finish_chunk(&mut self) -> Result<()> {
        let points_in_chunk = self.points_in_chunk;
        self.start_compression()?.finish_current_chunk()?;
        debug!("Closed LAZ chunk with {} points", points_in_chunk);
        self.points_in_chunk = 0;
        self.check_spool_size();
        Ok(())
    }

    fn check_spool_size(&mut self) {
        if self.spool_warned {
            return;
        }
        if let Some(spooled) = self.spooled_bytes() {
            if spooled > LAZ_SPOOL_WARN_BYTES {
                warn!(
                    "Piped LAZ output already holds {} bytes in memory, write to a file to avoid the spool",
                    spooled
                );
                self.spool_warned = true;
            }
        }
    }

    /// Finishes compression, writing the chunk table
    fn finish_compression(&mut self) -> Result<()> {
        self.start_compression()?;
        if let Compression::Active(mut compressor) =
            std::mem::replace(&mut self.compression, Compression::Failed)
        {
            compressor.done()?;
            self.compression = Compression::Finished(compressor.into_inner());
        }
        Ok(())
    }

    /// Forwards the spooled stream to the actual medium, if there is one
    fn forward_spool(&mut self) -> Result<()> {
        let pipe = match self.pipe.as_mut() {
            Some(pipe) => pipe,
            None => return Ok(()),
        };
        let spool = match std::mem::replace(&mut self.compression, Compression::Failed) {
            Compression::Finished(spool) => spool,
            _ => bail!("LAZ stream was not finished, nothing is forwarded"),
        };
        let bytes = spool
            .into_memory()
            .ok_or_else(|| anyhow!("LAZ spool is not an in-memory stream"))?;
        pipe.write_all(&bytes)?;
        pipe.flush()?;
        debug!("Forwarded {} spooled LAZ bytes", bytes.len());
        Ok(())
    }
}

impl PointSink for LazSink {
    fn state(&self) -> &SinkState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SinkState {
        &mut self.state
    }

    fn write_record(&mut self, point: &Point) -> Result<()> {
        if self.header.header().version.1 < 4 && self.state.written_point_count() >= u32::MAX as u64 {
            bail!("LAS versions before 1.4 cannot hold more than {} points", u32::MAX);
        }
        encode_las_point(
            point,
            self.header.format(),
            self.state.quantizer(),
            &mut self.record_buffer,
        )?;
        if self.points_in_chunk >= self.chunk_size as u64 {
            self.finish_chunk()?;
        }
        // The compressor takes the record buffer, so it cannot be borrowed alongside
        let record = std::mem::take(&mut self.record_buffer);
        let compressed = self
            .start_compression()
            .and_then(|compressor| compressor.compress_one(&record).map_err(Into::into));
        self.record_buffer = record;
        compressed?;
        self.points_in_chunk += 1;
        Ok(())
    }

    fn chunk(&mut self) -> Result<()> {
        self.state.ensure_open("chunk")?;
        if self.points_in_chunk == 0 {
            self.start_compression()?;
            return Ok(());
        }
        self.finish_chunk()
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
        if needs_rewrite {
            self.rewrite_header()?;
        }
        Ok(())
    }

    fn close(&mut self, patch_point_count: bool) -> Result<u64> {
        self.state.mark_closed()?;
        let mut errors = CloseErrors::default();
        errors.attempt(self.finish_compression());
        if patch_point_count {
            if self.pipe.is_none() {
                let patched = apply_final_counts(&mut self.header, &mut self.state)
                    .and_then(|_| self.rewrite_header());
                errors.attempt(patched);
            } else {
                warn!(
                    "Not patching the point count of a LAZ stream on an unseekable medium ({} points written)",
                    self.state.written_point_count()
                );
            }
        }
        if self.pipe.is_some() {
            errors.attempt(self.forward_spool());
        } else if let Some(stream) = self.stream_mut() {
            errors.attempt(stream.flush().map_err(Into::into));
        }
        info!(
            "Closed LAZ sink after {} points",
            self.state.written_point_count()
        );
        errors.finish(self.state.written_point_count())
    }
}
