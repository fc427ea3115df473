use std::{convert::TryFrom, io::Write};

use anyhow::{anyhow, bail, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use lasflow_core::point::Point;
use log::{info, warn};

use crate::{
    base::{CloseErrors, OutputStream},
    las::fixed_size_field,
};

/// Size of the extended VLR header that precedes the waveform data packets
pub const WAVEFORM_RECORD_HEADER_SIZE: u64 = 60;
const WAVEFORM_USER_ID: &str = "LASF_Spec";
const WAVEFORM_RECORD_ID: u16 = 65535;
/// Byte offset of the record length inside the record header
const RECORD_LENGTH_OFFSET: u64 = 20;

/// Writes the waveform data packets of LAS 1.3 style waveform point formats into a companion file. The
/// file starts with the header of the waveform data packet record, followed by the raw packets.
pub struct Waveform13Writer {
    stream: OutputStream,
    number_of_packets: u64,
    payload_len: u64,
    closed: bool,
}

impl Waveform13Writer {
    /// Creates a new writer and writes the record header with a record length of zero to `stream`
    pub fn new(mut stream: OutputStream) -> Result<Self> {
        stream.write_u16::<LittleEndian>(0)?;
        stream.write_all(&fixed_size_field::<16>(WAVEFORM_USER_ID))?;
        stream.write_u16::<LittleEndian>(WAVEFORM_RECORD_ID)?;
        stream.write_u64::<LittleEndian>(0)?;
        stream.write_all(&fixed_size_field::<32>("Waveform data packets"))?;
        info!("Opening waveform writer on {:?}", stream);
        Ok(Self {
            stream,
            number_of_packets: 0,
            payload_len: 0,
            closed: false,
        })
    }

    /// Appends the packet `samples` and stores its location in the wave packet of `point`, with the byte
    /// offset relative to the start of the record header
    pub fn write_waveform(&mut self, point: &mut Point, samples: &[u8]) -> Result<()> {
        if self.closed {
            bail!("write_waveform called on a waveform writer that was already closed");
        }
        let packet_size = u32::try_from(samples.len()).map_err(|_| {
            anyhow!(
                "Waveform packet with {} bytes exceeds the 32-bit packet size",
                samples.len()
            )
        })?;
        self.stream.write_all(samples)?;
        point.wave_packet.byte_offset = WAVEFORM_RECORD_HEADER_SIZE + self.payload_len;
        point.wave_packet.packet_size = packet_size;
        self.payload_len += samples.len() as u64;
        self.number_of_packets += 1;
        Ok(())
    }

    pub fn number_of_packets(&self) -> u64 {
        self.number_of_packets
    }

    /// Patches the record length (if the medium is seekable), flushes and returns the number of packets.
    /// The flush is attempted even if the patch fails, the first error is returned
    pub fn close(&mut self) -> Result<u64> {
        if self.closed {
            bail!("close called on a waveform writer that was already closed");
        }
        self.closed = true;
        let mut errors = CloseErrors::default();
        if self.stream.is_seekable() {
            errors.attempt(
                self.stream
                    .overwrite_at(RECORD_LENGTH_OFFSET, &self.payload_len.to_le_bytes()),
            );
        } else {
            warn!("Not patching the waveform record length on an unseekable medium");
        }
        errors.attempt(self.stream.flush().map_err(Into::into));
        info!(
            "Closed waveform writer after {} packets ({} bytes)",
            self.number_of_packets, self.payload_len
        );
        errors.finish(self.number_of_packets)
    }

    pub fn into_inner(self) -> OutputStream {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use std::{
        convert::TryInto,
        io::{BufWriter, Cursor},
    };

    use byteorder::ReadBytesExt;

    use crate::base::test_pipe::SharedPipe;

    use super::*;

    #[test]
    fn test_waveform_offsets_and_record_length() -> Result<()> {
        let mut writer = Waveform13Writer::new(OutputStream::memory())?;
        let mut first = Point::default();
        let mut second = Point::default();
        writer.write_waveform(&mut first, &[1; 24])?;
        writer.write_waveform(&mut second, &[2; 8])?;
        assert_eq!(60, first.wave_packet.byte_offset);
        assert_eq!(24, first.wave_packet.packet_size);
        assert_eq!(84, second.wave_packet.byte_offset);
        assert_eq!(8, second.wave_packet.packet_size);
        assert_eq!(2, writer.close()?);
        assert!(writer.write_waveform(&mut first, &[0]).is_err());

        let bytes = writer.into_inner().into_memory().expect("memory stream");
        assert_eq!(92, bytes.len());
        assert_eq!(b"LASF_Spec", &bytes[2..11]);
        assert_eq!(65535, u16::from_le_bytes(bytes[18..20].try_into()?));
        let mut record_length = Cursor::new(&bytes[20..28]);
        assert_eq!(32, record_length.read_u64::<LittleEndian>()?);
        assert_eq!(&[2; 8], &bytes[84..]);
        Ok(())
    }

    #[test]
    fn test_close_flushes_buffered_pipe() -> Result<()> {
        let pipe = SharedPipe::default();
        let buffered = BufWriter::with_capacity(1024, pipe.clone());
        let mut writer = Waveform13Writer::new(OutputStream::pipe(Box::new(buffered)))?;
        let mut point = Point::default();
        writer.write_waveform(&mut point, &[7; 16])?;
        assert!(pipe.bytes().is_empty());

        assert_eq!(1, writer.close()?);
        let bytes = pipe.bytes();
        assert_eq!(76, bytes.len());
        // Unpatched record length on an append-only medium
        assert_eq!(0, u64::from_le_bytes(bytes[20..28].try_into()?));
        assert_eq!(&[7; 16], &bytes[60..]);
        Ok(())
    }
}
