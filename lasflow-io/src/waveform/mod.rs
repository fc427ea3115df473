mod waveform_writer;
pub use self::waveform_writer::*;
