use std::path::PathBuf;

/// Reasons why a `WriteOpener` refuses a configuration or cannot open a sink. Retrieve it from the
/// `anyhow::Error` returned by the opener with `downcast_ref::<OpenError>()`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OpenError {
    /// Neither a file name nor a piped or null target is configured
    #[error("No output target is configured")]
    NotActive,

    /// Format code, format name or file extension that no sink exists for
    #[error("Unknown output format '{0}'")]
    UnknownFormat(String),

    /// The file name is missing or composes to an empty name
    #[error("No usable file name is configured for the output")]
    MissingFileName,

    /// The output is numbered, so it can only be opened with a sequence number
    #[error("Output is numbered with {digits} digits, open it with a sequence number")]
    MissingSequenceNumber { digits: usize },

    /// The sequence number has more digits than configured, so names could collide
    #[error("Sequence number {number} does not fit into {digits} digits")]
    SequenceNumberOutOfRange { number: u64, digits: usize },

    /// The target exists and overwriting was not forced
    #[error("File '{}' already exists, force overwriting to replace it", .0.display())]
    Unauthorized(PathBuf),

    /// The configuration is valid on its own but cannot be used for the requested operation
    #[error("Unsupported combination: {0}")]
    UnsupportedCombination(String),
}
