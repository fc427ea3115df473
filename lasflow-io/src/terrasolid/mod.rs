mod bin_sink;
pub use self::bin_sink::*;
