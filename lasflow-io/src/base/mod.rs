mod medium;
pub use self::medium::*;

mod sink;
pub use self::sink::*;

mod null_sink;
pub use self::null_sink::*;
