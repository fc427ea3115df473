mod ascii_format_util;
pub use self::ascii_format_util::separator_from_name;
pub(crate) use self::ascii_format_util::*;

mod ascii_sink;
pub use self::ascii_sink::*;
