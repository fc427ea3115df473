mod las_err;
pub(crate) use self::las_err::*;

mod las_header;
pub use self::las_header::check_version_and_format;
pub(crate) use self::las_header::*;

mod write_helpers;
pub(crate) use self::write_helpers::*;

mod las_sink;
pub use self::las_sink::*;

mod laz_sink;
pub use self::laz_sink::*;

#[cfg(test)]
pub(crate) mod test_util;
