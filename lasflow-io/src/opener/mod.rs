mod error;
pub use self::error::*;

mod format;
pub use self::format::*;

mod file_name;
pub use self::file_name::*;

mod config;
pub use self::config::*;

mod write_opener;
pub use self::write_opener::*;
