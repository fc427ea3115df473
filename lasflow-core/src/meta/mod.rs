mod header;
pub use self::header::*;

mod inventory;
pub use self::inventory::*;
