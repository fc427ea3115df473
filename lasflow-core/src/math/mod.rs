mod bounds;
pub use self::bounds::*;

mod quantizer;
pub use self::quantizer::*;
