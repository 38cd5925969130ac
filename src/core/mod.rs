pub mod color;
pub mod error;

pub use color::{Color, ColorTransition, validate_identifier};
pub use error::{Result, SkewError};
