pub(crate) mod error;
pub(crate) mod format;
#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{BindError, Error, Result};
pub use format::{ColorSpace, FormatDescriptor, PixelLayout};
