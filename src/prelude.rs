//! A combined set of traits and types most consumers want in scope.
//!
//! ```
//! use mzread::prelude::*;
//! ```

pub use crate::io::xml::SpectrumSaxHandler;
pub use crate::io::{ReaderError, ReaderEvent, SpectrumReaderOps};
pub use crate::spectrum::{Polarity, RecordStatus, SpectrumRecord};
