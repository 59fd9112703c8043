//! The in-memory representation of a mass spectrum and the codec for its
//! binary-packed peak data.

pub mod bindata;
pub mod record;

pub use crate::spectrum::bindata::{CodecError, Endian, PeakPrecision, PeakValues};
pub use crate::spectrum::record::{Polarity, RecordStatus, SpectrumRecord};
