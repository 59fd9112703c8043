//! Readers for the supported file formats and the random access layer
//! over the XML dialects.

pub mod binary_text;
pub mod dispatch;
pub mod dta;
pub mod index;
pub mod mgf;
pub mod random_access;
pub mod xml;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::io::xml::XmlReaderError;
use crate::spectrum::{CodecError, SpectrumRecord};

pub use crate::io::binary_text::{
    BinaryTextReader, LineTerminator, ReadDirection, TextEncoding,
};
pub use crate::io::dispatch::{infer_from_name, open_reader, MsFileFormat};
pub use crate::io::dta::DtaTextReader;
pub use crate::io::index::{IndexedSpectrumEntry, SpectrumIndex};
pub use crate::io::mgf::MgfReader;
pub use crate::io::random_access::{
    AccessorOptions, AccessorState, RandomAccessAccessor, XmlDialect,
};
pub use crate::io::xml::mzdata::{MzDataReaderOptions, MzDataSaxReader, MzDataStreamReader};
pub use crate::io::xml::mzxml::{MzXmlReaderOptions, MzXmlSaxReader, MzXmlStreamReader};
pub use crate::io::xml::XmlSpectrumStream;

/// Everything that can go wrong while reading a mass spectrometry data
/// file
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
    #[error("Scan number {0} not found")]
    ScanNotFound(i32),
    #[error("Spectrum id {0} not found")]
    SpectrumIdNotFound(i32),
    #[error("Spectrum index {0} out of range")]
    IndexNotFound(usize),
    #[error("No spectrum index or cache is available yet")]
    NotReady,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Text encoding error: {0}")]
    Encoding(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Peak data error: {0}")]
    Codec(#[from] CodecError),
    #[error("Aborted processing")]
    Aborted,
}

impl From<XmlReaderError> for ReaderError {
    fn from(value: XmlReaderError) -> ReaderError {
        match value {
            XmlReaderError::Io(err) => ReaderError::Io(err),
            XmlReaderError::Codec(err) => ReaderError::Codec(err),
            other => ReaderError::Parse(other.to_string()),
        }
    }
}

/// Advisory progress and error notifications a reader emits while it
/// works. Handlers must not call back into the reader that fired them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReaderEvent<'a> {
    ProgressReset,
    Progress { task: &'a str, percent: f32 },
    ProgressComplete,
    Error { message: &'a str },
}

/// The operations every spectrum file reader offers, whatever the
/// format: forward iteration plus basic bookkeeping. This is the surface
/// [`open_reader`](crate::io::dispatch::open_reader) dispatches to.
pub trait SpectrumReaderOps {
    /// Advance to the next spectrum in file order, `Ok(None)` at the end
    fn read_next_spectrum(&mut self) -> Result<Option<SpectrumRecord>, ReaderError>;

    /// The spectrum count the file declares up front, when the format
    /// carries one
    fn declared_scan_count(&self) -> Option<u64>;

    /// The most recent failure as human-readable text
    fn error_message(&self) -> Option<&str>;

    /// Stop reading and release the underlying input. Subsequent calls
    /// to [`SpectrumReaderOps::read_next_spectrum`] return `Ok(None)`.
    fn close(&mut self);
}

impl<H: xml::SpectrumSaxHandler> SpectrumReaderOps for XmlSpectrumStream<H> {
    fn read_next_spectrum(&mut self) -> Result<Option<SpectrumRecord>, ReaderError> {
        XmlSpectrumStream::read_next_spectrum(self).map_err(ReaderError::from)
    }

    fn declared_scan_count(&self) -> Option<u64> {
        XmlSpectrumStream::declared_scan_count(self)
    }

    fn error_message(&self) -> Option<&str> {
        None
    }

    fn close(&mut self) {
        XmlSpectrumStream::close(self)
    }
}
