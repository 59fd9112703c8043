//! `mzread` provides read access to several mass spectrometry data
//! formats in Rust.
//!
//! The library currently supports reading:
//!   1. mzXML 2.x/3.x files using [`MzXmlStreamReader`] or, with random
//!      access by byte offset, [`RandomAccessAccessor`]
//!   2. mzData 1.x files using [`MzDataStreamReader`] or [`RandomAccessAccessor`]
//!   3. MGF files using [`MgfReader`] in [`mzread::io::mgf`](crate::io::mgf)
//!   4. Concatenated DTA (`_dta.txt`) files using [`DtaTextReader`] in
//!      [`mzread::io::dta`](crate::io::dta)
//!
//! The format can be inferred from a file name with
//! [`io::infer_from_name`], and [`io::open_reader`] dispatches to the
//! right forward-only reader behind the [`SpectrumReaderOps`] trait.
//!
//! The random access layer is built for files too large to hold in
//! memory: it locates every spectrum's byte range up front, either from
//! the offset table an indexed mzXML file embeds in its trailer or by a
//! fast forward scan that never parses the whole document as XML, and
//! later materializes any spectrum by parsing just its subtree.
//!
//! # Example
//! ```no_run
//! use mzread::RandomAccessAccessor;
//!
//! let mut accessor = RandomAccessAccessor::open_mzxml("./run01.mzXML").unwrap();
//! accessor.read_and_cache_entire_file().unwrap();
//! for scan_number in accessor.get_scan_number_list().unwrap() {
//!     let spectrum = accessor.get_spectrum_by_scan_number(scan_number).unwrap();
//!     println!(
//!         "Scan {} => {} peaks, BP {:.4}",
//!         spectrum.scan_number,
//!         spectrum.peak_count(),
//!         spectrum.base_peak_mz
//!     );
//! }
//! ```

pub mod io;
pub mod prelude;
pub mod spectrum;

pub use crate::io::{
    DtaTextReader, MgfReader, MzDataStreamReader, MzXmlStreamReader, RandomAccessAccessor,
    ReaderError, ReaderEvent, SpectrumReaderOps,
};

pub use crate::spectrum::{Polarity, RecordStatus, SpectrumRecord};
