use std::fs;
use std::io::{self, prelude::*, BufReader, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;

use crate::io::binary_text::{byte_length_of, BinaryTextReader, ReadDirection, TextEncoding};
use crate::io::index::{IndexedSpectrumEntry, SpectrumIndex};
use crate::io::xml::mzdata::MzDataSaxReader;
use crate::io::xml::mzxml::{MzXmlReaderOptions, MzXmlSaxReader};
use crate::io::xml::{
    attr_opt, attr_string, parse_spectrum_fragment, SpectrumSaxHandler, XmlSpectrumStream,
};
use crate::io::{ReaderError, ReaderEvent};
use crate::spectrum::SpectrumRecord;

/// The two XML dialects the accessor can index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlDialect {
    MzXml,
    MzData,
}

/// The boundary patterns a forward scan recognizes for one dialect.
///
/// mzXML spectra are bounded by `<scan ...>` and the closing `</peaks>`
/// rather than `</scan>`, because scan elements may nest. mzData spectra
/// are bounded by `<spectrum ...>` and `</spectrum>`.
struct DialectPatterns {
    spectrum_start: Regex,
    spectrum_end: Regex,
    id_attribute: Regex,
    scan_count: Regex,
}

impl XmlDialect {
    fn patterns(&self) -> DialectPatterns {
        match self {
            XmlDialect::MzXml => DialectPatterns {
                spectrum_start: Regex::new(r"<scan\s|<scan$").unwrap(),
                spectrum_end: Regex::new(r"</peaks>").unwrap(),
                id_attribute: Regex::new(r#"\bnum\s*=\s*"([^"]+)""#).unwrap(),
                scan_count: Regex::new(r#"\bscanCount\s*=\s*"(\d+)""#).unwrap(),
            },
            XmlDialect::MzData => DialectPatterns {
                spectrum_start: Regex::new(r"<spectrum\s|<spectrum$").unwrap(),
                spectrum_end: Regex::new(r"</spectrum>").unwrap(),
                id_attribute: Regex::new(r#"\bid\s*=\s*"([^"]+)""#).unwrap(),
                scan_count: Regex::new(r#"<spectrumList[^>]*?\bcount\s*=\s*"(\d+)""#).unwrap(),
            },
        }
    }
}

/// Options controlling accessor behavior
#[derive(Debug, Clone)]
pub struct AccessorOptions {
    /// Skip the embedded index an mzXML trailer may carry and always
    /// index by forward scan
    pub ignore_embedded_index: bool,
    /// Instead of indexing, read the whole file through the streaming
    /// reader and serve random access from memory
    pub cache_spectra_in_memory: bool,
    /// Lines between progress events during a forward scan
    pub progress_line_interval: u64,
    pub mzxml: MzXmlReaderOptions,
}

impl Default for AccessorOptions {
    fn default() -> AccessorOptions {
        AccessorOptions {
            ignore_embedded_index: false,
            cache_spectra_in_memory: false,
            progress_line_interval: 500,
            mzxml: MzXmlReaderOptions::default(),
        }
    }
}

/// Lifecycle of an accessor: `get_*` calls require an index or cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessorState {
    #[default]
    Closed,
    Opened,
    Indexed,
    Cached,
}

enum DialectHandler {
    MzXml(MzXmlSaxReader),
    MzData(MzDataSaxReader),
}

impl DialectHandler {
    fn parse_fragment(
        &mut self,
        xml: &str,
        skip_binary: bool,
    ) -> Result<Option<SpectrumRecord>, ReaderError> {
        let result = match self {
            DialectHandler::MzXml(handler) => {
                handler.set_skip_binary_data(skip_binary);
                let parsed = parse_spectrum_fragment(handler, xml);
                handler.set_skip_binary_data(false);
                parsed
            }
            DialectHandler::MzData(handler) => {
                handler.set_skip_binary_data(skip_binary);
                let parsed = parse_spectrum_fragment(handler, xml);
                handler.set_skip_binary_data(false);
                parsed
            }
        };
        result.map_err(ReaderError::from)
    }

    fn file_version(&self) -> &str {
        match self {
            DialectHandler::MzXml(handler) => handler.file_version(),
            DialectHandler::MzData(handler) => handler.file_version(),
        }
    }
}

/// What the embedded-index loader found in the file trailer
enum EmbeddedIndexOutcome {
    Loaded,
    Absent,
    Invalid,
}

pub type EventCallback = Box<dyn FnMut(ReaderEvent<'_>) + Send>;

/**
Random access to the spectra of an mzXML or mzData file by byte offset.

The accessor builds an index of the byte range every spectrum subtree
occupies, either by loading the offset table an mzXML trailer embeds or
by a forward scan that finds spectrum boundaries with regular
expressions, without parsing the whole document as XML. A spectrum is
then materialized on demand by seeking to its range and running the
dialect's SAX reader over that one subtree.

```text
Closed --open--> Opened --read_and_cache_entire_file--> Indexed | Cached
                  |  (mzXML trailer index found)
                  +--------------------------------->   Indexed
```
*/
pub struct RandomAccessAccessor {
    dialect: XmlDialect,
    options: AccessorOptions,
    patterns: DialectPatterns,
    path: PathBuf,
    text_reader: Option<BinaryTextReader<fs::File>>,
    raw_handle: Option<fs::File>,
    index: SpectrumIndex,
    state: AccessorState,
    header: String,
    declared_scan_count: Option<u64>,
    scan_number_range: Option<(i32, i32)>,
    cursor: usize,
    cached: Vec<SpectrumRecord>,
    handler: DialectHandler,
    abort_flag: Arc<AtomicBool>,
    on_event: Option<EventCallback>,
    last_error: Option<String>,
}

impl RandomAccessAccessor {
    pub fn new(dialect: XmlDialect, options: AccessorOptions) -> RandomAccessAccessor {
        let handler = match dialect {
            XmlDialect::MzXml => DialectHandler::MzXml(MzXmlSaxReader::new(options.mzxml.clone())),
            XmlDialect::MzData => DialectHandler::MzData(MzDataSaxReader::default()),
        };
        RandomAccessAccessor {
            dialect,
            patterns: dialect.patterns(),
            options,
            path: PathBuf::new(),
            text_reader: None,
            raw_handle: None,
            index: SpectrumIndex::new(),
            state: AccessorState::Closed,
            header: String::new(),
            declared_scan_count: None,
            scan_number_range: None,
            cursor: 0,
            cached: Vec::new(),
            handler,
            abort_flag: Arc::new(AtomicBool::new(false)),
            on_event: None,
            last_error: None,
        }
    }

    /// Open an mzXML accessor with default options
    pub fn open_mzxml<P: AsRef<Path>>(path: P) -> Result<RandomAccessAccessor, ReaderError> {
        let mut accessor =
            RandomAccessAccessor::new(XmlDialect::MzXml, AccessorOptions::default());
        accessor.open(path)?;
        Ok(accessor)
    }

    /// Open an mzData accessor with default options
    pub fn open_mzdata<P: AsRef<Path>>(path: P) -> Result<RandomAccessAccessor, ReaderError> {
        let mut accessor =
            RandomAccessAccessor::new(XmlDialect::MzData, AccessorOptions::default());
        accessor.open(path)?;
        Ok(accessor)
    }

    /// Establish readers over `path` and, for mzXML, try the embedded
    /// index in the file trailer. Only an I/O failure here is fatal; the
    /// caller may retry with another `open` call.
    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ReaderError> {
        self.close();
        let path = path.as_ref();
        if !path.exists() {
            let error = ReaderError::PathNotFound(path.to_path_buf());
            self.record_error(&error);
            return Err(error);
        }
        let text_reader = match BinaryTextReader::open_path(path) {
            Ok(reader) => reader,
            Err(err) => {
                let error = ReaderError::Io(err);
                self.record_error(&error);
                return Err(error);
            }
        };
        self.raw_handle = Some(fs::File::open(path)?);
        self.text_reader = Some(text_reader);
        self.path = path.to_path_buf();
        self.state = AccessorState::Opened;
        self.abort_flag.store(false, Ordering::Relaxed);

        if self.dialect == XmlDialect::MzXml && !self.options.ignore_embedded_index {
            match self.load_existing_index() {
                Ok(EmbeddedIndexOutcome::Loaded) => {
                    self.index.init = true;
                    self.state = AccessorState::Indexed;
                }
                Ok(EmbeddedIndexOutcome::Absent) => {}
                Ok(EmbeddedIndexOutcome::Invalid) => {
                    warn!("embedded index in {} failed validation, rebuilding by forward scan", path.display());
                    self.emit_error("embedded index failed validation, falling back to a forward scan");
                    self.index.clear();
                    self.build_index_by_forward_scan()?;
                    self.state = AccessorState::Indexed;
                }
                Err(err) => {
                    // A broken trailer only costs us the shortcut
                    debug!("failed reading the embedded index: {err}");
                }
            }
        }
        Ok(())
    }

    /// Build the spectrum index if `open` has not already loaded one. In
    /// caching mode the whole file is read through the streaming reader
    /// instead and spectra are served from memory.
    pub fn read_and_cache_entire_file(&mut self) -> Result<(), ReaderError> {
        match self.state {
            AccessorState::Closed => Err(ReaderError::NotReady),
            AccessorState::Indexed | AccessorState::Cached => Ok(()),
            AccessorState::Opened => {
                if self.options.cache_spectra_in_memory {
                    // Even a partial cache stays usable after an error
                    let result = self.cache_all_spectra();
                    self.state = AccessorState::Cached;
                    result
                } else {
                    let result = self.build_index_by_forward_scan();
                    self.state = AccessorState::Indexed;
                    result
                }
            }
        }
    }

    /// Release the underlying file handles. Spectrum records already
    /// handed out remain valid.
    pub fn close(&mut self) {
        self.text_reader = None;
        self.raw_handle = None;
        self.index.clear();
        self.cached.clear();
        self.header.clear();
        self.declared_scan_count = None;
        self.scan_number_range = None;
        self.cursor = 0;
        self.last_error = None;
        self.state = AccessorState::Closed;
    }

    pub fn state(&self) -> AccessorState {
        self.state
    }

    pub fn dialect(&self) -> XmlDialect {
        self.dialect
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The most recent failure, as human-readable text
    pub fn error_message(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Number of indexed (or cached) spectra
    pub fn spectrum_count(&self) -> usize {
        match self.state {
            AccessorState::Cached => self.cached.len(),
            _ => self.index.len(),
        }
    }

    /// The scan count the file header declares, when one was seen
    pub fn declared_scan_count(&self) -> Option<u64> {
        self.declared_scan_count
    }

    /// The lowest and highest scan numbers seen while indexing
    pub fn scan_number_range(&self) -> Option<(i32, i32)> {
        self.scan_number_range
    }

    fn note_scan_number(&mut self, scan_number: i32) {
        self.scan_number_range = Some(match self.scan_number_range {
            Some((low, high)) => (low.min(scan_number), high.max(scan_number)),
            None => (scan_number, scan_number),
        });
    }

    /// The format version the last parsed spectrum's document declared
    pub fn file_version(&self) -> &str {
        self.handler.file_version()
    }

    /// The accumulated XML header: everything before the first spectrum
    pub fn xml_file_header(&self) -> &str {
        &self.header
    }

    /// A handle that cooperatively interrupts indexing and caching
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort_flag)
    }

    pub fn request_abort(&self) {
        self.abort_flag.store(true, Ordering::Relaxed);
    }

    /// Install the progress/error event callback
    pub fn set_event_callback(&mut self, callback: EventCallback) {
        self.on_event = Some(callback);
    }

    /// Distinct scan numbers in file order
    pub fn get_scan_number_list(&self) -> Result<Vec<i32>, ReaderError> {
        match self.state {
            AccessorState::Cached => {
                let mut seen = indexmap::IndexMap::new();
                for record in &self.cached {
                    seen.entry(record.scan_number).or_insert(());
                }
                Ok(seen.keys().copied().collect())
            }
            AccessorState::Indexed => Ok(self.index.scan_numbers()),
            _ => Err(ReaderError::NotReady),
        }
    }

    /// Distinct spectrum ids in file order (mzData)
    pub fn get_spectrum_id_list(&self) -> Result<Vec<i32>, ReaderError> {
        match self.state {
            AccessorState::Cached => {
                let mut seen = indexmap::IndexMap::new();
                for record in &self.cached {
                    seen.entry(record.spectrum_id).or_insert(());
                }
                Ok(seen.keys().copied().collect())
            }
            AccessorState::Indexed => Ok(self.index.spectrum_ids()),
            _ => Err(ReaderError::NotReady),
        }
    }

    /// The raw XML of one indexed spectrum, decoded from the file's
    /// detected encoding
    pub fn get_source_xml_by_index(&mut self, index: usize) -> Result<String, ReaderError> {
        self.ensure_indexed()?;
        self.fetch_source_xml(index)
    }

    pub fn get_source_xml_by_scan_number(
        &mut self,
        scan_number: i32,
    ) -> Result<String, ReaderError> {
        self.ensure_indexed()?;
        let index = self
            .index
            .index_of_scan_number(scan_number)
            .ok_or(ReaderError::ScanNotFound(scan_number))?;
        self.fetch_source_xml(index)
    }

    pub fn get_spectrum_by_index(&mut self, index: usize) -> Result<SpectrumRecord, ReaderError> {
        self.fetch_spectrum(index, false)
    }

    pub fn get_spectrum_by_scan_number(
        &mut self,
        scan_number: i32,
    ) -> Result<SpectrumRecord, ReaderError> {
        let index = self.position_of_scan_number(scan_number)?;
        self.fetch_spectrum(index, false)
    }

    pub fn get_spectrum_by_spectrum_id(
        &mut self,
        spectrum_id: i32,
    ) -> Result<SpectrumRecord, ReaderError> {
        let index = self.position_of_spectrum_id(spectrum_id)?;
        self.fetch_spectrum(index, false)
    }

    /// Like [`RandomAccessAccessor::get_spectrum_by_index`] but without
    /// decoding the binary peak payload
    pub fn get_spectrum_header_info_by_index(
        &mut self,
        index: usize,
    ) -> Result<SpectrumRecord, ReaderError> {
        self.fetch_spectrum(index, true)
    }

    pub fn get_spectrum_header_info_by_scan_number(
        &mut self,
        scan_number: i32,
    ) -> Result<SpectrumRecord, ReaderError> {
        let index = self.position_of_scan_number(scan_number)?;
        self.fetch_spectrum(index, true)
    }

    pub fn get_spectrum_header_info_by_spectrum_id(
        &mut self,
        spectrum_id: i32,
    ) -> Result<SpectrumRecord, ReaderError> {
        let index = self.position_of_spectrum_id(spectrum_id)?;
        self.fetch_spectrum(index, true)
    }

    /// Advance a cursor through the index, yielding spectra in file order
    pub fn read_next_spectrum(&mut self) -> Result<Option<SpectrumRecord>, ReaderError> {
        self.ensure_ready()?;
        if self.cursor >= self.spectrum_count() {
            return Ok(None);
        }
        let record = self.fetch_spectrum(self.cursor, false)?;
        self.cursor += 1;
        Ok(Some(record))
    }

    fn ensure_ready(&self) -> Result<(), ReaderError> {
        match self.state {
            AccessorState::Indexed | AccessorState::Cached => Ok(()),
            _ => Err(ReaderError::NotReady),
        }
    }

    fn ensure_indexed(&self) -> Result<(), ReaderError> {
        match self.state {
            AccessorState::Indexed => Ok(()),
            AccessorState::Cached => Err(ReaderError::NotReady),
            _ => Err(ReaderError::NotReady),
        }
    }

    fn position_of_scan_number(&self, scan_number: i32) -> Result<usize, ReaderError> {
        self.ensure_ready()?;
        match self.state {
            AccessorState::Cached => self
                .cached
                .iter()
                .position(|r| r.scan_number == scan_number)
                .ok_or(ReaderError::ScanNotFound(scan_number)),
            _ => self
                .index
                .index_of_scan_number(scan_number)
                .ok_or(ReaderError::ScanNotFound(scan_number)),
        }
    }

    fn position_of_spectrum_id(&self, spectrum_id: i32) -> Result<usize, ReaderError> {
        self.ensure_ready()?;
        match self.state {
            AccessorState::Cached => self
                .cached
                .iter()
                .position(|r| r.spectrum_id == spectrum_id)
                .ok_or(ReaderError::SpectrumIdNotFound(spectrum_id)),
            _ => self
                .index
                .index_of_spectrum_id(spectrum_id)
                .ok_or(ReaderError::SpectrumIdNotFound(spectrum_id)),
        }
    }

    fn fetch_spectrum(
        &mut self,
        index: usize,
        skip_binary: bool,
    ) -> Result<SpectrumRecord, ReaderError> {
        self.ensure_ready()?;
        if self.state == AccessorState::Cached {
            return self
                .cached
                .get(index)
                .cloned()
                .ok_or(ReaderError::IndexNotFound(index));
        }
        let xml = self.fetch_source_xml(index)?;
        let xml = self.complete_fragment(xml);
        match self.handler.parse_fragment(&xml, skip_binary) {
            Ok(Some(record)) => Ok(record),
            Ok(None) => {
                let error =
                    ReaderError::Parse(format!("no spectrum found in the subtree at index {index}"));
                self.record_error(&error);
                Err(error)
            }
            Err(error) => {
                self.record_error(&error);
                Err(error)
            }
        }
    }

    fn fetch_source_xml(&mut self, index: usize) -> Result<String, ReaderError> {
        let entry = *self
            .index
            .get(index)
            .ok_or(ReaderError::IndexNotFound(index))?;
        let length = (entry.byte_offset_end + 1 - entry.byte_offset_start) as usize;
        let handle = self.raw_handle.as_mut().ok_or(ReaderError::NotReady)?;
        handle.seek(SeekFrom::Start(entry.byte_offset_start))?;
        let mut bytes = vec![0u8; length];
        handle.read_exact(&mut bytes)?;
        let encoding = self
            .text_reader
            .as_ref()
            .map(|r| r.encoding())
            .unwrap_or(TextEncoding::Ascii);
        Ok(encoding.decode(&bytes))
    }

    /// mzXML ranges stop at `</peaks>`, leaving the scan element itself
    /// open; close it so the fragment parses cleanly
    fn complete_fragment(&self, mut xml: String) -> String {
        if self.dialect == XmlDialect::MzXml && !xml.trim_end().ends_with("</scan>") {
            xml.push_str("</scan>");
        }
        xml
    }

    fn record_error(&mut self, error: &ReaderError) {
        let text = error.to_string();
        Self::emit(&mut self.on_event, ReaderEvent::Error { message: &text });
        self.last_error = Some(text);
    }

    fn emit_error(&mut self, message: &str) {
        Self::emit(&mut self.on_event, ReaderEvent::Error { message });
        self.last_error = Some(message.to_string());
    }

    fn emit(on_event: &mut Option<EventCallback>, event: ReaderEvent<'_>) {
        if let Some(callback) = on_event.as_mut() {
            callback(event);
        }
    }

    /// Index the file by scanning forward for spectrum boundaries
    fn build_index_by_forward_scan(&mut self) -> Result<(), ReaderError> {
        Self::emit(&mut self.on_event, ReaderEvent::ProgressReset);
        let mut reader = self.text_reader.take().ok_or(ReaderError::NotReady)?;
        let result = self.forward_scan(&mut reader);
        self.text_reader = Some(reader);
        self.index.init = true;
        match result {
            Ok(()) => {
                Self::emit(&mut self.on_event, ReaderEvent::ProgressComplete);
                Ok(())
            }
            Err(error) => {
                // The partial index stays usable
                self.record_error(&error);
                Err(error)
            }
        }
    }

    fn forward_scan(
        &mut self,
        reader: &mut BinaryTextReader<fs::File>,
    ) -> Result<(), ReaderError> {
        reader.move_to_beginning();
        let char_size = reader.char_size();
        let file_length = reader.file_length().max(1);
        self.header.clear();
        self.index.clear();
        self.declared_scan_count = None;
        self.scan_number_range = None;

        // `tail` always holds the exact text of the byte range starting
        // at `tail_offset`, terminators included
        let mut tail = String::new();
        let mut tail_offset: u64 = reader.position();
        let mut seen_first_spectrum = false;
        let mut lines_since_progress: u64 = 0;

        macro_rules! next_line {
            () => {{
                if self.abort_flag.load(Ordering::Relaxed) {
                    return Err(ReaderError::Aborted);
                }
                lines_since_progress += 1;
                if lines_since_progress >= self.options.progress_line_interval {
                    lines_since_progress = 0;
                    let percent =
                        (reader.line_end_offset() as f32 / file_length as f32 * 100.0).min(100.0);
                    Self::emit(
                        &mut self.on_event,
                        ReaderEvent::Progress {
                            task: "Indexing spectra",
                            percent,
                        },
                    );
                }
                reader.read_line(ReadDirection::Forward)?
            }};
        }

        'spectra: loop {
            // Locate the next spectrum start element
            let start_in_tail = loop {
                if let Some(matched) = self.patterns.spectrum_start.find(&tail) {
                    if !seen_first_spectrum {
                        self.header.push_str(&tail[..matched.start()]);
                        if let Some(captures) = self.patterns.scan_count.captures(&self.header) {
                            self.declared_scan_count = captures[1].parse().ok();
                        }
                        seen_first_spectrum = true;
                    }
                    break matched.start();
                }
                if !seen_first_spectrum && self.header.len() < 1 << 20 {
                    self.header.push_str(&tail);
                }
                if !next_line!() {
                    break 'spectra;
                }
                tail.clear();
                tail.push_str(reader.line_text());
                tail.push_str(reader.line_terminator().as_str());
                tail_offset = reader.line_start_offset();
            };
            let byte_offset_start =
                tail_offset + byte_length_of(&tail[..start_in_tail], char_size);

            // Pull the id/num attribute out of the start tag, appending
            // lines while the tag has not closed yet
            let mut key_value: i32 = 0;
            loop {
                let region = &tail[start_in_tail..];
                let close = region.find('>');
                let search_in = match close {
                    Some(at) => &region[..at + 1],
                    None => region,
                };
                if let Some(captures) = self.patterns.id_attribute.captures(search_in) {
                    key_value = captures[1].trim().parse().unwrap_or(0);
                    break;
                }
                if close.is_some() {
                    warn!(
                        "spectrum element at byte {} carries no id attribute, using 0",
                        byte_offset_start
                    );
                    break;
                }
                if !next_line!() {
                    break;
                }
                tail.push_str(reader.line_text());
                tail.push_str(reader.line_terminator().as_str());
            }

            // Scan ahead for the end pattern, bounding the tail's memory
            // once the start tag region is no longer needed
            let mut search_from = start_in_tail;
            let byte_offset_end;
            loop {
                if let Some(matched) = self.patterns.spectrum_end.find(&tail[search_from..]) {
                    let match_end = search_from + matched.start() + matched.as_str().len();
                    byte_offset_end =
                        tail_offset + byte_length_of(&tail[..match_end], char_size) - 1;
                    tail_offset += byte_length_of(&tail[..match_end], char_size);
                    tail.drain(..match_end);
                    break;
                }
                if tail.len() > 4096 {
                    let keep_from = tail.len() - 16;
                    tail_offset += byte_length_of(&tail[..keep_from], char_size);
                    tail.drain(..keep_from);
                    search_from = 0;
                } else {
                    // Overlap the boundary in case the end tag spans lines
                    search_from = search_from.max(tail.len().saturating_sub(16));
                }
                if !next_line!() {
                    warn!(
                        "spectrum starting at byte {} has no closing tag before end of file",
                        byte_offset_start
                    );
                    break 'spectra;
                }
                tail.push_str(reader.line_text());
                tail.push_str(reader.line_terminator().as_str());
            }

            let entry = IndexedSpectrumEntry {
                scan_number: key_value,
                spectrum_id: if self.dialect == XmlDialect::MzData {
                    key_value
                } else {
                    0
                },
                byte_offset_start,
                byte_offset_end,
            };
            self.note_scan_number(entry.scan_number);
            self.index.push(entry);
        }

        if !seen_first_spectrum {
            if let Some(captures) = self.patterns.scan_count.captures(&self.header) {
                self.declared_scan_count = captures[1].parse().ok();
            }
        }
        Ok(())
    }

    /// Read every spectrum through the streaming reader and keep them in
    /// memory
    fn cache_all_spectra(&mut self) -> Result<(), ReaderError> {
        Self::emit(&mut self.on_event, ReaderEvent::ProgressReset);
        let mut stream = match self.dialect {
            XmlDialect::MzXml => {
                let handler = MzXmlSaxReader::new(self.options.mzxml.clone());
                StreamingDispatch::MzXml(XmlSpectrumStream::open_path(&self.path, handler)?)
            }
            XmlDialect::MzData => {
                let handler = MzDataSaxReader::default();
                StreamingDispatch::MzData(XmlSpectrumStream::open_path(&self.path, handler)?)
            }
        };
        self.cached.clear();
        loop {
            if self.abort_flag.load(Ordering::Relaxed) {
                let error = ReaderError::Aborted;
                self.record_error(&error);
                return Err(error);
            }
            match stream.read_next_spectrum() {
                Ok(Some(record)) => {
                    self.cached.push(record);
                    let percent = stream.progress_percent();
                    Self::emit(
                        &mut self.on_event,
                        ReaderEvent::Progress {
                            task: "Caching spectra",
                            percent,
                        },
                    );
                }
                Ok(None) => break,
                Err(error) => {
                    let error = ReaderError::from(error);
                    self.record_error(&error);
                    return Err(error);
                }
            }
        }
        self.declared_scan_count = stream.declared_scan_count();
        Self::emit(&mut self.on_event, ReaderEvent::ProgressComplete);
        Ok(())
    }

    /// Try to load the offset table an indexed mzXML file appends before
    /// its closing tag
    fn load_existing_index(&mut self) -> Result<EmbeddedIndexOutcome, ReaderError> {
        let mut reader = self.text_reader.take().ok_or(ReaderError::NotReady)?;
        let result = self.load_embedded_index(&mut reader);
        self.text_reader = Some(reader);
        result
    }

    fn load_embedded_index(
        &mut self,
        reader: &mut BinaryTextReader<fs::File>,
    ) -> Result<EmbeddedIndexOutcome, ReaderError> {
        reader.move_to_end();
        let mut lines_examined = 0;
        let offset_line_start = loop {
            if !reader.read_line(ReadDirection::Reverse)? {
                return Ok(EmbeddedIndexOutcome::Absent);
            }
            if reader.line_text().contains("<indexOffset") {
                break reader.line_start_offset();
            }
            lines_examined += 1;
            if lines_examined > 50 {
                return Ok(EmbeddedIndexOutcome::Absent);
            }
        };

        // The number may be separated from its tags by whitespace or
        // carriage returns, so splice a few lines together before matching
        reader.move_to_byte_offset(offset_line_start)?;
        let mut snippet = String::new();
        for _ in 0..4 {
            if !reader.read_line(ReadDirection::Forward)? {
                break;
            }
            snippet.push_str(reader.line_text());
            snippet.push('\n');
        }
        let offset_pattern = Regex::new(r"<indexOffset>\s*(\d+)\s*</indexOffset>").unwrap();
        let index_offset: u64 = match offset_pattern
            .captures(&snippet)
            .and_then(|c| c[1].parse().ok())
        {
            Some(offset) => offset,
            None => {
                debug!("indexOffset element found but no usable number inside it");
                return Ok(EmbeddedIndexOutcome::Invalid);
            }
        };
        if index_offset == 0 || index_offset >= reader.file_length() {
            return Ok(EmbeddedIndexOutcome::Invalid);
        }

        // The offset must land on the index element itself
        reader.move_to_byte_offset(index_offset)?;
        if !reader.read_line(ReadDirection::Forward)? {
            return Ok(EmbeddedIndexOutcome::Invalid);
        }
        if !reader.line_text().trim_start().starts_with("<index") {
            return Ok(EmbeddedIndexOutcome::Invalid);
        }

        let raw_offsets = match self.parse_embedded_offsets(index_offset) {
            Ok(offsets) => offsets,
            Err(err) => {
                debug!("embedded index did not parse as XML: {err}");
                return Ok(EmbeddedIndexOutcome::Invalid);
            }
        };
        if raw_offsets.is_empty() {
            return Ok(EmbeddedIndexOutcome::Invalid);
        }
        for window in raw_offsets.windows(2) {
            if window[1].1 <= window[0].1 {
                return Ok(EmbeddedIndexOutcome::Invalid);
            }
        }
        if raw_offsets.last().unwrap().1 >= index_offset {
            return Ok(EmbeddedIndexOutcome::Invalid);
        }

        // The first entry has to point at a scan element
        reader.move_to_byte_offset(raw_offsets[0].1)?;
        if !reader.read_line(ReadDirection::Forward)? {
            return Ok(EmbeddedIndexOutcome::Invalid);
        }
        if !reader.line_text().trim_start().starts_with("<scan") {
            return Ok(EmbeddedIndexOutcome::Invalid);
        }

        self.index.clear();
        let last = raw_offsets.len() - 1;
        for (i, (scan_number, start)) in raw_offsets.iter().enumerate() {
            let byte_offset_end = if i < last {
                raw_offsets[i + 1].1 - 1
            } else {
                match self.find_spectrum_end(reader, *start)? {
                    Some(end) => end,
                    None => return Ok(EmbeddedIndexOutcome::Invalid),
                }
            };
            self.note_scan_number(*scan_number);
            self.index.push(IndexedSpectrumEntry {
                scan_number: *scan_number,
                spectrum_id: 0,
                byte_offset_start: *start,
                byte_offset_end,
            });
        }
        Ok(EmbeddedIndexOutcome::Loaded)
    }

    /// Parse `<offset id="N">BYTE</offset>` pairs from the `name="scan"`
    /// index at `index_offset`
    fn parse_embedded_offsets(&self, index_offset: u64) -> Result<Vec<(i32, u64)>, ReaderError> {
        let mut handle = fs::File::open(&self.path)?;
        handle.seek(SeekFrom::Start(index_offset))?;
        let mut xml_reader = Reader::from_reader(BufReader::new(handle));
        xml_reader.trim_text(true);
        xml_reader.check_end_names(false);
        let mut buffer = Vec::new();
        let mut in_scan_index = false;
        let mut current_id: Option<i32> = None;
        let mut offsets: Vec<(i32, u64)> = Vec::new();
        loop {
            match xml_reader.read_event_into(&mut buffer) {
                Ok(Event::Start(ref e)) => match e.name().as_ref() {
                    b"index" => {
                        in_scan_index = attr_string(e, "name")
                            .map(|name| name == "scan")
                            .unwrap_or(false);
                    }
                    b"offset" => {
                        if in_scan_index {
                            current_id = attr_opt::<i32>(e, "id");
                        }
                    }
                    _ => {}
                },
                Ok(Event::Text(ref e)) => {
                    if in_scan_index {
                        if let Some(id) = current_id.take() {
                            if let Ok(text) = e.unescape() {
                                if let Ok(offset) = text.trim().parse::<u64>() {
                                    offsets.push((id, offset));
                                }
                            }
                        }
                    }
                }
                Ok(Event::End(ref e)) => match e.name().as_ref() {
                    b"offset" => current_id = None,
                    b"index" => {
                        if in_scan_index {
                            break;
                        }
                    }
                    _ => {}
                },
                Ok(Event::Eof) => break,
                Err(err) => {
                    return Err(ReaderError::Parse(format!(
                        "malformed embedded index: {err}"
                    )))
                }
                _ => {}
            }
            buffer.clear();
        }
        Ok(offsets)
    }

    /// Forward-scan from `start` for the dialect's end pattern, returning
    /// the inclusive byte offset of its final byte
    fn find_spectrum_end(
        &self,
        reader: &mut BinaryTextReader<fs::File>,
        start: u64,
    ) -> Result<Option<u64>, ReaderError> {
        let char_size = reader.char_size();
        reader.move_to_byte_offset(start)?;
        let mut tail = String::new();
        let mut tail_offset = start;
        let mut search_from = 0usize;
        loop {
            if let Some(matched) = self.patterns.spectrum_end.find(&tail[search_from..]) {
                let match_end = search_from + matched.start() + matched.as_str().len();
                return Ok(Some(
                    tail_offset + byte_length_of(&tail[..match_end], char_size) - 1,
                ));
            }
            if tail.len() > 4096 {
                let keep_from = tail.len() - 16;
                tail_offset += byte_length_of(&tail[..keep_from], char_size);
                tail.drain(..keep_from);
                search_from = 0;
            } else {
                search_from = search_from.max(tail.len().saturating_sub(16));
            }
            if !reader.read_line(ReadDirection::Forward)? {
                return Ok(None);
            }
            tail.push_str(reader.line_text());
            tail.push_str(reader.line_terminator().as_str());
        }
    }
}

/// Streaming readers for either dialect behind one dispatch point
enum StreamingDispatch {
    MzXml(XmlSpectrumStream<MzXmlSaxReader>),
    MzData(XmlSpectrumStream<MzDataSaxReader>),
}

impl StreamingDispatch {
    fn read_next_spectrum(
        &mut self,
    ) -> Result<Option<SpectrumRecord>, crate::io::xml::XmlReaderError> {
        match self {
            StreamingDispatch::MzXml(stream) => stream.read_next_spectrum(),
            StreamingDispatch::MzData(stream) => stream.read_next_spectrum(),
        }
    }

    fn progress_percent(&self) -> f32 {
        match self {
            StreamingDispatch::MzXml(stream) => stream.progress_percent(),
            StreamingDispatch::MzData(stream) => stream.progress_percent(),
        }
    }

    fn declared_scan_count(&self) -> Option<u64> {
        match self {
            StreamingDispatch::MzXml(stream) => stream.declared_scan_count(),
            StreamingDispatch::MzData(stream) => stream.declared_scan_count(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::spectrum::bindata::{encode_bytes, f32_bytes, Endian};
    use std::fs;
    use tempfile::TempDir;

    fn mzxml_body() -> String {
        let first = encode_bytes(&f32_bytes(&[100.0, 50.0, 200.0, 75.0], Endian::Big), false);
        let second = encode_bytes(&f32_bytes(&[110.5, 12.0], Endian::Big), false);
        format!(
            r#"<?xml version="1.0" encoding="ISO-8859-1"?>
<mzXML xmlns="http://sashimi.sourceforge.net/schema_revision/mzXML_3.2">
 <msRun scanCount="2" startTime="PT60.0S" endTime="PT120.0S">
  <scan num="10" msLevel="1" peaksCount="2" polarity="+" retentionTime="PT60.6S">
   <peaks precision="32" byteOrder="network" pairOrder="m/z-int" compressionType="none">{first}</peaks>
  </scan>
  <scan num="11" msLevel="2" peaksCount="1" polarity="+" retentionTime="PT61.8S">
   <precursorMz precursorIntensity="500.5" precursorCharge="2" activationMethod="CID" precursorScanNum="10">100.0</precursorMz>
   <peaks precision="32" byteOrder="network" pairOrder="m/z-int" compressionType="none">{second}</peaks>
  </scan>
 </msRun>
"#
        )
    }

    fn plain_mzxml_document() -> String {
        format!("{}</mzXML>\n", mzxml_body())
    }

    /// Append a real offset table and trailer to the body, the way an
    /// indexed mzXML writer does
    fn indexed_mzxml_document() -> String {
        let body = mzxml_body();
        let scan10 = body.find("<scan num=\"10\"").unwrap();
        let scan11 = body.find("<scan num=\"11\"").unwrap();
        let index_position = body.len();
        format!(
            "{body}<index name=\"scan\">\n<offset id=\"10\">{scan10}</offset>\n<offset id=\"11\">{scan11}</offset>\n</index>\n<indexOffset>{index_position}</indexOffset>\n</mzXML>\n"
        )
    }

    /// A trailer whose indexOffset points at a scan element instead of
    /// the index block
    fn misindexed_mzxml_document() -> String {
        let body = mzxml_body();
        let scan10 = body.find("<scan num=\"10\"").unwrap();
        let line_start = body[..scan10].rfind('\n').unwrap() + 1;
        format!("{body}<indexOffset>{line_start}</indexOffset>\n</mzXML>\n")
    }

    fn mzdata_document() -> String {
        let mz = encode_bytes(&f32_bytes(&[1.5, 2.5], Endian::Little), false);
        let inten = encode_bytes(&f32_bytes(&[10.0, 20.0], Endian::Little), false);
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<mzData version="1.05">
 <spectrumList count="1">
  <spectrum id="7">
   <spectrumDesc>
    <spectrumSettings>
     <spectrumInstrument msLevel="1" mzRangeStart="1.0" mzRangeStop="100.0"/>
    </spectrumSettings>
   </spectrumDesc>
   <mzArrayBinary><data precision="32" endian="little" length="2">{mz}</data></mzArrayBinary>
   <intenArrayBinary><data precision="32" endian="little" length="2">{inten}</data></intenArrayBinary>
  </spectrum>
 </spectrumList>
</mzData>
"#
        )
    }

    fn write_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn no_embedded_options() -> AccessorOptions {
        AccessorOptions {
            ignore_embedded_index: true,
            ..Default::default()
        }
    }

    #[test_log::test]
    fn test_forward_scan_index() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "two_scans.mzXML", &plain_mzxml_document());
        let mut accessor = RandomAccessAccessor::new(XmlDialect::MzXml, no_embedded_options());
        accessor.open(&path).unwrap();
        assert_eq!(accessor.state(), AccessorState::Opened);
        assert!(matches!(
            accessor.get_scan_number_list(),
            Err(ReaderError::NotReady)
        ));

        accessor.read_and_cache_entire_file().unwrap();
        assert_eq!(accessor.state(), AccessorState::Indexed);
        assert_eq!(accessor.spectrum_count(), 2);
        assert_eq!(accessor.declared_scan_count(), Some(2));
        assert_eq!(accessor.get_scan_number_list().unwrap(), vec![10, 11]);

        // Byte ranges are strictly increasing and non-overlapping
        let entries: Vec<_> = accessor.index.iter().copied().collect();
        for window in entries.windows(2) {
            assert!(window[0].byte_offset_end < window[1].byte_offset_start);
        }
        for entry in &entries {
            assert!(entry.byte_offset_start < entry.byte_offset_end);
        }

        for i in 0..2 {
            let xml = accessor.get_source_xml_by_index(i).unwrap();
            assert!(xml.starts_with("<scan"), "fragment {i} starts with {xml:.20}");
            assert!(xml.ends_with("</peaks>"));
        }

        let spectrum = accessor.get_spectrum_by_scan_number(10).unwrap();
        assert_eq!(spectrum.mz, vec![100.0, 200.0]);
        assert_eq!(spectrum.intensity, vec![50.0, 75.0]);
        assert_eq!(spectrum.base_peak_mz, 200.0);
        assert_eq!(spectrum.base_peak_intensity, 75.0);
        assert_eq!(spectrum.total_ion_current, 125.0);

        let by_index = accessor.get_spectrum_by_index(0).unwrap();
        assert_eq!(by_index, spectrum);

        assert!(matches!(
            accessor.get_spectrum_by_scan_number(404),
            Err(ReaderError::ScanNotFound(404))
        ));
        assert!(matches!(
            accessor.get_spectrum_by_index(9),
            Err(ReaderError::IndexNotFound(9))
        ));
    }

    #[test]
    fn test_header_only_fetch_matches_full() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "two_scans.mzXML", &plain_mzxml_document());
        let mut accessor = RandomAccessAccessor::new(XmlDialect::MzXml, no_embedded_options());
        accessor.open(&path).unwrap();
        accessor.read_and_cache_entire_file().unwrap();

        let full = accessor.get_spectrum_by_scan_number(11).unwrap();
        let header = accessor.get_spectrum_header_info_by_scan_number(11).unwrap();
        assert!(header.mz.is_empty());
        assert!(header.intensity.is_empty());
        assert_eq!(header.scan_number, full.scan_number);
        assert_eq!(header.ms_level, full.ms_level);
        assert_eq!(header.parent_ion_mz, full.parent_ion_mz);
        assert_eq!(header.parent_ion_charge, full.parent_ion_charge);
        assert_eq!(header.data_count, full.data_count);
    }

    #[test]
    fn test_read_next_spectrum_cursor() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "two_scans.mzXML", &plain_mzxml_document());
        let mut accessor = RandomAccessAccessor::new(XmlDialect::MzXml, no_embedded_options());
        accessor.open(&path).unwrap();
        accessor.read_and_cache_entire_file().unwrap();

        let mut scans = Vec::new();
        while let Some(spectrum) = accessor.read_next_spectrum().unwrap() {
            scans.push(spectrum.scan_number);
        }
        assert_eq!(scans, vec![10, 11]);
    }

    #[test_log::test]
    fn test_embedded_index_loaded() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "indexed.mzXML", &indexed_mzxml_document());
        let mut with_index =
            RandomAccessAccessor::new(XmlDialect::MzXml, AccessorOptions::default());
        with_index.open(&path).unwrap();
        // The trailer index makes the accessor ready without a scan
        assert_eq!(with_index.state(), AccessorState::Indexed);
        assert_eq!(with_index.get_scan_number_list().unwrap(), vec![10, 11]);

        let mut without_index =
            RandomAccessAccessor::new(XmlDialect::MzXml, no_embedded_options());
        without_index.open(&path).unwrap();
        without_index.read_and_cache_entire_file().unwrap();

        assert_eq!(
            with_index.get_scan_number_list().unwrap(),
            without_index.get_scan_number_list().unwrap()
        );
        for scan in [10, 11] {
            let a = with_index.get_spectrum_by_scan_number(scan).unwrap();
            let b = without_index.get_spectrum_by_scan_number(scan).unwrap();
            assert_eq!(a, b, "scan {scan}");
        }
        // Both paths agree on where each spectrum starts
        for i in 0..2 {
            assert_eq!(
                with_index.index.get(i).unwrap().byte_offset_start,
                without_index.index.get(i).unwrap().byte_offset_start
            );
        }
    }

    #[test_log::test]
    fn test_invalid_embedded_index_falls_back() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "broken.mzXML", &misindexed_mzxml_document());
        let mut accessor =
            RandomAccessAccessor::new(XmlDialect::MzXml, AccessorOptions::default());
        accessor.open(&path).unwrap();
        // Validation rejects the trailer and a forward scan takes over
        assert_eq!(accessor.state(), AccessorState::Indexed);
        assert!(accessor.error_message().is_some());
        assert_eq!(accessor.get_scan_number_list().unwrap(), vec![10, 11]);
        let spectrum = accessor.get_spectrum_by_scan_number(10).unwrap();
        assert_eq!(spectrum.mz, vec![100.0, 200.0]);
    }

    #[test]
    fn test_mzdata_by_spectrum_id() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "one_spectrum.mzData", &mzdata_document());
        let mut accessor =
            RandomAccessAccessor::new(XmlDialect::MzData, AccessorOptions::default());
        accessor.open(&path).unwrap();
        accessor.read_and_cache_entire_file().unwrap();
        assert_eq!(accessor.declared_scan_count(), Some(1));
        assert_eq!(accessor.get_spectrum_id_list().unwrap(), vec![7]);

        let xml = accessor.get_source_xml_by_index(0).unwrap();
        assert!(xml.starts_with("<spectrum"));
        assert!(xml.ends_with("</spectrum>"));

        let spectrum = accessor.get_spectrum_by_spectrum_id(7).unwrap();
        assert_eq!(spectrum.spectrum_id, 7);
        assert_eq!(spectrum.mz, vec![1.5, 2.5]);
        assert_eq!(spectrum.intensity, vec![10.0, 20.0]);
        assert!(matches!(
            accessor.get_spectrum_by_spectrum_id(8),
            Err(ReaderError::SpectrumIdNotFound(8))
        ));
    }

    #[test]
    fn test_cr_only_newlines_index_identically() {
        let dir = TempDir::new().unwrap();
        let lf_path = write_file(&dir, "lf.mzXML", &plain_mzxml_document());
        let cr_document = plain_mzxml_document().replace('\n', "\r");
        let cr_path = write_file(&dir, "cr.mzXML", &cr_document);

        let mut lf = RandomAccessAccessor::new(XmlDialect::MzXml, no_embedded_options());
        lf.open(&lf_path).unwrap();
        lf.read_and_cache_entire_file().unwrap();
        let mut cr = RandomAccessAccessor::new(XmlDialect::MzXml, no_embedded_options());
        cr.open(&cr_path).unwrap();
        cr.read_and_cache_entire_file().unwrap();

        assert_eq!(
            lf.get_scan_number_list().unwrap(),
            cr.get_scan_number_list().unwrap()
        );
        for scan in [10, 11] {
            let a = lf.get_spectrum_by_scan_number(scan).unwrap();
            let b = cr.get_spectrum_by_scan_number(scan).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_utf16_document() {
        let dir = TempDir::new().unwrap();
        let mut bytes = vec![0xFF, 0xFE];
        for unit in plain_mzxml_document().encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let path = dir.path().join("utf16.mzXML");
        fs::write(&path, &bytes).unwrap();

        let mut accessor = RandomAccessAccessor::new(XmlDialect::MzXml, no_embedded_options());
        accessor.open(&path).unwrap();
        accessor.read_and_cache_entire_file().unwrap();
        assert_eq!(accessor.get_scan_number_list().unwrap(), vec![10, 11]);
        let xml = accessor.get_source_xml_by_index(0).unwrap();
        assert!(xml.starts_with("<scan"));
        assert!(xml.ends_with("</peaks>"));
        let spectrum = accessor.get_spectrum_by_scan_number(10).unwrap();
        assert_eq!(spectrum.mz, vec![100.0, 200.0]);
        assert_eq!(spectrum.intensity, vec![50.0, 75.0]);
    }

    #[test]
    fn test_cached_mode() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "two_scans.mzXML", &plain_mzxml_document());
        let options = AccessorOptions {
            ignore_embedded_index: true,
            cache_spectra_in_memory: true,
            ..Default::default()
        };
        let mut accessor = RandomAccessAccessor::new(XmlDialect::MzXml, options);
        accessor.open(&path).unwrap();
        accessor.read_and_cache_entire_file().unwrap();
        assert_eq!(accessor.state(), AccessorState::Cached);
        assert_eq!(accessor.spectrum_count(), 2);
        assert_eq!(accessor.get_scan_number_list().unwrap(), vec![10, 11]);
        let spectrum = accessor.get_spectrum_by_scan_number(11).unwrap();
        assert_eq!(spectrum.mz, vec![110.5]);
        let again = accessor.get_spectrum_by_index(1).unwrap();
        assert_eq!(spectrum, again);
    }

    #[test]
    fn test_abort_interrupts_scan() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "two_scans.mzXML", &plain_mzxml_document());
        let mut accessor = RandomAccessAccessor::new(XmlDialect::MzXml, no_embedded_options());
        accessor.open(&path).unwrap();
        accessor.request_abort();
        assert!(matches!(
            accessor.read_and_cache_entire_file(),
            Err(ReaderError::Aborted)
        ));
        assert_eq!(accessor.error_message(), Some("Aborted processing"));
        // The partial index remains usable
        assert_eq!(accessor.state(), AccessorState::Indexed);
        assert!(accessor.get_scan_number_list().unwrap().is_empty());
    }

    #[test]
    fn test_close_and_reopen_reproduces_index() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "two_scans.mzXML", &plain_mzxml_document());
        let mut accessor = RandomAccessAccessor::new(XmlDialect::MzXml, no_embedded_options());
        accessor.open(&path).unwrap();
        accessor.read_and_cache_entire_file().unwrap();
        let before: Vec<_> = accessor.index.iter().copied().collect();

        accessor.close();
        assert_eq!(accessor.state(), AccessorState::Closed);
        assert!(matches!(
            accessor.read_and_cache_entire_file(),
            Err(ReaderError::NotReady)
        ));

        accessor.open(&path).unwrap();
        accessor.read_and_cache_entire_file().unwrap();
        let after: Vec<_> = accessor.index.iter().copied().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_open_missing_path() {
        let mut accessor =
            RandomAccessAccessor::new(XmlDialect::MzXml, AccessorOptions::default());
        let result = accessor.open("/no/such/file.mzXML");
        assert!(matches!(result, Err(ReaderError::PathNotFound(_))));
        assert!(accessor.error_message().is_some());
    }

    #[test]
    fn test_progress_events_fire() {
        use std::sync::{Arc, Mutex};
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "two_scans.mzXML", &plain_mzxml_document());
        let options = AccessorOptions {
            ignore_embedded_index: true,
            progress_line_interval: 1,
            ..Default::default()
        };
        let mut accessor = RandomAccessAccessor::new(XmlDialect::MzXml, options);
        let seen: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        accessor.set_event_callback(Box::new(move |event| {
            if let ReaderEvent::Progress { percent, .. } = event {
                sink.lock().unwrap().push(percent);
            }
        }));
        accessor.open(&path).unwrap();
        accessor.read_and_cache_entire_file().unwrap();
        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|p| (0.0..=100.0).contains(p)));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }
}

#[cfg(test)]
mod nested_scan_test {
    use super::*;
    use crate::spectrum::bindata::{encode_bytes, f32_bytes, Endian};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_nested_scans_index_as_distinct_entries() {
        let survey = encode_bytes(&f32_bytes(&[400.0, 900.0], Endian::Big), false);
        let fragment = encode_bytes(&f32_bytes(&[150.0, 30.0], Endian::Big), false);
        let document = format!(
            r#"<mzXML xmlns="http://sashimi.sourceforge.net/schema_revision/mzXML_2.1">
<msRun scanCount="2">
<scan num="1" msLevel="1" peaksCount="1">
<peaks precision="32" byteOrder="network" pairOrder="m/z-int">{survey}</peaks>
<scan num="2" msLevel="2" peaksCount="1">
<peaks precision="32" byteOrder="network" pairOrder="m/z-int">{fragment}</peaks>
</scan>
</scan>
</msRun>
</mzXML>
"#
        );
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested.mzXML");
        fs::write(&path, &document).unwrap();

        let options = AccessorOptions {
            ignore_embedded_index: true,
            ..Default::default()
        };
        let mut accessor = RandomAccessAccessor::new(XmlDialect::MzXml, options);
        accessor.open(&path).unwrap();
        accessor.read_and_cache_entire_file().unwrap();

        assert_eq!(accessor.get_scan_number_list().unwrap(), vec![1, 2]);
        let outer = accessor.get_spectrum_by_scan_number(1).unwrap();
        assert_eq!(outer.mz, vec![400.0]);
        let inner = accessor.get_spectrum_by_scan_number(2).unwrap();
        assert_eq!(inner.mz, vec![150.0]);
        assert_eq!(inner.ms_level, 2);

        // Each entry is bounded by its own start tag and the next peaks close
        let first = *accessor.index.get(0).unwrap();
        let second = *accessor.index.get(1).unwrap();
        assert!(first.byte_offset_end < second.byte_offset_start);
        let xml = accessor.get_source_xml_by_index(0).unwrap();
        assert!(xml.starts_with("<scan num=\"1\""));
        assert!(xml.ends_with("</peaks>"));
    }
}
