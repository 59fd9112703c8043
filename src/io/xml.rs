//! The shared SAX layer: an event loop over a [`quick_xml::Reader`]
//! that dispatches to a dialect-specific handler, plus the attribute
//! helpers both dialects lean on.

pub mod mzdata;
pub mod mzxml;

use std::fs;
use std::io::{self, BufRead, BufReader, Cursor};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::spectrum::{CodecError, SpectrumRecord};

/// Errors raised while driving an XML spectrum stream
#[derive(Debug, Error)]
pub enum XmlReaderError {
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("Malformed document: {0}")]
    Malformed(String),
    #[error("Unsupported file version: {0}")]
    UnsupportedVersion(String),
    #[error("Peak data error: {0}")]
    Codec(#[from] CodecError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/**
Shared state the driver carries between events: the stack of open parent
elements, and the replay latch.

A handler that detects the end of a spectrum by *entering* the next
start element sets the latch via [`SaxContext::request_replay`]. The
driver then re-dispatches the same start element on the next iteration
without advancing the underlying reader and without pushing it onto the
parent stack a second time.
*/
#[derive(Debug, Default)]
pub struct SaxContext {
    parent_stack: Vec<String>,
    replay: Option<BytesStart<'static>>,
}

impl SaxContext {
    /// Name of the element enclosing the one currently being dispatched
    pub fn parent(&self) -> Option<&str> {
        self.parent_stack.last().map(|s| s.as_str())
    }

    /// Name of the parent's parent
    pub fn grandparent(&self) -> Option<&str> {
        if self.parent_stack.len() >= 2 {
            Some(self.parent_stack[self.parent_stack.len() - 2].as_str())
        } else {
            None
        }
    }

    pub fn depth(&self) -> usize {
        self.parent_stack.len()
    }

    /// Ask the driver to re-dispatch this start element on the next
    /// iteration
    pub fn request_replay(&mut self, event: &BytesStart) {
        self.replay = Some(event.clone().into_owned());
    }
}

/// The dialect-specific half of a SAX spectrum reader. The driver owns
/// the event loop; the handler owns the [`SpectrumRecord`] under
/// construction.
pub trait SpectrumSaxHandler {
    fn start_element(
        &mut self,
        event: &BytesStart,
        context: &mut SaxContext,
    ) -> Result<(), XmlReaderError>;

    fn end_element(
        &mut self,
        event: &BytesEnd,
        context: &mut SaxContext,
    ) -> Result<(), XmlReaderError>;

    fn text(&mut self, event: &BytesText, context: &mut SaxContext)
        -> Result<(), XmlReaderError>;

    /// Called when the input runs out, giving the handler a chance to
    /// finalize a spectrum whose closing tag lies outside the input, as
    /// happens when parsing an mzXML range that stops at `</peaks>`.
    fn end_of_stream(&mut self, context: &mut SaxContext) -> Result<(), XmlReaderError> {
        let _ = context;
        Ok(())
    }

    /// Reset the record under construction to a fresh state
    fn initialize_current_spectrum(&mut self);

    /// The record currently being populated
    fn current_spectrum(&self) -> &SpectrumRecord;

    /// Consume the finalized spectrum, if one latched since the last call
    fn take_spectrum(&mut self) -> Option<SpectrumRecord>;

    /// When set, binary peak payloads are not decoded; records keep their
    /// declared peak count but empty vectors
    fn set_skip_binary_data(&mut self, skip: bool);

    /// The file format version declared by the document root
    fn file_version(&self) -> &str;

    /// The scan count the file header declares, when one has been seen
    fn declared_scan_count(&self) -> Option<u64>;
}

/// Run the event loop until the handler produces a spectrum or the input
/// ends
pub(crate) fn drive_reader<R: BufRead, H: SpectrumSaxHandler>(
    reader: &mut Reader<R>,
    handler: &mut H,
    context: &mut SaxContext,
    buffer: &mut Vec<u8>,
) -> Result<Option<SpectrumRecord>, XmlReaderError> {
    loop {
        if let Some(replayed) = context.replay.take() {
            handler.start_element(&replayed, context)?;
            if let Some(spectrum) = handler.take_spectrum() {
                return Ok(Some(spectrum));
            }
            continue;
        }
        match reader.read_event_into(buffer) {
            Ok(Event::Start(ref e)) => {
                handler.start_element(e, context)?;
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                context.parent_stack.push(name);
            }
            Ok(Event::Empty(ref e)) => {
                handler.start_element(e, context)?;
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let end = BytesEnd::new(name);
                handler.end_element(&end, context)?;
            }
            Ok(Event::End(ref e)) => {
                context.parent_stack.pop();
                handler.end_element(e, context)?;
            }
            Ok(Event::Text(ref e)) => {
                handler.text(e, context)?;
            }
            Ok(Event::Eof) => {
                handler.end_of_stream(context)?;
                buffer.clear();
                return Ok(handler.take_spectrum());
            }
            Err(err) => return Err(err.into()),
            Ok(_) => {}
        }
        buffer.clear();
        if let Some(spectrum) = handler.take_spectrum() {
            return Ok(Some(spectrum));
        }
    }
}

/// Parse a single spectrum subtree that was carved out of a larger
/// document, reusing the handler's accumulated file state
pub(crate) fn parse_spectrum_fragment<H: SpectrumSaxHandler>(
    handler: &mut H,
    xml: &str,
) -> Result<Option<SpectrumRecord>, XmlReaderError> {
    let mut reader = Reader::from_reader(Cursor::new(xml.as_bytes()));
    reader.trim_text(true);
    reader.check_end_names(false);
    let mut context = SaxContext::default();
    let mut buffer = Vec::new();
    handler.initialize_current_spectrum();
    drive_reader(&mut reader, handler, &mut context, &mut buffer)
}

/**
A forward-only streaming spectrum reader over an XML document, driving a
dialect handler. Produces one [`SpectrumRecord`] per call to
[`XmlSpectrumStream::read_next_spectrum`], in file order.
*/
pub struct XmlSpectrumStream<H: SpectrumSaxHandler> {
    reader: Reader<Box<dyn BufRead>>,
    handler: H,
    context: SaxContext,
    buffer: Vec<u8>,
    path: Option<PathBuf>,
    stream_length: Option<u64>,
    closed: bool,
}

impl<H: SpectrumSaxHandler> XmlSpectrumStream<H> {
    /// Open a document on disk
    pub fn open_path<P: AsRef<Path>>(path: P, handler: H) -> io::Result<XmlSpectrumStream<H>> {
        let path = path.as_ref();
        let length = fs::metadata(path)?.len();
        let file = fs::File::open(path)?;
        let source: Box<dyn BufRead> = Box::new(BufReader::new(file));
        let mut reader = Reader::from_reader(source);
        reader.trim_text(true);
        Ok(XmlSpectrumStream {
            reader,
            handler,
            context: SaxContext::default(),
            buffer: Vec::new(),
            path: Some(path.to_path_buf()),
            stream_length: Some(length),
            closed: false,
        })
    }

    /// Wrap an XML document already held in memory
    pub fn from_text(text: &str, handler: H) -> XmlSpectrumStream<H> {
        let length = text.len() as u64;
        let source: Box<dyn BufRead> = Box::new(Cursor::new(text.as_bytes().to_vec()));
        let mut reader = Reader::from_reader(source);
        reader.trim_text(true);
        XmlSpectrumStream {
            reader,
            handler,
            context: SaxContext::default(),
            buffer: Vec::new(),
            path: None,
            stream_length: Some(length),
            closed: false,
        }
    }

    /// Advance to the next spectrum. Returns `Ok(None)` when the document
    /// is exhausted or the stream has been closed.
    pub fn read_next_spectrum(&mut self) -> Result<Option<SpectrumRecord>, XmlReaderError> {
        if self.closed {
            return Ok(None);
        }
        drive_reader(
            &mut self.reader,
            &mut self.handler,
            &mut self.context,
            &mut self.buffer,
        )
    }

    /// Stop reading and release the underlying input. Further calls to
    /// [`XmlSpectrumStream::read_next_spectrum`] return `Ok(None)`.
    pub fn close(&mut self) {
        self.closed = true;
        let empty: Box<dyn BufRead> = Box::new(Cursor::new(Vec::<u8>::new()));
        self.reader = Reader::from_reader(empty);
        self.buffer.clear();
    }

    /// Fraction of the input consumed so far, as a percentage
    pub fn progress_percent(&self) -> f32 {
        match self.stream_length {
            Some(length) if length > 0 => {
                (self.reader.buffer_position() as f32 / length as f32 * 100.0).min(100.0)
            }
            _ => 0.0,
        }
    }

    pub fn file_version(&self) -> &str {
        self.handler.file_version()
    }

    pub fn declared_scan_count(&self) -> Option<u64> {
        self.handler.declared_scan_count()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }
}

/// Look up an attribute by name, unescaping its value
pub(crate) fn attr_string(event: &BytesStart, name: &str) -> Option<String> {
    for attr in event.attributes().flatten() {
        if attr.key.as_ref() == name.as_bytes() {
            return attr.unescape_value().ok().map(|v| v.into_owned());
        }
    }
    None
}

/// Parse an attribute into `T`, falling back to `default` when the
/// attribute is missing or malformed
pub(crate) fn attr_as<T: FromStr>(event: &BytesStart, name: &str, default: T) -> T {
    attr_string(event, name)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

pub(crate) fn attr_opt<T: FromStr>(event: &BytesStart, name: &str) -> Option<T> {
    attr_string(event, name).and_then(|v| v.trim().parse::<T>().ok())
}

/// Boolean attributes in these dialects are written as `1`/`0` or
/// `true`/`false`
pub(crate) fn attr_bool(event: &BytesStart, name: &str, default: bool) -> bool {
    match attr_string(event, name) {
        Some(v) => matches!(v.trim(), "1" | "true" | "True" | "TRUE"),
        None => default,
    }
}

/// Parse an attribute holding a time value into minutes
pub(crate) fn attr_time_minutes(event: &BytesStart, name: &str) -> Option<f64> {
    attr_string(event, name).and_then(|v| parse_duration_minutes(&v))
}

/// Parse a time value into minutes. Accepts ISO-8601 durations in the
/// `PT1H2M3.5S` family as mzXML writes them, or a bare number already in
/// minutes.
pub fn parse_duration_minutes(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let rest = match text.strip_prefix("PT").or_else(|| text.strip_prefix("pt")) {
        Some(rest) => rest,
        None => return text.parse::<f64>().ok(),
    };
    let mut minutes = 0.0f64;
    let mut number = String::new();
    let mut any_component = false;
    for ch in rest.chars() {
        if ch.is_ascii_digit() || ch == '.' || ch == '-' || ch == '+' {
            number.push(ch);
            continue;
        }
        let value: f64 = number.parse().ok()?;
        number.clear();
        any_component = true;
        match ch.to_ascii_uppercase() {
            'H' => minutes += value * 60.0,
            'M' => minutes += value,
            'S' => minutes += value / 60.0,
            _ => return None,
        }
    }
    if !number.is_empty() || !any_component {
        return None;
    }
    Some(minutes)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_duration_minutes() {
        assert_eq!(parse_duration_minutes("PT60.0S"), Some(1.0));
        assert_eq!(parse_duration_minutes("PT2M"), Some(2.0));
        assert_eq!(parse_duration_minutes("PT1H"), Some(60.0));
        assert_eq!(parse_duration_minutes("PT1H30M30S"), Some(90.5));
        assert_eq!(parse_duration_minutes("12.5"), Some(12.5));
        assert_eq!(parse_duration_minutes("  PT3S "), Some(0.05));
        assert_eq!(parse_duration_minutes(""), None);
        assert_eq!(parse_duration_minutes("PT"), None);
        assert_eq!(parse_duration_minutes("PT12"), None);
        assert_eq!(parse_duration_minutes("oops"), None);
    }

    #[test]
    fn test_attribute_accessors() {
        let raw = r#"scan num="15" msLevel="2" peaksCount="0" centroided="1" retentionTime="PT6.0S""#;
        let event = BytesStart::from_content(raw, 4);
        assert_eq!(attr_as::<i32>(&event, "num", 0), 15);
        assert_eq!(attr_as::<i32>(&event, "msLevel", 1), 2);
        assert_eq!(attr_as::<i32>(&event, "missing", 7), 7);
        assert_eq!(attr_opt::<usize>(&event, "peaksCount"), Some(0));
        assert!(attr_bool(&event, "centroided", false));
        assert!(!attr_bool(&event, "absent", false));
        assert_eq!(attr_time_minutes(&event, "retentionTime"), Some(0.1));
        assert_eq!(attr_string(&event, "num").as_deref(), Some("15"));
    }
}
