use std::fs;
use std::io::{self, prelude::*, SeekFrom};
use std::path::Path;

use encoding_rs::{UTF_16BE, UTF_16LE};
use memchr::memchr2;

const CHUNK_SIZE: usize = 2usize.pow(16);
const WINDOW_LIMIT: usize = CHUNK_SIZE * 8;

/// The character encoding of a text file, determined from its byte order
/// mark or by sniffing the first chunk of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextEncoding {
    #[default]
    Ascii,
    Utf8,
    Utf16Le,
    Utf16Be,
}

impl TextEncoding {
    /// Width of one code unit in bytes: 2 for UTF-16, otherwise 1
    pub const fn char_size(&self) -> u64 {
        match self {
            TextEncoding::Utf16Le | TextEncoding::Utf16Be => 2,
            _ => 1,
        }
    }

    /// Decode a byte slice in this encoding, substituting U+FFFD for
    /// malformed sequences
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Ascii | TextEncoding::Utf8 => {
                String::from_utf8_lossy(bytes).into_owned()
            }
            TextEncoding::Utf16Le => UTF_16LE.decode_without_bom_handling(bytes).0.into_owned(),
            TextEncoding::Utf16Be => UTF_16BE.decode_without_bom_handling(bytes).0.into_owned(),
        }
    }
}

/// How a line was terminated in the underlying byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LineTerminator {
    #[default]
    Lf,
    CrLf,
    Cr,
    /// The final line of a file that does not end with a newline
    None,
}

impl LineTerminator {
    /// The terminator as text, used when reconstructing the exact content
    /// of a byte range from its lines
    pub const fn as_str(&self) -> &'static str {
        match self {
            LineTerminator::Lf => "\n",
            LineTerminator::CrLf => "\r\n",
            LineTerminator::Cr => "\r",
            LineTerminator::None => "",
        }
    }

}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadDirection {
    Forward,
    Reverse,
}

#[derive(Debug, Clone, Default)]
struct CurrentLine {
    text: String,
    start: u64,
    end: u64,
    terminator: LineTerminator,
}

/**
An encoding-aware line reader over a random access byte stream that can
read in either direction while reporting the exact byte range each line
occupies.

Reading forward from just past a line's end offset yields the next line;
reading in reverse from a line's start offset yields the previous one,
with offsets identical to what forward reading reports. A sliding byte
window keeps either direction cheap without re-reading covered bytes.
*/
pub struct BinaryTextReader<R: Read + Seek> {
    handle: R,
    file_length: u64,
    encoding: TextEncoding,
    bom_length: u8,
    window: Vec<u8>,
    window_start: u64,
    position: u64,
    line: CurrentLine,
    line_number: u64,
    have_line: bool,
}

impl BinaryTextReader<fs::File> {
    pub fn open_path<P: AsRef<Path>>(path: P) -> io::Result<BinaryTextReader<fs::File>> {
        BinaryTextReader::new(fs::File::open(path)?)
    }
}

impl<R: Read + Seek> BinaryTextReader<R> {
    pub fn new(mut handle: R) -> io::Result<BinaryTextReader<R>> {
        let file_length = handle.seek(SeekFrom::End(0))?;
        handle.seek(SeekFrom::Start(0))?;
        let mut inst = BinaryTextReader {
            handle,
            file_length,
            encoding: TextEncoding::Ascii,
            bom_length: 0,
            window: Vec::new(),
            window_start: 0,
            position: 0,
            line: CurrentLine::default(),
            line_number: 0,
            have_line: false,
        };
        inst.detect_encoding()?;
        inst.position = inst.bom_length as u64;
        Ok(inst)
    }

    fn detect_encoding(&mut self) -> io::Result<()> {
        let probe_end = self.file_length.min(CHUNK_SIZE as u64);
        self.ensure_window(0, probe_end)?;
        let probe = &self.window[..probe_end as usize];
        if probe.starts_with(&[0xEF, 0xBB, 0xBF]) {
            self.encoding = TextEncoding::Utf8;
            self.bom_length = 3;
        } else if probe.starts_with(&[0xFF, 0xFE]) {
            self.encoding = TextEncoding::Utf16Le;
            self.bom_length = 2;
        } else if probe.starts_with(&[0xFE, 0xFF]) {
            self.encoding = TextEncoding::Utf16Be;
            self.bom_length = 2;
        } else {
            self.encoding = Self::sniff_encoding(probe);
            self.bom_length = 0;
        }
        Ok(())
    }

    /// Classify BOM-less content. ASCII encoded as UTF-16 leaves a null in
    /// every other byte: the odd positions for little-endian, the even for
    /// big-endian. Otherwise any high byte that forms a valid UTF-8
    /// sequence marks the file as UTF-8.
    fn sniff_encoding(probe: &[u8]) -> TextEncoding {
        if probe.len() >= 4 {
            let pairs = probe.len() / 2;
            let mut even_nulls = 0usize;
            let mut odd_nulls = 0usize;
            for (i, byte) in probe.iter().enumerate() {
                if *byte == 0 {
                    if i % 2 == 0 {
                        even_nulls += 1;
                    } else {
                        odd_nulls += 1;
                    }
                }
            }
            if odd_nulls > pairs / 2 && even_nulls < pairs / 8 {
                return TextEncoding::Utf16Le;
            }
            if even_nulls > pairs / 2 && odd_nulls < pairs / 8 {
                return TextEncoding::Utf16Be;
            }
        }
        if probe.iter().any(|b| *b >= 0x80) {
            // Tolerate a multi-byte sequence cut off at the probe boundary
            match std::str::from_utf8(probe) {
                Ok(_) => TextEncoding::Utf8,
                Err(err) if err.error_len().is_none() => TextEncoding::Utf8,
                Err(_) => TextEncoding::Ascii,
            }
        } else {
            TextEncoding::Ascii
        }
    }

    /// Make the byte range `[start, end)` available in the window,
    /// extending it in whichever direction is needed
    fn ensure_window(&mut self, start: u64, end: u64) -> io::Result<()> {
        let end = end.min(self.file_length);
        if start >= end {
            return Ok(());
        }
        let have_start = self.window_start;
        let have_end = self.window_start + self.window.len() as u64;
        if !self.window.is_empty() && start >= have_start && end <= have_end {
            return Ok(());
        }
        if self.window.is_empty()
            || end < have_start
            || start > have_end
            || self.window.len() >= WINDOW_LIMIT
        {
            let mut fresh = vec![0u8; (end - start) as usize];
            self.handle.seek(SeekFrom::Start(start))?;
            self.handle.read_exact(&mut fresh)?;
            self.window = fresh;
            self.window_start = start;
            return Ok(());
        }
        if start < have_start {
            let mut prefix = vec![0u8; (have_start - start) as usize];
            self.handle.seek(SeekFrom::Start(start))?;
            self.handle.read_exact(&mut prefix)?;
            prefix.extend_from_slice(&self.window);
            self.window = prefix;
            self.window_start = start;
        }
        let have_end = self.window_start + self.window.len() as u64;
        if end > have_end {
            let mut suffix = vec![0u8; (end - have_end) as usize];
            self.handle.seek(SeekFrom::Start(have_end))?;
            self.handle.read_exact(&mut suffix)?;
            self.window.extend_from_slice(&suffix);
        }
        Ok(())
    }

    fn window_slice(&self, start: u64, end: u64) -> &[u8] {
        let a = (start - self.window_start) as usize;
        let b = (end - self.window_start) as usize;
        &self.window[a..b]
    }

    /// Read the code unit at `offset` (a byte for single-byte encodings,
    /// a native-order u16 for UTF-16)
    fn code_unit_at(&mut self, offset: u64) -> io::Result<u32> {
        let width = self.encoding.char_size();
        self.ensure_window(offset, offset + width)?;
        let slice = self.window_slice(offset, (offset + width).min(self.file_length));
        Ok(match self.encoding {
            TextEncoding::Utf16Le => {
                if slice.len() < 2 {
                    slice[0] as u32
                } else {
                    u16::from_le_bytes([slice[0], slice[1]]) as u32
                }
            }
            TextEncoding::Utf16Be => {
                if slice.len() < 2 {
                    slice[0] as u32
                } else {
                    u16::from_be_bytes([slice[0], slice[1]]) as u32
                }
            }
            _ => slice[0] as u32,
        })
    }

    /// Scan forward from `from` for the next line terminator, returning
    /// its byte offset, kind, and width in bytes
    fn find_terminator_forward(
        &mut self,
        from: u64,
    ) -> io::Result<Option<(u64, LineTerminator, u64)>> {
        let width = self.encoding.char_size();
        let mut scan = from;
        while scan < self.file_length {
            let block_end = (scan + CHUNK_SIZE as u64).min(self.file_length);
            self.ensure_window(scan, block_end)?;
            let found = match self.encoding {
                TextEncoding::Utf16Le | TextEncoding::Utf16Be => {
                    let slice = self.window_slice(scan, block_end);
                    let big = self.encoding == TextEncoding::Utf16Be;
                    let mut hit = None;
                    let mut i = 0usize;
                    while i + 1 < slice.len() {
                        let unit = if big {
                            u16::from_be_bytes([slice[i], slice[i + 1]])
                        } else {
                            u16::from_le_bytes([slice[i], slice[i + 1]])
                        };
                        if unit == 0x000A || unit == 0x000D {
                            hit = Some((scan + i as u64, unit as u32));
                            break;
                        }
                        i += 2;
                    }
                    hit
                }
                _ => {
                    let slice = self.window_slice(scan, block_end);
                    memchr2(b'\r', b'\n', slice)
                        .map(|i| (scan + i as u64, slice[i] as u32))
                }
            };
            if let Some((offset, unit)) = found {
                if unit == 0x000A {
                    return Ok(Some((offset, LineTerminator::Lf, width)));
                }
                // CR: look at the next code unit for a CRLF pair
                if offset + width < self.file_length
                    && self.code_unit_at(offset + width)? == 0x000A
                {
                    return Ok(Some((offset, LineTerminator::CrLf, width * 2)));
                }
                return Ok(Some((offset, LineTerminator::Cr, width)));
            }
            // A UTF-16 code unit may straddle the block boundary
            let step = block_end - scan;
            scan += if width == 2 { step - (step % 2) } else { step };
            if step < width {
                break;
            }
        }
        Ok(None)
    }

    /// Scan backward from `before` (exclusive) for the nearest terminator,
    /// returning the offset of the first byte of the line that follows it
    fn find_line_start_backward(&mut self, before: u64, floor: u64) -> io::Result<u64> {
        let width = self.encoding.char_size();
        let mut high = before;
        while high > floor {
            let low = high.saturating_sub(CHUNK_SIZE as u64).max(floor);
            // keep block boundaries on code unit alignment
            let low = floor + ((low - floor) / width) * width;
            self.ensure_window(low, high)?;
            let slice = self.window_slice(low, high);
            match self.encoding {
                TextEncoding::Utf16Le | TextEncoding::Utf16Be => {
                    let big = self.encoding == TextEncoding::Utf16Be;
                    let mut i = slice.len();
                    while i >= 2 {
                        i -= 2;
                        let unit = if big {
                            u16::from_be_bytes([slice[i], slice[i + 1]])
                        } else {
                            u16::from_le_bytes([slice[i], slice[i + 1]])
                        };
                        if unit == 0x000A || unit == 0x000D {
                            return Ok(low + i as u64 + 2);
                        }
                    }
                }
                _ => {
                    if let Some(i) = memchr::memrchr2(b'\r', b'\n', slice) {
                        return Ok(low + i as u64 + 1);
                    }
                }
            }
            high = low;
        }
        Ok(floor)
    }

    fn read_line_forward(&mut self) -> io::Result<bool> {
        if self.position >= self.file_length {
            return Ok(false);
        }
        let start = self.position;
        let (text_end, end, terminator) = match self.find_terminator_forward(start)? {
            Some((offset, kind, byte_len)) => (offset, offset + byte_len - 1, kind),
            None => (self.file_length, self.file_length - 1, LineTerminator::None),
        };
        self.ensure_window(start, text_end)?;
        let text = if text_end > start {
            self.encoding.decode(self.window_slice(start, text_end))
        } else {
            String::new()
        };
        self.line = CurrentLine {
            text,
            start,
            end,
            terminator,
        };
        self.position = end + 1;
        self.line_number += 1;
        self.have_line = true;
        Ok(true)
    }

    fn read_line_reverse(&mut self) -> io::Result<bool> {
        let width = self.encoding.char_size();
        let floor = self.bom_length as u64;
        if self.position <= floor {
            return Ok(false);
        }
        let end = self.position - 1;
        let last_unit_at = (end + 1).saturating_sub(width).max(floor);
        let last = self.code_unit_at(last_unit_at)?;
        let (terminator, text_end) = if last == 0x000A {
            if last_unit_at >= floor + width
                && self.code_unit_at(last_unit_at - width)? == 0x000D
            {
                (LineTerminator::CrLf, last_unit_at - width)
            } else {
                (LineTerminator::Lf, last_unit_at)
            }
        } else if last == 0x000D {
            (LineTerminator::Cr, last_unit_at)
        } else {
            (LineTerminator::None, end + 1)
        };
        let start = self.find_line_start_backward(text_end, floor)?;
        self.ensure_window(start, text_end)?;
        let text = if text_end > start {
            self.encoding.decode(self.window_slice(start, text_end))
        } else {
            String::new()
        };
        self.line = CurrentLine {
            text,
            start,
            end,
            terminator,
        };
        self.position = start;
        self.line_number = self.line_number.saturating_sub(1);
        self.have_line = true;
        Ok(true)
    }

    /// Read the next line in the requested direction. Returns `Ok(false)`
    /// at the ends of the file without error.
    pub fn read_line(&mut self, direction: ReadDirection) -> io::Result<bool> {
        match direction {
            ReadDirection::Forward => self.read_line_forward(),
            ReadDirection::Reverse => self.read_line_reverse(),
        }
    }

    /// Position just past the byte order mark, at the first line
    pub fn move_to_beginning(&mut self) {
        self.position = self.bom_length as u64;
        self.line_number = 0;
        self.have_line = false;
    }

    /// Position at end of file, ready to read lines in reverse
    pub fn move_to_end(&mut self) {
        self.position = self.file_length;
        self.line_number = 0;
        self.have_line = false;
    }

    /// Position at an arbitrary byte offset. Fails if the offset lies past
    /// the end of the file.
    pub fn move_to_byte_offset(&mut self, offset: u64) -> io::Result<()> {
        if offset > self.file_length {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "offset {} is past the end of the file ({} bytes)",
                    offset, self.file_length
                ),
            ));
        }
        self.position = offset;
        self.line_number = 0;
        self.have_line = false;
        Ok(())
    }

    pub fn line_text(&self) -> &str {
        &self.line.text
    }

    /// Byte offset of the current line's first character
    pub fn line_start_offset(&self) -> u64 {
        self.line.start
    }

    /// Byte offset of the current line's final byte, terminator included
    pub fn line_end_offset(&self) -> u64 {
        self.line.end
    }

    pub fn line_terminator(&self) -> LineTerminator {
        self.line.terminator
    }

    /// Count of lines read since the last reposition. Only meaningful
    /// while reading forward from the beginning.
    pub fn line_number(&self) -> u64 {
        self.line_number
    }

    pub fn char_size(&self) -> u64 {
        self.encoding.char_size()
    }

    pub fn byte_order_mark_length(&self) -> u8 {
        self.bom_length
    }

    pub fn file_length(&self) -> u64 {
        self.file_length
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// The byte offset the next read will start from
    pub fn position(&self) -> u64 {
        self.position
    }
}

/// Number of bytes `text` occupies in the file for a given code unit
/// width: the UTF-8 length for single-byte encodings, twice the UTF-16
/// code unit count otherwise.
pub(crate) fn byte_length_of(text: &str, char_size: u64) -> u64 {
    if char_size == 1 {
        text.len() as u64
    } else {
        text.encode_utf16().count() as u64 * 2
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn reader_over(content: &[u8]) -> BinaryTextReader<Cursor<Vec<u8>>> {
        BinaryTextReader::new(Cursor::new(content.to_vec())).unwrap()
    }

    fn utf16le_bytes(text: &str, bom: bool) -> Vec<u8> {
        let mut out = Vec::new();
        if bom {
            out.extend_from_slice(&[0xFF, 0xFE]);
        }
        for unit in text.encode_utf16() {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out
    }

    #[test]
    fn test_detect_bom() {
        let mut utf8 = vec![0xEF, 0xBB, 0xBF];
        utf8.extend_from_slice(b"hello\n");
        let reader = reader_over(&utf8);
        assert_eq!(reader.encoding(), TextEncoding::Utf8);
        assert_eq!(reader.byte_order_mark_length(), 3);
        assert_eq!(reader.char_size(), 1);

        let reader = reader_over(&utf16le_bytes("hello\n", true));
        assert_eq!(reader.encoding(), TextEncoding::Utf16Le);
        assert_eq!(reader.byte_order_mark_length(), 2);
        assert_eq!(reader.char_size(), 2);

        let mut be = vec![0xFE, 0xFF];
        for unit in "hi\n".encode_utf16() {
            be.extend_from_slice(&unit.to_be_bytes());
        }
        let reader = reader_over(&be);
        assert_eq!(reader.encoding(), TextEncoding::Utf16Be);
    }

    #[test]
    fn test_detect_without_bom() {
        let reader = reader_over(b"plain ascii content\n");
        assert_eq!(reader.encoding(), TextEncoding::Ascii);
        assert_eq!(reader.byte_order_mark_length(), 0);

        let reader = reader_over("caf\u{e9} latte, tr\u{e8}s bien\n".as_bytes());
        assert_eq!(reader.encoding(), TextEncoding::Utf8);

        let reader = reader_over(&utf16le_bytes("<mzXML>\n<scan num=\"1\">\n", false));
        assert_eq!(reader.encoding(), TextEncoding::Utf16Le);
    }

    #[test]
    fn test_forward_lines_lf() {
        let mut reader = reader_over(b"first\nsecond\nthird");
        assert!(reader.read_line(ReadDirection::Forward).unwrap());
        assert_eq!(reader.line_text(), "first");
        assert_eq!(reader.line_start_offset(), 0);
        assert_eq!(reader.line_end_offset(), 5);
        assert_eq!(reader.line_terminator(), LineTerminator::Lf);
        assert_eq!(reader.line_number(), 1);

        assert!(reader.read_line(ReadDirection::Forward).unwrap());
        assert_eq!(reader.line_text(), "second");
        assert_eq!(reader.line_start_offset(), 6);
        assert_eq!(reader.line_end_offset(), 12);

        assert!(reader.read_line(ReadDirection::Forward).unwrap());
        assert_eq!(reader.line_text(), "third");
        assert_eq!(reader.line_terminator(), LineTerminator::None);
        assert_eq!(reader.line_end_offset(), 17);

        assert!(!reader.read_line(ReadDirection::Forward).unwrap());
    }

    #[test]
    fn test_forward_lines_crlf_and_cr() {
        let mut reader = reader_over(b"a\r\nbb\rccc\n");
        assert!(reader.read_line(ReadDirection::Forward).unwrap());
        assert_eq!(reader.line_text(), "a");
        assert_eq!(reader.line_terminator(), LineTerminator::CrLf);
        assert_eq!(reader.line_end_offset(), 2);

        assert!(reader.read_line(ReadDirection::Forward).unwrap());
        assert_eq!(reader.line_text(), "bb");
        assert_eq!(reader.line_terminator(), LineTerminator::Cr);
        assert_eq!(reader.line_start_offset(), 3);
        assert_eq!(reader.line_end_offset(), 5);

        assert!(reader.read_line(ReadDirection::Forward).unwrap());
        assert_eq!(reader.line_text(), "ccc");
        assert_eq!(reader.line_terminator(), LineTerminator::Lf);
    }

    #[test]
    fn test_reverse_matches_forward() {
        for content in [
            &b"alpha\nbeta\r\ngamma\rdelta\n"[..],
            &b"one\ntwo\nthree"[..],
            &b"\n\nmiddle\n\n"[..],
            &b"cr only\rlines\rhere\r"[..],
        ] {
            let mut reader = reader_over(content);
            let mut forward = Vec::new();
            while reader.read_line(ReadDirection::Forward).unwrap() {
                forward.push((
                    reader.line_text().to_string(),
                    reader.line_start_offset(),
                    reader.line_end_offset(),
                ));
            }
            reader.move_to_end();
            let mut reverse = Vec::new();
            while reader.read_line(ReadDirection::Reverse).unwrap() {
                reverse.push((
                    reader.line_text().to_string(),
                    reader.line_start_offset(),
                    reader.line_end_offset(),
                ));
            }
            reverse.reverse();
            assert_eq!(forward, reverse, "content {:?}", content);
        }
    }

    #[test]
    fn test_cr_only_reads_like_lf() {
        let mut cr = reader_over(b"x\ry\rz\r");
        let mut lf = reader_over(b"x\ny\nz\n");
        for _ in 0..3 {
            assert!(cr.read_line(ReadDirection::Forward).unwrap());
            assert!(lf.read_line(ReadDirection::Forward).unwrap());
            assert_eq!(cr.line_text(), lf.line_text());
            assert_eq!(cr.line_start_offset(), lf.line_start_offset());
            assert_eq!(cr.line_end_offset(), lf.line_end_offset());
        }
    }

    #[test]
    fn test_utf16_lines_and_offsets() {
        let content = utf16le_bytes("<scan num=\"1\">\n<peaks>AAAA</peaks>\n", true);
        let mut reader = reader_over(&content);
        assert!(reader.read_line(ReadDirection::Forward).unwrap());
        assert_eq!(reader.line_text(), "<scan num=\"1\">");
        // BOM is 2 bytes; 14 characters of text then the LF
        assert_eq!(reader.line_start_offset(), 2);
        assert_eq!(reader.line_end_offset(), 2 + 14 * 2 + 1);

        assert!(reader.read_line(ReadDirection::Forward).unwrap());
        assert_eq!(reader.line_text(), "<peaks>AAAA</peaks>");

        reader.move_to_end();
        assert!(reader.read_line(ReadDirection::Reverse).unwrap());
        assert_eq!(reader.line_text(), "<peaks>AAAA</peaks>");
        assert!(reader.read_line(ReadDirection::Reverse).unwrap());
        assert_eq!(reader.line_text(), "<scan num=\"1\">");
        assert_eq!(reader.line_start_offset(), 2);
        assert!(!reader.read_line(ReadDirection::Reverse).unwrap());
    }

    #[test]
    fn test_move_to_byte_offset() {
        let mut reader = reader_over(b"abc\ndef\nghi\n");
        reader.move_to_byte_offset(4).unwrap();
        assert!(reader.read_line(ReadDirection::Forward).unwrap());
        assert_eq!(reader.line_text(), "def");
        assert_eq!(reader.line_start_offset(), 4);

        reader.move_to_byte_offset(4).unwrap();
        assert!(reader.read_line(ReadDirection::Reverse).unwrap());
        assert_eq!(reader.line_text(), "abc");
        assert_eq!(reader.line_start_offset(), 0);

        assert!(reader.move_to_byte_offset(1000).is_err());
    }

    #[test]
    fn test_empty_input() {
        let mut reader = reader_over(b"");
        assert!(!reader.read_line(ReadDirection::Forward).unwrap());
        reader.move_to_end();
        assert!(!reader.read_line(ReadDirection::Reverse).unwrap());
    }

    #[test]
    fn test_long_lines_span_window_blocks() {
        let mut content = Vec::new();
        content.extend_from_slice(b"short\n");
        content.extend(std::iter::repeat(b'x').take(CHUNK_SIZE * 2 + 17));
        content.push(b'\n');
        content.extend_from_slice(b"tail");
        let mut reader = reader_over(&content);
        assert!(reader.read_line(ReadDirection::Forward).unwrap());
        assert_eq!(reader.line_text(), "short");
        assert!(reader.read_line(ReadDirection::Forward).unwrap());
        assert_eq!(reader.line_text().len(), CHUNK_SIZE * 2 + 17);
        assert!(reader.read_line(ReadDirection::Forward).unwrap());
        assert_eq!(reader.line_text(), "tail");
    }

    #[test]
    fn test_byte_length_of() {
        assert_eq!(byte_length_of("abc", 1), 3);
        assert_eq!(byte_length_of("abc", 2), 6);
        assert_eq!(byte_length_of("", 2), 0);
    }
}
