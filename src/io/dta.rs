use std::fs;
use std::io::{self, BufRead, BufReader, Cursor};
use std::path::{Path, PathBuf};

use log::warn;

use crate::io::{ReaderError, SpectrumReaderOps};
use crate::spectrum::SpectrumRecord;

const PROTON_MASS: f64 = 1.00727649;

/**
A forward-only reader over concatenated DTA files (`_dta.txt`), the
text format produced by merging per-scan `.dta` files into one document.

Each member is introduced by a separator line naming the original file,
for example:

```text
=================== "Sample.1234.1234.2.dta" ===================
```

followed by a header line holding the singly-protonated parent mass and
the charge state, then one `m/z intensity` pair per line.
*/
pub struct DtaTextReader {
    source: Box<dyn BufRead>,
    path: Option<PathBuf>,
    pending_separator: Option<String>,
    started: bool,
    blocks_read: i32,
    closed: bool,
    last_error: Option<String>,
}

impl DtaTextReader {
    pub fn open_path<P: AsRef<Path>>(path: P) -> io::Result<DtaTextReader> {
        let path = path.as_ref();
        let handle = fs::File::open(path)?;
        Ok(DtaTextReader {
            source: Box::new(BufReader::new(handle)),
            path: Some(path.to_path_buf()),
            pending_separator: None,
            started: false,
            blocks_read: 0,
            closed: false,
            last_error: None,
        })
    }

    pub fn from_text(text: &str) -> DtaTextReader {
        DtaTextReader {
            source: Box::new(Cursor::new(text.as_bytes().to_vec())),
            path: None,
            pending_separator: None,
            started: false,
            blocks_read: 0,
            closed: false,
            last_error: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn next_line(&mut self) -> io::Result<Option<String>> {
        if let Some(line) = self.pending_separator.take() {
            return Ok(Some(line));
        }
        let mut line = String::new();
        if self.source.read_line(&mut line)? == 0 {
            Ok(None)
        } else {
            Ok(Some(line))
        }
    }

    fn is_separator(line: &str) -> bool {
        line.starts_with('=') && line.contains(".dta")
    }

    /// Pull scan numbers and charge out of a member name like
    /// `Sample.1234.1236.2.dta`
    fn apply_member_name(record: &mut SpectrumRecord, separator: &str) {
        let name = match separator.split('"').nth(1) {
            Some(name) => name.to_string(),
            None => separator.trim_matches(|c| c == '=' || c == ' ').to_string(),
        };
        record.filter_line = name.clone();
        let pieces: Vec<&str> = name.split('.').collect();
        // ... name.start_scan.end_scan.charge.dta
        if pieces.len() >= 5 {
            let tail = &pieces[pieces.len() - 4..];
            if let Ok(start) = tail[0].parse::<i32>() {
                record.scan_number = start;
            }
            if let Ok(end) = tail[1].parse::<i32>() {
                record.end_scan_number = Some(end);
                record.combined_scan_count = (end - record.scan_number).abs() + 1;
            }
        }
    }
}

impl SpectrumReaderOps for DtaTextReader {
    fn read_next_spectrum(&mut self) -> Result<Option<SpectrumRecord>, ReaderError> {
        if self.closed {
            return Ok(None);
        }
        // Find the next member separator
        let separator = loop {
            match self.next_line()? {
                Some(line) => {
                    let trimmed = line.trim();
                    if Self::is_separator(trimmed) {
                        break trimmed.to_string();
                    }
                    if self.started && !trimmed.is_empty() {
                        warn!("unexpected content between DTA members: {trimmed:?}");
                    }
                }
                None => return Ok(None),
            }
        };
        self.started = true;
        self.blocks_read += 1;

        let mut record = SpectrumRecord::new();
        record.ms_level = 2;
        record.centroided = true;
        record.scan_number = self.blocks_read;
        Self::apply_member_name(&mut record, &separator);

        // The first data line holds the M+H mass and the charge state
        let mut header_seen = false;
        let mut mz = Vec::new();
        let mut intensity = Vec::new();
        loop {
            let Some(line) = self.next_line()? else {
                break;
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                if header_seen {
                    break;
                }
                continue;
            }
            if Self::is_separator(trimmed) {
                self.pending_separator = Some(line);
                break;
            }
            let mut parts = trimmed.split_ascii_whitespace();
            let first = parts.next().and_then(|v| v.parse::<f64>().ok());
            let second = parts.next().and_then(|v| v.parse::<f64>().ok());
            let (Some(first), Some(second)) = (first, second) else {
                warn!("malformed DTA line: {trimmed:?}");
                continue;
            };
            if !header_seen {
                header_seen = true;
                let charge = second as i32;
                record.parent_ion_charge = charge;
                record.parent_ion_mz = if charge > 0 {
                    (first + (charge as f64 - 1.0) * PROTON_MASS) / charge as f64
                } else {
                    first
                };
            } else {
                mz.push(first);
                intensity.push(second as f32);
            }
        }
        record.set_peaks(mz, intensity);
        record.validate();
        Ok(Some(record))
    }

    fn declared_scan_count(&self) -> Option<u64> {
        None
    }

    fn error_message(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn close(&mut self) {
        self.closed = true;
        self.source = Box::new(Cursor::new(Vec::<u8>::new()));
        self.pending_separator = None;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::spectrum::RecordStatus;

    const SAMPLE: &str = "\
=================================== \"Sample.1234.1234.2.dta\" ==================================
1479.63 2
136.07 42.0
204.09 17.5

=================================== \"Sample.1240.1242.3.dta\" ==================================
935.20 3
260.19 11.0
";

    #[test]
    fn test_read_members() {
        let mut reader = DtaTextReader::from_text(SAMPLE);
        let first = reader.read_next_spectrum().unwrap().expect("first member");
        assert_eq!(first.scan_number, 1234);
        assert_eq!(first.end_scan_number, Some(1234));
        assert_eq!(first.parent_ion_charge, 2);
        // (1479.63 + 1.00727649) / 2
        assert!((first.parent_ion_mz - 740.31863825).abs() < 1e-6);
        assert_eq!(first.mz, vec![136.07, 204.09]);
        assert_eq!(first.intensity, vec![42.0, 17.5]);
        assert_eq!(first.status, RecordStatus::Validated);

        let second = reader.read_next_spectrum().unwrap().expect("second member");
        assert_eq!(second.scan_number, 1240);
        assert_eq!(second.end_scan_number, Some(1242));
        assert_eq!(second.combined_scan_count, 3);
        assert_eq!(second.parent_ion_charge, 3);
        assert_eq!(second.mz, vec![260.19]);

        assert!(reader.read_next_spectrum().unwrap().is_none());
    }

    #[test]
    fn test_close_stops_reading() {
        let mut reader = DtaTextReader::from_text(SAMPLE);
        assert!(reader.read_next_spectrum().unwrap().is_some());
        reader.close();
        assert!(reader.read_next_spectrum().unwrap().is_none());
    }
}
