use std::fs;
use std::io::{self, BufRead, BufReader, Cursor};
use std::path::{Path, PathBuf};

use log::warn;

use crate::io::{ReaderError, SpectrumReaderOps};
use crate::spectrum::SpectrumRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MgfParserState {
    Between,
    ScanHeaders,
    Peaks,
}

/**
A forward-only reader over Mascot Generic Format files. Each
`BEGIN IONS`/`END IONS` block becomes one MS2 [`SpectrumRecord`].
*/
pub struct MgfReader {
    source: Box<dyn BufRead>,
    path: Option<PathBuf>,
    state: MgfParserState,
    building: SpectrumRecord,
    mz: Vec<f64>,
    intensity: Vec<f32>,
    scan_number_seen: bool,
    blocks_read: i32,
    closed: bool,
    last_error: Option<String>,
}

impl MgfReader {
    pub fn open_path<P: AsRef<Path>>(path: P) -> io::Result<MgfReader> {
        let path = path.as_ref();
        let handle = fs::File::open(path)?;
        Ok(MgfReader {
            source: Box::new(BufReader::new(handle)),
            path: Some(path.to_path_buf()),
            state: MgfParserState::Between,
            building: SpectrumRecord::new(),
            mz: Vec::new(),
            intensity: Vec::new(),
            scan_number_seen: false,
            blocks_read: 0,
            closed: false,
            last_error: None,
        })
    }

    pub fn from_text(text: &str) -> MgfReader {
        MgfReader {
            source: Box::new(Cursor::new(text.as_bytes().to_vec())),
            path: None,
            state: MgfParserState::Between,
            building: SpectrumRecord::new(),
            mz: Vec::new(),
            intensity: Vec::new(),
            scan_number_seen: false,
            blocks_read: 0,
            closed: false,
            last_error: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn begin_block(&mut self) {
        self.building = SpectrumRecord::new();
        self.building.ms_level = 2;
        self.building.centroided = true;
        self.mz.clear();
        self.intensity.clear();
        self.scan_number_seen = false;
        self.state = MgfParserState::ScanHeaders;
    }

    fn finish_block(&mut self) -> SpectrumRecord {
        self.blocks_read += 1;
        if !self.scan_number_seen {
            self.building.scan_number = self.blocks_read;
        }
        let mut record = std::mem::take(&mut self.building);
        record.set_peaks(std::mem::take(&mut self.mz), std::mem::take(&mut self.intensity));
        record.validate();
        self.state = MgfParserState::Between;
        record
    }

    fn handle_header(&mut self, line: &str) {
        let Some((key, value)) = line.split_once('=') else {
            return;
        };
        let value = value.trim();
        match key.trim().to_ascii_uppercase().as_str() {
            "TITLE" => {
                self.building.filter_line = value.to_string();
            }
            "PEPMASS" => {
                let mut parts = value.split_ascii_whitespace();
                if let Some(mz) = parts.next().and_then(|v| v.parse::<f64>().ok()) {
                    self.building.parent_ion_mz = mz;
                }
                if let Some(intensity) = parts.next().and_then(|v| v.parse::<f32>().ok()) {
                    self.building.parent_ion_intensity = intensity;
                }
            }
            "CHARGE" => {
                // Written as 2+, 3-, or a bare number
                let trimmed = value.trim_end_matches('+');
                let negative = trimmed.ends_with('-');
                let trimmed = trimmed.trim_end_matches('-');
                if let Ok(charge) = trimmed.parse::<i32>() {
                    self.building.parent_ion_charge = if negative { -charge } else { charge };
                }
            }
            "RTINSECONDS" => {
                if let Ok(seconds) = value.parse::<f64>() {
                    self.building.retention_time_min = (seconds / 60.0) as f32;
                }
            }
            "SCANS" => {
                // Ranged values like 990-992 name their first scan
                let first = value.split('-').next().unwrap_or(value);
                if let Ok(scan) = first.trim().parse::<i32>() {
                    self.building.scan_number = scan;
                    self.scan_number_seen = true;
                }
            }
            _ => {}
        }
    }

    fn handle_peak_line(&mut self, line: &str) {
        let mut parts = line.split_ascii_whitespace();
        let mz = parts.next().and_then(|v| v.parse::<f64>().ok());
        let intensity = parts.next().and_then(|v| v.parse::<f32>().ok());
        match (mz, intensity) {
            (Some(mz), Some(intensity)) => {
                self.mz.push(mz);
                self.intensity.push(intensity);
            }
            _ => warn!("malformed MGF peak line: {line:?}"),
        }
    }
}

impl SpectrumReaderOps for MgfReader {
    fn read_next_spectrum(&mut self) -> Result<Option<SpectrumRecord>, ReaderError> {
        if self.closed {
            return Ok(None);
        }
        let mut line = String::new();
        loop {
            line.clear();
            if self.source.read_line(&mut line)? == 0 {
                if self.state != MgfParserState::Between {
                    warn!("MGF input ended inside an ion block");
                    return Ok(Some(self.finish_block()));
                }
                return Ok(None);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }
            match self.state {
                MgfParserState::Between => {
                    if trimmed.eq_ignore_ascii_case("BEGIN IONS") {
                        self.begin_block();
                    }
                }
                MgfParserState::ScanHeaders => {
                    if trimmed.eq_ignore_ascii_case("END IONS") {
                        return Ok(Some(self.finish_block()));
                    } else if trimmed.contains('=') {
                        self.handle_header(trimmed);
                    } else {
                        self.state = MgfParserState::Peaks;
                        self.handle_peak_line(trimmed);
                    }
                }
                MgfParserState::Peaks => {
                    if trimmed.eq_ignore_ascii_case("END IONS") {
                        return Ok(Some(self.finish_block()));
                    }
                    self.handle_peak_line(trimmed);
                }
            }
        }
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
        self.state = MgfParserState::Between;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::spectrum::RecordStatus;

    const SAMPLE: &str = "\
# comment line
BEGIN IONS
TITLE=Sample.990.990.2
PEPMASS=731.85 2500.5
CHARGE=2+
RTINSECONDS=90
SCANS=990
136.07 42.0
204.09 17.5
END IONS

BEGIN IONS
TITLE=Sample.991.991.3
PEPMASS=548.12
CHARGE=3+
260.19 11.0
END IONS
";

    #[test]
    fn test_read_blocks() {
        let mut reader = MgfReader::from_text(SAMPLE);
        let first = reader.read_next_spectrum().unwrap().expect("first block");
        assert_eq!(first.scan_number, 990);
        assert_eq!(first.ms_level, 2);
        assert_eq!(first.parent_ion_mz, 731.85);
        assert_eq!(first.parent_ion_intensity, 2500.5);
        assert_eq!(first.parent_ion_charge, 2);
        assert_eq!(first.retention_time_min, 1.5);
        assert_eq!(first.filter_line, "Sample.990.990.2");
        assert_eq!(first.mz, vec![136.07, 204.09]);
        assert_eq!(first.intensity, vec![42.0, 17.5]);
        assert_eq!(first.status, RecordStatus::Validated);

        let second = reader.read_next_spectrum().unwrap().expect("second block");
        assert_eq!(second.parent_ion_charge, 3);
        // No SCANS header: blocks are numbered sequentially
        assert_eq!(second.scan_number, 2);
        assert_eq!(second.mz, vec![260.19]);

        assert!(reader.read_next_spectrum().unwrap().is_none());
    }

    #[test]
    fn test_negative_charge() {
        let block = "BEGIN IONS\nPEPMASS=500.0\nCHARGE=2-\n100.0 1.0\nEND IONS\n";
        let mut reader = MgfReader::from_text(block);
        let record = reader.read_next_spectrum().unwrap().expect("block");
        assert_eq!(record.parent_ion_charge, -2);
    }

    #[test]
    fn test_close_stops_reading() {
        let mut reader = MgfReader::from_text(SAMPLE);
        assert!(reader.read_next_spectrum().unwrap().is_some());
        reader.close();
        assert!(reader.read_next_spectrum().unwrap().is_none());
    }
}
