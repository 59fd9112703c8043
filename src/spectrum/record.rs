use log::warn;

/// The lifecycle of a [`SpectrumRecord`]: freshly created, carrying peak
/// data, or validated with its aggregates computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RecordStatus {
    #[default]
    Initialized,
    DataDefined,
    Validated,
}

/// Ion polarity of an acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Polarity {
    #[default]
    Unknown,
    Positive,
    Negative,
}

impl Polarity {
    /// Parse the single-character mzXML `polarity` attribute
    pub fn from_symbol(value: &str) -> Polarity {
        match value.trim() {
            "+" => Polarity::Positive,
            "-" => Polarity::Negative,
            _ => Polarity::Unknown,
        }
    }

    /// Parse an mzData `Polarity` cvParam value
    pub fn from_name(value: &str) -> Polarity {
        let value = value.trim();
        if value.eq_ignore_ascii_case("positive") || value == "+" {
            Polarity::Positive
        } else if value.eq_ignore_ascii_case("negative") || value == "-" {
            Polarity::Negative
        } else {
            Polarity::Unknown
        }
    }
}

/// One mass spectrum: acquisition metadata plus parallel m/z and
/// intensity vectors.
///
/// Records are filled in by the SAX readers and handed to the caller by
/// value. They hold no reference back to the reader that produced them,
/// so they remain valid after the reader is closed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpectrumRecord {
    pub scan_number: i32,
    /// The last scan combined into this spectrum, when it represents more
    /// than one acquisition
    pub end_scan_number: Option<i32>,
    /// How many acquisitions were combined to produce this spectrum
    pub combined_scan_count: i32,
    /// mzData `<spectrum id="...">`; zero for mzXML
    pub spectrum_id: i32,
    pub ms_level: i32,
    pub polarity: Polarity,
    pub retention_time_min: f32,

    /// Observed m/z range of the recorded peaks
    pub mz_range_start: f64,
    pub mz_range_end: f64,
    /// The m/z range the instrument was scanning
    pub instrument_mz_range_start: f64,
    pub instrument_mz_range_end: f64,

    pub base_peak_mz: f64,
    pub base_peak_intensity: f32,
    pub total_ion_current: f64,
    pub centroided: bool,
    pub deisotoped: bool,
    pub charge_deconvoluted: bool,

    pub parent_ion_mz: f64,
    pub parent_ion_intensity: f32,
    pub parent_ion_charge: i32,
    pub precursor_scan_number: i32,
    pub isolation_window_width: f32,
    pub activation_method: String,
    pub collision_energy: f32,
    pub collision_energy_units: String,

    pub filter_line: String,
    pub scan_type: String,
    pub scan_mode: String,

    /// The number of peaks this spectrum declares. After peak data is
    /// attached this always equals `mz.len()`.
    pub data_count: usize,
    pub mz: Vec<f64>,
    pub intensity: Vec<f32>,

    pub status: RecordStatus,
}

impl SpectrumRecord {
    pub fn new() -> SpectrumRecord {
        SpectrumRecord::default()
    }

    /// Reset to a freshly-initialized record
    pub fn clear(&mut self) {
        *self = SpectrumRecord::default();
    }

    pub fn is_empty(&self) -> bool {
        self.status == RecordStatus::Initialized && self.mz.is_empty()
    }

    pub fn peak_count(&self) -> usize {
        self.mz.len()
    }

    /// Attach decoded peak data. The vectors must be parallel; on a length
    /// mismatch the longer one is truncated with a warning.
    pub fn set_peaks(&mut self, mz: Vec<f64>, intensity: Vec<f32>) {
        self.mz = mz;
        self.intensity = intensity;
        if self.mz.len() != self.intensity.len() {
            warn!(
                "m/z and intensity arrays disagree in length ({} vs {}) for scan {}, truncating",
                self.mz.len(),
                self.intensity.len(),
                self.scan_number
            );
            let shorter = self.mz.len().min(self.intensity.len());
            self.mz.truncate(shorter);
            self.intensity.truncate(shorter);
        }
        self.data_count = self.mz.len();
        self.status = RecordStatus::DataDefined;
    }

    /// Finalize the record: when peak data is present, recompute the base
    /// peak, total ion current and observed m/z range from it.
    pub fn validate(&mut self) {
        if !self.mz.is_empty() {
            let mut base_index = 0usize;
            let mut tic = 0.0f64;
            for (i, intensity) in self.intensity.iter().enumerate() {
                tic += f64::from(*intensity);
                if *intensity > self.intensity[base_index] {
                    base_index = i;
                }
            }
            self.total_ion_current = tic;
            self.base_peak_mz = self.mz[base_index];
            self.base_peak_intensity = self.intensity[base_index];

            let mut low = self.mz[0];
            let mut high = self.mz[0];
            for mz in self.mz.iter().skip(1) {
                if *mz < low {
                    low = *mz;
                }
                if *mz > high {
                    high = *mz;
                }
            }
            self.mz_range_start = low;
            self.mz_range_end = high;
            self.data_count = self.mz.len();
        }
        self.status = RecordStatus::Validated;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_validate_aggregates() {
        let mut record = SpectrumRecord::new();
        record.scan_number = 10;
        record.set_peaks(vec![100.0, 200.0, 300.0], vec![50.0, 75.0, 25.0]);
        assert_eq!(record.status, RecordStatus::DataDefined);
        record.validate();
        assert_eq!(record.status, RecordStatus::Validated);
        assert_eq!(record.base_peak_mz, 200.0);
        assert_eq!(record.base_peak_intensity, 75.0);
        assert_eq!(record.total_ion_current, 150.0);
        assert_eq!(record.mz_range_start, 100.0);
        assert_eq!(record.mz_range_end, 300.0);
        assert_eq!(record.data_count, 3);
    }

    #[test]
    fn test_validate_empty_keeps_metadata() {
        let mut record = SpectrumRecord::new();
        record.scan_number = 3;
        record.base_peak_mz = 123.4;
        record.validate();
        assert_eq!(record.status, RecordStatus::Validated);
        assert_eq!(record.base_peak_mz, 123.4);
        assert_eq!(record.peak_count(), 0);
    }

    #[test]
    fn test_set_peaks_truncates_on_mismatch() {
        let mut record = SpectrumRecord::new();
        record.set_peaks(vec![1.0, 2.0, 3.0], vec![10.0, 20.0]);
        assert_eq!(record.mz.len(), 2);
        assert_eq!(record.intensity.len(), 2);
        assert_eq!(record.data_count, 2);
    }

    #[test]
    fn test_clear_resets_status() {
        let mut record = SpectrumRecord::new();
        record.set_peaks(vec![1.0], vec![1.0]);
        record.validate();
        record.clear();
        assert!(record.is_empty());
        assert_eq!(record.status, RecordStatus::Initialized);
    }

    #[test]
    fn test_polarity_parsing() {
        assert_eq!(Polarity::from_symbol("+"), Polarity::Positive);
        assert_eq!(Polarity::from_symbol("-"), Polarity::Negative);
        assert_eq!(Polarity::from_symbol("any"), Polarity::Unknown);
        assert_eq!(Polarity::from_name("Positive"), Polarity::Positive);
        assert_eq!(Polarity::from_name("negative"), Polarity::Negative);
    }
}
