use std::collections::VecDeque;

use log::{debug, warn};
use quick_xml::events::{BytesEnd, BytesStart, BytesText};

use crate::spectrum::bindata::{self, Endian, PeakValues};
use crate::spectrum::{Polarity, RecordStatus, SpectrumRecord};

use super::{
    attr_as, attr_opt, attr_string, SaxContext, SpectrumSaxHandler, XmlReaderError,
    XmlSpectrumStream,
};

/// How many recent survey scans are kept for precursor intensity lookup
const SURVEY_CACHE_CAPACITY: usize = 20;

/// Default half-width of the m/z window used when matching a precursor
/// against a cached survey scan
const DEFAULT_PARENT_MZ_TOLERANCE: f64 = 0.05;

/// Options controlling mzData parsing behavior
#[derive(Debug, Clone)]
pub struct MzDataReaderOptions {
    /// m/z half-window for resolving a precursor's intensity from the
    /// survey scan it references
    pub parent_mz_tolerance: f64,
}

impl Default for MzDataReaderOptions {
    fn default() -> MzDataReaderOptions {
        MzDataReaderOptions {
            parent_mz_tolerance: DEFAULT_PARENT_MZ_TOLERANCE,
        }
    }
}

/// File-level facts from the mzData header
#[derive(Debug, Default, Clone)]
pub struct MzDataFileInfo {
    pub version: String,
    pub spectrum_count: Option<u64>,
    /// Defaults applied to every spectrum, gathered from the
    /// `dataProcessing` description block
    pub centroided: bool,
    pub deisotoped: bool,
    pub charge_deconvoluted: bool,
    pub peak_processing: String,
}

/// The section a `cvParam` appears in decides how its name/value pair is
/// interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum CvSection {
    #[default]
    None,
    DataProcessingMethod,
    SpectrumInstrument,
    PrecursorIonSelection,
    PrecursorActivation,
}

/// Which binary array the current `<data>` element belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ArrayTarget {
    #[default]
    None,
    Mz,
    Intensity,
}

#[derive(Debug, Default, Clone)]
struct DataAttributes {
    precision_bits: u32,
    endian: Endian,
    declared_length: usize,
}

/**
The mzData 1.x dialect handler. Each `<spectrum>` element carries two
independent base64 payloads for m/z and intensity, each with its own
precision and endianness, and routes most scalar metadata through
`cvParam` elements whose meaning depends on the enclosing section.

Finished MS1 spectra are cached in a bounded FIFO so that a later MS2
whose `spectrumRef` names one of them can resolve its precursor
intensity by m/z lookup.
*/
pub struct MzDataSaxReader {
    options: MzDataReaderOptions,
    spectrum: SpectrumRecord,
    found: Option<SpectrumRecord>,
    file_info: MzDataFileInfo,
    section: CvSection,
    have_spectrum: bool,
    acquisitions_seen: u32,
    array_target: ArrayTarget,
    data_attributes: DataAttributes,
    declared_data_count: Option<usize>,
    pending_mz: Option<Vec<f64>>,
    pending_intensity: Option<Vec<f32>>,
    survey_cache: VecDeque<SpectrumRecord>,
    capturing_data: bool,
    text_buffer: String,
    skip_binary_data: bool,
}

impl Default for MzDataSaxReader {
    fn default() -> MzDataSaxReader {
        MzDataSaxReader::new(MzDataReaderOptions::default())
    }
}

impl MzDataSaxReader {
    pub fn new(options: MzDataReaderOptions) -> MzDataSaxReader {
        MzDataSaxReader {
            options,
            spectrum: SpectrumRecord::new(),
            found: None,
            file_info: MzDataFileInfo::default(),
            section: CvSection::None,
            have_spectrum: false,
            acquisitions_seen: 0,
            array_target: ArrayTarget::None,
            data_attributes: DataAttributes::default(),
            declared_data_count: None,
            pending_mz: None,
            pending_intensity: None,
            survey_cache: VecDeque::with_capacity(SURVEY_CACHE_CAPACITY),
            capturing_data: false,
            text_buffer: String::new(),
            skip_binary_data: false,
        }
    }

    pub fn file_info(&self) -> &MzDataFileInfo {
        &self.file_info
    }

    fn begin_spectrum(&mut self, event: &BytesStart) {
        self.initialize_current_spectrum();
        self.have_spectrum = true;
        let id = attr_as::<i32>(event, "id", 0);
        self.spectrum.spectrum_id = id;
        // acqNumber overrides this when an acquisition list is present
        self.spectrum.scan_number = id;
        self.spectrum.centroided = self.file_info.centroided;
        self.spectrum.deisotoped = self.file_info.deisotoped;
        self.spectrum.charge_deconvoluted = self.file_info.charge_deconvoluted;
    }

    fn handle_acq_specification(&mut self, event: &BytesStart) {
        if let Some(spectrum_type) = attr_string(event, "spectrumType") {
            self.spectrum.scan_type = spectrum_type.clone();
            if spectrum_type.to_ascii_lowercase().contains("discrete") {
                self.spectrum.centroided = true;
            }
        }
        self.spectrum.combined_scan_count = attr_as(event, "count", 1);
    }

    fn handle_acquisition(&mut self, event: &BytesStart) {
        let Some(number) = attr_opt::<i32>(event, "acqNumber") else {
            return;
        };
        // Only the first acquisition names the scan, unless this spectrum
        // combines exactly one
        if self.acquisitions_seen == 0 || self.spectrum.combined_scan_count == 1 {
            self.spectrum.scan_number = number;
        } else if self.spectrum.end_scan_number.is_none()
            || self.spectrum.end_scan_number < Some(number)
        {
            self.spectrum.end_scan_number = Some(number);
        }
        self.acquisitions_seen += 1;
    }

    fn handle_cv_param(&mut self, event: &BytesStart) {
        let name = attr_string(event, "name").unwrap_or_default();
        let value = attr_string(event, "value").unwrap_or_default();
        match self.section {
            CvSection::DataProcessingMethod => match name.as_str() {
                "Deisotoping" => self.file_info.deisotoped = parse_flag(&value),
                "ChargeDeconvolution" => self.file_info.charge_deconvoluted = parse_flag(&value),
                "PeakProcessing" => {
                    self.file_info.centroided = value.to_ascii_lowercase().contains("centroid");
                    self.file_info.peak_processing = value;
                }
                _ => {}
            },
            CvSection::SpectrumInstrument => match name.as_str() {
                "ScanMode" => self.spectrum.scan_mode = value,
                "Polarity" => self.spectrum.polarity = Polarity::from_name(&value),
                "TimeInMinutes" => {
                    if let Ok(minutes) = value.trim().parse::<f32>() {
                        self.spectrum.retention_time_min = minutes;
                    }
                }
                _ => {}
            },
            CvSection::PrecursorIonSelection => match name.as_str() {
                "MassToChargeRatio" => {
                    if let Ok(mz) = value.trim().parse::<f64>() {
                        self.spectrum.parent_ion_mz = mz;
                        self.resolve_parent_intensity(mz);
                    }
                }
                "ChargeState" => {
                    if let Ok(charge) = value.trim().parse::<i32>() {
                        self.spectrum.parent_ion_charge = charge;
                    }
                }
                _ => {}
            },
            CvSection::PrecursorActivation => match name.as_str() {
                "Method" => self.spectrum.activation_method = value,
                "CollisionEnergy" => {
                    if let Ok(energy) = value.trim().parse::<f32>() {
                        self.spectrum.collision_energy = energy;
                    }
                }
                "EnergyUnits" => self.spectrum.collision_energy_units = value,
                _ => {}
            },
            CvSection::None => {}
        }
    }

    /// Look the parent m/z up in the survey scan this spectrum references
    fn resolve_parent_intensity(&mut self, parent_mz: f64) {
        if self.spectrum.precursor_scan_number == 0 {
            return;
        }
        let reference = self.spectrum.precursor_scan_number;
        let Some(survey) = self
            .survey_cache
            .iter()
            .rev()
            .find(|s| s.spectrum_id == reference)
        else {
            debug!(
                "spectrum {} references survey scan {} that is no longer cached",
                self.spectrum.spectrum_id, reference
            );
            return;
        };
        let tolerance = self.options.parent_mz_tolerance;
        let mut best: Option<(f64, f32)> = None;
        for (mz, intensity) in survey.mz.iter().zip(survey.intensity.iter()) {
            let distance = (mz - parent_mz).abs();
            if distance <= tolerance {
                match best {
                    Some((previous, _)) if previous <= distance => {}
                    _ => best = Some((distance, *intensity)),
                }
            }
        }
        if let Some((_, intensity)) = best {
            self.spectrum.parent_ion_intensity = intensity;
        }
    }

    fn handle_data_start(&mut self, event: &BytesStart) {
        self.data_attributes = DataAttributes {
            precision_bits: attr_as(event, "precision", 32u32),
            endian: Endian::from_endian_name(
                attr_string(event, "endian").as_deref().unwrap_or("big"),
            ),
            declared_length: attr_as(event, "length", 0usize),
        };
        self.capturing_data = true;
        self.text_buffer.clear();
    }

    fn finish_data(&mut self) -> Result<(), XmlReaderError> {
        let target = self.array_target;
        self.capturing_data = false;
        if target == ArrayTarget::None {
            self.text_buffer.clear();
            return Ok(());
        }
        // The m/z array's declared length is authoritative; intensity's
        // counts only when m/z has not set it yet
        let declared = self.data_attributes.declared_length;
        match target {
            ArrayTarget::Mz => self.declared_data_count = Some(declared),
            ArrayTarget::Intensity => {
                if self.declared_data_count.is_none() {
                    self.declared_data_count = Some(declared);
                }
            }
            ArrayTarget::None => {}
        }
        if self.skip_binary_data {
            self.text_buffer.clear();
            return Ok(());
        }
        let decoded = bindata::decode(
            &self.text_buffer,
            false,
            self.data_attributes.endian,
            self.data_attributes.precision_bits,
        )?;
        self.text_buffer.clear();
        if decoded.len() != declared {
            warn!(
                "spectrum {} declares {} values in its {:?} array but {} decoded",
                self.spectrum.spectrum_id,
                declared,
                target,
                decoded.len()
            );
        }
        match target {
            ArrayTarget::Mz => {
                self.pending_mz = Some(decoded.into_f64());
            }
            ArrayTarget::Intensity => {
                let intensity = match decoded {
                    PeakValues::Float32(values) => values,
                    PeakValues::Float64(values) => {
                        values.into_iter().map(|v| v as f32).collect()
                    }
                };
                self.pending_intensity = Some(intensity);
            }
            ArrayTarget::None => {}
        }
        Ok(())
    }

    fn finish_spectrum(&mut self) {
        if !self.have_spectrum {
            return;
        }
        if self.skip_binary_data {
            self.spectrum.data_count = self.declared_data_count.unwrap_or(0);
            self.spectrum.status = RecordStatus::DataDefined;
        } else {
            let mz = self.pending_mz.take().unwrap_or_default();
            let intensity = self.pending_intensity.take().unwrap_or_default();
            self.spectrum.set_peaks(mz, intensity);
        }
        let mut spectrum = std::mem::take(&mut self.spectrum);
        spectrum.validate();
        if spectrum.ms_level <= 1 && !self.skip_binary_data {
            if self.survey_cache.len() == SURVEY_CACHE_CAPACITY {
                self.survey_cache.pop_front();
            }
            self.survey_cache.push_back(spectrum.clone());
        }
        self.found = Some(spectrum);
        self.have_spectrum = false;
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "True" | "TRUE")
}

impl SpectrumSaxHandler for MzDataSaxReader {
    fn start_element(
        &mut self,
        event: &BytesStart,
        context: &mut SaxContext,
    ) -> Result<(), XmlReaderError> {
        match event.name().as_ref() {
            b"mzData" => {
                self.file_info.version = attr_string(event, "version").unwrap_or_default();
                if !self.file_info.version.is_empty()
                    && !self.file_info.version.starts_with("1.")
                {
                    warn!(
                        "mzData version {} is not a 1.x release, continuing anyway",
                        self.file_info.version
                    );
                }
            }
            b"spectrumList" => {
                self.file_info.spectrum_count = attr_opt(event, "count");
            }
            b"spectrum" => self.begin_spectrum(event),
            b"acqSpecification" => self.handle_acq_specification(event),
            b"acquisition" => self.handle_acquisition(event),
            b"spectrumInstrument" => {
                self.section = CvSection::SpectrumInstrument;
                self.spectrum.ms_level = attr_as(event, "msLevel", 1);
                self.spectrum.mz_range_start = attr_as(event, "mzRangeStart", 0.0f64);
                self.spectrum.mz_range_end = attr_as(event, "mzRangeStop", 0.0f64);
                self.spectrum.instrument_mz_range_start = self.spectrum.mz_range_start;
                self.spectrum.instrument_mz_range_end = self.spectrum.mz_range_end;
            }
            b"precursor" => {
                self.spectrum.precursor_scan_number = attr_as(event, "spectrumRef", 0);
            }
            b"ionSelection" => {
                // Only the ionSelection of a precursor carries the parent
                // ion's cvParams
                if context.parent() == Some("precursor") {
                    self.section = CvSection::PrecursorIonSelection;
                }
            }
            b"activation" => {
                if context.parent() == Some("precursor") {
                    self.section = CvSection::PrecursorActivation;
                }
            }
            b"dataProcessing" | b"processingMethod" => {
                self.section = CvSection::DataProcessingMethod;
            }
            b"cvParam" => self.handle_cv_param(event),
            b"mzArrayBinary" => self.array_target = ArrayTarget::Mz,
            b"intenArrayBinary" => self.array_target = ArrayTarget::Intensity,
            b"data" => self.handle_data_start(event),
            _ => {}
        }
        Ok(())
    }

    fn end_element(
        &mut self,
        event: &BytesEnd,
        _context: &mut SaxContext,
    ) -> Result<(), XmlReaderError> {
        match event.name().as_ref() {
            b"data" => self.finish_data()?,
            b"mzArrayBinary" | b"intenArrayBinary" => {
                self.array_target = ArrayTarget::None;
            }
            b"spectrumInstrument" | b"ionSelection" | b"activation" | b"dataProcessing"
            | b"processingMethod" => {
                self.section = CvSection::None;
            }
            b"spectrum" => self.finish_spectrum(),
            _ => {}
        }
        Ok(())
    }

    fn text(
        &mut self,
        event: &BytesText,
        _context: &mut SaxContext,
    ) -> Result<(), XmlReaderError> {
        if self.capturing_data {
            if let Ok(content) = event.unescape() {
                self.text_buffer.push_str(&content);
            }
        }
        Ok(())
    }

    fn end_of_stream(&mut self, _context: &mut SaxContext) -> Result<(), XmlReaderError> {
        self.finish_spectrum();
        Ok(())
    }

    fn initialize_current_spectrum(&mut self) {
        self.spectrum.clear();
        self.have_spectrum = false;
        self.acquisitions_seen = 0;
        self.section = CvSection::None;
        self.array_target = ArrayTarget::None;
        self.declared_data_count = None;
        self.pending_mz = None;
        self.pending_intensity = None;
        self.capturing_data = false;
        self.text_buffer.clear();
    }

    fn current_spectrum(&self) -> &SpectrumRecord {
        &self.spectrum
    }

    fn take_spectrum(&mut self) -> Option<SpectrumRecord> {
        self.found.take()
    }

    fn set_skip_binary_data(&mut self, skip: bool) {
        self.skip_binary_data = skip;
    }

    fn file_version(&self) -> &str {
        &self.file_info.version
    }

    fn declared_scan_count(&self) -> Option<u64> {
        self.file_info.spectrum_count
    }
}

/// A forward-only streaming reader over an mzData document
pub type MzDataStreamReader = XmlSpectrumStream<MzDataSaxReader>;
