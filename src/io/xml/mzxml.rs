use log::{debug, warn};
use quick_xml::events::{BytesEnd, BytesStart, BytesText};
use regex::Regex;

use crate::spectrum::bindata::{self, Endian, PeakValues};
use crate::spectrum::{Polarity, RecordStatus, SpectrumRecord};

use super::{
    attr_as, attr_bool, attr_opt, attr_string, attr_time_minutes, SaxContext,
    SpectrumSaxHandler, XmlReaderError, XmlSpectrumStream,
};

/// Options controlling mzXML parsing behavior
#[derive(Debug, Clone)]
pub struct MzXmlReaderOptions {
    /// Keep going when the root element's version string is not a
    /// recognized mzXML 2.x or 3.x namespace
    pub parse_files_with_unknown_version: bool,
    /// Correct `msRun` start/end times that legacy converters recorded in
    /// seconds while labeling them as `PT...S` durations
    pub fix_mislabeled_times: bool,
}

impl Default for MzXmlReaderOptions {
    fn default() -> MzXmlReaderOptions {
        MzXmlReaderOptions {
            parse_files_with_unknown_version: false,
            fix_mislabeled_times: true,
        }
    }
}

/// File-level facts gathered from the mzXML header elements
#[derive(Debug, Default, Clone)]
pub struct MzXmlFileInfo {
    pub version: String,
    pub scan_count: Option<u64>,
    pub start_time_min: f64,
    pub end_time_min: f64,
    /// `dataProcessing centroided="1"`, applied as the default for scans
    /// that do not carry their own attribute
    pub centroided: bool,
}

/// The order peak pairs are interleaved in within a `<peaks>` payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum PairOrder {
    #[default]
    MzIntensity,
    IntensityMz,
}

impl PairOrder {
    fn from_name(value: &str) -> PairOrder {
        if value.trim().starts_with("intensity") {
            PairOrder::IntensityMz
        } else {
            PairOrder::MzIntensity
        }
    }
}

#[derive(Debug, Default, Clone)]
struct PeaksAttributes {
    precision_bits: u32,
    endian: Endian,
    pair_order: PairOrder,
    zlib: bool,
    compressed_len: Option<usize>,
}

/// Which element's character content is being captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum TextCapture {
    #[default]
    None,
    Peaks,
    PrecursorMz,
}

/**
The mzXML dialect handler: a state machine over `mzXML` documents that
populates one [`SpectrumRecord`] per `<scan>` element, decoding the
base64-packed `<peaks>` payload.

Scan elements may nest. A nested `<scan>` arriving while the outer one
already carries peak data finalizes the outer spectrum first and asks
the driver to replay the start element.
*/
pub struct MzXmlSaxReader {
    options: MzXmlReaderOptions,
    version_pattern: Regex,
    spectrum: SpectrumRecord,
    found: Option<SpectrumRecord>,
    file_info: MzXmlFileInfo,
    scan_depth: i32,
    scan_open: bool,
    peaks: PeaksAttributes,
    declared_peaks_count: usize,
    capture: TextCapture,
    text_buffer: String,
    skip_binary_data: bool,
}

impl Default for MzXmlSaxReader {
    fn default() -> MzXmlSaxReader {
        MzXmlSaxReader::new(MzXmlReaderOptions::default())
    }
}

impl MzXmlSaxReader {
    pub fn new(options: MzXmlReaderOptions) -> MzXmlSaxReader {
        MzXmlSaxReader {
            options,
            version_pattern: Regex::new(r#"mzXML_[^\s"/]+"#).unwrap(),
            spectrum: SpectrumRecord::new(),
            found: None,
            file_info: MzXmlFileInfo::default(),
            scan_depth: 0,
            scan_open: false,
            peaks: PeaksAttributes::default(),
            declared_peaks_count: 0,
            capture: TextCapture::None,
            text_buffer: String::new(),
            skip_binary_data: false,
        }
    }

    pub fn file_info(&self) -> &MzXmlFileInfo {
        &self.file_info
    }

    fn handle_root(&mut self, event: &BytesStart) -> Result<(), XmlReaderError> {
        let mut declared = String::new();
        if let Some(ns) = attr_string(event, "xmlns") {
            declared.push_str(&ns);
        }
        if let Some(location) = attr_string(event, "xsi:schemaLocation") {
            declared.push(' ');
            declared.push_str(&location);
        }
        match self.version_pattern.find(&declared) {
            Some(matched) => {
                self.file_info.version = matched.as_str().to_string();
                let supported = self.file_info.version.contains("mzXML_2")
                    || self.file_info.version.contains("mzXML_3");
                if !supported {
                    if self.options.parse_files_with_unknown_version {
                        warn!(
                            "Unrecognized mzXML version {}, parsing anyway",
                            self.file_info.version
                        );
                    } else {
                        return Err(XmlReaderError::UnsupportedVersion(
                            self.file_info.version.clone(),
                        ));
                    }
                }
            }
            None => {
                if self.options.parse_files_with_unknown_version {
                    warn!("mzXML root carries no recognizable version, parsing anyway");
                } else {
                    return Err(XmlReaderError::UnsupportedVersion(
                        "no mzXML version declared".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn handle_ms_run(&mut self, event: &BytesStart) {
        self.file_info.scan_count = attr_opt::<u64>(event, "scanCount");
        let start = attr_time_minutes(event, "startTime");
        let end = attr_time_minutes(event, "endTime");
        self.file_info.start_time_min = start.unwrap_or_default();
        self.file_info.end_time_min = end.unwrap_or_default();
        if !self.options.fix_mislabeled_times {
            return;
        }
        // ReAdW-era converters wrote minute values but labeled them PT...S,
        // so the parsed times come out 60x too small. An average scan
        // interval under 0.1 seconds gives them away.
        if let Some(count) = self.file_info.scan_count {
            if count > 0 && self.file_info.end_time_min > self.file_info.start_time_min {
                let interval_sec = (self.file_info.end_time_min - self.file_info.start_time_min)
                    / count as f64
                    * 60.0;
                if interval_sec < 0.1 {
                    debug!(
                        "msRun start/end times look mislabeled as seconds ({}s per scan), rescaling",
                        interval_sec
                    );
                    self.file_info.start_time_min *= 60.0;
                    self.file_info.end_time_min *= 60.0;
                }
            }
        }
    }

    fn handle_scan_start(
        &mut self,
        event: &BytesStart,
        context: &mut SaxContext,
    ) -> Result<(), XmlReaderError> {
        if self.scan_depth > 0 && self.spectrum.status != RecordStatus::Initialized {
            // A nested scan opened while the outer one already carries
            // data: emit the outer spectrum and revisit this element
            let mut outer = std::mem::take(&mut self.spectrum);
            outer.validate();
            self.found = Some(outer);
            self.scan_open = false;
            context.request_replay(event);
            return Ok(());
        }
        self.spectrum.clear();
        self.scan_open = true;
        match attr_opt::<i32>(event, "num") {
            Some(num) => self.spectrum.scan_number = num,
            None => {
                self.spectrum.scan_number = 0;
                warn!("scan element is missing its num attribute, defaulting to 0");
            }
        }
        self.spectrum.ms_level = attr_as(event, "msLevel", 1);
        self.declared_peaks_count = attr_as::<usize>(event, "peaksCount", 0);
        self.spectrum.end_scan_number = attr_opt(event, "endScanNum");
        if let Some(polarity) = attr_string(event, "polarity") {
            self.spectrum.polarity = Polarity::from_symbol(&polarity);
        }
        if let Some(rt) = attr_time_minutes(event, "retentionTime") {
            self.spectrum.retention_time_min = rt as f32;
        }
        self.spectrum.collision_energy = attr_as(event, "collisionEnergy", 0.0f32);
        self.spectrum.instrument_mz_range_start = attr_as(event, "startMz", 0.0f64);
        self.spectrum.instrument_mz_range_end = attr_as(event, "endMz", 0.0f64);
        self.spectrum.mz_range_start = attr_as(event, "lowMz", 0.0f64);
        self.spectrum.mz_range_end = attr_as(event, "highMz", 0.0f64);
        self.spectrum.base_peak_mz = attr_as(event, "basePeakMz", 0.0f64);
        self.spectrum.base_peak_intensity = attr_as(event, "basePeakIntensity", 0.0f32);
        self.spectrum.total_ion_current = attr_as(event, "totIonCurrent", 0.0f64);
        self.spectrum.filter_line = attr_string(event, "filterLine").unwrap_or_default();
        self.spectrum.scan_type = attr_string(event, "scanType").unwrap_or_default();
        self.spectrum.centroided = attr_bool(event, "centroided", self.file_info.centroided);
        self.scan_depth += 1;
        Ok(())
    }

    fn handle_precursor_start(&mut self, event: &BytesStart) {
        self.spectrum.parent_ion_intensity = attr_as(event, "precursorIntensity", 0.0f32);
        self.spectrum.parent_ion_charge = attr_as(event, "precursorCharge", 0);
        self.spectrum.precursor_scan_number = attr_as(event, "precursorScanNum", 0);
        self.spectrum.isolation_window_width = attr_as(event, "windowWideness", 0.0f32);
        if let Some(method) = attr_string(event, "activationMethod") {
            self.spectrum.activation_method = method;
        }
        self.capture = TextCapture::PrecursorMz;
        self.text_buffer.clear();
    }

    fn handle_peaks_start(&mut self, event: &BytesStart) {
        self.peaks = PeaksAttributes {
            precision_bits: attr_as(event, "precision", 32u32),
            endian: Endian::from_byte_order(
                attr_string(event, "byteOrder").as_deref().unwrap_or("network"),
            ),
            pair_order: PairOrder::from_name(
                attr_string(event, "pairOrder")
                    .or_else(|| attr_string(event, "contentType"))
                    .as_deref()
                    .unwrap_or("m/z-int"),
            ),
            zlib: attr_string(event, "compressionType")
                .map(|c| c.trim().eq_ignore_ascii_case("zlib"))
                .unwrap_or(false),
            compressed_len: attr_opt(event, "compressedLen"),
        };
        self.capture = TextCapture::Peaks;
        self.text_buffer.clear();
    }

    fn decode_peaks(&mut self) -> Result<(), XmlReaderError> {
        if self.skip_binary_data {
            self.spectrum.data_count = self.declared_peaks_count;
            self.spectrum.status = RecordStatus::DataDefined;
            return Ok(());
        }
        let decoded = bindata::decode(
            &self.text_buffer,
            self.peaks.zlib,
            self.peaks.endian,
            self.peaks.precision_bits,
        )?;
        let values = match decoded {
            PeakValues::Float32(values) => values.into_iter().map(f64::from).collect(),
            PeakValues::Float64(values) => values,
        };
        if values.len() % 2 != 0 {
            warn!(
                "peaks payload for scan {} holds {} values, not a whole number of pairs",
                self.spectrum.scan_number,
                values.len()
            );
        }
        let mut mz: Vec<f64> = Vec::with_capacity(values.len() / 2);
        let mut intensity: Vec<f32> = Vec::with_capacity(values.len() / 2);
        for pair in values.chunks_exact(2) {
            match self.peaks.pair_order {
                PairOrder::MzIntensity => {
                    mz.push(pair[0]);
                    intensity.push(pair[1] as f32);
                }
                PairOrder::IntensityMz => {
                    mz.push(pair[1]);
                    intensity.push(pair[0] as f32);
                }
            }
        }
        let declared = self.declared_peaks_count;
        if declared == 0 && mz.len() == 1 && mz[0] == 0.0 && intensity[0] == 0.0 {
            // A single all-zero pair marks an intentionally empty scan
            mz.clear();
            intensity.clear();
        }
        if mz.len() == declared + 1
            && mz.last() == Some(&0.0)
            && intensity.last() == Some(&0.0)
        {
            mz.pop();
            intensity.pop();
        }
        if mz.len() != declared {
            warn!(
                "scan {} declares {} peaks but its payload decodes to {}, keeping the decoded count",
                self.spectrum.scan_number,
                declared,
                mz.len()
            );
        }
        self.spectrum.set_peaks(mz, intensity);
        Ok(())
    }

    fn finish_scan(&mut self) {
        if self.scan_open && self.spectrum.status != RecordStatus::Initialized {
            let mut spectrum = std::mem::take(&mut self.spectrum);
            spectrum.validate();
            self.found = Some(spectrum);
        }
        self.scan_open = false;
        self.scan_depth -= 1;
        if self.scan_depth < 0 {
            warn!("scan element nesting underflow, clamping depth at 0");
            self.scan_depth = 0;
        }
    }
}

impl SpectrumSaxHandler for MzXmlSaxReader {
    fn start_element(
        &mut self,
        event: &BytesStart,
        context: &mut SaxContext,
    ) -> Result<(), XmlReaderError> {
        match event.name().as_ref() {
            b"mzXML" => self.handle_root(event)?,
            b"msRun" => self.handle_ms_run(event),
            b"dataProcessing" => {
                self.file_info.centroided = attr_bool(event, "centroided", false);
            }
            b"scan" => self.handle_scan_start(event, context)?,
            b"precursorMz" => self.handle_precursor_start(event),
            b"peaks" => self.handle_peaks_start(event),
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
            b"precursorMz" => {
                if let Ok(mz) = self.text_buffer.trim().parse::<f64>() {
                    self.spectrum.parent_ion_mz = mz;
                }
                self.capture = TextCapture::None;
                self.text_buffer.clear();
            }
            b"peaks" => {
                self.decode_peaks()?;
                self.capture = TextCapture::None;
                self.text_buffer.clear();
            }
            b"scan" => self.finish_scan(),
            _ => {}
        }
        Ok(())
    }

    fn text(
        &mut self,
        event: &BytesText,
        _context: &mut SaxContext,
    ) -> Result<(), XmlReaderError> {
        if self.capture != TextCapture::None {
            if let Ok(content) = event.unescape() {
                self.text_buffer.push_str(&content);
            }
        }
        Ok(())
    }

    fn end_of_stream(&mut self, _context: &mut SaxContext) -> Result<(), XmlReaderError> {
        // A random-access range stops at </peaks>, leaving the scan open
        if self.scan_open && self.spectrum.status != RecordStatus::Initialized {
            let mut spectrum = std::mem::take(&mut self.spectrum);
            spectrum.validate();
            self.found = Some(spectrum);
            self.scan_open = false;
            self.scan_depth = 0;
        }
        Ok(())
    }

    fn initialize_current_spectrum(&mut self) {
        self.spectrum.clear();
        self.scan_open = false;
        self.scan_depth = 0;
        self.capture = TextCapture::None;
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
        self.file_info.scan_count
    }
}

/// A forward-only streaming reader over an mzXML document
pub type MzXmlStreamReader = XmlSpectrumStream<MzXmlSaxReader>;
