use std::fmt::Display;
use std::io;
use std::path::Path;

use crate::io::dta::DtaTextReader;
use crate::io::mgf::MgfReader;
use crate::io::xml::mzdata::MzDataSaxReader;
use crate::io::xml::mzxml::MzXmlSaxReader;
use crate::io::xml::XmlSpectrumStream;
use crate::io::SpectrumReaderOps;

/// The mass spectrometry file formats this crate reads
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsFileFormat {
    MzData,
    MzXml,
    Mgf,
    Dta,
    Unknown,
}

impl Display for MsFileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Infer the file format from its name, case-insensitively. Recognizes
/// the conventional extensions plus the `_mzXML.xml` / `_mzData.xml` and
/// `_dta.txt` suffix forms.
pub fn infer_from_name<P: AsRef<Path>>(path: P) -> MsFileFormat {
    let name = path
        .as_ref()
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    if name.ends_with(".mzxml") || name.ends_with("_mzxml.xml") {
        MsFileFormat::MzXml
    } else if name.ends_with(".mzdata") || name.ends_with("_mzdata.xml") {
        MsFileFormat::MzData
    } else if name.ends_with(".mgf") {
        MsFileFormat::Mgf
    } else if name.ends_with("_dta.txt") {
        MsFileFormat::Dta
    } else {
        MsFileFormat::Unknown
    }
}

/// Open a forward-only reader appropriate for the file at `path`.
/// Unrecognized names resolve to `Ok(None)` rather than an error.
pub fn open_reader<P: AsRef<Path>>(
    path: P,
) -> io::Result<Option<Box<dyn SpectrumReaderOps>>> {
    let path = path.as_ref();
    let reader: Box<dyn SpectrumReaderOps> = match infer_from_name(path) {
        MsFileFormat::MzXml => Box::new(XmlSpectrumStream::open_path(
            path,
            MzXmlSaxReader::default(),
        )?),
        MsFileFormat::MzData => Box::new(XmlSpectrumStream::open_path(
            path,
            MzDataSaxReader::default(),
        )?),
        MsFileFormat::Mgf => Box::new(MgfReader::open_path(path)?),
        MsFileFormat::Dta => Box::new(DtaTextReader::open_path(path)?),
        MsFileFormat::Unknown => return Ok(None),
    };
    Ok(Some(reader))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_infer_from_name() {
        assert_eq!(infer_from_name("run01.mzXML"), MsFileFormat::MzXml);
        assert_eq!(infer_from_name("run01.MZXML"), MsFileFormat::MzXml);
        assert_eq!(infer_from_name("run01_mzXML.xml"), MsFileFormat::MzXml);
        assert_eq!(infer_from_name("run01.mzData"), MsFileFormat::MzData);
        assert_eq!(infer_from_name("run01_mzData.xml"), MsFileFormat::MzData);
        assert_eq!(infer_from_name("search.mgf"), MsFileFormat::Mgf);
        assert_eq!(infer_from_name("Sample_dta.txt"), MsFileFormat::Dta);
        assert_eq!(infer_from_name("/data/sub/run01.mzxml"), MsFileFormat::MzXml);
        assert_eq!(infer_from_name("run01.mzML"), MsFileFormat::Unknown);
        assert_eq!(infer_from_name("notes.txt"), MsFileFormat::Unknown);
        assert_eq!(infer_from_name(""), MsFileFormat::Unknown);
    }

    #[test]
    fn test_open_reader_unknown_is_none() {
        assert!(open_reader("whatever.raw").unwrap().is_none());
    }

    #[test]
    fn test_boxed_reader_reads_and_closes() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("search.mgf");
        std::fs::write(
            &path,
            "BEGIN IONS\nPEPMASS=500.0\nCHARGE=2+\n100.0 1.0\nEND IONS\n\
             BEGIN IONS\nPEPMASS=600.0\n200.0 2.0\nEND IONS\n",
        )
        .unwrap();
        let mut reader = open_reader(&path).unwrap().expect("mgf reader");
        assert!(reader.read_next_spectrum().unwrap().is_some());
        reader.close();
        assert!(reader.read_next_spectrum().unwrap().is_none());
    }
}
