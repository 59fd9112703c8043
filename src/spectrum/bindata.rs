use std::io::prelude::*;

use base64_simd;
use bytemuck;
use flate2::write::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use thiserror::Error;

pub type Bytes = Vec<u8>;

/// Byte order of an encoded peak payload. mzXML writes `byteOrder="network"`,
/// which is big-endian; mzData declares `endian="little"` or `endian="big"`
/// per array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Endian {
    #[default]
    Big,
    Little,
}

impl Endian {
    /// Interpret an mzXML `byteOrder` attribute value.
    pub fn from_byte_order(value: &str) -> Endian {
        if value.eq_ignore_ascii_case("network") {
            Endian::Big
        } else {
            Endian::Little
        }
    }

    /// Interpret an mzData `endian` attribute value.
    pub fn from_endian_name(value: &str) -> Endian {
        if value.eq_ignore_ascii_case("little") {
            Endian::Little
        } else {
            Endian::Big
        }
    }
}

/// The floating point widths peak payloads may be encoded with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeakPrecision {
    Float32,
    Float64,
}

impl PeakPrecision {
    pub const fn size_of(&self) -> usize {
        match self {
            PeakPrecision::Float32 => 4,
            PeakPrecision::Float64 => 8,
        }
    }

    /// Map a `precision="32|64"` attribute to a width, rejecting anything else.
    pub fn from_bits(bits: u32) -> Result<PeakPrecision, CodecError> {
        match bits {
            32 => Ok(PeakPrecision::Float32),
            64 => Ok(PeakPrecision::Float64),
            _ => Err(CodecError::UnsupportedPrecision(bits)),
        }
    }
}

/// The failure modes of decoding a base64-packed peak payload
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CodecError {
    #[error("Invalid base64 payload: {0}")]
    Base64(String),
    #[error("Failed to inflate zlib-compressed payload: {0}")]
    Inflate(String),
    #[error("Payload length {length} is not a multiple of the element size {element_size}")]
    UnalignedLength { length: usize, element_size: usize },
    #[error("Unsupported precision {0}, expected 32 or 64")]
    UnsupportedPrecision(u32),
}

/// A decoded peak payload, preserving the precision it was encoded with.
/// The caller decides how the values pair up; the codec does not.
#[derive(Debug, Clone, PartialEq)]
pub enum PeakValues {
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

impl PeakValues {
    pub fn len(&self) -> usize {
        match self {
            PeakValues::Float32(values) => values.len(),
            PeakValues::Float64(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Widen to `f64` regardless of the encoded precision
    pub fn into_f64(self) -> Vec<f64> {
        match self {
            PeakValues::Float32(values) => values.into_iter().map(f64::from).collect(),
            PeakValues::Float64(values) => values,
        }
    }
}

/// Decode a base64 payload into native-order floating point values.
///
/// Whitespace is stripped before base64 decoding. When `zlib_compressed`
/// is set the decoded bytes are treated as a zlib stream, header included,
/// and inflated before reinterpretation.
pub fn decode(
    text: &str,
    zlib_compressed: bool,
    endian: Endian,
    precision_bits: u32,
) -> Result<PeakValues, CodecError> {
    let precision = PeakPrecision::from_bits(precision_bits)?;
    let bytes = decode_bytes(text, zlib_compressed)?;
    match precision {
        PeakPrecision::Float32 => Ok(PeakValues::Float32(reinterpret_f32(&bytes, endian)?)),
        PeakPrecision::Float64 => Ok(PeakValues::Float64(reinterpret_f64(&bytes, endian)?)),
    }
}

/// Decode a base64 payload directly into an `f32` vector. The payload must
/// have been encoded at 32-bit precision.
pub fn decode_f32(
    text: &str,
    zlib_compressed: bool,
    endian: Endian,
) -> Result<Vec<f32>, CodecError> {
    reinterpret_f32(&decode_bytes(text, zlib_compressed)?, endian)
}

/// Decode a base64 payload directly into an `f64` vector. The payload must
/// have been encoded at 64-bit precision.
pub fn decode_f64(
    text: &str,
    zlib_compressed: bool,
    endian: Endian,
) -> Result<Vec<f64>, CodecError> {
    reinterpret_f64(&decode_bytes(text, zlib_compressed)?, endian)
}

/// Strip whitespace, decode the base64 text and, if requested, inflate
/// the resulting zlib stream
pub fn decode_bytes(text: &str, zlib_compressed: bool) -> Result<Bytes, CodecError> {
    let stripped: Vec<u8> = text
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if stripped.is_empty() {
        return Ok(Bytes::new());
    }
    let raw = base64_simd::STANDARD
        .decode_type::<Bytes>(&stripped)
        .map_err(|e| CodecError::Base64(e.to_string()))?;
    if zlib_compressed {
        inflate_zlib(&raw)
    } else {
        Ok(raw)
    }
}

fn inflate_zlib(data: &[u8]) -> Result<Bytes, CodecError> {
    let mut decompressor = ZlibDecoder::new(Bytes::new());
    decompressor
        .write_all(data)
        .map_err(|e| CodecError::Inflate(e.to_string()))?;
    decompressor
        .finish()
        .map_err(|e| CodecError::Inflate(e.to_string()))
}

fn deflate_zlib(data: &[u8]) -> Bytes {
    let mut compressor = ZlibEncoder::new(Bytes::new(), Compression::best());
    compressor.write_all(data).expect("Error compressing");
    compressor.finish().expect("Error compressing")
}

fn reinterpret_f32(bytes: &[u8], endian: Endian) -> Result<Vec<f32>, CodecError> {
    if bytes.len() % 4 != 0 {
        return Err(CodecError::UnalignedLength {
            length: bytes.len(),
            element_size: 4,
        });
    }
    if endian == Endian::Little && cfg!(target_endian = "little") {
        return Ok(bytemuck::pod_collect_to_vec(bytes));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| {
            let raw: [u8; 4] = chunk.try_into().unwrap();
            match endian {
                Endian::Big => f32::from_be_bytes(raw),
                Endian::Little => f32::from_le_bytes(raw),
            }
        })
        .collect())
}

fn reinterpret_f64(bytes: &[u8], endian: Endian) -> Result<Vec<f64>, CodecError> {
    if bytes.len() % 8 != 0 {
        return Err(CodecError::UnalignedLength {
            length: bytes.len(),
            element_size: 8,
        });
    }
    if endian == Endian::Little && cfg!(target_endian = "little") {
        return Ok(bytemuck::pod_collect_to_vec(bytes));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let raw: [u8; 8] = chunk.try_into().unwrap();
            match endian {
                Endian::Big => f64::from_be_bytes(raw),
                Endian::Little => f64::from_le_bytes(raw),
            }
        })
        .collect())
}

/// Encode raw bytes as base64, optionally compressing with zlib first
pub fn encode_bytes(data: &[u8], zlib_compress: bool) -> String {
    if zlib_compress {
        base64_simd::STANDARD.encode_type::<String>(&deflate_zlib(data))
    } else {
        base64_simd::STANDARD.encode_type::<String>(data)
    }
}

/// Serialize `f32` values with the requested byte order
pub fn f32_bytes(values: &[f32], endian: Endian) -> Bytes {
    match endian {
        Endian::Big => values.iter().flat_map(|v| v.to_be_bytes()).collect(),
        Endian::Little => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
    }
}

/// Serialize `f64` values with the requested byte order
pub fn f64_bytes(values: &[f64], endian: Endian) -> Bytes {
    match endian {
        Endian::Big => values.iter().flat_map(|v| v.to_be_bytes()).collect(),
        Endian::Little => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_precision_size() {
        assert_eq!(PeakPrecision::Float32.size_of(), 4);
        assert_eq!(PeakPrecision::Float64.size_of(), 8);
        assert!(matches!(
            PeakPrecision::from_bits(16),
            Err(CodecError::UnsupportedPrecision(16))
        ));
    }

    #[test]
    fn test_decode_f32_big_endian() {
        let values = [100.0f32, 50.0, 200.0, 75.0];
        let payload = encode_bytes(&f32_bytes(&values, Endian::Big), false);
        let decoded = decode(&payload, false, Endian::Big, 32).unwrap();
        assert_eq!(decoded, PeakValues::Float32(values.to_vec()));
    }

    #[test]
    fn test_decode_f64_little_endian() {
        let values = [500.0f64, 1000.0];
        let payload = encode_bytes(&f64_bytes(&values, Endian::Little), false);
        let decoded = decode_f64(&payload, false, Endian::Little).unwrap();
        assert_eq!(decoded, values.to_vec());
    }

    #[test]
    fn test_decode_zlib() {
        let values = [500.0f64, 1000.0, 1500.0, 2000.0];
        let payload = encode_bytes(&f64_bytes(&values, Endian::Big), true);
        let decoded = decode(&payload, true, Endian::Big, 64).unwrap();
        assert_eq!(decoded.into_f64(), values.to_vec());
    }

    #[test]
    fn test_decode_strips_whitespace() {
        let values = [1.5f32, 2.5, 10.0, 20.0];
        let mut payload = encode_bytes(&f32_bytes(&values, Endian::Little), false);
        payload.insert(4, '\n');
        payload.insert(9, ' ');
        let decoded = decode_f32(&payload, false, Endian::Little).unwrap();
        assert_eq!(decoded, values.to_vec());
    }

    #[test]
    fn test_decode_empty() {
        let decoded = decode("  \n ", false, Endian::Big, 32).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_decode_invalid_base64() {
        let err = decode("!!!not base64!!!", false, Endian::Big, 32).unwrap_err();
        assert!(matches!(err, CodecError::Base64(_)));
    }

    #[test]
    fn test_decode_unaligned() {
        // Five bytes cannot hold a whole number of f32 values
        let payload = encode_bytes(&[1, 2, 3, 4, 5], false);
        let err = decode(&payload, false, Endian::Big, 32).unwrap_err();
        assert_eq!(
            err,
            CodecError::UnalignedLength {
                length: 5,
                element_size: 4
            }
        );
    }

    #[test]
    fn test_decode_bad_zlib() {
        let payload = encode_bytes(&[0u8; 16], false);
        let err = decode(&payload, true, Endian::Big, 32).unwrap_err();
        assert!(matches!(err, CodecError::Inflate(_)));
    }

    #[test]
    fn test_roundtrip_preserves_payload() {
        let values = [100.0f32, 50.0, 200.0, 75.0];
        let payload = encode_bytes(&f32_bytes(&values, Endian::Big), false);
        let decoded = match decode(&payload, false, Endian::Big, 32).unwrap() {
            PeakValues::Float32(v) => v,
            _ => unreachable!(),
        };
        let reencoded = encode_bytes(&f32_bytes(&decoded, Endian::Big), false);
        assert_eq!(payload, reencoded);
    }
}
