//! On-disk encoding of a single cache entry.
//!
//! An entry file is a 4-byte little-endian header length, a bincode-encoded
//! [`EntryHeader`], then the payload. The payload is the bincode-encoded
//! [`CacheEntry`], zlib-compressed when the header says so. The header
//! checksum covers the payload exactly as stored.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use kiln_common::ContentHash;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Magic bytes identifying a kiln cache entry.
const ENTRY_MAGIC: [u8; 4] = *b"KILN";

/// Current entry format version. Increment on breaking changes to
/// the header or payload format.
const ENTRY_FORMAT_VERSION: u32 = 1;

/// Header prepended to every entry for validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryHeader {
    /// Magic bytes: must be `b"KILN"`.
    pub magic: [u8; 4],

    /// Entry format version.
    pub format_version: u32,

    /// Whether the payload is zlib-compressed.
    pub compressed: bool,

    /// Checksum of the stored payload bytes.
    pub checksum: ContentHash,
}

/// The result of one successful compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Contents of the produced object file.
    pub object: Vec<u8>,
    /// What the compiler wrote to stdout.
    pub stdout: Vec<u8>,
    /// What the compiler wrote to stderr (warnings, notes).
    pub stderr: Vec<u8>,
}

/// Serializes an entry, compressing the payload at `level` when given.
pub fn encode_entry(entry: &CacheEntry, compression: Option<u32>) -> Result<Vec<u8>, CacheError> {
    let raw = bincode::serde::encode_to_vec(entry, bincode::config::standard()).map_err(|e| {
        CacheError::Serialization {
            reason: e.to_string(),
        }
    })?;

    let payload = match compression {
        Some(level) => {
            let compress_err = |e: std::io::Error| CacheError::Serialization {
                reason: format!("compression failed: {e}"),
            };
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
            encoder.write_all(&raw).map_err(compress_err)?;
            encoder.finish().map_err(compress_err)?
        }
        None => raw,
    };

    let header = EntryHeader {
        magic: ENTRY_MAGIC,
        format_version: ENTRY_FORMAT_VERSION,
        compressed: compression.is_some(),
        checksum: ContentHash::from_bytes(&payload),
    };
    let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
        .map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;

    let header_len = header_bytes.len() as u32;
    let mut output = Vec::with_capacity(4 + header_bytes.len() + payload.len());
    output.extend_from_slice(&header_len.to_le_bytes());
    output.extend_from_slice(&header_bytes);
    output.extend_from_slice(&payload);
    Ok(output)
}

/// Decodes an entry file, validating its header.
///
/// Returns `None` if the data is truncated, the magic or format version is
/// wrong, the checksum doesn't verify, or the payload doesn't decode.
pub fn decode_entry(raw: &[u8]) -> Option<CacheEntry> {
    if raw.len() < 4 {
        return None;
    }

    let header_len = u32::from_le_bytes(raw[..4].try_into().ok()?) as usize;
    if raw.len() < 4 + header_len {
        return None;
    }

    let header: EntryHeader =
        bincode::serde::decode_from_slice(&raw[4..4 + header_len], bincode::config::standard())
            .ok()?
            .0;

    if header.magic != ENTRY_MAGIC || header.format_version != ENTRY_FORMAT_VERSION {
        return None;
    }

    let payload = &raw[4 + header_len..];
    if ContentHash::from_bytes(payload) != header.checksum {
        return None;
    }

    let decoded;
    let bytes = if header.compressed {
        let mut out = Vec::new();
        ZlibDecoder::new(payload).read_to_end(&mut out).ok()?;
        decoded = out;
        decoded.as_slice()
    } else {
        payload
    };

    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .ok()
        .map(|(entry, _)| entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CacheEntry {
        CacheEntry {
            object: (0..4096).map(|i| (i % 251) as u8).collect(),
            stdout: Vec::new(),
            stderr: b"main.c:3:5: warning: unused variable 'x'\n".to_vec(),
        }
    }

    fn with_header(header: &EntryHeader, payload: &[u8]) -> Vec<u8> {
        let header_bytes =
            bincode::serde::encode_to_vec(header, bincode::config::standard()).unwrap();
        let mut output = Vec::new();
        output.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(payload);
        output
    }

    #[test]
    fn uncompressed_decodes() {
        let entry = sample();
        let bytes = encode_entry(&entry, None).unwrap();
        assert_eq!(decode_entry(&bytes), Some(entry));
    }

    #[test]
    fn compressed_decodes_and_is_smaller() {
        let entry = CacheEntry {
            object: vec![0u8; 64 * 1024],
            stdout: Vec::new(),
            stderr: Vec::new(),
        };
        let plain = encode_entry(&entry, None).unwrap();
        let packed = encode_entry(&entry, Some(6)).unwrap();
        assert!(packed.len() < plain.len());
        assert_eq!(decode_entry(&packed), Some(entry));
    }

    #[test]
    fn truncated_header_is_miss() {
        assert!(decode_entry(b"AB").is_none());
    }

    #[test]
    fn garbage_is_miss() {
        assert!(decode_entry(b"garbage data that is not an entry").is_none());
    }

    #[test]
    fn wrong_magic_is_miss() {
        let payload = b"payload";
        let header = EntryHeader {
            magic: *b"BAAD",
            format_version: ENTRY_FORMAT_VERSION,
            compressed: false,
            checksum: ContentHash::from_bytes(payload),
        };
        assert!(decode_entry(&with_header(&header, payload)).is_none());
    }

    #[test]
    fn wrong_version_is_miss() {
        let bytes = encode_entry(&sample(), None).unwrap();
        let header_len = u32::from_le_bytes(bytes[..4].try_into().unwrap()) as usize;
        let payload = &bytes[4 + header_len..];
        let header = EntryHeader {
            magic: ENTRY_MAGIC,
            format_version: 999,
            compressed: false,
            checksum: ContentHash::from_bytes(payload),
        };
        assert!(decode_entry(&with_header(&header, payload)).is_none());
    }

    #[test]
    fn tampered_payload_is_miss() {
        let mut bytes = encode_entry(&sample(), Some(1)).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(decode_entry(&bytes).is_none());
    }

    #[test]
    fn torn_write_is_miss() {
        let bytes = encode_entry(&sample(), None).unwrap();
        assert!(decode_entry(&bytes[..bytes.len() / 2]).is_none());
    }
}
