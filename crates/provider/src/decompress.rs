//! Response body decompression.
//!
//! Supports gzip (declared or sniffed from magic bytes), deflate, Brotli,
//! and zstd. A post-inflate cap bounds zip-bomb amplification. Decode
//! failures are recovered locally: the caller forwards the original bytes
//! unchanged.

use conduit_core::error::ProxyError;
use std::io::Read;

/// Post-decompression size cap (50 MiB).
pub const MAX_INFLATED_BYTES: u64 = 50 * 1024 * 1024;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Decode `body` according to the `Content-Encoding` header value.
/// Returns the original bytes when the encoding is identity or unknown.
pub fn decode_body(encoding: Option<&str>, body: &[u8]) -> Result<Vec<u8>, ProxyError> {
    let declared = encoding.map(|e| e.trim().to_ascii_lowercase());
    match declared.as_deref() {
        Some("gzip") | Some("x-gzip") => gunzip(body),
        Some("deflate") => inflate(body),
        Some("br") => brotli_decode(body),
        Some("zstd") => zstd_decode(body),
        Some("identity") | None => {
            // Some upstreams compress without declaring it.
            if body.starts_with(&GZIP_MAGIC) {
                gunzip(body)
            } else if body.starts_with(&ZSTD_MAGIC) {
                zstd_decode(body)
            } else {
                Ok(body.to_vec())
            }
        }
        Some(other) => {
            tracing::debug!("unknown content-encoding {other}, forwarding as-is");
            Ok(body.to_vec())
        }
    }
}

fn read_capped(mut reader: impl Read, what: &str) -> Result<Vec<u8>, ProxyError> {
    let mut out = Vec::new();
    let mut limited = (&mut reader).take(MAX_INFLATED_BYTES + 1);
    limited
        .read_to_end(&mut out)
        .map_err(|e| ProxyError::Protocol(format!("{what} decode failed: {e}")))?;
    if out.len() as u64 > MAX_INFLATED_BYTES {
        return Err(ProxyError::Protocol(format!(
            "{what} body exceeds {MAX_INFLATED_BYTES} bytes after decompression"
        )));
    }
    Ok(out)
}

fn gunzip(body: &[u8]) -> Result<Vec<u8>, ProxyError> {
    read_capped(flate2::read::GzDecoder::new(body), "gzip")
}

fn inflate(body: &[u8]) -> Result<Vec<u8>, ProxyError> {
    // HTTP "deflate" is zlib-wrapped in practice; fall back to a raw
    // stream for servers that send bare deflate.
    read_capped(flate2::read::ZlibDecoder::new(body), "deflate")
        .or_else(|_| read_capped(flate2::read::DeflateDecoder::new(body), "deflate"))
}

fn brotli_decode(body: &[u8]) -> Result<Vec<u8>, ProxyError> {
    read_capped(brotli::Decompressor::new(body, 4096), "brotli")
}

fn zstd_decode(body: &[u8]) -> Result<Vec<u8>, ProxyError> {
    let decoder = zstd::stream::read::Decoder::new(body)
        .map_err(|e| ProxyError::Protocol(format!("zstd decode failed: {e}")))?;
    read_capped(decoder, "zstd")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn gzip_bytes(data: &[u8]) -> Vec<u8> {
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_gzip_declared() {
        let compressed = gzip_bytes(b"hello world");
        let out = decode_body(Some("gzip"), &compressed).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn test_gzip_sniffed() {
        let compressed = gzip_bytes(b"sniffed");
        let out = decode_body(None, &compressed).unwrap();
        assert_eq!(out, b"sniffed");
    }

    #[test]
    fn test_deflate() {
        let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(b"deflated").unwrap();
        let compressed = enc.finish().unwrap();
        assert_eq!(decode_body(Some("deflate"), &compressed).unwrap(), b"deflated");
    }

    #[test]
    fn test_zstd() {
        let compressed = zstd::stream::encode_all(&b"zstd body"[..], 0).unwrap();
        assert_eq!(decode_body(Some("zstd"), &compressed).unwrap(), b"zstd body");
    }

    #[test]
    fn test_brotli() {
        let mut compressed = Vec::new();
        {
            let mut writer = brotli::CompressorWriter::new(&mut compressed, 4096, 5, 22);
            writer.write_all(b"brotli body").unwrap();
        }
        assert_eq!(decode_body(Some("br"), &compressed).unwrap(), b"brotli body");
    }

    #[test]
    fn test_identity_passthrough() {
        assert_eq!(decode_body(None, b"plain").unwrap(), b"plain");
        assert_eq!(decode_body(Some("identity"), b"plain").unwrap(), b"plain");
    }

    #[test]
    fn test_unknown_encoding_passthrough() {
        assert_eq!(decode_body(Some("lz4"), b"raw").unwrap(), b"raw");
    }

    #[test]
    fn test_corrupt_gzip_is_error() {
        let err = decode_body(Some("gzip"), b"\x1f\x8bnot really gzip");
        assert!(err.is_err());
    }
}
