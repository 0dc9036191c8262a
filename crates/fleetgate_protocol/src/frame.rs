//! Request body decoding.
//!
//! Agents in the field compress sync bodies inconsistently: gzip, deflate
//! with a zlib wrapper, deflate without one, and sometimes compressed JSON
//! with no `Content-Encoding` header at all. [`FrameDecoder`] recovers the
//! original payload without assuming any single framing.
//!
//! Resolution order:
//! 1. No declared encoding, JSON content type, body starts with `{` or `[`:
//!    already plain.
//! 2. No declared encoding, JSON content type: try gzip, then raw deflate,
//!    else keep the body. Other content types are never sniffed.
//! 3. `gzip`: gzip or a hard error.
//! 4. `deflate`: zlib-wrapped, then raw deflate, or a hard error.
//! 5. Any other declared encoding passes through untouched.

use crate::error::{FrameError, FrameResult};
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::{Decompress, FlushDecompress, Status};
use std::io::{self, Read};

/// Default ceiling on a decompressed body (64 MiB).
pub const DEFAULT_MAX_DECODED_LEN: usize = 64 * 1024 * 1024;

/// How a body was framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Uncompressed structured text, detected by its first byte.
    Plain,
    /// gzip stream.
    Gzip,
    /// Deflate with the 2-byte zlib header and adler32 trailer.
    Zlib,
    /// Headerless deflate.
    RawDeflate,
    /// Nothing could be reversed; the original bytes are returned.
    Identity,
    /// A declared encoding this decoder does not handle.
    Unsupported,
}

/// A recovered request body.
#[derive(Debug, Clone)]
pub struct DecodedBody {
    /// The payload bytes.
    pub body: Bytes,
    /// The framing that was detected.
    pub framing: Framing,
}

impl DecodedBody {
    fn new(body: impl Into<Bytes>, framing: Framing) -> Self {
        Self {
            body: body.into(),
            framing,
        }
    }

    /// Returns true if the body was decompressed.
    pub fn was_compressed(&self) -> bool {
        matches!(
            self.framing,
            Framing::Gzip | Framing::Zlib | Framing::RawDeflate
        )
    }
}

/// Decodes agent request bodies.
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    max_decoded_len: usize,
}

impl FrameDecoder {
    /// Creates a decoder with the default size ceiling.
    pub const fn new() -> Self {
        Self {
            max_decoded_len: DEFAULT_MAX_DECODED_LEN,
        }
    }

    /// Sets the largest decompressed body this decoder will produce.
    pub const fn with_max_decoded_len(mut self, len: usize) -> Self {
        self.max_decoded_len = len;
        self
    }

    /// Returns the decompressed size ceiling.
    pub const fn max_decoded_len(&self) -> usize {
        self.max_decoded_len
    }

    /// Recovers the original payload of `body`.
    ///
    /// Only an explicitly declared `gzip` or `deflate` encoding that cannot
    /// be reversed is an error. Without a declaration the decoder never
    /// fails: undecodable input comes back unchanged so the caller can
    /// still attempt a best-effort parse.
    pub fn decode(
        &self,
        body: Bytes,
        declared_encoding: Option<&str>,
        content_type: &str,
    ) -> FrameResult<DecodedBody> {
        let encoding = declared_encoding
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_ascii_lowercase);

        match encoding.as_deref() {
            None => Ok(self.sniff(body, content_type)),
            Some("gzip") | Some("x-gzip") => self
                .gunzip(&body)
                .map(|out| DecodedBody::new(out, Framing::Gzip))
                .map_err(FrameError::Gzip),
            Some("deflate") => self.decode_declared_deflate(&body),
            Some(other) => {
                tracing::debug!(encoding = other, "passing through unsupported content encoding");
                Ok(DecodedBody::new(body, Framing::Unsupported))
            }
        }
    }

    fn sniff(&self, body: Bytes, content_type: &str) -> DecodedBody {
        if !is_structured_text(content_type) {
            return DecodedBody::new(body, Framing::Identity);
        }
        if matches!(body.first(), Some(b'{') | Some(b'[')) {
            return DecodedBody::new(body, Framing::Plain);
        }

        if let Some(out) = self.gunzip(&body).ok().filter(|out| !out.is_empty()) {
            tracing::debug!(from = body.len(), to = out.len(), "undeclared gzip body");
            return DecodedBody::new(out, Framing::Gzip);
        }

        if let Some(out) = self.inflate(&body, false).ok().filter(|out| !out.is_empty()) {
            tracing::debug!(from = body.len(), to = out.len(), "undeclared raw deflate body");
            return DecodedBody::new(out, Framing::RawDeflate);
        }

        DecodedBody::new(body, Framing::Identity)
    }

    fn decode_declared_deflate(&self, body: &[u8]) -> FrameResult<DecodedBody> {
        match self.inflate(body, true) {
            Ok(out) if !out.is_empty() => return Ok(DecodedBody::new(out, Framing::Zlib)),
            Ok(_) => tracing::debug!("zlib stream was empty, retrying as raw deflate"),
            Err(e) => tracing::debug!(error = %e, "zlib framing rejected, retrying as raw deflate"),
        }

        self.inflate(body, false)
            .map(|out| DecodedBody::new(out, Framing::RawDeflate))
            .map_err(FrameError::Deflate)
    }

    fn gunzip(&self, body: &[u8]) -> io::Result<Vec<u8>> {
        let limit = self.max_decoded_len as u64 + 1;
        let mut out = Vec::new();
        GzDecoder::new(body).take(limit).read_to_end(&mut out)?;
        self.check_len(out)
    }

    /// Inflates a complete deflate stream.
    ///
    /// The stream must reach its end marker and consume every input byte.
    /// A prefix that happens to parse as deflate is rejected.
    fn inflate(&self, body: &[u8], zlib_header: bool) -> io::Result<Vec<u8>> {
        let mut inflater = Decompress::new(zlib_header);
        let mut out = Vec::with_capacity(body.len().saturating_mul(4).clamp(64, 1 << 20));

        loop {
            if out.len() == out.capacity() {
                if out.len() > self.max_decoded_len {
                    return self.check_len(out);
                }
                let headroom = self.max_decoded_len.saturating_add(1) - out.len();
                out.reserve(out.capacity().min(headroom).max(64));
            }

            let consumed = inflater.total_in();
            let produced = inflater.total_out();
            let status = inflater
                .decompress_vec(&body[consumed as usize..], &mut out, FlushDecompress::None)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

            match status {
                Status::StreamEnd => {
                    if inflater.total_in() as usize != body.len() {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "trailing bytes after deflate stream",
                        ));
                    }
                    return self.check_len(out);
                }
                Status::Ok | Status::BufError => {
                    let stalled =
                        inflater.total_in() == consumed && inflater.total_out() == produced;
                    if stalled && out.len() < out.capacity() {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "truncated deflate stream",
                        ));
                    }
                }
            }
        }
    }

    fn check_len(&self, out: Vec<u8>) -> io::Result<Vec<u8>> {
        if out.len() > self.max_decoded_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("decoded body exceeds {} bytes", self.max_decoded_len),
            ));
        }
        Ok(out)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes with the default [`FrameDecoder`].
pub fn decode(
    body: Bytes,
    declared_encoding: Option<&str>,
    content_type: &str,
) -> FrameResult<DecodedBody> {
    FrameDecoder::new().decode(body, declared_encoding, content_type)
}

fn is_structured_text(content_type: &str) -> bool {
    content_type.to_ascii_lowercase().contains("json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use proptest::prelude::*;
    use std::io::Write;

    const JSON: &str = "application/json";
    const PAYLOAD: &[u8] = br#"{"serial_num":"C02XYZ","client_mode":"MONITOR"}"#;

    fn gzip(data: &[u8]) -> Bytes {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap().into()
    }

    fn zlib(data: &[u8]) -> Bytes {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap().into()
    }

    fn raw_deflate(data: &[u8]) -> Bytes {
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap().into()
    }

    #[test]
    fn plain_json_is_untouched() {
        let out = decode(Bytes::from_static(PAYLOAD), None, JSON).unwrap();
        assert_eq!(out.framing, Framing::Plain);
        assert_eq!(&out.body[..], PAYLOAD);
        assert!(!out.was_compressed());
    }

    #[test]
    fn undeclared_gzip() {
        let out = decode(gzip(PAYLOAD), None, JSON).unwrap();
        assert_eq!(out.framing, Framing::Gzip);
        assert_eq!(&out.body[..], PAYLOAD);
    }

    #[test]
    fn undeclared_raw_deflate() {
        let out = decode(raw_deflate(PAYLOAD), None, JSON).unwrap();
        assert_eq!(out.framing, Framing::RawDeflate);
        assert_eq!(&out.body[..], PAYLOAD);
    }

    #[test]
    fn undeclared_garbage_falls_back() {
        let garbage = Bytes::from_static(&[0xff, 0x00, 0x13, 0x37, 0x42]);
        let out = decode(garbage.clone(), None, JSON).unwrap();
        assert_eq!(out.framing, Framing::Identity);
        assert_eq!(out.body, garbage);
    }

    #[test]
    fn undeclared_form_body_is_not_inflated() {
        let form = Bytes::from_static(b"serial_num=C02XYZ&client_mode=1&os_version=14.4");
        let out = decode(form.clone(), None, "application/x-www-form-urlencoded").unwrap();
        assert_eq!(out.body, form);
    }

    #[test]
    fn empty_body_falls_back() {
        let out = decode(Bytes::new(), None, JSON).unwrap();
        assert_eq!(out.framing, Framing::Identity);
        assert!(out.body.is_empty());
    }

    #[test]
    fn declared_gzip() {
        let out = decode(gzip(PAYLOAD), Some("gzip"), JSON).unwrap();
        assert_eq!(out.framing, Framing::Gzip);
        assert_eq!(&out.body[..], PAYLOAD);
    }

    #[test]
    fn declared_gzip_failure_is_an_error() {
        let err = decode(Bytes::from_static(PAYLOAD), Some("gzip"), JSON).unwrap_err();
        assert!(matches!(err, FrameError::Gzip(_)));
    }

    #[test]
    fn declared_deflate_with_zlib_wrapper() {
        let out = decode(zlib(PAYLOAD), Some("deflate"), JSON).unwrap();
        assert_eq!(out.framing, Framing::Zlib);
        assert_eq!(&out.body[..], PAYLOAD);
    }

    #[test]
    fn declared_deflate_without_wrapper() {
        let out = decode(raw_deflate(PAYLOAD), Some("Deflate"), JSON).unwrap();
        assert_eq!(out.framing, Framing::RawDeflate);
        assert_eq!(&out.body[..], PAYLOAD);
    }

    #[test]
    fn declared_deflate_failure_is_an_error() {
        let err = decode(Bytes::from_static(b"not deflate"), Some("deflate"), JSON).unwrap_err();
        assert!(matches!(err, FrameError::Deflate(_)));
    }

    #[test]
    fn truncated_deflate_is_rejected() {
        let full = raw_deflate(PAYLOAD);
        let truncated = full.slice(..full.len() / 2);
        assert!(decode(truncated, Some("deflate"), JSON).is_err());
    }

    fn event_batch(count: usize) -> Vec<u8> {
        let events: Vec<_> = (0..count)
            .map(|i| {
                serde_json::json!({
                    "file_sha256": format!("{i:064x}"),
                    "file_path": "/Applications/Tool.app/Contents/MacOS/Tool",
                    "execution_time": 1_700_000_000 + i,
                    "decision": "BLOCK_UNKNOWN",
                })
            })
            .collect();
        serde_json::to_vec(&serde_json::json!({ "events": events })).unwrap()
    }

    #[test]
    fn highly_compressible_bodies_inflate() {
        let runs = format!(r#"{{"comment":"{}"}}"#, "a".repeat(5000)).into_bytes();
        for payload in [runs, event_batch(20)] {
            let cases = [
                (zlib(&payload), Some("deflate"), Framing::Zlib),
                (raw_deflate(&payload), Some("deflate"), Framing::RawDeflate),
                (raw_deflate(&payload), None, Framing::RawDeflate),
                (gzip(&payload), None, Framing::Gzip),
            ];
            for (body, encoding, framing) in cases {
                assert!(payload.len() > body.len() * 4);
                let out = decode(body, encoding, JSON).unwrap();
                assert_eq!(out.framing, framing);
                assert_eq!(&out.body[..], &payload[..]);
            }
        }
    }

    #[test]
    fn undeclared_zlib_is_left_alone() {
        let payload = event_batch(20);
        let body = zlib(&payload);
        let out = decode(body.clone(), None, JSON).unwrap();
        assert_eq!(out.framing, Framing::Identity);
        assert_eq!(out.body, body);
    }

    #[test]
    fn truncated_large_deflate_is_rejected() {
        let full = zlib(&event_batch(20));
        let truncated = full.slice(..full.len() - 8);
        assert!(decode(truncated.clone(), Some("deflate"), JSON).is_err());
        assert_eq!(decode(truncated, None, JSON).unwrap().framing, Framing::Identity);
    }

    #[test]
    fn undeclared_compression_outside_json_is_not_sniffed() {
        let body = gzip(PAYLOAD);
        let out = decode(body.clone(), None, "application/octet-stream").unwrap();
        assert_eq!(out.framing, Framing::Identity);
        assert_eq!(out.body, body);
        assert!(!out.was_compressed());
    }

    #[test]
    fn unsupported_encoding_passes_through() {
        let body = Bytes::from_static(b"\x28\xb5\x2f\xfd");
        let out = decode(body.clone(), Some("zstd"), JSON).unwrap();
        assert_eq!(out.framing, Framing::Unsupported);
        assert_eq!(out.body, body);
    }

    #[test]
    fn size_ceiling_applies() {
        let big = vec![b'a'; 4096];
        let decoder = FrameDecoder::new().with_max_decoded_len(1024);
        assert!(decoder.decode(gzip(&big), Some("gzip"), JSON).is_err());
        assert!(decoder.decode(zlib(&big), Some("deflate"), JSON).is_err());
        let out = decoder.decode(gzip(&big), None, JSON).unwrap();
        assert_eq!(out.framing, Framing::Identity);
    }

    proptest! {
        #[test]
        fn every_framing_recovers_the_payload(
            keys in prop::collection::vec("[a-z_]{1,12}", 1..8),
            value in "[ -~]{0,64}",
        ) {
            let object: serde_json::Map<String, serde_json::Value> = keys
                .into_iter()
                .map(|k| (k, serde_json::Value::String(value.clone())))
                .collect();
            let payload = serde_json::to_vec(&object).unwrap();

            let cases = [
                (Bytes::from(payload.clone()), None),
                (gzip(&payload), None),
                (gzip(&payload), Some("gzip")),
                (zlib(&payload), Some("deflate")),
                (raw_deflate(&payload), Some("deflate")),
                (raw_deflate(&payload), None),
            ];
            for (body, encoding) in cases {
                let out = decode(body, encoding, JSON).unwrap();
                prop_assert_eq!(&out.body[..], &payload[..]);
            }
        }
    }
}
