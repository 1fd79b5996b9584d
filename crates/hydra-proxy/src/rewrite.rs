//! Request rewriting: body capture and compression mediation
//!
//! The inbound body is read fully before the first upstream attempt, which
//! makes retries trivially replayable: every attempt builds a fresh body from
//! the same buffer, so all upstreams observe byte-identical payloads.

use bytes::Bytes;
use flate2::read::GzDecoder;
use http::header::{self, HeaderMap, HeaderName};
use hydra_core::{Error, Result};
use std::io::Read;

/// Hop-by-hop headers that must never be forwarded by a proxy.
const HOP_BY_HOP: &[HeaderName] = &[
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// The captured request body, in both the form the client sent it and (when
/// the client compressed it) decompressed form. Which one an attempt uses
/// depends on the selected target's `compression` flag.
#[derive(Debug, Clone)]
pub struct ReplayableBody {
    raw: Bytes,
    decompressed: Option<Bytes>,
}

impl ReplayableBody {
    /// Capture the client body. An empty or unknown-length body is rejected
    /// here, before any provider is contacted; a gzip body that fails to
    /// decode likewise. Both are client errors, not reasons to fail over.
    pub fn capture(headers: &HeaderMap, raw: Bytes) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::InvalidRequest(
                "empty or unknown-length body".into(),
            ));
        }

        let decompressed = if is_gzip(headers) {
            Some(Bytes::from(gunzip(&raw)?))
        } else {
            None
        };

        Ok(Self { raw, decompressed })
    }

    /// The bytes to send to a target, plus whether the `Content-Encoding`
    /// header must be stripped because the payload was decompressed.
    pub fn for_target(&self, target_accepts_compression: bool) -> (Bytes, bool) {
        match &self.decompressed {
            Some(decompressed) if !target_accepts_compression => (decompressed.clone(), true),
            _ => (self.raw.clone(), false),
        }
    }

}

/// Whether the client declared a gzip-compressed body.
pub(crate) fn is_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip"))
}

/// Decompress a gzip payload.
pub(crate) fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::InvalidRequest(format!("cannot gunzip data: {e}")))?;
    Ok(out)
}

/// Build the header map for an upstream attempt: drop hop-by-hop headers,
/// `Host` (the client's host is meaningless at the target) and
/// `Content-Length` (recomputed from the actual body), and drop
/// `Content-Encoding` when the body was decompressed.
pub(crate) fn upstream_headers(headers: &HeaderMap, strip_encoding: bool) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());

    for (name, value) in headers {
        if HOP_BY_HOP.contains(name)
            || name == header::HOST
            || name == header::CONTENT_LENGTH
            || (strip_encoding && name == header::CONTENT_ENCODING)
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }

    out
}

/// Build the header map returned to the client: everything the upstream sent
/// minus hop-by-hop headers and the framing headers hyper recomputes.
pub(crate) fn client_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());

    for (name, value) in headers {
        if HOP_BY_HOP.contains(name) || name == header::CONTENT_LENGTH {
            continue;
        }
        out.append(name.clone(), value.clone());
    }

    out
}

/// Compress a payload with gzip. Test helper shared across the crate.
#[cfg(test)]
pub(crate) fn gzip(data: &[u8]) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}
