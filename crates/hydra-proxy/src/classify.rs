//! Upstream response classification
//!
//! Maps a response to "serve it" or "retry elsewhere, tagged". Different
//! providers answer the same query with different status codes (a block that
//! does not exist may be an HTTP 400 at one provider and a 200 carrying a
//! JSON-RPC error at another), so only statuses that indicate an unreliable
//! provider trigger a failover; everything else is inspected against the
//! configured exception rules and otherwise passed through.

use crate::rewrite;
use http::header::{self, HeaderMap};
use http::StatusCode;
use hydra_core::{Error, Exception, Result};
use std::borrow::Cow;

/// Map a status code to a retry tag, or `None` when the response may be
/// served (pending body inspection).
pub fn classify_status(status: StatusCode) -> Option<&'static str> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        Some("rate limited")
    } else if status.is_server_error() {
        Some("server error")
    } else if status >= StatusCode::PAYLOAD_TOO_LARGE {
        Some("request entity too large")
    } else if status >= StatusCode::FORBIDDEN {
        Some("access forbidden")
    } else {
        None
    }
}

/// Scan a response body against the ordered exception rules; the first match
/// wins. The body is decompressed first when the upstream answered with gzip
/// and the target is not configured for compression forwarding.
pub(crate) fn scan_exceptions<'a>(
    body: &[u8],
    headers: &HeaderMap,
    target_accepts_compression: bool,
    exceptions: &'a [Exception],
) -> Result<Option<&'a Exception>> {
    if exceptions.is_empty() {
        return Ok(None);
    }

    let text: Cow<'_, [u8]> = if is_gzip_response(headers) && !target_accepts_compression {
        Cow::Owned(
            rewrite::gunzip(body)
                .map_err(|e| Error::Upstream(format!("cannot read response body: {e}")))?,
        )
    } else {
        Cow::Borrowed(body)
    };

    let text = String::from_utf8_lossy(&text);

    Ok(exceptions
        .iter()
        .find(|exception| text.contains(&exception.pattern)))
}

fn is_gzip_response(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip"))
}
