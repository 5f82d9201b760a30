//! Cookie header injection for outgoing requests
//!
//! Requests are opaque byte buffers owned by the platform; the only edit we
//! are allowed is the `Cookie:` header line. Everything outside that line
//! must survive byte for byte.

use thiserror::Error;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const CRLF: &[u8] = b"\r\n";

/// A fully formed `Cookie: <value>` header line, built once from the
/// command-line cookie string.
#[derive(Debug, Clone)]
pub struct CookieHeader(String);

impl CookieHeader {
    pub fn new(value: &str) -> Self {
        CookieHeader(format!("Cookie: {value}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Error)]
pub enum InjectError {
    #[error("request has no header/body separator")]
    NoHeaderTerminator,
}

/// Replace or insert the cookie line in a raw HTTP request.
///
/// An existing `Cookie:` header (matched case-insensitively) is replaced
/// wholesale; otherwise the line is inserted immediately before the blank
/// line separating headers from body. No other byte changes.
pub fn inject(request: &[u8], cookie: &CookieHeader) -> Result<Vec<u8>, InjectError> {
    let sep = find(request, HEADER_TERMINATOR).ok_or(InjectError::NoHeaderTerminator)?;
    let headers = &request[..sep];

    if let Some((start, end)) = find_cookie_line(headers) {
        let mut out = Vec::with_capacity(request.len() + cookie.as_str().len());
        out.extend_from_slice(&request[..start]);
        out.extend_from_slice(cookie.as_str().as_bytes());
        out.extend_from_slice(&request[end..]);
        return Ok(out);
    }

    // No existing header: insert after the final header line's CRLF,
    // right before the empty line.
    let insert_at = sep + CRLF.len();
    let mut out = Vec::with_capacity(request.len() + cookie.as_str().len() + CRLF.len());
    out.extend_from_slice(&request[..insert_at]);
    out.extend_from_slice(cookie.as_str().as_bytes());
    out.extend_from_slice(CRLF);
    out.extend_from_slice(&request[insert_at..]);
    Ok(out)
}

/// Byte offsets of an existing `Cookie:` header line within the header
/// block, excluding its CRLF terminator. The request line can never match:
/// a method token cannot contain `:`.
fn find_cookie_line(headers: &[u8]) -> Option<(usize, usize)> {
    let mut line_start = 0;
    loop {
        let line_end = find(&headers[line_start..], CRLF)
            .map(|i| line_start + i)
            .unwrap_or(headers.len());
        let line = &headers[line_start..line_end];
        if line.len() >= 7 && line[..7].eq_ignore_ascii_case(b"cookie:") {
            return Some((line_start, line_end));
        }
        if line_end == headers.len() {
            return None;
        }
        line_start = line_end + CRLF.len();
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
