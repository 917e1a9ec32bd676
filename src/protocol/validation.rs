//! Validation of connection arguments.
//!
//! Everything here runs synchronously at construction time, before any
//! transport call is made:
//! - URL scheme must be `ws` or `wss`, with no fragment
//! - Subprotocols must be HTTP tokens (RFC 7230 Section 3.2.6), unique
//!   under case-insensitive comparison
//! - Header names must be tokens, values must not contain CR, LF or NUL

use url::Url;

use crate::error::{Error, Result};

/// Returns `true` if `b` is a `tchar` per RFC 7230 Section 3.2.6.
#[inline]
const fn is_tchar(b: u8) -> bool {
    matches!(
        b,
        b'!' | b'#'
            | b'$'
            | b'%'
            | b'&'
            | b'\''
            | b'*'
            | b'+'
            | b'-'
            | b'.'
            | b'^'
            | b'_'
            | b'`'
            | b'|'
            | b'~'
    ) || b.is_ascii_alphanumeric()
}

/// Check whether `s` matches the HTTP `token` grammar (`1*tchar`).
#[must_use]
pub fn is_token(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(is_tchar)
}

/// Parse and check a WebSocket URL.
///
/// The returned URL is normalized by the parser (lowercase scheme and host,
/// default path `/`).
///
/// # Errors
///
/// - [`Error::InvalidUrl`] if the string is not a URL
/// - [`Error::InvalidScheme`] if the scheme is not `ws` or `wss`
/// - [`Error::UrlFragment`] if the URL has a fragment (even an empty one)
pub fn validate_url(input: &str) -> Result<Url> {
    let url = Url::parse(input)?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => return Err(Error::InvalidScheme(other.to_string())),
    }

    if url.fragment().is_some() {
        return Err(Error::UrlFragment(input.to_string()));
    }

    Ok(url)
}

/// Check a subprotocol list.
///
/// # Errors
///
/// - [`Error::InvalidSubprotocol`] if an entry is not a token
/// - [`Error::DuplicateSubprotocol`] if two entries are equal ignoring ASCII case
pub fn validate_protocols(protocols: &[String]) -> Result<()> {
    for (i, protocol) in protocols.iter().enumerate() {
        if !is_token(protocol) {
            return Err(Error::InvalidSubprotocol(protocol.clone()));
        }
        if protocols[..i]
            .iter()
            .any(|earlier| earlier.eq_ignore_ascii_case(protocol))
        {
            return Err(Error::DuplicateSubprotocol(protocol.clone()));
        }
    }
    Ok(())
}

/// Check a single request header.
///
/// # Errors
///
/// Returns [`Error::InvalidHeader`] if the name is not a token or the value
/// contains CR, LF or NUL.
pub fn validate_header(name: &str, value: &str) -> Result<()> {
    if !is_token(name) {
        return Err(Error::InvalidHeader {
            header: name.to_string(),
            reason: "name is not a valid token".to_string(),
        });
    }
    if value.contains(['\r', '\n', '\0']) {
        return Err(Error::InvalidHeader {
            header: name.to_string(),
            reason: "contains CR, LF or NUL characters".to_string(),
        });
    }
    Ok(())
}
