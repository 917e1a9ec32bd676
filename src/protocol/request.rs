//! Validated connection request.

use url::Url;

use crate::error::Result;
use crate::protocol::validation::{validate_header, validate_protocols, validate_url};

/// A connection request that has passed validation.
///
/// Constructing one is the only way to reach the transport provider, so an
/// invalid URL, subprotocol list or header never causes a transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    url: Url,
    protocols: Vec<String>,
    headers: Vec<(String, String)>,
}

impl ConnectRequest {
    /// Validate a URL and subprotocol list.
    ///
    /// # Example
    ///
    /// ```
    /// use wsengine::ConnectRequest;
    ///
    /// let request = ConnectRequest::new("wss://example.com/chat", ["chat"]).unwrap();
    /// assert_eq!(request.url(), "wss://example.com/chat");
    /// assert!(ConnectRequest::new("ws://example.com", ["chat", "CHAT"]).is_err());
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `Syntax`-kind [`Error`](crate::Error) for a non-`ws`/`wss`
    /// scheme, a fragment, an invalid or duplicate subprotocol.
    pub fn new<I, P>(url: &str, protocols: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let url = validate_url(url)?;
        let protocols: Vec<String> = protocols.into_iter().map(Into::into).collect();
        validate_protocols(&protocols)?;

        Ok(Self {
            url,
            protocols,
            headers: Vec::new(),
        })
    }

    /// Add a request header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHeader`](crate::Error::InvalidHeader) for a
    /// non-token name or a value containing CR, LF or NUL.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let value = value.into();
        validate_header(&name, &value)?;
        self.headers.push((name, value));
        Ok(self)
    }

    /// Add multiple request headers.
    ///
    /// # Errors
    ///
    /// Fails on the first invalid header, see [`ConnectRequest::header`].
    pub fn headers<N, V>(self, headers: impl IntoIterator<Item = (N, V)>) -> Result<Self>
    where
        N: Into<String>,
        V: Into<String>,
    {
        headers
            .into_iter()
            .try_fold(self, |request, (name, value)| request.header(name, value))
    }

    /// The normalized, fragment-free URL.
    #[must_use]
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    /// The parsed URL.
    #[must_use]
    pub fn parsed_url(&self) -> &Url {
        &self.url
    }

    /// Requested subprotocols, in preference order.
    #[must_use]
    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }

    /// Extra request headers.
    #[must_use]
    pub fn header_list(&self) -> &[(String, String)] {
        &self.headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ErrorKind};

    #[test]
    fn test_new_valid_request() {
        let request = ConnectRequest::new("ws://example.com/chat", ["chat", "superchat"]).unwrap();
        assert_eq!(request.url(), "ws://example.com/chat");
        assert_eq!(request.protocols(), ["chat", "superchat"]);
        assert!(request.header_list().is_empty());
    }

    #[test]
    fn test_no_protocols() {
        let request = ConnectRequest::new("ws://example.com", Vec::<String>::new()).unwrap();
        assert!(request.protocols().is_empty());
    }

    #[test]
    fn test_new_rejects_bad_input_with_syntax_kind() {
        let cases = [
            ConnectRequest::new("http://example.com", ["chat"]),
            ConnectRequest::new("ws://example.com#x", ["chat"]),
            ConnectRequest::new("ws://example.com", ["chat", "Chat"]),
            ConnectRequest::new("ws://example.com", ["bad protocol"]),
        ];
        for result in cases {
            assert_eq!(result.unwrap_err().kind(), ErrorKind::Syntax);
        }
    }

    #[test]
    fn test_headers() {
        let request = ConnectRequest::new("ws://example.com", ["chat"])
            .unwrap()
            .headers([("Authorization", "Bearer t"), ("X-Trace", "1")])
            .unwrap();
        assert_eq!(request.header_list().len(), 2);
        assert_eq!(request.header_list()[0].0, "Authorization");
    }

    #[test]
    fn test_header_injection_rejected() {
        let result = ConnectRequest::new("ws://example.com", ["chat"])
            .unwrap()
            .header("X-Token", "a\nb");
        assert!(matches!(result, Err(Error::InvalidHeader { .. })));
    }
}
