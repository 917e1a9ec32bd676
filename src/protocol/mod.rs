//! Connection request validation.

pub mod request;
pub mod validation;

pub use request::ConnectRequest;
pub use validation::{is_token, validate_header, validate_protocols, validate_url};
