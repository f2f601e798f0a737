//! Method status codes. Chosen to read like their HTTP namesakes.

pub const OK: u16 = 200;
pub const BAD_REQUEST: u16 = 400;
/// Handle expired or was never issued.
pub const NOT_FOUND: u16 = 404;
pub const REQUEST_TIMEOUT: u16 = 408;
pub const PAYLOAD_TOO_LARGE: u16 = 413;
pub const INTERNAL_ERROR: u16 = 500;
/// A tunneled HTTP call could not be completed.
pub const BAD_GATEWAY: u16 = 502;
pub const GATEWAY_TIMEOUT: u16 = 504;

pub fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}
