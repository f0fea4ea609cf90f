//! Default CORS headers for relay fallback responses.

use crate::http::{HttpResponse, Method};

/// Status returned for unmatched preflight requests.
pub const DEFAULT_PREFLIGHT_STATUS: u16 = 204;

/// The fixed header set applied to default preflight responses.
pub fn default_access_control_headers() -> [(&'static str, &'static str); 5] {
    [
        ("access-control-allow-origin", "*"),
        ("access-control-allow-methods", Method::comma_joined()),
        ("access-control-allow-headers", "*"),
        ("access-control-expose-headers", "*"),
        ("access-control-max-age", "0"),
    ]
}

/// Headers filled in on worker-provided responses, only when absent.
pub const RESPONSE_FILL_HEADERS: [&str; 2] =
    ["access-control-allow-origin", "access-control-expose-headers"];

/// Set the named default headers on `response` unless already present.
pub fn set_default_access_control_headers(response: &mut HttpResponse, names: &[&str]) {
    for (name, value) in default_access_control_headers() {
        if !names.contains(&name) {
            continue;
        }
        if response.headers.contains_name(name) {
            continue;
        }
        response.headers.append(name, value);
    }
}
