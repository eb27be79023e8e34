//! Request signing.
//!
//! Authenticated requests carry an API key, an expiry timestamp, and an
//! HMAC-SHA256 signature computed over `verb + path + expiry + body`,
//! hex-encoded. The path includes the query string when present.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex-encoded request signature.
pub fn sign(secret: &str, verb: &str, path: &str, expires: i64, body: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(verb.as_bytes());
    mac.update(path.as_bytes());
    mac.update(expires.to_string().as_bytes());
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Signature for the streaming authentication handshake, which signs a
/// synthetic `GET /realtime` request with an empty body.
pub fn sign_ws_auth(secret: &str, expires: i64) -> String {
    sign(secret, "GET", "/realtime", expires, "")
}
