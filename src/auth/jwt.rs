// Informational JWT decoding
//
// This is NOT a trust boundary. Nothing here verifies a signature; the
// decoded claims are only suitable for display (e.g. showing the signed-in
// user). Authorization decisions belong to the server.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_json::Value;

/// Decode the payload segment of a JWT as JSON.
///
/// Returns `None` for anything that is not a three-segment token with a
/// base64url JSON payload.
pub fn decode_token(token: &str) -> Option<Value> {
    let mut segments = token.split('.');
    let payload = match (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return None,
    };

    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Extract the `exp` claim as epoch milliseconds, if present.
pub fn token_expiry_ms(token: &str) -> Option<i64> {
    let claims = decode_token(token)?;
    claims.get("exp").and_then(Value::as_i64).map(|exp| exp * 1000)
}
