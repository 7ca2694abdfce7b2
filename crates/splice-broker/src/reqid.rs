//! Request identifier generation.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;

/// Length in bytes of a RequestID, e.g. 128 bytes = 1024 bits.
pub const REQ_ID_LEN: usize = 128;

/// Returns a URL-safe, base64 encoded, securely generated random RequestID.
/// `n` is the length in bytes of the token to be generated.
pub fn generate(n: usize) -> Result<String, String> {
    if n == 0 {
        return Err(format!("invalid length {n} requested"));
    }
    let mut buf = vec![0u8; n];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| format!("rng read returned {e}"))?;
    Ok(URL_SAFE.encode(&buf))
}
