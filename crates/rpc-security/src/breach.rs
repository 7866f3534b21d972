//! BREACH-shielding for token values echoed into response bodies.
//!
//! A token compressed alongside attacker-influenced content (e.g. a
//! reflected query parameter) can leak byte-by-byte through the
//! compression ratio (the BREACH attack). The mitigation masks the token
//! behind a fresh random salt on every response so the byte pattern it
//! contributes to the compressed output changes every time, even though
//! the underlying token value is stable.

use ring::rand::{SecureRandom, SystemRandom};

use rpc_core::{Error, ErrorKind};

/// Wire value used for the empty token, distinguishable from any real
/// shielded value because it is not valid hex of even length produced by
/// [`shield_token_against_breach`] (hex never contains `_`).
const EMPTY_TOKEN_MARKER: &str = "_empty_";

/// Mask `token` behind a fresh random salt: the wire form is
/// `hex(salt) + hex(salt XOR token)`.
///
/// Calling this twice on the same token yields two different strings, but
/// both unshield back to the same value.
pub fn shield_token_against_breach(token: &str) -> String {
    if token.is_empty() {
        return EMPTY_TOKEN_MARKER.to_string();
    }

    let bytes = token.as_bytes();
    let mut salt = vec![0u8; bytes.len()];
    SystemRandom::new()
        .fill(&mut salt)
        .expect("system randomness source must be available");

    let masked: Vec<u8> = salt.iter().zip(bytes).map(|(s, b)| s ^ b).collect();

    let mut wire = hex_encode(&salt);
    wire.push_str(&hex_encode(&masked));
    wire
}

/// Reverse [`shield_token_against_breach`], recovering the original token.
pub fn unshield_token_from_breach(wire: &str) -> rpc_core::Result<String> {
    if wire == EMPTY_TOKEN_MARKER {
        return Ok(String::new());
    }

    let raw = hex_decode(wire)
        .map_err(|_| Error::new(ErrorKind::InvalidToken, "shielded token is not valid hex"))?;
    if raw.len() % 2 != 0 {
        return Err(Error::new(
            ErrorKind::InvalidToken,
            "shielded token has an odd byte length",
        ));
    }

    let half = raw.len() / 2;
    let (salt, masked) = raw.split_at(half);
    let unmasked: Vec<u8> = salt.iter().zip(masked).map(|(s, m)| s ^ m).collect();

    String::from_utf8(unmasked)
        .map_err(|_| Error::new(ErrorKind::InvalidToken, "shielded token is not valid UTF-8"))
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{b:02x}").expect("writing to a String cannot fail");
    }
    out
}

fn hex_decode(hex: &str) -> Result<Vec<u8>, ()> {
    if hex.len() % 2 != 0 {
        return Err(());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| ()))
        .collect()
}
