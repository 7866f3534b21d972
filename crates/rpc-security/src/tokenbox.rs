//! Authenticated encryption for the token envelopes exchanged between the
//! duplex side and the HTTP side.
//!
//! Every envelope is sealed with its `purpose` string as additional
//! authenticated data (AAD), so a token minted for one question can never
//! be opened as the answer to a different one — tampering with the
//! purpose, not just the ciphertext, causes decryption to fail.

use base64::Engine;
use ring::aead::{Aad, CHACHA20_POLY1305, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use serde::Serialize;
use serde::de::DeserializeOwned;

use rpc_core::{Error, ErrorKind};

/// A per-process authenticated-encryption key used to seal and open token
/// envelopes.
///
/// Generated fresh at process start; tokens do not need to survive a
/// restart since every envelope is answered within the lifetime of the
/// connection that requested it.
pub struct TokenBox {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl TokenBox {
    /// Generate a new box with a fresh random key.
    pub fn generate() -> rpc_core::Result<Self> {
        let rng = SystemRandom::new();
        let mut key_bytes = [0u8; 32];
        rng.fill(&mut key_bytes)
            .map_err(|_| Error::new(ErrorKind::Internal, "failed to generate token box key"))?;
        let unbound = UnboundKey::new(&CHACHA20_POLY1305, &key_bytes)
            .map_err(|_| Error::new(ErrorKind::Internal, "failed to construct AEAD key"))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng,
        })
    }

    /// Seal `payload` under `purpose`, returning a base64 envelope safe to
    /// place in a token field.
    pub fn seal<T: Serialize>(&self, purpose: &str, payload: &T) -> rpc_core::Result<String> {
        let mut buffer = serde_json::to_vec(payload)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| Error::new(ErrorKind::Internal, "failed to generate nonce"))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        self.key
            .seal_in_place_append_tag(nonce, Aad::from(purpose.as_bytes()), &mut buffer)
            .map_err(|_| Error::new(ErrorKind::Internal, "failed to seal token envelope"))?;

        let mut wire = Vec::with_capacity(NONCE_LEN + buffer.len());
        wire.extend_from_slice(&nonce_bytes);
        wire.extend_from_slice(&buffer);
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(wire))
    }

    /// Open an envelope previously produced by [`Self::seal`] under the
    /// same `purpose`.
    ///
    /// Fails with [`ErrorKind::InvalidToken`] if the envelope is malformed,
    /// the authentication tag does not verify, or `purpose` does not match
    /// what it was sealed with — the three cases the protocol requires be
    /// indistinguishable to the caller.
    pub fn open<T: DeserializeOwned>(&self, purpose: &str, token: &str) -> rpc_core::Result<T> {
        let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| Error::new(ErrorKind::InvalidToken, "token is not valid base64"))?;

        if raw.len() < NONCE_LEN {
            return Err(Error::new(ErrorKind::InvalidToken, "token is too short"));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let nonce_bytes: [u8; NONCE_LEN] = nonce_bytes
            .try_into()
            .map_err(|_| Error::new(ErrorKind::InvalidToken, "malformed nonce"))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut buffer = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::from(purpose.as_bytes()), &mut buffer)
            .map_err(|_| {
                Error::new(
                    ErrorKind::InvalidToken,
                    "token did not decrypt under the expected purpose",
                )
            })?;

        serde_json::from_slice(plaintext)
            .map_err(|_| Error::new(ErrorKind::InvalidToken, "token payload is malformed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Payload {
        connection_id: String,
        nonce: String,
    }

    #[test]
    fn seals_and_opens_under_the_same_purpose() {
        let tokenbox = TokenBox::generate().unwrap();
        let payload = Payload {
            connection_id: "conn-1".into(),
            nonce: "abc".into(),
        };
        let sealed = tokenbox.seal("GetCookieSession_question", &payload).unwrap();
        let opened: Payload = tokenbox
            .open("GetCookieSession_question", &sealed)
            .unwrap();
        assert_eq!(opened, payload);
    }

    #[test]
    fn rejects_a_token_opened_under_the_wrong_purpose() {
        let tokenbox = TokenBox::generate().unwrap();
        let payload = Payload {
            connection_id: "conn-1".into(),
            nonce: "abc".into(),
        };
        let sealed = tokenbox.seal("GetCookieSession_question", &payload).unwrap();
        let result: rpc_core::Result<Payload> =
            tokenbox.open("GetCookieSessionAnswerToken", &sealed);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_a_tampered_envelope() {
        let tokenbox = TokenBox::generate().unwrap();
        let payload = Payload {
            connection_id: "conn-1".into(),
            nonce: "abc".into(),
        };
        let mut sealed = tokenbox.seal("purpose", &payload).unwrap();
        sealed.push('x');
        let result: rpc_core::Result<Payload> = tokenbox.open("purpose", &sealed);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_garbage_input() {
        let tokenbox = TokenBox::generate().unwrap();
        let result: rpc_core::Result<Payload> = tokenbox.open("purpose", "not a real token");
        assert!(result.is_err());
    }
}
