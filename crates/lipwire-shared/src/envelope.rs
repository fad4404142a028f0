//! Per-connection crypto envelope.
//!
//! On accept the server sends a plaintext `handshake` frame carrying its
//! ephemeral X25519 public key and a fresh salt; the client answers with its
//! own public key. Both sides derive a 32-byte AES-256-GCM key via
//! HKDF-SHA-256 over the shared secret with the context label
//! `"handshake data"`. Every frame after that is `{nonce, ciphertext, tag}`
//! with base64 fields.
//!
//! The HKDF salt input is the base64 *text* of the salt exactly as it appears
//! in the handshake frame, so both sides hash identical bytes without a
//! second decode step.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey};

use crate::constants::{HKDF_INFO, KEY_SIZE, NONCE_SIZE, SALT_SIZE, TAG_SIZE};
use crate::error::CryptoError;
use crate::protocol::{HandshakeHello, HandshakeReply};

/// An AEAD-wrapped frame as it travels on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CipherFrame {
    pub nonce: String,
    pub ciphertext: String,
    pub tag: String,
}

/// Symmetric frame codec shared by the inbound and outbound halves of one
/// connection.
#[derive(Clone)]
pub struct FrameCipher {
    key: [u8; KEY_SIZE],
}

impl FrameCipher {
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Encrypt a plaintext into a wire frame with a fresh random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<CipherFrame, CryptoError> {
        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| CryptoError::InvalidKeyLength)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        // aes-gcm appends the tag; the wire format carries it detached.
        let mut sealed = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;
        let tag = sealed.split_off(sealed.len() - TAG_SIZE);

        Ok(CipherFrame {
            nonce: BASE64.encode(nonce_bytes),
            ciphertext: BASE64.encode(&sealed),
            tag: BASE64.encode(&tag),
        })
    }

    /// Decrypt a wire frame back into plaintext bytes.
    pub fn open(&self, frame: &CipherFrame) -> Result<Vec<u8>, CryptoError> {
        let nonce_bytes = BASE64.decode(&frame.nonce)?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }
        let mut sealed = BASE64.decode(&frame.ciphertext)?;
        let tag = BASE64.decode(&frame.tag)?;
        if tag.len() != TAG_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }
        sealed.extend_from_slice(&tag);

        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| CryptoError::InvalidKeyLength)?;
        let nonce = Nonce::from_slice(&nonce_bytes);
        cipher
            .decrypt(nonce, sealed.as_slice())
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

/// Server half of the key agreement. Consumed by [`Self::complete`] so the
/// ephemeral secret cannot outlive the handshake.
pub struct ServerHandshake {
    secret: EphemeralSecret,
    public: PublicKey,
    salt_b64: String,
}

impl ServerHandshake {
    pub fn initiate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);

        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);

        Self {
            secret,
            public,
            salt_b64: BASE64.encode(salt),
        }
    }

    /// The plaintext hello payload sent to the client.
    pub fn hello(&self) -> HandshakeHello {
        HandshakeHello {
            server_public_key: BASE64.encode(self.public.as_bytes()),
            salt: self.salt_b64.clone(),
        }
    }

    /// Consume the client's reply and derive the frame key.
    pub fn complete(self, reply: &HandshakeReply) -> Result<FrameCipher, CryptoError> {
        let peer = decode_public_key(&reply.client_public_key)?;
        let shared = self.secret.diffie_hellman(&peer);
        let key = derive_frame_key(shared.as_bytes(), self.salt_b64.as_bytes())?;
        Ok(FrameCipher::new(key))
    }
}

/// Client half of the key agreement. Lives here so tests (and client code)
/// derive the key through the same path as the server.
pub struct ClientHandshake;

impl ClientHandshake {
    /// Answer a server hello, returning the reply payload and the derived
    /// frame cipher.
    pub fn respond(hello: &HandshakeHello) -> Result<(HandshakeReply, FrameCipher), CryptoError> {
        let server_public = decode_public_key(&hello.server_public_key)?;

        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        let shared = secret.diffie_hellman(&server_public);

        let key = derive_frame_key(shared.as_bytes(), hello.salt.as_bytes())?;
        Ok((
            HandshakeReply {
                client_public_key: BASE64.encode(public.as_bytes()),
            },
            FrameCipher::new(key),
        ))
    }
}

fn decode_public_key(b64: &str) -> Result<PublicKey, CryptoError> {
    let bytes = BASE64.decode(b64)?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::MalformedHandshake("public key must be 32 bytes".into()))?;
    Ok(PublicKey::from(arr))
}

fn derive_frame_key(shared_secret: &[u8], salt: &[u8]) -> Result<[u8; KEY_SIZE], CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), shared_secret);
    let mut key = [0u8; KEY_SIZE];
    hk.expand(HKDF_INFO, &mut key)
        .map_err(|_| CryptoError::InvalidKeyLength)?;
    Ok(key)
}
