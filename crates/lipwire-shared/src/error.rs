use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid key length")]
    InvalidKeyLength,

    #[error("Malformed handshake: {0}")]
    MalformedHandshake(String),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Frame is missing msg_type")]
    MissingType,

    #[error("Unknown msg_type: {0}")]
    UnknownType(String),

    #[error("Malformed payload for {msg_type}: {detail}")]
    BadPayload { msg_type: String, detail: String },

    #[error("Frame exceeds maximum size: {0} bytes")]
    FrameTooLarge(usize),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
