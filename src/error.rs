#[derive(Debug, thiserror::Error, thiserror_ext::Construct)]
#[non_exhaustive]
pub enum Error {
	#[error("envelope failed authentication")]
	AuthenticationFailed,

	#[error("failed to encrypt plaintext")]
	EncryptionFailed,

	#[error("invalid key: {0}")]
	InvalidKey(String),

	#[error("decrypted plaintext is not valid UTF-8")]
	InvalidUtf8,

	#[error("malformed envelope: {0}")]
	MalformedEnvelope(String),
}
