//! Self-contained encrypted envelopes, with as little secret material left lying around as
//! possible.
//!
//! If you have some bytes, and a key, and you want to turn them into one opaque blob that can
//! only be turned back into those bytes by someone holding the same key -- and that will refuse
//! to turn into *anything* if it has been truncated, corrupted, or tampered with -- then this
//! crate is for you.
//!
//! An envelope carries everything needed to open it (other than the key): the random nonce
//! it was sealed under, the authentication tag, and the ciphertext.  The nonce and tag are each
//! preceded by their length, as a four-byte little-endian integer; the ciphertext is whatever is
//! left over.  There is no magic number and no version byte, so if you need to evolve the
//! format, that's up to you.
//!
//! The simplest way in is the free functions, which use AES-GCM and a process-wide buffer pool:
//!
//! ```rust
//! # fn main() -> Result<(), strong_envelope::Error> {
//! let key = [0x42u8; 32];
//!
//! let envelope = strong_envelope::encode(b"hello", key)?;
//! assert_eq!(b"hello".to_vec(), strong_envelope::decode(&envelope, key)?);
//! # Ok(())
//! # }
//! ```
//!
//! For anything else (ChaCha20-Poly1305, your own buffer pool), create an [`EnvelopeCodec`].
//!
//! # Scratch Buffers
//!
//! Sealing and opening both stage the plaintext in a scratch buffer.  Small buffers (less than
//! [`STACK_THRESHOLD`] bytes) live on the stack of the call that needs them; larger ones are
//! borrowed from a [`BufferPool`].  Either way, the buffer is zeroed before it is released, no
//! matter how the operation ended, so a failed decryption doesn't leave half a plaintext in a
//! buffer someone else is about to borrow.
//!
//! # Keys
//!
//! This crate never generates, derives, stores, or logs a key.  You hand one in for each call,
//! it is used to build a cipher instance that lives only for that call, and that's the end of
//! it.  Scrubbing your copy of the key when you're done with it is up to you.
mod algorithm;
mod buffer;
mod codec;
mod decoder;
mod encoder;
mod error;
mod layout;

pub use algorithm::{Algorithm, NONCE_SIZE, TAG_SIZE};
pub use buffer::{BufferPool, BufferSource, PoolConfig, PoolStats, STACK_THRESHOLD, ScopedBuffer};
pub use codec::EnvelopeCodec;
pub use error::Error;
pub use layout::{ENVELOPE_OVERHEAD, LEN_PREFIX, envelope_len};

/// Seal `plaintext` into an envelope with AES-GCM.  See [`EnvelopeCodec::encode`].
pub fn encode(plaintext: impl AsRef<[u8]>, key: impl AsRef<[u8]>) -> Result<Vec<u8>, Error> {
	EnvelopeCodec::default().encode(plaintext, key)
}

/// Open an AES-GCM envelope.  See [`EnvelopeCodec::decode`].
pub fn decode(envelope: impl AsRef<[u8]>, key: impl AsRef<[u8]>) -> Result<Vec<u8>, Error> {
	EnvelopeCodec::default().decode(envelope, key)
}

/// See [`EnvelopeCodec::encode_to_base64`].
pub fn encode_to_base64(
	plaintext: impl AsRef<[u8]>,
	key: impl AsRef<[u8]>,
) -> Result<String, Error> {
	EnvelopeCodec::default().encode_to_base64(plaintext, key)
}

/// See [`EnvelopeCodec::decode_from_base64`].
pub fn decode_from_base64(text: impl AsRef<[u8]>, key: impl AsRef<[u8]>) -> Result<Vec<u8>, Error> {
	EnvelopeCodec::default().decode_from_base64(text, key)
}

/// See [`EnvelopeCodec::encrypt_string`].
pub fn encrypt_string(plaintext: &str, key: impl AsRef<[u8]>) -> Result<String, Error> {
	EnvelopeCodec::default().encrypt_string(plaintext, key)
}

/// See [`EnvelopeCodec::decrypt_string`].
pub fn decrypt_string(text: &str, key: impl AsRef<[u8]>) -> Result<String, Error> {
	EnvelopeCodec::default().decrypt_string(text, key)
}
