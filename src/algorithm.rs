use aes_gcm::{
	Aes128Gcm, Aes256Gcm, AesGcm,
	aead::{AeadCore, AeadInPlace, KeyInit},
	aes::Aes192,
};
use chacha20poly1305::ChaCha20Poly1305;
use typenum::{U12, U16};

use super::Error;

type Aes192Gcm = AesGcm<Aes192, U12>;

/// Size, in bytes, of the nonce carried in every envelope.
pub const NONCE_SIZE: usize = <<Aes256Gcm as AeadCore>::NonceSize as typenum::Unsigned>::USIZE;

/// Size, in bytes, of the authentication tag carried in every envelope.
pub const TAG_SIZE: usize = <<Aes256Gcm as AeadCore>::TagSize as typenum::Unsigned>::USIZE;

/// The AEAD cipher used to seal and open envelopes.
///
/// Both algorithms use a 96-bit nonce and a 128-bit tag, so envelopes look identical on the
/// wire.  The algorithm is *not* recorded in the envelope; whoever opens it has to know which
/// one sealed it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Algorithm {
	/// AES in Galois/Counter Mode.  The length of the key picks the variant: 16 bytes for
	/// AES-128, 24 for AES-192, and 32 for AES-256.
	#[default]
	AesGcm,

	/// ChaCha20 with a Poly1305 authenticator, keyed with 32 bytes.
	ChaCha20Poly1305,
}

impl Algorithm {
	/// The key lengths, in bytes, this algorithm accepts.
	pub fn key_sizes(&self) -> &'static [usize] {
		match self {
			Self::AesGcm => &[16, 24, 32],
			Self::ChaCha20Poly1305 => &[32],
		}
	}

	/// Whether `len` is an acceptable key length for this algorithm.
	pub fn accepts_key_size(&self, len: usize) -> bool {
		self.key_sizes().contains(&len)
	}
}

impl std::fmt::Display for Algorithm {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::AesGcm => f.write_str("AES-GCM"),
			Self::ChaCha20Poly1305 => f.write_str("ChaCha20-Poly1305"),
		}
	}
}

/// A keyed cipher instance, good for exactly one seal or open.
///
/// The underlying cipher state is never shared between calls (or threads); each operation
/// builds its own from the caller's key and drops it on the way out, which also scrubs the
/// expanded key schedule.
pub(crate) enum CipherContext {
	Aes128(Aes128Gcm),
	Aes192(Aes192Gcm),
	Aes256(Aes256Gcm),
	ChaCha20Poly1305(ChaCha20Poly1305),
}

impl CipherContext {
	#[tracing::instrument(level = "trace", skip(key), fields(key_len = key.len()))]
	pub(crate) fn new(algorithm: Algorithm, key: &[u8]) -> Result<Self, Error> {
		if !algorithm.accepts_key_size(key.len()) {
			tracing::debug!(%algorithm, key_len = key.len(), "Rejecting key");
			return Err(Error::invalid_key(format!(
				"{algorithm} cannot use a {}-byte key (expected one of {:?})",
				key.len(),
				algorithm.key_sizes()
			)));
		}

		let bad_key = |_| Error::invalid_key(format!("{algorithm} refused the key"));

		Ok(match (algorithm, key.len()) {
			(Algorithm::AesGcm, 16) => {
				Self::Aes128(Aes128Gcm::new_from_slice(key).map_err(bad_key)?)
			}
			(Algorithm::AesGcm, 24) => {
				Self::Aes192(Aes192Gcm::new_from_slice(key).map_err(bad_key)?)
			}
			(Algorithm::AesGcm, _) => {
				Self::Aes256(Aes256Gcm::new_from_slice(key).map_err(bad_key)?)
			}
			(Algorithm::ChaCha20Poly1305, _) => {
				Self::ChaCha20Poly1305(ChaCha20Poly1305::new_from_slice(key).map_err(bad_key)?)
			}
		})
	}

	/// Encrypt `buffer` in place, returning the detached tag.
	pub(crate) fn seal(
		&self,
		nonce: &[u8; NONCE_SIZE],
		buffer: &mut [u8],
	) -> Result<[u8; TAG_SIZE], Error> {
		match self {
			Self::Aes128(c) => seal_with(c, nonce, buffer),
			Self::Aes192(c) => seal_with(c, nonce, buffer),
			Self::Aes256(c) => seal_with(c, nonce, buffer),
			Self::ChaCha20Poly1305(c) => seal_with(c, nonce, buffer),
		}
	}

	/// Verify `tag` over `buffer` and, only if it matches, decrypt `buffer` in place.
	pub(crate) fn open(
		&self,
		nonce: &[u8; NONCE_SIZE],
		buffer: &mut [u8],
		tag: &[u8; TAG_SIZE],
	) -> Result<(), Error> {
		match self {
			Self::Aes128(c) => open_with(c, nonce, buffer, tag),
			Self::Aes192(c) => open_with(c, nonce, buffer, tag),
			Self::Aes256(c) => open_with(c, nonce, buffer, tag),
			Self::ChaCha20Poly1305(c) => open_with(c, nonce, buffer, tag),
		}
	}
}

fn seal_with<C>(
	cipher: &C,
	nonce: &[u8; NONCE_SIZE],
	buffer: &mut [u8],
) -> Result<[u8; TAG_SIZE], Error>
where
	C: AeadInPlace<NonceSize = U12, TagSize = U16>,
{
	let tag = cipher
		.encrypt_in_place_detached(nonce.into(), b"", buffer)
		.map_err(|_| Error::EncryptionFailed)?;

	let mut out = [0u8; TAG_SIZE];
	out.copy_from_slice(&tag);
	Ok(out)
}

fn open_with<C>(
	cipher: &C,
	nonce: &[u8; NONCE_SIZE],
	buffer: &mut [u8],
	tag: &[u8; TAG_SIZE],
) -> Result<(), Error>
where
	C: AeadInPlace<NonceSize = U12, TagSize = U16>,
{
	cipher
		.decrypt_in_place_detached(nonce.into(), b"", buffer, tag.into())
		.map_err(|_| Error::AuthenticationFailed)
}
