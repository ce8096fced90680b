use base64::{Engine as _, engine::general_purpose::STANDARD};
use std::sync::Arc;
use zeroize::Zeroize as _;

use super::{Algorithm, BufferPool, Error, decoder, encoder};

/// Seals plaintexts into envelopes, and opens them again.
///
/// An [`EnvelopeCodec`] is just a choice of [`Algorithm`] plus a [`BufferPool`] to borrow large
/// scratch buffers from; it holds no keys and no cipher state, so a single codec can be cloned
/// and shared between as many threads as you like.  Each call builds its own cipher instance
/// from the key it is given, and throws it away again before returning.
///
/// An envelope is the nonce, the authentication tag, and the ciphertext, each of the first two
/// prefixed with its length as a little-endian `u32`.  Sealing `"hello"` produces `4 + 12 + 4 +
/// 16 + 5 = 41` bytes.
///
/// Keys are *your* problem: generate them, derive them, store them however you see fit, and
/// pass in the raw bytes.  For [`Algorithm::AesGcm`] (the default), a key may be 16, 24, or 32
/// bytes long; for [`Algorithm::ChaCha20Poly1305`] it must be 32 bytes.
///
/// # Example
///
/// ```rust
/// use strong_envelope::{EnvelopeCodec, Error};
/// # fn main() -> Result<(), Error> {
///
/// let codec = EnvelopeCodec::default();
/// let key = [0u8; 32];
///
/// let envelope = codec.encode(b"hello", key)?;
/// assert_eq!(41, envelope.len());
/// assert_eq!(b"hello".to_vec(), codec.decode(&envelope, key)?);
///
/// // Any change at all to the envelope is noticed
/// let mut tampered = envelope.clone();
/// tampered[40] ^= 0x01;
/// assert!(matches!(codec.decode(&tampered, key), Err(Error::AuthenticationFailed)));
///
/// // As is using the wrong key
/// let result = codec.decode(&envelope, [1u8; 32]);
/// assert!(matches!(result, Err(Error::AuthenticationFailed)));
///
/// // If you need something printable, there's base64
/// let text = codec.encrypt_string("hello, world!", key)?;
/// assert_eq!("hello, world!", codec.decrypt_string(&text, key)?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct EnvelopeCodec {
	algorithm: Algorithm,
	buffers: Arc<BufferPool>,
}

impl Default for EnvelopeCodec {
	fn default() -> Self {
		Self::new(Algorithm::default())
	}
}

impl EnvelopeCodec {
	/// Create a new [`EnvelopeCodec`] using the process-wide [`BufferPool`].
	pub fn new(algorithm: Algorithm) -> Self {
		Self {
			algorithm,
			buffers: BufferPool::shared(),
		}
	}

	/// Borrow large scratch buffers from `pool` rather than the process-wide one.
	pub fn with_buffer_pool(self, pool: Arc<BufferPool>) -> Self {
		Self {
			buffers: pool,
			..self
		}
	}

	pub fn algorithm(&self) -> Algorithm {
		self.algorithm
	}

	pub fn buffer_pool(&self) -> &Arc<BufferPool> {
		&self.buffers
	}

	/// Seal `plaintext` into a new envelope, under a freshly generated nonce.
	///
	/// # Errors
	///
	/// * [`Error::InvalidKey`] if `key` is not a length the [`Algorithm`] accepts.
	/// * [`Error::EncryptionFailed`] if the cipher itself falls over, which shouldn't happen.
	pub fn encode(
		&self,
		plaintext: impl AsRef<[u8]>,
		key: impl AsRef<[u8]>,
	) -> Result<Vec<u8>, Error> {
		encoder::encode(&self.buffers, self.algorithm, plaintext.as_ref(), key.as_ref())
	}

	/// Open an envelope and return the plaintext within.
	///
	/// # Errors
	///
	/// * [`Error::InvalidKey`] if `key` is not a length the [`Algorithm`] accepts.
	/// * [`Error::MalformedEnvelope`] if `envelope` isn't laid out like an envelope at all.
	/// * [`Error::AuthenticationFailed`] if the envelope was sealed with a different key, or
	///   has been modified since it was sealed.
	pub fn decode(
		&self,
		envelope: impl AsRef<[u8]>,
		key: impl AsRef<[u8]>,
	) -> Result<Vec<u8>, Error> {
		decoder::decode(&self.buffers, self.algorithm, envelope.as_ref(), key.as_ref())
	}

	/// As [`encode`](Self::encode), but the envelope comes back as (padded, standard alphabet)
	/// base64.
	pub fn encode_to_base64(
		&self,
		plaintext: impl AsRef<[u8]>,
		key: impl AsRef<[u8]>,
	) -> Result<String, Error> {
		self.encode(plaintext, key).map(|envelope| STANDARD.encode(envelope))
	}

	/// As [`decode`](Self::decode), but for an envelope that has been base64 encoded.
	///
	/// Text that isn't valid base64 is an [`Error::MalformedEnvelope`].
	#[tracing::instrument(level = "debug", skip_all)]
	pub fn decode_from_base64(
		&self,
		text: impl AsRef<[u8]>,
		key: impl AsRef<[u8]>,
	) -> Result<Vec<u8>, Error> {
		let envelope = STANDARD.decode(text.as_ref()).map_err(|e| {
			tracing::debug!(error = %e, "Not base64");
			Error::malformed_envelope(format!("invalid base64: {e}"))
		})?;

		self.decode(envelope, key)
	}

	/// Seal a string, returning the envelope as base64.
	pub fn encrypt_string(&self, plaintext: &str, key: impl AsRef<[u8]>) -> Result<String, Error> {
		self.encode_to_base64(plaintext.as_bytes(), key)
	}

	/// Open a base64 envelope that holds a string.
	///
	/// If the plaintext isn't valid UTF-8, you get [`Error::InvalidUtf8`], and the plaintext is
	/// scrubbed before it is thrown away.
	pub fn decrypt_string(&self, text: &str, key: impl AsRef<[u8]>) -> Result<String, Error> {
		String::from_utf8(self.decode_from_base64(text, key)?).map_err(|e| {
			e.into_bytes().zeroize();
			Error::InvalidUtf8
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		BufferSource, PoolConfig, STACK_THRESHOLD,
		layout::{CIPHERTEXT_OFFSET, ENVELOPE_OVERHEAD, NONCE_OFFSET, TAG_OFFSET, TAG_PREFIX_OFFSET},
		tests::init,
	};
	use proptest::prelude::*;
	use std::collections::HashSet;

	fn private_codec(algorithm: Algorithm) -> EnvelopeCodec {
		EnvelopeCodec::new(algorithm).with_buffer_pool(Arc::new(BufferPool::default()))
	}

	#[test]
	fn hello() {
		init();
		let codec = private_codec(Algorithm::AesGcm);
		let key = [0u8; 32];

		let envelope = codec.encode("hello", key).unwrap();
		assert_eq!(41, envelope.len());
		assert_eq!([12, 0, 0, 0], envelope[0..4]);
		assert_eq!([16, 0, 0, 0], envelope[16..20]);

		assert_eq!(b"hello".to_vec(), codec.decode(&envelope, key).unwrap());

		let mut tampered = envelope.clone();
		tampered[40] ^= 0x01;
		assert!(matches!(
			codec.decode(&tampered, key),
			Err(Error::AuthenticationFailed)
		));
	}

	#[test]
	fn empty_plaintext() {
		init();
		for algorithm in [Algorithm::AesGcm, Algorithm::ChaCha20Poly1305] {
			let codec = private_codec(algorithm);
			let key = [9u8; 32];

			let envelope = codec.encode(b"", key).unwrap();
			assert_eq!(ENVELOPE_OVERHEAD, envelope.len());
			assert_eq!(Vec::<u8>::new(), codec.decode(&envelope, key).unwrap());
		}
	}

	#[test]
	fn all_aes_key_sizes() {
		init();
		let codec = private_codec(Algorithm::AesGcm);

		for len in [16, 24, 32] {
			let key = vec![0x42; len];
			let envelope = codec.encode(b"some secret", &key).unwrap();
			assert_eq!(b"some secret".to_vec(), codec.decode(&envelope, &key).unwrap());
		}
	}

	#[test]
	fn algorithms_do_not_mix() {
		init();
		let aes = private_codec(Algorithm::AesGcm);
		let chacha = private_codec(Algorithm::ChaCha20Poly1305);
		let key = [5u8; 32];

		let envelope = chacha.encode(b"some secret", key).unwrap();
		assert_eq!(b"some secret".to_vec(), chacha.decode(&envelope, key).unwrap());
		assert!(matches!(
			aes.decode(&envelope, key),
			Err(Error::AuthenticationFailed)
		));
	}

	#[test]
	fn wrong_key() {
		init();
		let codec = private_codec(Algorithm::AesGcm);
		let envelope = codec.encode(b"some secret", [1u8; 32]).unwrap();

		assert!(matches!(
			codec.decode(&envelope, [2u8; 32]),
			Err(Error::AuthenticationFailed)
		));
		assert!(matches!(
			codec.decode(&envelope, [1u8; 16]),
			Err(Error::AuthenticationFailed)
		));
		assert!(matches!(
			codec.decode(&envelope, [1u8; 31]),
			Err(Error::InvalidKey(_))
		));
	}

	#[test]
	fn bad_key_on_encode() {
		init();
		let codec = private_codec(Algorithm::ChaCha20Poly1305);

		for len in [0, 16, 24, 33] {
			assert!(matches!(
				codec.encode(b"some secret", vec![0u8; len]),
				Err(Error::InvalidKey(_))
			));
		}
	}

	#[test]
	fn every_bit_matters() {
		init();
		let codec = private_codec(Algorithm::AesGcm);
		let key = [7u8; 32];
		let envelope = codec.encode(b"hello, world!", key).unwrap();

		let sealed_ranges = [
			NONCE_OFFSET..TAG_PREFIX_OFFSET,
			TAG_OFFSET..CIPHERTEXT_OFFSET,
			CIPHERTEXT_OFFSET..envelope.len(),
		];

		for range in sealed_ranges {
			for i in range {
				for bit in 0..8 {
					let mut tampered = envelope.clone();
					tampered[i] ^= 1 << bit;

					assert!(
						matches!(codec.decode(&tampered, key), Err(Error::AuthenticationFailed)),
						"flipping bit {bit} of byte {i} went unnoticed"
					);
				}
			}
		}
	}

	#[test]
	fn length_prefixes_are_checked() {
		init();
		let codec = private_codec(Algorithm::AesGcm);
		let key = [7u8; 32];
		let envelope = codec.encode(b"hello, world!", key).unwrap();

		for i in (0..NONCE_OFFSET).chain(TAG_PREFIX_OFFSET..TAG_OFFSET) {
			for bit in 0..8 {
				let mut tampered = envelope.clone();
				tampered[i] ^= 1 << bit;

				assert!(matches!(
					codec.decode(&tampered, key),
					Err(Error::MalformedEnvelope(_))
				));
			}
		}
	}

	#[test]
	fn truncation() {
		init();
		let codec = private_codec(Algorithm::AesGcm);
		let key = [7u8; 32];
		let envelope = codec.encode(b"hello, world!", key).unwrap();

		for len in 0..CIPHERTEXT_OFFSET {
			assert!(matches!(
				codec.decode(&envelope[..len], key),
				Err(Error::MalformedEnvelope(_))
			));
		}

		// Chopping off ciphertext still leaves a well-formed envelope, but it won't authenticate
		for len in CIPHERTEXT_OFFSET..envelope.len() {
			assert!(matches!(
				codec.decode(&envelope[..len], key),
				Err(Error::AuthenticationFailed)
			));
		}
	}

	#[test]
	fn fresh_nonce_every_time() {
		init();
		let codec = private_codec(Algorithm::AesGcm);
		let key = [7u8; 32];

		let mut nonces = HashSet::new();
		let mut ciphertexts = HashSet::new();

		for _ in 0..1000 {
			let envelope = codec.encode(b"same old thing", key).unwrap();
			assert!(nonces.insert(envelope[NONCE_OFFSET..TAG_PREFIX_OFFSET].to_vec()));
			assert!(ciphertexts.insert(envelope[CIPHERTEXT_OFFSET..].to_vec()));
		}
	}

	#[test]
	fn around_the_stack_threshold() {
		init();
		let pool = Arc::new(BufferPool::default());
		let codec = EnvelopeCodec::default().with_buffer_pool(Arc::clone(&pool));
		let key = [7u8; 32];

		// Sizes straddling the threshold for both the whole envelope (encode) and the bare
		// ciphertext (decode)
		let sizes = [
			STACK_THRESHOLD - ENVELOPE_OVERHEAD - 1,
			STACK_THRESHOLD - ENVELOPE_OVERHEAD,
			STACK_THRESHOLD - ENVELOPE_OVERHEAD + 1,
			STACK_THRESHOLD - 1,
			STACK_THRESHOLD,
			STACK_THRESHOLD + 1,
		];

		for _ in 0..100 {
			for size in sizes {
				let plaintext = vec![0xa5; size];
				let envelope = codec.encode(&plaintext, key).unwrap();
				assert_eq!(plaintext, codec.decode(&envelope, key).unwrap());
			}
		}

		// Everything went back; nothing piled up
		let stats = pool.stats();
		assert!(stats.allocations <= 2, "{stats:?}");
		assert_eq!(stats.allocations as usize, stats.retained_buffers);
		assert_eq!(0, stats.discarded);
	}

	#[test]
	fn pooled_scratch_is_scrubbed_after_failure() {
		init();
		let pool = Arc::new(BufferPool::new(PoolConfig::default()));
		let codec = EnvelopeCodec::default().with_buffer_pool(Arc::clone(&pool));
		let plaintext = vec![0xa5; 3000];

		let envelope = codec.encode(&plaintext, [7u8; 32]).unwrap();
		assert!(matches!(
			codec.decode(&envelope, [8u8; 32]),
			Err(Error::AuthenticationFailed)
		));
		assert_eq!(plaintext, codec.decode(&envelope, [7u8; 32]).unwrap());

		// The one buffer everything ran through has nothing left in it
		assert_eq!(1, pool.stats().allocations);
		pool.with_buffer(4096, |b| {
			assert!(b.iter().all(|&x| x == 0));
			Ok(())
		})
		.unwrap();
	}

	#[test]
	fn base64() {
		init();
		let codec = private_codec(Algorithm::AesGcm);
		let key = [7u8; 16];

		let text = codec.encode_to_base64(b"\x00\x01binary\xff", key).unwrap();
		assert!(text.is_ascii());
		assert_eq!(
			b"\x00\x01binary\xff".to_vec(),
			codec.decode_from_base64(&text, key).unwrap()
		);

		let text = codec.encrypt_string("¡hola, mundo!", key).unwrap();
		assert_eq!("¡hola, mundo!", codec.decrypt_string(&text, key).unwrap());
	}

	#[test]
	fn bad_base64() {
		init();
		let codec = private_codec(Algorithm::AesGcm);

		for text in ["not base64!", "AAAA=", "%%%%"] {
			assert!(matches!(
				codec.decrypt_string(text, [7u8; 16]),
				Err(Error::MalformedEnvelope(_))
			));
		}

		// Valid base64, but far too short to be an envelope
		assert!(matches!(
			codec.decode_from_base64("AAAA", [7u8; 16]),
			Err(Error::MalformedEnvelope(_))
		));
	}

	#[test]
	fn not_a_string() {
		init();
		let codec = private_codec(Algorithm::AesGcm);
		let key = [7u8; 16];

		let text = codec.encode_to_base64(b"\xc3\x28", key).unwrap();
		assert!(matches!(
			codec.decrypt_string(&text, key),
			Err(Error::InvalidUtf8)
		));
	}

	#[test]
	fn many_threads_one_codec() {
		init();
		let pool = Arc::new(BufferPool::default());
		let codec = EnvelopeCodec::default().with_buffer_pool(Arc::clone(&pool));

		std::thread::scope(|s| {
			for t in 0..8u8 {
				let codec = &codec;
				s.spawn(move || {
					let key = [t; 32];
					for size in [0, 10, 500, 2000, 9000] {
						let plaintext = vec![t; size];
						let envelope = codec.encode(&plaintext, key).unwrap();
						assert_eq!(plaintext, codec.decode(&envelope, key).unwrap());
					}
				});
			}
		});

		assert!(pool.stats().retained_buffers <= 16);
	}

	proptest! {
		#[test]
		fn round_trip(
			plaintext in prop::collection::vec(any::<u8>(), 0..3000),
			key in prop::collection::vec(any::<u8>(), 32),
			chacha in any::<bool>(),
		) {
			let algorithm = if chacha { Algorithm::ChaCha20Poly1305 } else { Algorithm::AesGcm };
			let codec = EnvelopeCodec::new(algorithm);

			let envelope = codec.encode(&plaintext, &key).unwrap();
			prop_assert_eq!(ENVELOPE_OVERHEAD + plaintext.len(), envelope.len());
			prop_assert_eq!(plaintext, codec.decode(&envelope, &key).unwrap());
		}

		#[test]
		fn single_bit_tamper(
			plaintext in prop::collection::vec(any::<u8>(), 0..200),
			position in any::<prop::sample::Index>(),
			bit in 0..8u8,
		) {
			let codec = EnvelopeCodec::default();
			let key = [3u8; 24];

			let mut envelope = codec.encode(&plaintext, key).unwrap();
			let sealed: Vec<usize> = (NONCE_OFFSET..TAG_PREFIX_OFFSET)
				.chain(TAG_OFFSET..envelope.len())
				.collect();
			envelope[*position.get(&sealed)] ^= 1 << bit;

			prop_assert!(matches!(codec.decode(&envelope, key), Err(Error::AuthenticationFailed)));
		}
	}
}
