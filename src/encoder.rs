use rand::{RngCore as _, rng};

use super::{
	Algorithm, BufferSource, Error,
	algorithm::{CipherContext, NONCE_SIZE, TAG_SIZE},
	layout::{self, CIPHERTEXT_OFFSET, NONCE_OFFSET, TAG_OFFSET, TAG_PREFIX_OFFSET},
};

/// Seal `plaintext` under `key` into a freshly-built envelope.
///
/// The envelope is assembled in a scratch buffer from `source`, so the only copy of the
/// plaintext that outlives this call is the caller's own.
#[tracing::instrument(
	level = "debug",
	skip_all,
	fields(%algorithm, plaintext_len = plaintext.len())
)]
pub(crate) fn encode(
	source: &impl BufferSource,
	algorithm: Algorithm,
	plaintext: &[u8],
	key: &[u8],
) -> Result<Vec<u8>, Error> {
	let cipher = CipherContext::new(algorithm, key)?;
	let final_size = layout::envelope_len(plaintext.len()).ok_or(Error::EncryptionFailed)?;

	source.with_buffer(final_size, |envelope| {
		let (head, ciphertext) = envelope.split_at_mut(CIPHERTEXT_OFFSET);

		layout::write_len_prefix(head, NONCE_SIZE)?;
		layout::write_len_prefix(&mut head[TAG_PREFIX_OFFSET..], TAG_SIZE)?;

		let nonce: &mut [u8; NONCE_SIZE] = (&mut head[NONCE_OFFSET..TAG_PREFIX_OFFSET])
			.try_into()
			.map_err(|_| Error::EncryptionFailed)?;
		// Never reused: every call, retried or not, draws its own
		rng().fill_bytes(nonce);

		ciphertext.copy_from_slice(plaintext);
		let tag = cipher.seal(nonce, ciphertext)?;
		head[TAG_OFFSET..].copy_from_slice(&tag);

		tracing::trace!(envelope_len = final_size, "Sealed");
		Ok(envelope.to_vec())
	})
}
