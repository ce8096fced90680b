use super::{
	Algorithm, BufferSource, Error,
	algorithm::CipherContext,
	layout::EnvelopeParts,
};

/// Open an envelope sealed under `key`, returning the plaintext.
///
/// Plaintext only leaves the scratch buffer once the tag has checked out.
#[tracing::instrument(level = "debug", skip_all, fields(%algorithm, envelope_len = envelope.len()))]
pub(crate) fn decode(
	source: &impl BufferSource,
	algorithm: Algorithm,
	envelope: &[u8],
	key: &[u8],
) -> Result<Vec<u8>, Error> {
	let cipher = CipherContext::new(algorithm, key)?;
	let parts = EnvelopeParts::try_from(envelope)?;

	source.with_buffer(parts.ciphertext.len(), |plaintext| {
		plaintext.copy_from_slice(parts.ciphertext);

		cipher
			.open(parts.nonce, plaintext, parts.tag)
			.inspect_err(|_| tracing::debug!("Tag did not verify"))?;

		Ok(plaintext.to_vec())
	})
}
