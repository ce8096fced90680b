//! The envelope wire format.
//!
//! ```text
//! +-----------+-----------+---------+-----------+----------------------+
//! | nonce_len |   nonce   | tag_len |    tag    |      ciphertext      |
//! |  4 (LE)   | nonce_len | 4 (LE)  |  tag_len  | everything remaining |
//! +-----------+-----------+---------+-----------+----------------------+
//! ```
//!
//! There is no magic and no version byte; the ciphertext length is implied by the length of
//! the envelope.
use super::{
	Error,
	algorithm::{NONCE_SIZE, TAG_SIZE},
};

/// Size of each length prefix.
pub const LEN_PREFIX: usize = size_of::<u32>();

pub(crate) const NONCE_OFFSET: usize = LEN_PREFIX;
pub(crate) const TAG_PREFIX_OFFSET: usize = NONCE_OFFSET + NONCE_SIZE;
pub(crate) const TAG_OFFSET: usize = TAG_PREFIX_OFFSET + LEN_PREFIX;
pub(crate) const CIPHERTEXT_OFFSET: usize = TAG_OFFSET + TAG_SIZE;

/// Bytes an envelope adds on top of its ciphertext.
pub const ENVELOPE_OVERHEAD: usize = CIPHERTEXT_OFFSET;

/// The total size of an envelope holding `plaintext_len` bytes of plaintext.
pub fn envelope_len(plaintext_len: usize) -> Option<usize> {
	ENVELOPE_OVERHEAD.checked_add(plaintext_len)
}

pub(crate) fn write_len_prefix(dst: &mut [u8], len: usize) -> Result<(), Error> {
	let len = u32::try_from(len).map_err(|_| Error::EncryptionFailed)?;
	let Some(prefix) = dst.get_mut(..LEN_PREFIX) else {
		return Err(Error::EncryptionFailed);
	};
	prefix.copy_from_slice(&len.to_le_bytes());
	Ok(())
}

fn read_len_prefix(src: &[u8], offset: usize, element: &str) -> Result<usize, Error> {
	let prefix: [u8; LEN_PREFIX] = offset
		.checked_add(LEN_PREFIX)
		.and_then(|end| src.get(offset..end))
		.and_then(|b| b.try_into().ok())
		.ok_or_else(|| Error::malformed_envelope(format!("truncated {element} length")))?;

	usize::try_from(u32::from_le_bytes(prefix))
		.map_err(|_| Error::malformed_envelope(format!("{element} length does not fit")))
}

/// Borrowed views of the sections of an envelope.
#[derive(Debug)]
pub(crate) struct EnvelopeParts<'a> {
	pub(crate) nonce: &'a [u8; NONCE_SIZE],
	pub(crate) tag: &'a [u8; TAG_SIZE],
	pub(crate) ciphertext: &'a [u8],
}

impl<'a> TryFrom<&'a [u8]> for EnvelopeParts<'a> {
	type Error = Error;

	fn try_from(b: &'a [u8]) -> Result<Self, Self::Error> {
		if b.len() < 2 * LEN_PREFIX {
			return Err(Error::malformed_envelope("too short"));
		}

		let nonce_len = read_len_prefix(b, 0, "nonce")?;
		let nonce_end = LEN_PREFIX
			.checked_add(nonce_len)
			.filter(|end| end.saturating_add(LEN_PREFIX) <= b.len())
			.ok_or_else(|| Error::malformed_envelope("nonce runs past end of envelope"))?;
		if nonce_len != NONCE_SIZE {
			tracing::debug!(nonce_len, expected = NONCE_SIZE, "Wrong nonce length");
			return Err(Error::malformed_envelope("incorrect nonce length"));
		}

		let tag_len = read_len_prefix(b, nonce_end, "tag")?;
		let tag_start = nonce_end + LEN_PREFIX;
		let tag_end = tag_start
			.checked_add(tag_len)
			.filter(|end| *end <= b.len())
			.ok_or_else(|| Error::malformed_envelope("tag runs past end of envelope"))?;
		if tag_len != TAG_SIZE {
			tracing::debug!(tag_len, expected = TAG_SIZE, "Wrong tag length");
			return Err(Error::malformed_envelope("incorrect tag length"));
		}

		let nonce = b[LEN_PREFIX..nonce_end]
			.try_into()
			.map_err(|_| Error::malformed_envelope("bad nonce"))?;
		let tag = b[tag_start..tag_end]
			.try_into()
			.map_err(|_| Error::malformed_envelope("bad tag"))?;

		Ok(Self {
			nonce,
			tag,
			ciphertext: &b[tag_end..],
		})
	}
}
