use parking_lot::Mutex;
use std::{
	collections::HashMap,
	ops::{Deref, DerefMut},
	sync::{Arc, LazyLock},
};
use zeroize::Zeroize as _;

use super::Error;

/// Requests smaller than this many bytes are served from a region on the caller's stack, and
/// never touch the pool.
pub const STACK_THRESHOLD: usize = 1024;

/// Somewhere to get a short-lived scratch buffer from.
///
/// Whatever the buffer is backed by, it is zeroed before it is given back, on every way out of
/// the closure: returning `Ok`, returning `Err`, or unwinding.
pub trait BufferSource {
	/// Run `f` over a scratch buffer of exactly `size` bytes.
	fn with_buffer<T>(
		&self,
		size: usize,
		f: impl FnOnce(&mut [u8]) -> Result<T, Error>,
	) -> Result<T, Error>;
}

/// Limits on how much memory a [`BufferPool`] holds on to between uses.
///
/// These only control retention; a request is always satisfied, even if that means allocating
/// a buffer that will be thrown away again afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolConfig {
	max_retained_bytes: usize,
	max_buffers_per_class: usize,
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self {
			max_retained_bytes: 16 * 1024 * 1024,
			max_buffers_per_class: 64,
		}
	}
}

impl PoolConfig {
	/// The most bytes, across all size classes, that idle buffers may occupy.
	pub fn with_max_retained_bytes(self, max_retained_bytes: usize) -> Self {
		Self {
			max_retained_bytes,
			..self
		}
	}

	/// The most idle buffers kept for any one size class.
	pub fn with_max_buffers_per_class(self, max_buffers_per_class: usize) -> Self {
		Self {
			max_buffers_per_class,
			..self
		}
	}

	pub fn max_retained_bytes(&self) -> usize {
		self.max_retained_bytes
	}

	pub fn max_buffers_per_class(&self) -> usize {
		self.max_buffers_per_class
	}
}

/// A point-in-time view of a [`BufferPool`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
	/// Idle buffers waiting to be borrowed.
	pub retained_buffers: usize,
	/// Bytes held by those idle buffers.
	pub retained_bytes: usize,
	/// Buffers the pool has ever had to allocate.
	pub allocations: u64,
	/// Buffers that were released while the pool was full, and freed.
	pub discarded: u64,
}

#[derive(Debug, Default)]
struct PoolState {
	classes: HashMap<usize, Vec<Vec<u8>>>,
	stats: PoolStats,
}

/// A thread-safe pool of reusable scratch buffers, for requests too large to put on the stack.
///
/// Buffers are grouped into power-of-two size classes.  The pool starts empty, allocates only
/// when a class has nothing idle, and keeps released buffers (up to the limits in its
/// [`PoolConfig`]) for the next borrower.  Every buffer is zeroed before it goes back in.
#[derive(Debug, Default)]
pub struct BufferPool {
	config: PoolConfig,
	state: Mutex<PoolState>,
}

static SHARED_POOL: LazyLock<Arc<BufferPool>> = LazyLock::new(|| Arc::new(BufferPool::default()));

impl BufferPool {
	pub fn new(config: PoolConfig) -> Self {
		Self {
			config,
			state: Mutex::default(),
		}
	}

	/// The process-wide pool used by [`EnvelopeCodec::default`](super::EnvelopeCodec::default).
	pub fn shared() -> Arc<Self> {
		Arc::clone(&SHARED_POOL)
	}

	pub fn config(&self) -> &PoolConfig {
		&self.config
	}

	pub fn stats(&self) -> PoolStats {
		let state = self.state.lock();
		state.stats
	}

	/// Borrow a buffer of exactly `size` bytes, regardless of [`STACK_THRESHOLD`].
	#[tracing::instrument(level = "trace", skip(self))]
	pub fn borrow(&self, size: usize) -> ScopedBuffer<'_> {
		let class = size_class(size);

		let idle = {
			let mut state = self.state.lock();
			let buf = state.classes.get_mut(&class).and_then(Vec::pop);
			match &buf {
				Some(b) => {
					state.stats.retained_buffers -= 1;
					state.stats.retained_bytes -= b.len();
				}
				None => state.stats.allocations += 1,
			}
			buf
		};

		let buffer = idle.unwrap_or_else(|| {
			tracing::trace!(class, "Growing pool");
			vec![0u8; class]
		});

		ScopedBuffer {
			backing: Backing::Pooled {
				pool: self,
				buffer,
				len: size,
			},
		}
	}

	fn give_back(&self, buffer: Vec<u8>) {
		let class = buffer.len();
		let mut state = self.state.lock();

		let class_full = state
			.classes
			.get(&class)
			.is_some_and(|idle| idle.len() >= self.config.max_buffers_per_class);
		let over_budget =
			state.stats.retained_bytes.saturating_add(class) > self.config.max_retained_bytes;

		if class_full || over_budget {
			state.stats.discarded += 1;
			drop(state);
			tracing::debug!(class, class_full, over_budget, "Pool full, freeing buffer");
			return;
		}

		state.stats.retained_buffers += 1;
		state.stats.retained_bytes += class;
		state.classes.entry(class).or_default().push(buffer);
	}
}

impl BufferSource for BufferPool {
	fn with_buffer<T>(
		&self,
		size: usize,
		f: impl FnOnce(&mut [u8]) -> Result<T, Error>,
	) -> Result<T, Error> {
		if size < STACK_THRESHOLD {
			tracing::trace!(size, "Using stack scratch region");
			let mut region = [0u8; STACK_THRESHOLD];
			let mut buf = ScopedBuffer::local(&mut region[..size]);
			f(&mut buf)
		} else {
			tracing::trace!(size, "Using pooled scratch buffer");
			let mut buf = self.borrow(size);
			f(&mut buf)
		}
	}
}

impl<S: BufferSource> BufferSource for Arc<S> {
	fn with_buffer<T>(
		&self,
		size: usize,
		f: impl FnOnce(&mut [u8]) -> Result<T, Error>,
	) -> Result<T, Error> {
		(**self).with_buffer(size, f)
	}
}

fn size_class(size: usize) -> usize {
	size.max(STACK_THRESHOLD)
		.checked_next_power_of_two()
		.unwrap_or(size)
}

enum Backing<'a> {
	Local(&'a mut [u8]),
	Pooled {
		pool: &'a BufferPool,
		buffer: Vec<u8>,
		len: usize,
	},
}

/// A scratch buffer that is zeroed, and handed back to wherever it came from, when dropped.
pub struct ScopedBuffer<'a> {
	backing: Backing<'a>,
}

impl std::fmt::Debug for ScopedBuffer<'_> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
		f.debug_struct("ScopedBuffer")
			.field("len", &self.len())
			.field("pooled", &self.is_pooled())
			.finish()
	}
}

impl<'a> ScopedBuffer<'a> {
	/// Wrap a caller-owned region; it will be zeroed when the [`ScopedBuffer`] is dropped.
	pub fn local(region: &'a mut [u8]) -> Self {
		Self {
			backing: Backing::Local(region),
		}
	}

	pub fn is_pooled(&self) -> bool {
		matches!(self.backing, Backing::Pooled { .. })
	}
}

impl Deref for ScopedBuffer<'_> {
	type Target = [u8];

	fn deref(&self) -> &[u8] {
		match &self.backing {
			Backing::Local(region) => &**region,
			Backing::Pooled { buffer, len, .. } => &buffer[..*len],
		}
	}
}

impl DerefMut for ScopedBuffer<'_> {
	fn deref_mut(&mut self) -> &mut [u8] {
		match &mut self.backing {
			Backing::Local(region) => &mut **region,
			Backing::Pooled { buffer, len, .. } => &mut buffer[..*len],
		}
	}
}

impl Drop for ScopedBuffer<'_> {
	fn drop(&mut self) {
		match &mut self.backing {
			Backing::Local(region) => (**region).zeroize(),
			Backing::Pooled { pool, buffer, .. } => {
				// The whole class, not just the part we lent out
				buffer.as_mut_slice().zeroize();
				pool.give_back(std::mem::take(buffer));
			}
		}
	}
}
