//! Bump-allocated memory pool backing all nodes of one encode/decode session.
//!
//! Every `Type`, `Value`, field list, and byte span produced during a
//! session is allocated here and lives exactly as long as the arena. No
//! node is ever freed individually; [`Arena::reset`] marks all blocks
//! reusable without releasing them, and dropping the arena releases
//! everything.

use std::alloc::Layout;

use bumpalo::Bump;

use crate::error::Error;

/// Arena allocator for codec nodes.
///
/// The arena is not synchronized; the intended discipline is one arena per
/// logical request, dropped (or reset) when the request completes.
#[derive(Debug, Default)]
pub struct Arena {
    bump: Bump,
}

impl Arena {
    /// Creates an empty arena.
    pub fn new() -> Arena {
        Arena { bump: Bump::new() }
    }

    /// Creates an arena with `bytes` of pre-reserved capacity.
    pub fn with_capacity(bytes: usize) -> Arena {
        Arena {
            bump: Bump::with_capacity(bytes),
        }
    }

    /// Allocates a single value in the arena.
    pub fn try_alloc<T>(&self, value: T, context: &'static str) -> Result<&mut T, Error> {
        self.bump
            .try_alloc(value)
            .map_err(|_| Error::ArenaExhausted { context })
    }

    /// Duplicates a slice of `Copy` elements into the arena.
    pub fn try_alloc_slice<T: Copy>(
        &self,
        src: &[T],
        context: &'static str,
    ) -> Result<&mut [T], Error> {
        let layout = Layout::for_value(src);
        let ptr = self
            .bump
            .try_alloc_layout(layout)
            .map_err(|_| Error::ArenaExhausted { context })?;
        let dst = ptr.as_ptr().cast::<T>();
        // SAFETY: `dst` points to a fresh allocation of `layout`, which has
        // the size and alignment of `src`; the regions cannot overlap.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len());
            Ok(std::slice::from_raw_parts_mut(dst, src.len()))
        }
    }

    /// Duplicates a string into the arena.
    pub fn try_alloc_str(&self, src: &str, context: &'static str) -> Result<&str, Error> {
        let bytes = self.try_alloc_slice(src.as_bytes(), context)?;
        // SAFETY: `bytes` is a byte-for-byte copy of a valid UTF-8 string.
        Ok(unsafe { std::str::from_utf8_unchecked(bytes) })
    }

    /// Allocates a zero-filled byte span in the arena.
    pub fn try_alloc_zeroed(&self, len: usize, context: &'static str) -> Result<&mut [u8], Error> {
        let layout = Layout::array::<u8>(len).map_err(|_| Error::ArenaExhausted { context })?;
        let ptr = self
            .bump
            .try_alloc_layout(layout)
            .map_err(|_| Error::ArenaExhausted { context })?;
        // SAFETY: `ptr` points to a fresh allocation of `len` bytes.
        unsafe {
            std::ptr::write_bytes(ptr.as_ptr(), 0, len);
            Ok(std::slice::from_raw_parts_mut(ptr.as_ptr(), len))
        }
    }

    /// Marks all blocks empty for reuse without releasing memory.
    ///
    /// Requires exclusive access: every reference previously handed out
    /// must be gone before a reset is possible.
    pub fn reset(&mut self) {
        self.bump.reset();
    }

    /// Returns the total bytes currently reserved by the arena's blocks.
    pub fn allocated_bytes(&self) -> usize {
        self.bump.allocated_bytes()
    }
}
