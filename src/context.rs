// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! The per-session context buffer carrying cross-frame state between this
//! process and the offload processor.

use crate::{
    alloc::{Allocator, SharedBuffer},
    error::{Error, Result},
    registration::{self, Registration},
    remote::{BufferDescriptor, RemoteService},
};
use tracing::{debug, error};

/// Rounds `value` up to a multiple of `alignment`, which must be non-zero.
/// Returns `None` if the result does not fit in 32 bits.
pub fn align_up(value: u32, alignment: u32) -> Option<u32> {
    value.div_ceil(alignment).checked_mul(alignment)
}

/// What a session needs to hand the context to the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextHandle {
    /// Allocator id of the backing buffer. Unchanged while the buffer is
    /// reused.
    pub buffer_id: u64,
    pub descriptor: BufferDescriptor,
    pub registration: Registration,
}

struct Allocated {
    buf: SharedBuffer,
    registration: Registration,
}

/// Context buffer exclusively owned by one session.
///
/// The buffer is allocated lazily, reused while it is large enough, and
/// reallocated only when the requirement grows. Shrinking never reallocates.
pub struct ContextBuffer {
    secure: bool,
    alignment: u32,
    length: u32,
    current: Option<Allocated>,
}

impl ContextBuffer {
    pub fn new(secure: bool, alignment: u32) -> Self {
        Self {
            secure,
            alignment: alignment.max(1),
            length: 0,
            current: None,
        }
    }

    /// Makes sure the buffer holds at least `required` bytes, rounded up to
    /// the processor's alignment.
    ///
    /// A buffer that is too small is released before the larger one is
    /// allocated, so an allocation failure leaves the session with no
    /// context buffer at all.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a zero requirement and the
    /// allocator's error if a new buffer cannot be allocated.
    pub fn ensure_capacity(
        &mut self,
        allocator: &dyn Allocator,
        remote: &dyn RemoteService,
        required: u32,
    ) -> Result<ContextHandle> {
        if required == 0 {
            return Err(Error::InvalidArgument("zero context size".to_owned()));
        }
        let size = self.aligned_size(required)?;

        if let Some(current) = &self.current {
            if current.buf.len >= size {
                debug!(
                    "reusing context buffer {} ({} >= {})",
                    current.buf.id, current.buf.len, size
                );
                self.length = size;
                return self.handle().ok_or_else(missing);
            }
            debug!(
                "context buffer {} too small ({} < {}), reallocating",
                current.buf.id, current.buf.len, size
            );
            self.release(allocator, remote);
        }

        let buf = allocator.alloc(size, self.secure).inspect_err(|e| {
            error!("unable to allocate {} byte context buffer: {}", size, e);
        })?;
        let registration = registration::register(remote, &buf);
        debug!("context buffer {} allocated, {} bytes", buf.id, size);
        self.current = Some(Allocated { buf, registration });
        self.length = size;
        self.handle().ok_or_else(missing)
    }

    /// `required` rounded up to the processor's alignment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the aligned size overflows.
    pub fn aligned_size(&self, required: u32) -> Result<u32> {
        align_up(required, self.alignment).ok_or_else(|| {
            error!("context size {} overflows when aligned", required);
            Error::InvalidArgument(format!(
                "context size {} aligned to {} overflows",
                required, self.alignment
            ))
        })
    }

    fn handle(&self) -> Option<ContextHandle> {
        self.current.as_ref().map(|current| ContextHandle {
            buffer_id: current.buf.id,
            descriptor: self.descriptor_of(&current.buf),
            registration: current.registration,
        })
    }

    fn descriptor_of(&self, buf: &SharedBuffer) -> BufferDescriptor {
        BufferDescriptor {
            fd: buf.fd,
            len: self.length,
            offset: 0,
        }
    }

    /// Descriptor of the current logical context, if a buffer is held.
    pub fn descriptor(&self) -> Option<BufferDescriptor> {
        self.current.as_ref().map(|c| self.descriptor_of(&c.buf))
    }

    pub fn is_allocated(&self) -> bool {
        self.current.is_some()
    }

    pub fn allocated_size(&self) -> u32 {
        self.current.as_ref().map_or(0, |c| c.buf.len)
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    /// Unregisters and frees the buffer. A no-op when nothing is held.
    pub fn release(&mut self, allocator: &dyn Allocator, remote: &dyn RemoteService) {
        if let Some(Allocated { buf, registration }) = self.current.take() {
            registration::unregister(remote, &buf, registration);
            debug!("context buffer {} released", buf.id);
            allocator.free(buf);
        }
        self.length = 0;
    }
}

fn missing() -> Error {
    Error::InvalidState("context buffer missing".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment() {
        assert_eq!(align_up(1, 128), Some(128));
        assert_eq!(align_up(128, 128), Some(128));
        assert_eq!(align_up(129, 128), Some(256));
        assert_eq!(align_up(u32::MAX - 10, 128), None);
        assert_eq!(align_up(u32::MAX - 127, 128), Some(u32::MAX - 127));
    }
}
