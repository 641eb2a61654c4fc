// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Shared-memory allocation for buffers exchanged with the offload processor.
//!
//! Buffers are either secure (allocated from a protected heap and never
//! mapped into this process) or non-secure (mapped so the processor can use
//! the lower-overhead registration path that reuses our virtual address).

use crate::{
    error::{Error, Result},
    remote::BufferDescriptor,
};
use dma_heap::{Heap, HeapKind};
use libc::{mmap, munmap, MAP_FAILED, MAP_SHARED, PROT_READ, PROT_WRITE};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    ffi::c_void,
    fmt,
    io,
    os::fd::{AsRawFd, OwnedFd, RawFd},
    path::PathBuf,
    ptr::null_mut,
    sync::atomic::{AtomicU64, Ordering},
};
use tracing::{debug, warn};

/// A buffer handed out by an [`Allocator`].
///
/// The buffer is owned by whoever holds this value and must be returned
/// through [`Allocator::free`].
#[derive(Debug, PartialEq, Eq)]
pub struct SharedBuffer {
    pub id: u64,
    pub fd: RawFd,
    pub len: u32,
    pub secure: bool,
    /// Address of the mapping in this process, absent for secure buffers.
    pub vaddr: Option<usize>,
}

impl SharedBuffer {
    pub fn descriptor(&self) -> BufferDescriptor {
        BufferDescriptor {
            fd: self.fd,
            len: self.len,
            offset: 0,
        }
    }
}

/// Physical memory backend.
pub trait Allocator: Send + Sync {
    /// Allocates `len` bytes tagged secure or non-secure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] when the backing heap is exhausted.
    fn alloc(&self, len: u32, secure: bool) -> Result<SharedBuffer>;

    fn free(&self, buf: SharedBuffer);

    /// Copies `data` to the start of a mapped buffer.
    fn write(&self, buf: &SharedBuffer, data: &[u8]) -> Result<()>;
}

struct Mapping {
    ptr: *mut u8,
    len: usize,
}

// The mapping is only touched through the allocator's lock.
unsafe impl Send for Mapping {}

impl Drop for Mapping {
    fn drop(&mut self) {
        if unsafe { munmap(self.ptr.cast::<c_void>(), self.len) } != 0 {
            warn!("unmap failed: {}", io::Error::last_os_error());
        }
    }
}

struct Allocation {
    map: Option<Mapping>,
    fd: OwnedFd,
}

/// Allocator backed by Linux DMA heaps.
///
/// Non-secure buffers come from the CMA or system heap and are mapped with
/// `mmap`; secure buffers come from a vendor heap device and stay unmapped.
pub struct DmaHeapAllocator {
    heap: Heap,
    secure_heap: Option<Heap>,
    next_id: AtomicU64,
    live: Mutex<HashMap<u64, Allocation>>,
}

impl DmaHeapAllocator {
    /// Opens the non-secure heap and, when given, the secure heap device.
    ///
    /// # Errors
    ///
    /// Returns an error if a heap device cannot be opened.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use dma_heap::HeapKind;
    /// use edgefirst_offload::alloc::{Allocator, DmaHeapAllocator};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let allocator = DmaHeapAllocator::new(HeapKind::Cma, None)?;
    /// let buf = allocator.alloc(4096, false)?;
    /// allocator.free(buf);
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(kind: HeapKind, secure_heap: Option<PathBuf>) -> Result<Self> {
        let heap = Heap::new(kind).map_err(heap_error)?;
        let secure_heap = match secure_heap {
            Some(path) => Some(Heap::new(HeapKind::Custom(path)).map_err(heap_error)?),
            None => None,
        };
        Ok(Self {
            heap,
            secure_heap,
            next_id: AtomicU64::new(1),
            live: Mutex::new(HashMap::new()),
        })
    }
}

fn heap_error<E: fmt::Debug>(err: E) -> Error {
    Error::Io(io::Error::other(format!("{:?}", err)))
}

impl Allocator for DmaHeapAllocator {
    fn alloc(&self, len: u32, secure: bool) -> Result<SharedBuffer> {
        if len == 0 {
            return Err(Error::InvalidArgument("zero length allocation".to_owned()));
        }
        let heap = if secure {
            self.secure_heap
                .as_ref()
                .ok_or_else(|| Error::InvalidArgument("no secure heap configured".to_owned()))?
        } else {
            &self.heap
        };
        let fd = heap
            .allocate(len as usize)
            .map_err(|e| Error::OutOfMemory(format!("{} bytes: {:?}", len, e)))?;

        let map = if secure {
            None
        } else {
            let ptr = unsafe {
                mmap(
                    null_mut(),
                    len as usize,
                    PROT_READ | PROT_WRITE,
                    MAP_SHARED,
                    fd.as_raw_fd(),
                    0,
                )
            };
            if ptr == MAP_FAILED {
                return Err(Error::Io(io::Error::last_os_error()));
            }
            Some(Mapping {
                ptr: ptr.cast::<u8>(),
                len: len as usize,
            })
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let buf = SharedBuffer {
            id,
            fd: fd.as_raw_fd(),
            len,
            secure,
            vaddr: map.as_ref().map(|m| m.ptr as usize),
        };
        debug!("dma buffer {} alloc'd: fd={} len={} secure={}", id, buf.fd, len, secure);
        self.live.lock().insert(id, Allocation { fd, map });
        Ok(buf)
    }

    fn free(&self, buf: SharedBuffer) {
        match self.live.lock().remove(&buf.id) {
            Some(allocation) => {
                debug!(
                    "dma buffer {} freed: fd={}",
                    buf.id,
                    allocation.fd.as_raw_fd()
                );
            }
            None => warn!("free of unknown dma buffer {}", buf.id),
        }
    }

    fn write(&self, buf: &SharedBuffer, data: &[u8]) -> Result<()> {
        let live = self.live.lock();
        let map = live
            .get(&buf.id)
            .and_then(|a| a.map.as_ref())
            .ok_or_else(|| Error::InvalidArgument(format!("buffer {} is not mapped", buf.id)))?;
        if data.len() > map.len {
            return Err(Error::InvalidArgument(format!(
                "{} bytes do not fit in buffer {} of {} bytes",
                data.len(),
                buf.id,
                map.len
            )));
        }
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), map.ptr, data.len()) };
        Ok(())
    }
}
