// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Auxiliary working buffers requested by the offload processor.

use crate::{
    algo::AlgoFlags,
    alloc::{Allocator, SharedBuffer},
    error::{Error, Result},
    registration::{self, Registration},
    remote::{BufferDescriptor, RemoteHandle, RemoteService},
};
use tracing::{debug, error};

pub const MAX_SCRATCH_BUFS: usize = 16;

#[derive(Debug)]
pub struct ScratchBuffer {
    pub size: u32,
    pub offset: u32,
    pub secure: bool,
    buf: SharedBuffer,
    registration: Registration,
}

impl ScratchBuffer {
    pub fn descriptor(&self) -> BufferDescriptor {
        BufferDescriptor {
            fd: self.buf.fd,
            len: self.size,
            offset: self.offset,
        }
    }
}

/// Scratch buffers exclusively owned by one session. Allocation is
/// all-or-nothing.
#[derive(Debug)]
pub struct ScratchPool {
    secure: bool,
    buffers: Vec<ScratchBuffer>,
}

impl ScratchPool {
    pub fn new(secure: bool) -> Self {
        Self {
            secure,
            buffers: Vec::new(),
        }
    }

    /// Allocates and registers one buffer per non-zero requirement. If any
    /// allocation fails every buffer allocated by this call is unregistered
    /// and freed before the error is returned.
    pub fn allocate(
        &mut self,
        allocator: &dyn Allocator,
        remote: &dyn RemoteService,
        requirements: &[u32],
    ) -> Result<()> {
        if !self.buffers.is_empty() {
            return Err(Error::InvalidState(
                "scratch buffers already allocated".to_owned(),
            ));
        }
        if requirements.len() > MAX_SCRATCH_BUFS {
            return Err(Error::InvalidArgument(format!(
                "{} scratch requirements exceed max {}",
                requirements.len(),
                MAX_SCRATCH_BUFS
            )));
        }

        for &size in requirements.iter().filter(|&&size| size != 0) {
            match allocator.alloc(size, self.secure) {
                Ok(buf) => {
                    let registration = registration::register(remote, &buf);
                    self.buffers.push(ScratchBuffer {
                        size,
                        offset: 0,
                        secure: self.secure,
                        buf,
                        registration,
                    });
                }
                Err(e) => {
                    error!(
                        "scratch allocation {} of {} bytes failed: {}",
                        self.buffers.len(),
                        size,
                        e
                    );
                    self.free(allocator, remote);
                    return Err(e);
                }
            }
        }
        debug!("allocated {} scratch buffers", self.buffers.len());
        Ok(())
    }

    /// Hands every buffer to the processor in one call. Nothing is sent for
    /// an empty pool.
    pub fn send(
        &self,
        remote: &dyn RemoteService,
        handle: RemoteHandle,
        flags: AlgoFlags,
    ) -> Result<()> {
        if self.buffers.is_empty() {
            return Ok(());
        }
        let descriptors: Vec<BufferDescriptor> =
            self.buffers.iter().map(ScratchBuffer::descriptor).collect();
        remote
            .set_scratch_buffers(handle, flags, &descriptors)
            .map_err(|status| {
                error!("set_scratch_buffers failed: {}", status);
                Error::remote("set_scratch_buffers", status)
            })
    }

    /// Reclaims processor-side scratch state. Must precede [`ScratchPool::free`].
    pub fn retrieve(&self, remote: &dyn RemoteService, handle: RemoteHandle) -> Result<()> {
        remote.retrieve_scratch_buffers(handle).map_err(|status| {
            error!("retrieve_scratch_buffers failed: {}", status);
            Error::remote("retrieve_scratch_buffers", status)
        })
    }

    pub fn free(&mut self, allocator: &dyn Allocator, remote: &dyn RemoteService) {
        for scratch in self.buffers.drain(..) {
            registration::unregister(remote, &scratch.buf, scratch.registration);
            allocator.free(scratch.buf);
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn buffers(&self) -> &[ScratchBuffer] {
        &self.buffers
    }
}
