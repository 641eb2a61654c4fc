// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Buffer registration with the offload processor.
//!
//! Buffers mapped in this process are registered at their own virtual
//! address. Secure buffers cannot be mapped here, so the processor assigns
//! them an address instead. Registration failures are logged and never
//! abort the caller; the processor falls back to slower per-call mapping.

use crate::{
    alloc::SharedBuffer,
    error::{Error, Result},
    remote::{RemoteService, RemoteStatus},
};
use std::os::fd::RawFd;
use tracing::{debug, error};

/// How a buffer is known to the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Unmapped buffer, registered at a processor-assigned address.
    Secure { addr: u64 },
    /// Mapped buffer, registered at our virtual address.
    Mapped { addr: usize },
    Failed,
}

impl Registration {
    pub fn is_registered(&self) -> bool {
        !matches!(self, Registration::Failed)
    }
}

fn register_region(
    remote: &dyn RemoteService,
    fd: RawFd,
    len: u32,
    vaddr: Option<usize>,
) -> Registration {
    match vaddr {
        Some(addr) => {
            remote.register_buf(addr, len, fd);
            debug!("registered mapped buffer fd={} addr={:#x} len={}", fd, addr, len);
            Registration::Mapped { addr }
        }
        None => match remote.register_fd(fd, len) {
            Some(addr) => {
                debug!("registered unmapped buffer fd={} addr={:#x} len={}", fd, addr, len);
                Registration::Secure { addr }
            }
            None => {
                error!("unable to register unmapped buffer fd={} len={}", fd, len);
                Registration::Failed
            }
        },
    }
}

fn unregister_region(remote: &dyn RemoteService, registration: Registration, len: u32) {
    match registration {
        Registration::Secure { addr } => remote.unregister_buf(addr as usize, len),
        Registration::Mapped { addr } => remote.unregister_buf(addr, len),
        Registration::Failed => {}
    }
}

/// Registers a shared buffer, picking the path from whether it is mapped.
pub fn register(remote: &dyn RemoteService, buf: &SharedBuffer) -> Registration {
    register_region(remote, buf.fd, buf.len, buf.vaddr)
}

pub fn unregister(remote: &dyn RemoteService, buf: &SharedBuffer, registration: Registration) {
    unregister_region(remote, registration, buf.len);
}

/// A client frame buffer passed through a session.
///
/// Unmapped buffers carry no address until registered; the address assigned
/// by the processor is dropped again on unregister.
#[derive(Debug)]
pub struct PixelBuffer {
    pub fd: RawFd,
    pub len: u32,
    vaddr: Option<usize>,
    registration: Option<Registration>,
}

impl PixelBuffer {
    pub fn mapped(fd: RawFd, len: u32, vaddr: usize) -> Self {
        Self {
            fd,
            len,
            vaddr: Some(vaddr),
            registration: None,
        }
    }

    pub fn unmapped(fd: RawFd, len: u32) -> Self {
        Self {
            fd,
            len,
            vaddr: None,
            registration: None,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registration.is_some()
    }

    /// Address the processor uses for this buffer, if it has one.
    pub fn addr(&self) -> Option<u64> {
        match self.registration {
            Some(Registration::Secure { addr }) => Some(addr),
            _ => self.vaddr.map(|addr| addr as u64),
        }
    }
}

/// Registers a pixel buffer. Registering an already registered buffer is a
/// no-op.
///
/// # Errors
///
/// Returns [`Error::RemoteService`] if the processor refuses to assign an
/// address to an unmapped buffer.
pub fn register_pixel_buffer(remote: &dyn RemoteService, buf: &mut PixelBuffer) -> Result<()> {
    if buf.registration.is_some() {
        return Ok(());
    }
    match register_region(remote, buf.fd, buf.len, buf.vaddr) {
        Registration::Failed => Err(Error::remote("register_fd", RemoteStatus::FAILED)),
        registration => {
            buf.registration = Some(registration);
            Ok(())
        }
    }
}

pub fn unregister_pixel_buffer(remote: &dyn RemoteService, buf: &mut PixelBuffer) {
    if let Some(registration) = buf.registration.take() {
        unregister_region(remote, registration, buf.len);
    }
}
