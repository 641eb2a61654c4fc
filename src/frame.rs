// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Port parameters and frame geometry for offload sessions.
//!
//! The offload processor works on semi-planar YUV frames whose luma and
//! chroma planes are padded to hardware alignment. The frame size computed
//! here is what a session reports to the processor when sizing its context.

use crate::error::{Error, Result};
use std::fmt;

pub const MIN_WIDTH: u32 = 256;
pub const MIN_HEIGHT: u32 = 128;
pub const MAX_WIDTH: u32 = 8192;
pub const MAX_HEIGHT: u32 = 8192;

/// Pixel formats accepted on session ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4:2:0 semi-planar, CbCr order
    Nv12,
    /// 4:2:0 semi-planar, CrCb order
    Nv21,
    /// 4:2:0 semi-planar, 10 bits in 16-bit words
    P010,
}

impl PixelFormat {
    fn bytes_per_sample(self) -> u32 {
        match self {
            PixelFormat::Nv12 | PixelFormat::Nv21 => 1,
            PixelFormat::P010 => 2,
        }
    }

    fn stride_alignment(self) -> u32 {
        match self {
            PixelFormat::Nv12 | PixelFormat::Nv21 => 128,
            PixelFormat::P010 => 256,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            PixelFormat::Nv12 => "NV12",
            PixelFormat::Nv21 => "NV21",
            PixelFormat::P010 => "P010",
        };
        write!(f, "{}", name)
    }
}

/// Interlacing layout of the input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldFormat {
    #[default]
    Progressive,
    /// Both fields interleaved line by line, top field first
    InterleavedTff,
    /// Both fields interleaved line by line, bottom field first
    InterleavedBff,
    /// One field per buffer, top field first
    FrameTff,
    /// One field per buffer, bottom field first
    FrameBff,
}

/// Padded layout of a single plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plane {
    pub stride: u32,
    pub scanlines: u32,
}

impl Plane {
    pub fn size(&self) -> u32 {
        self.stride.saturating_mul(self.scanlines)
    }
}

/// Geometry of one session port (input or output).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortParams {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl PortParams {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    /// Checks the port against the processor's supported frame dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the width or height is below the
    /// supported minimum or above the supported maximum.
    pub fn validate(&self) -> Result<()> {
        if self.width < MIN_WIDTH || self.height < MIN_HEIGHT {
            return Err(Error::InvalidArgument(format!(
                "port {} below minimum {}x{}",
                self, MIN_WIDTH, MIN_HEIGHT
            )));
        }
        if self.width > MAX_WIDTH || self.height > MAX_HEIGHT {
            return Err(Error::InvalidArgument(format!(
                "port {} above maximum {}x{}",
                self, MAX_WIDTH, MAX_HEIGHT
            )));
        }
        Ok(())
    }

    /// Luma and chroma plane layouts.
    pub fn planes(&self) -> [Plane; 2] {
        let stride = align(
            self.width.saturating_mul(self.format.bytes_per_sample()),
            self.format.stride_alignment(),
        );
        [
            Plane {
                stride,
                scanlines: align(self.height, 32),
            },
            Plane {
                stride,
                scanlines: align(self.height.div_ceil(2), 16),
            },
        ]
    }

    /// Total padded frame size in bytes. Saturates for ports that fail
    /// [`PortParams::validate`].
    pub fn frame_size(&self) -> u32 {
        self.planes()
            .iter()
            .map(Plane::size)
            .fold(0, u32::saturating_add)
    }
}

impl Default for PortParams {
    fn default() -> Self {
        Self::new(1920, 1080, PixelFormat::Nv12)
    }
}

impl fmt::Display for PortParams {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.format)
    }
}

/// Frame geometry handed to the processor when a context is prepared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameProps {
    pub input: PortParams,
    pub output: PortParams,
    pub field: FieldFormat,
}

impl FrameProps {
    pub fn new(input: PortParams, output: PortParams) -> Self {
        Self {
            input,
            output,
            field: FieldFormat::Progressive,
        }
    }
}

fn align(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment).saturating_mul(alignment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_1080p() {
        let port = PortParams::new(1920, 1080, PixelFormat::Nv12);
        let [y, uv] = port.planes();
        assert_eq!(y.stride, 1920);
        assert_eq!(y.scanlines, 1088);
        assert_eq!(uv.scanlines, 544);
        assert_eq!(port.frame_size(), 3133440);
    }

    #[test]
    fn p010_stride() {
        let port = PortParams::new(1280, 720, PixelFormat::P010);
        assert_eq!(port.planes()[0].stride, 2560);
        let odd = PortParams::new(1000, 720, PixelFormat::P010);
        assert_eq!(odd.planes()[0].stride, 2048);
    }

    #[test]
    fn minimum() {
        assert!(PortParams::new(256, 128, PixelFormat::Nv21).validate().is_ok());
        assert!(PortParams::new(255, 128, PixelFormat::Nv21).validate().is_err());
        assert!(PortParams::new(256, 127, PixelFormat::Nv21).validate().is_err());
    }

    #[test]
    fn maximum() {
        let largest = PortParams::new(MAX_WIDTH, MAX_HEIGHT, PixelFormat::P010);
        assert!(largest.validate().is_ok());
        assert_eq!(largest.frame_size(), 16384 * (8192 + 4096));

        let huge = PortParams::new(70000, 70000, PixelFormat::Nv12);
        assert!(huge.validate().is_err());
        assert_eq!(huge.frame_size(), u32::MAX);
        assert!(PortParams::new(8193, 128, PixelFormat::Nv12).validate().is_err());
    }
}
