// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use dma_heap::HeapKind;
use edgefirst_offload::{
    algo::{AlgoFlags, AlgorithmId},
    frame::{PixelFormat, PortParams},
    manager::CoreConfig,
    remote::DebugConfig,
};
use std::path::PathBuf;

/// Offload algorithms selectable from the command line.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum Algo {
    /// Motion vector processing
    Mvp,
    /// Noise reduction
    Nr,
    /// Image enhancement
    Ie,
    /// Frame rate conversion
    Frc,
}

impl From<Algo> for AlgorithmId {
    fn from(algo: Algo) -> Self {
        match algo {
            Algo::Mvp => AlgorithmId::MVP,
            Algo::Nr => AlgorithmId::NR,
            Algo::Ie => AlgorithmId::IE,
            Algo::Frc => AlgorithmId::FRC,
        }
    }
}

/// Backend for context, scratch and tuning buffers.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum AllocatorSetting {
    /// In-process simulated allocator
    Sim,
    /// Linux DMA heap
    DmaHeap,
}

/// DMA heap used for non-secure buffers.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum HeapSetting {
    /// Contiguous memory allocator heap
    Cma,
    /// System heap
    System,
}

impl From<HeapSetting> for HeapKind {
    fn from(heap: HeapSetting) -> Self {
        match heap {
            HeapSetting::Cma => HeapKind::Cma,
            HeapSetting::System => HeapKind::System,
        }
    }
}

/// Command-line arguments for the EdgeFirst Offload session harness.
///
/// The harness runs concurrent sessions against the offload core, each
/// repeatedly opening, reconfiguring and closing, optionally wrapped in a
/// process-wide tuning boot and shutdown. Arguments can be specified via
/// command line or environment variables.
///
/// # Example
///
/// ```bash
/// # Via command line
/// edgefirst-offload --sessions 8 --iterations 100 --boot
///
/// # Via environment variables
/// export SESSIONS=8
/// export ALGOS="nr ie"
/// edgefirst-offload
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Number of concurrent sessions
    #[arg(short, long, env = "SESSIONS", default_value = "4")]
    pub sessions: usize,

    /// Open/reconfigure/close cycles per session
    #[arg(short, long, env = "ITERATIONS", default_value = "10")]
    pub iterations: usize,

    /// Algorithms enabled on each session
    #[arg(
        long,
        env = "ALGOS",
        default_value = "mvp nr ie",
        value_delimiter = ' ',
        value_enum
    )]
    pub algos: Vec<Algo>,

    /// Tuning file (JSON) applied at boot
    #[arg(long, env = "TUNING_FILE")]
    pub tuning_file: Option<PathBuf>,

    /// Boot tunings for the whole process before starting sessions
    #[arg(long, env = "BOOT")]
    pub boot: bool,

    /// Refuse to boot tunings on demand when a session opens
    #[arg(long, env = "NO_RUNTIME_BOOT")]
    pub no_runtime_boot: bool,

    /// Open secure sessions
    #[arg(long, env = "SECURE")]
    pub secure: bool,

    /// Input frame resolution in pixels (width height)
    #[arg(
        long,
        env = "FRAME_SIZE",
        default_value = "1920 1080",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub frame_size: Vec<u32>,

    /// Resolution each session reconfigures to while open (width height)
    #[arg(
        long,
        env = "RECONFIGURE_SIZE",
        default_value = "1280 720",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub reconfigure_size: Vec<u32>,

    /// Buffer allocator backend
    #[arg(long, env = "ALLOCATOR", default_value = "sim", value_enum)]
    pub allocator: AllocatorSetting,

    /// DMA heap for non-secure buffers
    #[arg(long, env = "HEAP", default_value = "cma", value_enum)]
    pub heap: HeapSetting,

    /// DMA heap device for secure buffers (e.g., /dev/dma_heap/secure)
    #[arg(long, env = "SECURE_HEAP")]
    pub secure_heap: Option<PathBuf>,

    /// Protected heap id secure sessions migrate to
    #[arg(long, env = "SECURE_HEAP_ID", default_value = "10")]
    pub secure_heap_id: u32,

    /// Maximum secure session migration attempts
    #[arg(long, env = "MIGRATE_ATTEMPTS", default_value = "1000")]
    pub migrate_attempts: u32,

    /// Offload service URI
    #[arg(long, env = "SERVICE_URI", default_value = "offload://cdsp")]
    pub service_uri: String,

    /// Firmware log flags
    #[arg(long, env = "OFFLOAD_LOG_FLAGS", default_value = "0")]
    pub log_flags: u64,

    /// Firmware statistics flags
    #[arg(long, env = "OFFLOAD_STATS_FLAGS", default_value = "0")]
    pub stats_flags: u32,

    /// Firmware statistics period
    #[arg(long, env = "OFFLOAD_STATS_PERIOD", default_value = "0")]
    pub stats_period: u32,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable Tokio async runtime console for debugging
    #[arg(long, env = "TOKIO_CONSOLE")]
    pub tokio_console: bool,

    /// Enable Tracy profiler for performance analysis
    #[arg(long, env = "TRACY")]
    pub tracy: bool,
}

impl Args {
    pub fn algo_flags(&self) -> AlgoFlags {
        self.algos.iter().map(|&algo| AlgorithmId::from(algo)).collect()
    }

    pub fn input(&self) -> PortParams {
        PortParams::new(self.frame_size[0], self.frame_size[1], PixelFormat::Nv12)
    }

    pub fn reconfigured(&self) -> PortParams {
        PortParams::new(
            self.reconfigure_size[0],
            self.reconfigure_size[1],
            PixelFormat::Nv12,
        )
    }
}

impl From<&Args> for CoreConfig {
    fn from(args: &Args) -> Self {
        CoreConfig {
            service_uri: args.service_uri.clone(),
            max_migrate_attempts: args.migrate_attempts,
            runtime_boot: !args.no_runtime_boot,
            supported_algos: AlgoFlags::from(AlgorithmId::MVP)
                | AlgorithmId::NR
                | AlgorithmId::IE
                | AlgorithmId::FRC,
            tuning_file: args.tuning_file.clone(),
            secure_heap_id: args.secure_heap_id,
            debug: DebugConfig {
                log_flags: args.log_flags,
                stats_flags: args.stats_flags,
                stats_period: args.stats_period,
            },
            ..CoreConfig::default()
        }
    }
}
