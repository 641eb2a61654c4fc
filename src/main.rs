use args::{AllocatorSetting, Args};
use clap::Parser;
use edgefirst_offload::{
    algo::AlgoFlags,
    alloc::{Allocator, DmaHeapAllocator},
    manager::{CoreConfig, OffloadCore},
    session::Session,
    sim::{SimAllocator, SimRemote},
};
use kanal::Sender;
use std::{
    error::Error,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, error, info, info_span, warn};
use tracing_subscriber::{filter::LevelFilter, layer::SubscriberExt as _, Layer as _, Registry};

mod args;

/// Outcome of one open/reconfigure/close cycle.
#[derive(Debug)]
struct Report {
    worker: usize,
    iteration: usize,
    elapsed: Duration,
    error: Option<String>,
}

fn init_tracing(args: &Args) -> Result<(), Box<dyn Error>> {
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let stdout_log = tracing_subscriber::fmt::layer().with_filter(level);

    let journald = match tracing_journald::layer() {
        Ok(journald) => Some(journald.with_filter(level)),
        Err(_) => None,
    };

    let console = match args.tokio_console {
        true => Some(
            console_subscriber::ConsoleLayer::builder()
                .with_default_env()
                .spawn(),
        ),
        false => None,
    };

    let tracy = match args.tracy {
        true => {
            tracy_client::Client::start();
            Some(tracing_tracy::TracyLayer::default().with_filter(level))
        }
        false => None,
    };

    let subscriber = Registry::default()
        .with(stdout_log)
        .with(journald)
        .with(console)
        .with(tracy);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;

    Ok(())
}

fn run_worker(
    worker: usize,
    core: Arc<OffloadCore>,
    args: &Args,
    flags: AlgoFlags,
    tx: Sender<Report>,
) {
    let _span = info_span!("worker", worker).entered();

    for iteration in 0..args.iterations {
        let start = Instant::now();
        let mut session = Session::new(core.clone(), args.secure);

        let result = session
            .set_port_params(args.input(), args.input())
            .and_then(|_| session.open(flags, 0))
            .and_then(|_| session.reconfigure(args.reconfigured(), args.reconfigured()))
            .and_then(|_| session.reconfigure(args.input(), args.input()));

        // Close runs whether or not the cycle succeeded.
        let closed = session.close();

        let error = match (result, closed) {
            (Ok(_), Ok(_)) => None,
            (Err(e), _) | (Ok(_), Err(e)) => {
                warn!("cycle {} failed: {}", iteration, e);
                Some(e.to_string())
            }
        };

        let report = Report {
            worker,
            iteration,
            elapsed: start.elapsed(),
            error,
        };
        if tx.send(report).is_err() {
            debug!("report channel closed, stopping");
            return;
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let remote = Arc::new(SimRemote::with_default_tunings());
    let allocator: Arc<dyn Allocator> = match args.allocator {
        AllocatorSetting::Sim => Arc::new(SimAllocator::new()),
        AllocatorSetting::DmaHeap => Arc::new(DmaHeapAllocator::new(
            args.heap.into(),
            args.secure_heap.clone(),
        )?),
    };

    let core = OffloadCore::new(remote.clone(), allocator, CoreConfig::from(&args));
    let flags = args.algo_flags();
    info!("starting {} sessions with algorithms {}", args.sessions, flags);

    if args.boot {
        let booted = core.boot(args.tuning_file.as_deref(), flags)?;
        info!("booted tunings for {}", booted);
    }

    let (tx, rx) = kanal::bounded::<Report>(args.sessions.max(1) * 2);
    let start = Instant::now();

    let mut workers = Vec::with_capacity(args.sessions);
    for worker in 0..args.sessions {
        let core = core.clone();
        let args = args.clone();
        let tx = tx.clone();
        workers.push(tokio::task::spawn_blocking(move || {
            run_worker(worker, core, &args, flags, tx)
        }));
    }
    drop(tx);

    let collector = tokio::task::spawn_blocking(move || {
        let mut reports = Vec::new();
        while let Ok(report) = rx.recv() {
            debug!(
                "worker {} cycle {} took {:?}",
                report.worker, report.iteration, report.elapsed
            );
            reports.push(report);
        }
        reports
    });

    for worker in workers {
        worker.await?;
    }
    let reports = collector.await?;

    let failures = reports.iter().filter(|r| r.error.is_some()).count();
    let slowest = reports.iter().map(|r| r.elapsed).max().unwrap_or_default();
    info!(
        "{} cycles in {:?}, {} failed, slowest {:?}",
        reports.len(),
        start.elapsed(),
        failures,
        slowest
    );

    if args.boot {
        core.shutdown(flags)?;
        info!("shut down tunings for {}", flags);
    }

    if remote.open_handles() != 0 || remote.outstanding_contexts() != 0 {
        error!(
            "leaked remote state: {} handles, {} contexts",
            remote.open_handles(),
            remote.outstanding_contexts()
        );
    }

    match failures {
        0 => Ok(()),
        n => Err(format!("{} of {} cycles failed", n, reports.len()).into()),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(&args)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()?;
    runtime.block_on(run(args))
}
