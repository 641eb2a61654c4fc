use criterion::{criterion_group, criterion_main, Criterion};
use edgefirst_offload::{
    algo::{AlgoFlags, AlgorithmId},
    frame::{PixelFormat, PortParams},
    manager::{CoreConfig, OffloadCore},
    session::Session,
    sim::{SimAllocator, SimRemote},
};
use std::sync::Arc;

fn core() -> Arc<OffloadCore> {
    OffloadCore::new(
        Arc::new(SimRemote::with_default_tunings()),
        Arc::new(SimAllocator::new()),
        CoreConfig::default(),
    )
}

pub fn benchmark_open_close(c: &mut Criterion) {
    let algos = [
        ("nr", AlgoFlags::from(AlgorithmId::NR)),
        ("nr+ie", AlgoFlags::from(AlgorithmId::NR) | AlgorithmId::IE),
        (
            "mvp+nr+ie",
            AlgoFlags::from(AlgorithmId::MVP) | AlgorithmId::NR | AlgorithmId::IE,
        ),
    ];

    let mut group = c.benchmark_group("open_close");
    for (name, flags) in algos {
        let core = core();
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut session = Session::new(core.clone(), false);
                session.open(flags, 0).unwrap();
                session.close().unwrap();
            })
        });
    }
    group.finish();

    // Process boot keeps the records alive across sessions.
    let core = core();
    let flags = AlgoFlags::from(AlgorithmId::NR) | AlgorithmId::IE;
    core.boot(None, flags).unwrap();
    c.bench_function("open_close/booted", |b| {
        b.iter(|| {
            let mut session = Session::new(core.clone(), false);
            session.open(flags, 0).unwrap();
            session.close().unwrap();
        })
    });
    core.shutdown(flags).unwrap();
}

pub fn benchmark_reconfigure(c: &mut Criterion) {
    let dims = [(640, 480), (1920, 1080), (3840, 2160)];
    let core = core();
    let mut session = Session::new(core, false);
    session
        .open(AlgoFlags::from(AlgorithmId::NR), 0)
        .unwrap();

    let mut group = c.benchmark_group("reconfigure");
    for (width, height) in dims {
        let port = PortParams::new(width, height, PixelFormat::Nv12);
        group.bench_with_input(format!("{}x{}", width, height), &port, |b, port| {
            b.iter(|| session.reconfigure(*port, *port).unwrap())
        });
    }
    group.finish();
    session.close().unwrap();
}

criterion_group!(benches, benchmark_open_close, benchmark_reconfigure);
criterion_main!(benches);
