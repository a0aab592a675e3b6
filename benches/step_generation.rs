use criterion::{black_box, criterion_group, criterion_main, Criterion};
use glam::DVec3;
use photon_dispatch::{
    LightSource, MediumProperties, Particle, ParticleType, StdRandomService, StepGenerator,
    StepGeneratorConfig,
};

fn generator(max_bunch_size: usize) -> StepGenerator {
    let mut g = StepGenerator::new(
        StepGeneratorConfig::default(),
        Box::new(StdRandomService::new(2024)),
    )
    .unwrap();
    g.set_bunch_size_granularity(64).unwrap();
    g.set_max_bunch_size(max_bunch_size).unwrap();
    g.set_medium_properties(MediumProperties::uniform(250.0, 0.92).unwrap())
        .unwrap();
    g.initialize().unwrap();
    g
}

/// Enqueue one source, then pull bunches until the queue is empty.
fn drain(g: &mut StepGenerator, source: &LightSource) -> usize {
    g.enqueue_light_source(source, 1).unwrap();
    let mut steps = 0;
    while g.more_steps_available() {
        let (bunch, _) = g.conversion_result_with_barrier_info().unwrap();
        steps += bunch.len();
    }
    steps
}

fn bench_em_cascade_10gev(c: &mut Criterion) {
    let mut g = generator(65_536);
    let source = LightSource::Particle(Particle::new(
        ParticleType::EMinus,
        DVec3::new(0.0, 0.0, -300.0),
        DVec3::Z,
        0.0,
        10.0,
    ));

    c.bench_function("em_cascade_10gev", |b| {
        b.iter(|| drain(&mut g, black_box(&source)))
    });
}

fn bench_hadron_cascade_10gev(c: &mut Criterion) {
    let mut g = generator(65_536);
    let source = LightSource::Particle(Particle::new(
        ParticleType::PiPlus,
        DVec3::new(0.0, 0.0, -300.0),
        DVec3::Z,
        0.0,
        10.0,
    ));

    c.bench_function("hadron_cascade_10gev", |b| {
        b.iter(|| drain(&mut g, black_box(&source)))
    });
}

fn bench_muon_1km(c: &mut Criterion) {
    let mut g = generator(65_536);
    let source = LightSource::Particle(
        Particle::new(
            ParticleType::MuMinus,
            DVec3::new(0.0, 0.0, -300.0),
            DVec3::Z,
            0.0,
            100.0,
        )
        .with_length(1000.0),
    );

    c.bench_function("muon_1km", |b| {
        b.iter(|| drain(&mut g, black_box(&source)))
    });
}

fn bench_small_bunches(c: &mut Criterion) {
    let mut g = generator(512);
    let source = LightSource::Particle(Particle::new(
        ParticleType::EMinus,
        DVec3::new(0.0, 0.0, -300.0),
        DVec3::Z,
        0.0,
        10.0,
    ));

    c.bench_function("em_cascade_10gev_512_step_bunches", |b| {
        b.iter(|| drain(&mut g, black_box(&source)))
    });
}

criterion_group!(
    benches,
    bench_em_cascade_10gev,
    bench_hadron_cascade_10gev,
    bench_muon_1km,
    bench_small_bunches,
);
criterion_main!(benches);
