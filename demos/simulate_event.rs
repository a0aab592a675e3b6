//! Simulate a few events on a small string detector with two CPU devices.
//!
//! A muon crossing the string and a hadronic cascade next to it are turned
//! into steps, dispatched across two threaded devices running the
//! direct-light kernel, and the hits are printed per module.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example simulate_event

use std::sync::Arc;

use glam::DVec3;
use photon_dispatch::{
    ComputeDevice, DetectorGeometry, DeviceError, DeviceFactory, FlasherPulse, Frame, McTree,
    MediumProperties, ModuleConfig, OmKey, Particle, ParticleShape, ParticleType, PhotonModule,
    ProximityKernel, StdRandomService, Stream, ThreadedDevice,
};

/// One string of 60 modules, 17 m apart, starting at z = -500 m
fn string_detector() -> DetectorGeometry {
    let mut geometry = DetectorGeometry::new();
    for om in 1..=60u32 {
        let z = -500.0 - 17.0 * f64::from(om - 1);
        geometry.insert(OmKey::new(1, om), DVec3::new(0.0, 0.0, z));
    }
    geometry
}

fn cpu_device(
    name: &'static str,
    workgroup_size: usize,
    seed: u64,
) -> Box<dyn DeviceFactory> {
    Box::new(
        move |geometry: &Arc<DetectorGeometry>,
              _medium: &MediumProperties|
              -> Result<Arc<dyn ComputeDevice>, DeviceError> {
            let kernel = ProximityKernel::new(geometry, seed).with_absorption_length(120.0);
            Ok(Arc::new(ThreadedDevice::spawn(
                name,
                workgroup_size,
                8192,
                16,
                kernel,
            )?))
        },
    )
}

fn muon_event() -> McTree {
    let mut tree = McTree::new();
    let dir = DVec3::new(0.3, 0.0, -1.0);
    let primary = tree.add_primary(
        Particle::new(ParticleType::NuMu, DVec3::new(-150.0, 0.0, -300.0), dir, 0.0, 500.0)
            .with_id(1, 0),
    );
    tree.add_child(
        primary,
        Particle::new(ParticleType::MuMinus, DVec3::new(-150.0, 0.0, -300.0), dir, 0.0, 300.0)
            .with_length(900.0)
            .with_shape(ParticleShape::ContainedTrack)
            .with_id(1, 1),
    )
    .expect("primary was just added");
    tree
}

fn cascade_event() -> McTree {
    let mut tree = McTree::new();
    tree.add_primary(
        Particle::new(ParticleType::Hadrons, DVec3::new(20.0, 10.0, -700.0), DVec3::X, 0.0, 20.0)
            .with_id(2, 1),
    );
    tree
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = ModuleConfig {
        use_flashers: true,
        collect_statistics: true,
        max_num_parallel_events: 2,
        ..Default::default()
    };
    let mut module = PhotonModule::new(
        config,
        Box::new(StdRandomService::new(12345)),
        MediumProperties::uniform(250.0, 0.92)?,
        vec![cpu_device("cpu0", 32, 1), cpu_device("cpu1", 48, 2)],
        Vec::new(),
    )?;

    module.process(Frame::geometry(string_detector()))?;
    if let Some(sizes) = module.bunch_sizes() {
        println!(
            "bunch granularity {}, max bunch size {}",
            sizes.granularity, sizes.max_bunch_size
        );
    }

    module.process(Frame::physics(muon_event()))?;
    module.process(Frame::new(Stream::Daq))?;
    module.process(Frame::physics(cascade_event()))?;
    module.process(Frame::new(Stream::Physics).with_flashers(vec![FlasherPulse {
        pos: DVec3::new(0.0, 0.0, -602.0),
        dir: DVec3::X,
        time: 0.0,
        number_of_photons_no_bias: 1.0e6,
        pulse_width: 70.0,
    }]))?;
    module.finish()?;

    for (i, frame) in module.into_sink().iter().enumerate() {
        println!("frame {} ({:?})", i, frame.stream);
        let Some(photons) = &frame.photons else {
            continue;
        };
        println!("  {} photons on {} modules", frame.num_photons(), photons.len());
        for (key, hits) in photons.iter().take(5) {
            let first = hits
                .iter()
                .map(|p| p.time)
                .fold(f64::INFINITY, f64::min);
            println!(
                "    OM({}, {}): {} hits, first at {:.1} ns",
                key.string,
                key.om,
                hits.len(),
                first
            );
        }
        if let Some(stats) = &frame.statistics {
            for ((major, minor), p) in stats.iter() {
                println!(
                    "  particle ({}, {}): {} photons generated, {} at modules",
                    major, minor, p.generated.count, p.at_modules.count
                );
            }
        }
    }
    Ok(())
}
