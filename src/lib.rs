//! # photon-dispatch: Cherenkov Step Generation and Device Dispatch
//!
//! The front half of a photon-propagation simulation for optical-module
//! detectors in ice or water. Particles from a Monte Carlo tree are turned
//! into Cherenkov emission *steps*, the steps are packed into bunches and
//! spread across one or more compute devices, and the photons the devices
//! return are attributed back to the events they came from.
//!
//! ## Features
//!
//! - Parameterized light yield for electromagnetic and hadronic cascades
//!   and for muon tracks, with per-layer medium properties
//! - Flasher (LED calibration pulse) light sources
//! - Lazy step generation: photon budgets are split into fixed-size steps
//!   only as bunches are pulled
//! - **Barrier protocol** to drain the pipeline deterministically before a
//!   flush
//! - A pump thread dispatching bunches to the least-loaded device, with
//!   cooperative interruption
//! - Bunch-size negotiation across devices with different workgroup sizes
//! - Event caching with in-order release, particle-ID attribution and
//!   optional per-particle photon statistics
//!
//! ## Basic Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use glam::DVec3;
//! use photon_dispatch::{
//!     ComputeDevice, DetectorGeometry, DeviceError, DeviceFactory, Frame, McTree,
//!     MediumProperties, ModuleConfig, OmKey, Particle, ParticleType, PhotonModule,
//!     ProximityKernel, StdRandomService, ThreadedDevice,
//! };
//!
//! // Devices are created once the detector geometry is known
//! let factory = |geometry: &Arc<DetectorGeometry>,
//!                _medium: &MediumProperties|
//!  -> Result<Arc<dyn ComputeDevice>, DeviceError> {
//!     let kernel = ProximityKernel::new(geometry, 7);
//!     Ok(Arc::new(ThreadedDevice::spawn("cpu0", 32, 4096, 8, kernel)?))
//! };
//! let factories: Vec<Box<dyn DeviceFactory>> = vec![Box::new(factory)];
//!
//! let mut module = PhotonModule::new(
//!     ModuleConfig::default(),
//!     Box::new(StdRandomService::new(42)),
//!     MediumProperties::uniform(250.0, 0.92)?,
//!     factories,
//!     Vec::new(),
//! )?;
//!
//! let mut geometry = DetectorGeometry::new();
//! geometry.insert(OmKey::new(1, 1), DVec3::new(0.0, 0.0, 0.0));
//! geometry.insert(OmKey::new(1, 2), DVec3::new(0.0, 0.0, -17.0));
//! module.process(Frame::geometry(geometry))?;
//!
//! let mut tree = McTree::new();
//! tree.add_primary(
//!     Particle::new(ParticleType::EMinus, DVec3::new(5.0, 0.0, -8.0), DVec3::Z, 0.0, 0.1)
//!         .with_id(1, 1),
//! );
//! module.process(Frame::physics(tree))?;
//! module.finish()?;
//!
//! let frames = module.into_sink();
//! assert_eq!(frames.len(), 2);
//! assert!(frames[1].photons.is_some());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Barrier Protocol
//!
//! The step generator is fed from the caller thread and drained by the pump
//! thread. To collect results the module enqueues a barrier behind the last
//! light source; the pump stops once it pulls the barrier, so every step
//! generated before it is known to be on a device. Light sources cannot be
//! enqueued while a barrier is pending.
//!
//! ## Threading
//!
//! Exactly one pump thread runs next to the caller. The event cache and the
//! particle-ID cache are only touched by the caller; results are collected
//! after the pump has been joined.
//!
//! ## References
//!
//! 1. Rädel, L. & Wiebusch, C. (2013). "Calculation of the Cherenkov light
//!    yield from electromagnetic cascades in ice with Geant4".
//!    Astroparticle Physics 44, 102-113.
//!
//! 2. Rädel, L. & Wiebusch, C. (2012). "Calculation of the Cherenkov light
//!    yield from low energetic secondary particles accompanying high-energy
//!    muons in ice and water with Geant4 simulations".
//!    Astroparticle Physics 38, 53-67.
//!
//! 3. Marsaglia, G. & Tsang, W.W. (2000). "A simple method for generating
//!    gamma variables". ACM Transactions on Mathematical Software 26(3).

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod collector;
pub mod device;
pub mod dispatcher;
pub mod event_cache;
pub mod frame;
pub mod geometry;
pub mod interrupt;
pub mod medium;
pub mod module;
pub mod parameterization;
pub mod particle;
pub mod random;
pub mod sampling;
pub mod statistics;
pub mod step_generator;
pub mod step_queue;

pub use device::{
    negotiate_bunch_sizes, BunchSizes, ComputeDevice, ConversionResult, DeviceError,
    DeviceFactory, Photon, PhotonKernel, ProximityKernel, Step, ThreadedDevice,
};
pub use dispatcher::{DispatchError, Pump, PumpExit, PumpReport};
pub use event_cache::PROXIMITY_CUTOFF;
pub use frame::{EventSink, Frame, OutputPhoton, PhotonSeriesMap, Stream};
pub use geometry::{DetectorGeometry, OmKey};
pub use interrupt::Interrupt;
pub use medium::MediumProperties;
pub use module::{ModuleConfig, ModuleError, PhotonModule};
pub use particle::{
    FlasherPulse, LightSource, LocationType, McTree, Particle, ParticleShape, ParticleType,
};
pub use random::{RandomService, StdRandomService};
pub use statistics::{EventStatistics, ParticleStatistics, PhotonCount, PhotonTally};
pub use step_generator::{StepError, StepGenerator, StepGeneratorConfig};
pub use step_queue::StepQueue;
