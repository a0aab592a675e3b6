//! Event frames flowing through the module, and the photon records
//! attached to them.

use std::collections::BTreeMap;
use std::sync::Arc;

use glam::DVec3;

use crate::device::Photon;
use crate::geometry::{DetectorGeometry, OmKey};
use crate::particle::{FlasherPulse, McTree};
use crate::statistics::EventStatistics;

/// Kind of frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stream {
    /// Detector geometry
    Geometry,
    /// Calibration constants
    Calibration,
    /// Detector configuration
    DetectorStatus,
    /// A triggered readout
    Daq,
    /// A physics event
    Physics,
}

/// A photon at an optical module, attributed to its parent particle.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPhoton {
    /// Hit time [ns]
    pub time: f64,
    /// Photon number, unique within its frame
    pub id: i32,
    /// Photon weight
    pub weight: f64,
    /// Major id of the parent particle
    pub particle_major_id: u64,
    /// Minor id of the parent particle
    pub particle_minor_id: i32,
    /// Distance from the emission point [m]
    pub cherenkov_dist: f64,
    /// Wavelength [nm]
    pub wavelength: f64,
    /// Group velocity [m/ns]
    pub group_velocity: f64,
    /// Number of scatters
    pub num_scattered: u32,
    /// Hit position [m]
    pub pos: DVec3,
    /// Direction at the hit
    pub dir: DVec3,
    /// Emission time [ns]
    pub start_time: f64,
    /// Emission position [m]
    pub start_pos: DVec3,
    /// Emission direction
    pub start_dir: DVec3,
}

/// Unit vector for polar angle `theta` and azimuth `phi`.
pub fn direction_from_theta_phi(theta: f64, phi: f64) -> DVec3 {
    let (sin_theta, cos_theta) = theta.sin_cos();
    let (sin_phi, cos_phi) = phi.sin_cos();
    DVec3::new(sin_theta * cos_phi, sin_theta * sin_phi, cos_theta)
}

fn to_dvec3(v: [f32; 3]) -> DVec3 {
    DVec3::new(f64::from(v[0]), f64::from(v[1]), f64::from(v[2]))
}

impl OutputPhoton {
    /// Convert a device photon.
    pub fn from_device(
        photon: &Photon,
        id: i32,
        particle_major_id: u64,
        particle_minor_id: i32,
    ) -> Self {
        Self {
            time: f64::from(photon.time),
            id,
            weight: f64::from(photon.weight),
            particle_major_id,
            particle_minor_id,
            cherenkov_dist: f64::from(photon.cherenkov_dist),
            wavelength: f64::from(photon.wavelength),
            group_velocity: f64::from(photon.group_velocity),
            num_scattered: photon.num_scatters,
            pos: to_dvec3(photon.pos),
            dir: direction_from_theta_phi(
                f64::from(photon.dir_theta),
                f64::from(photon.dir_phi),
            ),
            start_time: f64::from(photon.start_time),
            start_pos: to_dvec3(photon.start_pos),
            start_dir: direction_from_theta_phi(
                f64::from(photon.start_dir_theta),
                f64::from(photon.start_dir_phi),
            ),
        }
    }
}

/// Photons per optical module
pub type PhotonSeriesMap = BTreeMap<OmKey, Vec<OutputPhoton>>;

/// One frame of the event stream.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame kind
    pub stream: Stream,
    /// Detector geometry (geometry frames)
    pub geometry: Option<Arc<DetectorGeometry>>,
    /// Monte Carlo particles to simulate
    pub mc_tree: Option<McTree>,
    /// Flasher pulses to simulate
    pub flashers: Option<Vec<FlasherPulse>>,
    /// Simulated photons, filled in by the module
    pub photons: Option<PhotonSeriesMap>,
    /// Photon statistics, filled in when statistics collection is enabled
    pub statistics: Option<EventStatistics>,
}

impl Frame {
    /// Empty frame of the given kind
    pub fn new(stream: Stream) -> Self {
        Self {
            stream,
            geometry: None,
            mc_tree: None,
            flashers: None,
            photons: None,
            statistics: None,
        }
    }

    /// Geometry frame
    pub fn geometry(geometry: DetectorGeometry) -> Self {
        Self {
            geometry: Some(Arc::new(geometry)),
            ..Self::new(Stream::Geometry)
        }
    }

    /// Physics frame carrying a particle tree
    pub fn physics(mc_tree: McTree) -> Self {
        Self {
            mc_tree: Some(mc_tree),
            ..Self::new(Stream::Physics)
        }
    }

    /// Attach flasher pulses
    pub fn with_flashers(mut self, flashers: Vec<FlasherPulse>) -> Self {
        self.flashers = Some(flashers);
        self
    }

    /// Total number of photons attached to the frame
    pub fn num_photons(&self) -> usize {
        self.photons
            .as_ref()
            .map_or(0, |m| m.values().map(Vec::len).sum())
    }
}

/// Downstream consumer of finished frames, fed in arrival order.
pub trait EventSink {
    /// Take ownership of a finished frame.
    fn push(&mut self, frame: Frame);
}

impl EventSink for Vec<Frame> {
    fn push(&mut self, frame: Frame) {
        Vec::push(self, frame);
    }
}
