//! Device-compatible records exchanged with compute devices.
//!
//! All types use `#[repr(C)]` and `bytemuck` derives so bunches can be cast
//! straight into device buffers. Fields are f32, matching what photon
//! propagation kernels consume.

use bytemuck::{Pod, Zeroable};
use glam::DVec3;

/// A photon emission step: a short track segment emitting a fixed number
/// of Cherenkov photons.
///
/// Layout: 64 bytes total (13 × 4-byte fields + 3 padding u32).
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Step {
    /// Start position [m]: x, y, z
    pub pos: [f32; 3],
    /// Emission time at the start position [ns]
    pub time: f32,
    /// Unit direction: x, y, z
    pub dir: [f32; 3],
    /// Length of the emitting segment [m]
    pub length: f32,
    /// Longitudinal offset of the start position along the parent track [m]
    pub offset: f32,
    /// Number of photons emitted by this step
    pub num_photons: u32,
    /// Photon weight
    pub weight: f32,
    /// Velocity of the emitter as a fraction of c
    pub beta: f32,
    /// Identifier of the parent light source
    pub identifier: u32,
    /// Padding for 16-byte alignment
    pub _pad: [u32; 3],
}

impl Step {
    /// Step with unit weight and β = 1.
    pub fn new(
        pos: DVec3,
        dir: DVec3,
        time: f64,
        length: f64,
        num_photons: u32,
        identifier: u32,
    ) -> Self {
        Self {
            pos: pos.as_vec3().to_array(),
            time: time as f32,
            dir: dir.as_vec3().to_array(),
            length: length as f32,
            offset: 0.0,
            num_photons,
            weight: 1.0,
            beta: 1.0,
            identifier,
            _pad: [0; 3],
        }
    }

    /// Set the longitudinal offset along the parent track
    pub fn with_offset(mut self, offset: f64) -> Self {
        self.offset = offset as f32;
        self
    }

    /// A padding step that emits nothing.
    pub fn dummy() -> Self {
        Self::zeroed()
    }

    /// True for padding steps (no photons or no weight).
    pub fn is_dummy(&self) -> bool {
        self.weight <= 0.0 || self.num_photons == 0
    }

    /// Start position in double precision
    pub fn position(&self) -> DVec3 {
        DVec3::new(self.pos[0] as f64, self.pos[1] as f64, self.pos[2] as f64)
    }

    /// Direction in double precision
    pub fn direction(&self) -> DVec3 {
        DVec3::new(self.dir[0] as f64, self.dir[1] as f64, self.dir[2] as f64)
    }
}

/// A photon that reached an optical module, as returned by a device.
///
/// Layout: 80 bytes total (20 × 4-byte fields).
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Photon {
    /// Hit position [m]: x, y, z
    pub pos: [f32; 3],
    /// Hit time [ns]
    pub time: f32,
    /// Polar angle of the photon direction at the hit [rad]
    pub dir_theta: f32,
    /// Azimuth of the photon direction at the hit [rad]
    pub dir_phi: f32,
    /// Emission position [m]
    pub start_pos: [f32; 3],
    /// Emission time [ns]
    pub start_time: f32,
    /// Polar angle of the emission direction [rad]
    pub start_dir_theta: f32,
    /// Azimuth of the emission direction [rad]
    pub start_dir_phi: f32,
    /// Photon weight
    pub weight: f32,
    /// Wavelength [nm]
    pub wavelength: f32,
    /// Distance travelled from the emission point [m]
    pub cherenkov_dist: f32,
    /// Group velocity in the medium [m/ns]
    pub group_velocity: f32,
    /// Number of scatters along the way
    pub num_scatters: u32,
    /// Identifier of the step's light source
    pub identifier: u32,
    /// String number of the hit module
    pub string_id: i32,
    /// Module number of the hit module
    pub om_id: u32,
}
