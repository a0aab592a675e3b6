//! Closed-form Light-Yield Parameterizations
//!
//! Constants for converting a particle's energy and track length into a mean
//! Cherenkov photon count and a longitudinal emission profile. The cascade
//! and muon models follow the parameterizations used by the PPC photon
//! propagation code:
//!
//! - Electromagnetic cascades: photon yield proportional to energy, with a
//!   gamma-distributed longitudinal profile (shape `a`, scale `b`).
//! - Hadronic cascades: as electromagnetic, scaled by an energy-dependent
//!   and fluctuating hadron/EM light ratio `F(E)`.
//! - Muons: light per metre of track times a weakly energy-dependent factor
//!   accounting for stochastic losses along the track.
//!
//! Reference: Kopper, C. (2017). "clsim: Photon propagation for IceCube",
//! and Chirkin, D. "PPC: Photon Propagation Code".
//!
//! Units: energies in GeV, lengths in m, densities in g/cm³, times in ns.

/// Speed of light in vacuum [m/ns]
pub const SPEED_OF_LIGHT: f64 = 0.299_792_458;

/// Radiation length times density for ice/water [g/cm²·m/cm]: `L_rad = 0.358 / ρ` m
pub const RADIATION_LENGTH_DENSITY: f64 = 0.358;

/// Reference density the EM photon yield was tabulated at [g/cm³]
pub const REFERENCE_DENSITY: f64 = 0.924;

/// Track-length equivalent of an EM cascade at the reference density [m/GeV]
pub const EM_TRACK_LENGTH_PER_GEV: f64 = 5.21;

/// Longitudinal profile shape for EM cascades: `a = A0 + A1·ln(E)`
pub const EM_PROFILE_A0: f64 = 2.03;
/// Energy slope of the EM profile shape
pub const EM_PROFILE_A1: f64 = 0.604;
/// EM profile scale: `b = L_rad / EM_PROFILE_B_DIVISOR`
pub const EM_PROFILE_B_DIVISOR: f64 = 0.633;

/// Longitudinal profile shape for hadronic cascades: `a = A0 + A1·ln(E)`
pub const HADRON_PROFILE_A0: f64 = 1.49;
/// Energy slope of the hadronic profile shape
pub const HADRON_PROFILE_A1: f64 = 0.359;
/// Hadronic profile scale: `b = L_rad / HADRON_PROFILE_B_DIVISOR`
pub const HADRON_PROFILE_B_DIVISOR: f64 = 0.772;

/// Hadron/EM light ratio model: `F = 1 - (E/E0)^-m · (1 - f0)`
pub const HADRON_E0: f64 = 0.399;
/// Exponent `m` of the hadron/EM light ratio
pub const HADRON_M: f64 = 0.130;
/// Asymptotic offset `f0` of the hadron/EM light ratio
pub const HADRON_F0: f64 = 0.467;
/// Relative spread of the light ratio at 1 GeV
pub const HADRON_RMS0: f64 = 0.379;
/// Energy scaling exponent of the light ratio spread
pub const HADRON_GAMMA: f64 = 1.160;
/// Energies below this are evaluated at this value in the ratio model [GeV]
pub const HADRON_MIN_ENERGY: f64 = 10.0;

/// Muon extra light from stochastic losses: `extr = 1 + max(0, C0 + C1·ln(E))`
pub const MUON_EXTRA_LIGHT_C0: f64 = 0.1720;
/// Energy slope of the muon extra-light factor
pub const MUON_EXTRA_LIGHT_C1: f64 = 0.0324;

/// Length assumed for a muon whose track length is unknown [m]
pub const DEFAULT_MUON_LENGTH: f64 = 2000.0;

/// Above this mean, Poisson photon counts are drawn from a Gaussian instead
pub const GAUSSIAN_APPROXIMATION_THRESHOLD: f64 = 1.0e7;

/// Angular emission profile of cascade light around the particle axis:
/// `cos θ = max(1 - (-ln(1 - u·I) / b)^(1/a), -1)`
pub const ANGULAR_DIST_A: f64 = 0.39;
/// Second parameter `b` of the angular emission profile
pub const ANGULAR_DIST_B: f64 = 2.61;

/// Nominal length of a cascade emission step [m]
pub const CASCADE_STEP_LENGTH: f64 = 0.001;

/// Radiation length in a medium of the given density [m]
pub fn radiation_length(density: f64) -> f64 {
    RADIATION_LENGTH_DENSITY / density
}

/// Cascade track-length equivalent per GeV in a medium of the given density [m/GeV]
pub fn em_track_length_per_gev(density: f64) -> f64 {
    EM_TRACK_LENGTH_PER_GEV * REFERENCE_DENSITY / density
}

/// Mean and spread of the hadron/EM light ratio at energy `energy` [GeV]
pub fn hadron_light_ratio(energy: f64) -> (f64, f64) {
    let e = energy.max(HADRON_MIN_ENERGY);
    let mean = 1.0 - (e / HADRON_E0).powf(-HADRON_M) * (1.0 - HADRON_F0);
    let spread = mean * HADRON_RMS0 * e.log10().powf(-HADRON_GAMMA);
    (mean, spread)
}

/// Total-to-bare light ratio of a muon at energy `energy` [GeV]
pub fn muon_extra_light(energy: f64) -> f64 {
    1.0 + (MUON_EXTRA_LIGHT_C0 + MUON_EXTRA_LIGHT_C1 * energy.ln()).max(0.0)
}

/// Normalisation `I = 1 - exp(-b·2^a)` of the angular emission profile
pub fn angular_dist_norm() -> f64 {
    1.0 - (-ANGULAR_DIST_B * 2f64.powf(ANGULAR_DIST_A)).exp()
}
