//! Particles, flasher pulses and the Monte Carlo particle tree.
//!
//! These are the light sources fed into the step generator. Positions are in
//! metres, times in nanoseconds, energies in GeV.

use glam::DVec3;

/// Particle species as recorded in the Monte Carlo tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ParticleType {
    Unknown,
    Gamma,
    EPlus,
    EMinus,
    MuPlus,
    MuMinus,
    TauPlus,
    TauMinus,
    NuE,
    NuEBar,
    NuMu,
    NuMuBar,
    NuTau,
    NuTauBar,
    Pi0,
    PiPlus,
    PiMinus,
    K0Long,
    K0Short,
    KPlus,
    KMinus,
    Neutron,
    PPlus,
    PMinus,
    /// Bremsstrahlung energy loss of a muon
    Brems,
    /// Delta-ray (knock-on electron) energy loss
    DeltaE,
    /// Pair-production energy loss
    PairProd,
    /// Photonuclear energy loss
    NuclInt,
    /// Generic hadronic shower
    Hadrons,
    /// Placeholder for continuous losses written by muon propagators
    ContinuousEnergyLoss,
}

/// Light-emission model a particle type is simulated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticleClass {
    /// Electromagnetic cascade
    Electromagnetic,
    /// Hadronic cascade
    Hadronic,
    /// Muon track
    Muon,
}

impl ParticleType {
    /// Classify into a light-emission model, or `None` if no model applies.
    pub fn class(self) -> Option<ParticleClass> {
        use ParticleType::*;
        match self {
            EMinus | EPlus | Brems | DeltaE | PairProd | Gamma => {
                Some(ParticleClass::Electromagnetic)
            }
            Hadrons | Neutron | Pi0 | PiPlus | PiMinus | K0Long | KPlus | KMinus | PPlus
            | PMinus | K0Short | NuclInt => Some(ParticleClass::Hadronic),
            MuMinus | MuPlus => Some(ParticleClass::Muon),
            _ => None,
        }
    }

    /// True for all neutrino flavours.
    pub fn is_neutrino(self) -> bool {
        use ParticleType::*;
        matches!(self, NuE | NuEBar | NuMu | NuMuBar | NuTau | NuTauBar)
    }

    /// True for μ±.
    pub fn is_muon(self) -> bool {
        matches!(self, ParticleType::MuMinus | ParticleType::MuPlus)
    }

    /// True for charged leptons that leave a track (μ±, τ±).
    pub fn is_track(self) -> bool {
        use ParticleType::*;
        matches!(self, MuMinus | MuPlus | TauMinus | TauPlus)
    }
}

/// Geometric shape hint carried by a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParticleShape {
    /// Not specified
    #[default]
    Null,
    /// Contained point-like cascade
    Cascade,
    /// Track with a start and stop point
    ContainedTrack,
    /// Track of unknown extent
    InfiniteTrack,
    /// Entry already converted into daughters; emits no light itself
    Dark,
}

/// Where a particle lives in the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocationType {
    /// Unknown location
    Anywhere,
    /// Inside the ice/water volume
    #[default]
    InIce,
    /// Surface array
    IceTop,
}

/// A physics particle.
#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    /// Event-unique major identifier
    pub major_id: u64,
    /// Minor identifier within the major group
    pub minor_id: i32,
    /// Species
    pub kind: ParticleType,
    /// Shape hint
    pub shape: ParticleShape,
    /// Detector location
    pub location: LocationType,
    /// Vertex position [m]
    pub pos: DVec3,
    /// Unit direction of travel
    pub dir: DVec3,
    /// Vertex time [ns]
    pub time: f64,
    /// Energy [GeV]
    pub energy: f64,
    /// Track length [m]; `None` if undetermined (infinite track)
    pub length: Option<f64>,
}

impl Particle {
    /// Create an in-ice particle with no length information.
    pub fn new(kind: ParticleType, pos: DVec3, dir: DVec3, time: f64, energy: f64) -> Self {
        Self {
            major_id: 0,
            minor_id: 0,
            kind,
            shape: ParticleShape::Null,
            location: LocationType::InIce,
            pos,
            dir: dir.normalize_or_zero(),
            time,
            energy,
            length: None,
        }
    }

    /// Set the track length
    pub fn with_length(mut self, length: f64) -> Self {
        self.length = Some(length);
        self
    }

    /// Set the (major, minor) identifier pair
    pub fn with_id(mut self, major_id: u64, minor_id: i32) -> Self {
        self.major_id = major_id;
        self.minor_id = minor_id;
        self
    }

    /// Set the shape hint
    pub fn with_shape(mut self, shape: ParticleShape) -> Self {
        self.shape = shape;
        self
    }

    /// Set the detector location
    pub fn with_location(mut self, location: LocationType) -> Self {
        self.location = location;
        self
    }
}

/// A calibration light pulse emitted by an LED on an optical module.
#[derive(Debug, Clone, PartialEq)]
pub struct FlasherPulse {
    /// Emission point [m]
    pub pos: DVec3,
    /// Unit emission direction
    pub dir: DVec3,
    /// Pulse start time [ns]
    pub time: f64,
    /// Mean number of photons before any wavelength bias
    pub number_of_photons_no_bias: f64,
    /// Pulse width [ns]; emission times are spread uniformly over it
    pub pulse_width: f64,
}

/// Anything that can be turned into emission steps.
#[derive(Debug, Clone, PartialEq)]
pub enum LightSource {
    /// A physics particle
    Particle(Particle),
    /// A flasher LED pulse
    Flasher(FlasherPulse),
}

impl LightSource {
    /// (major, minor) identifier attributed to photons from this source.
    /// Flashers are attributed to (0, 0).
    pub fn particle_id(&self) -> (u64, i32) {
        match self {
            LightSource::Particle(p) => (p.major_id, p.minor_id),
            LightSource::Flasher(_) => (0, 0),
        }
    }
}

/// Monte Carlo particle tree: primaries with nested daughters.
///
/// Stored as a flat list in insertion order, with a child index list per
/// entry.
#[derive(Debug, Clone, Default)]
pub struct McTree {
    particles: Vec<Particle>,
    children: Vec<Vec<usize>>,
}

impl McTree {
    /// Empty tree
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, particle: Particle) -> usize {
        self.particles.push(particle);
        self.children.push(Vec::new());
        self.particles.len() - 1
    }

    /// Add a primary, returning its index
    pub fn add_primary(&mut self, particle: Particle) -> usize {
        self.push(particle)
    }

    /// Add a daughter of `parent`, returning its index.
    ///
    /// Returns `None` if `parent` is not an index of this tree.
    pub fn add_child(&mut self, parent: usize, particle: Particle) -> Option<usize> {
        if parent >= self.particles.len() {
            return None;
        }
        let index = self.push(particle);
        self.children[parent].push(index);
        Some(index)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    /// True if the tree has no entries
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// All entries with their indices, in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Particle)> {
        self.particles.iter().enumerate()
    }

    /// Direct daughters of the entry at `index`; empty for unknown indices
    pub fn daughters(&self, index: usize) -> impl Iterator<Item = &Particle> {
        self.children
            .get(index)
            .into_iter()
            .flatten()
            .map(move |&child| &self.particles[child])
    }
}
