//! In-flight events and the particle-ID cache that maps step identifiers
//! back to them.
//!
//! Both caches are owned and mutated by the caller thread only. The pump
//! thread sees identifiers as plain numbers inside steps; attribution back to
//! frames happens after the pump has been joined.

use std::collections::BTreeMap;

use log::{debug, trace, warn};

use crate::frame::{Frame, PhotonSeriesMap};
use crate::geometry::DetectorGeometry;
use crate::module::ModuleError;
use crate::particle::{LocationType, McTree, Particle, ParticleShape, ParticleType};

/// Light sources farther than this from every module are not simulated [m]
pub const PROXIMITY_CUTOFF: f64 = 300.0;

/// Owner of one step identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParticleCacheEntry {
    /// Index of the owning frame in the [`FrameCache`]
    pub frame_index: usize,
    /// Major id of the light source
    pub major_id: u64,
    /// Minor id of the light source
    pub minor_id: i32,
}

/// Identifier allocation for light sources in the current epoch.
///
/// Identifiers start at 1 and keep counting across epochs; 0 is reserved
/// for dummy steps and skipped on wrap-around.
#[derive(Debug, Clone)]
pub struct ParticleCache {
    entries: BTreeMap<u32, ParticleCacheEntry>,
    next_id: u32,
}

impl Default for ParticleCache {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl ParticleCache {
    /// Empty cache; the first identifier is 1
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty cache handing out `next_id` first (0 is bumped to 1).
    pub fn starting_at(next_id: u32) -> Self {
        Self {
            entries: BTreeMap::new(),
            next_id: next_id.max(1),
        }
    }

    /// Record a new light source and return its identifier.
    pub fn allocate(
        &mut self,
        frame_index: usize,
        major_id: u64,
        minor_id: i32,
    ) -> Result<u32, ModuleError> {
        let id = self.next_id;
        if self.entries.contains_key(&id) {
            return Err(ModuleError::ParticleIdInUse(id));
        }
        self.entries.insert(
            id,
            ParticleCacheEntry {
                frame_index,
                major_id,
                minor_id,
            },
        );
        self.next_id = match id.wrapping_add(1) {
            0 => 1,
            n => n,
        };
        Ok(id)
    }

    /// Owner of `identifier`
    pub fn get(&self, identifier: u32) -> Option<&ParticleCacheEntry> {
        self.entries.get(&identifier)
    }

    /// Identifier the next allocation will return
    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    /// Number of identifiers in use
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no identifiers are in use
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Release all identifiers. Numbering continues where it left off.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// A buffered frame with its accumulated output.
#[derive(Debug)]
pub struct FrameSlot {
    /// The frame as it arrived
    pub frame: Frame,
    /// True if the frame's light sources are being simulated
    pub active: bool,
    /// Photons collected for this frame so far
    pub photons: PhotonSeriesMap,
    /// Id for the next photon added to this frame
    pub next_photon_id: i32,
}

/// Frames buffered in arrival order until the next flush.
#[derive(Debug, Default)]
pub struct FrameCache {
    slots: Vec<FrameSlot>,
    active: usize,
}

impl FrameCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a frame, returning its index.
    pub fn push(&mut self, frame: Frame, active: bool) -> usize {
        self.slots.push(FrameSlot {
            frame,
            active,
            photons: PhotonSeriesMap::new(),
            next_photon_id: 0,
        });
        if active {
            self.active += 1;
        }
        self.slots.len() - 1
    }

    /// Number of buffered frames
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of buffered frames being simulated
    pub fn active_count(&self) -> usize {
        self.active
    }

    /// Slot at `index`
    pub fn slot(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    /// Mutable slot at `index`
    pub fn slot_mut(&mut self, index: usize) -> Option<&mut FrameSlot> {
        self.slots.get_mut(index)
    }

    /// Take all slots in arrival order, leaving the cache empty.
    pub fn drain(&mut self) -> Vec<FrameSlot> {
        self.active = 0;
        std::mem::take(&mut self.slots)
    }
}

/// True if the tree entry at `index` has a μ± daughter
pub fn has_muon_daughter(tree: &McTree, index: usize) -> bool {
    tree.daughters(index).any(|d| d.kind.is_muon())
}

/// Select the tree entries that emit light near the detector.
///
/// Entries are dropped when they are not in ice, are dark, are placeholders
/// or neutrinos, are muons while muons are ignored, lie farther than
/// [`PROXIMITY_CUTOFF`] from every module, or (when muons are simulated)
/// already have a muon daughter that would emit the same light.
pub fn collect_light_sources(
    tree: &McTree,
    geometry: &DetectorGeometry,
    ignore_muons: bool,
) -> Vec<Particle> {
    let mut sources = Vec::new();

    for (index, particle) in tree.iter() {
        if particle.location != LocationType::InIce {
            continue;
        }
        if particle.shape == ParticleShape::Dark {
            continue;
        }
        if matches!(
            particle.kind,
            ParticleType::ContinuousEnergyLoss | ParticleType::Unknown
        ) {
            debug!(
                "skipping particle {:?} ({}, {})",
                particle.kind, particle.major_id, particle.minor_id
            );
            continue;
        }
        if particle.kind.is_neutrino() {
            continue;
        }
        if ignore_muons && particle.kind.is_muon() {
            continue;
        }

        let distance = if particle.kind.is_track() {
            let (length, no_stop) = match particle.length {
                Some(l) if l.is_nan() => (0.0, true),
                Some(l) if l < 0.0 => {
                    warn!("got track with negative length, assuming it is infinite");
                    (0.0, true)
                }
                Some(l) if l == 0.0 => (0.0, true),
                Some(l) => (l, false),
                None => (0.0, true),
            };
            geometry.distance_to_closest_module_from_track(
                particle.pos,
                particle.dir,
                length,
                false,
                no_stop,
            )
        } else {
            geometry.distance_to_closest_module(particle.pos)
        };
        if distance >= PROXIMITY_CUTOFF {
            debug!(
                "skipping {:?} ({}, {}): {:.1} m from the closest module",
                particle.kind, particle.major_id, particle.minor_id, distance
            );
            continue;
        }

        if !ignore_muons && has_muon_daughter(tree, index) {
            warn!(
                "particle {:?} ({}, {}) has a muon daughter but is not dark, skipping it",
                particle.kind, particle.major_id, particle.minor_id
            );
            continue;
        }

        trace!(
            "light source {:?} ({}, {}), {} GeV",
            particle.kind,
            particle.major_id,
            particle.minor_id,
            particle.energy
        );
        sources.push(particle.clone());
    }

    sources
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Stream;
    use crate::geometry::OmKey;
    use glam::DVec3;

    fn geometry() -> DetectorGeometry {
        let mut g = DetectorGeometry::new();
        g.insert(OmKey::new(1, 1), DVec3::ZERO);
        g
    }

    fn cascade(x: f64) -> Particle {
        Particle::new(
            ParticleType::EMinus,
            DVec3::new(x, 0.0, 0.0),
            DVec3::Z,
            0.0,
            1.0,
        )
    }

    #[test]
    fn test_ids_start_at_one_and_continue_after_clear() {
        let mut cache = ParticleCache::new();
        assert_eq!(cache.allocate(0, 1, 1).unwrap(), 1);
        assert_eq!(cache.allocate(0, 1, 2).unwrap(), 2);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.allocate(0, 2, 1).unwrap(), 3);
    }

    #[test]
    fn test_id_wrap_skips_zero() {
        let mut cache = ParticleCache::starting_at(u32::MAX);
        assert_eq!(cache.allocate(0, 1, 1).unwrap(), u32::MAX);
        assert_eq!(cache.next_id(), 1);
        assert_eq!(cache.allocate(0, 1, 2).unwrap(), 1);
    }

    #[test]
    fn test_id_collision_is_an_error() {
        let mut cache = ParticleCache::new();
        assert_eq!(cache.allocate(3, 7, 1).unwrap(), 1);
        // Wrapped all the way round onto an identifier still in use
        cache.next_id = 1;
        assert!(matches!(
            cache.allocate(4, 7, 2),
            Err(ModuleError::ParticleIdInUse(1))
        ));
        assert_eq!(cache.get(1).unwrap().frame_index, 3);
    }

    #[test]
    fn test_frame_cache_counts_active() {
        let mut frames = FrameCache::new();
        frames.push(Frame::new(Stream::Daq), false);
        let b = frames.push(Frame::new(Stream::Physics), true);
        assert_eq!(b, 1);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames.active_count(), 1);
        let slots = frames.drain();
        assert_eq!(slots.len(), 2);
        assert!(frames.is_empty());
        assert_eq!(frames.active_count(), 0);
    }

    #[test]
    fn test_pruning_rules() {
        let mut tree = McTree::new();
        tree.add_primary(cascade(10.0).with_id(1, 1));
        tree.add_primary(cascade(10.0).with_id(1, 2).with_location(LocationType::IceTop));
        tree.add_primary(cascade(10.0).with_id(1, 3).with_shape(ParticleShape::Dark));
        tree.add_primary(
            Particle::new(ParticleType::NuMu, DVec3::ZERO, DVec3::Z, 0.0, 1.0).with_id(1, 4),
        );
        tree.add_primary(
            Particle::new(
                ParticleType::ContinuousEnergyLoss,
                DVec3::ZERO,
                DVec3::Z,
                0.0,
                1.0,
            )
            .with_id(1, 5),
        );
        tree.add_primary(cascade(300.0).with_id(1, 6));
        tree.add_primary(cascade(299.999).with_id(1, 7));
        tree.add_primary(cascade(-300.0).with_id(1, 8));

        let sources = collect_light_sources(&tree, &geometry(), false);
        let ids: Vec<i32> = sources.iter().map(|p| p.minor_id).collect();
        assert_eq!(ids, vec![1, 7]);
    }

    #[test]
    fn test_many_stochastic_losses_are_kept() {
        let mut tree = McTree::new();
        let mu = tree.add_primary(
            Particle::new(ParticleType::MuMinus, DVec3::ZERO, DVec3::Z, 0.0, 1000.0)
                .with_length(2000.0)
                .with_shape(ParticleShape::Dark)
                .with_id(1, 1),
        );
        for i in 0..20_000 {
            tree.add_child(mu, cascade(f64::from(i % 200)).with_id(1, i + 2))
                .unwrap();
        }

        let sources = collect_light_sources(&tree, &geometry(), false);
        assert_eq!(sources.len(), 20_000);
        assert_eq!(sources[0].minor_id, 2);
    }

    #[test]
    fn test_track_proximity_uses_segment() {
        let g = geometry();
        let start = DVec3::new(-1000.0, 100.0, 0.0);
        let muon = |length: Option<f64>| {
            let p = Particle::new(ParticleType::MuMinus, start, DVec3::X, 0.0, 100.0);
            match length {
                Some(l) => p.with_length(l),
                None => p,
            }
        };

        let mut tree = McTree::new();
        // Stops 900 m short of the module
        tree.add_primary(muon(Some(100.0)).with_id(1, 1));
        // Passes 100 m from the module
        tree.add_primary(muon(Some(2000.0)).with_id(1, 2));
        // Unknown, zero or negative length: treated as infinite
        tree.add_primary(muon(None).with_id(1, 3));
        tree.add_primary(muon(Some(0.0)).with_id(1, 4));
        tree.add_primary(muon(Some(-5.0)).with_id(1, 5));

        let ids: Vec<i32> = collect_light_sources(&tree, &g, false)
            .iter()
            .map(|p| p.minor_id)
            .collect();
        assert_eq!(ids, vec![2, 3, 4, 5]);
        assert!(collect_light_sources(&tree, &g, true).is_empty());
    }

    #[test]
    fn test_parent_of_muon_is_skipped() {
        let mut tree = McTree::new();
        let parent = tree.add_primary(
            Particle::new(ParticleType::PiPlus, DVec3::ZERO, DVec3::Z, 0.0, 10.0).with_id(1, 1),
        );
        tree.add_child(
            parent,
            Particle::new(ParticleType::MuPlus, DVec3::ZERO, DVec3::Z, 0.0, 5.0)
                .with_length(10.0)
                .with_id(1, 2),
        )
        .unwrap();

        let ids: Vec<i32> = collect_light_sources(&tree, &geometry(), false)
            .iter()
            .map(|p| p.minor_id)
            .collect();
        assert_eq!(ids, vec![2]);

        // With muons ignored the parent's own light is kept
        let ids: Vec<i32> = collect_light_sources(&tree, &geometry(), true)
            .iter()
            .map(|p| p.minor_id)
            .collect();
        assert_eq!(ids, vec![1]);
    }
}
