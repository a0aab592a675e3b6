//! Photon bookkeeping per light source and per event.

use std::collections::BTreeMap;

/// Photon count and weight sum
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhotonCount {
    /// Number of photons
    pub count: u64,
    /// Sum of photon weights
    pub weight: f64,
}

/// Photon totals keyed by light-source identifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotonTally {
    entries: BTreeMap<u32, PhotonCount>,
}

impl PhotonTally {
    /// Empty tally
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` photons with total weight `weight` to `identifier`.
    pub fn add(&mut self, identifier: u32, count: u64, weight: f64) {
        let entry = self.entries.entry(identifier).or_default();
        entry.count += count;
        entry.weight += weight;
    }

    /// Totals for one identifier
    pub fn get(&self, identifier: u32) -> Option<PhotonCount> {
        self.entries.get(&identifier).copied()
    }

    /// All entries in identifier order
    pub fn iter(&self) -> impl Iterator<Item = (u32, PhotonCount)> + '_ {
        self.entries.iter().map(|(id, c)| (*id, *c))
    }

    /// Number of identifiers with entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing was tallied
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Photon count over all identifiers
    pub fn total_count(&self) -> u64 {
        self.entries.values().map(|c| c.count).sum()
    }

    /// Forget all entries
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Generated and detected photons of one particle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParticleStatistics {
    /// Photons emitted by steps of this particle
    pub generated: PhotonCount,
    /// Photons of this particle that reached a module
    pub at_modules: PhotonCount,
}

/// Per-particle photon statistics attached to a simulated event.
///
/// Particles are keyed by their (major, minor) identifier; flashers share
/// (0, 0).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventStatistics {
    particles: BTreeMap<(u64, i32), ParticleStatistics>,
}

impl EventStatistics {
    /// Empty statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record generated photons
    pub fn add_generated(&mut self, major_id: u64, minor_id: i32, count: u64, weight: f64) {
        let entry = self.particles.entry((major_id, minor_id)).or_default();
        entry.generated.count += count;
        entry.generated.weight += weight;
    }

    /// Record photons that reached modules
    pub fn add_at_modules(&mut self, major_id: u64, minor_id: i32, count: u64, weight: f64) {
        let entry = self.particles.entry((major_id, minor_id)).or_default();
        entry.at_modules.count += count;
        entry.at_modules.weight += weight;
    }

    /// Statistics of one particle
    pub fn particle(&self, major_id: u64, minor_id: i32) -> Option<&ParticleStatistics> {
        self.particles.get(&(major_id, minor_id))
    }

    /// All particles in id order
    pub fn iter(&self) -> impl Iterator<Item = ((u64, i32), &ParticleStatistics)> + '_ {
        self.particles.iter().map(|(k, v)| (*k, v))
    }

    /// Number of particles with entries
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    /// True if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Sums over all particles
    pub fn totals(&self) -> ParticleStatistics {
        self.particles
            .values()
            .fold(ParticleStatistics::default(), |mut acc, p| {
                acc.generated.count += p.generated.count;
                acc.generated.weight += p.generated.weight;
                acc.at_modules.count += p.at_modules.count;
                acc.at_modules.weight += p.at_modules.weight;
                acc
            })
    }
}
