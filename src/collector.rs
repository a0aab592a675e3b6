//! Flush-time retrieval of device results and their attribution to frames.
//!
//! Runs on the caller thread after the pump has stopped at a barrier. Each
//! device is drained in turn, oldest result first, for exactly the number of
//! bunches the pump sent it.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, trace};

use crate::device::{ComputeDevice, Photon};
use crate::event_cache::{FrameCache, ParticleCache};
use crate::frame::OutputPhoton;
use crate::geometry::OmKey;
use crate::module::ModuleError;
use crate::statistics::{EventStatistics, PhotonTally};

/// Attach device photons to the frames that own their identifiers.
///
/// When `at_modules` is given, photon counts and weights are also tallied
/// per identifier. Returns the number of photons added.
pub fn add_photons_to_frames(
    photons: &[Photon],
    particles: &ParticleCache,
    frames: &mut FrameCache,
    mut at_modules: Option<&mut PhotonTally>,
) -> Result<usize, ModuleError> {
    for photon in photons {
        let owner = particles
            .get(photon.identifier)
            .ok_or(ModuleError::UnknownParticleId(photon.identifier))?;
        let cached = frames.len();
        let slot = frames.slot_mut(owner.frame_index).ok_or_else(|| {
            ModuleError::CacheInconsistent(format!(
                "identifier {} points to frame {}, but only {} frames are cached",
                photon.identifier, owner.frame_index, cached
            ))
        })?;

        let id = slot.next_photon_id;
        slot.next_photon_id = slot.next_photon_id.wrapping_add(1);
        slot.photons
            .entry(OmKey::new(photon.string_id, photon.om_id))
            .or_default()
            .push(OutputPhoton::from_device(
                photon,
                id,
                owner.major_id,
                owner.minor_id,
            ));

        if let Some(tally) = at_modules.as_deref_mut() {
            tally.add(photon.identifier, 1, f64::from(photon.weight));
        }
    }
    Ok(photons.len())
}

/// Retrieve every outstanding result, device by device.
///
/// `bunches_per_device[i]` is the number of results to wait for on
/// `devices[i]`. Returns the total number of photons retrieved.
pub fn drain_devices(
    devices: &[Arc<dyn ComputeDevice>],
    bunches_per_device: &[u64],
    particles: &ParticleCache,
    frames: &mut FrameCache,
    mut at_modules: Option<&mut PhotonTally>,
) -> Result<u64, ModuleError> {
    if devices.len() != bunches_per_device.len() {
        return Err(ModuleError::CacheInconsistent(format!(
            "{} devices but {} bunch counters",
            devices.len(),
            bunches_per_device.len()
        )));
    }

    let mut total = 0u64;
    for (device, &bunches) in devices.iter().zip(bunches_per_device) {
        let mut from_device = 0u64;
        for _ in 0..bunches {
            let result = device.conversion_result()?;
            trace!(
                "device {}: result {} with {} photons",
                device.name(),
                result.tag,
                result.photons.len()
            );
            let added = add_photons_to_frames(
                &result.photons,
                particles,
                frames,
                at_modules.as_deref_mut(),
            )?;
            from_device += added as u64;
        }
        debug!(
            "device {}: {} photons from {} bunches",
            device.name(),
            from_device,
            bunches
        );
        total += from_device;
    }
    Ok(total)
}

/// Combine generated and detected tallies into per-frame statistics.
///
/// The result is keyed by frame index. Identifiers unknown to the particle
/// cache are an error.
pub fn fold_statistics(
    particles: &ParticleCache,
    generated: &PhotonTally,
    at_modules: &PhotonTally,
) -> Result<BTreeMap<usize, EventStatistics>, ModuleError> {
    let mut per_frame: BTreeMap<usize, EventStatistics> = BTreeMap::new();

    for (identifier, count) in generated.iter() {
        let owner = particles
            .get(identifier)
            .ok_or(ModuleError::UnknownParticleId(identifier))?;
        per_frame.entry(owner.frame_index).or_default().add_generated(
            owner.major_id,
            owner.minor_id,
            count.count,
            count.weight,
        );
    }
    for (identifier, count) in at_modules.iter() {
        let owner = particles
            .get(identifier)
            .ok_or(ModuleError::UnknownParticleId(identifier))?;
        per_frame.entry(owner.frame_index).or_default().add_at_modules(
            owner.major_id,
            owner.minor_id,
            count.count,
            count.weight,
        );
    }
    Ok(per_frame)
}
