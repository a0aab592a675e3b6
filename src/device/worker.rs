//! Host-side compute device backed by a worker thread.
//!
//! [`ThreadedDevice`] gives any [`PhotonKernel`] the device contract: a
//! bounded work queue (submissions block when it is full), a worker thread
//! running the kernel, and an unbounded FIFO of results.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{select, Receiver, Sender};
use glam::DVec3;
use log::{debug, trace};

use super::types::{Photon, Step};
use super::{ComputeDevice, ConversionResult, DeviceError};
use crate::geometry::{DetectorGeometry, OmKey};
use crate::interrupt::Interrupt;
use crate::random::{RandomService, StdRandomService};

/// Converts a bunch of steps into photons that reach modules.
pub trait PhotonKernel: Send + 'static {
    /// Propagate every non-dummy step in `steps`.
    fn propagate(&mut self, steps: &[Step]) -> Vec<Photon>;
}

type WorkItem = (u32, Vec<Step>);

/// [`ComputeDevice`] running a [`PhotonKernel`] on its own thread.
pub struct ThreadedDevice {
    name: String,
    workgroup_size: usize,
    max_bunch_size: usize,
    work_tx: Option<Sender<WorkItem>>,
    result_rx: Receiver<ConversionResult>,
    pending: Arc<AtomicUsize>,
    worker: Option<JoinHandle<()>>,
}

impl ThreadedDevice {
    /// Start a device.
    ///
    /// # Arguments
    /// * `name` - device name, also used for the worker thread
    /// * `workgroup_size` - bunch length granularity
    /// * `max_bunch_size` - largest accepted bunch
    /// * `queue_capacity` - bunches that may wait before submissions block
    /// * `kernel` - photon propagation kernel
    pub fn spawn<K: PhotonKernel>(
        name: impl Into<String>,
        workgroup_size: usize,
        max_bunch_size: usize,
        queue_capacity: usize,
        kernel: K,
    ) -> Result<Self, DeviceError> {
        let name = name.into();
        if workgroup_size == 0 || max_bunch_size == 0 {
            return Err(DeviceError::InvalidCapacity {
                device: name,
                workgroup_size,
                max_bunch_size,
            });
        }

        let (work_tx, work_rx) = crossbeam_channel::bounded::<WorkItem>(queue_capacity);
        let (result_tx, result_rx) = crossbeam_channel::unbounded();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker = {
            let pending = Arc::clone(&pending);
            let name = name.clone();
            thread::Builder::new()
                .name(format!("device-{}", name))
                .spawn(move || run_kernel(kernel, work_rx, result_tx, pending, name))
                .map_err(DeviceError::Spawn)?
        };

        Ok(Self {
            name,
            workgroup_size,
            max_bunch_size,
            work_tx: Some(work_tx),
            result_rx,
            pending,
            worker: Some(worker),
        })
    }
}

fn run_kernel<K: PhotonKernel>(
    mut kernel: K,
    work_rx: Receiver<WorkItem>,
    result_tx: Sender<ConversionResult>,
    pending: Arc<AtomicUsize>,
    name: String,
) {
    for (tag, steps) in work_rx.iter() {
        let photons = kernel.propagate(&steps);
        trace!(
            "device {}: bunch {} ({} steps) -> {} photons",
            name,
            tag,
            steps.len(),
            photons.len()
        );
        pending.fetch_sub(1, Ordering::SeqCst);
        if result_tx.send(ConversionResult { tag, photons }).is_err() {
            break;
        }
    }
    debug!("device {}: worker exited", name);
}

impl ComputeDevice for ThreadedDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn workgroup_size(&self) -> usize {
        self.workgroup_size
    }

    fn max_bunch_size(&self) -> usize {
        self.max_bunch_size
    }

    fn queue_size(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    fn enqueue_steps(
        &self,
        steps: Vec<Step>,
        tag: u32,
        interrupt: &Interrupt,
    ) -> Result<(), DeviceError> {
        let work_tx = self
            .work_tx
            .as_ref()
            .ok_or_else(|| DeviceError::Disconnected(self.name.clone()))?;
        if steps.is_empty()
            || steps.len() > self.max_bunch_size
            || steps.len() % self.workgroup_size != 0
        {
            return Err(DeviceError::InvalidBunch {
                device: self.name.clone(),
                len: steps.len(),
            });
        }
        if interrupt.is_raised() {
            return Err(DeviceError::Interrupted);
        }

        self.pending.fetch_add(1, Ordering::SeqCst);
        let sent = select! {
            send(work_tx, (tag, steps)) -> res => res.map_err(|_| DeviceError::Disconnected(self.name.clone())),
            recv(interrupt.signal()) -> _ => Err(DeviceError::Interrupted),
        };
        if sent.is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        sent
    }

    fn conversion_result(&self) -> Result<ConversionResult, DeviceError> {
        self.result_rx
            .recv()
            .map_err(|_| DeviceError::Disconnected(self.name.clone()))
    }
}

impl Drop for ThreadedDevice {
    fn drop(&mut self) {
        // Closing the work queue lets the worker finish what it has and exit
        self.work_tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Radius of an optical module [m]
pub const MODULE_RADIUS: f64 = 0.16510;

/// Direct-light kernel: photons travel in straight lines without scattering.
///
/// Each step illuminates every module with a Poisson-distributed number of
/// photons, proportional to the solid angle the module subtends and
/// attenuated by absorption.
pub struct ProximityKernel {
    modules: Vec<(OmKey, DVec3)>,
    absorption_length: f64,
    group_velocity: f64,
    wavelength: f64,
    random: StdRandomService,
}

impl ProximityKernel {
    /// Kernel for a detector with default optical properties.
    pub fn new(geometry: &DetectorGeometry, seed: u64) -> Self {
        Self {
            modules: geometry.iter().collect(),
            absorption_length: 100.0,
            group_velocity: 0.2190,
            wavelength: 400.0,
            random: StdRandomService::new(seed),
        }
    }

    /// Set the absorption length [m]
    pub fn with_absorption_length(mut self, absorption_length: f64) -> Self {
        self.absorption_length = absorption_length;
        self
    }
}

fn theta_phi(dir: DVec3) -> (f32, f32) {
    (dir.z.clamp(-1.0, 1.0).acos() as f32, dir.y.atan2(dir.x) as f32)
}

impl PhotonKernel for ProximityKernel {
    fn propagate(&mut self, steps: &[Step]) -> Vec<Photon> {
        let mut photons = Vec::new();
        for step in steps.iter().filter(|s| !s.is_dummy()) {
            let origin = step.position();
            for &(key, module) in &self.modules {
                let delta = module - origin;
                let dist = delta.length().max(MODULE_RADIUS);
                let solid_angle = (MODULE_RADIUS * MODULE_RADIUS / (4.0 * dist * dist)).min(1.0);
                let mean = f64::from(step.num_photons)
                    * solid_angle
                    * (-dist / self.absorption_length).exp();
                let hits = self.random.poisson(mean);
                if hits == 0 {
                    continue;
                }

                let dir = delta.normalize_or_zero();
                let (theta, phi) = theta_phi(dir);
                let hit_pos = module - dir * MODULE_RADIUS;
                let photon = Photon {
                    pos: hit_pos.as_vec3().to_array(),
                    time: (f64::from(step.time) + dist / self.group_velocity) as f32,
                    dir_theta: theta,
                    dir_phi: phi,
                    start_pos: step.pos,
                    start_time: step.time,
                    start_dir_theta: theta,
                    start_dir_phi: phi,
                    weight: step.weight,
                    wavelength: self.wavelength as f32,
                    cherenkov_dist: dist as f32,
                    group_velocity: self.group_velocity as f32,
                    num_scatters: 0,
                    identifier: step.identifier,
                    string_id: key.string,
                    om_id: key.om,
                };
                photons.extend(std::iter::repeat(photon).take(hits as usize));
            }
        }
        photons
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;
    use std::time::Duration;

    /// One photon per non-dummy step, tagged with the step's identifier.
    struct EchoKernel;

    impl PhotonKernel for EchoKernel {
        fn propagate(&mut self, steps: &[Step]) -> Vec<Photon> {
            steps
                .iter()
                .filter(|s| !s.is_dummy())
                .map(|s| Photon {
                    identifier: s.identifier,
                    ..Photon::zeroed()
                })
                .collect()
        }
    }

    /// Blocks until told to proceed.
    struct GatedKernel(Receiver<()>);

    impl PhotonKernel for GatedKernel {
        fn propagate(&mut self, _steps: &[Step]) -> Vec<Photon> {
            let _ = self.0.recv();
            Vec::new()
        }
    }

    fn step(id: u32) -> Step {
        Step::new(DVec3::ZERO, DVec3::Z, 0.0, 1.0, 10, id)
    }

    #[test]
    fn test_results_in_submission_order() {
        let device = ThreadedDevice::spawn("echo", 1, 16, 4, EchoKernel).unwrap();
        let interrupt = Interrupt::new();
        for tag in 0..5u32 {
            device
                .enqueue_steps(vec![step(tag + 1), step(tag + 1)], tag, &interrupt)
                .unwrap();
        }
        for tag in 0..5u32 {
            let result = device.conversion_result().unwrap();
            assert_eq!(result.tag, tag);
            assert_eq!(result.photons.len(), 2);
            assert!(result.photons.iter().all(|p| p.identifier == tag + 1));
        }
        assert_eq!(device.queue_size(), 0);
    }

    #[test]
    fn test_rejects_misaligned_bunch() {
        let device = ThreadedDevice::spawn("echo", 4, 8, 1, EchoKernel).unwrap();
        let interrupt = Interrupt::new();
        assert!(matches!(
            device.enqueue_steps(vec![step(1); 3], 0, &interrupt),
            Err(DeviceError::InvalidBunch { .. })
        ));
        assert!(matches!(
            device.enqueue_steps(vec![step(1); 12], 0, &interrupt),
            Err(DeviceError::InvalidBunch { .. })
        ));
        device.enqueue_steps(vec![step(1); 8], 0, &interrupt).unwrap();
    }

    #[test]
    fn test_full_queue_submission_is_interruptible() {
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded();
        let device = Arc::new(ThreadedDevice::spawn("gated", 1, 4, 1, GatedKernel(gate_rx)).unwrap());
        let interrupt = Interrupt::new();

        // One bunch in the kernel, one waiting in the queue
        device.enqueue_steps(vec![step(1)], 0, &interrupt).unwrap();
        device.enqueue_steps(vec![step(1)], 1, &interrupt).unwrap();

        let blocked = {
            let device = Arc::clone(&device);
            let interrupt = interrupt.clone();
            thread::spawn(move || device.enqueue_steps(vec![step(1)], 2, &interrupt))
        };
        thread::sleep(Duration::from_millis(20));
        interrupt.raise();
        assert!(matches!(
            blocked.join().unwrap(),
            Err(DeviceError::Interrupted)
        ));
        assert_eq!(device.queue_size(), 2);

        gate_tx.send(()).unwrap();
        gate_tx.send(()).unwrap();
        assert_eq!(device.conversion_result().unwrap().tag, 0);
        assert_eq!(device.conversion_result().unwrap().tag, 1);
    }

    #[test]
    fn test_proximity_kernel_hits_nearby_module() {
        let mut geometry = DetectorGeometry::new();
        geometry.insert(OmKey::new(3, 7), DVec3::new(0.0, 0.0, 1.0));
        let mut kernel = ProximityKernel::new(&geometry, 1);

        let mut bright = Step::new(DVec3::ZERO, DVec3::Z, 5.0, 0.001, 100_000, 42);
        bright.weight = 1.0;
        let photons = kernel.propagate(&[bright, Step::dummy()]);

        assert!(!photons.is_empty());
        for p in &photons {
            assert_eq!(p.identifier, 42);
            assert_eq!((p.string_id, p.om_id), (3, 7));
            assert!(p.time > 5.0);
            assert!(p.dir_theta.abs() < 1e-6);
        }
    }
}
