//! Pump thread moving step bunches from the [`StepQueue`] to the devices.
//!
//! The pump pulls bunches until it reaches a barrier, sending each one to
//! the device with the fewest queued bunches. Ties go round-robin, starting
//! after the device used last. Per device it counts the bunches sent so the
//! collector knows how many results to wait for.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, trace};
use thiserror::Error;

use crate::device::{ComputeDevice, DeviceError};
use crate::interrupt::Interrupt;
use crate::statistics::PhotonTally;
use crate::step_generator::StepError;
use crate::step_queue::StepQueue;

/// Errors that end the pump
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No device to dispatch to
    #[error("no compute devices to dispatch to")]
    NoDevices,

    /// A non-dummy step carries the reserved identifier 0
    #[error("step with reserved identifier 0")]
    ReservedIdentifier,

    /// The step queue failed
    #[error("step generation failed: {0}")]
    Step(#[from] StepError),

    /// A device refused a bunch
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// The pump thread could not be started
    #[error("failed to spawn the pump thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The pump thread panicked
    #[error("pump thread panicked")]
    Panicked,
}

/// How the pump loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// A barrier was reached; all bunches before it were dispatched
    Barrier,
    /// The pump was interrupted
    Interrupted,
}

/// Summary of one pump run.
#[derive(Debug, Clone, PartialEq)]
pub struct PumpReport {
    /// How the loop ended
    pub exit: PumpExit,
    /// Bunches sent to each device, in device order
    pub bunches_per_device: Vec<u64>,
    /// Photons emitted per identifier (only when statistics are collected)
    pub generated: PhotonTally,
}

impl PumpReport {
    /// True if the pump stopped at a barrier
    pub fn finished_ok(&self) -> bool {
        self.exit == PumpExit::Barrier
    }

    /// Bunches sent to all devices
    pub fn total_bunches(&self) -> u64 {
        self.bunches_per_device.iter().sum()
    }
}

/// Pick the least-loaded device.
///
/// Scans forward from the device after `last`, wrapping around, and returns
/// the first one whose fill level equals the minimum.
///
/// # Example
/// ```
/// use photon_dispatch::dispatcher::select_device;
/// assert_eq!(select_device(&[5, 2, 2, 7], 0), 1);
/// assert_eq!(select_device(&[5, 2, 2, 7], 1), 2);
/// assert_eq!(select_device(&[5, 2, 2, 7], 2), 1);
/// ```
pub fn select_device(fill_levels: &[usize], last: usize) -> usize {
    let n = fill_levels.len();
    let min = match fill_levels.iter().min() {
        Some(&m) => m,
        None => return 0,
    };
    let mut index = last % n;
    loop {
        index = (index + 1) % n;
        if fill_levels[index] == min {
            return index;
        }
    }
}

/// Dispatch bunches until a barrier is reached or `interrupt` is raised.
pub fn pump_loop(
    steps: &StepQueue,
    devices: &[Arc<dyn ComputeDevice>],
    interrupt: &Interrupt,
    collect_statistics: bool,
) -> Result<PumpReport, DispatchError> {
    if devices.is_empty() {
        return Err(DispatchError::NoDevices);
    }

    let mut report = PumpReport {
        exit: PumpExit::Interrupted,
        bunches_per_device: vec![0; devices.len()],
        generated: PhotonTally::new(),
    };
    let mut last = 0usize;
    let mut tag = 0u32;

    loop {
        let (bunch, barrier_reset) = match steps.next_bunch(interrupt) {
            Ok(next) => next,
            Err(StepError::Interrupted) => {
                debug!("pump interrupted while waiting for steps");
                return Ok(report);
            }
            Err(e) => return Err(e.into()),
        };

        if !bunch.is_empty() {
            if collect_statistics {
                for step in bunch.iter().filter(|s| !s.is_dummy()) {
                    if step.identifier == 0 {
                        return Err(DispatchError::ReservedIdentifier);
                    }
                    report.generated.add(
                        step.identifier,
                        u64::from(step.num_photons),
                        f64::from(step.num_photons) * f64::from(step.weight),
                    );
                }
            }

            let fill: Vec<usize> = devices.iter().map(|d| d.queue_size()).collect();
            let index = select_device(&fill, last);
            trace!(
                "bunch {} ({} steps) -> device {} (fill {:?})",
                tag,
                bunch.len(),
                devices[index].name(),
                fill
            );
            match devices[index].enqueue_steps(bunch, tag, interrupt) {
                Ok(()) => {}
                Err(DeviceError::Interrupted) => {
                    debug!("pump interrupted while submitting to a device");
                    return Ok(report);
                }
                Err(e) => return Err(e.into()),
            }
            report.bunches_per_device[index] += 1;
            tag = tag.wrapping_add(1);
            last = index;
        }

        if barrier_reset {
            report.exit = PumpExit::Barrier;
            debug!(
                "pump reached barrier after {} bunches",
                report.total_bunches()
            );
            return Ok(report);
        }
    }
}

/// Handle to a running pump thread.
pub struct Pump {
    handle: Option<JoinHandle<Result<PumpReport, DispatchError>>>,
    interrupt: Interrupt,
    steps: Arc<StepQueue>,
}

impl Pump {
    /// Start the pump on its own thread.
    pub fn start(
        steps: Arc<StepQueue>,
        devices: Vec<Arc<dyn ComputeDevice>>,
        collect_statistics: bool,
    ) -> Result<Self, DispatchError> {
        let interrupt = Interrupt::new();
        let handle = {
            let steps = Arc::clone(&steps);
            let interrupt = interrupt.clone();
            thread::Builder::new()
                .name("photon-pump".into())
                .spawn(move || pump_loop(&steps, &devices, &interrupt, collect_statistics))
                .map_err(DispatchError::Spawn)?
        };
        debug!("pump started");
        Ok(Self {
            handle: Some(handle),
            interrupt,
            steps,
        })
    }

    /// True once the pump loop has returned
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the pump to stop on its own (at a barrier).
    pub fn join(mut self) -> Result<PumpReport, DispatchError> {
        self.join_inner()
    }

    /// Interrupt the pump and wait for it.
    pub fn stop(mut self) -> Result<PumpReport, DispatchError> {
        self.interrupt_and_join()
    }

    fn interrupt_and_join(&mut self) -> Result<PumpReport, DispatchError> {
        self.interrupt.raise();
        self.steps.wake_all();
        self.join_inner()
    }

    fn join_inner(&mut self) -> Result<PumpReport, DispatchError> {
        let handle = self.handle.take().ok_or(DispatchError::Panicked)?;
        handle.join().map_err(|_| DispatchError::Panicked)?
    }
}

impl Drop for Pump {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(e) = self.interrupt_and_join() {
                error!("pump ended with an error: {}", e);
            }
        }
    }
}
