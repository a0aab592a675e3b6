//! Compute devices that turn step bunches into detected photons.
//!
//! A device accepts tagged step bunches, reports how many bunches are
//! waiting in its work queue and hands back results in submission order.
//! The photon propagation kernel itself lives behind the device; this crate
//! only schedules work onto it.
//!
//! All devices of a run share one bunch layout: the bunch size granularity
//! is the least common multiple of the devices' workgroup sizes, and the
//! maximum bunch size is the smallest device limit rounded down to that
//! granularity (see [`negotiate_bunch_sizes`]).

pub mod types;
pub mod worker;

pub use types::{Photon, Step};
pub use worker::{PhotonKernel, ProximityKernel, ThreadedDevice};

use std::sync::Arc;

use log::{info, warn};
use thiserror::Error;

use crate::geometry::DetectorGeometry;
use crate::interrupt::Interrupt;
use crate::medium::MediumProperties;

/// Errors from compute devices and device negotiation
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No device was configured
    #[error("no compute devices configured")]
    NoDevices,

    /// A device reported a zero capacity
    #[error("device {device} reports an invalid capacity (workgroup size {workgroup_size}, max bunch size {max_bunch_size})")]
    InvalidCapacity {
        /// Device name
        device: String,
        /// Reported workgroup size
        workgroup_size: usize,
        /// Reported max bunch size
        max_bunch_size: usize,
    },

    /// Device limits leave no usable bunch size
    #[error("maximum bunch sizes are incompatible with workgroup sizes (granularity {granularity}, max bunch size {max_bunch_size})")]
    IncompatibleBunchSizes {
        /// Combined granularity
        granularity: usize,
        /// Smallest device limit
        max_bunch_size: usize,
    },

    /// A bunch does not fit the device
    #[error("device {device} cannot take a bunch of {len} steps")]
    InvalidBunch {
        /// Device name
        device: String,
        /// Bunch length
        len: usize,
    },

    /// A blocking submission was interrupted
    #[error("interrupted while submitting to a device")]
    Interrupted,

    /// The device's worker is gone
    #[error("device {0} disconnected")]
    Disconnected(String),

    /// The device's worker thread could not be started
    #[error("failed to spawn device worker: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Photons produced from one bunch.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionResult {
    /// Sequence tag the bunch was submitted with
    pub tag: u32,
    /// Photons that reached a module
    pub photons: Vec<Photon>,
}

/// A target that converts step bunches into photons asynchronously.
pub trait ComputeDevice: Send + Sync {
    /// Human-readable name
    fn name(&self) -> &str;

    /// Bunch lengths must be a multiple of this
    fn workgroup_size(&self) -> usize;

    /// Largest bunch the device accepts
    fn max_bunch_size(&self) -> usize;

    /// Bunches submitted but not yet processed
    fn queue_size(&self) -> usize;

    /// Submit a bunch, blocking while the work queue is full.
    ///
    /// Returns [`DeviceError::Interrupted`] if `interrupt` is raised while
    /// blocked.
    fn enqueue_steps(
        &self,
        steps: Vec<Step>,
        tag: u32,
        interrupt: &Interrupt,
    ) -> Result<(), DeviceError>;

    /// Block until the oldest outstanding result is ready.
    fn conversion_result(&self) -> Result<ConversionResult, DeviceError>;
}

/// Builds a device once the detector geometry is known.
pub trait DeviceFactory: Send {
    /// Create a device for this geometry and medium.
    fn create(
        &self,
        geometry: &Arc<DetectorGeometry>,
        medium: &MediumProperties,
    ) -> Result<Arc<dyn ComputeDevice>, DeviceError>;
}

impl<F> DeviceFactory for F
where
    F: Fn(&Arc<DetectorGeometry>, &MediumProperties) -> Result<Arc<dyn ComputeDevice>, DeviceError>
        + Send,
{
    fn create(
        &self,
        geometry: &Arc<DetectorGeometry>,
        medium: &MediumProperties,
    ) -> Result<Arc<dyn ComputeDevice>, DeviceError> {
        self(geometry, medium)
    }
}

/// Bunch layout shared by all devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BunchSizes {
    /// Every bunch length is a multiple of this
    pub granularity: usize,
    /// Upper limit on bunch length; a multiple of `granularity`
    pub max_bunch_size: usize,
}

/// Combine device capacities into one bunch layout.
pub fn negotiate_bunch_sizes(
    devices: &[Arc<dyn ComputeDevice>],
) -> Result<BunchSizes, DeviceError> {
    let capacities: Vec<(String, usize, usize)> = devices
        .iter()
        .map(|d| (d.name().to_string(), d.workgroup_size(), d.max_bunch_size()))
        .collect();
    negotiate(&capacities)
}

fn negotiate(capacities: &[(String, usize, usize)]) -> Result<BunchSizes, DeviceError> {
    let mut sizes: Option<BunchSizes> = None;

    for (name, workgroup_size, device_max) in capacities {
        let (workgroup_size, device_max) = (*workgroup_size, *device_max);
        if workgroup_size == 0 || device_max == 0 {
            return Err(DeviceError::InvalidCapacity {
                device: name.clone(),
                workgroup_size,
                max_bunch_size: device_max,
            });
        }
        info!(
            "device {}: workgroup size {}, max bunch size {}",
            name, workgroup_size, device_max
        );

        let next = match sizes {
            None => BunchSizes {
                granularity: workgroup_size,
                max_bunch_size: device_max,
            },
            Some(current) => {
                let granularity = lcm(current.granularity, workgroup_size);
                if granularity != current.granularity {
                    warn!(
                        "device {} workgroup size {} is not compatible, changing granularity from {} to {}",
                        name, workgroup_size, current.granularity, granularity
                    );
                }
                let smallest = current.max_bunch_size.min(device_max);
                let max_bunch_size = smallest - smallest % granularity;
                if max_bunch_size != current.max_bunch_size {
                    warn!(
                        "maximum bunch size decreased from {} to {} because of device {} (limit {}, granularity {})",
                        current.max_bunch_size, max_bunch_size, name, device_max, granularity
                    );
                }
                if max_bunch_size == 0 {
                    return Err(DeviceError::IncompatibleBunchSizes {
                        granularity,
                        max_bunch_size: smallest,
                    });
                }
                BunchSizes {
                    granularity,
                    max_bunch_size,
                }
            }
        };
        sizes = Some(next);
    }

    let sizes = sizes.ok_or(DeviceError::NoDevices)?;
    // A single device may report a limit that is not a multiple of its own workgroup
    let max_bunch_size = sizes.max_bunch_size - sizes.max_bunch_size % sizes.granularity;
    if max_bunch_size == 0 {
        return Err(DeviceError::IncompatibleBunchSizes {
            granularity: sizes.granularity,
            max_bunch_size: sizes.max_bunch_size,
        });
    }
    Ok(BunchSizes {
        granularity: sizes.granularity,
        max_bunch_size,
    })
}

/// Greatest common divisor
pub fn gcd(a: usize, b: usize) -> usize {
    let (mut a, mut b) = (a, b);
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

/// Least common multiple; 0 if either argument is 0
pub fn lcm(a: usize, b: usize) -> usize {
    if a == 0 || b == 0 {
        return 0;
    }
    a / gcd(a, b) * b
}
