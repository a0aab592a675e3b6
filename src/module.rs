//! The photon module: frame ingestion, event caching and flushing.
//!
//! [`PhotonModule`] accepts frames in order. A geometry frame sets up the
//! devices and the step generator. Physics frames have their light sources
//! turned into steps, which the pump thread dispatches to the devices while
//! more frames arrive. Once enough frames are active (or on [`finish`]) the
//! cache is flushed: a barrier is enqueued, the pump is joined, results are
//! collected and every cached frame is handed to the [`EventSink`] in
//! arrival order.
//!
//! [`finish`]: PhotonModule::finish

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, error, info, trace};
use thiserror::Error;

use crate::collector::{drain_devices, fold_statistics};
use crate::device::{negotiate_bunch_sizes, BunchSizes, ComputeDevice, DeviceError, DeviceFactory};
use crate::dispatcher::{DispatchError, Pump};
use crate::event_cache::{collect_light_sources, FrameCache, ParticleCache};
use crate::frame::{EventSink, Frame, Stream};
use crate::geometry::DetectorGeometry;
use crate::medium::MediumProperties;
use crate::particle::LightSource;
use crate::random::RandomService;
use crate::statistics::PhotonTally;
use crate::step_generator::{StepError, StepGenerator, StepGeneratorConfig};
use crate::step_queue::StepQueue;

/// Errors from the photon module
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Invalid module configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A second geometry frame arrived
    #[error("geometry is already configured")]
    GeometryAlreadyConfigured,

    /// An operation needs the detector geometry
    #[error("no geometry configured")]
    MissingGeometry,

    /// A frame had to be cached before any geometry frame
    #[error("received a frame to work on before the geometry")]
    FrameBeforeGeometry,

    /// A device returned a photon with an identifier nobody owns
    #[error("device returned a photon with unknown particle id {0}")]
    UnknownParticleId(u32),

    /// Internal bookkeeping does not add up
    #[error("internal cache inconsistency: {0}")]
    CacheInconsistent(String),

    /// The particle id allocator wrapped onto a live id
    #[error("particle id {0} is already in use")]
    ParticleIdInUse(u32),

    /// The pump stopped before reaching the flush barrier
    #[error("pump thread did not finish at the barrier")]
    PumpAborted,

    /// Step generation failed
    #[error(transparent)]
    Step(#[from] StepError),

    /// A device failed
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// The pump thread failed
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Configuration of a [`PhotonModule`].
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleConfig {
    /// Frame kinds whose light sources are simulated
    pub work_on_these_stops: Vec<Stream>,
    /// Flush once this many frames are being simulated
    pub max_num_parallel_events: usize,
    /// Skip μ± as light sources
    pub ignore_muons: bool,
    /// Attach per-particle photon statistics to simulated frames
    pub collect_statistics: bool,
    /// Read light sources from the frame's particle tree
    pub use_mc_tree: bool,
    /// Read light sources from the frame's flasher pulses
    pub use_flashers: bool,
    /// Step generator settings
    pub step: StepGeneratorConfig,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            work_on_these_stops: vec![Stream::Physics],
            max_num_parallel_events: 1000,
            ignore_muons: false,
            collect_statistics: false,
            use_mc_tree: true,
            use_flashers: false,
            step: StepGeneratorConfig::default(),
        }
    }
}

impl ModuleConfig {
    /// Check settings for consistency.
    pub fn validate(&self) -> Result<(), ModuleError> {
        if !self.use_mc_tree && !self.use_flashers {
            return Err(ModuleError::Config(
                "neither the particle tree nor flashers are enabled, nothing to simulate".into(),
            ));
        }
        if self.max_num_parallel_events == 0 {
            return Err(ModuleError::Config(
                "max_num_parallel_events must be at least 1".into(),
            ));
        }
        self.step.validate()?;
        Ok(())
    }

    fn works_on(&self, stream: Stream) -> bool {
        self.work_on_these_stops.contains(&stream)
    }
}

/// Frame-level driver of the photon simulation.
pub struct PhotonModule<S: EventSink> {
    // Declared first so the pump stops before anything else is dropped
    pump: Option<Pump>,
    config: ModuleConfig,
    medium: MediumProperties,
    random: Option<Box<dyn RandomService>>,
    factories: Vec<Box<dyn DeviceFactory>>,
    sink: S,
    geometry: Option<Arc<DetectorGeometry>>,
    devices: Vec<Arc<dyn ComputeDevice>>,
    bunch_sizes: Option<BunchSizes>,
    steps: Option<Arc<StepQueue>>,
    particles: ParticleCache,
    frames: FrameCache,
    enqueued_energy: f64,
    enqueued_particles: u64,
}

impl<S: EventSink> PhotonModule<S> {
    /// Create a module.
    ///
    /// # Arguments
    /// * `config` - module settings
    /// * `random` - random service handed to the step generator
    /// * `medium` - photon yield and density of the medium
    /// * `factories` - one factory per compute device, invoked on the geometry frame
    /// * `sink` - receives finished frames
    pub fn new(
        config: ModuleConfig,
        random: Box<dyn RandomService>,
        medium: MediumProperties,
        factories: Vec<Box<dyn DeviceFactory>>,
        sink: S,
    ) -> Result<Self, ModuleError> {
        config.validate()?;
        if factories.is_empty() {
            return Err(ModuleError::Config("no compute devices configured".into()));
        }
        info!(
            "photon module: stops {:?}, up to {} parallel events, {} device(s), statistics {}",
            config.work_on_these_stops,
            config.max_num_parallel_events,
            factories.len(),
            if config.collect_statistics { "on" } else { "off" }
        );
        Ok(Self {
            pump: None,
            config,
            medium,
            random: Some(random),
            factories,
            sink,
            geometry: None,
            devices: Vec::new(),
            bunch_sizes: None,
            steps: None,
            particles: ParticleCache::new(),
            frames: FrameCache::new(),
            enqueued_energy: 0.0,
            enqueued_particles: 0,
        })
    }

    /// Module settings
    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    /// Detector geometry, once a geometry frame was seen
    pub fn geometry(&self) -> Option<&Arc<DetectorGeometry>> {
        self.geometry.as_ref()
    }

    /// Compute devices, once a geometry frame was seen
    pub fn devices(&self) -> &[Arc<dyn ComputeDevice>] {
        &self.devices
    }

    /// Negotiated bunch layout, once a geometry frame was seen
    pub fn bunch_sizes(&self) -> Option<BunchSizes> {
        self.bunch_sizes
    }

    /// Frames currently cached
    pub fn cached_frames(&self) -> usize {
        self.frames.len()
    }

    /// Cached frames being simulated
    pub fn active_frames(&self) -> usize {
        self.frames.active_count()
    }

    /// The frame consumer
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Mutable access to the frame consumer
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Stop the pump and return the frame consumer.
    ///
    /// Cached frames that were not flushed are discarded; call
    /// [`finish`](Self::finish) first to emit them.
    pub fn into_sink(mut self) -> S {
        if let Some(pump) = self.pump.take() {
            if let Err(e) = pump.stop() {
                error!("pump ended with an error: {}", e);
            }
        }
        self.sink
    }

    /// Process one frame.
    pub fn process(&mut self, frame: Frame) -> Result<(), ModuleError> {
        if frame.stream == Stream::Geometry {
            self.digest_geometry(&frame)?;
            self.sink.push(frame);
            return Ok(());
        }

        let works_on = self.config.works_on(frame.stream);
        if self.frames.is_empty() && !works_on {
            self.sink.push(frame);
            return Ok(());
        }

        let steps = match (&self.geometry, &self.steps) {
            (Some(_), Some(steps)) => Arc::clone(steps),
            _ => return Err(ModuleError::FrameBeforeGeometry),
        };
        self.ensure_pump()?;

        let use_tree = self.config.use_mc_tree && frame.mc_tree.is_some();
        let use_flashers = self.config.use_flashers && frame.flashers.is_some();
        if !works_on || (!use_tree && !use_flashers) {
            self.frames.push(frame, false);
            return Ok(());
        }

        let particles = match (&frame.mc_tree, &self.geometry) {
            (Some(tree), Some(geometry)) if use_tree => {
                collect_light_sources(tree, geometry, self.config.ignore_muons)
            }
            _ => Vec::new(),
        };
        let flashers = if use_flashers {
            frame.flashers.clone().unwrap_or_default()
        } else {
            Vec::new()
        };

        let index = self.frames.push(frame, true);

        for particle in particles {
            let id = self
                .particles
                .allocate(index, particle.major_id, particle.minor_id)?;
            self.enqueued_energy += particle.energy;
            self.enqueued_particles += 1;
            steps.enqueue_light_source(&LightSource::Particle(particle), id)?;
        }
        for pulse in flashers {
            let id = self.particles.allocate(index, 0, 0)?;
            steps.enqueue_light_source(&LightSource::Flasher(pulse), id)?;
        }
        trace!(
            "frame {} active, {} light sources cached in total",
            index,
            self.particles.len()
        );

        if self.frames.active_count() >= self.config.max_num_parallel_events {
            self.flush()?;
        }
        Ok(())
    }

    /// Simulate everything cached and emit all cached frames in order.
    pub fn flush(&mut self) -> Result<(), ModuleError> {
        if self.frames.is_empty() {
            return Ok(());
        }
        let steps = self.steps.clone().ok_or(ModuleError::MissingGeometry)?;

        info!(
            "flushing {} frames ({} active): {} particles, {:.3} GeV total",
            self.frames.len(),
            self.frames.active_count(),
            self.enqueued_particles,
            self.enqueued_energy
        );

        self.ensure_pump()?;
        steps.enqueue_barrier()?;
        let pump = self.pump.take().ok_or(ModuleError::PumpAborted)?;
        let report = pump.join()?;
        if !report.finished_ok() {
            return Err(ModuleError::PumpAborted);
        }

        let collect = self.config.collect_statistics;
        let mut at_modules = collect.then(PhotonTally::new);
        let photons = drain_devices(
            &self.devices,
            &report.bunches_per_device,
            &self.particles,
            &mut self.frames,
            at_modules.as_mut(),
        )?;
        info!(
            "retrieved {} photons from {} bunches",
            photons,
            report.total_bunches()
        );

        let mut statistics = match &at_modules {
            Some(at_modules) => fold_statistics(&self.particles, &report.generated, at_modules)?,
            None => BTreeMap::new(),
        };

        for (index, slot) in self.frames.drain().into_iter().enumerate() {
            let mut frame = slot.frame;
            if slot.active {
                frame.photons = Some(slot.photons);
                if collect {
                    frame.statistics = Some(statistics.remove(&index).unwrap_or_default());
                }
            }
            self.sink.push(frame);
        }

        self.particles.clear();
        self.enqueued_energy = 0.0;
        self.enqueued_particles = 0;
        debug!("flush done, next particle id {}", self.particles.next_id());
        Ok(())
    }

    /// Flush what is left and stop the pump.
    pub fn finish(&mut self) -> Result<(), ModuleError> {
        self.flush()?;
        if let Some(pump) = self.pump.take() {
            pump.stop()?;
        }
        info!("photon module finished");
        Ok(())
    }

    fn ensure_pump(&mut self) -> Result<(), ModuleError> {
        if self.pump.is_some() {
            return Ok(());
        }
        let steps = self.steps.clone().ok_or(ModuleError::MissingGeometry)?;
        self.pump = Some(Pump::start(
            steps,
            self.devices.clone(),
            self.config.collect_statistics,
        )?);
        Ok(())
    }

    fn digest_geometry(&mut self, frame: &Frame) -> Result<(), ModuleError> {
        if self.geometry.is_some() {
            return Err(ModuleError::GeometryAlreadyConfigured);
        }
        let geometry = frame
            .geometry
            .clone()
            .ok_or_else(|| ModuleError::Config("geometry frame carries no geometry".into()))?;
        let devices = self
            .factories
            .iter()
            .map(|factory| factory.create(&geometry, &self.medium))
            .collect::<Result<Vec<_>, _>>()?;
        let sizes = negotiate_bunch_sizes(&devices)?;

        let random = self
            .random
            .take()
            .ok_or(ModuleError::GeometryAlreadyConfigured)?;
        let mut generator = StepGenerator::new(self.config.step.clone(), random)?;
        generator.set_bunch_size_granularity(sizes.granularity)?;
        generator.set_max_bunch_size(sizes.max_bunch_size)?;
        generator.set_medium_properties(self.medium.clone())?;
        generator.initialize()?;

        info!(
            "geometry with {} modules, {} device(s), bunch granularity {}, max bunch size {}",
            geometry.len(),
            devices.len(),
            sizes.granularity,
            sizes.max_bunch_size
        );

        self.steps = Some(Arc::new(StepQueue::new(generator)?));
        self.devices = devices;
        self.bunch_sizes = Some(sizes);
        self.geometry = Some(geometry);
        Ok(())
    }
}
