//! Conversion of light sources into photon emission steps.
//!
//! Each enqueued particle (or flasher pulse) is turned into one or more
//! *jobs*: a photon budget drawn from the light-yield parameterization,
//! split into fixed-size steps, plus the shape information needed to place
//! each step. Jobs are converted lazily; every call to
//! [`StepGenerator::conversion_result_with_barrier_info`] emits at most one
//! bunch of `max_bunch_size` steps from the front job.
//!
//! # Barrier protocol
//!
//! [`StepGenerator::enqueue_barrier`] appends a marker behind all queued
//! jobs. While it is pending no new light source may be enqueued. Once every
//! job in front of it has been converted, the next pull returns an empty
//! bunch with the "barrier was reset" flag set and the generator accepts
//! work again.

use std::collections::VecDeque;

use glam::DVec3;
use log::{debug, error, trace, warn};
use thiserror::Error;

use crate::device::Step;
use crate::medium::MediumProperties;
use crate::parameterization::{
    em_track_length_per_gev, hadron_light_ratio, muon_extra_light, radiation_length,
    CASCADE_STEP_LENGTH, DEFAULT_MUON_LENGTH, EM_PROFILE_A0, EM_PROFILE_A1, EM_PROFILE_B_DIVISOR,
    GAUSSIAN_APPROXIMATION_THRESHOLD, HADRON_PROFILE_A0, HADRON_PROFILE_A1,
    HADRON_PROFILE_B_DIVISOR, SPEED_OF_LIGHT,
};
use crate::particle::{FlasherPulse, LightSource, Particle, ParticleClass, ParticleType};
use crate::random::RandomService;
use crate::sampling::{cascade_emission_cos, gamma_distributed, scatter_direction};

/// Default upper limit on the number of steps per bunch
pub const DEFAULT_MAX_BUNCH_SIZE: usize = 512_000;

/// Errors from step generation and the step queue
#[derive(Debug, Error)]
pub enum StepError {
    /// A configuration setter was called after [`StepGenerator::initialize`]
    #[error("step generator is already initialized")]
    AlreadyInitialized,

    /// The generator was used before [`StepGenerator::initialize`]
    #[error("step generator is not initialized")]
    NotInitialized,

    /// Invalid configuration value
    #[error("invalid step generator configuration: {0}")]
    InvalidConfig(String),

    /// A light source was enqueued while a barrier is pending
    #[error("a barrier is enqueued; all steps must be received before enqueuing a new light source")]
    BarrierActive,

    /// A second barrier was enqueued while one is pending
    #[error("a barrier is already enqueued")]
    BarrierAlreadyEnqueued,

    /// Steps were requested but nothing is enqueued
    #[error("no light source is enqueued")]
    QueueEmpty,

    /// The particle type has no light-yield model
    #[error("cannot generate steps for a {0:?}")]
    UnsupportedParticle(ParticleType),

    /// The drawn photon count does not fit the photon counter
    #[error("too many photons for the step counter (mean {mean})")]
    TooManyPhotons {
        /// Mean the count was drawn around
        mean: f64,
    },

    /// A blocking wait for steps was interrupted
    #[error("interrupted while waiting for steps")]
    Interrupted,
}

/// Photons-per-step settings of the step generator.
#[derive(Debug, Clone, PartialEq)]
pub struct StepGeneratorConfig {
    /// Photons carried by each full step (must be > 0)
    pub photons_per_step: u32,
    /// Photons per step for very bright sources; 0 means "same as `photons_per_step`"
    pub high_photons_per_step: u32,
    /// Total photon count of a job above which `high_photons_per_step` is used
    pub use_high_photons_per_step_from: f64,
}

impl Default for StepGeneratorConfig {
    fn default() -> Self {
        Self {
            photons_per_step: 200,
            high_photons_per_step: 0,
            use_high_photons_per_step_from: 1e9,
        }
    }
}

impl StepGeneratorConfig {
    /// Check the settings for consistency.
    pub fn validate(&self) -> Result<(), StepError> {
        if self.photons_per_step == 0 {
            return Err(StepError::InvalidConfig(
                "photons_per_step must be greater than zero".to_string(),
            ));
        }
        if self.high_photons_per_step != 0 && self.high_photons_per_step < self.photons_per_step {
            return Err(StepError::InvalidConfig(format!(
                "high_photons_per_step ({}) must not be smaller than photons_per_step ({})",
                self.high_photons_per_step, self.photons_per_step
            )));
        }
        if !(self.use_high_photons_per_step_from > 0.0) {
            return Err(StepError::InvalidConfig(
                "use_high_photons_per_step_from must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// `high_photons_per_step` with the 0 default resolved
    pub fn effective_high_photons_per_step(&self) -> u32 {
        if self.high_photons_per_step == 0 {
            self.photons_per_step
        } else {
            self.high_photons_per_step
        }
    }

    /// Photons per step to use for a job with `total` photons
    pub fn photons_per_step_for(&self, total: u64) -> u32 {
        if total as f64 > self.use_high_photons_per_step_from {
            self.effective_high_photons_per_step()
        } else {
            self.photons_per_step
        }
    }
}

/// Photon budget of a job: `remaining_steps` full steps plus one shorter
/// trailing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepBudget {
    /// Photons in each full step
    pub photons_per_step: u32,
    /// Full steps not yet emitted
    pub remaining_steps: u64,
    /// Photons in the trailing step (0 if there is none)
    pub photons_in_last_step: u32,
}

/// Steps to emit for one pull of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepChunk {
    /// Photons in each full step
    pub photons_per_step: u32,
    /// Number of full steps
    pub full_steps: u64,
    /// Trailing short step, if it is emitted in this chunk
    pub last_step: Option<u32>,
    /// True once the job has nothing left to emit
    pub drained: bool,
}

impl StepBudget {
    /// Split `total` photons into steps of `photons_per_step`.
    pub fn split(total: u64, photons_per_step: u32) -> Self {
        let per_step = u64::from(photons_per_step.max(1));
        Self {
            photons_per_step: per_step as u32,
            remaining_steps: total / per_step,
            photons_in_last_step: (total % per_step) as u32,
        }
    }

    /// Photons not yet emitted
    pub fn total_photons(&self) -> u64 {
        self.remaining_steps * u64::from(self.photons_per_step)
            + u64::from(self.photons_in_last_step)
    }

    /// Steps not yet emitted, including the trailing step
    pub fn num_steps(&self) -> u64 {
        self.remaining_steps + u64::from(self.photons_in_last_step > 0)
    }

    /// Take up to `max_steps` full steps.
    ///
    /// The trailing step is only emitted once all full steps are gone and the
    /// chunk still has room for it; only then is the budget drained.
    pub fn take(&mut self, max_steps: u64) -> StepChunk {
        let full_steps = self.remaining_steps.min(max_steps);
        self.remaining_steps -= full_steps;

        let drained = self.remaining_steps == 0 && full_steps < max_steps;
        let last_step = if drained && self.photons_in_last_step > 0 {
            let n = self.photons_in_last_step;
            self.photons_in_last_step = 0;
            Some(n)
        } else {
            None
        };

        StepChunk {
            photons_per_step: self.photons_per_step,
            full_steps,
            last_step,
            drained,
        }
    }
}

/// Where and when a job's light is emitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmissionOrigin {
    /// Identifier stamped on every step
    pub identifier: u32,
    /// Vertex [m]
    pub pos: DVec3,
    /// Unit axis direction
    pub dir: DVec3,
    /// Vertex time [ns]
    pub time: f64,
}

impl EmissionOrigin {
    fn from_particle(particle: &Particle, identifier: u32) -> Self {
        Self {
            identifier,
            pos: particle.pos,
            dir: particle.dir,
            time: particle.time,
        }
    }
}

/// Entry of the step generation queue.
#[derive(Debug, Clone, PartialEq)]
pub enum StepJob {
    /// Point-like cascade with a gamma-distributed longitudinal profile
    Cascade {
        /// Emission origin
        origin: EmissionOrigin,
        /// Remaining photons
        budget: StepBudget,
        /// Profile shape `a`
        profile_shape: f64,
        /// Profile scale `b` [m]
        profile_scale: f64,
    },
    /// One light population of a muon track
    Muon {
        /// Emission origin
        origin: EmissionOrigin,
        /// Remaining photons
        budget: StepBudget,
        /// Track length [m]
        length: f64,
        /// Stochastic-loss light placed uniformly along the track
        cascade_like: bool,
    },
    /// Flasher LED pulse
    Flasher {
        /// Emission origin
        origin: EmissionOrigin,
        /// Remaining photons
        budget: StepBudget,
        /// Emission times are uniform over this width [ns]
        pulse_width: f64,
    },
    /// Marker: everything before it must be converted first
    Barrier,
}

impl StepJob {
    fn budget(&self) -> Option<&StepBudget> {
        match self {
            StepJob::Cascade { budget, .. }
            | StepJob::Muon { budget, .. }
            | StepJob::Flasher { budget, .. } => Some(budget),
            StepJob::Barrier => None,
        }
    }

    fn budget_mut(&mut self) -> Option<&mut StepBudget> {
        match self {
            StepJob::Cascade { budget, .. }
            | StepJob::Muon { budget, .. }
            | StepJob::Flasher { budget, .. } => Some(budget),
            StepJob::Barrier => None,
        }
    }

    /// Append up to `max_steps` steps to `out`; returns true if the job is drained.
    fn make_steps(
        &mut self,
        max_steps: u64,
        rng: &mut dyn RandomService,
        out: &mut Vec<Step>,
    ) -> bool {
        let chunk = match self.budget_mut() {
            Some(budget) => budget.take(max_steps),
            None => return true,
        };
        for _ in 0..chunk.full_steps {
            out.push(self.make_step(chunk.photons_per_step, rng));
        }
        if let Some(n) = chunk.last_step {
            out.push(self.make_step(n, rng));
        }
        chunk.drained
    }

    fn make_step(&self, photons: u32, rng: &mut dyn RandomService) -> Step {
        match *self {
            StepJob::Cascade {
                origin,
                profile_shape,
                profile_scale,
                ..
            } => {
                let along = profile_scale * gamma_distributed(profile_shape, rng);
                cascade_step(&origin, photons, along, rng)
            }
            StepJob::Muon {
                origin,
                length,
                cascade_like: true,
                ..
            } => {
                let along = rng.uniform() * length;
                cascade_step(&origin, photons, along, rng)
            }
            StepJob::Muon {
                origin,
                length,
                cascade_like: false,
                ..
            } => Step::new(
                origin.pos,
                origin.dir,
                origin.time,
                length,
                photons,
                origin.identifier,
            ),
            StepJob::Flasher {
                origin,
                pulse_width,
                ..
            } => {
                let time = origin.time + rng.uniform() * pulse_width;
                Step::new(origin.pos, origin.dir, time, 0.0, photons, origin.identifier)
            }
            StepJob::Barrier => Step::dummy(),
        }
    }
}

/// A short cascade step `along` metres down the axis, with its direction
/// smeared by the cascade angular profile.
fn cascade_step(
    origin: &EmissionOrigin,
    photons: u32,
    along: f64,
    rng: &mut dyn RandomService,
) -> Step {
    let pos = origin.pos + origin.dir * along;
    let time = origin.time + along / SPEED_OF_LIGHT;
    let cos = cascade_emission_cos(rng);
    let dir = scatter_direction(origin.dir, cos, rng);
    Step::new(pos, dir, time, CASCADE_STEP_LENGTH, photons, origin.identifier).with_offset(along)
}

/// Queue of step generation jobs with lazy conversion into step bunches.
pub struct StepGenerator {
    config: StepGeneratorConfig,
    random: Box<dyn RandomService>,
    medium: Option<MediumProperties>,
    bunch_size_granularity: usize,
    max_bunch_size: usize,
    initialized: bool,
    barrier_enqueued: bool,
    queue: VecDeque<StepJob>,
}

impl StepGenerator {
    /// Create an uninitialized generator.
    pub fn new(
        config: StepGeneratorConfig,
        random: Box<dyn RandomService>,
    ) -> Result<Self, StepError> {
        config.validate()?;
        Ok(Self {
            config,
            random,
            medium: None,
            bunch_size_granularity: 1,
            max_bunch_size: DEFAULT_MAX_BUNCH_SIZE,
            initialized: false,
            barrier_enqueued: false,
            queue: VecDeque::new(),
        })
    }

    /// Photons-per-step settings
    pub fn config(&self) -> &StepGeneratorConfig {
        &self.config
    }

    /// Bunches are padded with dummy steps to a multiple of this.
    pub fn set_bunch_size_granularity(&mut self, granularity: usize) -> Result<(), StepError> {
        self.check_not_initialized()?;
        if granularity == 0 {
            return Err(StepError::InvalidConfig(
                "bunch size granularity of 0 is invalid".to_string(),
            ));
        }
        self.bunch_size_granularity = granularity;
        Ok(())
    }

    /// Upper limit on steps per bunch.
    pub fn set_max_bunch_size(&mut self, max_bunch_size: usize) -> Result<(), StepError> {
        self.check_not_initialized()?;
        if max_bunch_size == 0 {
            return Err(StepError::InvalidConfig(
                "max bunch size of 0 is invalid".to_string(),
            ));
        }
        self.max_bunch_size = max_bunch_size;
        Ok(())
    }

    /// Medium used for photon yields and the radiation length.
    pub fn set_medium_properties(&mut self, medium: MediumProperties) -> Result<(), StepError> {
        self.check_not_initialized()?;
        self.medium = Some(medium);
        Ok(())
    }

    /// Freeze the configuration. Enqueueing is only possible afterwards.
    pub fn initialize(&mut self) -> Result<(), StepError> {
        self.check_not_initialized()?;
        let medium = self.medium.as_ref().ok_or_else(|| {
            StepError::InvalidConfig("medium properties not set".to_string())
        })?;
        if self.bunch_size_granularity > self.max_bunch_size {
            return Err(StepError::InvalidConfig(format!(
                "bunch size granularity {} is greater than max bunch size {}",
                self.bunch_size_granularity, self.max_bunch_size
            )));
        }
        if self.max_bunch_size % self.bunch_size_granularity != 0 {
            return Err(StepError::InvalidConfig(format!(
                "max bunch size {} is not a multiple of the granularity {}",
                self.max_bunch_size, self.bunch_size_granularity
            )));
        }
        debug!(
            "medium: {} layer(s), density {} g/cm³",
            medium.num_layers(),
            medium.density()
        );
        debug!(
            "step generator initialized: {} photons/step (high: {} above {:e} photons), granularity {}, max bunch size {}",
            self.config.photons_per_step,
            self.config.effective_high_photons_per_step(),
            self.config.use_high_photons_per_step_from,
            self.bunch_size_granularity,
            self.max_bunch_size
        );
        self.initialized = true;
        Ok(())
    }

    /// True after [`initialize`](Self::initialize)
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Current bunch size granularity
    pub fn bunch_size_granularity(&self) -> usize {
        self.bunch_size_granularity
    }

    /// Current max bunch size
    pub fn max_bunch_size(&self) -> usize {
        self.max_bunch_size
    }

    /// Enqueue any light source.
    pub fn enqueue_light_source(
        &mut self,
        source: &LightSource,
        identifier: u32,
    ) -> Result<(), StepError> {
        match source {
            LightSource::Particle(p) => self.enqueue_particle(p, identifier),
            LightSource::Flasher(f) => self.enqueue_flasher(f, identifier),
        }
    }

    /// Draw the photon budget of a particle and queue its jobs.
    ///
    /// Cascades produce one job, muons two (bare-muon light and
    /// stochastic-loss light).
    pub fn enqueue_particle(&mut self, particle: &Particle, identifier: u32) -> Result<(), StepError> {
        self.check_accepting()?;
        let class = particle
            .kind
            .class()
            .ok_or(StepError::UnsupportedParticle(particle.kind))?;
        let (photons_per_meter, density) = {
            let medium = self.medium.as_ref().ok_or(StepError::NotInitialized)?;
            (medium.photons_per_meter_at(particle.pos.z), medium.density())
        };
        let energy = particle.energy;
        let log_e = energy.ln();
        let origin = EmissionOrigin::from_particle(particle, identifier);
        trace!(
            "density={} g/cm³, {} photons/m at z={}",
            density,
            photons_per_meter,
            particle.pos.z
        );

        match class {
            ParticleClass::Electromagnetic => {
                let profile_shape = EM_PROFILE_A0 + EM_PROFILE_A1 * log_e;
                let profile_scale = radiation_length(density) / EM_PROFILE_B_DIVISOR;
                let mean = photons_per_meter * em_track_length_per_gev(density) * energy;
                let photons = self.draw_photon_count(mean, "electromagnetic")?;
                let budget = StepBudget::split(photons, self.config.photons_per_step_for(photons));
                trace!(
                    "{} steps for E={} GeV (electromagnetic)",
                    budget.num_steps(),
                    energy
                );
                self.queue.push_back(StepJob::Cascade {
                    origin,
                    budget,
                    profile_shape,
                    profile_scale,
                });
            }
            ParticleClass::Hadronic => {
                let profile_shape = HADRON_PROFILE_A0 + HADRON_PROFILE_A1 * log_e;
                let profile_scale = radiation_length(density) / HADRON_PROFILE_B_DIVISOR;
                let (ratio, spread) = hadron_light_ratio(energy);
                let fraction = loop {
                    let f = ratio + spread * self.random.gaussian(0.0, 1.0);
                    if (0.0..=1.0).contains(&f) {
                        break f;
                    }
                };
                let mean = photons_per_meter * fraction * em_track_length_per_gev(density) * energy;
                let photons = self.draw_photon_count(mean, "hadron")?;
                let budget = StepBudget::split(photons, self.config.photons_per_step_for(photons));
                trace!("{} steps for E={} GeV (hadron)", budget.num_steps(), energy);
                self.queue.push_back(StepJob::Cascade {
                    origin,
                    budget,
                    profile_shape,
                    profile_scale,
                });
            }
            ParticleClass::Muon => {
                let length = match particle.length {
                    Some(l) if !l.is_nan() => l,
                    _ => {
                        warn!(
                            "muon without length found, assigned a length of {} m",
                            DEFAULT_MUON_LENGTH
                        );
                        DEFAULT_MUON_LENGTH
                    }
                };
                trace!(
                    "parameterizing muon ({}/{}) with E={} GeV, length={} m",
                    particle.major_id,
                    particle.minor_id,
                    energy,
                    length
                );
                let extra = muon_extra_light(energy);
                let muon_fraction = 1.0 / extra;
                let mean_total = photons_per_meter * length * extra;
                let from_muon = self.draw_photon_count(mean_total * muon_fraction, "muon-like")?;
                let from_losses = self
                    .draw_photon_count(mean_total * (1.0 - muon_fraction), "cascade-like")?;

                let muon_budget =
                    StepBudget::split(from_muon, self.config.photons_per_step_for(from_muon));
                let loss_budget =
                    StepBudget::split(from_losses, self.config.photons_per_step_for(from_losses));
                trace!(
                    "{} muon-like and {} cascade-like steps for E={} GeV, l={} m",
                    muon_budget.num_steps(),
                    loss_budget.num_steps(),
                    energy,
                    length
                );
                self.queue.push_back(StepJob::Muon {
                    origin,
                    budget: muon_budget,
                    length,
                    cascade_like: false,
                });
                self.queue.push_back(StepJob::Muon {
                    origin,
                    budget: loss_budget,
                    length,
                    cascade_like: true,
                });
            }
        }
        Ok(())
    }

    /// Draw the photon budget of a flasher pulse and queue its job.
    pub fn enqueue_flasher(&mut self, pulse: &FlasherPulse, identifier: u32) -> Result<(), StepError> {
        self.check_accepting()?;
        let photons = self.draw_photon_count(pulse.number_of_photons_no_bias, "flasher")?;
        let budget = StepBudget::split(photons, self.config.photons_per_step_for(photons));
        trace!("{} steps for flasher pulse", budget.num_steps());
        self.queue.push_back(StepJob::Flasher {
            origin: EmissionOrigin {
                identifier,
                pos: pulse.pos,
                dir: pulse.dir.normalize_or_zero(),
                time: pulse.time,
            },
            budget,
            pulse_width: pulse.pulse_width,
        });
        Ok(())
    }

    /// Append a barrier behind all queued jobs.
    pub fn enqueue_barrier(&mut self) -> Result<(), StepError> {
        self.check_initialized()?;
        if self.barrier_enqueued {
            return Err(StepError::BarrierAlreadyEnqueued);
        }
        self.queue.push_back(StepJob::Barrier);
        self.barrier_enqueued = true;
        Ok(())
    }

    /// True while a barrier is pending
    pub fn barrier_active(&self) -> bool {
        self.barrier_enqueued
    }

    /// True if a pull would return something
    pub fn more_steps_available(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Number of queued jobs, barrier included
    pub fn queued_jobs(&self) -> usize {
        self.queue.len()
    }

    /// Photons in queued jobs not yet converted into steps
    pub fn queued_photons(&self) -> u64 {
        self.queue
            .iter()
            .filter_map(StepJob::budget)
            .map(StepBudget::total_photons)
            .sum()
    }

    /// Convert the front job into at most `max_bunch_size` steps.
    ///
    /// Returns the bunch and whether a barrier was just reset. A reached
    /// barrier yields an empty bunch. A job whose last pull produced no steps
    /// also yields an empty bunch; callers skip those.
    pub fn conversion_result_with_barrier_info(&mut self) -> Result<(Vec<Step>, bool), StepError> {
        self.check_initialized()?;
        match self.queue.front() {
            None => return Err(StepError::QueueEmpty),
            Some(StepJob::Barrier) => {
                self.queue.pop_front();
                if !self.barrier_enqueued {
                    error!("barrier reached, but the barrier flag was not set");
                }
                self.barrier_enqueued = false;
                return Ok((Vec::new(), true));
            }
            Some(_) => {}
        }

        let mut steps = Vec::new();
        let random = self.random.as_mut();
        let drained = match self.queue.front_mut() {
            Some(job) => job.make_steps(self.max_bunch_size as u64, random, &mut steps),
            None => return Err(StepError::QueueEmpty),
        };
        if drained {
            self.queue.pop_front();
        }
        self.pad_to_granularity(&mut steps);
        Ok((steps, false))
    }

    fn pad_to_granularity(&self, steps: &mut Vec<Step>) {
        let granularity = self.bunch_size_granularity;
        if granularity <= 1 || steps.is_empty() {
            return;
        }
        let rem = steps.len() % granularity;
        if rem != 0 {
            steps.resize(steps.len() + granularity - rem, Step::dummy());
        }
    }

    fn draw_photon_count(&mut self, mean: f64, what: &str) -> Result<u64, StepError> {
        if mean.is_infinite() {
            return Err(StepError::TooManyPhotons { mean });
        }
        if mean > GAUSSIAN_APPROXIMATION_THRESHOLD {
            debug!(
                "huge event ({}): mean number of photons {}, approximating Poisson by Gaussian",
                what, mean
            );
            let sigma = mean.sqrt();
            let photons = loop {
                let n = self.random.gaussian(mean, sigma);
                if n >= 0.0 {
                    break n;
                }
            };
            if photons > u64::MAX as f64 {
                return Err(StepError::TooManyPhotons { mean });
            }
            return Ok(photons as u64);
        }
        Ok(self.random.poisson(mean))
    }

    fn check_not_initialized(&self) -> Result<(), StepError> {
        if self.initialized {
            Err(StepError::AlreadyInitialized)
        } else {
            Ok(())
        }
    }

    fn check_initialized(&self) -> Result<(), StepError> {
        if self.initialized {
            Ok(())
        } else {
            Err(StepError::NotInitialized)
        }
    }

    fn check_accepting(&self) -> Result<(), StepError> {
        self.check_initialized()?;
        if self.barrier_enqueued {
            return Err(StepError::BarrierActive);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameterization::REFERENCE_DENSITY;

    /// Poisson draws return a fixed count, Gaussians their mean, uniforms 0.5.
    struct FixedRandom {
        poisson: u64,
    }

    impl RandomService for FixedRandom {
        fn uniform(&mut self) -> f64 {
            0.5
        }
        fn gaussian(&mut self, mean: f64, _sigma: f64) -> f64 {
            mean
        }
        fn poisson(&mut self, _mean: f64) -> u64 {
            self.poisson
        }
    }

    fn generator(photons: u64, config: StepGeneratorConfig) -> StepGenerator {
        let mut g = StepGenerator::new(config, Box::new(FixedRandom { poisson: photons })).unwrap();
        g.set_medium_properties(MediumProperties::uniform(250.0, REFERENCE_DENSITY).unwrap())
            .unwrap();
        g
    }

    fn small_steps(photons: u64) -> StepGenerator {
        let mut g = generator(
            photons,
            StepGeneratorConfig {
                photons_per_step: 20,
                ..Default::default()
            },
        );
        g.initialize().unwrap();
        g
    }

    fn electron(energy: f64) -> Particle {
        Particle::new(ParticleType::EMinus, DVec3::ZERO, DVec3::Z, 0.0, energy)
    }

    fn muon(length: Option<f64>) -> Particle {
        let p = Particle::new(ParticleType::MuMinus, DVec3::ZERO, DVec3::X, 10.0, 100.0);
        match length {
            Some(l) => p.with_length(l),
            None => p,
        }
    }

    /// Pull until the front job is gone, concatenating bunches.
    fn drain(g: &mut StepGenerator) -> Vec<Vec<Step>> {
        let mut bunches = Vec::new();
        while g.more_steps_available() {
            let (steps, reset) = g.conversion_result_with_barrier_info().unwrap();
            if reset {
                break;
            }
            bunches.push(steps);
        }
        bunches
    }

    #[test]
    fn test_config_validation() {
        assert!(StepGeneratorConfig::default().validate().is_ok());
        let zero = StepGeneratorConfig {
            photons_per_step: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
        let low_high = StepGeneratorConfig {
            photons_per_step: 200,
            high_photons_per_step: 100,
            ..Default::default()
        };
        assert!(low_high.validate().is_err());
        let bad_threshold = StepGeneratorConfig {
            use_high_photons_per_step_from: 0.0,
            ..Default::default()
        };
        assert!(bad_threshold.validate().is_err());
    }

    #[test]
    fn test_high_photons_per_step_selection() {
        let config = StepGeneratorConfig {
            photons_per_step: 20,
            high_photons_per_step: 50,
            use_high_photons_per_step_from: 100.0,
        };
        assert_eq!(config.photons_per_step_for(100), 20);
        assert_eq!(config.photons_per_step_for(101), 50);
        assert_eq!(StepGeneratorConfig::default().effective_high_photons_per_step(), 200);
    }

    #[test]
    fn test_budget_split() {
        let b = StepBudget::split(50, 20);
        assert_eq!(b.remaining_steps, 2);
        assert_eq!(b.photons_in_last_step, 10);
        assert_eq!(b.total_photons(), 50);
        assert_eq!(b.num_steps(), 3);

        let exact = StepBudget::split(40, 20);
        assert_eq!(exact.num_steps(), 2);
        assert_eq!(StepBudget::split(0, 20).num_steps(), 0);
    }

    #[test]
    fn test_budget_take_in_chunks() {
        let mut b = StepBudget::split(50, 20);
        let first = b.take(1);
        assert_eq!((first.full_steps, first.last_step, first.drained), (1, None, false));
        let second = b.take(1);
        assert_eq!((second.full_steps, second.last_step, second.drained), (1, None, false));
        let third = b.take(1);
        assert_eq!((third.full_steps, third.last_step, third.drained), (0, Some(10), true));
    }

    #[test]
    fn test_budget_exact_fill_needs_extra_pull() {
        // Two full steps exactly fill a chunk of two: not drained yet
        let mut b = StepBudget::split(40, 20);
        let first = b.take(2);
        assert_eq!((first.full_steps, first.drained), (2, false));
        let second = b.take(2);
        assert_eq!((second.full_steps, second.last_step, second.drained), (0, None, true));
    }

    #[test]
    fn test_setters_after_initialize_fail() {
        let mut g = small_steps(0);
        assert!(matches!(g.set_max_bunch_size(10), Err(StepError::AlreadyInitialized)));
        assert!(matches!(
            g.set_bunch_size_granularity(2),
            Err(StepError::AlreadyInitialized)
        ));
        assert!(matches!(g.initialize(), Err(StepError::AlreadyInitialized)));
    }

    #[test]
    fn test_use_before_initialize_fails() {
        let mut g = generator(10, StepGeneratorConfig::default());
        assert!(matches!(
            g.enqueue_particle(&electron(1.0), 1),
            Err(StepError::NotInitialized)
        ));
        assert!(matches!(g.enqueue_barrier(), Err(StepError::NotInitialized)));
    }

    #[test]
    fn test_initialize_checks_bunch_sizes() {
        let mut g = generator(10, StepGeneratorConfig::default());
        g.set_bunch_size_granularity(64).unwrap();
        g.set_max_bunch_size(100).unwrap();
        assert!(matches!(g.initialize(), Err(StepError::InvalidConfig(_))));

        let mut g = generator(10, StepGeneratorConfig::default());
        g.set_bunch_size_granularity(64).unwrap();
        g.set_max_bunch_size(32).unwrap();
        assert!(matches!(g.initialize(), Err(StepError::InvalidConfig(_))));

        let mut g = StepGenerator::new(
            StepGeneratorConfig::default(),
            Box::new(FixedRandom { poisson: 0 }),
        )
        .unwrap();
        assert!(matches!(g.initialize(), Err(StepError::InvalidConfig(_))));
    }

    #[test]
    fn test_barrier_protocol() {
        let mut g = small_steps(30);
        g.enqueue_particle(&electron(1.0), 1).unwrap();
        g.enqueue_barrier().unwrap();
        assert!(g.barrier_active());
        assert!(matches!(
            g.enqueue_particle(&electron(1.0), 2),
            Err(StepError::BarrierActive)
        ));
        assert!(matches!(
            g.enqueue_barrier(),
            Err(StepError::BarrierAlreadyEnqueued)
        ));

        let (steps, reset) = g.conversion_result_with_barrier_info().unwrap();
        assert_eq!(steps.len(), 2);
        assert!(!reset);
        assert!(g.barrier_active());

        let (steps, reset) = g.conversion_result_with_barrier_info().unwrap();
        assert!(steps.is_empty());
        assert!(reset);
        assert!(!g.barrier_active());
        assert!(!g.more_steps_available());

        g.enqueue_particle(&electron(1.0), 3).unwrap();
    }

    #[test]
    fn test_empty_queue_is_an_error() {
        let mut g = small_steps(0);
        assert!(matches!(
            g.conversion_result_with_barrier_info(),
            Err(StepError::QueueEmpty)
        ));
    }

    #[test]
    fn test_unsupported_particle() {
        let mut g = small_steps(10);
        let nu = Particle::new(ParticleType::NuMu, DVec3::ZERO, DVec3::Z, 0.0, 10.0);
        assert!(matches!(
            g.enqueue_particle(&nu, 1),
            Err(StepError::UnsupportedParticle(ParticleType::NuMu))
        ));
        assert!(!g.more_steps_available());
    }

    #[test]
    fn test_cascade_step_sum_matches_draw() {
        let mut g = small_steps(50);
        g.enqueue_particle(&electron(1.0), 9).unwrap();
        assert_eq!(g.queued_photons(), 50);

        let bunches = drain(&mut g);
        assert_eq!(bunches.len(), 1);
        let counts: Vec<u32> = bunches[0].iter().map(|s| s.num_photons).collect();
        assert_eq!(counts, vec![20, 20, 10]);
        assert!(bunches[0].iter().all(|s| s.identifier == 9));
        assert!(bunches[0].iter().all(|s| (s.length - 0.001).abs() < 1e-9));
    }

    #[test]
    fn test_cascade_step_placement() {
        let mut g = small_steps(20);
        let energy = 10.0;
        g.enqueue_particle(&electron(energy), 1).unwrap();
        let (steps, _) = g.conversion_result_with_barrier_info().unwrap();
        assert_eq!(steps.len(), 1);

        // FixedRandom makes the gamma draw return its mode-like value a - 1/3
        let shape = EM_PROFILE_A0 + EM_PROFILE_A1 * energy.ln();
        let scale = radiation_length(REFERENCE_DENSITY) / EM_PROFILE_B_DIVISOR;
        let along = scale * (shape - 1.0 / 3.0);
        let s = steps[0];
        assert!((s.pos[2] as f64 - along).abs() < 1e-5, "z = {}", s.pos[2]);
        assert!((s.offset as f64 - along).abs() < 1e-5);
        assert!((s.time as f64 - along / SPEED_OF_LIGHT).abs() < 1e-4);
        assert!((s.direction().length() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_hadron_job() {
        let mut g = small_steps(45);
        let pion = Particle::new(ParticleType::PiPlus, DVec3::ZERO, DVec3::Z, 0.0, 50.0);
        g.enqueue_particle(&pion, 4).unwrap();
        let bunches = drain(&mut g);
        let total: u64 = bunches.iter().flatten().map(|s| u64::from(s.num_photons)).sum();
        assert_eq!(total, 45);
    }

    #[test]
    fn test_muon_produces_two_populations() {
        let mut g = small_steps(50);
        g.enqueue_particle(&muon(Some(100.0)), 2).unwrap();
        assert_eq!(g.queued_jobs(), 2);
        assert_eq!(g.queued_photons(), 100);

        let bunches = drain(&mut g);
        assert_eq!(bunches.len(), 2);

        // Muon-like: anchored at the vertex, spanning the whole track
        let muon_like = &bunches[0];
        let counts: Vec<u32> = muon_like.iter().map(|s| s.num_photons).collect();
        assert_eq!(counts, vec![20, 20, 10]);
        for s in muon_like {
            assert_eq!(s.pos, [0.0, 0.0, 0.0]);
            assert_eq!(s.length, 100.0);
            assert_eq!(s.time, 10.0);
        }

        // Cascade-like: same split, placed half-way along the track
        let losses = &bunches[1];
        let counts: Vec<u32> = losses.iter().map(|s| s.num_photons).collect();
        assert_eq!(counts, vec![20, 20, 10]);
        for s in losses {
            assert!((s.pos[0] - 50.0).abs() < 1e-4);
            assert!((s.length - 0.001).abs() < 1e-9);
        }
    }

    #[test]
    fn test_muon_without_length_uses_default() {
        let mut g = small_steps(5);
        g.enqueue_particle(&muon(None), 1).unwrap();
        let (steps, _) = g.conversion_result_with_barrier_info().unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].length as f64, DEFAULT_MUON_LENGTH);

        let mut g = small_steps(5);
        g.enqueue_particle(&muon(Some(f64::NAN)), 1).unwrap();
        let (steps, _) = g.conversion_result_with_barrier_info().unwrap();
        assert_eq!(steps[0].length as f64, DEFAULT_MUON_LENGTH);
    }

    #[test]
    fn test_max_bunch_size_chunks_jobs() {
        let mut g = generator(
            210,
            StepGeneratorConfig {
                photons_per_step: 20,
                ..Default::default()
            },
        );
        g.set_max_bunch_size(3).unwrap();
        g.initialize().unwrap();
        g.enqueue_particle(&electron(1.0), 1).unwrap();

        // 10 full steps + 10 photons
        let sizes: Vec<usize> = drain(&mut g).iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 3, 2]);
    }

    #[test]
    fn test_padding_to_granularity() {
        let mut g = generator(
            50,
            StepGeneratorConfig {
                photons_per_step: 20,
                ..Default::default()
            },
        );
        g.set_bunch_size_granularity(4).unwrap();
        g.set_max_bunch_size(8).unwrap();
        g.initialize().unwrap();
        g.enqueue_particle(&electron(1.0), 1).unwrap();

        let (steps, _) = g.conversion_result_with_barrier_info().unwrap();
        assert_eq!(steps.len(), 4);
        assert_eq!(steps.iter().filter(|s| s.is_dummy()).count(), 1);
        let total: u32 = steps.iter().map(|s| s.num_photons).sum();
        assert_eq!(total, 50);
    }

    #[test]
    fn test_zero_photons_yields_empty_bunch() {
        let mut g = small_steps(0);
        g.enqueue_particle(&electron(1.0), 1).unwrap();
        let (steps, reset) = g.conversion_result_with_barrier_info().unwrap();
        assert!(steps.is_empty());
        assert!(!reset);
        assert!(!g.more_steps_available());
    }

    #[test]
    fn test_huge_event_uses_gaussian() {
        // mean = 250 · 5.21 · 1e5 ≈ 1.3e8 photons, above the Poisson cutoff
        let mut g = small_steps(7);
        g.enqueue_particle(&electron(1e5), 1).unwrap();
        let expected = 250.0 * em_track_length_per_gev(REFERENCE_DENSITY) * 1e5;
        assert_eq!(g.queued_photons(), expected as u64);
    }

    #[test]
    fn test_flasher_steps() {
        let mut g = small_steps(30);
        let pulse = FlasherPulse {
            pos: DVec3::new(1.0, 2.0, 3.0),
            dir: DVec3::X,
            time: 100.0,
            number_of_photons_no_bias: 30.0,
            pulse_width: 10.0,
        };
        g.enqueue_light_source(&LightSource::Flasher(pulse), 5).unwrap();
        let (steps, _) = g.conversion_result_with_barrier_info().unwrap();
        assert_eq!(steps.len(), 2);
        for s in &steps {
            assert_eq!(s.pos, [1.0, 2.0, 3.0]);
            assert_eq!(s.time, 105.0);
            assert_eq!(s.identifier, 5);
        }
    }
}
