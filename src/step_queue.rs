//! Thread-safe, blocking front end of the [`StepGenerator`].
//!
//! The caller thread enqueues light sources and barriers; the pump thread
//! blocks in [`StepQueue::next_bunch`] until a job is available or it is
//! interrupted.

use parking_lot::{Condvar, Mutex};

use crate::device::Step;
use crate::interrupt::Interrupt;
use crate::particle::LightSource;
use crate::step_generator::{StepError, StepGenerator};

/// Step generator shared between the caller and the pump thread.
pub struct StepQueue {
    generator: Mutex<StepGenerator>,
    available: Condvar,
}

impl StepQueue {
    /// Wrap an initialized generator.
    pub fn new(generator: StepGenerator) -> Result<Self, StepError> {
        if !generator.is_initialized() {
            return Err(StepError::NotInitialized);
        }
        Ok(Self {
            generator: Mutex::new(generator),
            available: Condvar::new(),
        })
    }

    /// Enqueue a light source and wake the consumer.
    pub fn enqueue_light_source(
        &self,
        source: &LightSource,
        identifier: u32,
    ) -> Result<(), StepError> {
        self.generator
            .lock()
            .enqueue_light_source(source, identifier)?;
        self.available.notify_all();
        Ok(())
    }

    /// Enqueue a barrier and wake the consumer.
    pub fn enqueue_barrier(&self) -> Result<(), StepError> {
        self.generator.lock().enqueue_barrier()?;
        self.available.notify_all();
        Ok(())
    }

    /// True while a barrier is pending
    pub fn barrier_active(&self) -> bool {
        self.generator.lock().barrier_active()
    }

    /// True if queued jobs remain
    pub fn more_steps_available(&self) -> bool {
        self.generator.lock().more_steps_available()
    }

    /// Photons queued but not yet converted into steps
    pub fn queued_photons(&self) -> u64 {
        self.generator.lock().queued_photons()
    }

    /// Block until a job is available, then convert one bunch from it.
    ///
    /// The bunch is converted with the generator lock held, since conversion
    /// draws from the generator's random service. A concurrent
    /// [`enqueue_light_source`](Self::enqueue_light_source) waits for at most
    /// one bunch, so the maximum bunch size bounds how long the caller can
    /// stall.
    ///
    /// Returns [`StepError::Interrupted`] if `interrupt` is raised while
    /// waiting.
    pub fn next_bunch(&self, interrupt: &Interrupt) -> Result<(Vec<Step>, bool), StepError> {
        let mut generator = self.generator.lock();
        loop {
            if interrupt.is_raised() {
                return Err(StepError::Interrupted);
            }
            if generator.more_steps_available() {
                return generator.conversion_result_with_barrier_info();
            }
            self.available.wait(&mut generator);
        }
    }

    /// Wake every waiter so it re-checks its interrupt.
    ///
    /// The lock is taken first so a waiter between its interrupt check and
    /// its wait cannot miss the notification.
    pub fn wake_all(&self) {
        let _guard = self.generator.lock();
        self.available.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::medium::MediumProperties;
    use crate::particle::{Particle, ParticleType};
    use crate::random::StdRandomService;
    use crate::step_generator::StepGeneratorConfig;
    use glam::DVec3;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn queue() -> StepQueue {
        let mut g = StepGenerator::new(
            StepGeneratorConfig::default(),
            Box::new(StdRandomService::new(1)),
        )
        .unwrap();
        g.set_medium_properties(MediumProperties::uniform(250.0, 0.92).unwrap())
            .unwrap();
        g.initialize().unwrap();
        StepQueue::new(g).unwrap()
    }

    #[test]
    fn test_requires_initialized_generator() {
        let g = StepGenerator::new(
            StepGeneratorConfig::default(),
            Box::new(StdRandomService::new(1)),
        )
        .unwrap();
        assert!(matches!(StepQueue::new(g), Err(StepError::NotInitialized)));
    }

    #[test]
    fn test_next_bunch_waits_for_work() {
        let q = Arc::new(queue());
        let interrupt = Interrupt::new();

        let consumer = {
            let q = Arc::clone(&q);
            let interrupt = interrupt.clone();
            thread::spawn(move || q.next_bunch(&interrupt))
        };

        thread::sleep(Duration::from_millis(20));
        q.enqueue_barrier().unwrap();

        let (steps, reset) = consumer.join().unwrap().unwrap();
        assert!(steps.is_empty());
        assert!(reset);
        assert!(!q.barrier_active());
    }

    #[test]
    fn test_interrupt_releases_waiter() {
        let q = Arc::new(queue());
        let interrupt = Interrupt::new();

        let consumer = {
            let q = Arc::clone(&q);
            let interrupt = interrupt.clone();
            thread::spawn(move || q.next_bunch(&interrupt))
        };

        thread::sleep(Duration::from_millis(20));
        interrupt.raise();
        q.wake_all();

        assert!(matches!(
            consumer.join().unwrap(),
            Err(StepError::Interrupted)
        ));
    }

    #[test]
    fn test_enqueue_interleaves_with_conversion() {
        let q = Arc::new(queue());
        let interrupt = Interrupt::new();

        let consumer = {
            let q = Arc::clone(&q);
            let interrupt = interrupt.clone();
            thread::spawn(move || {
                let mut bunches = 0usize;
                let mut steps = 0usize;
                loop {
                    let (bunch, reset) = q.next_bunch(&interrupt).unwrap();
                    bunches += 1;
                    steps += bunch.iter().filter(|s| !s.is_dummy()).count();
                    if reset {
                        return (bunches, steps);
                    }
                }
            })
        };

        let e = LightSource::Particle(Particle::new(
            ParticleType::EMinus,
            DVec3::ZERO,
            DVec3::Z,
            0.0,
            0.1,
        ));
        for id in 1..=50 {
            q.enqueue_light_source(&e, id).unwrap();
        }
        q.enqueue_barrier().unwrap();

        let (bunches, steps) = consumer.join().unwrap();
        assert!(bunches >= 1);
        assert!(steps > 0);
        assert!(!q.more_steps_available());
        assert!(!q.barrier_active());
    }

    #[test]
    fn test_enqueue_after_barrier_rejected() {
        let q = queue();
        let e = LightSource::Particle(Particle::new(
            ParticleType::EMinus,
            DVec3::ZERO,
            DVec3::Z,
            0.0,
            0.1,
        ));
        q.enqueue_light_source(&e, 1).unwrap();
        q.enqueue_barrier().unwrap();
        assert!(matches!(
            q.enqueue_light_source(&e, 2),
            Err(StepError::BarrierActive)
        ));
    }
}
