use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::Result;
use crate::fill::fill;
use crate::guard::SemaphoreGuard;
use crate::region::RegionLayout;
use crate::schedule::{Flow, Report, Scheduler, StopReason};
use crate::shm::SharedMemory;
use crate::signal::Shutdown;
use crate::sync::NamedSemaphore;

fn open_shared_memory(config: &Config) -> Result<SharedMemory> {
    let options = SharedMemory::options().read(true).write(true);
    match &config.create {
        Some(create) => options
            .mode(create.mode)
            .exclusive(create.exclusive)
            .keep(create.keep)
            .create(&config.name, create.size),
        None => options.open(&config.name),
    }
}

fn open_semaphore(config: &Config, name: &str) -> Result<NamedSemaphore> {
    match &config.create {
        Some(create) => {
            Ok(NamedSemaphore::create(name, create.mode, create.exclusive)?.keep(create.keep))
        }
        None => NamedSemaphore::open(name),
    }
}

/// Acquires all resources, fills the configured region until the schedule
/// stops, and releases everything again.
pub fn run(config: &Config, shutdown: &Shutdown) -> Result<Report> {
    let mut shm = open_shared_memory(config)?;
    let size = shm.len();
    debug!(
        "{} shared memory '{}'",
        if shm.created() { "created" } else { "opened existing" },
        shm.name()
    );
    info!(
        "Opened shared memory '{}'. Size: {} {}.",
        shm.name(),
        size,
        if size != 1 { "bytes" } else { "byte" }
    );

    let layout = RegionLayout::new(size, config.offset, config.width, config.max_elements)?;
    debug!(
        "writing {} elements of {} bytes at offset {}, mask {}",
        layout.elements(),
        layout.width(),
        layout.offset(),
        config.mask
    );

    let mut guard = match &config.semaphore {
        Some(name) => {
            let semaphore = open_semaphore(config, name)?;
            debug!(
                "{} semaphore '{}'",
                if semaphore.created() { "created" } else { "opened existing" },
                semaphore.name()
            );
            info!("Using semaphore '{}'.", semaphore.name());
            Some(SemaphoreGuard::new(
                semaphore,
                config.schedule.max_wait(),
                shutdown.clone(),
            ))
        }
        None => None,
    };

    let mut rng = StdRng::from_entropy();
    let mut scheduler = Scheduler::new(config.schedule, shutdown.clone());
    let report = scheduler.run(|| {
        let region = layout.slice_mut(&mut shm);
        let mut write = || fill(&mut rng, region, layout.width(), config.mask);
        let Some(guard) = guard.as_mut() else {
            write();
            return Ok(Flow::Continue);
        };
        match guard.acquire_then(write)? {
            None => Ok(Flow::Stop(StopReason::Signal)),
            Some(()) if guard.exhausted() => Ok(Flow::Stop(StopReason::SemaphoreErrors)),
            Some(()) => Ok(Flow::Continue),
        }
    })?;

    drop(guard);
    drop(shm);
    info!("Terminating...");
    Ok(report)
}
