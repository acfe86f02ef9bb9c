mod app;
pub mod config;
pub mod error;
pub mod fill;
pub mod guard;
mod mmap_raw;
pub mod region;
pub mod schedule;
pub mod shm;
pub mod signal;
pub mod sync;

pub use app::run;
pub use config::{Cli, Config, Create};
pub use error::{Error, Result};
pub use fill::{fill, Mask, Width};
pub use guard::SemaphoreGuard;
pub use region::RegionLayout;
pub use schedule::{Report, Schedule, Scheduler, StopReason};
pub use shm::SharedMemory;
pub use signal::Shutdown;
pub use sync::NamedSemaphore;
