use std::ffi::CString;
use std::ptr::NonNull;
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::libc::{self, c_uint, sem_t, time_t};
use nix::sys::stat::Mode;
use nix::sys::time::TimeSpec;
use nix::time::{clock_gettime, ClockId};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::shm::prepend_slash;

/// Value a freshly created semaphore starts with: one holder at a time.
const INITIAL_VALUE: c_uint = 1;

macro_rules! check_err {
    ($call:expr) => {
        Errno::result(unsafe { $call }).map(drop)
    };
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Acquire {
    Acquired,
    TimedOut,
    /// A signal arrived while waiting.
    Interrupted,
}

/// A named POSIX semaphore (`sem_open`).
pub struct NamedSemaphore {
    sem: NonNull<sem_t>,
    name: String,
    created: bool,
    keep: bool,
}

impl NamedSemaphore {
    /// Opens a semaphore some other process already created.
    pub fn open(name: &str) -> Result<Self> {
        let name = prepend_slash(name);
        let sem = raw_open(&name, OFlag::empty(), Mode::empty())
            .map_err(|source| Error::Semaphore {
                name: name.clone(),
                source,
            })?;
        Ok(NamedSemaphore {
            sem,
            name,
            created: false,
            keep: false,
        })
    }

    /// Creates a semaphore with an initial value of one. An existing semaphore
    /// is opened as is unless `exclusive` is set.
    pub fn create(name: &str, mode: u32, exclusive: bool) -> Result<Self> {
        let name = prepend_slash(name);
        let mode = Mode::from_bits_truncate(mode);
        match raw_open(&name, OFlag::O_CREAT | OFlag::O_EXCL, mode) {
            Ok(sem) => Ok(NamedSemaphore {
                sem,
                name,
                created: true,
                keep: false,
            }),
            Err(Errno::EEXIST) if !exclusive => {
                debug!("semaphore '{}' already exists, opening it", name);
                NamedSemaphore::open(&name)
            }
            Err(source) => Err(Error::Semaphore { name, source }),
        }
    }

    /// Leave a semaphore this process created in place on drop.
    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created(&self) -> bool {
        self.created
    }

    pub fn wait(&self) -> nix::Result<Acquire> {
        match check_err!(libc::sem_wait(self.sem.as_ptr())) {
            Ok(()) => Ok(Acquire::Acquired),
            Err(Errno::EINTR) => Ok(Acquire::Interrupted),
            Err(e) => Err(e),
        }
    }

    /// Waits until the absolute `CLOCK_REALTIME` instant `deadline`.
    pub fn wait_until(&self, deadline: &TimeSpec) -> nix::Result<Acquire> {
        match check_err!(libc::sem_timedwait(self.sem.as_ptr(), deadline.as_ref())) {
            Ok(()) => Ok(Acquire::Acquired),
            Err(Errno::ETIMEDOUT) => Ok(Acquire::TimedOut),
            Err(Errno::EINTR) => Ok(Acquire::Interrupted),
            Err(e) => Err(e),
        }
    }

    pub fn post(&self) -> nix::Result<()> {
        check_err!(libc::sem_post(self.sem.as_ptr()))
    }

    pub fn value(&self) -> nix::Result<i32> {
        let mut value = 0;
        check_err!(libc::sem_getvalue(self.sem.as_ptr(), &mut value))?;
        Ok(value)
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        if let Err(e) = check_err!(libc::sem_close(self.sem.as_ptr())) {
            warn!("failed to close semaphore '{}': {}", self.name, e);
        }
        if !self.created || self.keep {
            return;
        }
        let Ok(cname) = CString::new(self.name.as_str()) else {
            return;
        };
        match check_err!(libc::sem_unlink(cname.as_ptr())) {
            Ok(()) | Err(Errno::ENOENT) => debug!("removed semaphore '{}'", self.name),
            Err(e) => warn!("failed to remove semaphore '{}': {}", self.name, e),
        }
    }
}

/// `sem_timedwait` takes an absolute realtime deadline. Deadlines past what a
/// `time_t` can hold saturate.
pub fn deadline_after(timeout: Duration) -> nix::Result<TimeSpec> {
    let now = clock_gettime(ClockId::CLOCK_REALTIME)?;
    let now = Duration::new(now.tv_sec().max(0) as u64, now.tv_nsec() as u32);
    let latest = Duration::from_secs(time_t::MAX as u64);
    let deadline = now
        .checked_add(timeout)
        .map_or(latest, |deadline| deadline.min(latest));
    Ok(TimeSpec::from_duration(deadline))
}

fn raw_open(name: &str, oflg: OFlag, mode: Mode) -> nix::Result<NonNull<sem_t>> {
    let cname = CString::new(name).map_err(|_| Errno::EINVAL)?;
    let ptr = unsafe {
        libc::sem_open(
            cname.as_ptr(),
            oflg.bits(),
            mode.bits() as c_uint,
            INITIAL_VALUE,
        )
    };
    if ptr == libc::SEM_FAILED {
        return Err(Errno::last());
    }
    NonNull::new(ptr).ok_or(Errno::EINVAL)
}
