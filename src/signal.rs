use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use signal_hook::low_level::pipe;
use tracing::debug;

use crate::error::{Error, Result};

struct WakePipe {
    rx: UnixStream,
    tx: UnixStream,
}

/// Cooperative termination request.
///
/// The flag is only ever set from a signal handler (or [`Shutdown::request`]);
/// everyone else polls it. A byte is written to an internal socket pair at the
/// same time so that a blocked timer wait can return early.
#[derive(Clone)]
pub struct Shutdown {
    requested: Arc<AtomicBool>,
    pipe: Arc<WakePipe>,
}

impl Shutdown {
    pub fn new() -> Result<Self> {
        let (rx, tx) = UnixStream::pair().map_err(Error::Signal)?;
        rx.set_nonblocking(true).map_err(Error::Signal)?;
        tx.set_nonblocking(true).map_err(Error::Signal)?;
        Ok(Shutdown {
            requested: Arc::new(AtomicBool::new(false)),
            pipe: Arc::new(WakePipe { rx, tx }),
        })
    }

    /// Sets the flag on SIGINT and SIGTERM.
    pub fn install(&self) -> Result<()> {
        for sig in [SIGINT, SIGTERM] {
            // Registration order is execution order: flag first, then wake.
            flag::register(sig, Arc::clone(&self.requested)).map_err(Error::Signal)?;
            let tx = self.pipe.tx.try_clone().map_err(Error::Signal)?;
            pipe::register(sig, tx).map_err(Error::Signal)?;
        }
        debug!("termination signal handlers installed");
        Ok(())
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        // A full socket buffer already means a wakeup is pending.
        let _ = (&self.pipe.tx).write(&[1]);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Becomes readable once a termination was requested.
    pub fn wake_fd(&self) -> BorrowedFd<'_> {
        self.pipe.rx.as_fd()
    }

    pub(crate) fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            match (&self.pipe.rx).read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }
}
