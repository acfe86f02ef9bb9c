//! Fixed-rate tick loop.
//!
//! Ticks are anchored to a periodic `timerfd`, so the time spent inside a tick
//! does not push later ticks back. A termination request is only honoured at
//! the poll points between ticks, never while a tick is running.

use std::fmt::{self, Display};
use std::os::fd::AsFd;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::time::TimeSpec;
use nix::sys::timerfd::{ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::signal::Shutdown;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Schedule {
    /// Zero means a single tick.
    pub interval: Duration,
    /// Zero means no limit.
    pub limit: u64,
}

impl Schedule {
    pub fn new(interval: Duration, limit: u64) -> Self {
        Schedule { interval, limit }
    }

    pub fn from_millis(interval_ms: u64, limit: u64) -> Self {
        Schedule::new(Duration::from_millis(interval_ms), limit)
    }

    pub fn is_run_once(&self) -> bool {
        self.interval.is_zero()
    }

    /// How long a tick may wait for the semaphore: half the interval, or
    /// forever when there is no interval.
    pub fn max_wait(&self) -> Option<Duration> {
        if self.is_run_once() {
            None
        } else {
            Some(self.interval / 2)
        }
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Schedule::from_millis(1000, 0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Running,
    Stopping,
    Stopped,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    RunOnce,
    Limit,
    Signal,
    SemaphoreErrors,
}

impl Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            StopReason::RunOnce => "single run completed",
            StopReason::Limit => "interval limit reached",
            StopReason::Signal => "termination requested",
            StopReason::SemaphoreErrors => "too many semaphore errors",
        };
        write!(f, "{}", msg)
    }
}

/// What a tick wants the scheduler to do next.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop(StopReason),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Report {
    pub ticks: u64,
    pub reason: StopReason,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Wake {
    Tick,
    Shutdown,
}

/// Periodic monotonic timer. Missed expirations collapse into one tick.
pub struct Ticker {
    timer: TimerFd,
}

impl Ticker {
    pub fn start(interval: Duration) -> Result<Self> {
        let timer =
            TimerFd::new(ClockId::CLOCK_MONOTONIC, TimerFlags::TFD_CLOEXEC).map_err(Error::Timer)?;
        timer
            .set(
                Expiration::Interval(TimeSpec::from_duration(interval)),
                TimerSetTimeFlags::empty(),
            )
            .map_err(Error::Timer)?;
        Ok(Ticker { timer })
    }

    /// Blocks until the next expiration or until `shutdown` is requested.
    pub fn wait(&self, shutdown: &Shutdown) -> Result<Wake> {
        loop {
            if shutdown.is_requested() {
                return Ok(Wake::Shutdown);
            }

            let mut fds = [
                PollFd::new(self.timer.as_fd(), PollFlags::POLLIN),
                PollFd::new(shutdown.wake_fd(), PollFlags::POLLIN),
            ];
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(Error::Timer(e)),
            }

            let ready = |fd: &PollFd| fd.revents().is_some_and(|r| r.contains(PollFlags::POLLIN));
            if ready(&fds[1]) {
                shutdown.drain();
                continue;
            }
            if ready(&fds[0]) {
                self.timer.wait().map_err(Error::Timer)?;
                return Ok(Wake::Tick);
            }
        }
    }
}

pub struct Scheduler {
    schedule: Schedule,
    shutdown: Shutdown,
    state: State,
}

impl Scheduler {
    pub fn new(schedule: Schedule, shutdown: Shutdown) -> Self {
        Scheduler {
            schedule,
            shutdown,
            state: State::Running,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Runs `tick` until the schedule is exhausted, a termination is
    /// requested or `tick` asks to stop. An error from `tick` aborts the loop.
    pub fn run<F>(&mut self, mut tick: F) -> Result<Report>
    where
        F: FnMut() -> Result<Flow>,
    {
        let ticker = if self.schedule.is_run_once() {
            None
        } else {
            Some(Ticker::start(self.schedule.interval)?)
        };

        let mut ticks = 0u64;
        let result = loop {
            if self.shutdown.is_requested() {
                break Ok(StopReason::Signal);
            }

            let flow = match tick() {
                Ok(flow) => flow,
                Err(e) => break Err(e),
            };
            ticks += 1;
            if let Flow::Stop(reason) = flow {
                break Ok(reason);
            }

            let Some(ticker) = &ticker else {
                break Ok(StopReason::RunOnce);
            };
            if self.schedule.limit != 0 && ticks >= self.schedule.limit {
                break Ok(StopReason::Limit);
            }
            match ticker.wait(&self.shutdown) {
                Ok(Wake::Tick) => {}
                Ok(Wake::Shutdown) => break Ok(StopReason::Signal),
                Err(e) => break Err(e),
            }
        };

        self.state = State::Stopping;
        let reason = result?;
        debug!("stopping after {} ticks: {}", ticks, reason);
        self.state = State::Stopped;
        info!(
            "Stopped after {} {} ({}).",
            ticks,
            if ticks != 1 { "intervals" } else { "interval" },
            reason
        );
        Ok(Report { ticks, reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn shutdown() -> Shutdown {
        Shutdown::new().unwrap()
    }

    #[test]
    fn max_wait_is_half_the_interval() {
        assert_eq!(Schedule::from_millis(0, 0).max_wait(), None);
        assert_eq!(
            Schedule::from_millis(100, 0).max_wait(),
            Some(Duration::from_millis(50))
        );
        assert_eq!(
            Schedule::from_millis(1, 0).max_wait(),
            Some(Duration::from_micros(500))
        );
    }

    #[test]
    fn zero_interval_ticks_once_regardless_of_limit() {
        for limit in [0, 1, 5] {
            let mut scheduler = Scheduler::new(Schedule::from_millis(0, limit), shutdown());
            assert_eq!(scheduler.state(), State::Running);
            let mut count = 0;
            let report = scheduler
                .run(|| {
                    count += 1;
                    Ok(Flow::Continue)
                })
                .unwrap();
            assert_eq!(count, 1);
            assert_eq!(report.ticks, 1);
            assert_eq!(report.reason, StopReason::RunOnce);
            assert_eq!(scheduler.state(), State::Stopped);
        }
    }

    #[test]
    fn limit_runs_exactly_n_ticks() {
        let mut scheduler = Scheduler::new(Schedule::from_millis(5, 4), shutdown());
        let mut count = 0;
        let start = Instant::now();
        let report = scheduler
            .run(|| {
                count += 1;
                Ok(Flow::Continue)
            })
            .unwrap();
        assert_eq!(count, 4);
        assert_eq!(
            report,
            Report {
                ticks: 4,
                reason: StopReason::Limit
            }
        );
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn pending_request_prevents_first_tick() {
        let shutdown = shutdown();
        shutdown.request();
        let mut scheduler = Scheduler::new(Schedule::from_millis(5, 0), shutdown);
        let report = scheduler.run(|| panic!("tick must not run")).unwrap();
        assert_eq!(report.ticks, 0);
        assert_eq!(report.reason, StopReason::Signal);
    }

    #[test]
    fn request_during_tick_finishes_that_tick() {
        let shutdown = shutdown();
        let trigger = shutdown.clone();
        let mut scheduler = Scheduler::new(Schedule::from_millis(5, 0), shutdown);
        let mut finished = 0;
        let report = scheduler
            .run(|| {
                if finished == 2 {
                    trigger.request();
                }
                finished += 1;
                Ok(Flow::Continue)
            })
            .unwrap();
        assert_eq!(finished, 3);
        assert_eq!(report.ticks, 3);
        assert_eq!(report.reason, StopReason::Signal);
    }

    #[test]
    fn tick_can_stop_the_loop() {
        let mut scheduler = Scheduler::new(Schedule::from_millis(1, 100), shutdown());
        let mut count = 0;
        let report = scheduler
            .run(|| {
                count += 1;
                if count == 3 {
                    Ok(Flow::Stop(StopReason::SemaphoreErrors))
                } else {
                    Ok(Flow::Continue)
                }
            })
            .unwrap();
        assert_eq!(report.ticks, 3);
        assert_eq!(report.reason, StopReason::SemaphoreErrors);
    }

    #[test]
    fn tick_error_aborts() {
        let mut scheduler = Scheduler::new(Schedule::from_millis(1, 0), shutdown());
        let err = scheduler
            .run(|| Err(Error::Timer(Errno::EINVAL)))
            .unwrap_err();
        assert!(matches!(err, Error::Timer(Errno::EINVAL)));
        assert_eq!(scheduler.state(), State::Stopping);
    }

    #[test]
    fn ticker_wakes_on_request() {
        let shutdown = shutdown();
        let trigger = shutdown.clone();
        let ticker = Ticker::start(Duration::from_secs(60)).unwrap();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            trigger.request();
        });
        let start = Instant::now();
        assert_eq!(ticker.wait(&shutdown).unwrap(), Wake::Shutdown);
        assert!(start.elapsed() < Duration::from_secs(30));
        handle.join().unwrap();
    }

    #[test]
    fn ticker_fires_periodically() {
        let shutdown = shutdown();
        let ticker = Ticker::start(Duration::from_millis(10)).unwrap();
        let start = Instant::now();
        for _ in 0..3 {
            assert_eq!(ticker.wait(&shutdown).unwrap(), Wake::Tick);
        }
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn limit_spans_whole_intervals() {
        let mut scheduler = Scheduler::new(Schedule::from_millis(30, 4), shutdown());
        let start = Instant::now();
        scheduler
            .run(|| {
                thread::sleep(Duration::from_millis(10));
                Ok(Flow::Continue)
            })
            .unwrap();
        // Three full intervals plus the last tick's own work.
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}
