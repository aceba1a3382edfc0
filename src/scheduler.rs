use crate::{
    config::ScheduleConfig,
    metric::Measurement,
    runner::{MeasurementSource, RunError},
    shutdown::Shutdown,
    storage::Storage,
    writer::MetricsWriter,
};
use log::{debug, error, info, warn};
use std::time::{Duration, Instant};

/// Doubling delay between failed measurement attempts.
struct Backoff {
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            max: max.max(initial),
            current: initial,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }
}

/// Outcome of one measure-and-write cycle.
#[derive(Debug, PartialEq)]
pub enum Cycle {
    // Number of points written.
    Written(usize),
    // Measured, but the write failed; the measurement is dropped.
    WriteFailed,
    // Shutdown was requested before a measurement succeeded.
    Cancelled,
}

pub struct Scheduler<M, S> {
    source: M,
    writer: MetricsWriter<S>,
    config: ScheduleConfig,
    shutdown: Shutdown,
}

impl<M: MeasurementSource, S: Storage> Scheduler<M, S> {
    pub fn new(
        source: M,
        writer: MetricsWriter<S>,
        config: ScheduleConfig,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            source,
            writer,
            config,
            shutdown,
        }
    }

    /// Handle that stops the loop and any measurement in flight.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Measures and writes until shutdown, one cycle per interval.
    pub fn run(&self) {
        info!("running with an interval of {:?}", self.config.interval);
        loop {
            let start = Instant::now();
            if self.run_once() == Cycle::Cancelled {
                break;
            }

            let elapsed = start.elapsed();
            let sleep_time = self.config.interval.saturating_sub(elapsed);
            debug!("time taken: {:?}", elapsed);
            debug!("sleep time: {:?}", sleep_time);
            if !self.shutdown.sleep(sleep_time) {
                break;
            }
        }
        info!("scheduler stopped");
    }

    /// Runs a single cycle: measure (retrying until storage is ready and a
    /// measurement succeeds, or shutdown), then write.
    pub fn run_once(&self) -> Cycle {
        let measurement = match self.measure_with_retry() {
            Some(measurement) => measurement,
            None => return Cycle::Cancelled,
        };

        match self.writer.write(&measurement) {
            Ok(n) => Cycle::Written(n),
            Err(e) => {
                error!("{}", error_chain(&e));
                Cycle::WriteFailed
            }
        }
    }

    fn measure_with_retry(&self) -> Option<Measurement> {
        let mut backoff = Backoff::new(self.config.retry_initial, self.config.retry_max);
        loop {
            if self.shutdown.is_triggered() {
                return None;
            }
            // No point spending a speedtest on results that can't be stored.
            let failure = match self.writer.ready() {
                Err(e) => error_chain(&e),
                Ok(()) => match self.source.measure(&self.shutdown) {
                    Ok(measurement) => return Some(measurement),
                    Err(RunError::Cancelled) => return None,
                    Err(e) => format!("issue getting speedtest results: {}", error_chain(&e)),
                },
            };

            let delay = backoff.next_delay();
            warn!("{}, retrying in {:?}", failure, delay);
            if !self.shutdown.sleep(delay) {
                return None;
            }
        }
    }
}

// "outer: inner: innermost", since thiserror keeps causes in source().
fn error_chain(e: &dyn std::error::Error) -> String {
    let mut s = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        s.push_str(": ");
        s.push_str(&cause.to_string());
        source = cause.source();
    }
    s
}
