use crate::{config::RunnerConfig, metric::Measurement, shutdown::Shutdown};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::{
    io::{self, Read},
    process::{Child, Command, ExitStatus, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum RunError {
    #[error("failed to start {program}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("error communicating with speedtest process")]
    Io(#[from] io::Error),
    #[error("speedtest did not finish within {0:?}")]
    Timeout(Duration),
    #[error("speedtest cancelled by shutdown")]
    Cancelled,
    #[error("speedtest exited with {status}: {stderr}")]
    Exit { status: ExitStatus, stderr: String },
    #[error("speedtest wrote to stderr: {0}")]
    Stderr(String),
    #[error("speedtest output is not valid json")]
    InvalidJson(#[from] serde_json::Error),
    #[error("speedtest output is missing {0:?}")]
    MissingFields(Vec<&'static str>),
    #[error("invalid timestamp {value:?}")]
    InvalidTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Something that can produce one measurement per call.
pub trait MeasurementSource {
    fn measure(&self, shutdown: &Shutdown) -> Result<Measurement, RunError>;
}

/// Runs the speedtest binary and parses its JSON result.
pub struct Runner {
    config: RunnerConfig,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    fn spawn(&self) -> Result<Child, RunError> {
        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group: a terminal Ctrl+C reaches only us, and we stop
        // the whole group ourselves.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        command.spawn().map_err(|source| RunError::Spawn {
            program: self.config.program.clone(),
            source,
        })
    }
}

impl MeasurementSource for Runner {
    fn measure(&self, shutdown: &Shutdown) -> Result<Measurement, RunError> {
        info!(
            "running {} {}",
            self.config.program,
            self.config.args.join(" ")
        );
        let start = Instant::now();
        let mut child = self.spawn()?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = start + self.config.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if shutdown.is_triggered() {
                info!("terminating speedtest process {}", child.id());
                terminate(&mut child, self.config.terminate_grace)?;
                return Err(RunError::Cancelled);
            }
            if Instant::now() >= deadline {
                warn!(
                    "speedtest process {} timed out after {:?}",
                    child.id(),
                    self.config.timeout
                );
                terminate(&mut child, self.config.terminate_grace)?;
                return Err(RunError::Timeout(self.config.timeout));
            }
            thread::sleep(POLL_INTERVAL);
        };

        // The leader is reaped; anything left in its group would hold our
        // pipes open.
        #[cfg(unix)]
        signal_group(child.id() as libc::pid_t, libc::SIGKILL);

        let drain_deadline = deadline.max(Instant::now() + self.config.terminate_grace);
        let (stdout, stderr) = match (
            collect(stdout, drain_deadline)?,
            collect(stderr, drain_deadline)?,
        ) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => {
                warn!(
                    "speedtest output still open after {:?}",
                    self.config.timeout
                );
                return Err(RunError::Timeout(self.config.timeout));
            }
        };
        let stderr = String::from_utf8_lossy(&stderr).trim().to_string();
        info!(
            "speedtest finished with {} in {:.1}s",
            status,
            start.elapsed().as_secs_f64()
        );

        if !status.success() {
            return Err(RunError::Exit { status, stderr });
        }
        if !stderr.is_empty() {
            if self.config.fail_on_stderr {
                return Err(RunError::Stderr(stderr));
            }
            warn!("speedtest stderr: {}", stderr);
        }

        let measurement = parse_output(&stdout, self.config.require_all_sections)?;
        debug!("{:?}", measurement);
        Ok(measurement)
    }
}

#[derive(Deserialize)]
struct RawResult {
    timestamp: Option<String>,
    ping: Option<Map<String, Value>>,
    download: Option<Map<String, Value>>,
    upload: Option<Map<String, Value>>,
    server: Option<Map<String, Value>>,
}

/// Parses the JSON printed by `speedtest -f json`.
pub fn parse_output(stdout: &[u8], require_all_sections: bool) -> Result<Measurement, RunError> {
    let raw: RawResult = serde_json::from_slice(stdout)?;

    let mut missing = vec![];
    if raw.timestamp.is_none() {
        missing.push("timestamp");
    }
    if require_all_sections {
        for (name, section) in [
            ("ping", &raw.ping),
            ("download", &raw.download),
            ("upload", &raw.upload),
            ("server", &raw.server),
        ] {
            if section.is_none() {
                missing.push(name);
            }
        }
    }
    let timestamp = match raw.timestamp {
        Some(timestamp) if missing.is_empty() => timestamp,
        _ => return Err(RunError::MissingFields(missing)),
    };

    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map_err(|source| RunError::InvalidTimestamp {
            value: timestamp.clone(),
            source,
        })?
        .with_timezone(&Utc);

    Ok(Measurement {
        timestamp,
        ping: raw.ping.unwrap_or_default(),
        download: raw.download.unwrap_or_default(),
        upload: raw.upload.unwrap_or_default(),
        server: raw.server.unwrap_or_default(),
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

// None if the pipe is still open at `deadline`. The reader is then left
// to finish on its own.
fn collect(
    reader: JoinHandle<io::Result<Vec<u8>>>,
    deadline: Instant,
) -> io::Result<Option<Vec<u8>>> {
    while !reader.is_finished() {
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(DRAIN_POLL_INTERVAL);
    }
    reader
        .join()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "pipe reader panicked"))?
        .map(Some)
}

// Stops the child and reaps it. On unix the process group gets SIGTERM
// first and SIGKILL once `grace` runs out.
fn terminate(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        let pgid = child.id() as libc::pid_t;
        signal_group(pgid, libc::SIGTERM);
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if let Some(status) = child.try_wait()? {
                signal_group(pgid, libc::SIGKILL);
                return Ok(status);
            }
            thread::sleep(POLL_INTERVAL);
        }
        error!("speedtest process {} ignored SIGTERM, killing", pgid);
        signal_group(pgid, libc::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.kill() {
        debug!("kill failed: {}", e);
    }
    child.wait()
}

// Stragglers left in the group after the leader exits are not our
// children, so they are only signalled, never reaped here.
#[cfg(unix)]
fn signal_group(pgid: libc::pid_t, signal: libc::c_int) {
    // SAFETY: kill(2) has no memory-safety preconditions.
    if unsafe { libc::kill(-pgid, signal) } != 0 {
        debug!(
            "signal {} to process group {}: {}",
            signal,
            pgid,
            io::Error::last_os_error()
        );
    }
}
