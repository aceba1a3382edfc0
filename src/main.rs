use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use speedtest_collector::{
    config::{parse_named_duration, Config},
    runner::Runner,
    scheduler::{Cycle, Scheduler},
    shutdown::Shutdown,
    storage::influx::InfluxStorage,
    writer::MetricsWriter,
};

/// Runs the Ookla speedtest CLI on an interval and writes results to InfluxDB.
///
/// Flags override the matching environment variables.
#[derive(Parser)]
#[command(name = "speedtest-collector", version)]
struct Cli {
    /// InfluxDB URL [env: INFLUXDB_URL]
    #[arg(long)]
    influx_url: Option<String>,

    /// InfluxDB organization [env: INFLUXDB_ORG]
    #[arg(long)]
    org: Option<String>,

    /// InfluxDB bucket [env: INFLUXDB_BUCKET]
    #[arg(long)]
    bucket: Option<String>,

    /// Time between measurements, e.g. "1h" or "30m" [env: SPEEDTEST_INTERVAL]
    #[arg(long)]
    interval: Option<String>,

    /// Upper bound for a single speedtest run [env: SPEEDTEST_TIMEOUT]
    #[arg(long)]
    timeout: Option<String>,

    /// Path to the speedtest binary [env: SPEEDTEST_BIN]
    #[arg(long)]
    speedtest_bin: Option<String>,

    /// Treat any speedtest stderr output as a failed run
    #[arg(long)]
    fail_on_stderr: bool,

    /// Run a single measurement and exit
    #[arg(long)]
    once: bool,
}

impl Cli {
    fn apply(self, config: &mut Config) -> Result<()> {
        if let Some(url) = self.influx_url {
            config.influx.url = url;
        }
        if let Some(org) = self.org {
            config.influx.org = org;
        }
        if let Some(bucket) = self.bucket {
            config.influx.bucket = bucket;
        }
        if let Some(interval) = self.interval {
            config.schedule.interval = parse_named_duration("--interval", &interval)?;
        }
        if let Some(timeout) = self.timeout {
            config.runner.timeout = parse_named_duration("--timeout", &timeout)?;
        }
        if let Some(bin) = self.speedtest_bin {
            config.runner.program = bin;
        }
        config.runner.fail_on_stderr |= self.fail_on_stderr;
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let cli = Cli::parse();
    let once = cli.once;

    let mut config = Config::from_env().context("error reading environment")?;
    cli.apply(&mut config)?;
    config.validate().context("invalid configuration")?;

    if config.influx.token.is_none() {
        warn!("no InfluxDB token configured, writes will likely be rejected");
    }

    let storage = InfluxStorage::new(&config.influx)?;
    let scheduler = Scheduler::new(
        Runner::new(config.runner),
        MetricsWriter::new(storage),
        config.schedule,
        Shutdown::new(),
    );

    let shutdown = scheduler.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("shutting down");
        shutdown.trigger();
    })
    .context("error setting Ctrl+C handler")?;

    if once {
        if let Cycle::Written(n) = scheduler.run_once() {
            info!("wrote {} points", n);
        }
    } else {
        scheduler.run();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Cli;
    use clap::Parser;
    use speedtest_collector::config::Config;
    use std::time::Duration;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "speedtest-collector",
            "--influx-url",
            "http://db:8086",
            "--interval",
            "15m",
            "--fail-on-stderr",
        ]);
        let mut config = Config::default();
        cli.apply(&mut config).unwrap();
        assert_eq!(config.influx.url, "http://db:8086");
        assert_eq!(config.schedule.interval, Duration::from_secs(900));
        assert!(config.runner.fail_on_stderr);
        assert_eq!(config.influx.bucket, "speedtest-bucket");
    }

    #[test]
    fn test_cli_rejects_bad_interval() {
        let cli = Cli::parse_from(["speedtest-collector", "--interval", "often"]);
        assert!(cli.apply(&mut Config::default()).is_err());
    }
}
