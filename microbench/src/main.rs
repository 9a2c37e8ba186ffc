use cryptfs_microbench::config::{Backend, Config};
use cryptfs_microbench::measure::{measure, Format, Report};
use cryptfs_microbench::suite::{prefetch_targets, AeadSuite};
use cryptfs_microbench::workload::Parallelism;
use cryptfs_microbench::{BenchError, BenchErrorKind, BenchResult};
use log::LevelFilter;
use log::{debug, error, info, trace};
use log4rs::append::rolling_file::policy::compound::{
    roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy,
};
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::config::{Appender, Config as LogConfig, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::filter::{Filter, Response};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use structopt::StructOpt;

const MIB: u64 = 1 << 20;

#[derive(StructOpt, Debug)]
#[structopt(about = "encryption and entropy micro benchmarks")]
/// Encryption and entropy micro benchmarks
///
/// Measures AES-GCM sealing throughput for different backends and thread counts, and the cost of
/// reading random bytes through prefetch buffers of different sizes.
struct Opts {
    /// Path to the config file to use for this invocation. If none is given, the built-in
    /// defaults are used.
    #[structopt(name = "config", long, short, parse(from_os_str))]
    config: Option<PathBuf>,
    /// Path to the log file to use. The logfile will automatically roll over if the size
    /// increases beyond 10MiB.
    #[structopt(
        name = "log_file",
        default_value = "cryptfs_microbench.log",
        long,
        parse(from_os_str)
    )]
    log_file: PathBuf,
    /// Minimum time in seconds to spend measuring a single entry point.
    #[structopt(name = "bench-time", default_value = "1", long, short)]
    bench_time: f64,
    /// Output format of the results, either "table" or "json".
    #[structopt(name = "format", default_value = "table", long, short)]
    format: Format,
    #[structopt(subcommand)]
    cmd: Cmd,
}

#[derive(StructOpt, Debug)]
enum Cmd {
    /// Measure AES-GCM sealing throughput
    ///
    /// Every iteration seals the configured amount of blocks, split evenly over the worker
    /// threads. Throughput is reported in plaintext bytes.
    Aead {
        /// Only measure this backend (native or openssl). Can be given multiple times.
        #[structopt(name = "backend", long, short)]
        backend: Vec<Backend>,
        /// Only measure this worker configuration (a thread count, or 2coop). Can be given
        /// multiple times.
        #[structopt(name = "parallelism", long, short)]
        parallelism: Vec<Parallelism>,
    },
    /// Measure reading random bytes through prefetch buffers
    ///
    /// Every iteration requests a single random string. The unbuffered baseline is included
    /// unless disabled in the config.
    Prefetch {
        /// Only measure this prefetch capacity. Can be given multiple times.
        #[structopt(name = "capacity", long)]
        capacity: Vec<usize>,
    },
    /// Run every configured measurement of both harnesses
    All,
    /// Test the configuration
    ///
    /// Loads and validates the configuration, constructs every configured backend and entropy
    /// source, and exits.
    Check,
}

/// ModuleFilter is a naive log filter which only allows (child modules of) a given module.
#[derive(Debug)]
struct ModuleFilter {
    module: String,
}

impl Filter for ModuleFilter {
    fn filter(&self, record: &log::Record) -> Response {
        if let Some(mod_path) = record.module_path() {
            // this is technically not correct but sufficient for our purposes
            if mod_path.starts_with(self.module.as_str()) {
                return Response::Neutral;
            }
        }
        Response::Reject
    }
}

fn main() {
    if let Err(e) = real_main() {
        error!("{}", e);
        eprintln!("{}", e);
        process::exit(1);
    }
}

fn real_main() -> BenchResult<()> {
    let opts = Opts::from_args();

    init_logger(&opts.log_file)?;

    let mut cfg = match opts.config {
        Some(ref path) => read_cfg(path)?,
        None => {
            debug!("no config file given, using defaults");
            Config::default()
        }
    };
    let bench_time = bench_time(opts.bench_time)?;

    let mut report = Report::default();
    match opts.cmd {
        Cmd::Aead {
            backend,
            parallelism,
        } => {
            cfg.restrict_aead(&backend, &parallelism);
            cfg.validate()?;
            run_aead(&cfg, bench_time, &mut report)?;
        }
        Cmd::Prefetch { capacity } => {
            cfg.restrict_prefetch(&capacity);
            cfg.validate()?;
            run_prefetch(&cfg, bench_time, &mut report)?;
        }
        Cmd::All => {
            run_aead(&cfg, bench_time, &mut report)?;
            run_prefetch(&cfg, bench_time, &mut report)?;
        }
        Cmd::Check => {
            AeadSuite::new(cfg.aead())?;
            prefetch_targets(cfg.prefetch())?;
            println!("configuration ok");
            return Ok(());
        }
    }

    println!("{}", report.render(opts.format)?);
    Ok(())
}

/// Convert the bench time given on the command line, rejecting negative, NaN and overflowing
/// values.
fn bench_time(secs: f64) -> BenchResult<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| BenchError::new(BenchErrorKind::Config, Box::new(e)))
}

fn run_aead(cfg: &Config, bench_time: Duration, report: &mut Report) -> BenchResult<()> {
    let suite = AeadSuite::new(cfg.aead())?;
    for entry in suite.entries() {
        info!("measuring {}", entry);
        report.push(measure(
            &entry.to_string(),
            suite.bytes_per_op(),
            bench_time,
            || {
                suite.run(entry)?;
                Ok(())
            },
        )?);
    }
    Ok(())
}

fn run_prefetch(cfg: &Config, bench_time: Duration, report: &mut Report) -> BenchResult<()> {
    for target in prefetch_targets(cfg.prefetch())? {
        info!("measuring {}", target.entry());
        report.push(measure(
            &target.entry().to_string(),
            target.bytes_per_op(),
            bench_time,
            || {
                target.request();
                Ok(())
            },
        )?);
    }
    Ok(())
}

fn init_logger(log_file: &Path) -> BenchResult<()> {
    let mut rolled_log_file = log_file.to_path_buf();
    let stem = log_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "cryptfs_microbench".to_string());
    let name = match rolled_log_file.extension() {
        Some(ext) => format!("{}.{{}}.{}", stem, ext.to_string_lossy()),
        None => format!("{}.{{}}", stem),
    };
    rolled_log_file.set_file_name(name);

    let policy = CompoundPolicy::new(
        Box::new(SizeTrigger::new(10 * MIB)),
        Box::new(
            FixedWindowRoller::builder()
                .build(&rolled_log_file.to_string_lossy(), 5)
                .map_err(|e| BenchError::new(BenchErrorKind::Config, e.into()))?,
        ),
    );
    let log_file = RollingFileAppender::builder()
        .append(true)
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S %Z)(local)}: {l} {m}{n}",
        )))
        .build(log_file, Box::new(policy))
        .map_err(|e| BenchError::new_io("could not open log file".to_string(), e))?;
    let log_config = LogConfig::builder()
        .appender(
            Appender::builder()
                .filter(Box::new(ModuleFilter {
                    module: "cryptfs_microbench".to_string(),
                }))
                .build("logfile", Box::new(log_file)),
        )
        .logger(Logger::builder().build("filelogger", LevelFilter::Debug))
        .build(Root::builder().appender("logfile").build(LevelFilter::Debug))
        .map_err(|e| BenchError::new(BenchErrorKind::Config, Box::new(e)))?;
    log4rs::init_config(log_config)
        .map_err(|e| BenchError::new(BenchErrorKind::Config, Box::new(e)))?;

    Ok(())
}

fn read_cfg(config: &Path) -> BenchResult<Config> {
    trace!("opening config file {:?}", config);
    let mut cfg_file = File::open(config)
        .map_err(|e| BenchError::new_io("could not open config file".to_string(), e))?;
    let mut cfg_str = String::new();
    cfg_file
        .read_to_string(&mut cfg_str)
        .map_err(|e| BenchError::new_io("could not read config file".to_string(), e))?;

    let cfg: Config = toml::from_str(&cfg_str)?;
    trace!("config read");
    cfg.validate()?;
    trace!("config validated");
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::bench_time;
    use cryptfs_microbench::BenchErrorKind;
    use std::time::Duration;

    #[test]
    fn bench_time_conversion() {
        assert_eq!(bench_time(1.0).unwrap(), Duration::from_secs(1));
        assert_eq!(bench_time(0.5).unwrap(), Duration::from_millis(500));
        for secs in [-1.0, f64::NAN, f64::INFINITY, 1e30] {
            match bench_time(secs) {
                Err(e) => assert!(matches!(e.kind(), BenchErrorKind::Config)),
                Ok(d) => panic!("{} converted to {:?}", secs, d),
            }
        }
    }
}
