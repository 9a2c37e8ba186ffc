use crate::{BenchError, BenchErrorKind, BenchResult};
use log::{debug, info};
use prettytable::format::Alignment;
use prettytable::{Cell, Row, Table};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

const MIB: f64 = (1 << 20) as f64;

/// Upper bound on the amount of invocations between two clock reads.
const MAX_BATCH: u64 = 1 << 16;

/// The result of measuring a single entry point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    name: String,
    iterations: u64,
    bytes_per_op: u64,
    elapsed_ns: u64,
}

impl Measurement {
    /// Name of the measured entry point.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Amount of timed invocations.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Average time of one invocation in nanoseconds.
    pub fn ns_per_op(&self) -> f64 {
        self.elapsed_ns as f64 / self.iterations as f64
    }

    /// Throughput in MiB per second.
    pub fn mib_per_sec(&self) -> f64 {
        let secs = self.elapsed_ns as f64 / 1e9;
        (self.bytes_per_op * self.iterations) as f64 / MIB / secs
    }
}

/// Time `op` until at least `bench_time` has passed. `op` is called once before the clock starts,
/// then in doubling batches so the clock is read rarely for fast operations.
///
/// Errors returned by `op` abort the measurement, there is no partial result.
pub fn measure<F>(
    name: &str,
    bytes_per_op: u64,
    bench_time: Duration,
    mut op: F,
) -> BenchResult<Measurement>
where
    F: FnMut() -> BenchResult<()>,
{
    op()?;

    let mut iterations = 0;
    let mut batch = 1;
    let start = Instant::now();
    loop {
        for _ in 0..batch {
            op()?;
        }
        iterations += batch;

        let elapsed = start.elapsed();
        if elapsed >= bench_time {
            let m = Measurement {
                name: name.to_string(),
                iterations,
                bytes_per_op,
                elapsed_ns: elapsed.as_nanos() as u64,
            };
            debug!(
                "{}: {} iterations in {:?} ({:.2} MiB/s)",
                name,
                iterations,
                elapsed,
                m.mib_per_sec()
            );
            return Ok(m);
        }
        batch = (batch * 2).min(MAX_BATCH);
    }
}

/// How results are written to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// An aligned text table.
    Table,
    /// A JSON array of measurements.
    Json,
}

impl FromStr for Format {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "table" => Ok(Format::Table),
            "json" => Ok(Format::Json),
            _ => Err(BenchError::new(
                BenchErrorKind::Report,
                Box::new(UnknownFormat(s.to_string())),
            )),
        }
    }
}

#[derive(Debug)]
struct UnknownFormat(String);

impl fmt::Display for UnknownFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unknown output format {:?}, expected table or json", self.0)
    }
}

impl std::error::Error for UnknownFormat {}

/// Measurements collected during a run, in the order they were taken.
#[derive(Debug, Default)]
pub struct Report {
    measurements: Vec<Measurement>,
}

impl Report {
    /// Add a measurement to the report.
    pub fn push(&mut self, m: Measurement) {
        info!(
            "{}: {:.0} ns/op, {:.2} MiB/s",
            m.name(),
            m.ns_per_op(),
            m.mib_per_sec()
        );
        self.measurements.push(m);
    }

    /// All measurements in this report.
    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    /// Render the report in the given format.
    pub fn render(&self, format: Format) -> BenchResult<String> {
        Ok(match format {
            Format::Table => self.table().to_string(),
            Format::Json => serde_json::to_string_pretty(&self.measurements)?,
        })
    }

    fn table(&self) -> Table {
        let mut table = Table::new();
        table.set_titles(Row::new(
            ["benchmark", "iterations", "ns/op", "MiB/s"]
                .iter()
                .map(|title| Cell::new(title))
                .collect(),
        ));
        for m in &self.measurements {
            table.add_row(Row::new(vec![
                Cell::new(m.name()),
                Cell::new_align(&m.iterations().to_string(), Alignment::RIGHT),
                Cell::new_align(&format!("{:.0}", m.ns_per_op()), Alignment::RIGHT),
                Cell::new_align(&format!("{:.2}", m.mib_per_sec()), Alignment::RIGHT),
            ]));
        }
        table
    }
}
