//! Command-line front-end: load a scenario, run it, report the metrics.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use env_logger::Builder;
use log::LevelFilter;

use lorawan_radio_simulator::{Scenario, Simulator};

#[derive(Parser)]
#[command(name = "lorawan-radio-simulator")]
#[command(about = "Discrete-event LoRaWAN network simulator")]
struct Cli {
    /// Scenario file (.json, .toml, or a reference .ini).
    scenario: PathBuf,

    /// Override the scenario's RNG seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Override the simulated-time limit in seconds.
    #[arg(long)]
    max_time: Option<f64>,

    /// Write the event trace as JSON lines to this file.
    #[arg(long)]
    trace: Option<PathBuf>,

    /// Write an .sca-style scalar summary to this file.
    #[arg(long)]
    sca: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    Builder::new()
        .filter_level(if cli.verbose { LevelFilter::Debug } else { LevelFilter::Info })
        .init();

    let mut scenario = Scenario::load(&cli.scenario)
        .with_context(|| format!("loading scenario {}", cli.scenario.display()))?;
    if let Some(seed) = cli.seed {
        scenario.seed = seed;
    }
    if let Some(max_time) = cli.max_time {
        scenario.max_time_s = max_time;
    }

    let run_name = scenario
        .name
        .clone()
        .unwrap_or_else(|| format!("seed-{}", scenario.seed));
    let duration = scenario.max_time_s;

    let mut simulator = Simulator::new(scenario).context("building simulator")?;
    // Skip trace retention when nobody is going to read it.
    simulator.trace_enabled = cli.trace.is_some();
    simulator.run();

    if let Some(path) = &cli.trace {
        let file = File::create(path)
            .with_context(|| format!("creating trace file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        for record in &simulator.trace {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n")?;
        }
        log::info!("wrote {} trace records to {}", simulator.trace.len(), path.display());
    }

    let summary = simulator.metrics.sca_summary(&run_name, duration);
    if let Some(path) = &cli.sca {
        let mut file = File::create(path)
            .with_context(|| format!("creating summary file {}", path.display()))?;
        writeln!(file, "# run {} at {}", run_name, chrono::Local::now().to_rfc3339())?;
        file.write_all(summary.as_bytes())?;
    }

    let metrics = &simulator.metrics;
    println!("run        : {run_name}");
    println!("sent       : {}", metrics.tx_started);
    println!("delivered  : {}", metrics.unique_uplinks_delivered);
    println!("pdr        : {:.4}", metrics.pdr());
    println!("collisions : {}", metrics.collisions);
    println!("mean snr   : {:.2} dB", metrics.mean_snr_db());
    println!("mean delay : {:.3} s", metrics.mean_delay_s());
    println!(
        "downlinks  : {} sent, {} delivered, {} missed",
        metrics.downlinks_sent, metrics.downlinks_delivered, metrics.downlinks_missed
    );
    println!("throughput : {:.1} bit/s", metrics.throughput_bps(duration));

    Ok(())
}
