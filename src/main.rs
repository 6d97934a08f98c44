use clap::{ArgGroup, Parser};
use ivfit::config::FitConfig;
use ivfit::fit::{self, FittingContext};
use ivfit::output::{self, Written};
use ivfit::simulator::Ngspice;
use ivfit::stats::FitStats;
use ivfit::target::{self, TargetCurve};
use std::path::PathBuf;
use std::time::Instant;

/// Fit the R/C values of a three-branch diode network to an I-V curve
#[derive(Parser)]
#[command(name = "ivfit", version)]
#[command(group(ArgGroup::new("target").required(true).args(["measurement", "circuit"])))]
struct Cli {
    /// JSON measurement file holding the target curve
    #[arg(long)]
    measurement: Option<PathBuf>,

    /// Pin record to read from the measurement file
    #[arg(long, default_value_t = 0, requires = "measurement")]
    record: usize,

    /// Reference netlist to simulate as the target
    #[arg(long)]
    circuit: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where to write the fitted netlist (or the JSON dump)
    #[arg(long, default_value = "result.cir")]
    output: PathBuf,

    /// Also write target and fitted curves as CSV
    #[arg(long)]
    curve_csv: Option<PathBuf>,

    /// Worker threads for session fits (overrides the config)
    #[arg(long)]
    workers: Option<usize>,

    /// Print run stats to stderr
    #[arg(long)]
    stats: bool,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut stats = FitStats::new();

    let mut config = match &cli.config {
        Some(path) => FitConfig::load(path).unwrap_or_else(|e| {
            eprintln!("Error loading {}: {}", path.display(), e);
            std::process::exit(1);
        }),
        None => FitConfig::default(),
    };
    if let Some(workers) = cli.workers {
        config.fit.workers = workers.max(1);
    }

    let simulator = Ngspice::new(config.simulator.clone());

    let start = Instant::now();
    let target = if let Some(path) = &cli.measurement {
        target::load_measurement(path, cli.record, &mut config.stimulus)
            .and_then(|curve| {
                let rcs = config.stimulus.series_resistance;
                TargetCurve::new(curve, rcs, config.diode.forward_voltage)
            })
            .unwrap_or_else(|e| {
                eprintln!("Error reading {}: {}", path.display(), e);
                std::process::exit(1);
            })
    } else if let Some(path) = &cli.circuit {
        TargetCurve::from_circuit_file(path, &simulator, &config).unwrap_or_else(|e| {
            eprintln!("Error simulating {}: {}", path.display(), e);
            std::process::exit(1);
        })
    } else {
        eprintln!("Either --measurement or --circuit is required");
        std::process::exit(1);
    };
    stats.add_phase("target", start.elapsed());

    let ctx = FittingContext::new(config, target, Box::new(simulator));

    let report = fit::run(&ctx, &mut stats).unwrap_or_else(|e| {
        eprintln!("Fit error: {}", e);
        std::process::exit(1);
    });

    let start = Instant::now();
    let written = output::write_result(&report, &ctx, &cli.output, cli.curve_csv.as_deref())
        .unwrap_or_else(|e| {
            eprintln!("Output error: {}", e);
            std::process::exit(1);
        });
    stats.add_phase("output", start.elapsed());

    let score = report.score();
    println!(
        "{} code={} misfit={:e} similarity={:e} -> {}{}",
        if report.success { "success" } else { "no fit within tolerance" },
        report.best.code,
        score.misfit,
        score.similarity,
        cli.output.display(),
        if written == Written::Dump { " (json dump)" } else { "" },
    );

    if cli.stats {
        stats.display();
    }
}
