use abifuzz_core::config::{AbifuzzConfig, DriverSetting, GranularitySetting};
use abifuzz_core::report::{MetricsRow, MetricsWriter};
use abifuzz_core::{AbiContract, Backend, Campaign, CommandBackend, Verdict};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::io::Write;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Feedback-directed fuzzer for stateful programs behind a typed ABI", long_about = None)]
struct Cli {
    /// Contract interface description (JSON artifact).
    contract: PathBuf,
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Backend adapter command, e.g. --backend python3 --backend adapter.py.
    #[clap(long, num_args = 1..)]
    backend: Vec<String>,
    #[clap(long)]
    runs: Option<u64>,
    #[clap(long)]
    timeout_secs: Option<u64>,
    #[clap(long, value_enum)]
    driver: Option<DriverArg>,
    #[clap(long, value_enum)]
    granularity: Option<GranularityArg>,
    /// Transition/path blend for the combined driver, in [0, 1].
    #[clap(long)]
    schedule_coef: Option<f64>,
    /// Probability of restarting mutation from an original seed.
    #[clap(long)]
    breakout_coef: Option<f64>,
    /// Metrics CSV destination; overrides the config file.
    #[clap(long)]
    report: Option<PathBuf>,
    /// RNG seed for a reproducible run; defaults to the current time.
    #[clap(long)]
    seed: Option<u64>,
    /// Where to dump the failing candidate as JSON.
    #[clap(long, default_value = "counterexample.json")]
    counterexample: PathBuf,
    #[clap(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DriverArg {
    Coverage,
    State,
    Combined,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum GranularityArg {
    Partial,
    Total,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config_file {
        Some(config_path) => {
            if !cli.quiet {
                println!("Loading configuration from {config_path:?}");
            }
            AbifuzzConfig::load_from_file(config_path)?
        }
        None => {
            let default_config_path = PathBuf::from("abifuzz.toml");
            if default_config_path.exists() {
                if !cli.quiet {
                    println!("Loading default configuration from {default_config_path:?}");
                }
                AbifuzzConfig::load_from_file(&default_config_path)?
            } else {
                AbifuzzConfig::default()
            }
        }
    };

    if let Some(runs) = cli.runs {
        config.campaign.runs = runs;
    }
    if let Some(timeout_secs) = cli.timeout_secs {
        config.campaign.timeout_secs = Some(timeout_secs);
    }
    if let Some(driver) = cli.driver {
        config.campaign.driver = match driver {
            DriverArg::Coverage => DriverSetting::Coverage,
            DriverArg::State => DriverSetting::State,
            DriverArg::Combined => DriverSetting::Combined,
        };
    }
    if let Some(granularity) = cli.granularity {
        config.campaign.granularity = match granularity {
            GranularityArg::Partial => GranularitySetting::Partial,
            GranularityArg::Total => GranularitySetting::Total,
        };
    }
    if let Some(schedule_coef) = cli.schedule_coef {
        config.campaign.schedule_coef = schedule_coef;
    }
    if let Some(breakout_coef) = cli.breakout_coef {
        config.campaign.breakout_coef = breakout_coef;
    }
    if !cli.backend.is_empty() {
        config.backend.command = cli.backend.clone();
    }
    if let Some(report_path) = &cli.report {
        config.report.path = Some(report_path.clone());
    }

    let campaign_config = config.campaign.to_campaign_config()?;
    let backend_config = config.backend.to_backend_config()?;

    let contract_text = std::fs::read_to_string(&cli.contract)
        .with_context(|| format!("failed to read contract description {:?}", cli.contract))?;
    let contract = AbiContract::from_json(&contract_text)?;

    let mut backend = CommandBackend::new(backend_config);
    let info = backend
        .info()
        .context("backend adapter did not answer the info request")?;

    let mut reporter = match config.report.cadence()? {
        Some((path, cadence)) => Some(MetricsWriter::create(&path, cadence)?),
        None => None,
    };

    let seed = cli.seed.unwrap_or_else(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    });
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    if !cli.quiet {
        println!(
            "Fuzzing {} ({} methods, {} accounts, {} lines) for {} runs, rng seed {seed}",
            contract.name,
            contract.methods.len(),
            info.accounts.len(),
            info.line_count,
            campaign_config.runs,
        );
    }

    let mut status = |row: &MetricsRow| {
        if row.call_count % 25 != 0 {
            return;
        }
        print!(
            "\rCalls: {} ({} rejected), lines: {} ({:.1}%), paths: {}, transitions: {}   ",
            row.call_count,
            row.rejected_calls,
            row.lines_covered,
            100.0 * row.coverage,
            row.covered_paths,
            row.transitions,
        );
        let _ = std::io::stdout().flush();
    };
    let progress: Option<&mut dyn FnMut(&MetricsRow)> = if cli.quiet {
        None
    } else {
        Some(&mut status)
    };

    let mut campaign = Campaign::new(&contract, &info, campaign_config);
    let report = campaign.run(&mut backend, None, &mut rng, reporter.as_mut(), progress)?;
    if !cli.quiet {
        println!();
    }

    let counters = report.counters.clone();
    let rejected_pct = if counters.call_count == 0 {
        0.0
    } else {
        100.0 * counters.rejected_calls as f64 / counters.call_count as f64
    };
    let coverage_pct = if info.line_count == 0 {
        0.0
    } else {
        100.0 * counters.covered_lines.len() as f64 / info.line_count as f64
    };
    if !cli.quiet {
        println!(
            "Finished in {:.2?}: {} calls ({} rejected, {rejected_pct:.1}%), {} lines covered ({coverage_pct:.1}%), {} paths, {} transitions",
            report.elapsed,
            counters.call_count,
            counters.rejected_calls,
            counters.covered_lines.len(),
            counters.covered_paths,
            counters.transitions,
        );
    }

    let candidate = match report.verdict {
        Verdict::Exhausted => {
            if !cli.quiet {
                println!("Run budget exhausted without a failure.");
            }
            return Ok(());
        }
        Verdict::PropertyViolated(candidate) => {
            println!("\n!!! PROPERTY VIOLATED (call {}) !!!", counters.call_count);
            candidate
        }
        Verdict::AssertionFailed(candidate) => {
            println!("\n!!! ASSERTION FAILED (call {}) !!!", counters.call_count);
            candidate
        }
    };

    println!("  Counterexample: {candidate}");
    let dump = serde_json::to_string_pretty(&serde_json::json!({
        "candidate": candidate,
        "counters": counters,
    }))?;
    std::fs::write(&cli.counterexample, dump)
        .with_context(|| format!("failed to write {:?}", cli.counterexample))?;
    println!("  Written to {:?}", cli.counterexample);

    std::process::exit(1);
}
