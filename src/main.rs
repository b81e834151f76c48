use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tabled::{settings::Style, Table, Tabled};

use sweatrs::critical_power::CpModelKind;
use sweatrs::error::ErrorSeverity;
use sweatrs::zones::{HEART_RATE_ZONES_DESC, HEART_RATE_ZONES_NAME, POWER_ZONES_DESC, POWER_ZONES_NAME};
use sweatrs::{
    init_logging, AppConfig, CriticalPowerFitter, DataPoint, HeartRateModelFitter, HeartRateModelParams,
    ImportManager, LogLevel, StreamKind, SweatError, Threshold, WPrimeBalanceAlgorithm, Workout,
};

/// sweatrs - Power and heart rate analysis CLI
///
/// Computes mean-max curves, best intervals, W' balance, critical power and
/// heart rate model fits from 1 Hz workout streams stored as CSV or JSON.
#[derive(Parser)]
#[command(name = "sweatrs")]
#[command(author = "sweatrs contributors")]
#[command(version = "0.1.0")]
#[command(about = "Power and heart rate analysis CLI", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mean-max power curve
    MeanMax {
        /// Workout stream file (CSV or JSON)
        file: PathBuf,

        /// Make the curve non-increasing
        #[arg(short, long)]
        monotonic: bool,

        /// Durations to report in seconds (all durations with --json)
        #[arg(short, long, value_delimiter = ',', default_value = "1,5,15,30,60,120,300,600,1200,3600")]
        durations: Vec<usize>,
    },

    /// Top non-overlapping best intervals
    Bests {
        file: PathBuf,

        /// Interval duration in seconds
        #[arg(short, long, default_value = "60")]
        duration: usize,

        /// Number of intervals
        #[arg(short = 'n', long, default_value = "3")]
        count: usize,
    },

    /// W' balance over the workout
    Wbal {
        file: PathBuf,

        /// Critical power in watts (overrides file and config)
        #[arg(long)]
        cp: Option<f64>,

        /// W' in joules (overrides file and config)
        #[arg(long)]
        w_prime: Option<f64>,

        /// waterworth, skiba or froncioni-skiba-clarke
        #[arg(short, long)]
        algorithm: Option<WPrimeBalanceAlgorithm>,

        /// Recompute tau every second
        #[arg(long)]
        tau_dynamic: bool,

        /// Fixed tau in seconds
        #[arg(long)]
        tau_value: Option<f64>,
    },

    /// Fit a critical power model to the workout's mean-max curve
    FitCp {
        file: PathBuf,

        /// Model name, or "all" to fit every model
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Fit the heart rate response model
    FitHr {
        file: PathBuf,

        /// Starting guess for the resting heart rate (bpm)
        #[arg(long)]
        hr_rest: Option<f64>,

        /// Starting guess for the heart rate ceiling (bpm)
        #[arg(long)]
        hr_max: Option<f64>,
    },

    /// Write a default configuration file (to --config when given)
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Time in zones
    Zones {
        file: PathBuf,

        /// Bucket heart rate instead of power
        #[arg(long)]
        heart_rate: bool,

        /// FTP in watts (overrides file and config)
        #[arg(long)]
        ftp: Option<f64>,

        /// LTHR in bpm (overrides file and config)
        #[arg(long)]
        lthr: Option<f64>,
    },
}

#[derive(Tabled)]
struct DurationRow {
    #[tabled(rename = "Duration (s)")]
    duration: usize,
    #[tabled(rename = "Power (W)")]
    power: String,
}

#[derive(Tabled)]
struct IntervalRow {
    #[tabled(rename = "#")]
    rank: usize,
    #[tabled(rename = "Start (s)")]
    start: String,
    #[tabled(rename = "End (s)")]
    end: String,
    #[tabled(rename = "Mean power (W)")]
    power: String,
}

#[derive(Tabled)]
struct ParameterRow {
    #[tabled(rename = "Parameter")]
    name: String,
    #[tabled(rename = "Value")]
    value: String,
}

#[derive(Tabled, Serialize)]
struct ZoneRow {
    #[tabled(rename = "Zone")]
    zone: String,
    #[tabled(rename = "Description")]
    description: String,
    #[tabled(rename = "Time (s)")]
    seconds: usize,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        match e.downcast_ref::<SweatError>() {
            Some(error) if error.severity() == ErrorSeverity::Warning => {
                eprintln!("{} {}", error.severity().label().yellow().bold(), error.user_message());
            }
            Some(error) => eprintln!("{} {}", error.severity().label().red().bold(), error.user_message()),
            None => eprintln!("{} {:#}", "error:".red().bold(), e),
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::InitConfig { force } = &cli.command {
        let path = cli.config.clone().unwrap_or_else(AppConfig::default_config_path);
        if path.exists() && !*force {
            anyhow::bail!("{} already exists, pass --force to overwrite it", path.display());
        }
        AppConfig::default().save_to_file(&path)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path)?,
        None => AppConfig::load_or_default(),
    };

    if cli.verbose > 0 {
        config.logging.level = LogLevel::from_verbosity(cli.verbose);
    }
    init_logging(&config.logging)?;

    match cli.command {
        Commands::MeanMax {
            file,
            monotonic,
            durations,
        } => {
            let workout = load_workout(&file, &config)?;
            let curve = workout.compute_mean_max_power(monotonic)?;

            if cli.json {
                return print_json(&curve);
            }

            let rows: Vec<DurationRow> = durations
                .into_iter()
                .filter(|&d| d >= 1 && d <= curve.len())
                .map(|d| DurationRow {
                    duration: d,
                    power: format!("{:.1}", curve[d - 1]),
                })
                .collect();

            println!("{}", "Mean-max power".green().bold());
            println!("{}", Table::new(rows).with(Style::rounded()));
        }

        Commands::Bests { file, duration, count } => {
            let workout = load_workout(&file, &config)?;
            let bests = workout.compute_mean_max_bests(duration, count)?;

            if cli.json {
                return print_json(&bests);
            }

            let rows: Vec<IntervalRow> = bests
                .iter()
                .enumerate()
                .map(|(i, best)| interval_row(i + 1, best, duration))
                .collect();

            println!("{}", format!("Best {} s intervals", duration).green().bold());
            println!("{}", Table::new(rows).with(Style::rounded()));
        }

        Commands::Wbal {
            file,
            cp,
            w_prime,
            algorithm,
            tau_dynamic,
            tau_value,
        } => {
            let mut workout = load_workout(&file, &config)?;
            workout.athlete.cp = cp.or(workout.athlete.cp);
            workout.athlete.w_prime = w_prime.or(workout.athlete.w_prime);

            let mut wbal_config = config.w_prime_balance.clone();
            if let Some(algorithm) = algorithm {
                wbal_config.algorithm = algorithm;
            }
            wbal_config.tau_dynamic |= tau_dynamic;
            if tau_value.is_some() {
                wbal_config.tau_value = tau_value;
            }

            let result = workout.compute_w_prime_balance(&wbal_config)?;

            if cli.json {
                return print_json(&result);
            }

            let w_prime = workout.athlete.require(Threshold::WPrime, "w_prime_balance")?;
            println!("{}", format!("W' balance ({})", result.algorithm).cyan().bold());
            println!("  Samples:          {}", result.balance.len());
            println!("  Minimum balance:  {:.0} J ({:.1}%)", result.min_balance, 100.0 * result.min_balance / w_prime);
            println!("  Time below zero:  {} s", result.time_below_zero);
            if let Some(last) = result.balance.last() {
                println!("  Final balance:    {:.0} J", last);
            }
            if result.time_below_zero > 0 {
                println!("{}", "  W' was exhausted; CP or W' may be underestimated".yellow());
            }
        }

        Commands::FitCp { file, model } => {
            let workout = load_workout(&file, &config)?;
            let curve = workout.compute_mean_max_power(false)?;
            let fitter = CriticalPowerFitter::with_config(config.critical_power.clone(), config.solver.clone());

            let kinds: Vec<CpModelKind> = match model.as_deref() {
                Some("all") => CpModelKind::ALL.to_vec(),
                Some(name) => vec![name.parse()?],
                None => vec![config.critical_power.default_model],
            };

            let mut fitted = Vec::new();
            for (kind, result) in fitter.fit_mean_max_many(&curve, &kinds) {
                match result {
                    Ok(model) => fitted.push(model),
                    Err(e) if kinds.len() > 1 => {
                        eprintln!("{} {}: {}", "skipped".yellow(), kind, e);
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            if cli.json {
                return print_json(&fitted);
            }

            for model in &fitted {
                println!("{}", format!("{} model", model.kind).blue().bold());
                let mut rows: Vec<ParameterRow> = model
                    .parameters
                    .iter()
                    .map(|(name, value)| ParameterRow {
                        name: name.clone(),
                        value: format!("{:.4}", value),
                    })
                    .collect();
                rows.push(ParameterRow {
                    name: "rmse".to_string(),
                    value: format!("{:.3}", model.rmse()),
                });
                println!("{}", Table::new(rows).with(Style::rounded()));
            }
        }

        Commands::FitHr { file, hr_rest, hr_max } => {
            let workout = load_workout(&file, &config)?;
            let fitter = HeartRateModelFitter::with_solver(config.solver.clone())
                .with_initial(initial_heart_rate_params(hr_rest, hr_max));
            let model = workout.compute_heartrate_model_with(&fitter)?;

            if cli.json {
                return print_json(&model);
            }

            println!("{}", "Heart rate model".magenta().bold());
            let mut rows: Vec<ParameterRow> = model
                .params
                .to_map()
                .into_iter()
                .map(|(name, value)| ParameterRow {
                    name,
                    value: format!("{:.6}", value),
                })
                .collect();
            rows.push(ParameterRow {
                name: "evaluations".to_string(),
                value: model.evaluations.to_string(),
            });
            println!("{}", Table::new(rows).with(Style::rounded()));
        }

        Commands::Zones {
            file,
            heart_rate,
            ftp,
            lthr,
        } => {
            let mut workout = load_workout(&file, &config)?;
            workout.athlete.ftp = ftp.or(workout.athlete.ftp);
            workout.athlete.lthr = lthr.or(workout.athlete.lthr);

            let (counts, names, descriptions): (Vec<usize>, &[&str], &[&str]) = if heart_rate {
                (
                    workout.compute_time_in_heart_rate_zones()?,
                    &HEART_RATE_ZONES_NAME[..],
                    &HEART_RATE_ZONES_DESC[..],
                )
            } else {
                (
                    workout.compute_time_in_power_zones()?,
                    &POWER_ZONES_NAME[..],
                    &POWER_ZONES_DESC[..],
                )
            };

            let rows: Vec<ZoneRow> = counts
                .iter()
                .zip(names.iter().zip(descriptions))
                .map(|(&seconds, (name, description))| ZoneRow {
                    zone: name.to_string(),
                    description: description.to_string(),
                    seconds,
                })
                .collect();

            if cli.json {
                return print_json(&rows);
            }

            let title = if heart_rate { "Time in heart rate zones" } else { "Time in power zones" };
            println!("{}", title.green().bold());
            println!("{}", Table::new(rows).with(Style::rounded()));
        }

        // Written before any configuration is loaded
        Commands::InitConfig { .. } => {}
    }

    Ok(())
}

/// Import a stream file and fill missing athlete thresholds from the config
fn load_workout(file: &Path, config: &AppConfig) -> Result<Workout> {
    let mut workout = ImportManager::new()
        .import_file(file)
        .with_context(|| format!("Failed to load {}", file.display()))?;

    workout.athlete.fill_missing(&config.athlete);

    if workout.stream(StreamKind::Power).is_none() {
        tracing::warn!(file = %file.display(), "workout has no power stream");
    }

    Ok(workout)
}

fn interval_row(rank: usize, best: &DataPoint, duration: usize) -> IntervalRow {
    match best.index {
        Some(end) => IntervalRow {
            rank,
            start: (end + 1).saturating_sub(duration).to_string(),
            end: end.to_string(),
            power: format!("{:.1}", best.value),
        },
        None => IntervalRow {
            rank,
            start: "-".to_string(),
            end: "-".to_string(),
            power: "-".to_string(),
        },
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn initial_heart_rate_params(hr_rest: Option<f64>, hr_max: Option<f64>) -> HeartRateModelParams {
    let defaults = HeartRateModelParams::default();
    HeartRateModelParams {
        hr_rest: hr_rest.unwrap_or(defaults.hr_rest),
        hr_max: hr_max.unwrap_or(defaults.hr_max),
        ..defaults
    }
}
