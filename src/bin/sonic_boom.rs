use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use tracing::warn;

use sonic_boom_engine::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use sonic_boom_engine::{
    standard_atmosphere, BoomConfig, BoomReport, BoomSolver, NearFieldSignature, NearFieldTable, SyntheticNWave,
};

#[derive(Parser)]
#[command(name = "sonic-boom")]
#[command(version = "0.1.0")]
#[command(about = "Sonic boom propagation from near-field signature to the ground", long_about = None)]
struct Cli {
    /// Log level (RUST_LOG overrides)
    #[arg(long, global = true, default_value = "warn")]
    log_level: LogLevel,

    /// Log line layout
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Module filter directives, e.g. "sonic_boom_engine::propagation=trace"
    #[arg(long, global = true)]
    log_filter: Option<String>,

    /// Errors only
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Per-ray stage events, with worker thread names
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Propagate near-field signatures to the ground
    Propagate {
        /// JSON configuration file; flags below override it
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,

        /// Flight altitude (m)
        #[arg(long)]
        altitude: Option<f64>,

        /// Mach number
        #[arg(short = 'm', long)]
        mach: Option<f64>,

        /// Azimuths in degrees, comma separated (0 = undertrack)
        #[arg(short = 'a', long, value_delimiter = ',', allow_negative_numbers = true)]
        azimuths: Option<Vec<f64>>,

        /// Near-field probe radius from the flight axis (m)
        #[arg(short = 'r', long)]
        radius: Option<f64>,

        /// Near-field traces (JSON); without it a synthetic N-wave is used
        #[arg(long)]
        near_field: Option<PathBuf>,

        /// Synthetic N-wave peak overpressure (Pa)
        #[arg(long, default_value = "50.0")]
        peak: f64,

        /// Synthetic N-wave duration (s)
        #[arg(long, default_value = "0.2")]
        duration: f64,

        /// Synthetic N-wave sample count
        #[arg(long, default_value = "201")]
        points: usize,

        /// Compute near-field sensitivities of ∫p² dt
        #[arg(long)]
        sensitivities: bool,

        /// Worker threads (default: all cores)
        #[arg(long)]
        threads: Option<usize>,

        /// Output format
        #[arg(short = 'o', long, default_value = "table")]
        output: OutputFormat,

        /// Print every ground signal sample in table output
        #[arg(long)]
        full: bool,
    },

    /// Print the standard atmosphere
    Atmosphere {
        /// Top altitude (m)
        #[arg(long, default_value = "20000.0")]
        top: f64,

        /// Altitude step (m)
        #[arg(long, default_value = "1000.0")]
        step: f64,

        /// Output format
        #[arg(short = 'o', long, default_value = "table")]
        output: OutputFormat,
    },

    /// Display engine information
    Info,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
    Table,
}

#[derive(Debug, Serialize)]
struct AtmosphereRow {
    altitude_m: f64,
    temperature_k: f64,
    pressure_pa: f64,
    density_kg_m3: f64,
    sound_speed_mps: f64,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(&log_config(&cli));

    match cli.command {
        Commands::Propagate {
            config, altitude, mach, azimuths, radius, near_field,
            peak, duration, points, sensitivities, threads, output, full,
        } => {
            configure_thread_pool(threads)?;

            let mut boom_config = match config {
                Some(path) => BoomConfig::from_json(&fs::read_to_string(path)?)?,
                None => BoomConfig::default(),
            };
            if let Some(h) = altitude {
                boom_config.flight.altitude_m = h;
            }
            if let Some(m) = mach {
                boom_config.flight.mach = m;
            }
            if let Some(list) = azimuths {
                boom_config.fan.azimuths_deg = Some(list);
            }
            if let Some(r) = radius {
                boom_config.fan.radius_m = r;
            }
            boom_config.settings.compute_sensitivities |= sensitivities;

            let solver = BoomSolver::new(boom_config)?;
            let report = match near_field {
                Some(path) => solver.run(&load_near_field(&path)?)?,
                None => {
                    let wave = SyntheticNWave::from_duration(peak, duration, points, solver.flight_speed());
                    solver.run(&wave)?
                }
            };

            display_report(&report, output, full)?;
        }

        Commands::Atmosphere { top, step, output } => {
            if !(step > 0.0) {
                return Err("altitude step must be positive".into());
            }
            let mut rows = Vec::new();
            let mut h = 0.0;
            while h <= top + 1e-9 {
                let s = standard_atmosphere(h)?;
                rows.push(AtmosphereRow {
                    altitude_m: h,
                    temperature_k: s.temperature_k,
                    pressure_pa: s.pressure_pa,
                    density_kg_m3: s.density_kg_m3,
                    sound_speed_mps: s.sound_speed_mps,
                });
                h += step;
            }
            display_atmosphere(&rows, output)?;
        }

        Commands::Info => {
            println!("╔════════════════════════════════════════╗");
            println!("║      SONIC BOOM ENGINE v0.1.0          ║");
            println!("╠════════════════════════════════════════╣");
            println!("║ Near-field to ground sonic boom        ║");
            println!("║ propagation.                           ║");
            println!("╠════════════════════════════════════════╣");
            println!("║ Features:                              ║");
            println!("║ • 1976 standard or tabulated atmosphere║");
            println!("║ • Ray tracing with ray-tube areas      ║");
            println!("║ • Nonlinear steepening, shock merging  ║");
            println!("║ • Near-field sensitivities             ║");
            println!("╚════════════════════════════════════════╝");
        }
    }

    Ok(())
}

fn log_config(cli: &Cli) -> LogConfig {
    let mut config = if cli.quiet {
        LogConfig::quiet()
    } else if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig { level: cli.log_level, ..Default::default() }
    };
    if let Some(format) = cli.log_format {
        config.format = format;
    }
    config.filter = cli.log_filter.clone();
    config
}

/// Size the global rayon pool; a failure leaves the default pool in place
fn configure_thread_pool(threads: Option<usize>) -> Result<(), Box<dyn Error>> {
    if let Some(n) = threads {
        if n == 0 {
            return Err("thread count must be greater than 0".into());
        }
        if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(n).build_global() {
            warn!("failed to set {n} threads, using default threading: {e}");
        }
    }
    Ok(())
}

/// A table of traces, or a single trace used for every azimuth
fn load_near_field(path: &PathBuf) -> Result<NearFieldTable, Box<dyn Error>> {
    let text = fs::read_to_string(path)?;
    if let Ok(table) = serde_json::from_str::<NearFieldTable>(&text) {
        return Ok(table);
    }
    let single: NearFieldSignature = serde_json::from_str(&text)?;
    Ok(NearFieldTable { signatures: vec![single] })
}

fn display_report(report: &BoomReport, format: OutputFormat, full: bool) -> Result<(), Box<dyn Error>> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }

        OutputFormat::Csv => {
            println!("azimuth_deg,time_s,pressure_pa");
            for ground in &report.signatures {
                for (t, p) in ground.signal.time_s.iter().zip(&ground.signal.pressure_pa) {
                    println!("{:.2},{:.6},{:.4}", ground.azimuth_deg, t, p);
                }
            }
        }

        OutputFormat::Table => {
            for ground in &report.signatures {
                let m = &ground.metrics;
                println!("╔════════════════════════════════════════╗");
                println!("║ AZIMUTH {:>7.2}°                       ║", ground.azimuth_deg);
                println!("╠════════════════════════════════════════╣");
                println!("║ Ground point x:  {:>10.1} m          ║", ground.ground_x_m);
                println!("║ Ground point y:  {:>10.1} m          ║", ground.ground_y_m);
                println!("║ Arrival time:    {:>10.3} s          ║", ground.arrival_time_s);
                println!("║ Peak pressure:   {:>10.3} Pa         ║", m.p_max_pa);
                println!("║ Min pressure:    {:>10.3} Pa         ║", m.p_min_pa);
                println!("║ Rise pressure:   {:>10.3} Pa         ║", m.p_rise_pa);
                println!("║ Rise time:       {:>10.6} s          ║", m.rise_time_s);
                println!("║ Duration:        {:>10.4} s          ║", m.duration_s);
                println!("║ ∫p² dt:          {:>10.4} Pa²s       ║", m.p_int2);
                println!("║ Segments:        {:>5} -> {:<5}        ║", ground.segments_initial, ground.segments_final);
                println!("╚════════════════════════════════════════╝");

                if full {
                    println!("┌──────────────┬──────────────┐");
                    println!("│   Time (s)   │ Pressure(Pa) │");
                    println!("├──────────────┼──────────────┤");
                    for (t, p) in ground.signal.time_s.iter().zip(&ground.signal.pressure_pa) {
                        println!("│ {:>12.6} │ {:>12.4} │", t, p);
                    }
                    println!("└──────────────┴──────────────┘");
                }
            }
            for caustic in &report.caustics {
                println!("warning: {caustic}");
            }
            for failure in &report.failures {
                println!("failed: {failure}");
            }
        }
    }

    Ok(())
}

fn display_atmosphere(rows: &[AtmosphereRow], format: OutputFormat) -> Result<(), Box<dyn Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(rows)?),
        OutputFormat::Csv => {
            println!("altitude_m,temperature_k,pressure_pa,density_kg_m3,sound_speed_mps");
            for r in rows {
                println!(
                    "{:.1},{:.3},{:.2},{:.6},{:.3}",
                    r.altitude_m, r.temperature_k, r.pressure_pa, r.density_kg_m3, r.sound_speed_mps
                );
            }
        }
        OutputFormat::Table => {
            println!("┌──────────┬──────────┬────────────┬──────────┬──────────┐");
            println!("│  Alt (m) │   T (K)  │   p (Pa)   │ ρ(kg/m³) │  a (m/s) │");
            println!("├──────────┼──────────┼────────────┼──────────┼──────────┤");
            for r in rows {
                println!(
                    "│ {:>8.0} │ {:>8.2} │ {:>10.1} │ {:>8.4} │ {:>8.2} │",
                    r.altitude_m, r.temperature_k, r.pressure_pa, r.density_kg_m3, r.sound_speed_mps
                );
            }
            println!("└──────────┴──────────┴────────────┴──────────┴──────────┘");
        }
    }
    Ok(())
}
