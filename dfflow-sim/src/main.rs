mod sim;

use std::path::PathBuf;
use std::process;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use sim::SimConfig;

/// Initialize tracing with DFFLOW_LOG and LOG_FORMAT support.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let base_level = match std::env::var("DFFLOW_LOG").as_deref() {
            Ok("trace") => "trace",
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };

        EnvFilter::new(format!(
            "dfflow={level},dfflow_sim={level}",
            level = base_level
        ))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

struct Args {
    config: Option<PathBuf>,
    triggers: Option<u64>,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let args = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("Usage: dfflow-sim [--config <file.json>] [--triggers <n>]");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --config <file>  JSON config with optional relay, monitor and sim sections");
            eprintln!("  --triggers <n>   Number of trigger decisions to admit [default: 200]");
            process::exit(2);
        }
    };

    init_tracing();
    tracing::info!("dfflow-sim {}", dfflow::DFFLOW_VERSION);

    if let Err(e) = run(args) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut parsed = Args {
        config: None,
        triggers: None,
    };

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                parsed.config = Some(PathBuf::from(
                    args.get(i).ok_or("--config requires a value")?,
                ));
            }
            "--triggers" => {
                i += 1;
                let value = args.get(i).ok_or("--triggers requires a value")?;
                parsed.triggers = Some(
                    value
                        .parse()
                        .map_err(|_| format!("invalid trigger count: {value}"))?,
                );
            }
            "--help" | "-h" => return Err(String::new()),
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }

    Ok(parsed)
}

fn run(args: Args) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            SimConfig::from_json(&text)?
        }
        None => SimConfig::default(),
    };
    if let Some(triggers) = args.triggers {
        config.sim.triggers = triggers;
    }

    let rt = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    let report = rt.block_on(sim::run(config))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
