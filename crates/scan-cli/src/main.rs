mod play;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use scan_runner::{run_verification, Session, TaskConfig, VerificationReport};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = ".scan/task.yaml";

#[derive(Parser)]
#[command(name = "scan", version = "0.1.0", about = "Baggage screening task CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Play {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long, default_value = ".scan")]
        out: PathBuf,
        #[arg(long)]
        participant: Option<String>,
    },
    Verify {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        trials: Option<u32>,
        #[arg(long)]
        json: bool,
    },
    Describe {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    Report {
        results: PathBuf,
        #[arg(long)]
        json: bool,
    },
    Init {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        path: PathBuf,
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", err.to_string(), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

// Explicit path wins, then `.scan/task.yaml` if present, then defaults.
fn resolve_config(path: Option<&Path>) -> Result<TaskConfig> {
    if let Some(path) = path {
        return Ok(TaskConfig::load(path)?);
    }
    let default_path = Path::new(DEFAULT_CONFIG_PATH);
    if default_path.exists() {
        return Ok(TaskConfig::load(default_path)?);
    }
    Ok(TaskConfig::default())
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Play {
            config,
            seed,
            out,
            participant,
        } => {
            let cfg = resolve_config(config.as_deref())?;
            let mut session = Session::new(cfg, make_rng(seed))?;
            // Verification draws from its own stream so it never shifts the bags.
            let mut verify_rng = make_rng(seed.map(|s| s.wrapping_add(1)));
            let opts = play::PlayOptions {
                out_dir: out,
                participant,
                seed,
            };
            let stdin = std::io::stdin();
            let mut input = stdin.lock();
            let mut output = std::io::stdout();
            let exports =
                play::run_interactive(&mut session, &mut verify_rng, &mut input, &mut output, &opts)?;
            for export in exports {
                println!("session_id: {}", export.session_id);
                println!("results: {}", export.results_path.display());
                println!("manifest: {}", export.manifest_path.display());
            }
        }
        Commands::Verify {
            config,
            seed,
            trials,
            json,
        } => {
            let cfg = resolve_config(config.as_deref())?;
            let trials = trials.unwrap_or(cfg.verification_trials);
            if trials == 0 {
                return Err(anyhow::anyhow!("--trials must be > 0"));
            }
            let mut rng = make_rng(seed);
            let report = run_verification(
                trials,
                cfg.threat_probability,
                cfg.advisor_error_rate,
                &mut rng,
            );
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "verify",
                    "seed": seed,
                    "verification": verification_to_json(&report)
                })));
            }
            print_verification(&report);
        }
        Commands::Describe { config, json } => {
            let cfg = resolve_config(config.as_deref())?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "config": serde_json::to_value(&cfg)?
                })));
            }
            print_config(&cfg);
        }
        Commands::Report { results, json } => {
            let records = scan_analysis::read_results_csv(&results)?;
            let summary = scan_analysis::summarize(&records);
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "report",
                    "results": results.display().to_string(),
                    "rows": records.len(),
                    "summary": serde_json::to_value(&summary)?
                })));
            }
            println!("results: {}", results.display());
            println!("rows: {}", records.len());
            print!("{}", scan_analysis::render_summary(&summary));
        }
        Commands::Init { path, force } => {
            if !force && path.exists() {
                return Err(anyhow::anyhow!(
                    "config file already exists (use --force): {}",
                    path.display()
                ));
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, CONFIG_TEMPLATE)?;
            println!("wrote: {}", path.display());
            println!("next: scan describe --config {}", path.display());
            println!("next: scan play --config {}", path.display());
        }
    }
    Ok(None)
}

const CONFIG_TEMPLATE: &str = "\
# Baggage screening task configuration. Every field is optional.
rounds: 10                 # decisions per session
min_safe_items: 4          # safe items per bag, lower bound
max_safe_items: 8          # must not exceed the safe_items vocabulary
threat_probability: 0.4    # chance a bag carries one threat item
advisor_error_rate: 0.15   # chance the AI advice is wrong
points_per_correct: 10
verification_trials: 10000
safe_items: [\"👕\", \"👖\", \"👗\", \"👟\", \"🎩\", \"💻\", \"📷\", \"📚\", \"🧸\", \"🥪\", \"🕶️\"]
threat_items: [\"🔫\", \"🔪\", \"💣\", \"🧨\", \"🩸\", \"☠️\"]
# study:
#   title: ''
#   researcher: ''
#   supervisor: ''
#   ethics_reference: ''
";

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Verify { json, .. }
        | Commands::Describe { json, .. }
        | Commands::Report { json, .. } => *json,
        _ => false,
    }
}

fn verification_to_json(report: &VerificationReport) -> Value {
    json!({
        "trials": report.trials,
        "threats": report.threats,
        "advisor_correct": report.advisor_correct,
        "reliability": report.reliability(),
        "threat_rate": report.threat_rate(),
        "hits": report.hits,
        "misses": report.misses,
        "false_alarms": report.false_alarms,
        "correct_rejections": report.correct_rejections,
    })
}

fn print_verification(report: &VerificationReport) {
    println!("trials: {}", report.trials);
    println!("ai_reliability: {:.2}%", report.reliability() * 100.0);
    println!("threat_rate: {:.2}%", report.threat_rate() * 100.0);
    println!("hits: {}", report.hits);
    println!("misses: {}", report.misses);
    println!("false_alarms: {}", report.false_alarms);
    println!("correct_rejections: {}", report.correct_rejections);
}

fn print_config(cfg: &TaskConfig) {
    println!("rounds: {}", cfg.rounds);
    println!(
        "safe_items_per_bag: {}..={}",
        cfg.min_safe_items, cfg.max_safe_items
    );
    println!("threat_probability: {}", cfg.threat_probability);
    println!("advisor_error_rate: {}", cfg.advisor_error_rate);
    println!("points_per_correct: {}", cfg.points_per_correct);
    println!("max_score: {}", cfg.max_score());
    println!("verification_trials: {}", cfg.verification_trials);
    println!("safe_items: {}", cfg.safe_items.join(" "));
    println!("threat_items: {}", cfg.threat_items.join(" "));
    if let Some(title) = &cfg.study.title {
        println!("study: {}", title);
    }
}
