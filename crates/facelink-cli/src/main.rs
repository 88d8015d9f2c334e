//! `facelink` – FaceLink command line interface.
//!
//! 1. Checks for `~/.facelink/config.toml`; runs a **First-Run Wizard** when
//!    the file is absent.
//! 2. Probes the recognition, query and relay services.
//! 3. Drops the user into an **interactive REPL** that drives live
//!    recognition, the relay session and the local servers.
//! 4. Intercepts **Ctrl-C** to stop capture and close the relay session.

mod config;
mod probe;
mod repl;
mod telemetry;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

fn main() {
    let _telemetry = telemetry::init_tracing("facelink");

    print_banner();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    // Only fires outside line editing; the editor reports its own interrupt.
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!(
            "{}",
            "⚠  Ctrl-C received – stopping capture and closing the relay …"
                .yellow()
                .bold()
        );
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => run_first_run_wizard(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    // ── Service discovery ─────────────────────────────────────────────────
    println!();
    report("Recognition service", &cfg.recognition_url, probe::http(&cfg.recognition_url));
    report("Query service", &cfg.query_url, probe::http(&cfg.query_url));
    report("Relay", &cfg.relay_url, probe::tcp(&cfg.relay_url));

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("facelink-worker")
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Cannot start async runtime".red(), e);
            std::process::exit(1);
        }
    };

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(runtime, cfg, shutdown);
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║      FaceLink First-Run Wizard       ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up FaceLink.\n");

    let defaults = config::Config::default();

    // A single host serves recognition, registration and queries by default.
    let base_url = prompt_line(
        "  Face service base URL [http://localhost:8000]: ",
        "http://localhost:8000",
    );
    let relay_url = prompt_line(
        &format!("  Relay WebSocket URL [{}]: ", defaults.relay_url),
        &defaults.relay_url,
    );

    println!("  Capture interval:");
    for (i, (label, ms)) in facelink_capture::INTERVAL_PRESETS.iter().enumerate() {
        println!("    {}) {:<10} {} ms", i + 1, label, ms);
    }
    let preset = prompt_line("  Enter choice [2]: ", "2");

    let cfg = config_from_answers(&WizardAnswers {
        base_url,
        relay_url,
        preset,
    });
    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }

    // The file keeps the operator's answers; FACELINK_* still wins at runtime.
    let mut effective = cfg;
    config::apply_env_overrides(&mut effective);
    effective
}

struct WizardAnswers {
    base_url: String,
    relay_url: String,
    /// 1-based index into `INTERVAL_PRESETS`.
    preset: String,
}

fn config_from_answers(answers: &WizardAnswers) -> config::Config {
    let mut cfg = config::Config::default();
    let base = answers.base_url.trim().trim_end_matches('/');
    cfg.recognition_url = format!("{base}/recognize-face");
    cfg.register_url = format!("{base}/register-face");
    cfg.query_url = format!("{base}/query");
    cfg.relay_url = answers.relay_url.trim().to_string();

    if let Some((_, ms)) = answers
        .preset
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| facelink_capture::INTERVAL_PRESETS.get(i))
    {
        cfg.interval_ms = *ms;
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ____                __   _       __  "#.bold().cyan());
    println!("{}", r#"  / __/__ ________ _ / /  (_)__  / /__"#.bold().cyan());
    println!("{}", r#" / _// _ `/ __/ -_) / /__/ / _ \/  '_/"#.bold().cyan());
    println!("{}", r#"/_/  \_,_/\__/\__/ /____/_/_//_/_/\_\ "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "FaceLink".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Live face recognition and question relay");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn report(name: &str, url: &str, reach: probe::Reachability) {
    match reach {
        probe::Reachability::Online(_) => {
            println!("  {} at {} … {}", name, url.dimmed(), "online".green())
        }
        probe::Reachability::Offline(_) => {
            println!("  {} at {} … {}", name, url.dimmed(), "offline".yellow())
        }
    }
}

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
