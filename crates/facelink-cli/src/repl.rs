//! REPL – the interactive FaceLink shell.
//!
//! Supported slash-commands:
//!   /help            – show this list
//!   /settings        – interactively edit `~/.facelink/config.toml`
//!   /connections     – probe the configured services
//!   /serve           – start the relay server and the HTTP gateway
//!   /watch <dir>     – run live recognition over the images in `<dir>`
//!   /unwatch         – stop live recognition
//!   /interval [ms]   – show presets or change the capture cadence
//!   /results         – print the latest recognition snapshot
//!   /connect         – open a relay session
//!   /ask <text>      – send a question over the relay session
//!   /reconnect       – restart the relay connection sequence
//!   /disconnect      – close the relay session
//!   /quit | /exit    – stop everything and exit

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use facelink_capture::{
    CaptureScheduler, CaptureSnapshot, DirectorySource, INTERVAL_PRESETS, RecognitionClient,
};
use facelink_gateway::{GatewayConfig, GatewayServer};
use facelink_relay::{
    QueryClient, QueryDispatcher, RelayServer, RelaySession, SessionConfig, SessionEvent,
    WsConnector,
};
use facelink_types::{RecognitionResult, RelayMessage, SessionState};

use crate::config::{self, Config};
use crate::probe;

// ─────────────────────────────────────────────────────────────────────────────
// Command parsing
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Settings,
    Connections,
    Serve,
    Watch(String),
    Unwatch,
    /// `None` lists the presets.
    Interval(Option<u64>),
    Results,
    Connect,
    Ask(String),
    Reconnect,
    Disconnect,
    Quit,
}

impl Command {
    /// Parse one input line.  `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Command>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((h, r)) => (h, r.trim()),
            None => (line, ""),
        };

        let cmd = match head {
            "/help" => Command::Help,
            "/settings" => Command::Settings,
            "/connections" => Command::Connections,
            "/serve" => Command::Serve,
            "/watch" if rest.is_empty() => return Err("usage: /watch <dir>".to_string()),
            "/watch" => Command::Watch(rest.to_string()),
            "/unwatch" => Command::Unwatch,
            "/interval" if rest.is_empty() => Command::Interval(None),
            "/interval" => Command::Interval(Some(parse_interval(rest)?)),
            "/results" => Command::Results,
            "/connect" => Command::Connect,
            "/ask" if rest.is_empty() => return Err("usage: /ask <text>".to_string()),
            "/ask" => Command::Ask(rest.to_string()),
            "/reconnect" => Command::Reconnect,
            "/disconnect" => Command::Disconnect,
            "/quit" | "/exit" => Command::Quit,
            other => return Err(format!("unknown command '{other}'")),
        };
        Ok(Some(cmd))
    }
}

/// Milliseconds, or a preset label such as `fast` or `very-fast`.
fn parse_interval(raw: &str) -> Result<u64, String> {
    if let Ok(ms) = raw.parse::<u64>() {
        if ms == 0 {
            return Err("interval must be greater than 0".to_string());
        }
        return Ok(ms);
    }
    let wanted = normalize_label(raw);
    INTERVAL_PRESETS
        .iter()
        .find(|(label, _)| normalize_label(label) == wanted)
        .map(|(_, ms)| *ms)
        .ok_or_else(|| format!("'{raw}' is neither a number of milliseconds nor a preset"))
}

fn normalize_label(label: &str) -> String {
    label
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Shell state
// ─────────────────────────────────────────────────────────────────────────────

struct Capture {
    scheduler: CaptureScheduler,
    printer: JoinHandle<()>,
}

struct Relay {
    session: Arc<RelaySession>,
    printer: JoinHandle<()>,
}

struct Shell {
    rt: Runtime,
    cfg: Config,
    capture: Option<Capture>,
    relay: Option<Relay>,
    servers: Vec<JoinHandle<()>>,
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(rt: Runtime, cfg: Config, shutdown: Arc<AtomicBool>) {
    let mut editor = match DefaultEditor::new() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("{}: {}", "Terminal error".red(), e);
            return;
        }
    };
    let mut shell = Shell {
        rt,
        cfg,
        capture: None,
        relay: None,
        servers: Vec::new(),
    };

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let line = match editor.readline(&format!("{} ", "facelink>".bold().cyan())) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
                break;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };
        let _ = editor.add_history_entry(line.as_str());

        match Command::parse(&line) {
            Ok(None) => {}
            Ok(Some(Command::Quit)) => break,
            Ok(Some(cmd)) => shell.execute(cmd, &mut editor),
            Err(e) => println!(
                "{} {}. Type {} for available commands.",
                "Error:".red(),
                e,
                "/help".bold()
            ),
        }
    }

    shell.shutdown();
    println!("{}", "Goodbye.".green());
}

impl Shell {
    fn execute(&mut self, cmd: Command, editor: &mut DefaultEditor) {
        match cmd {
            Command::Help => cmd_help(),
            Command::Settings => self.cmd_settings(editor),
            Command::Connections => self.cmd_connections(),
            Command::Serve => self.cmd_serve(),
            Command::Watch(dir) => self.cmd_watch(&dir),
            Command::Unwatch => self.cmd_unwatch(),
            Command::Interval(ms) => self.cmd_interval(ms),
            Command::Results => self.cmd_results(),
            Command::Connect => self.cmd_connect(),
            Command::Ask(text) => self.cmd_ask(&text),
            Command::Reconnect => self.cmd_reconnect(),
            Command::Disconnect => self.cmd_disconnect(),
            Command::Quit => {}
        }
    }

    /// Stop capture, close the relay session and stop any servers.
    fn shutdown(mut self) {
        if self.capture.is_some() {
            self.cmd_unwatch();
        }
        if self.relay.is_some() {
            self.cmd_disconnect();
        }
        for server in self.servers.drain(..) {
            server.abort();
        }
        self.rt.shutdown_timeout(Duration::from_secs(1));
        info!("shell stopped");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Configuration
    // ─────────────────────────────────────────────────────────────────────

    fn cmd_settings(&mut self, editor: &mut DefaultEditor) {
        let mut cfg = self.cfg.clone();
        println!("{}", "Settings Editor".bold().underline());
        println!("  (press Enter to keep the current value)");

        cfg.recognition_url = prompt_str(editor, "  Recognition URL", &cfg.recognition_url);
        cfg.register_url = prompt_str(editor, "  Register URL   ", &cfg.register_url);
        cfg.query_url = prompt_str(editor, "  Query URL      ", &cfg.query_url);
        cfg.relay_url = prompt_str(editor, "  Relay URL      ", &cfg.relay_url);
        cfg.relay_port = prompt_parsed(editor, "  Relay port     ", cfg.relay_port);
        cfg.gateway_port = prompt_parsed(editor, "  Gateway port   ", cfg.gateway_port);
        cfg.interval_ms = prompt_parsed(editor, "  Interval (ms)  ", cfg.interval_ms);
        cfg.similarity_threshold =
            prompt_parsed(editor, "  Similarity     ", cfg.similarity_threshold);
        cfg.max_faces = prompt_parsed(editor, "  Max faces      ", cfg.max_faces);
        cfg.max_results = prompt_parsed(editor, "  Max results    ", cfg.max_results);

        if let Err(e) = cfg.validate() {
            println!("{}: {} – settings not changed", "Invalid settings".red(), e);
            return;
        }
        match config::save(&cfg) {
            Ok(()) => println!(
                "{} {}",
                "✓ Settings saved to".green(),
                config::config_path().display().to_string().bold()
            ),
            Err(e) => println!("{}: {}", "Error saving config".red(), e),
        }
        if let Some(capture) = &self.capture
            && capture.scheduler.set_interval(cfg.interval_ms).is_ok()
        {
            println!("  Capture interval now {} ms.", cfg.interval_ms);
        }
        self.cfg = cfg;
        println!("  URL and port changes apply to the next /watch, /connect or /serve.");
    }

    fn cmd_connections(&self) {
        println!("{}", "Connection Diagnostics".bold().underline());
        let checks = [
            ("Recognition service", probe::http(&self.cfg.recognition_url)),
            ("Query service", probe::http(&self.cfg.query_url)),
            ("Relay", probe::tcp(&self.cfg.relay_url)),
        ];
        for (name, reach) in checks {
            print_reachability(name, &reach);
        }

        match &self.relay {
            Some(relay) => println!("  Relay session: {}", relay.session.state().to_string().bold()),
            None => println!("  Relay session: {}", "none".dimmed()),
        }
        match &self.capture {
            Some(c) => println!(
                "  Capture: {} every {} ms",
                c.scheduler.source_id().bold(),
                c.scheduler.interval_ms()
            ),
            None => println!("  Capture: {}", "stopped".dimmed()),
        }
        println!("  Local servers running: {}", self.servers.len());
    }

    // ─────────────────────────────────────────────────────────────────────
    // Servers
    // ─────────────────────────────────────────────────────────────────────

    fn cmd_serve(&mut self) {
        if !self.servers.is_empty() {
            println!("{}", "Servers already running.".yellow());
            return;
        }

        let backend = match QueryClient::new(self.cfg.query_url.clone()) {
            Ok(c) => c,
            Err(e) => {
                println!("{}: {}", "Query client error".red(), e);
                return;
            }
        };
        let dispatcher = Arc::new(QueryDispatcher::new(Arc::new(backend)));
        let relay = RelayServer::new(dispatcher).with_port(self.cfg.relay_port);
        let gateway = GatewayServer::new(GatewayConfig {
            addr: ([0, 0, 0, 0], self.cfg.gateway_port).into(),
            recognition_url: self.cfg.recognition_url.clone(),
            register_url: self.cfg.register_url.clone(),
        });

        let bound = self
            .rt
            .block_on(async { (relay.bind().await, gateway.bind().await) });
        match bound {
            (Ok(relay), Ok(gateway)) => {
                println!(
                    "  {} Relay server on {}",
                    "✓".green(),
                    format!("ws://{}", relay.local_addr()).bold()
                );
                println!(
                    "  {} Gateway on {}",
                    "✓".green(),
                    format!("http://{}/api", gateway.local_addr()).bold()
                );
                self.servers.push(self.rt.spawn(relay.serve()));
                self.servers.push(self.rt.spawn(async move {
                    if let Err(e) = gateway.serve().await {
                        warn!(error = %e, "gateway stopped");
                    }
                }));
            }
            (relay, gateway) => {
                for err in [relay.err(), gateway.err()].into_iter().flatten() {
                    println!("{}: {}", "Cannot start server".red(), err);
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Live recognition
    // ─────────────────────────────────────────────────────────────────────

    fn cmd_watch(&mut self, dir: &str) {
        if self.capture.is_some() {
            println!(
                "{} Run {} first.",
                "Capture already running.".yellow(),
                "/unwatch".bold()
            );
            return;
        }

        let source = match DirectorySource::open(dir) {
            Ok(s) => s,
            Err(e) => {
                println!("{}: {}", "Cannot open source".red(), e);
                return;
            }
        };
        let frames = source.len();
        let recognizer = match RecognitionClient::new(self.cfg.recognition_url.clone()) {
            Ok(c) => c,
            Err(e) => {
                println!("{}: {}", "Recognition client error".red(), e);
                return;
            }
        };
        let schedule = match self.cfg.schedule() {
            Ok(s) => s,
            Err(e) => {
                println!("{}: {}", "Config error".red(), e);
                return;
            }
        };

        let scheduler = CaptureScheduler::new(
            Arc::new(source),
            Arc::new(recognizer),
            self.cfg.recognition_params(),
            schedule,
        );
        let printer = self.rt.spawn(print_cycles(scheduler.subscribe()));
        {
            let _guard = self.rt.enter();
            scheduler.start();
        }

        println!(
            "  {} Watching {} ({} image(s)) every {} ms",
            "✓".green(),
            dir.bold(),
            frames,
            scheduler.interval_ms()
        );
        self.capture = Some(Capture { scheduler, printer });
    }

    fn cmd_unwatch(&mut self) {
        match self.capture.take() {
            Some(capture) => {
                capture.scheduler.stop();
                capture.printer.abort();
                let snap = capture.scheduler.snapshot();
                println!(
                    "  {} Capture stopped ({} completed, {} failed, {} skipped).",
                    "✓".green(),
                    snap.completed_cycles,
                    snap.failed_cycles,
                    snap.skipped_ticks
                );
            }
            None => println!("{}", "Capture is not running.".yellow()),
        }
    }

    fn cmd_interval(&mut self, ms: Option<u64>) {
        let Some(ms) = ms else {
            let current = self
                .capture
                .as_ref()
                .map_or(self.cfg.interval_ms, |c| c.scheduler.interval_ms());
            println!("{}", "Capture interval presets".bold().underline());
            for (label, preset) in INTERVAL_PRESETS {
                let marker = if preset == current { "▶" } else { " " };
                println!("  {} {:<10} {} ms", marker.green(), label, preset);
            }
            return;
        };

        if let Some(capture) = &self.capture
            && let Err(e) = capture.scheduler.set_interval(ms)
        {
            println!("{}: {}", "Error".red(), e);
            return;
        }
        self.cfg.interval_ms = ms;
        println!("  {} Capture interval set to {} ms", "✓".green(), ms);
    }

    fn cmd_results(&self) {
        let Some(capture) = &self.capture else {
            println!("{}", "Capture is not running.".yellow());
            return;
        };
        let snap = capture.scheduler.snapshot();
        println!("{}", "Recognition".bold().underline());
        println!(
            "  run #{}  {}{}",
            snap.run_id,
            if snap.active { "active".green() } else { "stopped".dimmed() },
            if snap.processing { "  (processing…)" } else { "" }
        );
        for line in snapshot_lines(&snap) {
            println!("  {line}");
        }
        if let Some(err) = &snap.error {
            println!("  {} {}", "last error:".red(), err);
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Relay session
    // ─────────────────────────────────────────────────────────────────────

    fn cmd_connect(&mut self) {
        if let Some(relay) = &self.relay {
            println!(
                "{} ({}). Use {} or {}.",
                "Session already open".yellow(),
                relay.session.state(),
                "/reconnect".bold(),
                "/disconnect".bold()
            );
            return;
        }

        let connector = Arc::new(WsConnector::new(self.cfg.relay_url.clone()));
        let (session, events) = {
            let _guard = self.rt.enter();
            RelaySession::connect(connector, SessionConfig::default())
        };
        let printer = self.rt.spawn(print_events(events));
        println!("  Connecting to {} …", self.cfg.relay_url.bold());
        self.relay = Some(Relay {
            session: Arc::new(session),
            printer,
        });
    }

    fn cmd_ask(&self, text: &str) {
        let Some(relay) = &self.relay else {
            println!("{} Run {} first.", "No relay session.".yellow(), "/connect".bold());
            return;
        };
        if let Err(e) = relay.session.send_query(text) {
            println!(
                "{}: {} (session is {})",
                "Cannot send".red(),
                e,
                relay.session.state()
            );
        }
    }

    fn cmd_reconnect(&self) {
        match &self.relay {
            Some(relay) => match relay.session.reconnect() {
                Ok(()) => println!("  Reconnecting …"),
                Err(e) => println!("{}: {}", "Cannot reconnect".red(), e),
            },
            None => println!("{} Run {} first.", "No relay session.".yellow(), "/connect".bold()),
        }
    }

    fn cmd_disconnect(&mut self) {
        let Some(relay) = self.relay.take() else {
            println!("{}", "No relay session.".yellow());
            return;
        };
        let session = Arc::clone(&relay.session);
        self.rt.block_on(async move { session.close().await });
        // The printer drains the remaining events and ends with the channel.
        let printer = relay.printer;
        let drained = self
            .rt
            .block_on(async { tokio::time::timeout(Duration::from_secs(1), printer).await });
        if drained.is_err() {
            warn!("relay event printer did not finish");
        }
        println!("  {} Relay session closed.", "✓".green());
    }
}

fn cmd_help() {
    println!();
    println!("{}", "FaceLink Commands".bold().underline());
    let rows = [
        ("/settings", "edit ~/.facelink/config.toml settings"),
        ("/connections", "probe recognition, query and relay services"),
        ("/serve", "start the relay server and the HTTP gateway"),
        ("/watch <dir>", "live recognition over the images in <dir>"),
        ("/unwatch", "stop live recognition"),
        ("/interval [ms]", "list presets or change the capture cadence"),
        ("/results", "show the latest recognition results"),
        ("/connect", "open a relay session"),
        ("/ask <text>", "ask the answering service"),
        ("/reconnect", "restart the relay connection"),
        ("/disconnect", "close the relay session"),
        ("/quit  /exit", "exit the CLI"),
    ];
    for (cmd, what) in rows {
        println!("  {:<16} – {}", cmd.bold().cyan(), what);
    }
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Background printers
// ─────────────────────────────────────────────────────────────────────────────

async fn print_cycles(mut rx: tokio::sync::watch::Receiver<CaptureSnapshot>) {
    let mut seen = (0u64, 0u64);
    while rx.changed().await.is_ok() {
        let snap = rx.borrow_and_update().clone();
        let counters = (snap.completed_cycles, snap.failed_cycles);
        if counters == seen || !snap.active {
            continue;
        }
        seen = counters;
        match &snap.error {
            Some(err) => println!("\n  {} {}", "✗".red(), err),
            None => {
                for line in snapshot_lines(&snap) {
                    println!("\n  {line}");
                }
            }
        }
    }
}

async fn print_events(mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::State(state) => {
                let label = state.to_string();
                let label = match state {
                    SessionState::Connected => label.green(),
                    SessionState::Connecting => label.yellow(),
                    SessionState::Disconnected => label.dimmed(),
                    SessionState::Failed => label.red(),
                };
                println!("\n  relay: {label}");
            }
            SessionEvent::Message(msg) => print_message(&msg),
            SessionEvent::QueryFailed { query, reason } => {
                println!("\n  {} '{}': {}", "Query lost".red(), query, reason);
            }
        }
    }
}

fn print_message(msg: &RelayMessage) {
    match msg {
        RelayMessage::System(text) => println!("\n  {} {}", "[system]".cyan(), text),
        RelayMessage::Processing => println!("\n  {}", "… processing".dimmed()),
        RelayMessage::Answer { text, sources } => {
            println!("\n  {} {}", "▶".green(), text);
            for source in sources {
                println!("    {} {}", "source:".dimmed(), source.content.dimmed());
            }
        }
        RelayMessage::Error(text) => println!("\n  {} {}", "[error]".red(), text),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Formatting
// ─────────────────────────────────────────────────────────────────────────────

fn snapshot_lines(snap: &CaptureSnapshot) -> Vec<String> {
    if snap.results.is_empty() {
        return vec!["no faces".to_string()];
    }
    snap.results.iter().map(describe_result).collect()
}

/// One plain-text line per face, e.g.
/// `[09:30:05Z] face 1: Ada (91%) | also: Bob (70%)`.
///
/// The stamp is when the response was aggregated, in UTC.
pub(crate) fn describe_result(result: &RecognitionResult) -> String {
    let stamp = result.captured_at.format("%H:%M:%SZ");
    let mut line = match &result.best {
        Some(best) if result.recognized => format!(
            "[{stamp}] face {}: {} ({:.0}%)",
            result.face_id,
            best.name,
            best.similarity * 100.0
        ),
        _ => format!("[{stamp}] face {}: unknown", result.face_id),
    };
    if !result.alternates.is_empty() {
        let alts: Vec<String> = result
            .alternates
            .iter()
            .map(|c| format!("{} ({:.0}%)", c.name, c.similarity * 100.0))
            .collect();
        line.push_str(" | also: ");
        line.push_str(&alts.join(", "));
    }
    line
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn print_reachability(name: &str, reach: &probe::Reachability) {
    match reach {
        probe::Reachability::Online(Some(status)) => println!(
            "  {} {} {} {}",
            "🟢".green(),
            name.bold(),
            "online".green(),
            format!("(HTTP {status})").dimmed()
        ),
        probe::Reachability::Online(None) => {
            println!("  {} {} {}", "🟢".green(), name.bold(), "online".green())
        }
        probe::Reachability::Offline(reason) => println!(
            "  {} {} {}  {}",
            "🔴".red(),
            name.bold(),
            "offline".red(),
            reason.dimmed()
        ),
    }
}

/// Prompt for a string value.  Returns `default` on Enter or interrupt.
fn prompt_str(editor: &mut DefaultEditor, label: &str, default: &str) -> String {
    match editor.readline(&format!("{label} [{default}]: ")) {
        Ok(line) if !line.trim().is_empty() => line.trim().to_string(),
        _ => default.to_string(),
    }
}

/// Prompt for any parseable value, keeping `default` on bad input.
fn prompt_parsed<T>(editor: &mut DefaultEditor, label: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    let raw = prompt_str(editor, label, &default.to_string());
    match raw.parse::<T>() {
        Ok(v) => v,
        Err(_) => {
            println!(
                "  {} '{}' is not valid here, keeping {}",
                "Warning:".yellow(),
                raw,
                default
            );
            default
        }
    }
}
