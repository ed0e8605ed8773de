//! The probe scenario: start a server, exercise hover, completion and
//! definition against one document, and report what worked.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

use anyhow::{Context, Result};
use lsprobe_lsp::protocol::{self, PublishDiagnosticsParams};
use lsprobe_lsp::{ClientOptions, LspClient, Notification, ServerConfig};
use tokio::time::Instant;

use crate::config::{ProbeSettings, TextPosition};

const STDERR_TAIL: usize = 20;
const FINAL_STDERR_TAIL: usize = 30;
const COMPLETION_PREVIEW: usize = 5;

/// Everything the scenario needs, resolved from config and flags.
#[derive(Debug)]
pub struct ProbePlan {
    pub root: PathBuf,
    pub file: PathBuf,
    pub language_id: String,
    pub hover: Option<TextPosition>,
    pub completion: Option<TextPosition>,
    pub definition: Option<TextPosition>,
    /// Opened at the diagnostics step; expected to produce diagnostics.
    pub diagnostics_file: Option<PathBuf>,
    pub settle: Duration,
    pub analysis: Duration,
}

impl ProbePlan {
    pub fn from_settings(settings: ProbeSettings) -> Result<Self> {
        let file = settings
            .file
            .context("no document to probe; pass --file or set probe.file")?;
        let root = match settings.root {
            Some(root) => root,
            None => std::env::current_dir().context("resolving working directory")?,
        };
        let language_id = settings
            .language_id
            .unwrap_or_else(|| language_id_for(&file).to_string());

        Ok(Self {
            root,
            file,
            language_id,
            hover: settings.hover,
            completion: settings.completion,
            definition: settings.definition,
            diagnostics_file: settings.diagnostics_file,
            settle: Duration::from_millis(settings.settle_ms),
            analysis: Duration::from_millis(settings.analysis_ms),
        })
    }
}

fn language_id_for(file: &Path) -> &'static str {
    match file.extension().and_then(|ext| ext.to_str()) {
        Some("kt" | "kts") => "kotlin",
        Some("rs") => "rust",
        Some("py") => "python",
        Some("ts") => "typescript",
        Some("tsx") => "typescriptreact",
        Some("js") => "javascript",
        Some("go") => "go",
        Some("java") => "java",
        Some("c" | "h") => "c",
        Some("cpp" | "cc" | "hpp") => "cpp",
        _ => "plaintext",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    Fail,
    /// Not attempted, or nothing to judge. Never fails the run.
    Skip,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::Pass => "PASS",
            Outcome::Fail => "FAIL",
            Outcome::Skip => "SKIP",
        })
    }
}

#[derive(Debug, Default)]
pub struct Report {
    results: Vec<(&'static str, Outcome)>,
    /// Every server stderr line seen during the run.
    stderr: Vec<String>,
    exit_status: Option<ExitStatus>,
}

impl Report {
    fn record(&mut self, feature: &'static str, outcome: Outcome) {
        self.results.push((feature, outcome));
    }

    pub fn results(&self) -> &[(&'static str, Outcome)] {
        &self.results
    }

    pub fn failed(&self) -> bool {
        self.results
            .iter()
            .any(|(_, outcome)| *outcome == Outcome::Fail)
    }

    #[cfg(test)]
    fn stderr(&self) -> &[String] {
        &self.stderr
    }

    /// Server exit code; `None` if it was killed or never reaped.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_status.and_then(|status| status.code())
    }

    fn print_summary(&self) {
        section("SUMMARY");
        for (feature, outcome) in self.results() {
            println!("  {feature}: {outcome}");
        }
    }
}

fn section(title: &str) {
    println!("\n{}", "=".repeat(60));
    println!("{title}");
    println!("{}", "=".repeat(60));
}

fn print_tail(label: &str, lines: &[String], limit: usize) {
    if lines.is_empty() {
        return;
    }
    println!("\n  [{label} - stderr]:");
    for line in &lines[lines.len().saturating_sub(limit)..] {
        println!("    {line}");
    }
}

/// A running server plus what has been learned from it so far.
struct Session {
    client: LspClient,
    report: Report,
    /// Size of the latest diagnostics set published per document URI.
    published: HashMap<String, usize>,
}

impl Session {
    fn new(client: LspClient) -> Self {
        Self {
            client,
            report: Report::default(),
            published: HashMap::new(),
        }
    }

    /// Print buffered stderr and consume queued notifications.
    ///
    /// Called after every request so the notification queue never backs up
    /// far enough to drop a `publishDiagnostics`.
    fn observe(&mut self, label: &str) {
        let lines = self.client.drain_diagnostics();
        print_tail(label, &lines, STDERR_TAIL);
        self.report.stderr.extend(lines);
        for notification in self.client.drain_notifications() {
            self.note(notification);
        }
    }

    fn note(&mut self, notification: Notification) {
        if notification.method != "textDocument/publishDiagnostics" {
            println!("  [notification: {}]", notification.method);
            return;
        }
        let Some(params) = notification.params else {
            return;
        };
        match serde_json::from_value::<PublishDiagnosticsParams>(params) {
            Ok(params) => {
                println!(
                    "  [diagnostics: {} for {}]",
                    params.diagnostics.len(),
                    params.uri
                );
                for diagnostic in &params.diagnostics {
                    println!(
                        "    {}:{} {}",
                        diagnostic.range.start.line + 1,
                        diagnostic.range.start.character + 1,
                        diagnostic.message
                    );
                }
                // Servers republish; the latest set replaces the earlier one.
                self.published.insert(params.uri, params.diagnostics.len());
            }
            Err(e) => tracing::debug!("unreadable publishDiagnostics: {e}"),
        }
    }

    /// Wait `total`, taking notifications as they arrive and printing
    /// stderr about once a second.
    async fn settle(&mut self, total: Duration, label: &str) {
        let start = Instant::now();
        let deadline = start + total;
        let step = Duration::from_secs(1);
        let mut tick = start + step;

        while Instant::now() < deadline {
            let wake = tick.min(deadline);
            let next = tokio::select! {
                biased;
                () = tokio::time::sleep_until(wake) => None,
                notification = self.client.next_notification() => Some(notification),
            };
            match next {
                None => {
                    let waited = Instant::now().duration_since(start).as_secs();
                    self.observe(&format!("{label} {waited}s"));
                    tick += step;
                }
                Some(Some(notification)) => self.note(notification),
                // Stream closed; nothing more will arrive.
                Some(None) => tokio::time::sleep_until(wake).await,
            }
        }
        self.observe(label);
    }

    /// Print the summary, shut the server down politely, then reap it and
    /// print what it left.
    async fn finish(self) -> Report {
        let Session {
            client, mut report, ..
        } = self;
        report.print_summary();

        if let Err(e) = client.shutdown().await {
            tracing::warn!("LSP shutdown failed: {e}");
        }

        section("FINAL STDERR");
        match client.close().await {
            Ok(exit) => {
                print_tail("final", exit.diagnostics(), FINAL_STDERR_TAIL);
                if exit.dropped_diagnostics() > 0 {
                    println!("  ({} stderr lines dropped)", exit.dropped_diagnostics());
                }
                println!("\nServer exited: {}", exit.status());
                report.stderr.extend_from_slice(exit.diagnostics());
                report.exit_status = Some(exit.status());
            }
            Err(e) => println!("\nServer did not exit cleanly: {e}"),
        }
        tracing::debug!(failed = report.failed(), exit_code = ?report.exit_code(), "run finished");
        report
    }
}

/// A document read from disk with its URI.
struct Document {
    path: PathBuf,
    uri: String,
    text: String,
}

impl Document {
    fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let path = path
            .canonicalize()
            .with_context(|| format!("resolving file {}", path.display()))?;
        let uri = protocol::path_to_file_uri(&path)?.to_string();
        Ok(Self { path, uri, text })
    }
}

pub async fn run(server: &ServerConfig, options: &ClientOptions, plan: &ProbePlan) -> Result<Report> {
    let document = Document::load(&plan.file)?;
    let error_document = plan
        .diagnostics_file
        .as_deref()
        .map(Document::load)
        .transpose()?;
    let root = plan
        .root
        .canonicalize()
        .with_context(|| format!("resolving root {}", plan.root.display()))?;
    let root_uri = protocol::path_to_file_uri(&root)?;
    let uri = document.uri.as_str();

    println!("Test file: {}", document.path.display());
    println!("Test URI: {uri}");
    println!("Root URI: {root_uri}");

    let client = LspClient::spawn(server, options)
        .with_context(|| format!("starting {}", server.command))?;
    let mut session = Session::new(client);

    section("1. INITIALIZE");
    let init = session
        .client
        .initialize(root_uri.as_str(), protocol::default_client_capabilities())
        .await;
    match init {
        Ok(init) => {
            if let Some(info) = &init.server_info {
                println!(
                    "  Server: {} {}",
                    info.name,
                    info.version.as_deref().unwrap_or("")
                );
            }
            let caps = &init.capabilities;
            println!("  Hover: {}", caps.hover());
            println!("  Completion: {}", caps.completion());
            println!("  Definition: {}", caps.definition());
            println!("  Rename: {}", caps.rename());
            session.report.record("initialize", Outcome::Pass);
            session.observe("after initialize");
        }
        Err(e) => {
            println!("  initialize failed: {e}");
            session.observe("after initialize");
            session.report.record("initialize", Outcome::Fail);
            return Ok(session.finish().await);
        }
    }

    section("2. INITIALIZED");
    if let Err(e) = session.client.initialized().await {
        println!("  initialized failed: {e}");
        session.observe("after initialized");
        session.report.record("initialized", Outcome::Fail);
        return Ok(session.finish().await);
    }
    session.settle(plan.settle, "startup").await;

    section("3. OPEN DOCUMENT");
    if let Err(e) = session
        .client
        .did_open(uri, &plan.language_id, 1, &document.text)
        .await
    {
        println!("  didOpen failed: {e}");
        session.observe("after didOpen");
        session.report.record("didOpen", Outcome::Fail);
        return Ok(session.finish().await);
    }
    session.settle(plan.analysis, "after didOpen").await;

    if let Some(at) = plan.hover {
        section(&format!("4. HOVER at {at}"));
        let outcome = match session.client.hover(uri, at.to_lsp()).await {
            Ok(Some(hover)) => {
                println!("  Content: {}", hover.text());
                Outcome::Pass
            }
            Ok(None) => {
                println!("  HOVER returned null");
                Outcome::Fail
            }
            Err(e) => {
                println!("  HOVER failed: {e}");
                Outcome::Fail
            }
        };
        session.report.record("hover", outcome);
        session.observe("after hover");
    } else {
        session.report.record("hover", Outcome::Skip);
    }

    if let Some(at) = plan.completion {
        section(&format!("5. COMPLETION at {at}"));
        let outcome = match session.client.completion(uri, at.to_lsp()).await {
            Ok(items) if !items.is_empty() => {
                println!("  Found {} items", items.len());
                for item in items.iter().take(COMPLETION_PREVIEW) {
                    let kind = item.kind.map_or_else(|| "?".to_string(), |k| k.to_string());
                    println!(
                        "    - {} (kind={kind}) {}",
                        item.label,
                        item.detail.as_deref().unwrap_or("")
                    );
                }
                Outcome::Pass
            }
            Ok(_) => {
                println!("  COMPLETION returned empty");
                Outcome::Fail
            }
            Err(e) => {
                println!("  COMPLETION failed: {e}");
                Outcome::Fail
            }
        };
        session.report.record("completion", outcome);
        session.observe("after completion");
    } else {
        session.report.record("completion", Outcome::Skip);
    }

    if let Some(at) = plan.definition {
        section(&format!("6. GO TO DEFINITION at {at}"));
        let outcome = match session.client.definition(uri, at.to_lsp()).await {
            Ok(locations) if !locations.is_empty() => {
                println!("  Found {} location(s)", locations.len());
                for location in &locations {
                    println!(
                        "    - {}:{}:{}",
                        location.uri,
                        location.range.start.line + 1,
                        location.range.start.character + 1
                    );
                }
                Outcome::Pass
            }
            Ok(_) => {
                println!("  DEFINITION returned null/empty");
                Outcome::Fail
            }
            Err(e) => {
                println!("  DEFINITION failed: {e}");
                Outcome::Fail
            }
        };
        session.report.record("definition", outcome);
        session.observe("after definition");
    } else {
        session.report.record("definition", Outcome::Skip);
    }

    section("7. DIAGNOSTICS");
    let outcome = match &error_document {
        Some(errors) => {
            println!("  Opening {}", errors.path.display());
            match session
                .client
                .did_open(&errors.uri, &plan.language_id, 1, &errors.text)
                .await
            {
                Ok(()) => {
                    session.settle(plan.analysis, "after didOpen").await;
                    match session.published.get(&errors.uri) {
                        Some(0) => {
                            println!("  no diagnostics for a file expected to have errors");
                            Outcome::Fail
                        }
                        Some(count) => {
                            println!("  {count} diagnostic(s) published for {}", errors.uri);
                            Outcome::Pass
                        }
                        None => {
                            println!("  nothing published for {}", errors.uri);
                            Outcome::Skip
                        }
                    }
                }
                Err(e) => {
                    println!("  didOpen failed: {e}");
                    Outcome::Fail
                }
            }
        }
        None => {
            session.observe("diagnostics");
            match session.published.get(uri) {
                Some(count) => {
                    println!("  {count} diagnostic(s) published for the document");
                    Outcome::Pass
                }
                None => {
                    println!("  no diagnostics published for the document");
                    Outcome::Skip
                }
            }
        }
    };
    session.report.record("diagnostics", outcome);

    Ok(session.finish().await)
}
