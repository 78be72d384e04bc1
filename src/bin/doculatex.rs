//! CLI binary for doculatex.
//!
//! A thin shim over the library crate: maps flags to `ConversionConfig`,
//! drives the trial gate and history through `LocalStore`, and prints
//! results.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use doculatex::binder::{ImagePayload, PlaceholderBinder};
use doculatex::convert::resolve_provider;
use doculatex::export::default_export_name;
use doculatex::pipeline::input::{sniff_mime, InputFile};
use doculatex::pipeline::llm::LlmBackend;
use doculatex::pipeline::raster::{crop_image, CropRect};
use doculatex::storage::{KeySource, API_KEY_ENV, MAX_TRIAL_USES};
use doculatex::{
    convert_and_record, export_docx, normalize, ConversionConfig, ConversionProgressCallback,
    DocuLatexError, LocalStore, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner plus one log line per file event. Files finish in any order.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading files…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_files: usize) {
        self.bar.set_prefix("Rendering");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Converting {total_files} file(s)…"))
        ));
    }

    fn on_file_rasterized(&self, file: &str, pages: usize) {
        self.bar.println(format!(
            "  {} {}  {}",
            green("✓"),
            file,
            dim(&format!("{pages} page image(s)"))
        ));
        self.bar.set_prefix("Converting");
        self.bar.set_message("waiting for the model…");
    }

    fn on_retry(&self, file: &str, attempt: u32, max_attempts: u32, error: &str) {
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {}  attempt {}/{} failed: {}",
            cyan("⚠"),
            file,
            attempt,
            max_attempts,
            red(&msg)
        ));
    }

    fn on_file_converted(&self, file: &str, text_len: usize) {
        self.bar.println(format!(
            "  {} {}  {}",
            green("✓"),
            file,
            dim(&format!("{text_len} chars"))
        ));
    }

    fn on_conversion_complete(&self, _total_files: usize, success: bool) {
        self.bar.finish_and_clear();
        if !success {
            eprintln!("{} conversion failed", red("✘"));
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert an exam, print the text
  doculatex convert exam.pdf

  # Convert and export to Word
  doculatex convert exam.pdf -o exam.docx

  # Several photos, one request each, joined in order
  doculatex convert page1.jpg page2.jpg --text exam.txt

  # Put figures back: a file for slot 1, a crop of page 2 for slot 2
  doculatex convert exam.pdf -o exam.docx --image 1=fig1.png --crop 2=2:120,340,600,400

  # Re-export a past conversion
  doculatex history list
  doculatex export 1717171717171abc -o old.docx

  # Clean up model output by hand
  doculatex normalize raw.txt

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (a key saved with `key set` wins)
  DOCULATEX_MODEL         Override model ID (default gemini-3-pro-preview)
  DOCULATEX_PROVIDER      Override provider (default gemini)
  DOCULATEX_DATA_DIR      Where history, trial counter and key are stored
  PDFIUM_LIB_PATH         Directory containing libpdfium

SETUP:
  1. Save API key:    doculatex key set AIza...
  2. Convert:         doculatex convert exam.pdf -o exam.docx

  Binding images (--image, --crop) needs an activated copy:
    doculatex activate <CODE>
"#;

/// Convert maths exams (PDF or photos) to text with inline LaTeX and to Word.
#[derive(Parser, Debug)]
#[command(
    name = "doculatex",
    version,
    about = "Convert maths exams to text with inline LaTeX and to Word",
    long_about = "Convert scanned maths documents (PDF, JPEG, PNG, WEBP, HEIC) to text in which \
every formula is written as ${...}$ and every figure as [[IMAGE]], using a vision model. \
Figures can then be bound back into their slots and the result exported as .docx.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory for history, trial counter and saved key.
    #[arg(long, global = true, env = "DOCULATEX_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCULATEX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCULATEX_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert files to canonical text; optionally bind images and export.
    Convert(ConvertArgs),

    /// Normalize raw model output from a file or stdin.
    Normalize {
        /// Input file; stdin when omitted.
        file: Option<PathBuf>,
    },

    /// Export a past conversion to .docx.
    Export {
        /// History entry id (see `history list`).
        id: String,

        /// Output path. Default: DocuLatex_<date>.docx.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Bind an image file to a slot: N=PATH.
        #[arg(long = "image", value_name = "N=PATH")]
        images: Vec<String>,
    },

    /// Browse or prune saved conversions.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Manage the saved API key.
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Unlock editing and unlimited conversions.
    Activate {
        code: String,
    },

    /// Show trial, activation and key status.
    Status,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// PDF or image files, converted in this order.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Export a .docx to this path.
    #[arg(short, long, env = "DOCULATEX_OUTPUT")]
    output: Option<PathBuf>,

    /// Write the canonical text to this file instead of stdout. Also honoured
    /// with --json.
    #[arg(long)]
    text: Option<PathBuf>,

    /// Print a JSON summary instead of the text.
    #[arg(long)]
    json: bool,

    /// Bind an image file to a slot: N=PATH.
    #[arg(long = "image", value_name = "N=PATH")]
    images: Vec<String>,

    /// Bind a crop of a rendered page to a slot: N=PAGE:X,Y,W,H.
    #[arg(long = "crop", value_name = "N=PAGE:X,Y,W,H")]
    crops: Vec<String>,

    /// Vision model ID.
    #[arg(long, env = "DOCULATEX_MODEL")]
    model: Option<String>,

    /// LLM provider name.
    #[arg(long, env = "DOCULATEX_PROVIDER")]
    provider: Option<String>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "DOCULATEX_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "DOCULATEX_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Page render scale (0.5–4.0).
    #[arg(long, env = "DOCULATEX_RENDER_SCALE", default_value_t = 1.5)]
    render_scale: f32,

    /// Maximum PDF pages sent per file.
    #[arg(long, env = "DOCULATEX_MAX_PAGES", default_value_t = 30)]
    max_pages: usize,

    /// Total attempts per file on transient server errors.
    #[arg(long, env = "DOCULATEX_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "DOCULATEX_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Per-file LLM call timeout in seconds.
    #[arg(long, env = "DOCULATEX_API_TIMEOUT", default_value_t = 180)]
    api_timeout: u64,

    /// Disable the progress spinner.
    #[arg(long, env = "DOCULATEX_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum HistoryAction {
    /// List saved conversions, newest first.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Print the text of one conversion.
    Show { id: String },
    /// Delete one conversion.
    Delete { id: String },
    /// Delete every saved conversion.
    Clear,
}

#[derive(Subcommand, Debug)]
enum KeyAction {
    /// Save a Gemini API key (must start with AIza).
    Set { key: String },
    /// Forget the saved key.
    Clear,
    /// Show which key would be used.
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner provides the feedback that matters; keep INFO logs out of
    // its way unless asked.
    let show_progress = match &cli.command {
        Command::Convert(args) => !cli.quiet && !args.no_progress && !args.json,
        _ => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let store = match &cli.data_dir {
        Some(dir) => LocalStore::open(dir),
        None => LocalStore::open_default(),
    }
    .context("Failed to open local data directory")?;

    tokio::runtime::Runtime::new()
        .context("Failed to start tokio runtime")?
        .block_on(run(cli, store, show_progress))
}

async fn run(cli: Cli, store: LocalStore, show_progress: bool) -> Result<()> {
    match cli.command {
        Command::Convert(args) => run_convert(args, &store, show_progress, cli.quiet).await,
        Command::Normalize { file } => run_normalize(file.as_deref()).await,
        Command::Export { id, output, images } => {
            let entry = store.history().get(&id)?;
            let mut binder = PlaceholderBinder::new(entry.markdown);
            if !images.is_empty() {
                require_activation(&store)?;
                binder.set_editable(true);
                for spec in &images {
                    let (ordinal, path) = parse_image_arg(spec)?;
                    bind(&mut binder, ordinal, read_image(&path).await?)?;
                }
            }
            let path = output.unwrap_or_else(|| PathBuf::from(default_export_name()));
            let written = export_docx(binder.text(), &binder.bindings(), &path)
                .await
                .context("Export failed")?;
            report_export(&written, &binder, cli.quiet);
            Ok(())
        }
        Command::History { action } => run_history(action, &store),
        Command::Key { action } => run_key(action, &store),
        Command::Activate { code } => {
            if store.license().activate(code.trim())? {
                eprintln!("{} Activated. Editing and unlimited conversions unlocked.", green("✔"));
                Ok(())
            } else {
                bail!("Activation code is not valid")
            }
        }
        Command::Status => {
            let state = store.license().state()?;
            println!("Data dir:     {}", store.dir().display());
            println!("Activated:    {}", state.activated);
            match state.remaining() {
                Some(left) => println!(
                    "Trial:        {}/{} used, {} left",
                    state.count, MAX_TRIAL_USES, left
                ),
                None => println!("Trial:        unlimited"),
            }
            print_key_status(&store)?;
            Ok(())
        }
    }
}

async fn run_convert(
    args: ConvertArgs,
    store: &LocalStore,
    show_progress: bool,
    quiet: bool,
) -> Result<()> {
    // Binding needs activation; fail before spending a trial use.
    if !args.images.is_empty() || !args.crops.is_empty() {
        require_activation(store)?;
    }

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let saved_key = store.credentials().stored()?;
    let config = build_config(&args, saved_key, progress).await?;

    let mut files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        files.push(InputFile::from_path(path).await.map_err(friendly)?);
    }

    let provider = resolve_provider(&config).map_err(friendly)?;
    let backend = LlmBackend::new(
        provider,
        config.temperature,
        config.max_tokens,
        Duration::from_secs(config.api_timeout_secs),
    );
    let recorded = convert_and_record(store, &backend, &files, &config)
        .await
        .map_err(friendly)?;
    let output = &recorded.output;

    // ── Text output ──────────────────────────────────────────────────────
    let summary = if args.json {
        Some(serde_json::json!({
            "output": output,
            "history_id": recorded.history_id,
            "usage_state": recorded.usage_state,
        }))
    } else {
        None
    };
    emit_text(
        &mut io::stdout().lock(),
        &output.text,
        summary.as_ref(),
        args.text.as_deref(),
    )
    .await?;

    if !quiet && !args.json {
        eprintln!(
            "{}  {} file(s)  {} page(s)  {} image slot(s)  {}ms",
            green("✔"),
            output.stats.files,
            output.stats.pages_sent,
            output.stats.placeholders,
            output.stats.total_duration_ms,
        );
        if output.stats.pages_skipped > 0 {
            eprintln!(
                "   {} page(s) past the page limit were not converted",
                cyan(&output.stats.pages_skipped.to_string())
            );
        }
        eprintln!(
            "   {} tokens in  /  {} tokens out",
            dim(&output.usage.prompt_tokens.to_string()),
            dim(&output.usage.response_tokens.to_string()),
        );
        if let Some(left) = recorded.usage_state.remaining() {
            eprintln!("   {} free conversion(s) left", bold(&left.to_string()));
        }
    }

    // ── Binding + export ─────────────────────────────────────────────────
    let mut binder = PlaceholderBinder::new(output.text.clone());
    if !args.images.is_empty() || !args.crops.is_empty() {
        binder.set_editable(true);
        for spec in &args.images {
            let (ordinal, path) = parse_image_arg(spec)?;
            bind(&mut binder, ordinal, read_image(&path).await?)?;
        }
        for spec in &args.crops {
            let (ordinal, page, rect) = parse_crop_arg(spec)?;
            let source = page
                .checked_sub(1)
                .and_then(|i| output.pages.get(i))
                .with_context(|| {
                    format!("page {page} does not exist ({} rendered)", output.pages.len())
                })?;
            bind(&mut binder, ordinal, crop_image(&source.data, rect)?)?;
        }
    }

    let export_path = match (&args.output, binder.bindings().is_empty()) {
        (Some(path), _) => Some(path.clone()),
        (None, false) => Some(PathBuf::from(default_export_name())),
        (None, true) => None,
    };
    if let Some(path) = export_path {
        let written = export_docx(binder.text(), &binder.bindings(), &path)
            .await
            .context("Export failed")?;
        report_export(&written, &binder, quiet || args.json);
    }

    Ok(())
}

async fn run_normalize(file: Option<&Path>) -> Result<()> {
    let raw = match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };
    println!("{}", normalize(&raw));
    Ok(())
}

fn run_history(action: HistoryAction, store: &LocalStore) -> Result<()> {
    let log = store.history();
    match action {
        HistoryAction::List { json } => {
            let entries = log.list()?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&entries).context("Failed to serialise history")?
                );
                return Ok(());
            }
            if entries.is_empty() {
                eprintln!("{}", dim("No saved conversions."));
            }
            for e in entries {
                let when = e
                    .local_time()
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!(
                    "{}  {}  {}  {}",
                    cyan(&e.id),
                    dim(&when),
                    bold(&e.file_name),
                    dim(&format!("{} chars", e.markdown.chars().count()))
                );
            }
        }
        HistoryAction::Show { id } => println!("{}", log.get(&id)?.markdown),
        HistoryAction::Delete { id } => {
            log.delete(&id)?;
            eprintln!("{} Deleted {}", green("✔"), id);
        }
        HistoryAction::Clear => {
            log.clear()?;
            eprintln!("{} History cleared", green("✔"));
        }
    }
    Ok(())
}

fn run_key(action: KeyAction, store: &LocalStore) -> Result<()> {
    let creds = store.credentials();
    match action {
        KeyAction::Set { key } => {
            creds.set(&key).map_err(friendly)?;
            eprintln!("{} API key saved", green("✔"));
        }
        KeyAction::Clear => {
            creds.clear()?;
            eprintln!("{} API key removed", green("✔"));
        }
        KeyAction::Status => print_key_status(store)?,
    }
    Ok(())
}

fn print_key_status(store: &LocalStore) -> Result<()> {
    match store.credentials().resolve()? {
        Some((key, source)) => println!(
            "API key:      {} ({})",
            mask_key(&key),
            match source {
                KeySource::Stored => "saved",
                KeySource::Environment => API_KEY_ENV,
            }
        ),
        None => println!("API key:      {}", red("not set")),
    }
    Ok(())
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Map CLI args to `ConversionConfig`.
async fn build_config(
    args: &ConvertArgs,
    saved_key: Option<String>,
    progress: Option<ProgressCallback>,
) -> Result<ConversionConfig> {
    let system_prompt = if let Some(ref path) = args.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let mut builder = ConversionConfig::builder()
        .render_scale(args.render_scale)
        .max_pages(args.max_pages)
        .max_attempts(args.max_attempts)
        .temperature(args.temperature)
        .api_timeout_secs(args.api_timeout);

    if let Some(ref model) = args.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(key) = saved_key {
        builder = builder.api_key(key);
    }
    if let Some(ref password) = args.password {
        builder = builder.password(password);
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Write the canonical text to `text_path` when given, then print either
/// the JSON summary or, with no text file, the text itself.
async fn emit_text<W: Write>(
    out: &mut W,
    text: &str,
    summary: Option<&serde_json::Value>,
    text_path: Option<&Path>,
) -> Result<()> {
    if let Some(path) = text_path {
        tokio::fs::write(path, text)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    if let Some(summary) = summary {
        let json = serde_json::to_string_pretty(summary).context("Failed to serialise output")?;
        writeln!(out, "{json}").context("Failed to write to stdout")?;
    } else if text_path.is_none() {
        out.write_all(text.as_bytes())
            .context("Failed to write to stdout")?;
        if !text.ends_with('\n') {
            out.write_all(b"\n").ok();
        }
    }
    Ok(())
}

/// Attach the localised message to a library error.
fn friendly(e: DocuLatexError) -> anyhow::Error {
    let hint = format!("[{}] {}", e.tag(), e.user_message());
    anyhow::Error::new(e).context(hint)
}

fn require_activation(store: &LocalStore) -> Result<()> {
    if !store.license().is_activated()? {
        return Err(friendly(DocuLatexError::EditingLocked));
    }
    Ok(())
}

fn bind(binder: &mut PlaceholderBinder, ordinal: usize, payload: ImagePayload) -> Result<()> {
    if !binder.bind_image(ordinal, payload) {
        bail!(
            "image slot {} does not exist (the text has {})",
            ordinal,
            binder.placeholder_count()
        );
    }
    Ok(())
}

async fn read_image(path: &Path) -> Result<ImagePayload> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read image {}", path.display()))?;
    let mime = sniff_mime(&bytes)
        .filter(|m| m.starts_with("image/"))
        .with_context(|| format!("{} is not an image", path.display()))?;
    Ok(ImagePayload::new(mime, bytes))
}

fn report_export(path: &Path, binder: &PlaceholderBinder, quiet: bool) {
    if quiet {
        return;
    }
    let missing = binder.unbound().len();
    eprintln!(
        "{}  →  {}{}",
        green("✔"),
        bold(&path.display().to_string()),
        if missing > 0 {
            dim(&format!("  ({missing} image slot(s) left empty)"))
        } else {
            String::new()
        }
    );
}

fn mask_key(key: &str) -> String {
    let visible: String = key.chars().take(6).collect();
    format!("{visible}…")
}

/// Parse `N=PATH`.
fn parse_image_arg(s: &str) -> Result<(usize, PathBuf)> {
    let (n, path) = s
        .split_once('=')
        .with_context(|| format!("expected N=PATH, got '{s}'"))?;
    let n = parse_ordinal(n)?;
    if path.trim().is_empty() {
        bail!("missing path in '{s}'");
    }
    Ok((n, PathBuf::from(path.trim())))
}

/// Parse `N=PAGE:X,Y,W,H`.
fn parse_crop_arg(s: &str) -> Result<(usize, usize, CropRect)> {
    let (n, rest) = s
        .split_once('=')
        .with_context(|| format!("expected N=PAGE:X,Y,W,H, got '{s}'"))?;
    let (page, rect) = rest
        .split_once(':')
        .with_context(|| format!("expected PAGE:X,Y,W,H, got '{rest}'"))?;
    let nums = rect
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<u32>()
                .with_context(|| format!("invalid crop value '{}'", v.trim()))
        })
        .collect::<Result<Vec<_>>>()?;
    let &[x, y, width, height] = nums.as_slice() else {
        bail!("crop needs exactly four values X,Y,W,H, got '{rect}'");
    };
    let page: usize = page
        .trim()
        .parse()
        .with_context(|| format!("invalid page '{page}'"))?;
    if page < 1 {
        bail!("Pages are 1-indexed, minimum is 1 (got {page})");
    }
    Ok((
        parse_ordinal(n)?,
        page,
        CropRect {
            x,
            y,
            width,
            height,
        },
    ))
}

fn parse_ordinal(s: &str) -> Result<usize> {
    let n: usize = s
        .trim()
        .parse()
        .with_context(|| format!("invalid image slot '{}'", s.trim()))?;
    if n < 1 {
        bail!("Image slots are 1-indexed, minimum is 1 (got {n})");
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_arg() {
        let (n, p) = parse_image_arg("3=figs/a.png").unwrap();
        assert_eq!(n, 3);
        assert_eq!(p, PathBuf::from("figs/a.png"));
        assert!(parse_image_arg("0=a.png").is_err());
        assert!(parse_image_arg("a.png").is_err());
    }

    #[test]
    fn crop_arg() {
        let (n, page, rect) = parse_crop_arg("2=1:10,20,300,200").unwrap();
        assert_eq!((n, page), (2, 1));
        assert_eq!(
            rect,
            CropRect {
                x: 10,
                y: 20,
                width: 300,
                height: 200
            }
        );
        assert!(parse_crop_arg("2=1:10,20,300").is_err());
        assert!(parse_crop_arg("2=0:1,1,1,1").is_err());
    }

    #[tokio::test]
    async fn json_summary_still_writes_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let summary = serde_json::json!({ "history_id": "abc" });
        let mut stdout = Vec::new();

        emit_text(&mut stdout, "Câu 1. ${x}$", Some(&summary), Some(&path))
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Câu 1. ${x}$");
        let printed: serde_json::Value = serde_json::from_slice(&stdout).unwrap();
        assert_eq!(printed["history_id"], "abc");
    }

    #[tokio::test]
    async fn plain_text_goes_to_stdout_without_text_file() {
        let mut stdout = Vec::new();
        emit_text(&mut stdout, "a", None, None).await.unwrap();
        assert_eq!(stdout, b"a\n");
    }
}
