//! CLI binary for studydesk.
//!
//! A thin shim over the library crate that maps CLI flags to `StudyConfig`,
//! drives the intake session and prints results.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use studydesk::pipeline::encode::encode_png;
use studydesk::pipeline::input::{resolve_input, InputKind, ResolvedInput};
use studydesk::pipeline::postprocess::{structure, AnswerLine};
use studydesk::{
    Assistant, Connectivity, IntakeProgressCallback, IntakeSession, Language, NoteStore,
    ProgressCallback, RasterInfo, SavedNote, StudyConfig, UpdateChecker, UpdateStatus,
};
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

/// Renders a live bar while PDF pages are rasterised.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        // Stays hidden until a PDF intake starts; image inputs never show it.
        Arc::new(Self {
            bar: ProgressBar::hidden(),
        })
    }
}

impl IntakeProgressCallback for CliProgressCallback {
    fn on_intake_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} pages  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        self.bar.set_draw_target(ProgressDrawTarget::stderr());
        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Rasterizing");
        self.bar.enable_steady_tick(Duration::from_millis(80));
    }

    fn on_page_rasterized(&self, page_num: usize, _total: usize, width: u32, height: u32) {
        self.bar.set_message(dim(&format!("page {page_num}: {width}x{height}")));
        self.bar.inc(1);
    }

    fn on_intake_complete(&self, width: u32, height: u32) {
        self.bar.finish_and_clear();
        eprintln!("{} composite {}", green("✔"), bold(&format!("{width}x{height}")));
    }

    fn on_intake_error(&self, _error: &str) {
        // The error itself is reported by main.
        self.bar.finish_and_clear();
    }

    fn on_intake_cancelled(&self) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Explain a PDF chapter
  studydesk explain chapter3.pdf

  # Ask something specific, answer in Hindi, save the answer as a note
  studydesk --language hi explain notes.jpg -p "Summarise the key formulas" --save

  # Treat a photo as a camera capture and ask follow-ups
  studydesk explain --camera board.jpg -f "What does the arrow mean?"

  # Text-only question
  studydesk explain -p "What is osmosis?"

  # Build the composite only and look at it
  studydesk intake lecture.pdf -o lecture.png

  # Manage saved notes
  studydesk notes list
  studydesk notes show 3
  studydesk notes delete 3
  studydesk notes ask 3 "Why does water move that way?"

  # Check for a newer release
  studydesk check-update --endpoint https://my-app-default-rtdb.firebaseio.com

LIMITS (per intake):
  at most 50 PDF pages, pages wider than 1536 px are scaled down,
  stacked height ≤ 30 000 px, composite ≤ 100 MB

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (default provider)
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  STUDYDESK_LLM_PROVIDER  Override provider (gemini, openai, anthropic, ollama)
  STUDYDESK_MODEL         Override model ID
  PDFIUM_LIB_PATH         Directory or file of an existing libpdfium
"#;

/// Explain study material with a vision LLM and keep the answers as notes.
#[derive(Parser, Debug)]
#[command(
    name = "studydesk",
    version,
    about = "Explain photos, images and PDFs of study material with a vision LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Answer language (code or name: en, hi, ml, es, fr, de, it, ja, ko, zh).
    #[arg(short, long, global = true, env = "STUDYDESK_LANGUAGE", default_value = "en",
          value_parser = parse_language)]
    language: Language,

    /// SQLite file for saved notes.
    #[arg(long, global = true, env = "STUDYDESK_DB", default_value = "studydesk.db")]
    db: PathBuf,

    /// Output JSON instead of text.
    #[arg(long, global = true, env = "STUDYDESK_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "STUDYDESK_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "STUDYDESK_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "STUDYDESK_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Explain a photo, image or PDF (or answer a text-only question).
    Explain(ExplainArgs),
    /// Build the composite raster and write it as PNG, without calling a model.
    Intake(IntakeArgs),
    /// List, show, delete or ask about saved notes.
    #[command(subcommand)]
    Notes(NotesCommand),
    /// Check whether a newer release is published.
    CheckUpdate(UpdateArgs),
    /// List supported answer languages.
    Languages,
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Local file path or HTTP/HTTPS URL of a PDF or image.
    input: Option<String>,

    /// Treat the image as a camera capture.
    #[arg(long)]
    camera: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "STUDYDESK_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Maximum PDF pages per intake.
    #[arg(long, env = "STUDYDESK_MAX_PAGES", default_value_t = 50)]
    max_pages: usize,
}

#[derive(Args, Debug)]
struct ExplainArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Question about the material. Default: "Explain what's in this document".
    #[arg(short, long)]
    prompt: Option<String>,

    /// Follow-up question asked after the explanation (repeatable).
    #[arg(short, long = "follow-up")]
    follow_up: Vec<String>,

    /// Save the explanation as a note.
    #[arg(short, long)]
    save: bool,

    #[command(flatten)]
    model: ModelArgs,
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// LLM model ID (e.g. gemini-2.5-flash, gpt-4.1-mini).
    #[arg(long, env = "STUDYDESK_MODEL")]
    model: Option<String>,

    /// LLM provider: gemini, openai, anthropic, ollama.
    #[arg(long, env = "STUDYDESK_PROVIDER")]
    provider: Option<String>,

    /// Max LLM output tokens.
    #[arg(long, env = "STUDYDESK_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "STUDYDESK_TEMPERATURE", default_value_t = 0.4)]
    temperature: f32,

    /// Generation call timeout in seconds.
    #[arg(long, env = "STUDYDESK_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// URL probed before contacting the model; any 2xx means online.
    #[arg(long, env = "STUDYDESK_PROBE_URL",
          default_value = "https://clients3.google.com/generate_204")]
    probe_url: String,

    /// Skip the connectivity check.
    #[arg(long)]
    offline_ok: bool,
}

#[derive(Args, Debug)]
struct IntakeArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Where to write the composite PNG.
    #[arg(short, long, default_value = "composite.png")]
    output: PathBuf,
}

#[derive(Subcommand, Debug)]
enum NotesCommand {
    /// List notes, newest first.
    List,
    /// Print one note.
    Show { id: i64 },
    /// Delete one note.
    Delete { id: i64 },
    /// Print the list again every time it changes (Ctrl-C to stop).
    Watch,
    /// Ask a question about a saved note.
    Ask {
        id: i64,
        question: String,
        #[command(flatten)]
        model: ModelArgs,
    },
}

#[derive(Args, Debug)]
struct UpdateArgs {
    /// Realtime database base URL holding `app_updates/latest`.
    #[arg(long, env = "STUDYDESK_UPDATE_ENDPOINT")]
    endpoint: String,

    /// Version code of this build.
    #[arg(long, env = "STUDYDESK_VERSION_CODE", default_value_t = 1)]
    version_code: u32,
}

fn parse_language(s: &str) -> std::result::Result<Language, String> {
    Language::parse(s).ok_or_else(|| {
        let known: Vec<&str> = Language::ALL.iter().map(|l| l.code()).collect();
        format!("unknown language '{s}' (expected one of {})", known.join(", "))
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Library INFO logs would fight with the progress bar; keep them quiet
    // unless asked for.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    match &cli.command {
        Command::Explain(args) => run_explain(&cli, args, show_progress).await,
        Command::Intake(args) => run_intake(&cli, args, show_progress).await,
        Command::Notes(cmd) => run_notes(&cli, cmd).await,
        Command::CheckUpdate(args) => run_check_update(&cli, args).await,
        Command::Languages => {
            for l in Language::ALL {
                println!("{}  {}", l.code(), l.name());
            }
            Ok(())
        }
    }
}

async fn run_explain(cli: &Cli, args: &ExplainArgs, show_progress: bool) -> Result<()> {
    let config = build_config(cli, Some(&args.model), Some(&args.source), show_progress)?;
    let assistant = connect_assistant(&config, &args.model).await?;
    let session = IntakeSession::from_config(&config);

    let explanation = match args.source.input {
        Some(ref input) => {
            select_source(&session, input, &args.source).await?;
            assistant
                .explain_selection(&session, args.prompt.as_deref())
                .await
                .context("Explanation failed")?
        }
        None => {
            if args.prompt.as_deref().map_or(true, |p| p.trim().is_empty()) {
                bail!("Give an input file or URL, or a --prompt for a text-only question");
            }
            assistant
                .explain(None, args.prompt.as_deref())
                .await
                .context("Explanation failed")?
        }
    };

    let mut follow_ups = Vec::with_capacity(args.follow_up.len());
    for question in &args.follow_up {
        let answer = assistant
            .follow_up(&explanation.answer, question)
            .await
            .with_context(|| format!("Follow-up failed: {question}"))?;
        follow_ups.push((question.clone(), answer));
    }

    let saved_id = if args.save {
        let store = NoteStore::open(&cli.db).context("Failed to open note store")?;
        Some(assistant.save_note(&store, &explanation).context("Failed to save note")?)
    } else {
        None
    };

    if cli.json {
        let follow_json: Vec<_> = follow_ups
            .iter()
            .map(|(q, a)| serde_json::json!({ "question": q, "answer": a }))
            .collect();
        let out = serde_json::json!({
            "explanation": explanation,
            "follow_ups": follow_json,
            "saved_note_id": saved_id,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&out).context("Failed to serialise output")?
        );
        return Ok(());
    }

    print_answer(&explanation.answer)?;
    for (question, answer) in &follow_ups {
        println!();
        println!("{} {}", cyan("?"), bold(question));
        print_answer(answer)?;
    }

    if !cli.quiet {
        eprintln!(
            "   {} tokens in  /  {} tokens out  ·  {}ms",
            dim(&explanation.input_tokens.to_string()),
            dim(&explanation.output_tokens.to_string()),
            explanation.duration_ms,
        );
        if let Some(id) = saved_id {
            eprintln!("{} saved as note {}", green("✔"), bold(&id.to_string()));
        }
    }
    Ok(())
}

async fn run_intake(cli: &Cli, args: &IntakeArgs, show_progress: bool) -> Result<()> {
    let config = build_config(cli, None, Some(&args.source), show_progress)?;
    let session = IntakeSession::from_config(&config);

    let Some(ref input) = args.source.input else {
        bail!("intake needs an input file or URL");
    };
    let info = select_source(&session, input, &args.source).await?;
    let raster = session
        .take()
        .context("Intake finished without a raster")?;

    let png = tokio::task::spawn_blocking(move || encode_png(raster.image()))
        .await
        .context("Encoding task failed")?
        .context("Failed to encode composite")?;
    tokio::fs::write(&args.output, &png)
        .await
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&info).context("Failed to serialise output")?
        );
    } else if !cli.quiet {
        print_raster_info(&info);
        eprintln!("{} wrote {}", green("✔"), bold(&args.output.display().to_string()));
    }
    Ok(())
}

async fn run_notes(cli: &Cli, cmd: &NotesCommand) -> Result<()> {
    let store = NoteStore::open(&cli.db).context("Failed to open note store")?;
    match cmd {
        NotesCommand::List => {
            let notes = store.get_all().context("Failed to list notes")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&notes)?);
            } else {
                print_note_list(&notes);
            }
        }
        NotesCommand::Show { id } => {
            let note = store
                .get_by_id(*id)
                .context("Failed to read note")?
                .with_context(|| format!("Note {id} not found"))?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&note)?);
            } else {
                println!("{}", bold(&note.title));
                println!("{}", dim(&format!("{} · {}", note.display_date(), note.language)));
                println!();
                print_answer(&note.content)?;
            }
        }
        NotesCommand::Delete { id } => {
            store.delete_by_id(*id).context("Failed to delete note")?;
            if !cli.quiet {
                eprintln!("{} deleted note {id}", green("✔"));
            }
        }
        NotesCommand::Ask {
            id,
            question,
            model,
        } => {
            let note = store
                .get_by_id(*id)
                .context("Failed to read note")?
                .with_context(|| format!("Note {id} not found"))?;
            let config = build_config(cli, Some(model), None, false)?;
            let assistant = connect_assistant(&config, model).await?;
            let answer = assistant
                .ask_about_note(&note, question)
                .await
                .context("Question failed")?;
            if cli.json {
                let out = serde_json::json!({ "note_id": id, "question": question, "answer": answer });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("{} {}", cyan("?"), bold(question));
                print_answer(&answer)?;
            }
        }
        NotesCommand::Watch => {
            let mut changes = store.watch();
            while let Some(notes) = changes.next().await {
                print_note_list(&notes);
                println!("{}", dim("── waiting for changes (Ctrl-C to stop) ──"));
            }
        }
    }
    Ok(())
}

async fn run_check_update(cli: &Cli, args: &UpdateArgs) -> Result<()> {
    let checker = UpdateChecker::new(
        &args.endpoint,
        i64::from(args.version_code),
        env!("CARGO_PKG_VERSION"),
    );
    let status = checker.check().await.context("Update check failed")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }
    match status {
        UpdateStatus::UpToDate => println!("{} up to date", green("✔")),
        UpdateStatus::Available(v) => {
            let tag = if v.is_mandatory { red(" (required)") } else { String::new() };
            println!(
                "{} version {} available{tag}",
                cyan("◆"),
                bold(&v.latest_version_name)
            );
            if !v.release_date.is_empty() {
                println!("  released {}  ·  {}", v.release_date, v.size);
            }
            for note in &v.release_notes {
                println!("  - {note}");
            }
            if !v.download_url.is_empty() {
                println!("  {}", v.download_url);
            }
        }
    }
    Ok(())
}

/// Resolve `input` and run the matching intake on `session`.
async fn select_source(
    session: &IntakeSession,
    input: &str,
    args: &SourceArgs,
) -> Result<RasterInfo> {
    let resolved: ResolvedInput = resolve_input(input, args.download_timeout)
        .await
        .with_context(|| format!("Cannot open {input}"))?;

    let info = match resolved.kind() {
        InputKind::Pdf => {
            if args.camera {
                bail!("--camera expects an image, got a PDF");
            }
            session
                .select_pdf(resolved.path())
                .await
                .context("PDF intake failed")?
        }
        InputKind::Image(_) => {
            let bytes = tokio::fs::read(resolved.path())
                .await
                .with_context(|| format!("Failed to read {}", resolved.path().display()))?;
            if args.camera {
                session
                    .select_camera_bytes(&bytes)
                    .context("Camera intake failed")?
            } else {
                session.select_image(&bytes).context("Image intake failed")?
            }
        }
    };
    Ok(info)
}

/// Check connectivity (unless `--offline-ok`) and resolve the provider.
async fn connect_assistant(config: &StudyConfig, args: &ModelArgs) -> Result<Assistant> {
    if !args.offline_ok {
        Connectivity::from_config(config)
            .context("Failed to set up connectivity probe")?
            .require_connected()
            .await
            .context("Cannot reach the model")?;
    }
    Assistant::from_config(config.clone()).context("No LLM provider available")
}

/// Map CLI args to `StudyConfig`.
fn build_config(
    cli: &Cli,
    model: Option<&ModelArgs>,
    source: Option<&SourceArgs>,
    show_progress: bool,
) -> Result<StudyConfig> {
    let mut builder = StudyConfig::builder()
        .language(cli.language)
        .database_path(&cli.db);

    if let Some(source) = source {
        builder = builder
            .max_pages(source.max_pages)
            .download_timeout_secs(source.download_timeout);
    }

    if let Some(args) = model {
        builder = builder
            .max_tokens(args.max_tokens)
            .temperature(args.temperature)
            .api_timeout_secs(args.api_timeout)
            .connectivity_probe_url(&args.probe_url);
        if let Some(ref model) = args.model {
            builder = builder.model(model);
        }
        if let Some(ref provider) = args.provider {
            builder = builder.provider_name(provider);
        }
    }

    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new();
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_answer(answer: &str) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for line in structure(answer) {
        match line {
            AnswerLine::Heading(t) => writeln!(out, "\n{}", bold(&cyan(&t)))?,
            AnswerLine::Numbered(t) | AnswerLine::Bullet(t) => writeln!(out, "  {t}")?,
            AnswerLine::Text(t) => writeln!(out, "{t}")?,
            AnswerLine::Blank => writeln!(out)?,
        }
    }
    Ok(())
}

fn print_note_list(notes: &[SavedNote]) {
    if notes.is_empty() {
        println!("{}", dim("no saved notes"));
        return;
    }
    for n in notes {
        println!(
            "{:>4}  {}  {}  {}",
            n.id,
            dim(&n.display_date()),
            dim(&n.language),
            bold(&n.title)
        );
    }
}

fn print_raster_info(info: &RasterInfo) {
    println!("File:    {}", info.source_file_name);
    println!("Kind:    {:?}", info.source_kind);
    println!("Pages:   {}", info.page_count);
    println!("Size:    {}x{} px", info.width, info.height);
}
