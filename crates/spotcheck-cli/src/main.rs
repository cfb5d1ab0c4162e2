use std::fs;
use std::io::{self, ErrorKind, IsTerminal, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use spotcheck_contracts::chat::{parse_intent, CHAT_HELP_COMMANDS};
use spotcheck_contracts::events::EventWriter;
use spotcheck_contracts::submission::MAX_MEDIA_ITEMS;
use spotcheck_contracts::{
    AnalysisResult, BatchOutcome, CandidateFile, Citation, InputMode, SpotError,
};
use spotcheck_engine::{EngineConfig, InferenceClient, SpotSession, DEFAULT_MODEL};

#[derive(Debug, Parser)]
#[command(
    name = "spotcheck",
    version,
    about = "Locate skate spots from photos, clips, and video links"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyze local images or clips.
    Analyze(AnalyzeArgs),
    /// Analyze an online video by URL.
    Video(VideoArgs),
    /// Compose a submission interactively.
    Chat(ChatArgs),
}

#[derive(Debug, Args)]
struct SessionArgs {
    #[arg(long, default_value = ".spotcheck")]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    api_base: Option<String>,
    #[arg(long)]
    timeout: Option<f64>,
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    #[arg(long = "file", required = true)]
    files: Vec<PathBuf>,
    #[arg(long)]
    source_link: Option<String>,
    #[arg(long)]
    json: bool,
    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Debug, Parser)]
struct VideoArgs {
    #[arg(long)]
    url: String,
    #[arg(long)]
    start: Option<String>,
    #[arg(long)]
    duration: Option<String>,
    #[arg(long)]
    json: bool,
    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[command(flatten)]
    session: SessionArgs,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("spotcheck error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Analyze(args) => run_analyze(args),
        Command::Video(args) => run_video(args),
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
    }
}

fn open_session(args: &SessionArgs) -> Result<SpotSession> {
    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create session dir {}", args.out.display()))?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));

    let mut config = EngineConfig::from_env();
    if let Some(model) = args.model.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        config.model = Some(model.to_string());
    }
    if let Some(api_base) = args.api_base.as_deref() {
        config.api_base = api_base.trim().trim_end_matches('/').to_string();
    }
    if let Some(timeout) = args.timeout {
        config.request_timeout_s = timeout;
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    let client = InferenceClient::new(&config);
    Ok(SpotSession::new(
        client,
        EventWriter::new(events_path, session_id),
    ))
}

fn run_analyze(args: AnalyzeArgs) -> Result<i32> {
    let mut session = open_session(&args.session)?;
    let files = args
        .files
        .iter()
        .cloned()
        .map(CandidateFile::from_path)
        .collect();
    match session.add_files(files) {
        Ok(outcome) => report_batch(&outcome),
        Err(err) => {
            eprintln!("{}", err.user_message());
            session.finish();
            return Ok(1);
        }
    }
    session.set_source_link(args.source_link);
    let code = finish_one_shot(&mut session, args.json)?;
    session.finish();
    Ok(code)
}

fn run_video(args: VideoArgs) -> Result<i32> {
    let mut session = open_session(&args.session)?;
    session.switch_mode(InputMode::VideoLink);
    session.set_video_url(Some(args.url));
    session.set_start_timestamp(args.start);
    session.set_duration_seconds(args.duration);
    let code = finish_one_shot(&mut session, args.json)?;
    session.finish();
    Ok(code)
}

fn finish_one_shot(session: &mut SpotSession, as_json: bool) -> Result<i32> {
    match session.analyze() {
        Ok(result) => {
            if as_json {
                println!("{}", serde_json::to_string_pretty(result)?);
            } else {
                print_result(result);
            }
            Ok(0)
        }
        Err(err) => {
            if as_json {
                println!("{}", serde_json::to_string_pretty(&error_json(&err))?);
            } else {
                print_error(&err);
            }
            Ok(1)
        }
    }
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let mut session = open_session(&args.session)?;
    let stdin = io::stdin();
    let mut line = String::new();

    println!("SpotCheck chat started. Type /help for commands.");

    loop {
        print!("[{}]> ", session.state().mode().as_str());
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        match intent.action.as_str() {
            "noop" => {}
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
                println!("Paste a URL to set the link, or drop file paths to add media.");
            }
            "quit" => break,
            "add_media" => {
                let paths = intent.arg_paths("paths");
                if paths.is_empty() {
                    println!("/add requires at least one path");
                    continue;
                }
                let files = paths.into_iter().map(CandidateFile::from_path).collect();
                match session.add_files(files) {
                    Ok(outcome) => {
                        report_batch(&outcome);
                        println!(
                            "{} file(s) queued ({} max).",
                            session.state().len(),
                            MAX_MEDIA_ITEMS
                        );
                    }
                    Err(err) => println!("{}", err.user_message()),
                }
            }
            "remove_media" => {
                let Some(index) = intent
                    .command_args
                    .get("index")
                    .and_then(Value::as_u64)
                    .map(|value| value as usize)
                else {
                    println!("/remove requires a file number (see /status)");
                    continue;
                };
                match session.remove_media(index) {
                    Some(name) => println!("Removed {name}"),
                    None => println!("No file #{}", index + 1),
                }
            }
            "set_mode" => {
                let Some(mode) = intent.arg_str("mode").and_then(InputMode::parse) else {
                    println!("/mode expects upload or video");
                    continue;
                };
                session.switch_mode(mode);
                println!("Mode: {}", mode.as_str());
            }
            "set_source_link" => {
                session.set_source_link(intent.arg_str("url").map(str::to_string));
                println!("Source link: {}", session.state().source_link().unwrap_or("(none)"));
            }
            "set_video_url" => {
                session.set_video_url(intent.arg_str("url").map(str::to_string));
                println!("Video URL: {}", session.state().video_url().unwrap_or("(none)"));
            }
            "paste_url" => {
                let url = intent.arg_str("url").map(str::to_string);
                match session.state().mode() {
                    InputMode::Upload => {
                        session.set_source_link(url);
                        println!("Source link: {}", session.state().source_link().unwrap_or("(none)"));
                    }
                    InputMode::VideoLink => {
                        session.set_video_url(url);
                        println!("Video URL: {}", session.state().video_url().unwrap_or("(none)"));
                    }
                }
            }
            "set_start" => {
                session.set_start_timestamp(intent.arg_str("value").map(str::to_string));
                println!("Start: {}", session.state().start_timestamp().unwrap_or("(none)"));
            }
            "set_duration" => {
                session.set_duration_seconds(intent.arg_str("value").map(str::to_string));
                println!(
                    "Duration: {}",
                    session.state().duration_seconds().unwrap_or("(none)")
                );
            }
            "set_model" => {
                let model = intent.arg_str("model").map(str::to_string);
                session.set_model(model);
                println!("Model: {}", session.model().unwrap_or(DEFAULT_MODEL));
            }
            "status" => print_status(&session),
            "clear" => {
                session.clear();
                println!("Cleared.");
            }
            "analyze" => {
                println!("Analyzing...");
                match session.analyze() {
                    Ok(result) => print_result(result),
                    Err(err) => print_error(&err),
                }
            }
            _ => {
                let command = intent
                    .command_args
                    .get("command")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                println!("Unknown command /{command}. Type /help for commands.");
            }
        }
    }

    session.finish();
    Ok(())
}

fn report_batch(outcome: &BatchOutcome) {
    for name in &outcome.admitted {
        println!("Added {name}");
    }
    for err in &outcome.rejected {
        eprintln!("{}", err.user_message());
    }
}

fn print_status(session: &SpotSession) {
    let state = session.state();
    println!("Mode: {}", state.mode().as_str());
    println!("Model: {}", session.model().unwrap_or(DEFAULT_MODEL));
    match state.mode() {
        InputMode::Upload => {
            if state.is_empty() {
                println!("No files queued.");
            }
            for (idx, item) in state.media().iter().enumerate() {
                println!(
                    "  {}. {} ({}, {} bytes)",
                    idx + 1,
                    item.name(),
                    item.mime_type(),
                    item.size()
                );
            }
            println!("Source link: {}", state.source_link().unwrap_or("(none)"));
        }
        InputMode::VideoLink => {
            println!("Video URL: {}", state.video_url().unwrap_or("(none)"));
            println!("Start: {}", state.start_timestamp().unwrap_or("(none)"));
            println!("Duration: {}", state.duration_seconds().unwrap_or("(none)"));
        }
    }
    if let Some(err) = session.error() {
        println!("Last error: {}", err.user_message());
    }
}

struct Style {
    enabled: bool,
}

impl Style {
    fn detect() -> Self {
        Self {
            enabled: io::stdout().is_terminal(),
        }
    }

    fn bold(&self, text: &str) -> String {
        if self.enabled {
            format!("\x1b[1m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }
}

fn print_result(result: &AnalysisResult) {
    let style = Style::detect();
    for line in result.display_lines() {
        let body = line
            .spans
            .iter()
            .map(|span| {
                if span.bold {
                    style.bold(&span.text)
                } else {
                    span.text.clone()
                }
            })
            .collect::<String>();
        if line.list_item {
            println!("  • {body}");
        } else {
            println!("{body}");
        }
    }

    if let Some(coordinates) = result.coordinates {
        println!();
        println!(
            "{} {:.6}, {:.6}",
            style.bold("Coordinates:"),
            coordinates.latitude,
            coordinates.longitude
        );
        if coordinates.is_in_range() {
            println!("Open in Google Maps: {}", coordinates.maps_url());
        } else {
            println!("(reported position is outside valid latitude/longitude ranges)");
        }
    }

    if result.citations.is_empty() {
        return;
    }
    println!();
    println!("{}", style.bold("Verified Sources"));
    let web: Vec<&Citation> = result.web_sources().collect();
    if !web.is_empty() {
        println!("  Web:");
        for citation in web {
            println!("    - {}", citation_line(citation));
        }
    }
    let maps: Vec<&Citation> = result.map_sources().collect();
    if !maps.is_empty() {
        println!("  Maps:");
        for citation in maps {
            println!("    - {}", citation_line(citation));
            if let Citation::Map { review_sources, .. } = citation {
                for review in review_sources {
                    println!("        review: {review}");
                }
            }
        }
    }
}

fn citation_line(citation: &Citation) -> String {
    if citation.uri().is_empty() {
        citation.title().to_string()
    } else {
        format!("{} <{}>", citation.title(), citation.uri())
    }
}

fn print_error(err: &SpotError) {
    eprintln!("{}", err.user_message());
    if let SpotError::Inference(detail) = err {
        eprintln!("  detail: {detail}");
    }
}

fn error_json(err: &SpotError) -> Value {
    json!({
        "error": err.kind(),
        "message": err.user_message(),
        "detail": err.to_string(),
    })
}
