//! Command-line front end for the Symi compiler: a `clap` subcommand per
//! host operation, so the whole pipeline is exercisable without an
//! embedding editor.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use symi::midi::MidiExportOptions;
use symi::{api, SymiError};

#[derive(Parser)]
#[command(author, version, about = "Symi microtonal notation compiler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Lex a file and print its tokens.
    Tokens(FileArgs),
    /// Run the full pipeline and print diagnostics.
    Diagnostics(FileArgs),
    /// Run the full pipeline and print resolved events as JSON.
    Events(FileArgs),
    /// Check that a file could be exported under the given MIDI options.
    ValidateMidi(MidiArgs),
    /// Export a file's resolved events to a Standard MIDI File.
    ExportMidi(ExportArgs),
}

#[derive(clap::Args)]
struct FileArgs {
    /// Path to a .symi source file.
    source: PathBuf,
}

#[derive(clap::Args)]
struct MidiArgs {
    /// Path to a .symi source file.
    source: PathBuf,

    #[command(flatten)]
    options: MidiOptionArgs,
}

#[derive(clap::Args)]
struct ExportArgs {
    /// Path to a .symi source file.
    source: PathBuf,

    /// Output path for the Standard MIDI File.
    output: PathBuf,

    #[command(flatten)]
    options: MidiOptionArgs,
}

#[derive(clap::Args)]
struct MidiOptionArgs {
    #[arg(long = "tpq", default_value_t = 480)]
    tpq: u16,

    #[arg(long, default_value_t = 64)]
    velocity: u8,

    #[arg(long, default_value_t = 0)]
    program: u8,

    #[arg(long = "bend-range", default_value_t = 2)]
    bend_range_semitones: u8,

    #[arg(long = "tolerance-cents", default_value_t = 1.0)]
    max_tolerance_cents: f64,

    #[arg(long = "tolerance-sec", default_value_t = 0.001)]
    time_tolerance_sec: f64,
}

impl From<MidiOptionArgs> for MidiExportOptions {
    fn from(a: MidiOptionArgs) -> Self {
        MidiExportOptions {
            tpq: a.tpq,
            velocity: a.velocity,
            program: a.program,
            bend_range_semitones: a.bend_range_semitones,
            max_tolerance_cents: a.max_tolerance_cents,
            time_tolerance_sec: a.time_tolerance_sec,
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> symi::Result<()> {
    match command {
        Command::Tokens(args) => run_tokens(args),
        Command::Diagnostics(args) => run_diagnostics(args),
        Command::Events(args) => run_events(args),
        Command::ValidateMidi(args) => run_validate_midi(args),
        Command::ExportMidi(args) => run_export_midi(args),
    }
}

fn file_id_and_source(path: &PathBuf) -> symi::Result<(String, String)> {
    let source = std::fs::read_to_string(path)?;
    Ok((path.display().to_string(), source))
}

fn run_tokens(args: FileArgs) -> symi::Result<()> {
    let (file_id, source) = file_id_and_source(&args.source)?;
    api::file_update(&file_id, &source);
    for token in api::get_tokens(&file_id)?.iter() {
        println!("{:?} [{}, {})", token.kind, token.from, token.to);
    }
    api::file_close(&file_id);
    Ok(())
}

fn run_diagnostics(args: FileArgs) -> symi::Result<()> {
    let (file_id, source) = file_id_and_source(&args.source)?;
    api::file_update(&file_id, &source);
    for diag in api::get_diagnostics(&file_id)?.iter() {
        println!("{:?}: {} [{}, {})", diag.severity, diag.message, diag.from, diag.to);
    }
    api::file_close(&file_id);
    Ok(())
}

fn run_events(args: FileArgs) -> symi::Result<()> {
    let (file_id, source) = file_id_and_source(&args.source)?;
    api::file_update(&file_id, &source);
    let events = api::get_events(&file_id)?;
    let json = serde_json::to_string_pretty(&*events)
        .map_err(|e| SymiError::Midi(format!("failed to serialize events: {}", e)))?;
    println!("{}", json);
    api::file_close(&file_id);
    Ok(())
}

fn run_validate_midi(args: MidiArgs) -> symi::Result<()> {
    let (file_id, source) = file_id_and_source(&args.source)?;
    let options: MidiExportOptions = args.options.into();
    let result = api::validate_midi_export(&file_id, &source, &options);
    api::file_close(&file_id);
    result?;
    println!("ok");
    Ok(())
}

fn run_export_midi(args: ExportArgs) -> symi::Result<()> {
    let (file_id, source) = file_id_and_source(&args.source)?;
    let options: MidiExportOptions = args.options.into();
    let result = api::export_midi(&file_id, &source, &args.output, &options);
    api::file_close(&file_id);
    result?;
    println!("wrote {}", args.output.display());
    Ok(())
}
