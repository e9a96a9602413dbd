use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use clap::{Args, Parser, Subcommand};
use textodo::{Command, Outcome, Status, Todo, parse_todo, run_command};

#[derive(Debug, Parser)]
#[command(
    name = "textodo",
    about = "Plain-text TODO lists: sort, mark done, time and archive",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    /// Treat this as the current time (YYYY-MM-DDTHH:MM[:SS]). Defaults to the local clock.
    #[arg(long, global = true, value_parser = parse_now)]
    now: Option<NaiveDateTime>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse every TODO line in a file and print its fields.
    Parse(ParseArgs),

    /// Sort the TODO region around a line by priority.
    Sort(EditArgs),

    /// Toggle a TODO line between pending and done today.
    Done(EditArgs),

    /// Start timing a TODO line, stopping any other timer in its region.
    Start(EditArgs),

    /// Stop every running timer in the region around a line.
    Stop(EditArgs),

    /// Split done TODOs from pending ones, keeping a fresh list above.
    Archive(EditArgs),
}

#[derive(Debug, Args)]
struct ParseArgs {
    /// Text file containing TODO lines.
    file: PathBuf,
    /// Emit JSON instead of a debug representation.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct EditArgs {
    /// Text file containing a TODOs region.
    file: PathBuf,
    /// 1-based line the cursor is on.
    #[arg(long, short)]
    line: usize,
    /// Overwrite the file instead of printing to stdout.
    #[arg(long)]
    in_place: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = cli.verbose;
    let now = cli.now.unwrap_or_else(|| Local::now().naive_local());
    if verbose {
        eprintln!("Using now = {now}");
    }
    match cli.command {
        Commands::Parse(args) => handle_parse(args, now, verbose),
        Commands::Sort(args) => handle_edit(Command::Sort, args, now, verbose),
        Commands::Done(args) => handle_edit(Command::MarkDone, args, now, verbose),
        Commands::Start(args) => handle_edit(Command::StartTiming, args, now, verbose),
        Commands::Stop(args) => handle_edit(Command::StopTiming, args, now, verbose),
        Commands::Archive(args) => handle_edit(Command::Archive, args, now, verbose),
    }
}

fn parse_now(raw: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
        .map_err(|e| format!("expected YYYY-MM-DDTHH:MM[:SS]: {e}"))
}

fn handle_parse(args: ParseArgs, now: NaiveDateTime, verbose: bool) -> Result<()> {
    let ParseArgs { file, json } = args;
    let document = Document::read(&file, verbose)?;

    let todos: Vec<(usize, Todo)> = document
        .lines
        .iter()
        .enumerate()
        .filter_map(|(idx, line)| parse_todo(line, now).map(|todo| (idx + 1, todo)))
        .collect();
    if verbose {
        eprintln!("Found {} TODO lines in {:?}", todos.len(), file);
    }

    if json {
        #[derive(serde::Serialize)]
        struct JsonOutput<'a> {
            line: usize,
            todo: &'a Todo,
        }

        let payload: Vec<JsonOutput<'_>> = todos
            .iter()
            .map(|(line, todo)| JsonOutput { line: *line, todo })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        for (line, todo) in &todos {
            println!("{line}: {todo:?}");
        }
    }
    Ok(())
}

fn handle_edit(command: Command, args: EditArgs, now: NaiveDateTime, verbose: bool) -> Result<()> {
    let EditArgs {
        file,
        line,
        in_place,
    } = args;
    if line == 0 {
        anyhow::bail!("--line is 1-based");
    }

    let document = Document::read(&file, verbose)?;
    let outcome = run_command(command, &document.lines, line - 1, now)
        .with_context(|| format!("running {:?} at {}:{}", command, file.display(), line))?;
    let Outcome {
        lines,
        status,
        timing,
    } = outcome;
    if verbose && !timing.is_empty() {
        let shown: Vec<String> = timing.iter().map(|idx| (idx + 1).to_string()).collect();
        eprintln!("Timing lines {}", shown.join(", "));
    }

    let updated = Document { lines, ..document };
    if in_place {
        updated.write(&file, verbose)?;
        println!("{}", describe(&status));
    } else {
        eprintln!("{}", describe(&status));
        print!("{}", updated.render());
    }
    Ok(())
}

fn describe(status: &Status) -> String {
    match status {
        Status::MarkedDone => "Marked done".to_string(),
        Status::UnmarkedDone => "Unmarked done".to_string(),
        Status::Archived { done } => format!("Archived {done} done TODOs"),
        Status::TimingStarted => "Started timing".to_string(),
        Status::TimingStopped => "Stopped timing".to_string(),
        Status::Sorted { pending } => format!("Sorted {pending} pending TODOs"),
    }
}

/// A text file split into lines, remembering its line ending and whether it
/// ended with one.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Document {
    lines: Vec<String>,
    line_ending: &'static str,
    trailing_newline: bool,
}

impl Document {
    fn parse(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
            line_ending: if text.contains("\r\n") { "\r\n" } else { "\n" },
            trailing_newline: text.ends_with('\n'),
        }
    }

    fn read(path: &Path, verbose: bool) -> Result<Self> {
        if verbose {
            eprintln!("Reading {:?}", path);
        }
        let text = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
        Ok(Self::parse(&text))
    }

    fn render(&self) -> String {
        let mut out = self.lines.join(self.line_ending);
        if self.trailing_newline {
            out.push_str(self.line_ending);
        }
        out
    }

    fn write(&self, path: &Path, verbose: bool) -> Result<()> {
        if verbose {
            eprintln!("Writing {:?}", path);
        }
        fs::write(path, self.render().as_bytes()).with_context(|| format!("writing {:?}", path))
    }
}
