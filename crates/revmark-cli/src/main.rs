use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use revmark_core::{
    accept_revisions, compare, consolidate, document_text, get_revisions, parse, reject_revisions,
    serialize, ComparerSettings, RevisedDocument, RevisionRecord, RevisionSummary, Rgb,
    XmlDocument,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

mod telemetry;

/// Tracked-change comparison for WordprocessingML documents
///
/// Every command reads and writes flat `w:document` XML (the main document
/// part, optionally with `w:footnotes` / `w:endnotes` grafted under the
/// root). Output goes to stdout unless `--output` is given.
#[derive(Parser)]
#[command(name = "revmark")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")"))]
#[command(about, long_about)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare two documents into tracked-change markup
    Compare {
        original: PathBuf,
        revised: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        settings: SettingsArgs,
    },

    /// Merge several reviewers' copies of one original
    Consolidate {
        original: PathBuf,

        /// Reviewer copy as PATH:AUTHOR:RRGGBB, in presentation order
        #[arg(short, long = "reviewer", value_parser = parse_reviewer, required = true)]
        reviewers: Vec<ReviewerArg>,

        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        settings: SettingsArgs,
    },

    /// List the tracked changes a document carries
    Revisions {
        file: PathBuf,

        /// Print records as JSON instead of a table
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        settings: SettingsArgs,
    },

    /// Accept every tracked change
    Accept {
        file: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Reject every tracked change
    Reject {
        file: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the text projection of a document
    Text { file: PathBuf },
}

#[derive(Args, Debug, Default)]
struct SettingsArgs {
    /// JSON settings file; missing fields take their defaults
    #[arg(long = "settings")]
    settings_file: Option<PathBuf>,

    /// Author written on new revisions
    #[arg(long)]
    author: Option<String>,

    /// RFC 3339 revision timestamp (omitted when unset)
    #[arg(long)]
    date: Option<String>,

    /// Compare ignoring case
    #[arg(long)]
    case_insensitive: bool,

    /// Culture for case folding, e.g. tr-TR
    #[arg(long)]
    locale: Option<String>,

    /// Report relocated paragraphs as moves
    #[arg(long)]
    detect_moves: bool,

    /// Minimum similarity for a move pair
    #[arg(long)]
    similarity_threshold: Option<f64>,

    /// Do not track run and paragraph property changes
    #[arg(long)]
    no_format_tracking: bool,
}

impl SettingsArgs {
    fn resolve(&self) -> Result<ComparerSettings> {
        let mut settings = match &self.settings_file {
            Some(path) => {
                let json = fs::read_to_string(path)
                    .with_context(|| format!("reading settings {}", path.display()))?;
                serde_json::from_str(&json)
                    .with_context(|| format!("parsing settings {}", path.display()))?
            }
            None => ComparerSettings::default(),
        };
        if let Some(author) = &self.author {
            settings.author_for_new_revisions = author.clone();
        }
        if let Some(date) = &self.date {
            settings.date_time_for_revisions = Some(date.clone());
        }
        if self.case_insensitive {
            settings.case_insensitive = true;
        }
        if let Some(locale) = &self.locale {
            settings.locale = Some(locale.clone());
        }
        if self.detect_moves {
            settings.detect_moved_content = true;
        }
        if let Some(threshold) = self.similarity_threshold {
            settings.similarity_threshold = threshold;
        }
        if self.no_format_tracking {
            settings.track_formatting_changes = false;
        }
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ReviewerArg {
    path: PathBuf,
    author: String,
    color: Rgb,
}

/// `PATH:AUTHOR:RRGGBB`, split from the right so paths may contain colons.
fn parse_reviewer(value: &str) -> std::result::Result<ReviewerArg, String> {
    let mut parts = value.rsplitn(3, ':');
    let (Some(color), Some(author), Some(path)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("expected PATH:AUTHOR:RRGGBB, got '{value}'"));
    };
    if author.is_empty() || path.is_empty() {
        return Err(format!("expected PATH:AUTHOR:RRGGBB, got '{value}'"));
    }
    let color = color
        .parse::<Rgb>()
        .map_err(|e| format!("bad reviewer color '{color}': {e}"))?;
    Ok(ReviewerArg {
        path: PathBuf::from(path),
        author: author.to_string(),
        color,
    })
}

fn read_document(path: &Path) -> Result<XmlDocument> {
    let xml = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse(&xml).with_context(|| format!("parsing {}", path.display()))
}

fn write_document(doc: &XmlDocument, output: Option<&Path>) -> Result<()> {
    let xml = serialize(doc)?;
    match output {
        Some(path) => {
            fs::write(path, xml).with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "wrote document");
        }
        None => println!("{xml}"),
    }
    Ok(())
}

fn one_line(text: &str) -> String {
    text.replace('\n', "\u{23CE}").replace('\t', "\u{2192}")
}

fn print_table(records: &[RevisionRecord]) {
    println!("{:<5} {:<26} {:<16} {:<22} TEXT", "ID", "KIND", "AUTHOR", "DATE");
    for record in records {
        println!(
            "{:<5} {:<26} {:<16} {:<22} {}",
            record.id.as_deref().unwrap_or("-"),
            record.kind.to_string(),
            record.author,
            record.date.as_deref().unwrap_or("-"),
            one_line(&record.text)
        );
    }
    let summary = RevisionSummary::from_records(records);
    println!(
        "\n{} revisions: {} insertions, {} deletions, {} moves, {} format, {} numbering, {} paragraph",
        summary.total(),
        summary.insertions,
        summary.deletions,
        summary.moves,
        summary.format_changes,
        summary.numbering_changes,
        summary.paragraph_property_changes
    );
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Compare {
            original,
            revised,
            output,
            settings,
        } => {
            let settings = settings.resolve()?;
            let result = compare(&read_document(&original)?, &read_document(&revised)?, &settings)?;
            write_document(&result, output.as_deref())
        }
        Commands::Consolidate {
            original,
            reviewers,
            output,
            settings,
        } => {
            let settings = settings.resolve()?;
            let original = read_document(&original)?;
            let revisions = reviewers
                .into_iter()
                .map(|r| Ok(RevisedDocument::new(read_document(&r.path)?, r.author, r.color)))
                .collect::<Result<Vec<_>>>()?;
            let result = consolidate(&original, &revisions, &settings)?;
            write_document(&result, output.as_deref())
        }
        Commands::Revisions { file, json, settings } => {
            let settings = settings.resolve()?;
            let records = get_revisions(&read_document(&file)?, &settings)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                print_table(&records);
            }
            Ok(())
        }
        Commands::Accept { file, output } => {
            write_document(&accept_revisions(&read_document(&file)?)?, output.as_deref())
        }
        Commands::Reject { file, output } => {
            write_document(&reject_revisions(&read_document(&file)?)?, output.as_deref())
        }
        Commands::Text { file } => {
            println!("{}", document_text(&read_document(&file)?)?);
            Ok(())
        }
    }
}

fn main() {
    let cli = Cli::parse();
    telemetry::init(cli.verbose, cli.log_json);

    if let Err(e) = run(cli.command) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
