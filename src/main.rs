//! corpus-vocab — command-line entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Parse CLI args
//!   3. Load config
//!   4. Resolve effective log level (CLI `-v` flags > RUST_LOG > config)
//!   5. Init logger once
//!   6. Open the corpus and run the command

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use corpus_vocab::config::{self, Config};
use corpus_vocab::embed::HashingEmbedder;
use corpus_vocab::error::AppError;
use corpus_vocab::logger::{self, LevelSource};
use corpus_vocab::models::Document;
use corpus_vocab::store::{Indexed, Value};
use corpus_vocab::text::SimpleNgramExtractor;
use corpus_vocab::Corpus;

const USAGE: &str = "\
Usage: corpus-vocab [OPTIONS] <COMMAND>

Commands:
  ingest <PATH>          Add documents from a JSON-lines file (existing DOIs are skipped)
  extract                Attach n-gram counts to documents that have none
  build [--resume] [--embed]
                         Build the vocabulary; --resume continues from the checkpoint
  embed-documents        Embed documents that have no vector yet
  stats                  Print corpus and vocabulary sizes
  clear-vocab            Drop the vocabulary and rewind the checkpoint
  clear-corpus           Drop all documents and rewind the checkpoint

Options:
  -h, --help             Print help
  -f, --config <PATH>    Path to configuration file (default: config/default.toml)
  -v, -vv, -vvv, -vvvv   Increase logging verbosity";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Ingest(PathBuf),
    Extract,
    Build { resume: bool, embed: bool },
    EmbedDocuments,
    Stats,
    ClearVocab,
    ClearCorpus,
}

#[derive(Debug, PartialEq, Eq)]
struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<PathBuf>,
    command: Option<Command>,
    help: bool,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), AppError> {
    // Load .env if present; the file is optional.
    let _ = dotenvy::dotenv();

    let args = parse_cli_args(std::env::args().skip(1)).map_err(AppError::Config)?;
    let Some(command) = args.command.filter(|_| !args.help) else {
        println!("{USAGE}");
        return Ok(());
    };

    let config = config::load(args.config_path.as_deref())?;

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    let level_source = if args.log_level.is_some() { LevelSource::Cli } else { LevelSource::Config };
    logger::init(effective_log_level, level_source)?;

    info!(
        db = %config.store.path.display(),
        configured_log_level = %config.log_level,
        effective_log_level = %effective_log_level,
        "config loaded"
    );

    let corpus = Corpus::open(&config.store.path, config.store_options())?;
    execute(&corpus, &config, command)
}

fn execute(corpus: &Corpus, config: &Config, command: Command) -> Result<(), AppError> {
    match command {
        Command::Ingest(path) => {
            let (added, skipped) = ingest(corpus, &path)?;
            info!(added, skipped, path = %path.display(), "ingest: done");
        }
        Command::Extract => {
            let extractor = SimpleNgramExtractor::new()?;
            let updated = corpus.attach_ngrams(&extractor)?;
            info!(updated, "extract: done");
        }
        Command::Build { resume, embed } => {
            let options = config.build_options(resume);
            let report = if embed {
                let embedder = HashingEmbedder::new(config.embedding.dimensions)?;
                corpus.build_vocab(&options, Some((&embedder, &config.embed_options())))?
            } else {
                corpus.build_vocab(&options, None)?
            };
            println!(
                "processed {} of {} documents ({} skipped), {} merges, {} pruned, {} embedded",
                report.documents_processed,
                report.documents_total,
                report.documents_skipped,
                report.ngrams_merged,
                report.ngrams_pruned,
                report.embeddings_written
            );
        }
        Command::EmbedDocuments => {
            let embedder = HashingEmbedder::new(config.embedding.dimensions)?;
            let written = corpus.calculate_document_embeddings(&embedder, &config.embed_options())?;
            println!("embedded {written} documents");
        }
        Command::Stats => {
            let years = match (corpus.min_year()?, corpus.max_year()?) {
                (Some(lo), Some(hi)) => format!("{lo}–{hi}"),
                _ => "n/a".to_string(),
            };
            println!("documents:        {}", corpus.len()?);
            println!("years:            {years}");
            println!("vocabulary:       {}", corpus.vocab().len()?);
            println!("checkpoint:       {}", corpus.settings().last_document_processed()?);
        }
        Command::ClearVocab => corpus.clear_vocab()?,
        Command::ClearCorpus => corpus.clear_corpus()?,
    }
    Ok(())
}

/// Read one JSON document per line and add the ones whose DOI isn't stored
/// yet.  Blank lines are ignored; a malformed line aborts with its number.
fn ingest(corpus: &Corpus, path: &Path) -> Result<(usize, usize), AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    let batch_size = corpus.store().page_size();

    let mut seen = HashSet::new();
    let mut batch = Vec::with_capacity(batch_size);
    let (mut added, mut skipped) = (0, 0);

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let document: Document = serde_json::from_str(&line).map_err(|e| {
            AppError::Config(format!("{}:{}: {e}", path.display(), index + 1))
        })?;
        let known = corpus
            .documents()
            .find_one_by(&[("doi", Value::from(document.doi.as_str()))])?
            .is_some();
        if known || !seen.insert(document.doi.clone()) {
            warn!(doi = %document.doi, "ingest: duplicate DOI skipped");
            skipped += 1;
            continue;
        }
        batch.push(document);
        if batch.len() >= batch_size {
            added += corpus.add_documents(std::mem::take(&mut batch))?.len();
        }
    }
    if !batch.is_empty() {
        added += corpus.add_documents(batch)?.len();
    }
    Ok((added, skipped))
}

fn parse_cli_args(args: impl IntoIterator<Item = String>) -> Result<CliArgs, String> {
    let mut verbosity = 0u8;
    let mut config_path = None;
    let mut help = false;
    let mut positional = Vec::new();
    let mut resume = false;
    let mut embed = false;

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => help = true,
            "-f" | "--config" => match iter.next() {
                Some(path) => config_path = Some(PathBuf::from(path)),
                None => return Err("-f/--config requires a path argument".into()),
            },
            "--resume" => resume = true,
            "--embed" => embed = true,
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            a if a.starts_with('-') => return Err(format!("unknown option '{a}'")),
            _ => positional.push(arg),
        }
    }

    // Each -v raises verbosity one tier:
    //   -v → warn, -vv → info, -vvv → debug, -vvvv+ → trace
    let log_level = match verbosity {
        0 => None,
        1 => Some("warn"),
        2 => Some("info"),
        3 => Some("debug"),
        _ => Some("trace"),
    };

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        None => None,
        Some("ingest") => match positional.next() {
            Some(path) => Some(Command::Ingest(PathBuf::from(path))),
            None => return Err("ingest requires a path argument".into()),
        },
        Some("extract") => Some(Command::Extract),
        Some("build") => Some(Command::Build { resume, embed }),
        Some("embed-documents") => Some(Command::EmbedDocuments),
        Some("stats") => Some(Command::Stats),
        Some("clear-vocab") => Some(Command::ClearVocab),
        Some("clear-corpus") => Some(Command::ClearCorpus),
        Some(other) => return Err(format!("unknown command '{other}'")),
    };
    if let Some(extra) = positional.next() {
        return Err(format!("unexpected argument '{extra}'"));
    }
    if (resume || embed) && !matches!(command, Some(Command::Build { .. })) {
        return Err("--resume and --embed only apply to build".into());
    }

    Ok(CliArgs { log_level, config_path, command, help })
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpus_vocab::store::StoreOptions;
    use std::io::Write;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Result<CliArgs, String> {
        parse_cli_args(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn build_with_flags() {
        let args = parse(&["-vvv", "-f", "custom.toml", "build", "--resume"]).unwrap();
        assert_eq!(args.log_level, Some("debug"));
        assert_eq!(args.config_path, Some(PathBuf::from("custom.toml")));
        assert_eq!(args.command, Some(Command::Build { resume: true, embed: false }));
    }

    #[test]
    fn ingest_needs_a_path() {
        assert!(parse(&["ingest"]).is_err());
        let args = parse(&["ingest", "docs.jsonl"]).unwrap();
        assert_eq!(args.command, Some(Command::Ingest(PathBuf::from("docs.jsonl"))));
    }

    #[test]
    fn no_command_is_not_an_error() {
        let args = parse(&[]).unwrap();
        assert!(args.command.is_none());
        assert!(parse(&["--help"]).unwrap().help);
    }

    #[test]
    fn unknown_input_rejected() {
        assert!(parse(&["compact"]).is_err());
        assert!(parse(&["stats", "--fast"]).is_err());
        assert!(parse(&["stats", "--resume"]).is_err());
        assert!(parse(&["-f"]).is_err());
    }

    #[test]
    fn ingest_skips_known_and_repeated_dois() {
        let tmp = TempDir::new().unwrap();
        let corpus = Corpus::open(tmp.path().join("corpus.db"), StoreOptions::default()).unwrap();
        let path = tmp.path().join("docs.jsonl");
        let mut f = File::create(&path).unwrap();
        for doi in ["10.1/a", "10.1/b", "10.1/a"] {
            writeln!(f, r#"{{"doi":"{doi}","title":"T","content":"C","date":"2020-01-01"}}"#).unwrap();
        }
        writeln!(f).unwrap();
        drop(f);

        assert_eq!(ingest(&corpus, &path).unwrap(), (2, 1));
        assert_eq!(ingest(&corpus, &path).unwrap(), (0, 3));
        assert_eq!(corpus.len().unwrap(), 2);
    }
}
