use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use semindex_core::config::Config;
use semindex_core::paths::{relative_path, resolve_scope};
use semindex_core::traits::ExclusionRules;
use semindex_core::types::{Area, QueryContext, SearchResult};
use semindex_indexer::{DefaultExclusions, FileStatus, IndexOptions, ProgressCallback, ProgressEvent};
use semindex_retrieve::{DocSearchOptions, SearchOptions, SemanticIndex};

const USAGE: &str = "Usage: semindex <command> [args...]

Commands:
  index <project> [files...]                 index files (all project files when none given)
  search <project> <query> [--limit N] [--file PATH] [--structure]
  docs <project> <query> [--limit N] [--area AREA]
  clear-project <project>
  clear-all
  status";

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("{USAGE}");
        std::process::exit(1);
    }
    let cmd = args.remove(0);
    (cmd, args)
}

/// Value following `flag`, if present.
fn flag_value(args: &[String], flag: &str) -> anyhow::Result<Option<String>> {
    match args.iter().position(|a| a == flag) {
        Some(i) => match args.get(i + 1) {
            Some(v) => Ok(Some(v.clone())),
            None => bail!("{flag} requires a value"),
        },
        None => Ok(None),
    }
}

/// Arguments that are neither flags nor flag values.
fn positionals(args: &[String], valued: &[&str]) -> Vec<String> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let a = &args[i];
        if valued.contains(&a.as_str()) {
            i += 2;
            continue;
        }
        if !a.starts_with("--") {
            out.push(a.clone());
        }
        i += 1;
    }
    out
}

fn limit(args: &[String]) -> anyhow::Result<Option<usize>> {
    flag_value(args, "--limit")?
        .map(|v| v.parse::<usize>().with_context(|| format!("--limit requires a number, got '{v}'")))
        .transpose()
}

fn discover(project: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let exclusions = DefaultExclusions::new()?;
    let files = WalkDir::new(project)
        .into_iter()
        .filter_entry(|e| !exclusions.is_excluded(Path::new(&relative_path(project, e.path()))))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    Ok(files)
}

fn print_results(results: &[SearchResult]) {
    println!("\n🔍 Found {} results", results.len());
    for (i, r) in results.iter().enumerate() {
        let heading = r.heading_text.as_deref().map(|h| format!("  # {h}")).unwrap_or_default();
        let line = r.start_line.map(|l| format!(":{l}")).unwrap_or_default();
        let reranked = if r.reranked { " (reranked)" } else { "" };
        println!("\n  {}. score={:.4}{}  {}{}{}", i + 1, r.similarity, reranked, r.path, line, heading);
        let preview: String = r.content.chars().take(240).collect();
        println!("     📝 {}", preview.replace('\n', "\n        "));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {}", e);
        e
    })?;
    let settings = config.settings()?;
    let (cmd, args) = parse_args();
    let index = SemanticIndex::from_settings(&settings)?;

    match cmd.as_str() {
        "index" => {
            let Some((project, files)) = args.split_first() else { bail!("Usage: semindex index <project> [files...]") };
            let project = resolve_scope(Path::new(project))?;
            let paths: Vec<PathBuf> =
                if files.is_empty() { discover(&project)? } else { files.iter().map(PathBuf::from).collect() };
            println!("Indexing {} files under {}", paths.len(), project.display());

            let pb = ProgressBar::new(paths.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files ({percent}%) {msg}")?
                    .progress_chars("#>-"),
            );
            let bar = pb.clone();
            let progress: ProgressCallback = Arc::new(move |e: &ProgressEvent| {
                bar.set_position(e.done as u64);
                bar.set_message(e.outcome.path.clone());
            });
            let report = index.index_batch(&project, &paths, &IndexOptions { progress: Some(progress) }).await;
            pb.finish_and_clear();

            if let Some(reason) = &report.aborted {
                eprintln!("❌ Batch aborted: {reason}");
            }
            println!(
                "✅ processed={} skipped={} failed={} excluded={}",
                report.processed, report.skipped, report.failed, report.excluded
            );
            for f in report.files.iter().filter(|f| f.status == FileStatus::Failed) {
                println!("   ⚠️  {}: {}", f.path, f.reason.as_deref().unwrap_or_default());
            }
        }
        "search" => {
            let pos = positionals(&args, &["--limit", "--file"]);
            let [project, query] = pos.as_slice() else { bail!("Usage: semindex search <project> <query> [--limit N] [--file PATH]") };
            let options = SearchOptions {
                limit: limit(&args)?,
                exclude_file: flag_value(&args, "--file")?.map(PathBuf::from),
                include_structure: args.iter().any(|a| a == "--structure"),
                ..Default::default()
            };
            println!("Query: {query}");
            print_results(&index.search(Path::new(project), query, &options).await);
        }
        "docs" => {
            let pos = positionals(&args, &["--limit", "--area"]);
            let [project, query] = pos.as_slice() else { bail!("Usage: semindex docs <project> <query> [--limit N] [--area AREA]") };
            let context = flag_value(&args, "--area")?.map(|a| QueryContext { area: Area::parse(&a), ..Default::default() });
            let options = DocSearchOptions { limit: limit(&args)?, context, ..Default::default() };
            println!("Query: {query}");
            print_results(&index.search_docs(Path::new(project), query, &options).await);
        }
        "clear-project" => {
            let Some(project) = args.first() else { bail!("Usage: semindex clear-project <project>") };
            if !index.clear_project(Path::new(project)).await {
                bail!("could not clear {project}");
            }
            println!("✅ Cleared {project}");
        }
        "clear-all" => {
            if !index.clear_all().await {
                bail!("could not clear the store");
            }
            println!("✅ Store cleared");
        }
        "status" => {
            let status = index.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        _ => {
            eprintln!("Unknown command: {cmd}\n\n{USAGE}");
            std::process::exit(1);
        }
    }
    Ok(())
}
