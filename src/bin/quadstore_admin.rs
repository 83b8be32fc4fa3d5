//! quadstore-admin - command line maintenance for quadstore directories
//!
//! Usage:
//!   quadstore-admin <store-dir> <command> [args...]
//!
//! Log level comes from QUADSTORE_LOG (error, warn, info, debug, trace).

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};

use quadstore::{
    StoreConfig, StoreManager, Triple, TriplePattern, TripleStore, DEFAULT_GRAPH_URI,
};

const USAGE: &str = "\
Usage: quadstore-admin <store-dir> <command> [args...]

Commands:
  create [--config <file.json>]            Create an empty store
  info                                     Print store.json and counts
  commits                                  List commit points, oldest first
  graphs                                   List graph URIs
  insert <s> <p> <o> [--graph <g>]         Insert a triple and commit
  insert-literal <s> <p> <value> [--type <dt>] [--lang <tag>] [--graph <g>]
  remove <s> <p> <o> [--graph <g>]         Delete a triple and commit
  match [--s <s>] [--p <p>] [--o <o> | --literal <value> [--type <dt>] [--lang <tag>]] [--graph <g>]
  revert <index>                           Revert to the commit at <index>
  consolidate                              Discard history
  destroy                                  Delete the store directory

Options:
  --job <id>                               Job id recorded with the commit";

/// Value following `--name`, if present
fn option<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// Arguments that are neither options nor option values
fn positional(args: &[String]) -> Vec<&str> {
    let mut out = Vec::new();
    let mut skip = false;
    for arg in args {
        if skip {
            skip = false;
        } else if arg.starts_with("--") {
            skip = true;
        } else {
            out.push(arg.as_str());
        }
    }
    out
}

fn job_id(args: &[String]) -> Result<u128> {
    match option(args, "--job") {
        Some(job) => job.parse().with_context(|| format!("invalid job id {:?}", job)),
        None => Ok(quadstore::storage::master::now_millis().max(0) as u128),
    }
}

fn three_terms<'a>(args: &'a [String], command: &str) -> Result<(&'a str, &'a str, &'a str)> {
    match positional(args)[..] {
        [s, p, o] => Ok((s, p, o)),
        _ => bail!("{} takes exactly three terms\n\n{}", command, USAGE),
    }
}

/// Pattern for the `match` command
fn match_pattern(args: &[String]) -> Result<TriplePattern> {
    let mut pattern = TriplePattern::any();
    if let Some(s) = option(args, "--s") {
        pattern = pattern.subject(s);
    }
    if let Some(p) = option(args, "--p") {
        pattern = pattern.predicate(p);
    }
    let data_type = option(args, "--type");
    let lang = option(args, "--lang");
    match (option(args, "--o"), option(args, "--literal")) {
        (Some(_), Some(_)) => bail!("--o and --literal are mutually exclusive"),
        (Some(o), None) => {
            if data_type.is_some() || lang.is_some() {
                bail!("--type and --lang only apply to --literal");
            }
            pattern = pattern.object_uri(o);
        }
        (None, Some(value)) => pattern = pattern.object_literal(value, data_type, lang),
        (None, None) => {
            if data_type.is_some() || lang.is_some() {
                bail!("--type and --lang need --literal");
            }
        }
    }
    if let Some(g) = option(args, "--graph") {
        pattern = pattern.graphs([g]);
    }
    Ok(pattern)
}

fn init_logging() {
    let level = std::env::var("QUADSTORE_LOG")
        .ok()
        .and_then(|v| v.parse::<tracing::Level>().ok())
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn run(dir: PathBuf, command: &str, args: &[String]) -> Result<()> {
    let manager = match option(args, "--config") {
        Some(path) => StoreManager::new(StoreConfig::from_file(path)?),
        None => StoreManager::default(),
    };
    let graph = option(args, "--graph").unwrap_or(DEFAULT_GRAPH_URI);

    match command {
        "create" => {
            let store = manager.create_store(&dir)?;
            println!("{}", store.store_id());
        }
        "info" => {
            let metadata = manager.read_metadata(&dir)?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
            let store = manager.open_store(&dir, true)?;
            println!("graphs: {}", store.graph_uris().len());
            println!("triples: {}", store.match_all_triples(None)?.len());
            println!("commit points: {}", manager.list_commit_points(&dir)?.len());
        }
        "commits" => {
            for (index, point) in manager.list_commit_points(&dir)?.iter().enumerate() {
                println!(
                    "{}\toffset={}\tjob={}\ttimestamp={}",
                    index,
                    point.store_offset(),
                    point.job_id(),
                    point.timestamp_millis()
                );
            }
        }
        "graphs" => {
            for uri in manager.open_store(&dir, true)?.graph_uris() {
                println!("{}", uri);
            }
        }
        "insert" => {
            let (s, p, o) = three_terms(args, command)?;
            let mut store = manager.open_store(&dir, false)?;
            store.insert_triple(&Triple::new(s, p, o).in_graph(graph))?;
            store.commit(job_id(args)?)?;
        }
        "insert-literal" => {
            let (s, p, value) = three_terms(args, command)?;
            let mut triple = Triple::literal(s, p, value).in_graph(graph);
            if let Some(data_type) = option(args, "--type") {
                triple = triple.with_data_type(data_type);
            }
            if let Some(lang) = option(args, "--lang") {
                triple = triple.with_lang(lang);
            }
            let mut store = manager.open_store(&dir, false)?;
            store.insert_triple(&triple)?;
            store.commit(job_id(args)?)?;
        }
        "remove" => {
            let (s, p, o) = three_terms(args, command)?;
            let mut store = manager.open_store(&dir, false)?;
            store.delete_triple(&Triple::new(s, p, o).in_graph(graph))?;
            store.commit(job_id(args)?)?;
        }
        "match" => {
            let pattern = match_pattern(args)?;
            let store = manager.open_store(&dir, true)?;
            for t in store.match_triples(&pattern)? {
                let object = if t.is_literal {
                    match (&t.lang_code, &t.data_type) {
                        (Some(lang), _) => format!("{:?}@{}", t.object, lang),
                        (None, Some(dt)) => format!("{:?}^^<{}>", t.object, dt),
                        (None, None) => format!("{:?}", t.object),
                    }
                } else {
                    format!("<{}>", t.object)
                };
                println!("<{}> <{}> {} <{}> .", t.subject, t.predicate, object, t.graph);
            }
        }
        "revert" => {
            let index: usize = positional(args)
                .first()
                .ok_or_else(|| anyhow!("revert needs a commit index"))?
                .parse()
                .context("commit index must be a number")?;
            let points = manager.list_commit_points(&dir)?;
            let point = points
                .get(index)
                .ok_or_else(|| anyhow!("no commit point {} (store has {})", index, points.len()))?;
            let mut store = manager.open_store(&dir, false)?;
            store.revert_to_commit_point(point)?;
        }
        "consolidate" => {
            let point = manager.consolidate_store(&dir, job_id(args)?)?;
            println!("store record at offset {}", point.store_offset());
        }
        "destroy" => manager.delete_store(&dir)?,
        other => bail!("unknown command {:?}\n\n{}", other, USAGE),
    }
    Ok(())
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    }
    init_logging();

    let dir = PathBuf::from(&args[1]);
    run(dir.clone(), &args[2], &args[3..])
        .with_context(|| format!("{} failed for store {:?}", args[2], dir))
}
