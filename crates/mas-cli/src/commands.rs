use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use colored::Colorize;
use mas_archive::{ArchiveReader, ArchiveWriter, RawLoader};
use mas_store::{ModelArchiveStore, StoreConfig, StoreOutcome};
use mas_types::{Manifest, PayloadKey, SimpleKey};
use serde_json::json;

use crate::cli::*;

type Store = ModelArchiveStore<RawLoader>;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let format = cli.format;
    match cli.command {
        Command::List(_) => cmd_list(&config, format),
        Command::Add(args) => cmd_add(&config, args, format),
        Command::Has(args) => cmd_has(&config, args, format),
        Command::Get(args) => cmd_get(&config, args, format),
        Command::Find(args) => cmd_find(&config, args, format),
        Command::Inspect(args) => cmd_inspect(args, format),
        Command::Pack(args) => cmd_pack(&config, args, format),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<StoreConfig> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::from_toml_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => StoreConfig::default(),
    };
    if let Some(root) = &cli.root {
        config.root = root.clone();
    }
    Ok(config)
}

fn open_store(config: &StoreConfig) -> anyhow::Result<Store> {
    ModelArchiveStore::open(config.clone(), RawLoader)
        .with_context(|| format!("opening store at {}", config.root.display()))
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn blake3_hex(data: &[u8]) -> String {
    hex::encode(blake3::hash(data).as_bytes())
}

fn cmd_list(config: &StoreConfig, format: OutputFormat) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let manifests = store.get_all_manifests();
    if format == OutputFormat::Json {
        return print_json(&serde_json::to_value(&manifests)?);
    }

    if manifests.is_empty() {
        println!("No archives stored in {}.", config.root.display());
        return Ok(());
    }
    for manifest in &manifests {
        let models = store
            .get_archive(&manifest.id())
            .map(|a| a.payload_keys().len())
            .unwrap_or(0);
        println!(
            "{} {}  {}  ({} models)",
            manifest.name.bold(),
            manifest.version.to_string().yellow(),
            manifest.timestamp.to_rfc3339().dimmed(),
            models
        );
    }
    Ok(())
}

fn cmd_add(config: &StoreConfig, args: AddArgs, format: OutputFormat) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let mut results = Vec::new();
    for path in &args.paths {
        let staged = stage_copy(store.root(), path)?;
        let outcome = store.store_file(&staged).map_err(|e| {
            let _ = fs::remove_file(&staged);
            e
        });
        let outcome = outcome.with_context(|| format!("storing {}", path.display()))?;
        match format {
            OutputFormat::Text => print_outcome(path, &outcome),
            OutputFormat::Json => results.push(outcome_json(path, &outcome)),
        }
    }
    if format == OutputFormat::Json {
        print_json(&serde_json::Value::Array(results))?;
    }
    Ok(())
}

/// Copy `source` into the store directory under a name the directory scan
/// ignores, leaving the original in place.
fn stage_copy(root: &Path, source: &Path) -> anyhow::Result<PathBuf> {
    let mut input =
        fs::File::open(source).with_context(|| format!("opening {}", source.display()))?;
    let mut staged = tempfile::Builder::new()
        .prefix(".incoming-")
        .tempfile_in(root)?;
    std::io::copy(&mut input, staged.as_file_mut())?;
    let (_, path) = staged.keep()?;
    Ok(path)
}

fn print_outcome(source: &Path, outcome: &StoreOutcome) {
    match outcome {
        StoreOutcome::Accepted { manifest, replaced } => {
            println!(
                "{} Stored {} {} from {}",
                "✓".green().bold(),
                manifest.name.bold(),
                manifest.version.to_string().yellow(),
                source.display()
            );
            if let Some(old) = replaced {
                println!("  Replaced build from {}", old.timestamp.to_rfc3339().dimmed());
            }
        }
        StoreOutcome::Rejected { manifest, current } => {
            println!(
                "{} Rejected {} {} from {}",
                "✗".red().bold(),
                manifest.name.bold(),
                manifest.version.to_string().yellow(),
                source.display()
            );
            if let Some(current) = current {
                println!(
                    "  A newer build from {} is already stored",
                    current.timestamp.to_rfc3339().cyan()
                );
            }
        }
    }
}

fn outcome_json(source: &Path, outcome: &StoreOutcome) -> serde_json::Value {
    match outcome {
        StoreOutcome::Accepted { manifest, replaced } => json!({
            "file": source,
            "accepted": true,
            "manifest": manifest,
            "replaced": replaced,
        }),
        StoreOutcome::Rejected { manifest, current } => json!({
            "file": source,
            "accepted": false,
            "manifest": manifest,
            "current": current,
        }),
    }
}

fn cmd_has(config: &StoreConfig, args: KeyArgs, format: OutputFormat) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let key = PayloadKey::new(args.key)?;
    let present = store.has_model(&key);
    match format {
        OutputFormat::Json => print_json(&json!({ "key": key, "present": present }))?,
        OutputFormat::Text if present => println!("{} {}", "✓".green().bold(), key),
        OutputFormat::Text => println!("{} {} not stored", "✗".red().bold(), key),
    }
    Ok(())
}

fn cmd_get(config: &StoreConfig, args: GetArgs, format: OutputFormat) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let key = PayloadKey::new(args.key)?;
    let Some(bytes) = store.get_model(&key)? else {
        bail!("model {key} is not stored");
    };

    if args.raw {
        std::io::stdout().write_all(&bytes)?;
        return Ok(());
    }
    match format {
        OutputFormat::Json => print_json(&json!({
            "key": key,
            "size": bytes.len(),
            "blake3": blake3_hex(&bytes),
        }))?,
        OutputFormat::Text => match std::str::from_utf8(&bytes) {
            Ok(text) => println!("{text}"),
            Err(_) => println!(
                "{}: {} bytes, blake3 {}",
                key.to_string().bold(),
                bytes.len(),
                blake3_hex(&bytes).dimmed()
            ),
        },
    }
    Ok(())
}

fn cmd_find(config: &StoreConfig, args: FindArgs, format: OutputFormat) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let simple = SimpleKey::new(args.simple_key);
    let found = store.get_models_by_simple_key(&simple);

    if format == OutputFormat::Json {
        let models: Vec<_> = found
            .models
            .iter()
            .map(|(key, bytes)| json!({ "key": key, "size": bytes.len() }))
            .collect();
        let failures: Vec<_> = found
            .failures
            .iter()
            .map(|(key, err)| json!({ "key": key, "error": err.to_string() }))
            .collect();
        return print_json(&json!({ "models": models, "failures": failures }));
    }

    if found.is_empty() {
        println!("No models match {}.", simple.to_string().bold());
        return Ok(());
    }
    for (key, bytes) in &found.models {
        println!("{}  {} bytes", key.to_string().bold(), bytes.len());
    }
    for (key, err) in &found.failures {
        println!("{}  {}", key.to_string().bold(), err.to_string().red());
    }
    Ok(())
}

fn cmd_inspect(args: InspectArgs, format: OutputFormat) -> anyhow::Result<()> {
    let reader = ArchiveReader::open(&args.file)
        .with_context(|| format!("reading archive {}", args.file.display()))?;
    let manifest = reader.manifest()?;
    let keys = reader.payload_keys()?;
    let checksum = hex::encode(reader.checksum());

    if format == OutputFormat::Json {
        return print_json(&json!({
            "file": args.file,
            "manifest": manifest,
            "entries": reader.entry_count(),
            "keys": keys,
            "blake3": checksum,
        }));
    }

    println!("{} {}", "Archive".bold(), args.file.display());
    println!("  Name:      {}", manifest.name.bold());
    println!("  Version:   {}", manifest.version.to_string().yellow());
    println!("  Timestamp: {}", manifest.timestamp.to_rfc3339());
    println!("  Slot file: {}", manifest.id().file_stem().cyan());
    println!("  BLAKE3:    {}", checksum.dimmed());
    println!("  Models:    {}", keys.len());
    for key in &keys {
        println!("    {key}");
    }
    Ok(())
}

fn cmd_pack(config: &StoreConfig, args: PackArgs, format: OutputFormat) -> anyhow::Result<()> {
    let timestamp = match &args.timestamp {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .with_context(|| format!("invalid timestamp {raw:?}"))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };
    let manifest = Manifest::new(args.name, args.version, timestamp)?;

    let mut payloads = Vec::with_capacity(args.payloads.len());
    for arg in &args.payloads {
        let (key, file) = arg
            .split_once('=')
            .with_context(|| format!("payload {arg:?} is not KEY=FILE"))?;
        let data = fs::read(file).with_context(|| format!("reading {file}"))?;
        payloads.push((PayloadKey::new(key)?, data));
    }

    if args.add {
        let store = open_store(config)?;
        let staged = store
            .root()
            .join(format!(".incoming-{}", manifest.id().file_stem()));
        let mut writer = store.archive_writer(manifest);
        add_payloads(&mut writer, &payloads);
        writer.finish(&staged)?;
        let outcome = store.store_file(&staged)?;
        return match format {
            OutputFormat::Text => {
                print_outcome(&staged, &outcome);
                Ok(())
            }
            OutputFormat::Json => print_json(&outcome_json(&staged, &outcome)),
        };
    }

    let output = args.output.unwrap_or_else(|| {
        PathBuf::from(format!("{}.{}", manifest.id().file_stem(), config.extension))
    });
    let mut writer =
        ArchiveWriter::new(manifest).with_compression_level(config.compression_level);
    add_payloads(&mut writer, &payloads);
    let written = writer.finish(&output)?;

    match format {
        OutputFormat::Json => print_json(&json!({
            "file": written.path,
            "entries": written.entry_count,
            "blake3": hex::encode(written.checksum),
        }))?,
        OutputFormat::Text => println!(
            "{} Wrote {} ({} entries, blake3 {})",
            "✓".green().bold(),
            written.path.display(),
            written.entry_count,
            hex::encode(written.checksum).dimmed()
        ),
    }
    Ok(())
}

fn add_payloads(writer: &mut ArchiveWriter, payloads: &[(PayloadKey, Vec<u8>)]) {
    for (key, data) in payloads {
        writer.add_payload(key, data);
    }
}
