use clap::{Arg, Command};
use jobmail::config::Config;
use jobmail::domains::{CompanyDocument, DomainRegistry};
use jobmail::patterns::{PatternDocument, PatternRegistry};
use jobmail::pipeline::Engine;
use jobmail::registry::HotReload;
use jobmail::store::MemoryStore;
use jobmail::InboundMessage;
use log::LevelFilter;
use std::fs;
use std::io::{self, BufReader};
use std::path::Path;
use std::process;

fn main() {
    let matches = Command::new("jobmail")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Job-search mail classifier and company resolver")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/jobmail/jobmail.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Validate the pattern and company documents")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("test-email")
                .long("test-email")
                .value_name("FILE")
                .help("Classify one JSON-encoded message and print the result")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("ingest")
                .long("ingest")
                .value_name("FILE")
                .help("Ingest JSON-lines messages into the aggregate store ('-' for stdin)")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("override-review")
                .long("override-review")
                .help("Re-label thread aggregates even when they were reviewed by hand")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging with per-stage decisions")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("/etc/jobmail/jobmail.yaml");
    let config_found = Path::new(config_path).exists();
    let config = match load_config(config_path, config_found) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e:#}");
            process::exit(1);
        }
    };

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        config.log_level()
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if !config_found {
        log::warn!("Configuration file '{config_path}' not found, using default configuration");
    }

    if matches.get_flag("test-config") {
        test_config(&config);
        return;
    }

    if let Some(email_file) = matches.get_one::<String>("test-email") {
        test_email_file(&config, email_file);
        return;
    }

    if let Some(input) = matches.get_one::<String>("ingest") {
        ingest_file(&config, input, matches.get_flag("override-review"));
        return;
    }

    eprintln!("Nothing to do: pass --test-email, --ingest, --test-config or --generate-config");
    process::exit(2);
}

fn load_config(path: &str, found: bool) -> anyhow::Result<Config> {
    if found {
        Config::from_file(path)
    } else {
        Ok(Config::default())
    }
}

fn generate_default_config(path: &str) {
    let config = Config::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}

fn test_config(config: &Config) {
    println!("🔍 Testing configuration...");
    println!();
    let mut failed = false;

    println!("Pattern document: {}", config.patterns_path);
    match read_json::<PatternDocument>(&config.patterns_path) {
        Ok(doc) => match PatternRegistry::validate_document(&doc) {
            Ok(()) => {
                let registry = PatternRegistry::from_document(&doc);
                println!("  {} patterns compiled successfully", registry.pattern_count());
            }
            Err(errors) => {
                println!("❌ {} pattern(s) failed to compile:", errors.len());
                for error in &errors {
                    println!("  {error}");
                }
                failed = true;
            }
        },
        Err(e) => {
            println!("❌ {e:#}");
            failed = true;
        }
    }

    println!("Company document: {}", config.companies_path);
    match read_json::<CompanyDocument>(&config.companies_path) {
        Ok(doc) => {
            let registry = DomainRegistry::from_document(&doc);
            println!(
                "  {} known companies, {} registered domains",
                registry.known_companies().len(),
                registry.domain_count()
            );
        }
        Err(e) => {
            println!("❌ {e:#}");
            failed = true;
        }
    }

    println!();
    if failed {
        println!("❌ Configuration validation failed");
        process::exit(1);
    }
    println!("✅ Configuration validated");
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> anyhow::Result<T> {
    use anyhow::Context;

    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {path}"))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {path}"))
}

fn test_email_file(config: &Config, email_file: &str) {
    let message: InboundMessage = match read_json(email_file) {
        Ok(message) => message,
        Err(e) => {
            eprintln!("❌ Error reading message file: {e:#}");
            process::exit(1);
        }
    };

    // Classification only; nothing is written to the configured store.
    let engine = Engine::with_registries(
        HotReload::load(&config.patterns_path),
        HotReload::load(&config.companies_path),
        Box::new(MemoryStore::new()),
        config.classification.clone(),
    );
    let output = engine.process(&message);

    match serde_json::to_string_pretty(&output) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("❌ Error encoding result: {e}");
            process::exit(1);
        }
    }
}

fn ingest_file(config: &Config, input: &str, override_review: bool) {
    let engine = match Engine::from_config(config) {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("Failed to start engine: {e:#}");
            process::exit(1);
        }
    };

    let result = if input == "-" {
        engine.ingest_jsonl(io::stdin().lock(), override_review)
    } else {
        match fs::File::open(input) {
            Ok(file) => engine.ingest_jsonl(BufReader::new(file), override_review),
            Err(e) => {
                eprintln!("❌ Error opening {input}: {e}");
                process::exit(1);
            }
        }
    };

    match result {
        Ok(summary) => match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("❌ Error encoding summary: {e}");
                process::exit(1);
            }
        },
        Err(e) => {
            log::error!("Ingestion stopped: {e:#}");
            process::exit(1);
        }
    }
}
