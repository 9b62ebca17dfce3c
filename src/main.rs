use anyhow::Context;
use clap::{Arg, Command};
use inbox_rules::actions::Action;
use inbox_rules::engine::{EngineOptions, RuleEngine};
use inbox_rules::mail_service::GmailClient;
use inbox_rules::predicate::PredicateCompiler;
use inbox_rules::settings::Settings;
use inbox_rules::store::SqliteStore;
use inbox_rules::RuleSet;
use log::LevelFilter;
use std::process;

#[tokio::main]
async fn main() {
    let matches = Command::new("inbox-rules")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Apply filter rules to stored email metadata and update the mailbox")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Settings file path")
                .default_value("inbox-rules.yaml"),
        )
        .arg(
            Arg::new("rules")
                .short('r')
                .long("rules")
                .value_name("FILE")
                .help("Rule document (JSON, or YAML by extension); overrides rules_path")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("database")
                .long("database")
                .value_name("FILE")
                .help("SQLite email store; overrides database_path")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default settings file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-rules")
                .long("test-rules")
                .help("Compile the rules, report problems and exit without touching the mailbox")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Query matches and log intended actions without applying them")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("inbox-rules.yaml");

    let mut settings = match Settings::load_or_default(config_path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            process::exit(1);
        }
    };
    if let Some(rules_path) = matches.get_one::<String>("rules") {
        settings.rules_path = rules_path.clone();
    }
    if let Some(database_path) = matches.get_one::<String>("database") {
        settings.database_path = database_path.clone();
    }
    if matches.get_flag("dry-run") {
        settings.dry_run = true;
    }

    let rule_set = match RuleSet::from_file(&settings.rules_path) {
        Ok(rule_set) if !rule_set.is_empty() => rule_set,
        Ok(_) => {
            log::error!("No rules found in {}", settings.rules_path);
            process::exit(1);
        }
        Err(e) => {
            log::error!("Failed to read rules: {e}");
            process::exit(1);
        }
    };

    if matches.get_flag("test-rules") {
        if !test_rules(&rule_set) {
            process::exit(1);
        }
        return;
    }

    if let Err(e) = run(&settings, &rule_set).await {
        log::error!("An error occurred while processing rules: {e:#}");
        process::exit(1);
    }
}

async fn run(settings: &Settings, rule_set: &RuleSet) -> anyhow::Result<()> {
    let client = GmailClient::new(&settings.gmail).context("Failed to create Gmail client")?;
    let store = SqliteStore::new(&settings.database_path);

    let options = EngineOptions {
        dry_run: settings.dry_run,
    };
    if options.dry_run {
        log::info!("Dry run: no changes will be made to the mailbox");
    }

    let engine = RuleEngine::new(client, options).await;
    let report = engine
        .process_rules(&store, &rule_set.rules)
        .await
        .with_context(|| format!("Failed to open email store {}", settings.database_path))?;

    for failed in report.failed_rules() {
        if let Some(e) = &failed.error {
            log::warn!("Rule {} was not applied: {e}", failed.rule);
        }
    }
    log::info!("Finished processing rules.");
    Ok(())
}

/// Print each rule's compiled predicate and problems. Returns false when a
/// rule could not be compiled at all.
fn test_rules(rule_set: &RuleSet) -> bool {
    let compiler = PredicateCompiler::new();
    let mut ok = true;

    println!("Number of rules: {}", rule_set.len());
    for (i, rule) in rule_set.rules.iter().enumerate() {
        println!("  Rule {}: {}", i + 1, rule.label());

        match compiler.compile(rule) {
            Ok(compiled) => {
                println!("    Match: {}", compiled.predicate);
                for warning in &compiled.warnings {
                    println!("    Warning: {warning}");
                }
            }
            Err(e) => {
                println!("    Error: {e}");
                ok = false;
            }
        }

        for (index, spec) in rule.actions.iter().enumerate() {
            match Action::resolve(index, spec) {
                Ok(action) => println!("    Action: {action}"),
                Err(warning) => println!("    Warning: {warning}"),
            }
        }
    }
    ok
}

fn generate_default_config(path: &str) {
    let settings = Settings::default();
    match settings.to_file(path) {
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
