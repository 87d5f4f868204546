//! Weft CLI - declarative task runner

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use weft::builtin::Outputs;
use weft::config;
use weft::error::WeftError;
use weft::fetch::{FetchPolicy, FetcherService};
use weft::runner::{parse_duration, RunContext, Runner};
use weft::store::Store;
use weft::uri::{resolve_relative, Uri};
use weft::workflow::{read_workflow, validate, validate_all, Workflow, DEFAULT_TASK};

#[derive(Parser)]
#[command(name = "weft")]
#[command(about = "Weft - declarative task runner")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run tasks from a workflow
    Run {
        /// Tasks to run, in order
        tasks: Vec<String>,

        /// Workflow location (file, http(s), pkg, or oci reference)
        #[arg(short, long, default_value = "file:tasks.yaml")]
        from: String,

        /// Task parameters, name=value
        #[arg(short, long = "with", value_name = "NAME=VALUE")]
        with: Vec<String>,

        /// Store directory for fetched workflows
        #[arg(long)]
        store: Option<PathBuf>,

        /// Cache policy: always, if-not-present, never
        #[arg(long)]
        fetch_policy: Option<FetchPolicy>,

        /// Total timeout for the whole run, e.g. 10m
        #[arg(long)]
        timeout: Option<String>,

        /// Log what would run without executing
        #[arg(long)]
        dry_run: bool,

        /// List the workflow's tasks instead of running
        #[arg(long)]
        list: bool,
    },

    /// Validate a workflow without running it
    Validate {
        /// Workflow location
        #[arg(short, long, default_value = "file:tasks.yaml")]
        from: String,
    },

    /// Inspect or clean the workflow store
    Store {
        #[command(subcommand)]
        command: StoreCommands,
    },
}

#[derive(Subcommand)]
enum StoreCommands {
    /// List cached entries
    List {
        /// Store directory
        #[arg(long)]
        store: PathBuf,
    },
    /// Remove blobs not referenced by the index
    Gc {
        /// Store directory
        #[arg(long)]
        store: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    // Step output streams through the logger at info level, so the
    // default filter must let it reach stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            tasks,
            from,
            with,
            store,
            fetch_policy,
            timeout,
            dry_run,
            list,
        } => {
            run(
                tasks,
                &from,
                with,
                store,
                fetch_policy,
                timeout,
                dry_run,
                list,
            )
            .await
        }
        Commands::Validate { from } => validate_command(&from).await,
        Commands::Store { command } => store_command(command),
    };

    if let Err(err) = result {
        let (frames, root) = err.traceback();
        eprintln!("{} {}", "Error:".red().bold(), root);
        for frame in frames {
            eprintln!("  {} {}", "at".yellow(), frame);
        }
        std::process::exit(err.exit_code());
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    tasks: Vec<String>,
    from: &str,
    with: Vec<String>,
    store: Option<PathBuf>,
    fetch_policy: Option<FetchPolicy>,
    timeout: Option<String>,
    dry_run: bool,
    list: bool,
) -> Result<(), WeftError> {
    let config = config::load()?;
    let policy = fetch_policy
        .or(config.fetch_policy)
        .unwrap_or_default();
    let store = store.map(Store::open).transpose()?.map(Arc::new);
    let service = Arc::new(FetcherService::new(store, policy)?);

    let origin = resolve_relative(None, from, &config.aliases)?;
    let cancel = cancel_on_ctrl_c();
    let bytes = service.fetch(&cancel, &origin).await?;
    let workflow = read_workflow(&bytes)?;
    validate(&workflow)?;

    if list {
        print_task_list(&workflow);
        return Ok(());
    }

    let timeout = match &timeout {
        Some(text) => Some(parse_duration(text).ok_or_else(|| {
            WeftError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid timeout '{text}'"),
            ))
        })?),
        None => None,
    };

    let with = parse_with_pairs(&with);
    let runner = Runner::new(service, dry_run).with_global_aliases(config.aliases);
    let ctx = RunContext::new(cancel, timeout);

    // No task named: the origin's ?task=, else `default`.
    let tasks = if tasks.is_empty() {
        vec![origin.task().unwrap_or(DEFAULT_TASK).to_string()]
    } else {
        tasks
    };

    for task in &tasks {
        let outputs = runner
            .run(&ctx, &workflow, task, with.clone(), &origin)
            .await?;
        for (key, value) in outputs {
            println!("{}={}", key, weft::expr::Value::from_json(&value));
        }
    }
    Ok(())
}

async fn validate_command(from: &str) -> Result<(), WeftError> {
    let config = config::load()?;
    let service = Arc::new(FetcherService::new(None, FetchPolicy::Always)?);
    let origin = resolve_relative(None, from, &config.aliases)?;
    let bytes = service.fetch(&CancellationToken::new(), &origin).await?;
    let workflow = read_workflow(&bytes)?;

    let errors = validate_all(&workflow);
    if errors.is_empty() {
        println!("{} {} is valid", "ok".green().bold(), origin);
        println!("  tasks: {}", workflow.tasks.len());
        println!("  aliases: {}", workflow.aliases.len());
        return Ok(());
    }
    for error in &errors {
        eprintln!("{} {}", "invalid:".red(), error);
    }
    Err(errors.into_iter().next().expect("non-empty").into())
}

fn store_command(command: StoreCommands) -> Result<(), WeftError> {
    match command {
        StoreCommands::List { store } => {
            let store = Store::open(store)?;
            for (uri, descriptor) in store.list() {
                println!("{uri} h1:{} {}", descriptor.hex, descriptor.size);
            }
            Ok(())
        }
        StoreCommands::Gc { store } => {
            let store = Store::open(store)?;
            let removed = store.gc()?;
            println!("removed {removed} orphaned file(s)");
            Ok(())
        }
    }
}

/// Parse repeated `--with name=value` flags.
fn parse_with_pairs(pairs: &[String]) -> Outputs {
    let mut with = BTreeMap::new();
    for pair in pairs {
        match pair.split_once('=') {
            Some((key, value)) => {
                with.insert(key.to_string(), serde_json::Value::String(value.to_string()));
            }
            None => {
                with.insert(pair.clone(), serde_json::Value::Bool(true));
            }
        }
    }
    with
}

fn print_task_list(workflow: &Workflow) {
    for (name, task) in &workflow.tasks {
        match &task.description {
            Some(description) => println!("{}  {description}", name.cyan().bold()),
            None => println!("{}", name.cyan().bold()),
        }
        for (input, param) in &task.inputs {
            let mut notes = Vec::new();
            if !param.required() {
                notes.push("optional".to_string());
            }
            if let Some(default) = &param.default {
                notes.push(format!("default: {default}"));
            }
            if let Some(env) = &param.default_from_env {
                notes.push(format!("default from ${env}"));
            }
            if notes.is_empty() {
                println!("    {input}");
            } else {
                println!("    {input} ({})", notes.join(", "));
            }
        }
    }
}

/// A token that trips on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trip = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trip.cancel();
        }
    });
    token
}
