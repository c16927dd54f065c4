pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use quorum_core::config::{AppConfig, LoadOptions, LogFormat};

use commands::executions::Decision;

#[derive(Debug, Parser)]
#[command(
    name = "quorum",
    about = "Quorum approval chain operator CLI",
    long_about = "Manage approval chains, start and drive approval executions, and run the \
                  timeout sweeper against the configured SQLite store.",
    after_help = "Examples:\n  quorum migrate\n  quorum seed\n  \
                  quorum start --request request.json\n  \
                  quorum respond --execution exe-1 --order 1 --approver lee --decision approve\n  \
                  quorum serve"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a quorum.toml config file")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations")]
    Migrate,
    #[command(about = "Load and verify the demo approval chains")]
    Seed,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Import approval chains from a JSON file")]
    Import {
        #[arg(long, help = "JSON file holding one chain, a list, or a {\"chains\": [...]} set")]
        file: PathBuf,
    },
    #[command(about = "List approval chains for a tenant")]
    Chains {
        #[arg(long, help = "Tenant id (defaults to engine.default_tenant)")]
        tenant: Option<String>,
    },
    #[command(about = "Validate a stored chain configuration")]
    Validate {
        #[arg(long)]
        chain: String,
    },
    #[command(about = "Activate a chain once its configuration validates")]
    Activate {
        #[arg(long)]
        chain: String,
    },
    #[command(about = "Deactivate a chain so it is no longer selected")]
    Deactivate {
        #[arg(long)]
        chain: String,
    },
    #[command(about = "Dry-run a request against a chain without persisting anything")]
    Preview {
        #[arg(long)]
        chain: String,
        #[arg(long, help = "JSON request file")]
        request: PathBuf,
    },
    #[command(about = "Show which chain a request context would select, with the ranking")]
    Select {
        #[arg(long = "type", help = "Approval type, e.g. purchase_order")]
        approval_type: String,
        #[arg(long)]
        tenant: Option<String>,
        #[arg(long, help = "JSON request context file")]
        context: Option<PathBuf>,
    },
    #[command(about = "Start an approval execution for a request")]
    Start {
        #[arg(long, help = "JSON request file")]
        request: PathBuf,
        #[arg(long, help = "Use this chain instead of automatic selection")]
        chain: Option<String>,
    },
    #[command(about = "Record an approver's response on a step")]
    Respond {
        #[arg(long)]
        execution: String,
        #[arg(long)]
        order: u32,
        #[arg(long)]
        approver: String,
        #[arg(long, value_enum)]
        decision: Decision,
        #[arg(long)]
        comments: Option<String>,
    },
    #[command(about = "Show an execution and its transition history")]
    Show {
        #[arg(long)]
        execution: String,
    },
    #[command(about = "Apply every due step timeout once")]
    Sweep,
    #[command(about = "Run the timeout sweeper until interrupted")]
    Serve,
    #[command(about = "Show usage statistics for a chain")]
    Stats {
        #[arg(long)]
        chain: String,
    },
}

fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = LoadOptions { config_path: cli.config.clone(), ..LoadOptions::default() };

    // Commands report config failures themselves; logging just stays off.
    if let Ok(config) = AppConfig::load(options.clone()) {
        init_logging(&config);
    }

    let result = dispatch(cli.command, &options);
    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

fn dispatch(command: Command, options: &LoadOptions) -> commands::CommandResult {
    use commands::*;

    match command {
        Command::Migrate => migrate::run(options),
        Command::Seed => seed::run(options),
        Command::Config => config::run(options),
        Command::Import { file } => chains::run_import(options, &file),
        Command::Chains { tenant } => chains::run_list(options, tenant.as_deref()),
        Command::Validate { chain } => chains::run_validate(options, &chain),
        Command::Activate { chain } => chains::run_activate(options, &chain),
        Command::Deactivate { chain } => chains::run_deactivate(options, &chain),
        Command::Preview { chain, request } => preview::run(options, &chain, &request),
        Command::Select { approval_type, tenant, context } => {
            select::run(options, &approval_type, tenant.as_deref(), context.as_deref())
        }
        Command::Start { request, chain } => {
            executions::run_start(options, &request, chain.as_deref())
        }
        Command::Respond { execution, order, approver, decision, comments } => {
            executions::run_respond(options, &execution, order, &approver, decision, comments)
        }
        Command::Show { execution } => executions::run_show(options, &execution),
        Command::Sweep => sweep::run(options),
        Command::Serve => serve::run(options),
        Command::Stats { chain } => stats::run(options, &chain),
    }
}
