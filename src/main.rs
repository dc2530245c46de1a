// Nexus control-node CLI

use std::io::{self, Write};
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::*;
use tracing_subscriber::EnvFilter;

use nexus_control::config::ControlNodeConfig;
use nexus_control::facade::{ControlNodeIntegration, SavePathRequest};
use nexus_control::hosts::{Actor, HostId};
use nexus_control::output::{render_error, ControlNodeError, Failure, OutputFormat, OutputWriter, ResultJson};
use nexus_control::registry::{PathId, PathKind};
use nexus_control::schedule::PlaybookRunRequest;

#[derive(Parser)]
#[command(
    name = "nexus-control",
    about = "Manage Ansible control nodes: paths, inventories, playbooks and scheduled runs",
    version,
    author,
    disable_colored_help = true,
    term_width = 0,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Login of the acting user
    #[arg(long, global = true, default_value = "admin")]
    actor: String,

    /// Organization the acting user belongs to
    #[arg(long, global = true, default_value = "1")]
    org: u64,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode - only show errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    output_format: String,

    /// Seconds a control node gets to answer
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// SSH user (overrides configuration)
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Path to SSH private key
    #[arg(long, global = true)]
    private_key: Option<String>,

    /// Prompt for SSH password
    #[arg(short = 'k', long, global = true)]
    ask_pass: bool,
}

#[derive(Subcommand)]
#[command(disable_colored_help = true)]
enum Commands {
    /// Manage registered playbook and inventory paths
    Paths {
        #[command(subcommand)]
        action: PathsAction,
    },

    /// Show the group/host tree of an inventory path
    Introspect {
        path_id: PathId,

        /// Print the tree as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// List the playbooks below a playbook path
    Discover { path_id: PathId },

    /// Print a playbook below a playbook path
    Fetch {
        path_id: PathId,

        /// Playbook path relative to the registered directory
        playbook: String,
    },

    /// Schedule a playbook run on a control node
    Schedule {
        /// Control node host id
        host: HostId,

        /// Playbook to run
        playbook: String,

        /// Inventory to use instead of the default
        #[arg(short, long)]
        inventory: Option<String>,

        /// Earliest start time (RFC 3339), now when omitted
        #[arg(long)]
        at: Option<String>,

        /// Run in check mode (dry run)
        #[arg(short = 'C', long)]
        check: bool,

        /// Flush the fact cache before running
        #[arg(long)]
        flush_cache: bool,
    },
}

#[derive(Subcommand)]
#[command(disable_colored_help = true)]
enum PathsAction {
    /// List paths registered for a host
    List { host: HostId },

    /// Register a new path
    Add {
        host: HostId,

        /// playbook or inventory
        kind: String,

        path: String,
    },

    /// Change the path of an existing record
    Update { path_id: PathId, path: String },

    /// Remove a path record
    Remove { path_id: PathId },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "debug" } else { "warn" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            match e.downcast_ref::<ControlNodeError>() {
                Some(error) => eprint!("{}", render_error(error)),
                None => eprintln!("{} {:#}", "ERROR:".red().bold(), e),
            }
            std::process::exit(2);
        }
    }
}

/// Returns whether the operation succeeded
async fn run(cli: Cli) -> anyhow::Result<bool> {
    let output_format = OutputFormat::from_str(&cli.output_format).unwrap_or_else(|_| {
        eprintln!("Invalid output format: {}. Using 'text'.", cli.output_format);
        OutputFormat::Text
    });

    let mut config = ControlNodeConfig::load(cli.config.as_deref())?;
    if let Some(timeout) = cli.timeout {
        if timeout == 0 {
            bail!("--timeout must be greater than zero");
        }
        config.gateway.timeout_secs = timeout;
    }
    if cli.user.is_some() {
        config.ssh.user = cli.user.clone();
    }
    if cli.private_key.is_some() {
        config.ssh.private_key = cli.private_key.clone();
    }
    if cli.ask_pass {
        config.ssh.password = Some(prompt_password("SSH password: ")?);
    }

    let facade = ControlNodeIntegration::from_config(&config)?;
    let actor = Actor::new(cli.actor, cli.org);
    let out = OutputWriter::new(output_format, cli.quiet);

    let success = match cli.command {
        Commands::Paths { action } => match action {
            PathsAction::List { host } => {
                let result = facade.list_paths(host, &actor);
                out.print(&result, |t, paths| t.print_paths(paths));
                result.is_success()
            }
            PathsAction::Add { host, kind, path } => {
                let kind = PathKind::from_str(&kind).map_err(anyhow::Error::msg)?;
                let result = facade.save_path(&SavePathRequest::create(kind, host, path), &actor);
                out.print(&result, |t, id| t.print_saved(*id));
                result.is_success()
            }
            PathsAction::Update { path_id, path } => {
                let result = match facade.registry().get(path_id, &actor) {
                    Ok(record) => facade.save_path(
                        &SavePathRequest::update(path_id, record.kind, record.host_id, path),
                        &actor,
                    ),
                    Err(error) => ResultJson::failure(Failure::from_error(&error, facade.catalog())),
                };
                out.print(&result, |t, id| t.print_saved(*id));
                result.is_success()
            }
            PathsAction::Remove { path_id } => {
                let result = facade.delete_path(path_id, &actor);
                out.print(&result, |t, id| t.print_deleted(*id));
                result.is_success()
            }
        },
        Commands::Introspect { path_id, yaml } => {
            let spinner = out.spinner("Resolving inventory on control node...");
            if yaml {
                let result = facade.introspect_inventory_yaml(path_id, &actor).await;
                spinner.finish_and_clear();
                out.print(&result, |t, yaml| t.print_contents(yaml));
                result.is_success()
            } else {
                let result = facade.introspect_inventory(path_id, &actor).await;
                spinner.finish_and_clear();
                out.print(&result, |t, tree| t.print_inventory(tree));
                result.is_success()
            }
        }
        Commands::Discover { path_id } => {
            let spinner = out.spinner("Listing playbooks on control node...");
            let result = facade.discover_playbooks(path_id, &actor).await;
            spinner.finish_and_clear();
            out.print(&result, |t, tree| t.print_playbooks(tree));
            result.is_success()
        }
        Commands::Fetch { path_id, playbook } => {
            let spinner = out.spinner("Reading playbook...");
            let result = facade.fetch_playbook_contents(path_id, &playbook, &actor).await;
            spinner.finish_and_clear();
            out.print(&result, |t, contents| t.print_contents(contents));
            result.is_success()
        }
        Commands::Schedule {
            host,
            playbook,
            inventory,
            at,
            check,
            flush_cache,
        } => {
            let mut request = PlaybookRunRequest::new(host, playbook)
                .with_test_mode(check)
                .with_flush_cache(flush_cache);
            if let Some(inventory) = inventory {
                request = request.with_inventory(inventory);
            }
            if let Some(at) = at {
                let earliest = DateTime::parse_from_rfc3339(&at)
                    .with_context(|| format!("invalid --at timestamp '{}'", at))?;
                request = request.with_earliest(earliest.with_timezone(&Utc));
            }

            let result = facade.schedule_playbook(request, &actor).await;
            out.print(&result, |t, id| t.print_scheduled(id));
            result.is_success()
        }
    };

    Ok(success)
}

fn prompt_password(prompt: &str) -> anyhow::Result<String> {
    // Print prompt to stderr so it appears even with redirected stdout
    eprint!("{}", prompt.cyan());
    io::stderr().flush().ok();

    // Read password with echo disabled
    let password = rpassword::read_password().context("Failed to read password")?;
    let password = password.trim().to_string();

    // Print newline after password entry (since echo was disabled)
    eprintln!();

    if password.is_empty() {
        bail!("Password cannot be empty");
    }

    Ok(password)
}
