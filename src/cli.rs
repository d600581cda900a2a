use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio::runtime::Builder;

use crate::config::{self, OperatorSettings};
use crate::environments::{ConsoleKind, EnvironmentFactory, HttpConsoleClient, OpsToolsEnvironment};
use crate::operator_log::{self, Level};
use crate::registry::{
    EnvironmentEntry, EnvironmentRegistry, EnvironmentType, GatewayEntry, GatewayRegistry,
};
use crate::runtime_state::OperatorPaths;

#[derive(Parser)]
#[command(name = "ledger-operator")]
#[command(about = "Manage ledger environments and the gateways used to reach them", version)]
pub struct Cli {
    /// Storage root (defaults to LEDGER_OPERATOR_HOME, then settings.yaml).
    #[arg(long, global = true)]
    home: Option<PathBuf>,
    /// Print debug logging on stderr.
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(subcommand)]
    Environment(EnvironmentCommand),
    #[command(subcommand)]
    Gateway(GatewayCommand),
}

#[derive(Subcommand)]
enum EnvironmentCommand {
    List(ListArgs),
    Add(EnvironmentAddArgs),
    Remove(NameArgs),
    Nodes(EnvironmentNodesArgs),
    Import(EnvironmentImportArgs),
    Probe(NameArgs),
    Groups,
}

#[derive(Subcommand)]
enum GatewayCommand {
    List(GatewayListArgs),
    Add(GatewayAddArgs),
    Remove(NameArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EnvironmentTypeArg {
    LocalSimulated,
    OpsTools,
    SaasOpsTools,
    Generic,
}

impl From<EnvironmentTypeArg> for EnvironmentType {
    fn from(value: EnvironmentTypeArg) -> Self {
        match value {
            EnvironmentTypeArg::LocalSimulated => Self::LocalSimulated,
            EnvironmentTypeArg::OpsTools => Self::OpsTools,
            EnvironmentTypeArg::SaasOpsTools => Self::SaasOpsTools,
            EnvironmentTypeArg::Generic => Self::Generic,
        }
    }
}

#[derive(Parser)]
struct ListArgs {
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
}

#[derive(Parser)]
struct NameArgs {
    name: String,
}

#[derive(Parser)]
#[command(
    about = "Register an environment.",
    after_help = "Local simulated and console environments need --url; generic environments need --directory."
)]
struct EnvironmentAddArgs {
    name: String,
    #[arg(long = "type", value_enum)]
    environment_type: EnvironmentTypeArg,
    #[arg(long)]
    url: Option<String>,
    #[arg(long)]
    directory: Option<PathBuf>,
    /// The runtime is started and stopped by this tool.
    #[arg(long)]
    managed: bool,
    /// Make this the default local network.
    #[arg(long)]
    primary: bool,
    #[arg(long)]
    orgs: Option<u32>,
    #[arg(long)]
    capabilities: Option<String>,
}

#[derive(Parser)]
struct EnvironmentNodesArgs {
    name: String,
    /// Include nodes hidden from the environment.
    #[arg(long)]
    all: bool,
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
}

#[derive(Parser)]
#[command(about = "Refresh a console environment's stored nodes from its console.")]
struct EnvironmentImportArgs {
    name: String,
    /// Node to keep visible; repeat for several. Without it every node is visible.
    #[arg(long = "visible")]
    visible: Vec<String>,
}

#[derive(Parser)]
struct GatewayListArgs {
    /// Hide gateways produced by local simulated environments.
    #[arg(long)]
    unmanaged_only: bool,
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
}

#[derive(Parser)]
struct GatewayAddArgs {
    name: String,
    #[arg(long)]
    profile: PathBuf,
    #[arg(long, default_value = "")]
    wallet: String,
}

struct AppCtx {
    settings: OperatorSettings,
    environments: EnvironmentRegistry,
    gateways: GatewayRegistry,
    factory: Arc<EnvironmentFactory>,
}

impl AppCtx {
    fn new(settings: OperatorSettings, paths: &OperatorPaths) -> Self {
        let environments = EnvironmentRegistry::new(paths.environments_dir());
        let factory = Arc::new(EnvironmentFactory::http(settings.console_timeout()));
        let gateways = GatewayRegistry::new(
            paths.gateways_dir(),
            environments.clone(),
            factory.clone(),
        )
        .with_probe_timeout(settings.liveness_timeout());
        Self {
            settings,
            environments,
            gateways,
            factory,
        }
    }
}

impl Cli {
    pub fn run(self) -> anyhow::Result<()> {
        let settings = config::load_settings()?;
        operator_log::init_tracing(if self.verbose {
            Level::Debug
        } else {
            Level::Warn
        });
        let paths = settings.resolve_paths(self.home.as_deref())?;
        if let Err(err) = operator_log::init(paths.logs_dir(), settings.log_level) {
            eprintln!("Warning: operator log disabled: {err}");
        }
        let ctx = AppCtx::new(settings, &paths);
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to create tokio runtime")?;
        runtime.block_on(async {
            match self.command {
                Command::Environment(command) => command.run(&ctx).await,
                Command::Gateway(command) => command.run(&ctx).await,
            }
        })
    }
}

impl EnvironmentCommand {
    async fn run(self, ctx: &AppCtx) -> anyhow::Result<()> {
        match self {
            Self::List(args) => {
                let entries = ctx.environments.get_all()?;
                print_list(args.format, &entries, |entry| {
                    let location = entry
                        .console_url()
                        .map(str::to_string)
                        .or_else(|| entry.directory().map(|dir| dir.display().to_string()))
                        .unwrap_or_default();
                    let marker = if entry.primary { " (primary)" } else { "" };
                    format!(
                        "{}{marker}\t{}\t{location}",
                        entry.name, entry.environment_type
                    )
                })
            }
            Self::Add(args) => args.run(ctx),
            Self::Remove(args) => {
                ctx.environments.delete(&args.name)?;
                let removed = ctx.gateways.delete_from_environment(&args.name)?;
                operator_log::info(
                    module_path!(),
                    format!(
                        "removed environment {} and {removed} gateway(s)",
                        args.name
                    ),
                );
                println!("removed {}", args.name);
                Ok(())
            }
            Self::Nodes(args) => {
                let entry = ctx.environments.get(&args.name)?;
                let environment = ctx.factory.create(&entry)?;
                let nodes = environment.get_nodes(args.all).await?;
                print_list(args.format, &nodes, |node| {
                    let identity = match (&node.wallet, &node.identity) {
                        (Some(wallet), Some(identity)) => format!("{wallet}/{identity}"),
                        _ => "-".to_string(),
                    };
                    let hidden = if node.hidden { "\thidden" } else { "" };
                    format!(
                        "{}\t{}\t{identity}{hidden}",
                        node.name,
                        node.node_type.as_str()
                    )
                })
            }
            Self::Import(args) => args.run(ctx).await,
            Self::Probe(args) => {
                let entry = ctx.environments.get(&args.name)?;
                let environment = ctx.factory.create(&entry)?;
                let alive = environment.is_alive(ctx.settings.liveness_timeout()).await;
                println!(
                    "{}: {}",
                    args.name,
                    if alive { "alive" } else { "not alive" }
                );
                Ok(())
            }
            Self::Groups => {
                for group in ctx.environments.groups()? {
                    println!("{}", group.kind.label());
                    for entry in group.environments {
                        println!("  {}", entry.name);
                    }
                }
                Ok(())
            }
        }
    }
}

impl EnvironmentAddArgs {
    fn run(self, ctx: &AppCtx) -> anyhow::Result<()> {
        let mut entry = EnvironmentEntry::new(&self.name, self.environment_type.into());
        entry.url = self.url;
        entry.environment_directory = self.directory;
        entry.managed_runtime = self.managed;
        entry.primary = self.primary;
        entry.number_of_orgs = self.orgs;
        entry.fabric_capabilities = self.capabilities;
        ctx.environments.add(&entry)?;
        println!("added {} ({})", entry.name, entry.environment_type);
        Ok(())
    }
}

impl EnvironmentImportArgs {
    async fn run(self, ctx: &AppCtx) -> anyhow::Result<()> {
        let entry = ctx.environments.get(&self.name)?;
        let kind = match entry.environment_type {
            EnvironmentType::OpsTools => ConsoleKind::SelfHosted,
            EnvironmentType::SaasOpsTools => ConsoleKind::Saas,
            ref other => anyhow::bail!(
                "environment {} is {other}; only console environments import nodes",
                self.name
            ),
        };
        let console = Arc::new(HttpConsoleClient::new(ctx.settings.console_timeout()));
        let environment = OpsToolsEnvironment::new(entry, kind, console);
        let visible = (!self.visible.is_empty()).then_some(self.visible.as_slice());
        let nodes = environment.import_nodes(visible).await?;
        let shown = nodes.iter().filter(|node| !node.hidden).count();
        println!("imported {} node(s), {shown} visible", nodes.len());
        Ok(())
    }
}

impl GatewayCommand {
    async fn run(self, ctx: &AppCtx) -> anyhow::Result<()> {
        match self {
            Self::List(args) => {
                let gateways = ctx.gateways.get_all(!args.unmanaged_only).await?;
                print_list(args.format, &gateways, |gateway| {
                    format!(
                        "{}\t{}\t{}",
                        gateway.name,
                        if gateway.associated_wallet.is_empty() {
                            "-"
                        } else {
                            &gateway.associated_wallet
                        },
                        gateway.from_environment.as_deref().unwrap_or("-")
                    )
                })
            }
            Self::Add(args) => {
                let entry = GatewayEntry::new(&args.name, args.profile).with_wallet(args.wallet);
                ctx.gateways.add(&entry)?;
                println!("added {}", entry.name);
                Ok(())
            }
            Self::Remove(args) => {
                ctx.gateways.delete(&args.name)?;
                println!("removed {}", args.name);
                Ok(())
            }
        }
    }
}

fn print_list<T: Serialize>(
    format: Format,
    items: &[T],
    line: impl Fn(&T) -> String,
) -> anyhow::Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(items)?),
        Format::Text => {
            for item in items {
                println!("{}", line(item));
            }
        }
    }
    Ok(())
}
