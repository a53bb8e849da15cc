//! MCP Operator - runs MCP servers on Kubernetes from MCPServer resources

use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceAccount};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mcp_operator::config::OperatorConfig;
use mcp_operator::controller::{error_policy, reconcile, Context};
use mcp_operator::crd::McpServer;
use mcp_operator::retry::RetryConfig;
use mcp_operator::{DEFAULT_TRANSPORT_ADAPTER_IMAGE, FIELD_MANAGER};

/// Default log filter when RUST_LOG is unset
const DEFAULT_LOG_FILTER: &str = "mcp_operator=info,kube=info";

/// MCP Operator - reconciles MCPServer resources into Deployments and Services
#[derive(Parser, Debug)]
#[command(name = "mcp-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Watches MCPServer resources and the Deployments, Services, ConfigMaps
    /// and ServiceAccounts they own.
    Controller(ControllerArgs),
}

/// Controller mode arguments
#[derive(Parser, Debug)]
struct ControllerArgs {
    /// Only watch MCPServers in this namespace (all namespaces when unset)
    #[arg(long, env = "MCP_WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Image carrying the stdio transport adapter binary
    #[arg(
        long,
        env = "MCP_TRANSPORT_ADAPTER_IMAGE",
        default_value = DEFAULT_TRANSPORT_ADAPTER_IMAGE
    )]
    transport_adapter_image: String,

    /// Attempts per child write or reference lookup before giving up
    #[arg(long, env = "MCP_RETRY_ATTEMPTS", default_value = "4")]
    retry_attempts: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install crypto provider - aws-lc-rs backs every TLS connection to the API server
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!(
            "CRITICAL: Failed to install aws-lc-rs crypto provider: {:?}. \
             The operator cannot talk to the API server without a TLS implementation.",
            e
        );
        std::process::exit(1);
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();

    if cli.crd {
        // Generate CRD YAML
        let crd = serde_yaml::to_string(&McpServer::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    match cli.command {
        Some(Commands::Controller(args)) => run_controller(args).await,
        None => run_controller(ControllerArgs::parse_from(["controller"])).await,
    }
}

/// Ensure the MCPServer CRD is installed
///
/// The operator installs its own CRD on startup using server-side apply.
/// This ensures the CRD version always matches the operator version.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    tracing::info!("Installing MCPServer CRD...");
    crds.patch(
        "mcpservers.kagent.dev",
        &params,
        &Patch::Apply(&McpServer::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install MCPServer CRD: {}", e))?;

    tracing::info!("MCPServer CRD installed/updated");
    Ok(())
}

/// Run the MCPServer controller until a shutdown signal arrives
async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client).await?;

    let config = OperatorConfig::default()
        .with_transport_adapter_image(args.transport_adapter_image)
        .with_retry(RetryConfig::with_max_attempts(args.retry_attempts));
    let ctx = Arc::new(Context::new(client.clone(), config));

    let (servers, deployments, services, config_maps, service_accounts) =
        match &args.watch_namespace {
            Some(ns) => {
                tracing::info!(namespace = %ns, "Watching a single namespace");
                (
                    Api::<McpServer>::namespaced(client.clone(), ns),
                    Api::<Deployment>::namespaced(client.clone(), ns),
                    Api::<Service>::namespaced(client.clone(), ns),
                    Api::<ConfigMap>::namespaced(client.clone(), ns),
                    Api::<ServiceAccount>::namespaced(client.clone(), ns),
                )
            }
            None => (
                Api::<McpServer>::all(client.clone()),
                Api::<Deployment>::all(client.clone()),
                Api::<Service>::all(client.clone()),
                Api::<ConfigMap>::all(client.clone()),
                Api::<ServiceAccount>::all(client.clone()),
            ),
        };

    tracing::info!("Starting MCPServer controller...");

    Controller::new(servers, WatcherConfig::default())
        .owns(deployments, WatcherConfig::default())
        .owns(services, WatcherConfig::default())
        .owns(config_maps, WatcherConfig::default())
        .owns(service_accounts, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "MCPServer reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "MCPServer reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("MCPServer controller stopped");
    Ok(())
}
