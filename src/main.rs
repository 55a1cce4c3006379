//! capv - Cluster API infrastructure provider for Vultr

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt, ResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use capv::controller::{
    cluster_error_policy, machine_error_policy, reconcile_cluster, reconcile_machine, Context,
};
use capv::crd::{Cluster, Machine, VultrCluster, VultrMachine};
use capv::vultr::{HttpVultrClient, DEFAULT_API_URL};
use capv::DEFAULT_API_SERVER_PORT;

/// Cluster API infrastructure provider for Vultr
#[derive(Parser, Debug)]
#[command(name = "capv", version, about, long_about = None)]
struct Cli {
    /// Print the CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Vultr API key
    #[arg(long, env = "VULTR_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Vultr API base URL
    #[arg(long, env = "VULTR_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Port recorded on cluster API endpoints
    #[arg(long, env = "CAPV_API_SERVER_PORT", default_value_t = DEFAULT_API_SERVER_PORT)]
    api_server_port: u16,

    /// Only watch resources in this namespace
    #[arg(long, env = "CAPV_NAMESPACE")]
    namespace: Option<String>,

    /// Apply the CRDs with server-side apply before starting the controllers
    #[arg(long)]
    install_crds: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("CRITICAL: failed to install the rustls crypto provider");
        std::process::exit(1);
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        for crd in [VultrCluster::crd(), VultrMachine::crd()] {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    run_controllers(cli).await
}

/// Apply both CRDs so their schema always matches this binary
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(capv::controller::FIELD_MANAGER).force();

    for crd in [VultrCluster::crd(), VultrMachine::crd()] {
        let name = crd.name_any();
        tracing::info!(crd = %name, "Installing CRD");
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install CRD {}: {}", name, e))?;
    }
    Ok(())
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as kube::Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

async fn run_controllers(cli: Cli) -> anyhow::Result<()> {
    tracing::info!("capv controller starting...");

    let api_key = cli
        .api_key
        .filter(|k| !k.is_empty())
        .ok_or_else(|| anyhow::anyhow!("VULTR_API_KEY must be set"))?;
    let vultr = HttpVultrClient::new(api_key, cli.api_url.clone())
        .map_err(|e| anyhow::anyhow!("Failed to create Vultr client: {}", e))?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if cli.install_crds {
        ensure_crds_installed(&client).await?;
    }

    let ctx = Arc::new(
        Context::builder(client.clone(), Arc::new(vultr))
            .api_server_port(cli.api_server_port)
            .build(),
    );

    let namespace = cli.namespace.as_deref();
    if let Some(ns) = namespace {
        tracing::info!(namespace = %ns, "Watching a single namespace");
    }
    let vultr_clusters: Api<VultrCluster> = api(&client, namespace);
    let vultr_machines: Api<VultrMachine> = api(&client, namespace);
    let clusters: Api<Cluster> = api(&client, namespace);
    let machines: Api<Machine> = api(&client, namespace);

    tracing::info!(api_url = %cli.api_url, "Starting capv controllers...");
    tracing::info!("  - VultrCluster controller");
    tracing::info!("  - VultrMachine controller");

    // A Cluster change (e.g. its owner reference landing) retriggers its VultrCluster
    let cluster_controller = Controller::new(vultr_clusters, WatcherConfig::default())
        .watches(clusters, WatcherConfig::default(), |cluster: Cluster| {
            let namespace = cluster.namespace()?;
            let name = cluster.infrastructure_name()?;
            Some(ObjectRef::<VultrCluster>::new(name).within(&namespace))
        })
        .shutdown_on_signal()
        .run(reconcile_cluster, cluster_error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "VultrCluster reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "VultrCluster reconciliation error");
                }
            }
        });

    // Bootstrap data arrives on the Machine, so Machine changes retrigger its VultrMachine
    let machine_controller = Controller::new(vultr_machines, WatcherConfig::default())
        .watches(machines, WatcherConfig::default(), |machine: Machine| {
            let namespace = machine.namespace()?;
            let name = machine.spec.infrastructure_ref.as_ref()?.name.clone()?;
            Some(ObjectRef::<VultrMachine>::new(&name).within(&namespace))
        })
        .shutdown_on_signal()
        .run(reconcile_machine, machine_error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "VultrMachine reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "VultrMachine reconciliation error");
                }
            }
        });

    // Run both controllers concurrently
    tokio::select! {
        _ = cluster_controller => {
            tracing::info!("VultrCluster controller completed");
        }
        _ = machine_controller => {
            tracing::info!("VultrMachine controller completed");
        }
    }

    tracing::info!("capv controller shutting down");
    Ok(())
}
