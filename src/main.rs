mod config;
mod context;
mod mapper;
mod monitor;
mod server;
mod telemetry;
mod utils;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::{DeviceIdConvention, MapperConfig, DEFAULT_POD_RESOURCES_SOCKET};
use mapper::mig::{MigHierarchyResolver, StaticMigResolver, UnavailableMigResolver};

const APP_NAME: &str = "gpu-pod-mapper";
const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:9401";
const DEFAULT_UPSTREAM_ENDPOINT: &str = "http://127.0.0.1:9400/metrics";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_COLLECT_INTERVAL_SECS: u64 = 30;

#[derive(Parser, Debug)]
#[command(
    name = APP_NAME,
    version = VERSION,
    about = "Kubernetes workload attribution for GPU metrics",
    long_about = "gpu-pod-mapper: scrapes a GPU exporter, maps the GPU, MIG and shared GPU device IDs the kubelet assigned to each container onto the scraped samples, and serves them with pod, namespace and container labels"
)]
struct Args {
    /// The address to listen on for HTTP requests
    #[arg(
        long,
        env = "GPU_POD_MAPPER_LISTEN",
        default_value = DEFAULT_LISTEN_ADDRESS,
        help = "The address to listen on for HTTP requests"
    )]
    listen_address: String,

    /// Upstream GPU exporter endpoint
    #[arg(
        long,
        env = "GPU_POD_MAPPER_UPSTREAM",
        default_value = DEFAULT_UPSTREAM_ENDPOINT,
        help = "Upstream GPU exporter endpoint (http://, unix:// or file://)"
    )]
    upstream_endpoint: String,

    /// Kubelet pod-resources socket
    #[arg(
        long,
        env = "GPU_POD_MAPPER_POD_RESOURCES_SOCKET",
        default_value = DEFAULT_POD_RESOURCES_SOCKET,
        help = "Path to the kubelet pod-resources socket"
    )]
    pod_resources_socket: PathBuf,

    /// Device ID convention used to match samples against the kubelet
    #[arg(
        long,
        env = "KUBERNETES_GPU_ID_TYPE",
        value_enum,
        default_value_t = DeviceIdConvention::GpuUuid,
        help = "Device ID convention of the samples (uid/device-name)"
    )]
    kubernetes_gpu_id_type: DeviceIdConvention,

    /// Emit one sample per container sharing a GPU
    #[arg(
        long,
        env = "KUBERNETES_VIRTUAL_GPUS",
        help = "Emit one sample per container sharing a GPU, labelled with the vgpu slice"
    )]
    kubernetes_virtual_gpus: bool,

    /// Extra device plugin resource names carrying NVIDIA GPUs
    #[arg(
        long,
        env = "NVIDIA_RESOURCE_NAMES",
        value_delimiter = ',',
        help = "Comma-separated device plugin resource names accepted besides nvidia.com/gpu"
    )]
    nvidia_resource_names: Vec<String>,

    /// Use the legacy attribute names
    #[arg(
        long,
        env = "USE_OLD_NAMESPACE",
        help = "Label samples with pod_name/pod_namespace/container_name"
    )]
    use_old_namespace: bool,

    /// MIG hierarchy file
    #[arg(
        long,
        env = "GPU_POD_MAPPER_MIG_HIERARCHY_FILE",
        help = "JSON file mapping MIG device UUIDs to their parent GPU and GPU instance"
    )]
    mig_hierarchy_file: Option<PathBuf>,

    /// Collection interval in seconds
    #[arg(
        long,
        env = "GPU_POD_MAPPER_COLLECT_INTERVAL",
        default_value_t = DEFAULT_COLLECT_INTERVAL_SECS,
        help = "Metrics collection interval in seconds"
    )]
    collect_interval_secs: u64,

    /// Log level
    #[arg(
        long,
        env = "RUST_LOG",
        default_value = DEFAULT_LOG_LEVEL,
        help = "Log level (trace/debug/info/warn/error)"
    )]
    log_level: String,
}

impl Args {
    fn mapper_config(&self) -> MapperConfig {
        MapperConfig::with_socket(&self.pod_resources_socket)
            .with_gpu_id_type(self.kubernetes_gpu_id_type)
            .with_virtual_gpus(self.kubernetes_virtual_gpus)
            .with_resource_names(
                self.nvidia_resource_names
                    .iter()
                    .map(|name| name.trim().to_string())
                    .filter(|name| !name.is_empty())
                    .collect(),
            )
            .with_old_namespace(self.use_old_namespace)
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = init_logging(&args.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        return;
    }

    info!(
        app = APP_NAME,
        version = VERSION,
        listen_address = %args.listen_address,
        upstream_endpoint = %args.upstream_endpoint,
        pod_resources_socket = %args.pod_resources_socket.display(),
        log_level = %args.log_level,
        collect_interval_secs = args.collect_interval_secs,
        "announcement"
    );

    let mig_resolver = match load_mig_resolver(args.mig_hierarchy_file.as_deref()) {
        Ok(resolver) => resolver,
        Err(e) => {
            eprintln!("Failed to load MIG hierarchy: {:#}", e);
            return;
        }
    };

    let app_context = match context::AppContext::new(
        &args.upstream_endpoint,
        args.collect_interval_secs,
        args.mapper_config(),
        mig_resolver,
    ) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Failed to initialize application context: {:#}", e);
            return;
        }
    };

    if let Err(e) = app_context.start() {
        eprintln!("Failed to start application: {}", e);
        return;
    }

    tracing::debug!(listen_address = %args.listen_address, "Starting HTTP server");
    if let Err(e) = server::start_server(&args.listen_address, app_context).await {
        tracing::error!(error = %e, "Server error");
    }
}

/// Build the MIG hierarchy resolver from the optional hierarchy file
fn load_mig_resolver(path: Option<&std::path::Path>) -> Result<Arc<dyn MigHierarchyResolver>> {
    match path {
        Some(path) => Ok(Arc::new(StaticMigResolver::from_file(path)?)),
        None => {
            info!("No MIG hierarchy file configured, MIG devices keyed by UUID only");
            Ok(Arc::new(UnavailableMigResolver))
        }
    }
}

/// Initialize the logging system
fn init_logging(log_level: &str) -> Result<()> {
    let env_filter = match log_level {
        "trace" => EnvFilter::new("trace"),
        "debug" => EnvFilter::new("debug"),
        "info" => EnvFilter::new("info"),
        "warn" => EnvFilter::new("warn"),
        "error" => EnvFilter::new("error"),
        _ => EnvFilter::new("info"),
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_thread_ids(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
