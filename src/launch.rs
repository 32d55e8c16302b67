use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use argh::FromArgs;
use exitcode::ExitCode;
use kubernetes::Client;
use scout::builder::JsonBuilder;
use scout::config::{Cluster, Config};
use scout::discovery::Manager;
use scout::exporter::ConsoleExporter;
use scout::pipeline::Pipeline;
use scout::signal::{SignalTo, os_signal};
use scout::tagger::StaticTagger;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tripwire::Tripwire;

fn default_worker_threads() -> usize {
    match std::env::var("SCOUT_WORKER_THREADS") {
        Ok(value) => value.parse::<usize>().unwrap_or(1),
        Err(_) => std::thread::available_parallelism()
            .map(|threads| threads.get())
            .unwrap_or(1),
    }
}

#[derive(FromArgs)]
#[argh(
    description = "Scout discovers Kubernetes workloads and keeps monitoring configs in sync with them",
    help_triggers("-h", "--help")
)]
pub struct RootCommand {
    #[argh(switch, short = 'v', description = "show version")]
    version: bool,

    #[argh(
        option,
        short = 'l',
        default = "\"info\".to_string()",
        description = "log level"
    )]
    log_level: String,

    #[argh(
        option,
        short = 'c',
        default = "PathBuf::from(\"/etc/scout/scout.yaml\")",
        description = "read configuration from this file"
    )]
    config: PathBuf,

    #[argh(
        option,
        short = 't',
        default = "default_worker_threads()",
        description = "specify how many threads the Tokio runtime will use"
    )]
    threads: usize,
}

impl RootCommand {
    #![allow(clippy::print_stdout)]
    fn show_version(&self) {
        println!("Scout {}", env!("CARGO_PKG_VERSION"));
    }

    pub fn run(&self) -> Result<(), ExitCode> {
        if self.version {
            self.show_version();
            return Ok(());
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("scout-worker")
            .worker_threads(self.threads.max(1))
            .enable_io()
            .enable_time()
            .build()
            .map_err(|_err| exitcode::OSERR)?;

        let log_level = std::env::var("SCOUT_LOG").unwrap_or_else(|_| self.log_level.clone());
        // stdout carries the exported configs, logs go to stderr
        let color = std::io::stderr().is_terminal();
        init_tracing(color, &log_level);

        runtime.block_on(async move {
            info!(
                message = "Start scout",
                version = env!("CARGO_PKG_VERSION"),
                threads = self.threads,
                config = ?self.config
            );

            let mut config = Config::load(&self.config).map_err(|err| {
                error!(message = "Load config failed", %err);
                exitcode::CONFIG
            })?;
            if config.node_name.is_none() {
                config.node_name = std::env::var("MY_NODE_NAME").ok();
            }

            let client = build_client(config.cluster.as_ref()).map_err(|err| {
                error!(message = "Build kubernetes client failed", %err);
                exitcode::CONFIG
            })?;

            let manager = Manager::kubernetes(config.discovery(), Arc::new(client)).map_err(|err| {
                error!(message = "Invalid discovery config", %err);
                exitcode::CONFIG
            })?;

            let pipeline = Pipeline::new(
                Box::new(manager),
                Box::new(StaticTagger::new(config.tags.clone())),
                Box::new(JsonBuilder::new(config.required_tag.clone())),
                Box::new(ConsoleExporter::stdout()),
            );

            let (trigger, shutdown) = Tripwire::new("scout");
            let mut pipeline = tokio::spawn(pipeline.run(shutdown));

            let signal = tokio::select! {
                _ = &mut pipeline => {
                    warn!(message = "Pipeline stopped unexpectedly");
                    return Err(exitcode::SOFTWARE);
                }
                signal = os_signal() => signal.map_err(|err| {
                    error!(message = "Install signal handlers failed", %err);
                    exitcode::OSERR
                })?,
            };

            match signal {
                SignalTo::Shutdown => {
                    info!(message = "Shutdown signal received");

                    trigger.cancel();
                    tokio::select! {
                        _ = pipeline => {},
                        // a second signal skips the graceful shutdown
                        _ = os_signal() => {}
                    }
                }
                SignalTo::Quit => {
                    info!(message = "Quit signal received");

                    pipeline.abort();
                }
            }

            Ok::<(), ExitCode>(())
        })?;

        runtime.shutdown_timeout(Duration::from_secs(5));

        Ok(())
    }
}

fn build_client(cluster: Option<&Cluster>) -> Result<Client, kubernetes::Error> {
    match cluster {
        Some(cluster) => {
            let config = kubernetes::Config::explicit(
                &cluster.api_server,
                cluster.token_file.as_deref(),
                cluster.ca_file.as_deref(),
            )?;

            Client::new(config)
        }
        None => Client::incluster(),
    }
}

fn init_tracing(color: bool, levels: &str) {
    let filter = EnvFilter::try_new(levels).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_ansi(color)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
