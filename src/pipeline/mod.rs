mod engine;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tripwire::Tripwire;

use crate::model::{Config, Group, Target};

pub use engine::Engine;

/// Produces batches of groups until `shutdown` resolves.
#[async_trait]
pub trait Discoverer: Send + Sync {
    async fn discover(&self, shutdown: Tripwire, out: mpsc::Sender<Vec<Group>>);
}

/// Annotates a target before its configs are built. Invoked at most once per
/// (source, hash) pair, so implementations must be idempotent per content.
pub trait Tagger: Send + Sync {
    fn tag(&self, target: &mut dyn Target);
}

/// Turns one target into zero or more configs.
pub trait Builder: Send + Sync {
    fn build(&self, target: &dyn Target) -> crate::Result<Vec<Config>>;
}

/// Ships finalized batches, additions and retractions discriminated by
/// `Config::stale`.
#[async_trait]
pub trait Exporter: Send + Sync {
    async fn export(&self, shutdown: Tripwire, input: mpsc::Receiver<Vec<Config>>);
}

/// Wires discovery, the diff engine and the exporter into one cancellable run.
pub struct Pipeline {
    discoverer: Box<dyn Discoverer>,
    exporter: Box<dyn Exporter>,
    engine: Engine,
}

impl Pipeline {
    pub fn new(
        discoverer: Box<dyn Discoverer>,
        tagger: Box<dyn Tagger>,
        builder: Box<dyn Builder>,
        exporter: Box<dyn Exporter>,
    ) -> Self {
        Pipeline {
            discoverer,
            exporter,
            engine: Engine::new(tagger, builder),
        }
    }

    /// Runs the three stages until `shutdown` resolves, returns once all of
    /// them have stopped.
    pub async fn run(self, shutdown: Tripwire) {
        info!(message = "pipeline is started");

        let Pipeline {
            discoverer,
            exporter,
            mut engine,
        } = self;

        // capacity 1 is the closest tokio gets to a rendezvous channel
        let (groups_tx, groups_rx) = mpsc::channel(1);
        let (configs_tx, configs_rx) = mpsc::channel(1);

        tokio::join!(
            discoverer.discover(shutdown.clone(), groups_tx),
            forward(&mut engine, shutdown.clone(), groups_rx, configs_tx),
            exporter.export(shutdown, configs_rx),
        );

        info!(message = "pipeline is stopped");
    }
}

/// The middle stage, every non-empty result is either handed to the exporter
/// or abandoned because of cancellation.
async fn forward(
    engine: &mut Engine,
    mut shutdown: Tripwire,
    mut input: mpsc::Receiver<Vec<Group>>,
    output: mpsc::Sender<Vec<Config>>,
) {
    loop {
        let groups = tokio::select! {
            biased;

            _ = &mut shutdown => break,
            groups = input.recv() => match groups {
                Some(groups) => groups,
                None => {
                    debug!(message = "discovery closed its output");
                    break;
                }
            }
        };

        let configs = engine.process(groups);
        if configs.is_empty() {
            continue;
        }

        tokio::select! {
            biased;

            _ = &mut shutdown => break,
            result = output.send(configs) => if result.is_err() {
                debug!(message = "exporter closed its input");
                break;
            }
        }
    }
}
