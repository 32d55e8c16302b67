pub mod kubernetes;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tripwire::Tripwire;

use crate::model::Group;
use crate::pipeline::Discoverer;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no discovery is configured")]
    Empty,
    #[error("kubernetes discovery #{index}: {source}")]
    Kubernetes {
        index: usize,
        source: kubernetes::Error,
    },
}

/// Fans several discovery instances into one output channel.
pub struct Manager {
    discoverers: Vec<Box<dyn Discoverer>>,
}

impl Manager {
    pub fn new(discoverers: Vec<Box<dyn Discoverer>>) -> Result<Self, Error> {
        if discoverers.is_empty() {
            return Err(Error::Empty);
        }

        Ok(Manager { discoverers })
    }

    /// Builds one discovery instance per config, all of them watching
    /// through `source`.
    pub fn kubernetes(
        configs: Vec<kubernetes::Config>,
        source: Arc<dyn kubernetes::WatchSource>,
    ) -> Result<Self, Error> {
        let discoverers = configs
            .into_iter()
            .enumerate()
            .map(|(index, config)| {
                kubernetes::Discovery::new(config, Arc::clone(&source))
                    .map(|discovery| Box::new(discovery) as Box<dyn Discoverer>)
                    .map_err(|source| Error::Kubernetes { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Manager::new(discoverers)
    }

    pub fn len(&self) -> usize {
        self.discoverers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.discoverers.is_empty()
    }
}

#[async_trait]
impl Discoverer for Manager {
    async fn discover(&self, shutdown: Tripwire, out: mpsc::Sender<Vec<Group>>) {
        info!(message = "discovery manager is started", discoverers = self.discoverers.len());

        futures::future::join_all(
            self.discoverers
                .iter()
                .map(|discoverer| discoverer.discover(shutdown.clone(), out.clone())),
        )
        .await;

        info!(message = "discovery manager is stopped");
    }
}
