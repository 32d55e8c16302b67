//! Discovers monitorable workloads in a Kubernetes cluster and keeps the
//! configs built from them in sync, emitting only additions and retractions.

#[macro_use]
extern crate tracing;

pub mod builder;
pub mod config;
pub mod discovery;
pub mod exporter;
pub mod model;
pub mod pipeline;
pub mod signal;
pub mod tagger;

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;
