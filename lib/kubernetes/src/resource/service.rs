use serde::Deserialize;

use super::{ObjectMeta, Resource};

fn default_protocol() -> String {
    String::from("TCP")
}

fn default_type() -> String {
    String::from("ClusterIP")
}

/// ServicePort is k8s service port.
///
/// See https://kubernetes.io/docs/reference/generated/kubernetes-api/v1.31/#serviceport-v1-core
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ServicePort {
    /// The name of this port within the service. Optional if only one
    /// ServicePort is defined on this service.
    #[serde(default)]
    pub name: String,

    /// The IP protocol for this port. Supports "TCP", "UDP", and "SCTP". Default is TCP.
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// The port that will be exposed by this service.
    pub port: i32,
}

/// ServiceSpec is k8s service spec.
///
/// See https://kubernetes.io/docs/reference/generated/kubernetes-api/v1.31/#servicespec-v1-core
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ServiceSpec {
    /// The IP address of the service. "None" makes a headless service, empty
    /// for ExternalName services.
    #[serde(default, rename = "clusterIP")]
    pub cluster_ip: String,

    /// The external reference that discovery mechanisms will return as an alias
    /// for this service, requires `type` to be "ExternalName".
    #[serde(default, rename = "externalName")]
    pub external_name: String,

    /// ExternalName, ClusterIP, NodePort, or LoadBalancer. Defaults to ClusterIP.
    #[serde(default = "default_type", rename = "type")]
    pub typ: String,

    #[serde(default)]
    pub ports: Vec<ServicePort>,
}

impl Default for ServiceSpec {
    fn default() -> Self {
        ServiceSpec {
            cluster_ip: String::new(),
            external_name: String::new(),
            typ: default_type(),
            ports: Vec::new(),
        }
    }
}

/// Service is k8s service.
///
/// See https://kubernetes.io/docs/reference/generated/kubernetes-api/v1.31/#service-v1-core
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Service {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ServiceSpec,
}

impl Resource for Service {
    const GROUP: &'static str = "";
    const VERSION: &'static str = "v1";
    const KIND: &'static str = "Service";
    const PLURAL: &'static str = "services";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}
