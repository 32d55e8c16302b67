use serde::Deserialize;

use super::{ObjectMeta, Resource};

fn default_protocol() -> String {
    String::from("TCP")
}

/// ContainerPort represents a network port in a single container.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ContainerPort {
    /// If specified, this must be an IANA_SVC_NAME and unique within the pod.
    #[serde(default)]
    pub name: String,

    /// Number of port to expose on the pod's IP address.
    #[serde(rename = "containerPort")]
    pub container_port: i32,

    /// Protocol for port. Must be UDP, TCP, or SCTP. Defaults to "TCP".
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

/// Selects a key of a ConfigMap or a Secret in the pod's namespace.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct KeySelector {
    #[serde(default)]
    pub name: String,
    pub key: String,
    #[serde(default)]
    pub optional: Option<bool>,
}

/// Source for the value of an EnvVar. Downward API sources (`fieldRef`,
/// `resourceFieldRef`) are not decoded.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct EnvVarSource {
    #[serde(default, rename = "configMapKeyRef")]
    pub config_map_key_ref: Option<KeySelector>,

    #[serde(default, rename = "secretKeyRef")]
    pub secret_key_ref: Option<KeySelector>,
}

/// EnvVar represents an environment variable present in a Container.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct EnvVar {
    pub name: String,

    #[serde(default)]
    pub value: Option<String>,

    #[serde(default, rename = "valueFrom")]
    pub value_from: Option<EnvVarSource>,
}

/// Refers to a ConfigMap or a Secret in the same namespace.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct LocalObjectReference {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub optional: Option<bool>,
}

/// Populates environment variables from every key of a ConfigMap or a Secret.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct EnvFromSource {
    /// Prepended to every key.
    #[serde(default)]
    pub prefix: String,

    #[serde(default, rename = "configMapRef")]
    pub config_map_ref: Option<LocalObjectReference>,

    #[serde(default, rename = "secretRef")]
    pub secret_ref: Option<LocalObjectReference>,
}

/// A single application container that you want to run within a pod.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Container {
    /// Name of the container specified as a DNS_LABEL.
    pub name: String,

    /// Container image name.
    #[serde(default)]
    pub image: String,

    /// List of ports to expose from the container. Not specifying a port here
    /// DOES NOT prevent that port from being exposed.
    #[serde(default)]
    pub ports: Vec<ContainerPort>,

    #[serde(default)]
    pub env: Vec<EnvVar>,

    #[serde(default, rename = "envFrom")]
    pub env_from: Vec<EnvFromSource>,
}

/// PodSpec implements k8s pod spec.
///
/// See https://kubernetes.io/docs/reference/generated/kubernetes-api/v1.31/#podspec-v1-core
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct PodSpec {
    /// NodeName is a request to schedule this pod onto a specific node, empty
    /// until the pod is scheduled.
    #[serde(default, rename = "nodeName")]
    pub node_name: String,

    #[serde(default)]
    pub containers: Vec<Container>,
}

/// PodStatus represents information about the status of a pod.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct PodStatus {
    /// Pending, Running, Succeeded, Failed or Unknown.
    #[serde(default)]
    pub phase: String,

    /// IP address allocated to the pod. Empty if not yet allocated.
    #[serde(default, rename = "podIP")]
    pub pod_ip: Option<String>,

    /// IP address of the host to which the pod is assigned.
    #[serde(default, rename = "hostIP")]
    pub host_ip: Option<String>,
}

/// Pod is a collection of containers that can run on a host.
///
/// See https://kubernetes.io/docs/reference/generated/kubernetes-api/v1.31/#pod-v1-core
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Pod {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: PodSpec,

    #[serde(default)]
    pub status: PodStatus,
}

impl Resource for Pod {
    const GROUP: &'static str = "";
    const VERSION: &'static str = "v1";
    const KIND: &'static str = "Pod";
    const PLURAL: &'static str = "pods";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}
