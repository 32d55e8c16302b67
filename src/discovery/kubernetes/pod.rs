use std::collections::BTreeMap;

use async_trait::async_trait;
use kubernetes::{ConfigMap, Container, ContainerPort, KeySelector, Pod, Secret, WatchConfig};
use serde::Serialize;
use tripwire::Tripwire;

use super::informer::Informer;
use super::{Dependencies, EventStream, Kind, Role, WatchSource, join_host_port};
use crate::model::{Group, Tags, Target, calc_hash};

/// ConfigMaps and Secrets of the watched namespace, the sources of
/// `valueFrom` and `envFrom` container variables.
#[derive(Default)]
pub struct EnvSources {
    config_maps: Informer<ConfigMap>,
    secrets: Informer<Secret>,
}

impl EnvSources {
    fn config_map(&self, namespace: &str, name: &str) -> Option<BTreeMap<String, String>> {
        self.config_maps
            .get(&format!("{namespace}/{name}"))
            .map(|config_map| config_map.data.clone())
    }

    /// Values which are not UTF-8 can't be passed on as env vars, and are
    /// left out.
    fn secret(&self, namespace: &str, name: &str) -> Option<BTreeMap<String, String>> {
        self.secrets.get(&format!("{namespace}/{name}")).map(|secret| {
            secret
                .data
                .iter()
                .filter_map(|(key, value)| {
                    String::from_utf8(value.clone())
                        .ok()
                        .map(|value| (key.clone(), value))
                })
                .collect()
        })
    }

    fn lookup(
        &self,
        namespace: &str,
        selector: &KeySelector,
        fetch: fn(&Self, &str, &str) -> Option<BTreeMap<String, String>>,
    ) -> Option<String> {
        fetch(self, namespace, &selector.name)?.remove(&selector.key)
    }

    /// Resolves the env of a container. `envFrom` entries go first, then
    /// `env` entries override them. Of an `env` entry, a non-empty literal
    /// value wins over a secret key, which wins over a config map key.
    fn resolve(&self, namespace: &str, container: &Container) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();

        for source in &container.env_from {
            let data = [
                source
                    .config_map_ref
                    .as_ref()
                    .and_then(|reference| self.config_map(namespace, &reference.name)),
                source
                    .secret_ref
                    .as_ref()
                    .and_then(|reference| self.secret(namespace, &reference.name)),
            ];

            for (key, value) in data.into_iter().flatten().flatten() {
                env.insert(format!("{}{key}", source.prefix), value);
            }
        }

        for var in &container.env {
            if var.name.is_empty() {
                continue;
            }

            let value = match var.value.as_deref() {
                Some(value) if !value.is_empty() => Some(value.to_string()),
                _ => var.value_from.as_ref().and_then(|from| {
                    from.secret_key_ref
                        .as_ref()
                        .and_then(|selector| self.lookup(namespace, selector, Self::secret))
                        .or_else(|| {
                            from.config_map_key_ref.as_ref().and_then(|selector| {
                                self.lookup(namespace, selector, Self::config_map)
                            })
                        })
                }),
            };

            if let Some(value) = value {
                env.insert(var.name.clone(), value);
            }
        }

        env
    }
}

#[async_trait]
impl Dependencies for EnvSources {
    fn has_synced(&self) -> bool {
        self.config_maps.has_synced() && self.secrets.has_synced()
    }

    async fn synced(&self) {
        tokio::join!(self.config_maps.synced(), self.secrets.synced());
    }

    async fn run(&self, source: &dyn WatchSource, namespace: Option<&str>, shutdown: Tripwire) {
        // pod selectors don't apply here
        let config = WatchConfig {
            bookmark: true,
            ..Default::default()
        };

        tokio::join!(
            self.config_maps.run(
                source.config_maps(namespace, config.clone()),
                None,
                shutdown.clone()
            ),
            self.secrets.run(source.secrets(namespace, config), None, shutdown),
        );
    }
}

/// The semantic part of a pod target, everything in here is hashed.
#[derive(Clone, Debug, Hash, PartialEq, Serialize)]
pub struct PodFields {
    pub address: String,
    pub namespace: String,
    pub name: String,
    pub annotations: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub node_name: String,
    pub pod_ip: String,
    pub controller_name: String,
    pub controller_kind: String,
    pub container_name: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub port: String,
    pub port_name: String,
    pub port_protocol: String,
}

/// One container port of a pod, or a port-less container.
#[derive(Debug)]
pub struct PodTarget {
    hash: u64,
    tuid: String,
    tags: Tags,

    fields: PodFields,
}

impl PodTarget {
    fn new(
        pod: &Pod,
        pod_ip: &str,
        container: &Container,
        env: BTreeMap<String, String>,
        port: Option<&ContainerPort>,
    ) -> Self {
        let meta = &pod.metadata;
        let (controller_kind, controller_name) = meta
            .controller()
            .map(|owner| (owner.kind.clone(), owner.name.clone()))
            .unwrap_or_default();

        let (address, port_number, port_name, port_protocol) = match port {
            Some(port) => (
                join_host_port(pod_ip, port.container_port),
                port.container_port.to_string(),
                port.name.clone(),
                port.protocol.clone(),
            ),
            None => (
                pod_ip.to_string(),
                String::new(),
                String::new(),
                String::new(),
            ),
        };

        let fields = PodFields {
            address,
            namespace: meta.namespace.clone(),
            name: meta.name.clone(),
            annotations: meta.annotations.clone(),
            labels: meta.labels.clone(),
            node_name: pod.spec.node_name.clone(),
            pod_ip: pod_ip.to_string(),
            controller_name,
            controller_kind,
            container_name: container.name.clone(),
            image: container.image.clone(),
            env,
            port: port_number,
            port_name,
            port_protocol,
        };

        PodTarget {
            hash: calc_hash(&fields),
            tuid: tuid(pod, container, port),
            tags: Tags::new(),
            fields,
        }
    }
}

impl Target for PodTarget {
    fn hash(&self) -> u64 {
        self.hash
    }

    fn tuid(&self) -> &str {
        &self.tuid
    }

    fn tags(&self) -> &Tags {
        &self.tags
    }

    fn tags_mut(&mut self) -> &mut Tags {
        &mut self.tags
    }

    fn fields(&self) -> serde_json::Value {
        serde_json::to_value(&self.fields).unwrap_or_default()
    }
}

fn tuid(pod: &Pod, container: &Container, port: Option<&ContainerPort>) -> String {
    match port {
        Some(port) => format!(
            "{}_{}_{}_{}_{}",
            pod.metadata.namespace,
            pod.metadata.name,
            container.name,
            port.protocol.to_lowercase(),
            port.container_port
        ),
        None => format!(
            "{}_{}_{}",
            pod.metadata.namespace, pod.metadata.name, container.name
        ),
    }
}

impl Kind for Pod {
    const ROLE: Role = Role::Pod;

    type Dependencies = EnvSources;

    fn watch(
        source: &dyn WatchSource,
        namespace: Option<&str>,
        config: WatchConfig,
    ) -> EventStream<Self> {
        source.pods(namespace, config)
    }

    fn source(namespace: &str, name: &str) -> String {
        format!("k8s/pod/{namespace}/{name}")
    }

    fn build_group(&self, env_sources: &EnvSources) -> Group {
        let source = Self::source(&self.metadata.namespace, &self.metadata.name);

        let pod_ip = match self.status.pod_ip.as_deref() {
            Some(ip) if !ip.is_empty() => ip,
            _ => return Group::tombstone(source),
        };

        let mut targets: Vec<Box<dyn Target>> = Vec::new();
        for container in &self.spec.containers {
            let env = env_sources.resolve(&self.metadata.namespace, container);

            if container.ports.is_empty() {
                targets.push(Box::new(PodTarget::new(self, pod_ip, container, env, None)));
                continue;
            }

            for port in &container.ports {
                targets.push(Box::new(PodTarget::new(
                    self,
                    pod_ip,
                    container,
                    env.clone(),
                    Some(port),
                )));
            }
        }

        Group::new(source, targets)
    }
}

#[cfg(test)]
mod tests {
    use futures::{StreamExt, stream};
    use kubernetes::{
        EnvFromSource, EnvVar, EnvVarSource, Event, LocalObjectReference, ObjectMeta,
        OwnerReference, PodSpec, PodStatus,
    };
    use pretty_assertions::assert_eq;

    use super::*;

    fn nginx() -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: "nginx-7d9f".to_string(),
                namespace: "prod".to_string(),
                labels: BTreeMap::from([("app".to_string(), "nginx".to_string())]),
                owner_references: vec![OwnerReference {
                    kind: "ReplicaSet".to_string(),
                    name: "nginx-5c7b".to_string(),
                    uid: String::new(),
                    controller: Some(true),
                }],
                ..Default::default()
            },
            spec: PodSpec {
                node_name: "m01".to_string(),
                containers: vec![
                    Container {
                        name: "nginx".to_string(),
                        image: "nginx:1.27".to_string(),
                        ports: vec![
                            ContainerPort {
                                name: "http".to_string(),
                                container_port: 80,
                                protocol: "TCP".to_string(),
                            },
                            ContainerPort {
                                name: "dns".to_string(),
                                container_port: 53,
                                protocol: "UDP".to_string(),
                            },
                        ],
                        env: vec![
                            EnvVar {
                                name: "MODE".to_string(),
                                value: Some("prod".to_string()),
                                ..Default::default()
                            },
                            EnvVar {
                                name: "POD_IP".to_string(),
                                ..Default::default()
                            },
                        ],
                        ..Default::default()
                    },
                    Container {
                        name: "sidecar".to_string(),
                        image: "sidecar:1".to_string(),
                        ..Default::default()
                    },
                ],
            },
            status: PodStatus {
                phase: "Running".to_string(),
                pod_ip: Some("172.17.0.5".to_string()),
                host_ip: Some("192.168.0.2".to_string()),
            },
        }
    }

    fn meta(namespace: &str, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ..Default::default()
        }
    }

    fn data<T: From<&'static str>>(pairs: &[(&str, &'static str)]) -> BTreeMap<String, T> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), T::from(*value)))
            .collect()
    }

    fn listing<R: Send + 'static>(objects: Vec<R>) -> EventStream<R> {
        stream::iter(
            std::iter::once(Event::Init)
                .chain(objects.into_iter().map(Event::InitApply))
                .chain(std::iter::once(Event::InitDone))
                .map(Ok),
        )
        .boxed()
    }

    /// Lists the given objects into fresh env sources.
    async fn env_sources(config_maps: Vec<ConfigMap>, secrets: Vec<Secret>) -> EnvSources {
        let sources = EnvSources::default();
        let (_trigger, shutdown) = Tripwire::new("test");

        sources
            .config_maps
            .run(listing(config_maps), None, shutdown.clone())
            .await;
        sources.secrets.run(listing(secrets), None, shutdown).await;
        assert!(sources.has_synced());

        sources
    }

    fn key_ref(name: &str, key: &str) -> Option<KeySelector> {
        Some(KeySelector {
            name: name.to_string(),
            key: key.to_string(),
            optional: None,
        })
    }

    #[test]
    fn build_group() {
        let group = nginx().build_group(&EnvSources::default());
        assert_eq!(group.source(), "k8s/pod/prod/nginx-7d9f");

        let tuids = group
            .targets()
            .iter()
            .map(|target| target.tuid())
            .collect::<Vec<_>>();
        assert_eq!(
            tuids,
            vec![
                "prod_nginx-7d9f_nginx_tcp_80",
                "prod_nginx-7d9f_nginx_udp_53",
                "prod_nginx-7d9f_sidecar",
            ]
        );

        let fields = group.targets()[0].fields();
        assert_eq!(fields["address"], "172.17.0.5:80");
        assert_eq!(fields["node_name"], "m01");
        assert_eq!(fields["controller_kind"], "ReplicaSet");
        assert_eq!(fields["controller_name"], "nginx-5c7b");
        assert_eq!(fields["env"], serde_json::json!({"MODE": "prod"}));
        assert_eq!(fields["port_protocol"], "TCP");

        let sidecar = group.targets()[2].fields();
        assert_eq!(sidecar["address"], "172.17.0.5");
        assert_eq!(sidecar["port"], "");
    }

    #[test]
    fn without_pod_ip() {
        let mut pod = nginx();
        pod.status.pod_ip = None;

        let group = pod.build_group(&EnvSources::default());
        assert_eq!(group.source(), "k8s/pod/prod/nginx-7d9f");
        assert!(group.is_tombstone());
    }

    #[test]
    fn ipv6_address() {
        let mut pod = nginx();
        pod.status.pod_ip = Some("fd00::5".to_string());

        let group = pod.build_group(&EnvSources::default());
        assert_eq!(group.targets()[0].fields()["address"], "[fd00::5]:80");
    }

    #[test]
    fn hash_follows_content() {
        let sources = EnvSources::default();
        let before = nginx().build_group(&sources).targets()[0].hash();
        assert_eq!(before, nginx().build_group(&sources).targets()[0].hash());

        let mut pod = nginx();
        pod.spec.containers[0].image = "nginx:1.28".to_string();
        assert_ne!(before, pod.build_group(&sources).targets()[0].hash());
    }

    #[tokio::test]
    async fn env_resolution() {
        let sources = env_sources(
            vec![
                ConfigMap {
                    metadata: meta("prod", "settings"),
                    data: data(&[("level", "debug"), ("region", "eu")]),
                },
                // same name, other namespace
                ConfigMap {
                    metadata: meta("dev", "shared"),
                    data: data(&[("level", "trace")]),
                },
            ],
            vec![Secret {
                metadata: meta("prod", "creds"),
                data: BTreeMap::from([
                    ("password".to_string(), b"s3cr3t".to_vec()),
                    ("level".to_string(), b"warn".to_vec()),
                    ("binary".to_string(), vec![0xff, 0xfe]),
                ]),
            }],
        )
        .await;

        let container = Container {
            name: "app".to_string(),
            env_from: vec![
                EnvFromSource {
                    prefix: "CFG_".to_string(),
                    config_map_ref: Some(LocalObjectReference {
                        name: "settings".to_string(),
                        optional: None,
                    }),
                    secret_ref: None,
                },
                EnvFromSource {
                    prefix: String::new(),
                    config_map_ref: None,
                    secret_ref: Some(LocalObjectReference {
                        name: "creds".to_string(),
                        optional: None,
                    }),
                },
                EnvFromSource {
                    prefix: "SHARED_".to_string(),
                    config_map_ref: Some(LocalObjectReference {
                        name: "shared".to_string(),
                        optional: Some(true),
                    }),
                    secret_ref: None,
                },
            ],
            env: vec![
                // overrides the value from envFrom
                EnvVar {
                    name: "CFG_level".to_string(),
                    value: Some("info".to_string()),
                    ..Default::default()
                },
                EnvVar {
                    name: "REGION".to_string(),
                    value_from: Some(EnvVarSource {
                        config_map_key_ref: key_ref("settings", "region"),
                        secret_key_ref: None,
                    }),
                    ..Default::default()
                },
                // secrets take precedence over config maps
                EnvVar {
                    name: "LEVEL".to_string(),
                    value: Some(String::new()),
                    value_from: Some(EnvVarSource {
                        config_map_key_ref: key_ref("settings", "level"),
                        secret_key_ref: key_ref("creds", "level"),
                    }),
                },
                // falls back to the config map when the secret lacks the key
                EnvVar {
                    name: "FALLBACK".to_string(),
                    value_from: Some(EnvVarSource {
                        config_map_key_ref: key_ref("settings", "level"),
                        secret_key_ref: key_ref("creds", "missing"),
                    }),
                    ..Default::default()
                },
                EnvVar {
                    name: "MISSING".to_string(),
                    value_from: Some(EnvVarSource {
                        config_map_key_ref: key_ref("absent", "level"),
                        secret_key_ref: None,
                    }),
                    ..Default::default()
                },
                EnvVar {
                    name: String::new(),
                    value: Some("nameless".to_string()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        assert_eq!(
            sources.resolve("prod", &container),
            data::<String>(&[
                ("CFG_level", "info"),
                ("CFG_region", "eu"),
                ("FALLBACK", "debug"),
                ("LEVEL", "warn"),
                ("REGION", "eu"),
                ("level", "warn"),
                ("password", "s3cr3t"),
            ])
        );
    }

    #[tokio::test]
    async fn env_follows_sources() {
        let mut pod = nginx();
        pod.spec.containers[0].env.push(EnvVar {
            name: "LEVEL".to_string(),
            value_from: Some(EnvVarSource {
                config_map_key_ref: key_ref("settings", "level"),
                secret_key_ref: None,
            }),
            ..Default::default()
        });

        let debug = env_sources(
            vec![ConfigMap {
                metadata: meta("prod", "settings"),
                data: data(&[("level", "debug")]),
            }],
            vec![],
        )
        .await;
        let trace = env_sources(
            vec![ConfigMap {
                metadata: meta("prod", "settings"),
                data: data(&[("level", "trace")]),
            }],
            vec![],
        )
        .await;

        let group = pod.build_group(&debug);
        assert_eq!(
            group.targets()[0].fields()["env"],
            serde_json::json!({"LEVEL": "debug", "MODE": "prod"})
        );

        // a changed config map value changes the target
        assert_ne!(
            group.targets()[0].hash(),
            pod.build_group(&trace).targets()[0].hash()
        );
    }
}
