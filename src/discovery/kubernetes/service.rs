use std::collections::BTreeMap;

use kubernetes::{Service, ServicePort, WatchConfig};
use serde::Serialize;

use super::{EventStream, Kind, NoDependencies, Role, WatchSource};
use crate::model::{Group, Tags, Target, calc_hash};

/// The semantic part of a service target, everything in here is hashed.
#[derive(Clone, Debug, Hash, PartialEq, Serialize)]
pub struct ServiceFields {
    pub address: String,
    pub namespace: String,
    pub name: String,
    pub annotations: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub port: String,
    pub port_name: String,
    pub port_protocol: String,
    pub cluster_ip: String,
    pub external_name: String,
    #[serde(rename = "type")]
    pub typ: String,
}

/// One port of a service.
#[derive(Debug)]
pub struct ServiceTarget {
    hash: u64,
    tuid: String,
    tags: Tags,

    fields: ServiceFields,
}

impl ServiceTarget {
    fn new(svc: &Service, port: &ServicePort) -> Self {
        let meta = &svc.metadata;
        let fields = ServiceFields {
            address: format!("{}.{}.svc:{}", meta.name, meta.namespace, port.port),
            namespace: meta.namespace.clone(),
            name: meta.name.clone(),
            annotations: meta.annotations.clone(),
            labels: meta.labels.clone(),
            port: port.port.to_string(),
            port_name: port.name.clone(),
            port_protocol: port.protocol.clone(),
            cluster_ip: svc.spec.cluster_ip.clone(),
            external_name: svc.spec.external_name.clone(),
            typ: svc.spec.typ.clone(),
        };

        ServiceTarget {
            hash: calc_hash(&fields),
            tuid: tuid(svc, port),
            tags: Tags::new(),
            fields,
        }
    }
}

impl Target for ServiceTarget {
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

fn tuid(svc: &Service, port: &ServicePort) -> String {
    format!(
        "{}_{}_{}_{}",
        svc.metadata.namespace,
        svc.metadata.name,
        port.protocol.to_lowercase(),
        port.port
    )
}

impl Kind for Service {
    const ROLE: Role = Role::Service;

    type Dependencies = NoDependencies;

    fn watch(
        source: &dyn WatchSource,
        namespace: Option<&str>,
        config: WatchConfig,
    ) -> EventStream<Self> {
        source.services(namespace, config)
    }

    fn source(namespace: &str, name: &str) -> String {
        format!("k8s/service/{namespace}/{name}")
    }

    fn build_group(&self, _: &NoDependencies) -> Group {
        let source = Self::source(&self.metadata.namespace, &self.metadata.name);

        // TODO: headless services could be expanded into their endpoints
        if self.spec.cluster_ip.is_empty() || self.spec.ports.is_empty() {
            return Group::tombstone(source);
        }

        let targets = self
            .spec
            .ports
            .iter()
            .map(|port| Box::new(ServiceTarget::new(self, port)) as Box<dyn Target>)
            .collect();

        Group::new(source, targets)
    }
}

#[cfg(test)]
mod tests {
    use kubernetes::{ObjectMeta, ServiceSpec};
    use pretty_assertions::assert_eq;

    use super::*;

    fn httpd() -> Service {
        Service {
            metadata: ObjectMeta {
                name: "httpd".to_string(),
                namespace: "prod".to_string(),
                labels: BTreeMap::from([("app".to_string(), "httpd".to_string())]),
                annotations: BTreeMap::from([(
                    "prometheus.io/scrape".to_string(),
                    "true".to_string(),
                )]),
                ..Default::default()
            },
            spec: ServiceSpec {
                cluster_ip: "10.96.0.10".to_string(),
                ports: vec![
                    ServicePort {
                        name: "http".to_string(),
                        protocol: "TCP".to_string(),
                        port: 80,
                    },
                    ServicePort {
                        name: "https".to_string(),
                        protocol: "TCP".to_string(),
                        port: 443,
                    },
                ],
                ..Default::default()
            },
        }
    }

    #[test]
    fn build_group() {
        let group = httpd().build_group(&NoDependencies);

        assert_eq!(group.source(), "k8s/service/prod/httpd");
        let tuids = group
            .targets()
            .iter()
            .map(|target| target.tuid())
            .collect::<Vec<_>>();
        assert_eq!(tuids, vec!["prod_httpd_tcp_80", "prod_httpd_tcp_443"]);

        let fields = group.targets()[0].fields();
        assert_eq!(fields["address"], "httpd.prod.svc:80");
        assert_eq!(fields["port"], "80");
        assert_eq!(fields["port_name"], "http");
        assert_eq!(fields["cluster_ip"], "10.96.0.10");
        assert_eq!(fields["type"], "ClusterIP");
        assert_eq!(fields["labels"]["app"], "httpd");
    }

    #[test]
    fn without_cluster_ip_or_ports() {
        let mut svc = httpd();
        svc.spec.cluster_ip = String::new();
        let group = svc.build_group(&NoDependencies);
        assert_eq!(group.source(), "k8s/service/prod/httpd");
        assert!(group.is_tombstone());

        let mut svc = httpd();
        svc.spec.ports.clear();
        assert!(svc.build_group(&NoDependencies).is_tombstone());
    }

    #[test]
    fn hash() {
        let hashes = |svc: &Service| {
            svc.build_group(&NoDependencies)
                .targets()
                .iter()
                .map(|target| target.hash())
                .collect::<Vec<_>>()
        };

        let svc = httpd();
        assert_eq!(hashes(&svc), hashes(&httpd()));

        // same identity, other content
        let mut relabeled = httpd();
        relabeled
            .metadata
            .labels
            .insert("tier".to_string(), "web".to_string());
        let group = relabeled.build_group(&NoDependencies);
        assert_eq!(group.targets()[0].tuid(), "prod_httpd_tcp_80");
        assert_ne!(hashes(&relabeled), hashes(&svc));
    }

    #[test]
    fn tags_not_hashed() {
        let mut group = httpd().build_group(&NoDependencies);
        let before = group.targets()[0].hash();

        group.targets_mut()[0].tags_mut().insert("k8s");
        assert_eq!(group.targets()[0].hash(), before);
    }
}
