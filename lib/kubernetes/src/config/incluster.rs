use std::env;
use std::path::Path;

use rustls::{ClientConfig, RootCertStore};

use super::{Auth, Config, Error, RefreshableToken, add_certificates};

const SERVICE_HOSTENV: &str = "KUBERNETES_SERVICE_HOST";
const SERVICE_PORTENV: &str = "KUBERNETES_SERVICE_PORT";

// Mounted credential files
pub const SERVICE_TOKENFILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
pub const SERVICE_CERTFILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

pub fn incluster_env() -> Result<Config, Error> {
    let host = env::var(SERVICE_HOSTENV)
        .map_err(|err| Error::ReadEnvironmentVariable(SERVICE_HOSTENV, err))?;
    let port = env::var(SERVICE_PORTENV)
        .map_err(|err| Error::ReadEnvironmentVariable(SERVICE_PORTENV, err))?
        .parse::<u16>()
        .map_err(Error::ParseClusterPort)?;

    let cluster_url = cluster_uri(&host, port)
        .parse::<http::Uri>()
        .map_err(Error::ParseClusterUri)?;

    let mut roots = RootCertStore::empty();
    add_certificates(&mut roots, Path::new(SERVICE_CERTFILE))?;
    let tls = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let token = RefreshableToken::new(SERVICE_TOKENFILE)?;

    Ok(Config {
        cluster_url,
        auth: Auth::RefreshableToken(token),
        tls,
    })
}

/// Format a host and, if not using 443, a port. IPv6 addresses are bracketed.
fn cluster_uri(host: &str, port: u16) -> String {
    let host = match host.parse::<std::net::IpAddr>() {
        Ok(ip) if ip.is_ipv6() => format!("[{ip}]"),
        _ => host.to_string(),
    };

    if port == 443 {
        format!("https://{host}")
    } else {
        format!("https://{host}:{port}")
    }
}
