mod incluster;

use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use headers::{Authorization, HeaderMapExt};
use http::Request;
use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, RootCertStore};

pub use incluster::{SERVICE_CERTFILE, SERVICE_TOKENFILE};

/// Errors from building the connection config
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to read the in-cluster environment variables
    #[error("failed to read an in-cluster environment variable {0}, {1}")]
    ReadEnvironmentVariable(&'static str, #[source] std::env::VarError),

    /// Failed to parse cluster port value
    #[error("failed to parse cluster port: {0}")]
    ParseClusterPort(#[source] std::num::ParseIntError),

    /// Failed to parse cluster url
    #[error("failed to parse cluster uri: {0}")]
    ParseClusterUri(#[source] http::uri::InvalidUri),

    /// Failed to read a certificate
    #[error("failed to read the certificate file '{1:?}': {0}")]
    ReadCertificate(#[source] std::io::Error, PathBuf),

    /// Failed to parse PEM-encoded certificates
    #[error("failed to parse PEM-encoded certificates: {0}")]
    ParseCertificates(#[source] pem::PemError),

    /// Failed to add a root certificate
    #[error("failed to build a RootCertStore: {0}")]
    BuildRootCertStore(#[source] rustls::Error),

    /// Failed to read token file
    #[error("failed to read token file: '{1:?}': {0}")]
    ReadTokenFile(#[source] std::io::Error, PathBuf),

    /// An https cluster without a certificate authority could never be verified
    #[error("no certificate authority for the https cluster {0}")]
    MissingCertificateAuthority(String),
}

struct Token {
    value: String,
    expire_at: Instant,
}

/// A bearer token backed by a file, projected service account tokens are
/// rotated by the kubelet so the file is re-read every minute.
#[derive(Clone)]
pub struct RefreshableToken {
    path: PathBuf,
    inner: Arc<Mutex<Token>>,
}

impl Debug for RefreshableToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshableToken")
            .field("path", &self.path)
            .finish()
    }
}

impl RefreshableToken {
    const REFRESH_INTERVAL: Duration = Duration::from_secs(60);

    pub fn new(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let value = read_token(&path)?;

        Ok(RefreshableToken {
            path,
            inner: Arc::new(Mutex::new(Token {
                value,
                expire_at: Instant::now() + Self::REFRESH_INTERVAL,
            })),
        })
    }

    pub fn token(&self) -> std::io::Result<String> {
        let now = Instant::now();
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if now > inner.expire_at {
            inner.value = std::fs::read_to_string(&self.path)?.trim().to_string();
            inner.expire_at = now + Self::REFRESH_INTERVAL;
        }

        Ok(inner.value.clone())
    }
}

fn read_token(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path)
        .map(|token| token.trim().to_string())
        .map_err(|err| Error::ReadTokenFile(err, path.to_path_buf()))
}

#[derive(Clone, Debug)]
pub enum Auth {
    None,
    Bearer(String),
    RefreshableToken(RefreshableToken),
}

impl Auth {
    pub fn apply<T>(&self, req: &mut Request<T>) -> std::io::Result<()> {
        let token = match self {
            Auth::None => return Ok(()),
            Auth::Bearer(token) => token.clone(),
            Auth::RefreshableToken(refreshable) => refreshable.token()?,
        };

        let header = Authorization::bearer(&token).map_err(|_err| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "invalid bearer token")
        })?;
        req.headers_mut().typed_insert(header);

        Ok(())
    }
}

/// Everything the [`Client`](crate::Client) needs to reach the API server.
pub struct Config {
    /// The configured cluster url.
    pub cluster_url: http::Uri,

    /// Stores information to tell the cluster who you are.
    pub auth: Auth,

    pub tls: ClientConfig,
}

impl Debug for Config {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("cluster_url", &self.cluster_url)
            .field("auth", &self.auth)
            .finish()
    }
}

impl Config {
    /// Load the service account config mounted into every pod.
    pub fn incluster() -> Result<Config, Error> {
        incluster::incluster_env()
    }

    /// Build a config from an explicit API server address, an optional token
    /// file and an optional CA bundle. Without a CA bundle, the API server
    /// must be reachable over plain HTTP.
    pub fn explicit(
        api_server: &str,
        token_file: Option<&Path>,
        ca_file: Option<&Path>,
    ) -> Result<Config, Error> {
        let cluster_url = api_server
            .parse::<http::Uri>()
            .map_err(Error::ParseClusterUri)?;

        let auth = match token_file {
            Some(path) => Auth::RefreshableToken(RefreshableToken::new(path)?),
            None => Auth::None,
        };

        let mut roots = RootCertStore::empty();
        match ca_file {
            Some(path) => add_certificates(&mut roots, path)?,
            None if cluster_url.scheme_str() == Some("https") => {
                return Err(Error::MissingCertificateAuthority(api_server.to_string()));
            }
            None => {}
        }

        let tls = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Config {
            cluster_url,
            auth,
            tls,
        })
    }
}

/// Adds every PEM `CERTIFICATE` block of the file to `roots`.
pub(crate) fn add_certificates(roots: &mut RootCertStore, path: &Path) -> Result<(), Error> {
    let data =
        std::fs::read(path).map_err(|err| Error::ReadCertificate(err, path.to_path_buf()))?;

    let certs = pem::parse_many(data)
        .map_err(Error::ParseCertificates)?
        .into_iter()
        .filter(|block| block.tag() == "CERTIFICATE")
        .map(|block| block.into_contents());

    for cert in certs {
        roots
            .add(CertificateDer::from(cert))
            .map_err(Error::BuildRootCertStore)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_header() {
        let mut req = Request::builder().body(()).unwrap();
        Auth::Bearer("abc".to_string()).apply(&mut req).unwrap();

        assert_eq!(
            req.headers().get(http::header::AUTHORIZATION).unwrap(),
            "Bearer abc"
        );
    }

    #[test]
    fn no_auth() {
        let mut req = Request::builder().body(()).unwrap();
        Auth::None.apply(&mut req).unwrap();

        assert!(req.headers().get(http::header::AUTHORIZATION).is_none());
    }

    #[test]
    fn refreshable_token_trims() {
        let path = std::env::temp_dir().join(format!("scout-token-{}", std::process::id()));
        std::fs::write(&path, "secret-token\n").unwrap();

        let token = RefreshableToken::new(&path).unwrap();
        assert_eq!(token.token().unwrap(), "secret-token");

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn explicit_plain_http() {
        let config = Config::explicit("http://127.0.0.1:8001", None, None).unwrap();

        assert_eq!(config.cluster_url.to_string(), "http://127.0.0.1:8001/");
        assert!(matches!(config.auth, Auth::None));
    }

    #[test]
    fn explicit_missing_token() {
        let err = Config::explicit(
            "https://10.0.0.1",
            Some(Path::new("/this/path/does/not/exist")),
            None,
        )
        .unwrap_err();

        assert!(matches!(err, Error::ReadTokenFile(..)));
    }

    #[test]
    fn explicit_https_requires_ca() {
        let err = Config::explicit("https://10.0.0.1:6443", None, None).unwrap_err();

        assert!(matches!(err, Error::MissingCertificateAuthority(ref server) if server == "https://10.0.0.1:6443"));
    }
}
