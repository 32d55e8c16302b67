use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use http::{Method, Request};
use http_body_util::{BodyExt, Full};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client as HttpClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;
use tracing::{trace, warn};

use super::ObjectList;
use super::config::{self, Auth, Config};
use super::resource::Resource;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::Error),
    #[error("build http request failed, {0}")]
    BuildRequest(#[from] http::Error),
    #[error("read http response failed, {0}")]
    ReadResponse(#[from] hyper::Error),
    #[error(transparent)]
    Http(hyper_util::client::legacy::Error),
    #[error("invalid params, {0}")]
    Validation(&'static str),
    #[error("api server error, code: {}, reason: {}, message: {}", .0.code, .0.reason, .0.message)]
    Api(ErrorResponse),
    #[error("deserialize response failed, {0}")]
    Deserialize(#[from] serde_json::Error),
    #[error("read watch event failed, {0}")]
    ReadEvents(std::io::Error),
    #[error("chunk line is too large")]
    LinesCodecMaxLineLengthExceeded,
    #[error("apply credentials failed, {0}")]
    Auth(std::io::Error),
}

/// An error response from the API.
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    /// The status
    #[serde(default)]
    pub status: String,
    /// A message about the error
    #[serde(default)]
    pub message: String,
    /// The reason for the error
    #[serde(default)]
    pub reason: String,
    /// The error code
    pub code: u16,
}

/// Query parameters of list calls
#[derive(Debug, Default)]
pub struct ListParams {
    /// A selector to restrict the list of returned objects by their labels.
    pub label_selector: Option<String>,

    /// A selector to restrict the list of returned objects by their fields.
    pub field_selector: Option<String>,

    /// Limit the number of results, the server responds with a continue token
    /// if there are more results.
    pub limit: Option<u32>,

    /// Fetch the next page of a chunked list.
    pub continue_token: Option<String>,
}

/// Query parameters of watch calls
#[derive(Debug, Default)]
pub struct WatchParams {
    /// A selector to restrict returned objects by their labels.
    pub label_selector: Option<String>,

    /// A selector to restrict returned objects by their fields.
    pub field_selector: Option<String>,

    /// Timeout for the watch call, in seconds. The server closes the stream
    /// after it, and the watcher opens a new one. Must be less than 295.
    pub timeout: Option<u32>,

    /// Enables watch events with type "BOOKMARK", which keep the resource
    /// version fresh on quiet collections.
    pub bookmarks: bool,
}

#[derive(Deserialize)]
pub struct BookmarkMeta {
    /// The only field we need from a Bookmark event.
    #[serde(rename = "resourceVersion")]
    pub resource_version: String,
}

/// Bookmarks contain apiVersion + kind + basically empty metadata
///
/// See https://kubernetes.io/docs/reference/using-api/api-concepts/#watch-bookmarks
#[derive(Deserialize)]
pub struct Bookmark {
    pub metadata: BookmarkMeta,
}

/// A raw event returned from a watch query
///
/// Note that a watch query returns many of these as newline separated JSON
#[derive(Deserialize)]
#[serde(tag = "type", content = "object", rename_all = "UPPERCASE")]
pub enum WatchEvent<K> {
    /// Resource was added
    Added(K),
    /// Resource was modified
    Modified(K),
    /// Resource was deleted
    Deleted(K),
    /// Resource bookmark. `Bookmark` is a slimmed down `K`
    Bookmark(Bookmark),
    /// There was some kind of error
    Error(ErrorResponse),
}

#[derive(Clone)]
pub struct Client {
    http_client: HttpClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
    auth: Auth,
    endpoint: String,
    namespace: Option<String>,
}

impl Client {
    pub fn new(config: Config) -> Result<Self, Error> {
        let mut inner = HttpConnector::new();
        inner.enforce_http(false);
        let connector = HttpsConnectorBuilder::new()
            .with_tls_config(config.tls)
            .https_or_http()
            .enable_http1()
            .wrap_connector(inner);

        let http_client = HttpClient::builder(TokioExecutor::new()).build(connector);
        let endpoint = config
            .cluster_url
            .to_string()
            .trim_end_matches('/')
            .to_string();

        Ok(Client {
            http_client,
            endpoint,
            auth: config.auth,
            namespace: None,
        })
    }

    /// A client talking to the API server of the cluster this process runs in.
    pub fn incluster() -> Result<Self, Error> {
        Client::new(Config::incluster()?)
    }

    /// Returns a copy of this client scoped to `namespace`, `None` means all
    /// namespaces.
    pub fn namespaced(&self, namespace: Option<String>) -> Client {
        let mut client = self.clone();
        client.namespace = namespace;
        client
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// List a collection of a resource
    pub async fn list<R: Resource>(&self, params: &ListParams) -> Result<ObjectList<R>, Error> {
        let query = {
            let mut builder = form_urlencoded::Serializer::new(String::new());

            if let Some(field_selector) = &params.field_selector {
                builder.append_pair("fieldSelector", field_selector);
            }
            if let Some(label_selector) = &params.label_selector {
                builder.append_pair("labelSelector", label_selector);
            }
            if let Some(limit) = &params.limit {
                builder.append_pair("limit", &limit.to_string());
            }
            if let Some(continue_token) = &params.continue_token {
                builder.append_pair("continue", continue_token);
            }

            builder.finish()
        };

        let req = self.request::<R>(&query)?;
        let resp = self.http_client.request(req).await.map_err(Error::Http)?;
        let (parts, incoming) = resp.into_parts();
        let body = incoming.collect().await?.to_bytes();
        if !parts.status.is_success() {
            let err = serde_json::from_slice::<ErrorResponse>(&body)?;
            return Err(Error::Api(err));
        }

        serde_json::from_slice::<ObjectList<R>>(&body).map_err(Error::Deserialize)
    }

    /// watch returns a stream the produce WatchEvent<R>, and it will stop if
    /// an error occurred or the connection timeout. So, user have to call this
    /// function again to get notified again.
    pub async fn watch<R: Resource + 'static>(
        &self,
        params: &WatchParams,
        version: &str,
    ) -> Result<BoxStream<'static, Result<WatchEvent<R>, Error>>, Error> {
        if let Some(timeout) = params.timeout {
            if timeout >= 295 {
                return Err(Error::Validation("watch timeout must be less than 295s"));
            }
        }

        let query = {
            let mut builder = form_urlencoded::Serializer::new(String::new());

            builder.append_pair("resourceVersion", version);
            builder.append_pair("watch", "true");
            // https://github.com/kubernetes/kubernetes/issues/6513
            builder.append_pair(
                "timeoutSeconds",
                params.timeout.unwrap_or(290).to_string().as_str(),
            );

            if let Some(label_selector) = params.label_selector.as_ref() {
                builder.append_pair("labelSelector", label_selector);
            }
            if let Some(field_selector) = params.field_selector.as_ref() {
                builder.append_pair("fieldSelector", field_selector);
            }
            if params.bookmarks {
                builder.append_pair("allowWatchBookmarks", "true");
            }

            builder.finish()
        };

        let req = self.request::<R>(&query)?;
        let resp = self.http_client.request(req).await.map_err(Error::Http)?;
        if !resp.status().is_success() {
            let body = resp.into_body().collect().await?.to_bytes();
            let err = serde_json::from_slice::<ErrorResponse>(&body)?;
            return Err(Error::Api(err));
        }

        let frames = FramedRead::new(
            StreamReader::new(resp.into_body().into_data_stream().map_err(|err| {
                // Unexpected EOF from chunked decoder.
                // Tends to happen when watching for 300+s. This will be ignored
                if err.to_string().contains("unexpected EOF during check") {
                    return std::io::Error::new(std::io::ErrorKind::UnexpectedEof, err);
                }

                std::io::Error::other(err)
            })),
            LinesCodec::new(),
        );

        Ok(Box::pin(frames.filter_map(|result| async move {
            match result {
                Ok(line) => Some(decode_event(&line)),
                Err(LinesCodecError::Io(err)) => match err.kind() {
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::UnexpectedEof => {
                        warn!(message = "watch stream interrupted", %err);
                        None
                    }
                    _ => Some(Err(Error::ReadEvents(err))),
                },
                // This should never happen because we're using the default `usize::MAX`.
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    Some(Err(Error::LinesCodecMaxLineLengthExceeded))
                }
            }
        })))
    }

    fn request<R: Resource>(&self, query: &str) -> Result<Request<Full<Bytes>>, Error> {
        let uri = format!(
            "{}{}?{}",
            self.endpoint,
            R::url_path(self.namespace.as_deref()),
            query
        );

        trace!(message = "doing http request", uri);

        let mut req = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Full::<Bytes>::default())?;

        self.auth.apply(&mut req).map_err(Error::Auth)?;

        Ok(req)
    }
}

fn decode_event<R: Resource>(line: &str) -> Result<WatchEvent<R>, Error> {
    match serde_json::from_str::<WatchEvent<R>>(line) {
        Ok(event) => Ok(event),
        Err(err) => {
            // Got general error response
            if let Ok(resp) = serde_json::from_str::<ErrorResponse>(line) {
                return Err(Error::Api(resp));
            }

            Err(Error::Deserialize(err))
        }
    }
}
