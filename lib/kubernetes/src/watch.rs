use std::collections::VecDeque;
use std::time::{Duration, Instant};

use backoff::ExponentialBackoff;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use super::Resource;
use super::client::{Client, Error, ListParams, WatchEvent, WatchParams};

/// Events of a watched collection.
///
/// A (re)list is announced with `Init`, followed by `InitApply` for every
/// listed object and closed by `InitDone`. After that, `Apply` and `Deleted`
/// describe changes until the next relist.
#[derive(Debug, PartialEq)]
pub enum Event<T> {
    /// An object was added or modified
    Apply(T),

    /// An object was deleted
    Deleted(T),

    /// The watch stream was restarted, a full listing follows.
    Init,

    /// Received an object during the listing.
    InitApply(T),

    /// The listing is complete. Objects applied before `Init` but not listed
    /// since must be assumed to have been deleted.
    InitDone,
}

#[derive(Clone, Debug, Default)]
pub struct Config {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    /// Server side timeout of a single watch request, in seconds.
    pub timeout: Option<u32>,
    /// Page size of list requests.
    pub page_size: Option<u32>,
    pub bookmark: bool,
}

impl Config {
    fn list_params(&self, continue_token: Option<String>) -> ListParams {
        ListParams {
            label_selector: self.label_selector.clone(),
            field_selector: self.field_selector.clone(),
            limit: Some(self.page_size.unwrap_or(500)),
            continue_token,
        }
    }

    fn watch_params(&self) -> WatchParams {
        WatchParams {
            label_selector: self.label_selector.clone(),
            field_selector: self.field_selector.clone(),
            timeout: self.timeout,
            bookmarks: self.bookmark,
        }
    }
}

/// Watch streams closed sooner than this are reopened with backoff, an API
/// server which keeps closing them right away would be hammered otherwise.
const MIN_WATCH_LIFETIME: Duration = Duration::from_secs(5);

enum State<R: Resource> {
    Start,
    Listing {
        continue_token: Option<String>,
        objects: VecDeque<R>,
        resource_version: Option<String>,
    },
    Watch {
        resource_version: String,
    },
    Watching {
        resource_version: String,
        stream: BoxStream<'static, Result<WatchEvent<R>, Error>>,
        opened: Instant,
    },
}

/// Watches a Kubernetes Resource for changes continuously.
///
/// Errors are yielded and the watcher starts over with a fresh listing on the
/// next poll, so the caller decides how long to back off before polling again.
pub fn watcher<R: Resource + 'static>(
    client: Client,
    config: Config,
) -> impl Stream<Item = Result<Event<R>, Error>> + Send {
    futures::stream::unfold(
        (client, config, ExponentialBackoff::default(), State::Start),
        |(client, config, mut backoff, mut state)| async move {
            loop {
                let (result, next) = step(&client, &config, &mut backoff, state).await;
                state = next;

                if let Some(result) = result {
                    return Some((result, (client, config, backoff, state)));
                }
            }
        },
    )
}

/// The delay before reopening a watch stream which stayed open for `lived`.
fn reopen_delay(backoff: &mut ExponentialBackoff, lived: Duration) -> Option<Duration> {
    if lived >= MIN_WATCH_LIFETIME {
        backoff.reset();
        return None;
    }

    Some(backoff.next_delay())
}

async fn step<R: Resource + 'static>(
    client: &Client,
    config: &Config,
    backoff: &mut ExponentialBackoff,
    state: State<R>,
) -> (Option<Result<Event<R>, Error>>, State<R>) {
    match state {
        State::Start => (
            Some(Ok(Event::Init)),
            State::Listing {
                continue_token: None,
                objects: VecDeque::new(),
                resource_version: None,
            },
        ),
        State::Listing {
            continue_token,
            mut objects,
            resource_version,
        } => {
            if let Some(obj) = objects.pop_front() {
                return (
                    Some(Ok(Event::InitApply(obj))),
                    State::Listing {
                        continue_token,
                        objects,
                        resource_version,
                    },
                );
            }

            // the previous page is drained, and it was the last one
            if continue_token.is_none() {
                if let Some(resource_version) = resource_version {
                    debug!(message = "list done, start watching", kind = R::KIND);

                    return (Some(Ok(Event::InitDone)), State::Watch { resource_version });
                }
            }

            match client.list::<R>(&config.list_params(continue_token)).await {
                Ok(list) => (
                    None,
                    State::Listing {
                        continue_token: list.metadata.r#continue.filter(|token| !token.is_empty()),
                        objects: VecDeque::from(list.items),
                        // "0" would make the following watch replay everything
                        resource_version: Some(
                            list.metadata
                                .resource_version
                                .unwrap_or_else(|| "0".to_string()),
                        ),
                    },
                ),
                Err(err) => (Some(Err(err)), State::Start),
            }
        }
        State::Watch { resource_version } => {
            match client
                .watch::<R>(&config.watch_params(), &resource_version)
                .await
            {
                Ok(stream) => (
                    None,
                    State::Watching {
                        resource_version,
                        stream,
                        opened: Instant::now(),
                    },
                ),
                Err(err) => (Some(Err(err)), State::Start),
            }
        }
        State::Watching {
            resource_version,
            mut stream,
            opened,
        } => match stream.next().await {
            Some(Ok(event)) => {
                let (event, version) = match event {
                    WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                        let version = obj.metadata().resource_version.clone();
                        (Event::Apply(obj), version)
                    }
                    WatchEvent::Deleted(obj) => {
                        let version = obj.metadata().resource_version.clone();
                        (Event::Deleted(obj), version)
                    }
                    WatchEvent::Bookmark(bookmark) => {
                        return (
                            None,
                            State::Watching {
                                resource_version: bookmark.metadata.resource_version,
                                stream,
                                opened,
                            },
                        );
                    }
                    WatchEvent::Error(err) => {
                        // HTTP GONE, means we have desynced and need to start over and re-list
                        if err.code == 410 {
                            debug!(message = "resource version expired, relist", kind = R::KIND);
                            return (Some(Err(Error::Api(err))), State::Start);
                        }

                        if err.code == 403 {
                            warn!(message = "watch event error", kind = R::KIND, ?err);
                        } else {
                            debug!(message = "watch event error", kind = R::KIND, ?err);
                        }

                        return (
                            Some(Err(Error::Api(err))),
                            State::Watching {
                                resource_version,
                                stream,
                                opened,
                            },
                        );
                    }
                };

                // objects without a resource version keep the last known one
                let resource_version = if version.is_empty() {
                    resource_version
                } else {
                    version
                };

                (
                    Some(Ok(event)),
                    State::Watching {
                        resource_version,
                        stream,
                        opened,
                    },
                )
            }
            Some(Err(err)) => (Some(Err(err)), State::Start),
            None => {
                match reopen_delay(backoff, opened.elapsed()) {
                    Some(delay) => {
                        debug!(
                            message = "watch stream closed early, reopen later",
                            kind = R::KIND,
                            ?delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => debug!(message = "watch stream closed, reopen", kind = R::KIND),
                }

                (None, State::Watch { resource_version })
            }
        },
    }
}
