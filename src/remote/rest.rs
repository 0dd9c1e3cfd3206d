//! Client for a Firebase-style realtime database over its REST interface.
//!
//! Writes are `PUT {base}/{path}.json`, reads are `GET`, and live
//! subscriptions use the server-sent event stream on the same URL.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{header, Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{segments, set_value_at, RemoteError, RemoteStore, SnapshotStream};

#[derive(Clone)]
pub struct RestRemote {
    client: Client,
    base_url: String,
    auth: Arc<RwLock<Option<String>>>,
}

impl RestRemote {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: Client::new(),
            base_url,
            auth: Arc::new(RwLock::new(None)),
        }
    }

    /// Token appended as `auth=` to every request; `None` sends anonymous requests.
    pub fn set_auth_token(&self, token: Option<String>) {
        let mut guard = self.auth.write().unwrap_or_else(|e| e.into_inner());
        *guard = token;
    }

    fn url(&self, path: &str) -> String {
        let path = segments(path).join("/");
        let mut url = format!("{}/{}.json", self.base_url, path);
        let token = self
            .auth
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(token) = token {
            url.push_str("?auth=");
            url.push_str(&token);
        }
        url
    }
}

fn network(err: reqwest::Error) -> RemoteError {
    RemoteError::Network(err.to_string())
}

async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(RemoteError::Permission(body));
    }
    Err(RemoteError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl RemoteStore for RestRemote {
    async fn write(&self, path: &str, value: Value) -> Result<(), RemoteError> {
        let response = self
            .client
            .put(self.url(path))
            .json(&value)
            .send()
            .await
            .map_err(network)?;
        check_status(response).await?;
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Option<Value>, RemoteError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(network)?;
        let response = check_status(response).await?;
        let value: Value = response
            .json()
            .await
            .map_err(|err| RemoteError::Decode(err.to_string()))?;
        Ok(if value.is_null() { None } else { Some(value) })
    }

    async fn subscribe(&self, path: &str) -> Result<SnapshotStream, RemoteError> {
        let response = self
            .client
            .get(self.url(path))
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(network)?;
        let response = check_status(response).await?;
        debug!(target: "famhealth", event = "rest_subscription_opened", path);

        let state = EventStreamState {
            bytes: response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
            buffer: Vec::new(),
            cache: Value::Null,
            finished: false,
            path: path.to_string(),
        };

        Ok(stream::unfold(state, next_snapshot).boxed())
    }
}

struct EventStreamState {
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: Vec<u8>,
    cache: Value,
    finished: bool,
    path: String,
}

async fn next_snapshot(mut state: EventStreamState) -> Option<(Value, EventStreamState)> {
    loop {
        while let Some(raw) = take_event(&mut state.buffer) {
            let Some(event) = parse_event(&raw) else {
                continue;
            };
            match apply_event(&mut state.cache, &event) {
                EventOutcome::Emit => return Some((state.cache.clone(), state)),
                EventOutcome::Ignore => {}
                EventOutcome::End => {
                    warn!(
                        target: "famhealth",
                        event = "rest_subscription_closed",
                        path = %state.path,
                        reason = %event.name
                    );
                    return None;
                }
            }
        }

        if state.finished {
            return None;
        }

        match state.bytes.next().await {
            Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
            Some(Err(err)) => {
                warn!(
                    target: "famhealth",
                    event = "rest_subscription_failed",
                    path = %state.path,
                    error = %err
                );
                state.finished = true;
            }
            None => state.finished = true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ServerEvent {
    pub name: String,
    pub data: String,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum EventOutcome {
    Emit,
    Ignore,
    End,
}

#[derive(Deserialize)]
struct PathData {
    path: String,
    data: Value,
}

/// Remove one complete event (terminated by a blank line) from `buffer`.
pub(crate) fn take_event(buffer: &mut Vec<u8>) -> Option<String> {
    buffer.retain(|b| *b != b'\r');
    let position = buffer.windows(2).position(|w| w == b"\n\n")?;
    let raw: Vec<u8> = buffer.drain(..position + 2).collect();
    Some(String::from_utf8_lossy(&raw).into_owned())
}

pub(crate) fn parse_event(raw: &str) -> Option<ServerEvent> {
    let mut name = None;
    let mut data = Vec::new();
    for line in raw.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            name = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data.push(value.trim_start().to_string());
        }
    }
    name.map(|name| ServerEvent {
        name,
        data: data.join("\n"),
    })
}

/// Fold one server event into the cached value for the subscribed path.
pub(crate) fn apply_event(cache: &mut Value, event: &ServerEvent) -> EventOutcome {
    match event.name.as_str() {
        "put" | "patch" => {
            let payload: PathData = match serde_json::from_str(&event.data) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(
                        target: "famhealth",
                        event = "rest_event_decode_failed",
                        name = %event.name,
                        error = %err
                    );
                    return EventOutcome::Ignore;
                }
            };
            let base = segments(&payload.path);
            if event.name == "put" {
                set_value_at(cache, &base, payload.data);
            } else if let Value::Object(children) = payload.data {
                for (key, value) in children {
                    let mut target = base.clone();
                    target.extend(segments(&key));
                    set_value_at(cache, &target, value);
                }
            }
            EventOutcome::Emit
        }
        "cancel" | "auth_revoked" => EventOutcome::End,
        _ => EventOutcome::Ignore,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(name: &str, data: Value) -> ServerEvent {
        ServerEvent {
            name: name.into(),
            data: data.to_string(),
        }
    }

    #[test]
    fn url_includes_auth_token() {
        let remote = RestRemote::new("https://example.firebaseio.com/");
        assert_eq!(
            remote.url("families/AB12CD"),
            "https://example.firebaseio.com/families/AB12CD.json"
        );
        remote.set_auth_token(Some("tok".into()));
        assert_eq!(
            remote.url("/families/AB12CD/members"),
            "https://example.firebaseio.com/families/AB12CD/members.json?auth=tok"
        );
    }

    #[test]
    fn splits_events_on_blank_lines() {
        let mut buffer =
            b"event: put\ndata: {\"path\":\"/\",\"data\":null}\n\nevent: keep-alive\r\ndata: null\r\n\r\npartial"
                .to_vec();
        let first = take_event(&mut buffer).expect("first event");
        assert_eq!(
            parse_event(&first),
            Some(ServerEvent {
                name: "put".into(),
                data: "{\"path\":\"/\",\"data\":null}".into()
            })
        );
        let second = take_event(&mut buffer).expect("crlf framed event");
        assert_eq!(parse_event(&second).map(|e| e.name), Some("keep-alive".to_string()));
        assert!(take_event(&mut buffer).is_none());
        assert_eq!(buffer, b"partial".to_vec());
    }

    #[test]
    fn root_put_replaces_cache() {
        let mut cache = json!({ "old": true });
        let outcome = apply_event(
            &mut cache,
            &event("put", json!({ "path": "/", "data": { "m1": { "name": "Alex" } } })),
        );
        assert_eq!(outcome, EventOutcome::Emit);
        assert_eq!(cache, json!({ "m1": { "name": "Alex" } }));
    }

    #[test]
    fn nested_put_and_patch_update_in_place() {
        let mut cache = json!({ "m1": { "name": "Alex", "age": 30 } });
        apply_event(
            &mut cache,
            &event("put", json!({ "path": "/m1/name", "data": "Alexis" })),
        );
        apply_event(
            &mut cache,
            &event("patch", json!({ "path": "/", "data": { "m2": { "name": "Sam" } } })),
        );
        assert_eq!(
            cache,
            json!({ "m1": { "name": "Alexis", "age": 30 }, "m2": { "name": "Sam" } })
        );

        apply_event(
            &mut cache,
            &event("put", json!({ "path": "/m1", "data": null })),
        );
        assert_eq!(cache, json!({ "m2": { "name": "Sam" } }));
    }

    #[test]
    fn nested_put_under_an_array_keeps_its_elements() {
        let mut cache = json!({ "m1": ["dental", "vision"] });
        apply_event(
            &mut cache,
            &event("put", json!({ "path": "/m1/2", "data": "flu" })),
        );
        apply_event(
            &mut cache,
            &event("patch", json!({ "path": "/m1", "data": { "0": "hearing" } })),
        );
        assert_eq!(cache, json!({ "m1": ["hearing", "vision", "flu"] }));
    }

    #[test]
    fn keep_alive_is_ignored_and_cancel_ends() {
        let mut cache = Value::Null;
        assert_eq!(
            apply_event(&mut cache, &ServerEvent { name: "keep-alive".into(), data: "null".into() }),
            EventOutcome::Ignore
        );
        assert_eq!(
            apply_event(&mut cache, &ServerEvent { name: "auth_revoked".into(), data: "null".into() }),
            EventOutcome::End
        );
    }
}
