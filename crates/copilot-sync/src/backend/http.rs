// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Backend that POSTs the turn to a remote agent and reads AG-UI events
//! back over Server-Sent Events.
//!
//! Frames named `continuation` carry the token for the next turn; every
//! other frame holds one JSON-encoded event.

use async_trait::async_trait;
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use std::fmt::Display;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::{AgentBackend, UpstreamRequest, UpstreamStream};
use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::protocol::{AgUiEvent, UpstreamItem};

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
    continuation_markers: Vec<String>,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let url = config.url.clone().ok_or_else(|| Error::Config {
            message: "The http backend requires backend.url".to_string(),
        })?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| Error::Config {
                message: format!("Invalid header name '{}': {}", name, err),
            })?;
            let value = HeaderValue::from_str(value).map_err(|err| Error::Config {
                message: format!("Invalid value for header '{}': {}", name.as_str(), err),
            })?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            url,
            continuation_markers: config.continuation_error_markers.clone(),
        })
    }

    fn classify(&self, status: u16, body: String) -> Error {
        if mentions_any(&body, &self.continuation_markers) {
            Error::Continuation { message: body }
        } else {
            Error::Upstream {
                status,
                message: body,
            }
        }
    }
}

fn mentions_any(text: &str, markers: &[String]) -> bool {
    markers.iter().any(|marker| text.contains(marker.as_str()))
}

/// Turn one SSE event into an upstream item; `None` for events to skip.
fn decode_event(event: Event, markers: &[String]) -> Option<Result<UpstreamItem>> {
    trace!(event = %event.event, data = %event.data, "upstream SSE event");
    if event.event == "continuation" {
        let token = event.data.trim();
        return (!token.is_empty()).then(|| Ok(UpstreamItem::Continuation(token.to_string())));
    }
    let data = event.data.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }

    match serde_json::from_str::<AgUiEvent>(data) {
        Ok(AgUiEvent::RunError { message, .. }) if mentions_any(&message, markers) => {
            Some(Err(Error::Continuation { message }))
        }
        Ok(event) => Some(Ok(UpstreamItem::Event(event))),
        Err(err) => {
            warn!(error = %err, "skipping undecodable upstream frame");
            None
        }
    }
}

/// Decode an SSE event stream into upstream items. A transport or framing
/// error ends the stream.
fn decode_events<S, E>(events: S, markers: Vec<String>) -> UpstreamStream
where
    S: Stream<Item = std::result::Result<Event, EventStreamError<E>>> + Send + 'static,
    E: Display + Send + 'static,
{
    Box::pin(async_stream::stream! {
        futures::pin_mut!(events);
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    if let Some(item) = decode_event(event, &markers) {
                        yield item;
                    }
                }
                Err(err) => {
                    yield Err(Error::Backend {
                        message: format!("Upstream event stream failed: {err}"),
                    });
                    return;
                }
            }
        }
    })
}

#[async_trait]
impl AgentBackend for HttpBackend {
    async fn run(&self, request: UpstreamRequest) -> Result<UpstreamStream> {
        debug!(
            url = %self.url,
            thread_id = %request.thread_id,
            continuation = request.continuation_token.is_some(),
            messages = request.messages.len(),
            "sending turn upstream"
        );
        let response = self
            .client
            .post(&self.url)
            .header(ACCEPT, "text/event-stream")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.classify(status.as_u16(), body));
        }

        let events = response.bytes_stream().eventsource();
        Ok(decode_events(events, self.continuation_markers.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::convert::Infallible;

    fn markers() -> Vec<String> {
        BackendConfig::default().continuation_error_markers
    }

    fn event(name: &str, data: &str) -> Event {
        Event {
            event: name.to_string(),
            data: data.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn decodes_events_and_continuation_frames() {
        let item = decode_event(
            event("message", r#"{"type":"TOOL_CALL_END","toolCallId":"c1"}"#),
            &markers(),
        );
        assert_eq!(item.unwrap().unwrap(), UpstreamItem::Event(AgUiEvent::tool_end("c1")));

        let item = decode_event(event("continuation", "resp_123"), &markers());
        assert_eq!(item.unwrap().unwrap(), UpstreamItem::Continuation("resp_123".into()));
    }

    #[test]
    fn skips_blank_done_and_unknown_frames() {
        assert!(decode_event(event("message", ""), &markers()).is_none());
        assert!(decode_event(event("message", "[DONE]"), &markers()).is_none());
        assert!(decode_event(event("continuation", "  "), &markers()).is_none());
        let unknown = event("message", r#"{"type":"STEP_STARTED","stepName":"x"}"#);
        assert!(decode_event(unknown, &markers()).is_none());
    }

    #[test]
    fn run_error_naming_missing_tool_output_is_a_continuation_failure() {
        let item = decode_event(
            event("message", r#"{"type":"RUN_ERROR","message":"No tool output found for c9"}"#),
            &markers(),
        );
        assert!(item.unwrap().unwrap_err().requires_session_reset());

        let overloaded = event("message", r#"{"type":"RUN_ERROR","message":"overloaded"}"#);
        assert!(matches!(
            decode_event(overloaded, &markers()).unwrap().unwrap(),
            UpstreamItem::Event(AgUiEvent::RunError { .. })
        ));
    }

    #[tokio::test]
    async fn byte_chunks_split_mid_frame_decode_in_order() {
        let body = concat!(
            "data: {\"type\":\"TEXT_MESSAGE_START\",\"messageId\":\"m1\"}\n\n",
            "data: {\"type\":\"TEXT_MESSAGE_CONTENT\",\"messageId\":\"m1\",",
            "\"delta\":\"LAX → ORD\"}\n\n",
            "event: continuation\ndata: resp_9\n\n",
        );
        let bytes = body.as_bytes();
        // split inside the second frame
        let cut = body.find("\"delta\"").unwrap();
        let chunks = vec![
            Ok::<_, Infallible>(bytes[..cut].to_vec()),
            Ok(bytes[cut..].to_vec()),
        ];

        let items: Vec<UpstreamItem> = decode_events(
            futures::stream::iter(chunks).eventsource(),
            markers(),
        )
        .map(|item| item.unwrap())
        .collect()
        .await;

        assert_eq!(
            items,
            vec![
                UpstreamItem::Event(AgUiEvent::text_start("m1")),
                UpstreamItem::Event(AgUiEvent::text_delta("m1", "LAX → ORD")),
                UpstreamItem::Continuation("resp_9".into()),
            ]
        );
    }

    #[test]
    fn http_status_errors_are_classified() {
        let backend = HttpBackend::new(&BackendConfig::default()).unwrap();
        assert!(backend
            .classify(400, "previous_response_not_found".into())
            .requires_session_reset());
        assert!(matches!(
            backend.classify(503, "unavailable".into()),
            Error::Upstream { status: 503, .. }
        ));
    }

    #[test]
    fn rejects_invalid_headers() {
        let mut config = BackendConfig::default();
        config.headers.insert("bad header".into(), "x".into());
        assert!(matches!(HttpBackend::new(&config), Err(Error::Config { .. })));
    }
}
