//! Status event consumer for background file indexing (server-sent events).

use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::stream::{self, Stream, StreamExt};
use std::pin::Pin;

use super::ApiError;

/// Payload the service sends once indexing is finished.
pub const DONE_MARKER: &str = "done";

/// One message from the status channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    /// Human-readable progress label.
    Progress(String),
    Done,
}

impl StatusUpdate {
    pub fn from_payload(data: &str) -> Self {
        if data == DONE_MARKER {
            StatusUpdate::Done
        } else {
            StatusUpdate::Progress(data.to_string())
        }
    }
}

/// Status updates for one task; ends right after [`StatusUpdate::Done`].
pub type StatusStream = Pin<Box<dyn Stream<Item = Result<StatusUpdate, ApiError>> + Send>>;

fn map_event_error<E>(err: EventStreamError<E>) -> ApiError
where
    E: Into<ApiError> + std::fmt::Display,
{
    match err {
        EventStreamError::Transport(e) => e.into(),
        other => ApiError::Api(format!("status channel: {}", other)),
    }
}

/// Parse an SSE byte stream into status updates.
pub fn status_updates<S, B, E>(bytes: S) -> StatusStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ApiError> + std::fmt::Display + Send + 'static,
{
    let events = Box::pin(bytes.eventsource());
    Box::pin(stream::unfold((events, false), |(mut events, done)| async move {
        if done {
            return None;
        }
        match events.next().await? {
            Ok(event) => {
                let update = StatusUpdate::from_payload(&event.data);
                let done = update == StatusUpdate::Done;
                match &update {
                    StatusUpdate::Progress(label) => log::debug!("status: {}", label),
                    StatusUpdate::Done => log::debug!("status: done"),
                }
                Some((Ok(update), (events, done)))
            }
            Err(e) => Some((Err(map_event_error(e)), (events, true))),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sse(parts: &[&str]) -> StatusStream {
        let chunks: Vec<Result<Vec<u8>, ApiError>> =
            parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        status_updates(stream::iter(chunks))
    }

    #[test]
    fn done_marker_is_exact() {
        assert_eq!(StatusUpdate::from_payload("done"), StatusUpdate::Done);
        assert_eq!(
            StatusUpdate::from_payload("done!"),
            StatusUpdate::Progress("done!".into())
        );
        assert_eq!(
            StatusUpdate::from_payload("Done"),
            StatusUpdate::Progress("Done".into())
        );
    }

    #[tokio::test]
    async fn progress_then_done_closes_stream() {
        let updates: Vec<StatusUpdate> = sse(&[
            "data: parsing 1/2\n\n",
            "data: embed",
            "ding\n\ndata: done\n\n",
            "data: never seen\n\n",
        ])
        .map(|u| u.unwrap())
        .collect()
        .await;
        assert_eq!(
            updates,
            vec![
                StatusUpdate::Progress("parsing 1/2".into()),
                StatusUpdate::Progress("embedding".into()),
                StatusUpdate::Done,
            ]
        );
    }

    #[tokio::test]
    async fn channel_closed_without_done_just_ends() {
        let updates: Vec<StatusUpdate> = sse(&["data: working\n\n"])
            .map(|u| u.unwrap())
            .collect()
            .await;
        assert_eq!(updates, vec![StatusUpdate::Progress("working".into())]);
    }
}
