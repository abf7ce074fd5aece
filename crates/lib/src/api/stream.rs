//! Token stream consumer: turns a chunked response body into text fragments.
//!
//! Decoding is stateful across chunks, so a multi-byte character split between two
//! chunks comes out whole in the later fragment.

use futures_util::stream::{self, Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;

use super::ApiError;

/// Lazy, finite sequence of decoded fragments. Dropping it cancels the underlying request.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ApiError>> + Send>>;

/// Incremental UTF-8 decoder.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `pending + chunk` as possible. An incomplete trailing sequence is kept
    /// for the next call; invalid bytes become U+FFFD.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    out.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    self.pending.drain(..valid_up_to);
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..len.min(self.pending.len()));
                        }
                        None => break,
                    }
                }
            }
        }
        out
    }

    /// Flush whatever is left at end of stream.
    pub fn finish(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }
}

struct DecodeState<S> {
    inner: Pin<Box<S>>,
    decoder: Utf8Decoder,
    idle_timeout: Option<Duration>,
    finished: bool,
}

/// Wrap a byte-chunk stream as a [`FragmentStream`]. With `idle_timeout`, a gap longer than the
/// window between chunks ends the stream with [`ApiError::Timeout`].
pub fn decode_fragments<S, B, E>(bytes: S, idle_timeout: Option<Duration>) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    let state = DecodeState {
        inner: Box::pin(bytes),
        decoder: Utf8Decoder::new(),
        idle_timeout,
        finished: false,
    };
    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if st.finished {
                return None;
            }
            let next = match st.idle_timeout {
                Some(window) => match tokio::time::timeout(window, st.inner.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        st.finished = true;
                        return Some((Err(ApiError::Timeout(window)), st));
                    }
                },
                None => st.inner.next().await,
            };
            match next {
                Some(Ok(chunk)) => {
                    let text = st.decoder.decode(chunk.as_ref());
                    if text.is_empty() {
                        continue;
                    }
                    log::trace!("fragment: {:?}", text);
                    return Some((Ok(text), st));
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(e.into()), st));
                }
                None => {
                    st.finished = true;
                    let tail = st.decoder.finish();
                    if tail.is_empty() {
                        return None;
                    }
                    return Some((Ok(tail), st));
                }
            }
        }
    }))
}

/// Callback form: `on_output(Some(fragment))` per fragment, then `on_output(None)` once the
/// stream ends. On a transport error the sentinel is not delivered and the error is returned.
pub async fn handle_stream<F>(mut fragments: FragmentStream, mut on_output: F) -> Result<(), ApiError>
where
    F: FnMut(Option<&str>),
{
    while let Some(fragment) = fragments.next().await {
        let fragment = fragment?;
        on_output(Some(&fragment));
    }
    on_output(None);
    Ok(())
}
