//! Composer: turns user input into a streamed chat or document query and feeds the reply
//! into the conversation.

use chrono::{DateTime, Local};
use tokio::sync::watch;

use crate::api::{handle_stream, ApiClient, ApiError, StreamRequest};
use crate::conversation::{ChatState, Conversation, ConversationError};
use crate::identity::{IdentityStore, SessionContext};

/// Which endpoint a send goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// Plain chat.
    Chat,
    /// Question answered from the selected documents.
    AskDoc,
}

#[derive(Debug, thiserror::Error)]
pub enum ComposerError {
    #[error(transparent)]
    Conversation(#[from] ConversationError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Identity(#[from] anyhow::Error),
}

pub struct Composer {
    api: ApiClient,
    identity: IdentityStore,
    session: SessionContext,
    access_token: Option<String>,
    conversation: Conversation,
    file_ids: watch::Receiver<Vec<String>>,
}

impl Composer {
    /// `access_token` is the config/env override used when the session is reloaded.
    pub fn new(
        api: ApiClient,
        identity: IdentityStore,
        session: SessionContext,
        access_token: Option<String>,
        file_ids: watch::Receiver<Vec<String>>,
    ) -> Self {
        Self {
            api,
            identity,
            session,
            access_token,
            conversation: Conversation::new(),
            file_ids,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Currently selected file ids, as last published by the file library.
    pub fn file_ids(&self) -> Vec<String> {
        self.file_ids.borrow().clone()
    }

    pub fn request_for(&self, input: &str, mode: SendMode) -> StreamRequest {
        let user = self.session.user.clone();
        match mode {
            SendMode::Chat => StreamRequest::Chat {
                user,
                prompt: input.to_string(),
            },
            SendMode::AskDoc => StreamRequest::AskDoc {
                user,
                query: input.to_string(),
                file_id_list: self.file_ids(),
            },
        }
    }

    fn refresh_session(&mut self, now: DateTime<Local>) -> Result<(), ComposerError> {
        if self.session.is_expired(now) {
            log::debug!("session for {} expired, reloading", self.session.user);
            self.session = self.identity.load(now, self.access_token.clone())?;
        }
        Ok(())
    }

    /// Send `input` and stream the reply into the conversation. `on_update` runs after the
    /// user message is appended and after every fragment and the end of stream.
    ///
    /// Rejected with [`ConversationError::Busy`] while another reply is streaming. A transport
    /// failure returns the conversation to idle and is returned here. Dropping the future
    /// (e.g. under `tokio::time::timeout`) also returns the conversation to idle.
    pub async fn send<F>(&mut self, input: &str, mode: SendMode, mut on_update: F) -> Result<(), ComposerError>
    where
        F: FnMut(&Conversation),
    {
        self.refresh_session(Local::now())?;
        self.conversation.submit(input)?;
        on_update(&self.conversation);

        let request = self.request_for(input, mode);
        let mut pending = PendingReply {
            conversation: &mut self.conversation,
        };
        let fragments = match self.api.stream(&self.session, &request).await {
            Ok(fragments) => fragments,
            Err(e) => {
                drop(pending);
                on_update(&self.conversation);
                return Err(e.into());
            }
        };

        let result = handle_stream(fragments, |fragment| {
            pending.conversation.apply(fragment);
            on_update(&*pending.conversation);
        })
        .await;
        drop(pending);
        if let Err(e) = result {
            log::warn!("reply stream failed: {}", e);
            return Err(e.into());
        }
        Ok(())
    }

    /// Start a new topic: separator message (if the conversation is non-empty) and a fresh
    /// session user. Returns whether a separator was appended. Rejected while a reply streams.
    pub fn new_topic(&mut self, now: DateTime<Local>) -> Result<bool, ComposerError> {
        let appended = self.conversation.start_new_topic()?;
        self.session = self.identity.new_topic(&self.session, now)?;
        Ok(appended)
    }
}

/// Holds the conversation while a reply is in flight; whatever ends the send (sentinel,
/// error, or the future being dropped) leaves it idle.
struct PendingReply<'a> {
    conversation: &'a mut Conversation,
}

impl Drop for PendingReply<'_> {
    fn drop(&mut self) {
        if self.conversation.state() != ChatState::Idle {
            log::debug!("reply abandoned before end of stream");
            self.conversation.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DayStore;

    fn composer() -> (Composer, watch::Sender<Vec<String>>) {
        let dir = std::env::temp_dir().join(format!("askdoc-composer-test-{}", uuid::Uuid::new_v4()));
        let identity = IdentityStore::new(DayStore::open(dir.join("storage.json"), "askdoc"));
        let session = identity.load(Local::now(), None).unwrap();
        let (tx, rx) = watch::channel(Vec::new());
        let composer = Composer::new(ApiClient::new(None), identity, session, None, rx);
        (composer, tx)
    }

    #[test]
    fn ask_doc_request_carries_current_selection() {
        let (composer, tx) = composer();
        tx.send(vec!["7".into(), "9".into()]).unwrap();
        let user = composer.session().user.clone();
        assert_eq!(
            composer.request_for("what?", SendMode::AskDoc),
            StreamRequest::AskDoc {
                user: user.clone(),
                query: "what?".into(),
                file_id_list: vec!["7".into(), "9".into()],
            }
        );
        assert_eq!(
            composer.request_for("hi", SendMode::Chat),
            StreamRequest::Chat {
                user,
                prompt: "hi".into()
            }
        );
    }

    #[test]
    fn new_topic_changes_user_and_skips_separator_when_empty() {
        let (mut composer, _tx) = composer();
        let before = composer.session().user.clone();
        let now = Local::now();
        assert!(!composer.new_topic(now).unwrap());
        assert!(composer.conversation().is_empty());
        assert_ne!(composer.session().user, before);
        assert!(composer.session().user.ends_with(&format!(".{}", now.timestamp_millis())));
    }

    #[test]
    fn new_topic_while_reply_pending_keeps_user() {
        let (mut composer, _tx) = composer();
        composer.conversation.submit("q").unwrap();
        let before = composer.session().user.clone();
        assert!(matches!(
            composer.new_topic(Local::now()),
            Err(ComposerError::Conversation(ConversationError::Busy))
        ));
        assert_eq!(composer.session().user, before);
        assert_eq!(composer.conversation().messages().len(), 1);
    }

    #[tokio::test]
    async fn empty_input_is_rejected_before_any_request() {
        let (mut composer, _tx) = composer();
        let err = composer.send("  ", SendMode::Chat, |_| {}).await.unwrap_err();
        assert!(matches!(
            err,
            ComposerError::Conversation(ConversationError::EmptyInput)
        ));
        assert!(composer.conversation().is_empty());
    }
}
