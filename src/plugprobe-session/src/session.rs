//! The session engine: one plugin process, its message history and the
//! request correlation built on top of it.

use crate::codec::{self, DecodeError, EncodeError};
use crate::message::{Message, RequestId};
use crate::observer::{Diagnostic, SessionObserver};
use crate::process::{lock, LifecycleState, PluginCommand, PluginProcess, ProcessError, ProcessEvents};
use crate::store::{HistoryEntry, MessageStore, Reservation};
use plugprobe_core::SessionConfig;
use serde_json::Value;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors from session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot send message: plugin is {state}")]
    Inactive { state: LifecycleState },
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("invalid custom JSON: {0}")]
    InvalidJson(DecodeError),
    #[error("plugin disconnected while sending message: {0}")]
    WriteFailed(io::Error),
    #[error("failed to start plugin: {0}")]
    SpawnFailed(io::Error),
    #[error(transparent)]
    Process(ProcessError),
}

impl From<ProcessError> for SessionError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Inactive { state } => SessionError::Inactive { state },
            ProcessError::WriteFailed(err) => SessionError::WriteFailed(err),
            ProcessError::SpawnFailed(err) => SessionError::SpawnFailed(err),
            other => SessionError::Process(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Wait between the `quit` notification and killing the plugin.
    pub quit_grace: Duration,
    pub recent_search_limit: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            quit_grace: config.quit_grace(),
            recent_search_limit: config.recent_search_limit,
        }
    }
}

/// Result of [`Session::cancel_pending`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// A `cancel` notification went out while these requests were pending.
    Sent { pending: Vec<RequestId> },
    NothingPending,
}

/// Point-in-time view for a status panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: LifecycleState,
    pub pid: Option<u32>,
    pub next_request_id: RequestId,
    pub pending: Vec<RequestId>,
    pub history_len: usize,
}

type HeldReply = (Message, Option<Duration>);

#[derive(Debug, Default)]
struct Bookkeeping {
    store: MessageStore,
    last_sent: Option<Message>,
    last_received: Option<Message>,
    /// Request ids whose bytes are still being written.
    writing: Vec<RequestId>,
    /// Replies that arrived before their request was announced.
    held_replies: Vec<HeldReply>,
}

impl Bookkeeping {
    /// Finish the write of `id` and hand back the replies waiting on it.
    fn settle(&mut self, id: Option<RequestId>) -> Vec<HeldReply> {
        let Some(id) = id else {
            return Vec::new();
        };
        if let Some(pos) = self.writing.iter().position(|w| *w == id) {
            self.writing.swap_remove(pos);
        }
        if self.writing.contains(&id) {
            return Vec::new();
        }
        let (ready, waiting): (Vec<HeldReply>, Vec<HeldReply>) = std::mem::take(&mut self.held_replies)
            .into_iter()
            .partition(|(reply, _)| reply.id() == Some(id));
        self.held_replies = waiting;
        ready
    }
}

struct SessionInner {
    command: PluginCommand,
    settings: SessionSettings,
    process: PluginProcess,
    book: Mutex<Bookkeeping>,
    observer: Arc<dyn SessionObserver>,
}

/// A debugging session with a single plugin process.
///
/// Sessions are single use: once the plugin stops, start a new session.
/// Dropping the session kills the plugin.
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(
        command: PluginCommand,
        settings: SessionSettings,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                command,
                settings,
                process: PluginProcess::new(),
                book: Mutex::new(Bookkeeping::default()),
                observer,
            }),
        }
    }

    pub fn command(&self) -> &PluginCommand {
        &self.inner.command
    }

    /// Launch the plugin. Returns its process id.
    pub fn start(&self) -> Result<u32, SessionError> {
        let events: Arc<dyn ProcessEvents> = self.inner.clone();
        Ok(self.inner.process.start(&self.inner.command, events)?)
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.process.state()
    }

    /// Encode and write `message`, then record it. Nothing is recorded if
    /// the write fails.
    pub fn send(&self, message: Message) -> Result<(), SessionError> {
        self.inner.send(message)
    }

    /// Send `{"id": <next>, "method": "search", "params": query}`.
    pub fn search(&self, query: &str) -> Result<RequestId, SessionError> {
        let id = self.allocate_id();
        self.send(Message::request(id, "search", Value::from(query)))?;
        Ok(id)
    }

    /// Parse operator-written JSON and send it as is.
    pub fn send_json(&self, text: &str) -> Result<Message, SessionError> {
        let message = codec::parse_document(text).map_err(SessionError::InvalidJson)?;
        self.send(message.clone())?;
        Ok(message)
    }

    /// Feed one stdout line through decoding and correlation. The reader
    /// thread calls this for every line; exposed for replaying captured output.
    pub fn handle_inbound_line(&self, line: &[u8]) {
        self.inner.handle_inbound_line(line);
    }

    /// Ask the plugin to cancel outstanding work. Advisory only; local
    /// pending entries stay until their replies arrive.
    pub fn cancel_pending(&self) -> Result<CancelOutcome, SessionError> {
        let pending = lock(&self.inner.book).store.pending_ids();
        if pending.is_empty() {
            tracing::info!("No pending requests to cancel");
            return Ok(CancelOutcome::NothingPending);
        }
        self.send(Message::notification("cancel", None))?;
        Ok(CancelOutcome::Sent { pending })
    }

    /// Send `quit`, give the plugin the grace interval, then kill it.
    ///
    /// The plugin is terminated even when the notification could not be
    /// sent; the send error is still returned.
    pub fn quit(&self) -> Result<(), SessionError> {
        let sent = self.send(Message::notification("quit", None));
        if sent.is_ok() {
            thread::sleep(self.inner.settings.quit_grace);
        }
        self.terminate();
        sent
    }

    /// Re-send the last sent message. Requests get a fresh id so the copy
    /// never shares a pending entry with the original.
    pub fn repeat_last(&self) -> Result<Option<Message>, SessionError> {
        let message = {
            let mut book = lock(&self.inner.book);
            let Some(last) = book.last_sent.clone() else {
                tracing::info!("No previous message to repeat");
                return Ok(None);
            };
            match last.id() {
                Some(_) => {
                    let id = book.store.allocate_id();
                    last.with_id(id)
                }
                None => last,
            }
        };
        self.send(message.clone())?;
        Ok(Some(message))
    }

    pub fn terminate(&self) {
        self.inner.process.terminate();
    }

    pub fn allocate_id(&self) -> RequestId {
        lock(&self.inner.book).store.allocate_id()
    }

    pub fn recent_search_terms(&self, limit: usize) -> Vec<String> {
        lock(&self.inner.book)
            .store
            .recent_search_terms(limit)
            .map(str::to_string)
            .collect()
    }

    /// Recent search terms, as many as the session settings allow.
    pub fn recent_searches(&self) -> Vec<String> {
        self.recent_search_terms(self.inner.settings.recent_search_limit)
    }

    /// Empty the history. Pending requests are still tracked.
    pub fn clear(&self) {
        lock(&self.inner.book).store.clear();
    }

    pub fn has_pending(&self) -> bool {
        lock(&self.inner.book).store.has_pending()
    }

    pub fn pending_ids(&self) -> Vec<RequestId> {
        lock(&self.inner.book).store.pending_ids()
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        lock(&self.inner.book).store.history().to_vec()
    }

    pub fn last_sent(&self) -> Option<Message> {
        lock(&self.inner.book).last_sent.clone()
    }

    pub fn last_received(&self) -> Option<Message> {
        lock(&self.inner.book).last_received.clone()
    }

    pub fn status(&self) -> SessionStatus {
        let state = self.state();
        let pid = self.inner.process.pid();
        let book = lock(&self.inner.book);
        SessionStatus {
            state,
            pid,
            next_request_id: book.store.peek_next_id(),
            pending: book.store.pending_ids(),
            history_len: book.store.len(),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.inner.process.terminate();
    }
}

impl SessionInner {
    fn send(&self, message: Message) -> Result<(), SessionError> {
        let state = self.process.state();
        if !state.accepts_sends() {
            tracing::warn!(%state, "Cannot send message: plugin is not running");
            return Err(SessionError::Inactive { state });
        }
        let bytes = codec::encode(&message)?;

        let sent_at = Instant::now();
        let reservation = self.reserve(&message, sent_at);

        if let Err(err) = self.process.send(&bytes) {
            tracing::warn!(error = %err, "Failed to send message");
            self.abandon_send(&message, reservation);
            return Err(err.into());
        }

        tracing::debug!(bytes = bytes.len(), id = ?message.id(), "Sent message");
        self.announce_sent(message, sent_at);
        Ok(())
    }

    /// Register the pending entry before writing so a fast reply finds it.
    fn reserve(&self, message: &Message, sent_at: Instant) -> Option<Reservation> {
        let id = message.id()?;
        let mut book = lock(&self.book);
        book.writing.push(id);
        Some(book.store.reserve_pending(id, sent_at))
    }

    /// Record a written message, then publish it ahead of any reply that
    /// overtook it.
    fn announce_sent(&self, message: Message, sent_at: Instant) {
        let held = {
            let mut book = lock(&self.book);
            book.store.commit_sent(message.clone(), sent_at);
            book.last_sent = Some(message.clone());
            book.settle(message.id())
        };
        self.observer.on_message_sent(&message);
        self.publish_held(held);
    }

    fn abandon_send(&self, message: &Message, reservation: Option<Reservation>) {
        let held = {
            let mut book = lock(&self.book);
            if let Some(reservation) = reservation {
                book.store.release(reservation);
            }
            book.settle(message.id())
        };
        self.publish_held(held);
    }

    fn publish_held(&self, held: Vec<HeldReply>) {
        for (reply, response_time) in held {
            self.observer.on_message_received(&reply, response_time);
        }
    }

    fn handle_inbound_line(&self, line: &[u8]) {
        let message = match codec::decode(line) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(raw = %err.raw_text, cause = %err.cause, "Invalid JSON from plugin");
                self.observer.on_diagnostic(&Diagnostic::MalformedLine(err));
                return;
            }
        };

        let (response_time, held) = {
            let mut book = lock(&self.book);
            let response_time = book.store.record_received(message.clone());
            book.last_received = Some(message.clone());
            let held = message.id().is_some_and(|id| book.writing.contains(&id));
            if held {
                book.held_replies.push((message.clone(), response_time));
            }
            (response_time, held)
        };
        tracing::debug!(
            id = ?message.id(),
            elapsed_ms = response_time.map(|d| d.as_millis() as u64),
            held,
            "Received message"
        );
        if !held {
            self.observer.on_message_received(&message, response_time);
        }
    }
}

impl ProcessEvents for SessionInner {
    fn on_stdout_line(&self, line: &[u8]) {
        self.handle_inbound_line(line);
    }

    fn on_stderr_line(&self, text: &str) {
        self.observer
            .on_diagnostic(&Diagnostic::PluginStderr(text.to_string()));
    }

    fn on_state_changed(&self, state: LifecycleState) {
        self.observer.on_state_changed(state);
    }

    fn on_read_failed(&self, error: &io::Error) {
        self.observer
            .on_diagnostic(&Diagnostic::ReadFailed(error.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::TracingObserver;
    use serde_json::json;

    fn idle_session() -> Session {
        Session::new(
            PluginCommand::new("plugprobe-never-started"),
            SessionSettings::default(),
            Arc::new(TracingObserver),
        )
    }

    #[test]
    fn send_before_start_is_rejected_without_recording() {
        let session = idle_session();
        let err = session
            .send(Message::request(1, "search", json!("calc")))
            .unwrap_err();

        assert!(matches!(
            err,
            SessionError::Inactive {
                state: LifecycleState::Stopped
            }
        ));
        assert!(session.history().is_empty());
        assert!(!session.has_pending());
        assert!(session.last_sent().is_none());
    }

    #[test]
    fn nothing_to_cancel_or_repeat_is_not_an_error() {
        let session = idle_session();
        assert_eq!(
            session.cancel_pending().unwrap(),
            CancelOutcome::NothingPending
        );
        assert_eq!(session.repeat_last().unwrap(), None);
    }

    #[test]
    fn invalid_custom_json_is_reported_before_state_check() {
        let session = idle_session();
        let err = session.send_json("{\"method\": ").unwrap_err();
        assert!(matches!(err, SessionError::InvalidJson(_)));
    }

    #[test]
    fn inbound_lines_are_recorded_without_a_process() {
        let session = idle_session();
        session.handle_inbound_line(br#"{"method":"log","params":"hi"}"#);
        session.handle_inbound_line(b"garbage");

        let history = session.history();
        assert_eq!(history.len(), 1);
        assert_eq!(
            session.last_received().and_then(|m| m.method().map(str::to_string)),
            Some("log".to_string())
        );
    }

    #[test]
    fn status_reflects_store_without_consuming_ids() {
        let session = idle_session();
        assert_eq!(session.allocate_id(), 1);
        let status = session.status();
        assert_eq!(status.next_request_id, 2);
        assert_eq!(session.status().next_request_id, 2);
        assert_eq!(status.state, LifecycleState::Stopped);
        assert_eq!(status.pid, None);
    }

    #[test]
    fn settings_follow_config() {
        let config = SessionConfig {
            quit_grace_ms: 20,
            recent_search_limit: 3,
        };
        let settings = SessionSettings::from(&config);
        assert_eq!(settings.quit_grace, Duration::from_millis(20));
        assert_eq!(settings.recent_search_limit, 3);
    }

    #[derive(Default)]
    struct Transcript(Mutex<Vec<String>>);

    impl SessionObserver for Transcript {
        fn on_message_sent(&self, message: &Message) {
            lock(&self.0).push(format!("sent {:?}", message.id()));
        }

        fn on_message_received(&self, message: &Message, response_time: Option<Duration>) {
            let timed = if response_time.is_some() { "timed" } else { "untimed" };
            lock(&self.0).push(format!("received {:?} {timed}", message.id()));
        }
    }

    #[test]
    fn reply_overtaking_its_write_is_published_after_the_send() {
        let transcript = Arc::new(Transcript::default());
        let session = Session::new(
            PluginCommand::new("plugprobe-never-started"),
            SessionSettings::default(),
            transcript.clone(),
        );
        let inner = &session.inner;
        let request = Message::request(7, "search", json!("calc"));
        let sent_at = Instant::now();

        let _reservation = inner.reserve(&request, sent_at);
        session.handle_inbound_line(br#"{"id":7,"result":[]}"#);
        session.handle_inbound_line(br#"{"method":"log"}"#);
        assert_eq!(*lock(&transcript.0), vec!["received None untimed"]);

        inner.announce_sent(request, sent_at);
        assert_eq!(
            *lock(&transcript.0),
            vec!["received None untimed", "sent Some(7)", "received Some(7) timed"]
        );
        assert_eq!(session.history().len(), 3);
        assert!(!session.has_pending());
    }

    #[test]
    fn reply_held_for_a_failed_write_is_still_published() {
        let transcript = Arc::new(Transcript::default());
        let session = Session::new(
            PluginCommand::new("plugprobe-never-started"),
            SessionSettings::default(),
            transcript.clone(),
        );
        let inner = &session.inner;
        let request = Message::request(3, "search", json!("calc"));

        let reservation = inner.reserve(&request, Instant::now());
        session.handle_inbound_line(br#"{"id":3,"result":[]}"#);
        inner.abandon_send(&request, reservation);

        assert_eq!(*lock(&transcript.0), vec!["received Some(3) timed"]);
        assert!(lock(&inner.book).held_replies.is_empty());
        assert!(session.last_sent().is_none());
    }

    #[test]
    fn quit_without_a_process_still_stops() {
        let session = idle_session();
        let err = session.quit().unwrap_err();
        assert!(matches!(err, SessionError::Inactive { .. }));
        assert_eq!(session.state(), LifecycleState::Stopped);
    }
}
