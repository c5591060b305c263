//! Callbacks through which a front-end follows a session.

use crate::codec::DecodeError;
use crate::message::Message;
use crate::process::LifecycleState;
use std::fmt;
use std::time::Duration;

/// Something worth showing the operator that is not a protocol message.
#[derive(Debug, Clone)]
pub enum Diagnostic {
    /// A line the plugin wrote to stderr.
    PluginStderr(String),
    /// A stdout line that could not be decoded; reading continues.
    MalformedLine(DecodeError),
    /// The stdout reader stopped on an I/O error.
    ReadFailed(String),
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::PluginStderr(text) => f.write_str(text),
            Diagnostic::MalformedLine(err) => write!(f, "{err}"),
            Diagnostic::ReadFailed(err) => write!(f, "error reading plugin output: {err}"),
        }
    }
}

/// Session events, delivered synchronously right after the state they
/// describe has been updated. Calls may come from the plugin reader threads.
///
/// A reply is never published before the `on_message_sent` of the request it
/// answers, even when the plugin responds while the request is still being
/// written.
pub trait SessionObserver: Send + Sync {
    fn on_state_changed(&self, _state: LifecycleState) {}
    fn on_message_sent(&self, _message: &Message) {}
    fn on_message_received(&self, _message: &Message, _response_time: Option<Duration>) {}
    fn on_diagnostic(&self, _diagnostic: &Diagnostic) {}
}

/// Writes every event to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_state_changed(&self, state: LifecycleState) {
        tracing::info!(%state, "Plugin state changed");
    }

    fn on_message_sent(&self, message: &Message) {
        tracing::info!(%message, "-> sent");
    }

    fn on_message_received(&self, message: &Message, response_time: Option<Duration>) {
        match response_time {
            Some(elapsed) => {
                tracing::info!(%message, elapsed_ms = elapsed.as_millis() as u64, "<- received")
            }
            None => tracing::info!(%message, "<- received"),
        }
    }

    fn on_diagnostic(&self, diagnostic: &Diagnostic) {
        match diagnostic {
            Diagnostic::PluginStderr(text) => tracing::debug!(target: "plugin", "{text}"),
            other => tracing::warn!("{other}"),
        }
    }
}
