//! Plugin session engine for plugprobe.
//!
//! This crate provides:
//! - A line codec for the plugin protocol (one JSON object per line)
//! - A process controller that owns the plugin and its stdio pipes
//! - A message store that keeps history and times request/reply pairs
//! - A [`Session`] that ties them together and reports to a [`SessionObserver`]
//!
//! # Plugin Protocol
//!
//! The harness writes requests and notifications to the plugin's stdin and
//! reads replies from its stdout; stderr is free-form diagnostics:
//!
//! ```text
//! -> {"id":1,"method":"search","params":"calc"}
//! <- {"id":1,"result":[{"title":"Calculator"}]}
//! -> {"method":"cancel"}
//! -> {"method":"quit"}
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use plugprobe_session::{PluginCommand, Session, SessionSettings, TracingObserver};
//! use std::sync::Arc;
//!
//! let command = PluginCommand::from_argv(["cargo", "run", "-p", "echo"]).unwrap();
//! let session = Session::new(command, SessionSettings::default(), Arc::new(TracingObserver));
//! session.start()?;
//! session.search("calc")?;
//! ```

pub mod codec;
mod message;
mod observer;
mod process;
mod session;
mod store;

pub use codec::{DecodeCause, DecodeError, EncodeError};
pub use message::{Message, MessageKind, ReplyOutcome, RequestId};
pub use observer::{Diagnostic, SessionObserver, TracingObserver};
pub use process::{LifecycleState, PluginCommand, PluginProcess, ProcessError, ProcessEvents};
pub use session::{CancelOutcome, Session, SessionError, SessionSettings, SessionStatus};
pub use store::{Direction, HistoryEntry, MessageStore, Reservation};
