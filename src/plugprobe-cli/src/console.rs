//! Line-oriented operator console driving a [`Session`].

use crate::render::{timestamp, Palette};
use plugprobe_session::{codec, CancelOutcome, Session, SessionError};
use std::io::{self, BufRead};
use thiserror::Error;

pub const HELP: &str = "\
Commands:
  s <query>     send a search request (s #N reuses recent search N)
  c             send a cancel notification (when requests are pending)
  q             send a quit notification, then stop the plugin
  j <json>      send a custom JSON message
  t [r|n|e]     print a request, notification or empty template
  r             repeat the last sent message
  l             clear message history
  h             list recent searches
  p             show plugin status
  ?             show this help
  x             exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Search(SearchQuery),
    Cancel,
    QuitPlugin,
    Json(String),
    Template(TemplateKind),
    Repeat,
    Clear,
    Recent,
    Status,
    Help,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    Text(String),
    /// 1-based index into the recent search list.
    Recent(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Request,
    Notification,
    Empty,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("unknown command '{0}' (type ? for help)")]
    Unknown(String),
    #[error("'{command}' needs {what}")]
    MissingArgument {
        command: &'static str,
        what: &'static str,
    },
    #[error("unknown template '{0}', expected r, n or e")]
    UnknownTemplate(String),
    #[error("no recent search #{0}")]
    NoSuchRecent(usize),
}

impl ConsoleCommand {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, ConsoleError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word {
            "s" | "search" => {
                if rest.is_empty() {
                    return Err(ConsoleError::MissingArgument {
                        command: "s",
                        what: "a search query",
                    });
                }
                let recent = rest
                    .strip_prefix('#')
                    .and_then(|n| n.parse::<usize>().ok())
                    .filter(|n| *n > 0);
                match recent {
                    Some(index) => ConsoleCommand::Search(SearchQuery::Recent(index)),
                    None => ConsoleCommand::Search(SearchQuery::Text(rest.to_string())),
                }
            }
            "c" | "cancel" => ConsoleCommand::Cancel,
            "q" | "quit" => ConsoleCommand::QuitPlugin,
            "j" | "json" => {
                if rest.is_empty() {
                    return Err(ConsoleError::MissingArgument {
                        command: "j",
                        what: "a JSON document",
                    });
                }
                ConsoleCommand::Json(rest.to_string())
            }
            "t" | "template" => ConsoleCommand::Template(match rest {
                "" | "r" | "request" => TemplateKind::Request,
                "n" | "notification" => TemplateKind::Notification,
                "e" | "empty" => TemplateKind::Empty,
                other => return Err(ConsoleError::UnknownTemplate(other.to_string())),
            }),
            "r" | "repeat" => ConsoleCommand::Repeat,
            "l" | "clear" => ConsoleCommand::Clear,
            "h" | "history" => ConsoleCommand::Recent,
            "p" | "status" => ConsoleCommand::Status,
            "?" | "help" => ConsoleCommand::Help,
            "x" | "exit" => ConsoleCommand::Exit,
            other => return Err(ConsoleError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }
}

pub struct Console<'a> {
    session: &'a Session,
    palette: Palette,
}

impl<'a> Console<'a> {
    pub fn new(session: &'a Session, palette: Palette) -> Self {
        Self { session, palette }
    }

    /// Read commands until `x` or end of input, then stop the plugin.
    pub fn run<R: BufRead>(&self, input: R) -> io::Result<()> {
        println!("{HELP}");
        for line in input.lines() {
            let line = line?;
            match ConsoleCommand::parse(&line) {
                Ok(None) => {}
                Ok(Some(ConsoleCommand::Exit)) => break,
                Ok(Some(command)) => self.execute(command),
                Err(err) => self.error(&err.to_string()),
            }
        }
        tracing::info!("Console closed");
        self.session.terminate();
        Ok(())
    }

    pub fn execute(&self, command: ConsoleCommand) {
        let result = match command {
            ConsoleCommand::Search(query) => self.search(query),
            ConsoleCommand::Cancel => match self.session.cancel_pending() {
                Ok(CancelOutcome::Sent { pending }) => {
                    self.system(&format!("Cancel sent for {}", join_ids(&pending)));
                    Ok(())
                }
                Ok(CancelOutcome::NothingPending) => {
                    self.system("No pending requests to cancel");
                    Ok(())
                }
                Err(err) => Err(err),
            },
            ConsoleCommand::QuitPlugin => self.session.quit(),
            ConsoleCommand::Json(text) => self.session.send_json(&text).map(|_| ()),
            ConsoleCommand::Template(kind) => {
                println!("{}", self.template(kind));
                Ok(())
            }
            ConsoleCommand::Repeat => match self.session.repeat_last() {
                Ok(Some(_)) => Ok(()),
                Ok(None) => {
                    self.system("No previous message to repeat");
                    Ok(())
                }
                Err(err) => Err(err),
            },
            ConsoleCommand::Clear => {
                self.session.clear();
                self.system("Message history cleared");
                Ok(())
            }
            ConsoleCommand::Recent => {
                let recent = self.session.recent_searches();
                if recent.is_empty() {
                    self.system("No recent searches");
                }
                for (i, term) in recent.iter().enumerate() {
                    println!("  [{}] {term}", i + 1);
                }
                Ok(())
            }
            ConsoleCommand::Status => {
                println!("{}", self.status_line());
                Ok(())
            }
            ConsoleCommand::Help => {
                println!("{HELP}");
                Ok(())
            }
            ConsoleCommand::Exit => Ok(()),
        };

        if let Err(err) = result {
            self.error(&err.to_string());
        }
    }

    fn search(&self, query: SearchQuery) -> Result<(), SessionError> {
        let text = match query {
            SearchQuery::Text(text) => text,
            SearchQuery::Recent(index) => {
                match self.session.recent_searches().into_iter().nth(index - 1) {
                    Some(text) => text,
                    None => {
                        self.error(&ConsoleError::NoSuchRecent(index).to_string());
                        return Ok(());
                    }
                }
            }
        };
        self.session.search(&text).map(|_| ())
    }

    fn template(&self, kind: TemplateKind) -> String {
        match kind {
            TemplateKind::Request => codec::request_template(self.session.status().next_request_id),
            TemplateKind::Notification => codec::notification_template(),
            TemplateKind::Empty => codec::empty_template(),
        }
    }

    fn status_line(&self) -> String {
        let status = self.session.status();
        let pending = if status.pending.is_empty() {
            "0".to_string()
        } else {
            format!("{} ({})", status.pending.len(), join_ids(&status.pending))
        };
        let pid = status
            .pid
            .map(|pid| format!(" | PID: {pid}"))
            .unwrap_or_default();
        format!(
            "Status: {} | Next Request ID: {} | Pending Requests: {} | History: {}{}",
            status.state, status.next_request_id, pending, status.history_len, pid
        )
    }

    fn system(&self, text: &str) {
        println!("{} {}", timestamp(), self.palette.system(text));
    }

    fn error(&self, text: &str) {
        println!("{} {}", timestamp(), self.palette.error(text));
    }
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugprobe_session::{PluginCommand, SessionSettings, TracingObserver};
    use std::sync::Arc;

    fn parse(line: &str) -> ConsoleCommand {
        ConsoleCommand::parse(line)
            .expect("should parse")
            .expect("should not be blank")
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(ConsoleCommand::parse("   "), Ok(None));
    }

    #[test]
    fn search_keeps_the_whole_query() {
        assert_eq!(
            parse("s  hello   world "),
            ConsoleCommand::Search(SearchQuery::Text("hello   world".into()))
        );
        assert_eq!(
            parse("search #2"),
            ConsoleCommand::Search(SearchQuery::Recent(2))
        );
        assert_eq!(
            parse("s #0"),
            ConsoleCommand::Search(SearchQuery::Text("#0".into()))
        );
    }

    #[test]
    fn search_requires_query() {
        let err = ConsoleCommand::parse("s").unwrap_err();
        assert!(matches!(err, ConsoleError::MissingArgument { command: "s", .. }));
    }

    #[test]
    fn json_and_templates() {
        assert_eq!(
            parse(r#"j {"method":"ping"}"#),
            ConsoleCommand::Json(r#"{"method":"ping"}"#.into())
        );
        assert_eq!(parse("t"), ConsoleCommand::Template(TemplateKind::Request));
        assert_eq!(parse("t n"), ConsoleCommand::Template(TemplateKind::Notification));
        assert_eq!(
            ConsoleCommand::parse("t x"),
            Err(ConsoleError::UnknownTemplate("x".into()))
        );
    }

    #[test]
    fn unknown_words_are_rejected() {
        assert_eq!(
            ConsoleCommand::parse("launch"),
            Err(ConsoleError::Unknown("launch".into()))
        );
    }

    #[test]
    fn status_line_shows_next_id_and_pending() {
        let session = Session::new(
            PluginCommand::new("plugprobe-never-started"),
            SessionSettings::default(),
            Arc::new(TracingObserver),
        );
        session.allocate_id();
        let console = Console::new(&session, Palette::monochrome());
        assert_eq!(
            console.status_line(),
            "Status: stopped | Next Request ID: 2 | Pending Requests: 0 | History: 0"
        );
        assert!(console.template(TemplateKind::Request).contains("\"id\": 2"));
    }

    #[test]
    fn run_stops_at_exit_and_reports_inactive_session() {
        let session = Session::new(
            PluginCommand::new("plugprobe-never-started"),
            SessionSettings::default(),
            Arc::new(TracingObserver),
        );
        let console = Console::new(&session, Palette::monochrome());
        let input = io::Cursor::new("s calc\nbogus\nx\ns never\n");
        console.run(input).expect("console run");
        assert!(session.history().is_empty());
        // `s calc` consumed an id even though the send was refused.
        assert_eq!(session.status().next_request_id, 2);
    }
}
