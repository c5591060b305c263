use chrono::Local;
use crossterm::style::{Color, Stylize};
use plugprobe_session::{Diagnostic, LifecycleState, Message, SessionObserver};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct Palette {
    pub sent: Color,
    pub received: Color,
    pub system: Color,
    pub error: Color,
    pub plugin: Color,
    pub is_color: bool,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            sent: Color::Blue,
            received: Color::Green,
            system: Color::Yellow,
            error: Color::Red,
            plugin: Color::DarkYellow,
            is_color: true,
        }
    }
}

impl Palette {
    pub fn monochrome() -> Self {
        Self {
            is_color: false,
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        // Enforce NO_COLOR standard (see no-color.org)
        if env::var("NO_COLOR").is_ok() {
            return Self::monochrome();
        }
        Self::default()
    }

    pub fn paint(&self, text: &str, color: Color) -> String {
        if self.is_color {
            text.with(color).to_string()
        } else {
            text.to_string()
        }
    }

    pub fn system(&self, text: &str) -> String {
        self.paint(&format!("ℹ {text}"), self.system)
    }

    pub fn error(&self, text: &str) -> String {
        self.paint(&format!("⚠ {text}"), self.error)
    }
}

pub fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

/// Pretty-print a message under a one-line heading, continuation lines indented.
pub fn format_exchange(heading: &str, message: &Message) -> Vec<String> {
    let pretty = serde_json::to_string_pretty(message.fields())
        .unwrap_or_else(|_| message.to_string());
    let mut lines = pretty.lines();
    let mut out = vec![format!("{heading} {}", lines.next().unwrap_or_default())];
    out.extend(
        lines
            .filter(|line| !line.trim().is_empty())
            .map(|line| format!("    {line}")),
    );
    out
}

pub fn format_elapsed(elapsed: Duration) -> String {
    format!("{:.0}ms", elapsed.as_secs_f64() * 1000.0)
}

/// Prints every session event to the terminal.
#[derive(Debug, Default)]
pub struct ConsoleObserver {
    palette: Palette,
}

impl ConsoleObserver {
    pub fn new(palette: Palette) -> Self {
        Self { palette }
    }

    fn print_exchange(&self, heading: &str, message: &Message, color: Color) {
        let mut lines = format_exchange(heading, message).into_iter();
        let first = lines.next().unwrap_or_default();
        let mut block = format!("{} {}", timestamp(), self.palette.paint(&first, color));
        for line in lines {
            block.push('\n');
            block.push_str(&line);
        }
        println!("{block}");
    }
}

impl SessionObserver for ConsoleObserver {
    fn on_state_changed(&self, state: LifecycleState) {
        let text = match state {
            LifecycleState::Running => "Plugin started successfully".to_string(),
            LifecycleState::Disconnected => "Plugin disconnected (stdout closed)".to_string(),
            LifecycleState::Terminated => "Plugin process was terminated".to_string(),
            other => format!("Plugin {other}"),
        };
        println!("{} {}", timestamp(), self.palette.system(&text));
    }

    fn on_message_sent(&self, message: &Message) {
        self.print_exchange("→ Sent:", message, self.palette.sent);
    }

    fn on_message_received(&self, message: &Message, response_time: Option<Duration>) {
        let heading = match response_time {
            Some(elapsed) => format!("← Received ({}):", format_elapsed(elapsed)),
            None => "← Received:".to_string(),
        };
        self.print_exchange(&heading, message, self.palette.received);
    }

    fn on_diagnostic(&self, diagnostic: &Diagnostic) {
        let now = timestamp();
        match diagnostic {
            Diagnostic::PluginStderr(text) => {
                println!("{now} {}", self.palette.paint(&format!("[plugin] {text}"), self.palette.plugin));
            }
            Diagnostic::MalformedLine(err) => {
                println!("{now} {}", self.palette.error(&format!("Invalid JSON from plugin: {}", err.cause)));
                println!("{now} Raw output: {}", err.raw_text);
            }
            Diagnostic::ReadFailed(err) => {
                println!("{now} {}", self.palette.error(&format!("Error reading plugin output: {err}")));
            }
        }
    }
}
