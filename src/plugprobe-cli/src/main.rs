mod console;
mod render;

use anyhow::{Context, Result};
use clap::Parser;
use console::Console;
use crossterm::tty::IsTty;
use plugprobe_core::{init_logging, AppDirs, Config};
use plugprobe_session::{PluginCommand, Session, SessionSettings};
use render::{ConsoleObserver, Palette};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "plugprobe",
    version,
    about = "Interactive debugger for line-delimited JSON stdio plugins"
)]
struct Cli {
    /// Config file to use instead of the per-user one
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Working directory for the plugin process
    #[arg(long, value_name = "DIR")]
    cwd: Option<PathBuf>,
    /// Extra environment variable for the plugin (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,
    /// Wait between the quit notification and killing the plugin
    #[arg(long, value_name = "MS")]
    quit_grace_ms: Option<u64>,
    /// Plugin command line, e.g. `cargo run -p echo-plugin`
    #[arg(
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "COMMAND"
    )]
    command: Vec<String>,
}

impl Cli {
    fn plugin_command(&self) -> Result<PluginCommand> {
        let mut command = PluginCommand::from_argv(self.command.iter().cloned())
            .context("a plugin command is required")?;
        command.working_dir = self.cwd.clone();
        command.env = self.env.clone();
        Ok(command)
    }

    fn settings(&self, config: &Config) -> SessionSettings {
        let mut settings = SessionSettings::from(&config.session);
        if let Some(ms) = self.quit_grace_ms {
            settings.quit_grace = Duration::from_millis(ms);
        }
        settings
    }

    fn load_config(&self, dirs: &AppDirs) -> Result<Config> {
        let config = match &self.config {
            Some(path) => Config::load_from(path)?,
            None => Config::load_or_default(dirs)?,
        };
        Ok(config)
    }
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if !io::stdout().is_tty() {
        eprintln!("plugprobe needs an interactive terminal on stdout");
        std::process::exit(1);
    }

    let dirs = AppDirs::discover()?;
    let config = cli.load_config(&dirs)?;
    let _logging = init_logging(&config.logging, &dirs)?;

    let command = cli.plugin_command()?;
    let settings = cli.settings(&config);
    tracing::info!(
        %command,
        quit_grace_ms = settings.quit_grace.as_millis() as u64,
        config_dir = %dirs.config_dir().display(),
        "Launching plugin session"
    );

    let palette = Palette::from_env();
    let session = Session::new(
        command,
        settings,
        Arc::new(ConsoleObserver::new(palette)),
    );
    println!("Starting plugin: {}", session.command());
    if let Err(err) = session.start() {
        // Stay in the console so the operator can read the failure.
        println!("{}", palette.error(&err.to_string()));
    }

    Console::new(&session, palette).run(io::stdin().lock())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_command_keeps_its_own_flags() {
        let cli = Cli::try_parse_from([
            "plugprobe",
            "--cwd",
            "/tmp",
            "--env",
            "RUST_LOG=debug",
            "cargo",
            "run",
            "-p",
            "echo",
        ])
        .expect("should parse");

        assert_eq!(cli.command, vec!["cargo", "run", "-p", "echo"]);
        let command = cli.plugin_command().unwrap();
        assert_eq!(command.program, "cargo");
        assert_eq!(command.args, vec!["run", "-p", "echo"]);
        assert_eq!(command.working_dir, Some(PathBuf::from("/tmp")));
        assert_eq!(command.env, vec![("RUST_LOG".to_string(), "debug".to_string())]);
    }

    #[test]
    fn missing_command_is_a_usage_error() {
        assert!(Cli::try_parse_from(["plugprobe"]).is_err());
        assert!(Cli::try_parse_from(["plugprobe", "--cwd", "/tmp"]).is_err());
    }

    #[test]
    fn env_pairs_need_a_key() {
        assert_eq!(
            parse_env_pair("A=b=c"),
            Ok(("A".to_string(), "b=c".to_string()))
        );
        assert_eq!(parse_env_pair("EMPTY="), Ok(("EMPTY".to_string(), String::new())));
        assert!(parse_env_pair("=value").is_err());
        assert!(parse_env_pair("novalue").is_err());
    }

    #[test]
    fn quit_grace_flag_overrides_config() {
        let config = Config::default();
        let cli = Cli::try_parse_from(["plugprobe", "plugin"]).unwrap();
        assert_eq!(cli.settings(&config).quit_grace, config.session.quit_grace());

        let cli = Cli::try_parse_from(["plugprobe", "--quit-grace-ms", "10", "plugin"]).unwrap();
        assert_eq!(cli.settings(&config).quit_grace, Duration::from_millis(10));
    }
}
