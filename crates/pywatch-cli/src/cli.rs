use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use pywatch_core::ConfigOverrides;

pub const PYWATCH_HELP_TEMPLATE: &str =
    "{before-help}\nUsage:\n    {usage}\n\nGlobal options:\n{options}\n";

pub const PYWATCH_BEFORE_HELP: &str = concat!(
    "pywatch ",
    env!("CARGO_PKG_VERSION"),
    " – supervise a remotely published Python payload\n\n",
    "\x1b[1;36mCommands\x1b[0m\n",
    "  run              Watch the page and keep the latest payload running.\n",
    "  probe            Poll the page once and show what it currently announces.\n",
);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    propagate_version = false,
    disable_help_subcommand = true,
    before_help = PYWATCH_BEFORE_HELP,
    help_template = PYWATCH_HELP_TEMPLATE
)]
pub struct PywatchCli {
    #[arg(
        short,
        long,
        help = "Only log warnings and errors; suppress probe output",
        global = true
    )]
    pub quiet: bool,
    #[arg(short, long, action = ArgAction::Count, help = "Increase logging (-vv reaches trace)", global = true)]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[command(subcommand)]
    pub command: CommandCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandCli {
    #[command(
        about = "Watch the page and keep the latest payload running until interrupted.",
        override_usage = "pywatch run [URL] [--interval SECS] [--grace SECS] [--no-isolation]",
        after_help = "Examples:\n  pywatch run https://example.test\n  PYWATCH_URL=https://example.test pywatch run --workdir /srv/bot --no-isolation"
    )]
    Run(RunArgs),
    #[command(
        about = "Poll the page once and print its fingerprint and payload link.",
        override_usage = "pywatch probe [URL] [--json]",
        after_help = "Examples:\n  pywatch probe https://example.test\n  pywatch probe https://example.test --json"
    )]
    Probe(ProbeArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[arg(value_name = "URL", help = "Page to watch (defaults to PYWATCH_URL)")]
    pub url: Option<String>,
    #[arg(
        long,
        value_name = "URL",
        help = "Where the dependency list lives (defaults to <URL>/libraries.txt)"
    )]
    pub manifest_url: Option<String>,
    #[arg(long, value_name = "SECS", help = "Seconds between polls (default 30)")]
    pub interval: Option<u64>,
    #[arg(long, value_name = "SECS", help = "Timeout for each HTTP request (default 30)")]
    pub http_timeout: Option<u64>,
    #[arg(
        long,
        value_name = "SECS",
        help = "How long a payload may take to exit before it is killed (default 10)"
    )]
    pub grace: Option<u64>,
    #[arg(
        long,
        value_name = "DIR",
        help = "Directory holding the environment and payload (defaults to the current directory)"
    )]
    pub workdir: Option<PathBuf>,
    #[arg(long, help = "Use the base interpreter instead of a private environment")]
    pub no_isolation: bool,
}

impl RunArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            url: self.url.clone(),
            manifest_url: self.manifest_url.clone(),
            interval_secs: self.interval,
            http_timeout_secs: self.http_timeout,
            grace_secs: self.grace,
            workdir: self.workdir.clone(),
            no_isolation: self.no_isolation,
        }
    }
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    #[arg(value_name = "URL", help = "Page to poll (defaults to PYWATCH_URL)")]
    pub url: Option<String>,
    #[arg(long, value_name = "SECS", help = "Timeout for the HTTP request (default 30)")]
    pub http_timeout: Option<u64>,
    #[arg(long, help = "Print the observation as JSON")]
    pub json: bool,
}

impl ProbeArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            url: self.url.clone(),
            http_timeout_secs: self.http_timeout,
            ..ConfigOverrides::default()
        }
    }
}
