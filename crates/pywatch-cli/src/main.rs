use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use pywatch_core::{Config, Shutdown};
use pywatch_domain::should_update;
use serde_json::json;

mod cli;

use cli::{CommandCli, ProbeArgs, PywatchCli, RunArgs};

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = PywatchCli::parse();
    init_tracing(cli.trace, cli.verbose, cli.quiet);

    match &cli.command {
        CommandCli::Run(args) => run(args),
        CommandCli::Probe(args) => probe(args, cli.quiet),
    }
}

fn init_tracing(trace: bool, verbose: u8, quiet: bool) {
    let level = if trace {
        "trace"
    } else {
        match (verbose, quiet) {
            (0, true) => "warn",
            (0, false) => "info",
            (1, _) => "debug",
            _ => "trace",
        }
    };

    let filter = format!("pywatch_cli={level},pywatch_core={level},pywatch_domain={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn run(args: &RunArgs) -> Result<()> {
    let config = Config::from_env(&args.overrides()).map_err(|err| eyre!("{err:?}"))?;
    let shutdown = Shutdown::new();
    pywatch_core::listen_for_signals(shutdown.clone()).map_err(|err| eyre!("{err:?}"))?;
    pywatch_core::watch(&config, shutdown).map_err(|err| eyre!("{err:?}"))
}

fn probe(args: &ProbeArgs, quiet: bool) -> Result<()> {
    let config = Config::from_env(&args.overrides()).map_err(|err| eyre!("{err:?}"))?;
    let observation = pywatch_core::probe(&config).map_err(|err| eyre!("{err:?}"))?;
    // what a freshly started supervisor would do with this page
    let would_update = should_update(None, &observation);

    if args.json {
        let payload = json!({
            "url": config.source().page_url.as_str(),
            "fingerprint": observation.fingerprint,
            "reference": observation.reference,
            "would_update": would_update,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else if !quiet {
        println!("page:         {}", config.source().page_url);
        println!("fingerprint:  {}", observation.fingerprint);
        match &observation.reference {
            Some(reference) => println!("payload:      {reference}"),
            None => println!("payload:      (no link)"),
        }
        println!("would update: {}", if would_update { "yes" } else { "no" });
    }
    Ok(())
}
