use anyhow::{Context, Result};
use clap::Parser;
use nvsmi_exporter::cli::{self, Cli, Command, ServeArgs};
use nvsmi_exporter::scrape::Scraper;
use nvsmi_exporter::server::{self, Exporter};
use nvsmi_exporter::smi::{SmiCommand, TelemetrySource};
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli::init_logging(cli.log_level);

    match cli.command {
        Command::Serve(args) => serve(&args),
        Command::ListMetricNames(args) => args.write_names(&mut std::io::stdout().lock()),
    }
}

fn serve(args: &ServeArgs) -> Result<()> {
    let cfg = args.to_config();
    let plan = cfg.validate().context("invalid exporter configuration")?;

    let source = SmiCommand::new(&cfg.executable, plan.fields(), cfg.smi_timeout);
    log::info!(
        "querying {} fields per gpu with `{}`",
        plan.len(),
        source.describe()
    );

    let scraper = Scraper::new(plan, Box::new(source));
    let exporter = Arc::new(Exporter::new(
        scraper,
        cfg.telemetry_path.clone(),
        cfg.metrics_token.clone(),
    ));
    server::serve(exporter, &cfg.listen_address).context("error running HTTP server")
}
