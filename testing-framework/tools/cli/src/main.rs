use std::{path::PathBuf, time::Duration};

use anyhow::{Context as _, bail};
use clap::{Args, Parser, Subcommand};
use cyclebench_config::{ActivityFile, logging::init_tracing};
use cyclebench_core::{
    activity::ActivityDef,
    scenario::{Builder, Deployer as _, InProcessDeployer, ScenarioController},
};
use cyclebench_env as cb_env;
use cyclebench_workflows::{RecoveryReport, ScenarioBuilderExt as _};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "cyclebench", about = "Cycle-driven load engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start activities and wait for them to finish.
    Run(RunArgs),
    /// Run the bursty cycle-delay recovery scenario.
    CoCycleDelayBursty(CycleDelayArgs),
    /// List the metrics an activity registers.
    Metrics {
        /// Activity definition, `name=value;...`.
        spec: String,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Activity definitions, `name=value;...`.
    specs: Vec<String>,
    /// YAML or JSON activity file. Defaults to `CYCLEBENCH_ACTIVITY_FILE`.
    #[arg(long)]
    file: Option<PathBuf>,
    /// Stop whatever is still running after this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,
    /// Print the summary as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct CycleDelayArgs {
    #[arg(long)]
    poll_ms: Option<u64>,
    #[arg(long)]
    threshold_ns: Option<u64>,
    /// Fail unless waittime first rose above the threshold.
    #[arg(long)]
    require_backlog: bool,
}

const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(300);
const METRICS_START_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::CoCycleDelayBursty(args) => cycle_delay_bursty(args).await,
        Command::Metrics { spec } => metrics(&spec).await,
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let mut defs = Vec::new();
    let mut file_timeout = None;
    if let Some(path) = args.file.clone().or_else(cb_env::cyclebench_activity_file) {
        let file = ActivityFile::load_from_file(&path)
            .with_context(|| format!("failed to load activity file {}", path.display()))?;
        file_timeout = file.scenario.duration_secs.map(Duration::from_secs);
        defs.extend(file.activities.into_iter().map(ActivityDef::from_pairs));
    }
    for spec in &args.specs {
        defs.push(ActivityDef::parse(spec).with_context(|| format!("invalid activity '{spec}'"))?);
    }
    if defs.is_empty() {
        bail!("no activities given; pass definitions or --file");
    }

    let limit = args
        .timeout_secs
        .map(Duration::from_secs)
        .or(file_timeout)
        .unwrap_or(DEFAULT_RUN_TIMEOUT);

    let controller = ScenarioController::default();
    for def in defs {
        controller.start(def)?;
    }
    if !controller.await_all(limit).await {
        warn!(timeout_secs = limit.as_secs(), "timeout reached, stopping activities");
    }
    controller.stop_all().await;

    let summaries = controller.summaries();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        for summary in &summaries {
            println!(
                "{}: {} cycles={} errors={} mean_servicetime_ns={:.0}{}",
                summary.alias,
                summary.state,
                summary.completed_cycles,
                summary.errors,
                summary.mean_servicetime_ns,
                summary
                    .failure
                    .as_deref()
                    .map(|failure| format!(" failure={failure}"))
                    .unwrap_or_default(),
            );
        }
    }

    if let Some(failed) = summaries.iter().find(|summary| summary.failure.is_some()) {
        bail!("activity '{}' failed", failed.alias);
    }
    Ok(())
}

async fn cycle_delay_bursty(args: CycleDelayArgs) -> anyhow::Result<()> {
    let report = RecoveryReport::default();
    let mut scenario = Builder::new()
        .cycle_delay_bursty_with(|mut flow| {
            flow = flow
                .report(report.clone())
                .require_backlog(args.require_backlog);
            if let Some(ms) = args.poll_ms {
                flow = flow.poll_interval(Duration::from_millis(ms));
            }
            if let Some(ns) = args.threshold_ns {
                flow = flow.waittime_threshold(Duration::from_nanos(ns));
            }
            flow
        })
        .build()?;

    let runner = InProcessDeployer::new().deploy(&scenario).await?;
    let outcome = runner.run(&mut scenario).await;

    for line in report.transcript() {
        println!("{line}");
    }

    match outcome {
        Ok(_handle) => {
            info!("cycle delay scenario passed");
            Ok(())
        }
        Err(err) => bail!("cycle delay scenario failed: {err}"),
    }
}

async fn metrics(spec: &str) -> anyhow::Result<()> {
    let def = ActivityDef::parse(spec).with_context(|| format!("invalid activity '{spec}'"))?;
    def.set_cycles("1")?;

    let controller = ScenarioController::default();
    let alias = controller.start(def)?.alias();
    controller
        .await_activity(&alias, Some(METRICS_START_TIMEOUT))
        .await?;

    for line in controller.metrics().describe(&alias) {
        println!("{line}");
    }
    Ok(())
}
