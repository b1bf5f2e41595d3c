//! segnet-agent binary
//!
//! ```text
//! segnet-agent run        run this process as the zone named by ZONE_NAME
//! segnet-agent validate   check a schedule and print its chain
//! segnet-agent monitor    summarize zone event logs
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{Instrument, error, info};

use segnet_agent::{Cli, Command, MonitorArgs, RunArgs, ZoneAgent, create_shutdown_token, monitor};
use segnet_core::Schedule;
use segnet_logging::{LogConfig, SegnetSubscriberBuilder, ZoneContext};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Validate { schedule } => Ok(validate(&schedule)),
        Command::Monitor(args) => monitor_logs(args).await,
    }
}

async fn run(args: RunArgs) -> anyhow::Result<ExitCode> {
    let config = args.to_config();
    let _guards = SegnetSubscriberBuilder::new()
        .with_config(args.log.to_log_config(config.zone.as_deref()))
        .try_init()?;

    let agent = match ZoneAgent::from_config(config) {
        Ok(agent) => agent,
        Err(e) => {
            error!(error = %e, "zone failed to start");
            return Ok(ExitCode::from(e.exit_code()));
        }
    };

    let context = ZoneContext::new(agent.zone().name.clone(), agent.zone().role);
    let cancel = create_shutdown_token();
    match agent.run(cancel).instrument(context.span()).await {
        Ok(report) => {
            info!(report = %serde_json::to_string(&report)?, "zone stopped");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!(error = %e, "zone failed to start");
            Ok(ExitCode::from(e.exit_code()))
        }
    }
}

fn validate(path: &Path) -> ExitCode {
    let schedule = match Schedule::from_path(path) {
        Ok(schedule) => schedule,
        Err(e) => {
            eprintln!("{}: {e}", path.display());
            return ExitCode::from(2);
        }
    };

    let chain: Vec<&str> = schedule.chain().iter().map(|z| z.as_str()).collect();
    println!("chain: {}", chain.join(" -> "));
    for zone in schedule.zones() {
        println!("  {:<24} {:<14} host {}", zone.name.as_str(), zone.role.as_str(), zone.host);
    }
    println!("rules:");
    for rule in schedule.rules() {
        println!(
            "  {:<4} {:<40} port {:<5} [{}, {})  {}",
            rule.id.to_string(),
            rule.link(),
            rule.port,
            rule.window.start_sec(),
            rule.window.end_sec(),
            rule.comment.as_deref().unwrap_or("")
        );
    }
    println!("horizon: {}s", schedule.horizon_sec());
    ExitCode::SUCCESS
}

async fn monitor_logs(args: MonitorArgs) -> anyhow::Result<ExitCode> {
    let mut log = LogConfig::development();
    log.default_level = "warn".to_string();
    let _guards = SegnetSubscriberBuilder::new().with_config(log).try_init()?;

    let follow = args.follow;
    let summary = monitor(
        args.logs,
        follow,
        Duration::from_millis(args.interval_ms),
        create_shutdown_token(),
        |entry| {
            if follow {
                println!("{}", entry.display_line());
            }
        },
    )
    .await;

    print!("{}", summary.render());
    Ok(ExitCode::SUCCESS)
}
