//! Plugin metadata and fingerprint commands

use futures::StreamExt;
use serde_json::json;
use styx_task::{Driver, DriverPlugin};
use tokio_util::sync::CancellationToken;

pub fn print_info(driver: &Driver) -> anyhow::Result<()> {
    let info = json!({
        "plugin": driver.plugin_info(),
        "capabilities": driver.capabilities(),
        "config_schema": driver.config_schema(),
        "task_config_schema": driver.task_config_schema(),
    });
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

/// Print reports until `count` is reached or Ctrl-C
pub async fn watch_fingerprint(driver: &Driver, count: Option<usize>) -> anyhow::Result<()> {
    let ctx = CancellationToken::new();
    let mut reports = driver.fingerprint(ctx.clone());
    let mut seen = 0;

    println!(
        "Watching driver health every {}s (Ctrl-C to stop)",
        driver.config().fingerprint_period_secs
    );

    loop {
        let report = tokio::select! {
            report = reports.next() => report,
            _ = tokio::signal::ctrl_c() => {
                ctx.cancel();
                break;
            }
        };
        let Some(report) = report else { break };

        println!("{}", serde_json::to_string(&report)?);
        seen += 1;
        if count.is_some_and(|n| seen >= n) {
            break;
        }
    }

    driver.shutdown();
    Ok(())
}
