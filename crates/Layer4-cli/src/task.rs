//! Run and recover a single task
//!
//! Plays the host's part for one task: builds the start request, persists the
//! handle so a later `recover` can reattach, and waits for the task to exit.

use anyhow::{bail, Context};
use clap::Args;
use std::path::{Path, PathBuf};
use std::time::Duration;
use styx_foundation::JsonStore;
use styx_task::plugin::AllocatedResources;
use styx_task::{container_name, Driver, DriverPlugin, HostTaskConfig, TaskDir, TaskHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Grace period given to a task on Ctrl-C
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Task driver block (.json or .toml)
    #[arg(long)]
    pub task: PathBuf,

    /// Task identifier (generated when omitted)
    #[arg(long)]
    pub id: Option<String>,

    /// Allocation directory holding the task's local/secrets/alloc dirs
    #[arg(long)]
    pub alloc_dir: Option<PathBuf>,

    /// Where the task handle is persisted
    #[arg(long)]
    pub state_dir: Option<PathBuf>,
}

/// Read a driver block, choosing the format by extension
pub fn load_driver_block(path: &Path) -> anyhow::Result<serde_json::Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let value = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => {
            let table: toml::Table = toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            serde_json::to_value(table)?
        }
        Some("json") | None => serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?,
        Some(other) => bail!("Unsupported task format '{}'", other),
    };
    Ok(value)
}

fn handle_file(task_id: &str) -> String {
    format!("{}.json", container_name(task_id))
}

fn state_store(state_dir: Option<PathBuf>) -> anyhow::Result<JsonStore> {
    match state_dir {
        Some(dir) => Ok(JsonStore::new(dir)),
        None => Ok(JsonStore::state()?),
    }
}

pub async fn run(driver: &Driver, args: RunArgs) -> anyhow::Result<()> {
    let driver_config = load_driver_block(&args.task)?;

    let alloc_id = uuid::Uuid::new_v4().to_string();
    let task_id = args.id.unwrap_or_else(|| format!("{}/task", alloc_id));
    let name = task_id.rsplit('/').next().unwrap_or(&task_id).to_string();

    let alloc_dir = match args.alloc_dir {
        Some(dir) => dir,
        None => dirs::data_dir()
            .context("Cannot find data directory")?
            .join("styx")
            .join("alloc")
            .join(&alloc_id),
    };
    let task_dir = TaskDir::new(&alloc_dir, &name);
    task_dir
        .create_all()
        .with_context(|| format!("Failed to create task directories in {}", alloc_dir.display()))?;

    let request = HostTaskConfig {
        id: task_id.clone(),
        name,
        alloc_id,
        task_dir,
        resources: Some(AllocatedResources::default()),
        driver_config,
    };

    let (handle, network) = driver.start_task(request).await?;
    info!(task_id = %task_id, "task started");

    let store = state_store(args.state_dir)?;
    let file = handle_file(&task_id);
    if let Err(e) = store.save(&file, &handle) {
        warn!(error = %e, "failed to persist task handle; recovery will not be possible");
    } else {
        println!("Handle: {}", store.file_path(&file).display());
    }

    if let Some(network) = network {
        println!("Network: {}", serde_json::to_string(&network)?);
    }

    wait_and_cleanup(driver, &task_id).await?;

    if let Err(e) = store.remove(&file) {
        warn!(error = %e, "failed to remove task handle");
    }
    Ok(())
}

pub async fn recover(driver: &Driver, path: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let handle: TaskHandle = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    let task_id = handle.config.id.clone();
    driver.recover_task(&handle).await?;

    let status = driver.inspect_task(&task_id).await?;
    println!(
        "Recovered {} (started {})",
        task_id,
        status.started_at.to_rfc3339()
    );

    wait_and_cleanup(driver, &task_id).await?;

    if let Err(e) = std::fs::remove_file(path) {
        warn!(error = %e, "failed to remove task handle");
    }
    Ok(())
}

/// Wait for exit, or stop the task on Ctrl-C; destroy it either way
async fn wait_and_cleanup(driver: &Driver, task_id: &str) -> anyhow::Result<()> {
    let ctx = CancellationToken::new();
    let exit = driver.wait_task(ctx.clone(), task_id).await?;

    tokio::select! {
        result = exit => match result {
            Ok(exit) => println!("Task exited: {}", serde_json::to_string(&exit)?),
            Err(_) => println!("Task monitor stopped without an exit result"),
        },
        _ = tokio::signal::ctrl_c() => {
            ctx.cancel();
            println!("Stopping {}...", task_id);
            if let Err(e) = driver.stop_task(task_id, STOP_TIMEOUT, Some("SIGTERM")).await {
                warn!(task_id, error = %e, "failed to stop task");
            }
        }
    }

    driver.destroy_task(task_id, true).await?;
    driver.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_json_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("web.json");
        std::fs::write(&path, r#"{"image": "nginx", "ports": ["8080:80"]}"#).unwrap();

        let value = load_driver_block(&path).unwrap();
        assert_eq!(value["image"], "nginx");
        assert_eq!(value["ports"][0], "8080:80");
    }

    #[test]
    fn test_load_toml_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.toml");
        std::fs::write(
            &path,
            "image = \"postgres:16\"\nvolumes = [\"pgdata:/var/lib/postgresql\"]\ncpus = 2\n\n[env]\nPOSTGRES_DB = \"app\"\n",
        )
        .unwrap();

        let value = load_driver_block(&path).unwrap();
        let task: styx_task::TaskConfig = serde_json::from_value(value).unwrap();
        assert_eq!(task.image, "postgres:16");
        assert_eq!(task.cpus, 2);
        assert_eq!(task.env["POSTGRES_DB"], "app");
        assert!(task.validate().is_ok());
    }

    #[test]
    fn test_unsupported_block_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("web.hcl");
        std::fs::write(&path, "image = \"nginx\"").unwrap();
        assert!(load_driver_block(&path).is_err());
    }

    #[test]
    fn test_handle_file_is_flat() {
        assert_eq!(handle_file("a1/web"), "a1-web.json");
    }
}
