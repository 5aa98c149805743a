//! Direct runtime maintenance commands

use clap::Subcommand;
use futures::StreamExt;
use styx_foundation::DriverConfig;
use styx_task::{ContainerRuntime, Driver};

#[derive(Subcommand, Debug)]
pub enum NetworkAction {
    /// Create the shared network unless it exists
    Ensure {
        /// Network name (defaults to the configured one)
        #[arg(long)]
        name: Option<String>,
        /// Subnet in CIDR form (defaults to the configured one)
        #[arg(long)]
        subnet: Option<String>,
    },
    /// Delete a network
    Delete { name: String },
    /// List networks
    Ls,
}

#[derive(Subcommand, Debug)]
pub enum VolumeAction {
    /// List named volumes
    Ls,
    /// Remove a named volume
    Rm { name: String },
}

pub async fn ps(driver: &Driver, all: bool) -> anyhow::Result<()> {
    let containers = driver.runtime().list(all).await?;

    if containers.is_empty() {
        println!("No containers found.");
        return Ok(());
    }

    println!("{:<28} {:<36} {:<10} {:<16}", "ID", "IMAGE", "STATUS", "ADDR");
    println!("{}", "-".repeat(92));
    for c in containers {
        println!(
            "{:<28} {:<36} {:<10} {:<16}",
            c.id(),
            c.configuration.image.reference,
            c.status,
            c.primary_ip().unwrap_or("-")
        );
    }
    Ok(())
}

pub async fn logs(driver: &Driver, container: &str) -> anyhow::Result<()> {
    let mut lines = driver.runtime().logs(container).await?;
    while let Some(line) = lines.next().await {
        println!("{}", line?);
    }
    Ok(())
}

pub async fn disk_usage(driver: &Driver) -> anyhow::Result<()> {
    let usage = driver.runtime().disk_usage().await?;

    println!("{:<12} {:<8} {:<8} {:<14} {:<14}", "TYPE", "TOTAL", "ACTIVE", "SIZE", "RECLAIMABLE");
    for (kind, entry) in [
        ("Images", &usage.images),
        ("Containers", &usage.containers),
        ("Volumes", &usage.volumes),
    ] {
        println!(
            "{:<12} {:<8} {:<8} {:<14} {:<14}",
            kind,
            entry.total,
            entry.active,
            format_bytes(entry.size_in_bytes),
            format_bytes(entry.reclaimable)
        );
    }
    println!("\nTotal reclaimable: {}", format_bytes(usage.total_reclaimable()));
    Ok(())
}

pub async fn prune(driver: &Driver) -> anyhow::Result<()> {
    driver.runtime().prune().await?;
    println!("Removed unused images.");
    Ok(())
}

pub async fn network(
    driver: &Driver,
    config: &DriverConfig,
    action: NetworkAction,
) -> anyhow::Result<()> {
    let runtime = driver.runtime();
    match action {
        NetworkAction::Ensure { name, subnet } => {
            let name = name.unwrap_or_else(|| config.network.name.clone());
            let subnet = subnet.unwrap_or_else(|| config.network.subnet.clone());
            runtime.ensure_network(&name, &subnet).await?;
            println!("Network {} ready ({})", name, subnet);
        }
        NetworkAction::Delete { name } => {
            runtime.network_delete(&name).await?;
            println!("Deleted network {}", name);
        }
        NetworkAction::Ls => {
            for name in runtime.network_list().await? {
                println!("{}", name);
            }
        }
    }
    Ok(())
}

pub async fn volume(driver: &Driver, action: VolumeAction) -> anyhow::Result<()> {
    let runtime = driver.runtime();
    match action {
        VolumeAction::Ls => {
            for volume in runtime.volume_list().await? {
                println!("{:<24} {}", volume.name, volume.source);
            }
        }
        VolumeAction::Rm { name } => {
            runtime.volume_remove(&name).await?;
            println!("Removed volume {}", name);
        }
    }
    Ok(())
}

/// Human-readable byte count
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.0 GB");
    }
}
