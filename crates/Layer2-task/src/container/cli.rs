//! `CliRuntime` - drives the container tool as a child process

use super::types::{ContainerInfo, ContainerStats, DiskUsage, ExecIo, RunOptions, VolumeInfo};
use super::{ContainerRuntime, RuntimeError, RuntimeResult};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use styx_foundation::{DriverConfig, DEFAULT_CONTAINER_BIN};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::debug;

/// Executor backed by the container command-line tool
#[derive(Debug, Clone)]
pub struct CliRuntime {
    bin_path: PathBuf,
}

impl CliRuntime {
    /// An empty path selects the well-known default location
    pub fn new(bin_path: impl Into<PathBuf>) -> Self {
        let bin_path = bin_path.into();
        let bin_path = if bin_path.as_os_str().is_empty() {
            PathBuf::from(DEFAULT_CONTAINER_BIN)
        } else {
            bin_path
        };
        Self { bin_path }
    }

    pub fn from_config(config: &DriverConfig) -> Self {
        Self::new(config.container_bin())
    }

    pub fn bin_path(&self) -> &Path {
        &self.bin_path
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.bin_path);
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    async fn output<I, S>(&self, operation: &'static str, args: I) -> RuntimeResult<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        debug!(operation, bin = %self.bin_path.display(), "invoking container tool");
        self.command(args)
            .output()
            .await
            .map_err(|source| RuntimeError::Io { operation, source })
    }

    /// Stdout of a successful call; a failure carries the captured stderr
    async fn stdout<I, S>(&self, operation: &'static str, args: I) -> RuntimeResult<Vec<u8>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.output(operation, args).await?;
        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(RuntimeError::Execution {
                operation,
                output: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    /// Fire-and-verify call; a failure carries the combined output
    async fn checked<I, S>(&self, operation: &'static str, args: I) -> RuntimeResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.output(operation, args).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(RuntimeError::Execution {
                operation,
                output: String::from_utf8_lossy(&combined(&output)).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    fn is_available(&self) -> bool {
        which::which(&self.bin_path).is_ok()
    }

    async fn version(&self) -> RuntimeResult<String> {
        let out = self.stdout("version", ["--version"]).await?;
        Ok(String::from_utf8_lossy(&out).trim().to_string())
    }

    async fn run(&self, opts: &RunOptions) -> RuntimeResult<String> {
        let mut args = vec!["run".to_string()];
        args.extend(opts.build_args());

        let out = self.stdout("run", &args).await?;
        let id = String::from_utf8_lossy(&out).trim().to_string();
        if id.is_empty() {
            return Err(RuntimeError::Parse {
                operation: "run",
                message: "no container identifier in output".to_string(),
            });
        }
        Ok(id)
    }

    async fn stop(&self, id: &str) -> RuntimeResult<()> {
        self.checked("stop", ["stop", id]).await
    }

    async fn remove(&self, id: &str) -> RuntimeResult<()> {
        self.checked("rm", ["rm", id]).await
    }

    async fn kill(&self, id: &str, signal: Option<&str>) -> RuntimeResult<()> {
        let mut args = vec!["kill"];
        if let Some(signal) = signal.filter(|s| !s.is_empty()) {
            args.extend(["-s", signal]);
        }
        args.push(id);
        self.checked("kill", args).await
    }

    async fn inspect(&self, id: &str) -> RuntimeResult<ContainerInfo> {
        let out = self.stdout("inspect", ["inspect", id]).await?;
        parse_inspect(id, &out)
    }

    async fn list(&self, all: bool) -> RuntimeResult<Vec<ContainerInfo>> {
        let mut args = vec!["list", "--format", "json"];
        if all {
            args.push("-a");
        }
        let out = self.stdout("list", args).await?;
        parse_json("list", &out)
    }

    async fn logs(&self, id: &str) -> RuntimeResult<BoxStream<'static, RuntimeResult<String>>> {
        let mut child = self
            .command(["logs", id])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| RuntimeError::Io {
                operation: "logs",
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| RuntimeError::Io {
            operation: "logs",
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdout not captured"),
        })?;

        Ok(Box::pin(async_stream::stream! {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => yield Ok(line),
                    Ok(None) => break,
                    Err(source) => {
                        yield Err(RuntimeError::Io { operation: "logs", source });
                        break;
                    }
                }
            }
            match child.wait().await {
                Ok(status) if !status.success() => {
                    yield Err(RuntimeError::Execution {
                        operation: "logs",
                        output: format!("exited with {}", status),
                    });
                }
                Ok(_) => {}
                Err(source) => yield Err(RuntimeError::Io { operation: "logs", source }),
            }
        }))
    }

    async fn exec(&self, id: &str, command: &[String]) -> RuntimeResult<Vec<u8>> {
        let mut args = vec!["exec".to_string(), id.to_string()];
        args.extend(command.iter().cloned());

        let output = self.output("exec", &args).await?;
        let combined = combined(&output);
        if output.status.success() {
            Ok(combined)
        } else {
            Err(RuntimeError::Execution {
                operation: "exec",
                output: String::from_utf8_lossy(&combined).to_string(),
            })
        }
    }

    async fn exec_interactive(
        &self,
        id: &str,
        command: &[String],
        io: ExecIo,
    ) -> RuntimeResult<()> {
        let io_err = |source| RuntimeError::Io {
            operation: "exec",
            source,
        };

        let mut args = vec!["exec".to_string(), "-i".to_string(), id.to_string()];
        args.extend(command.iter().cloned());

        let mut child = self
            .command(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(io_err)?;

        let child_stdin = child.stdin.take();
        let child_stdout = child.stdout.take();
        let child_stderr = child.stderr.take();
        let ExecIo {
            mut stdin,
            mut stdout,
            mut stderr,
        } = io;

        // Caller input is forwarded until it ends; the session itself ends
        // when the child exits, whether or not input is exhausted.
        let feed = async move {
            if let Some(mut pipe) = child_stdin {
                let _ = tokio::io::copy(&mut stdin, &mut pipe).await;
                let _ = pipe.shutdown().await;
            }
        };

        let session = async {
            let out = async {
                match child_stdout {
                    Some(mut pipe) => tokio::io::copy(&mut pipe, &mut stdout).await.map(|_| ()),
                    None => Ok(()),
                }
            };
            let err = async {
                match child_stderr {
                    Some(mut pipe) => tokio::io::copy(&mut pipe, &mut stderr).await.map(|_| ()),
                    None => Ok(()),
                }
            };
            let copied = tokio::try_join!(out, err);
            let status = child.wait().await;
            (copied, status)
        };

        tokio::pin!(feed);
        tokio::pin!(session);
        let mut fed = false;
        let (copied, status) = loop {
            tokio::select! {
                result = &mut session => break result,
                _ = &mut feed, if !fed => fed = true,
            }
        };

        copied.map_err(io_err)?;
        let status = status.map_err(io_err)?;
        if status.success() {
            Ok(())
        } else {
            Err(RuntimeError::Execution {
                operation: "exec",
                output: format!("exited with {}", status),
            })
        }
    }

    async fn stats(&self, id: &str) -> RuntimeResult<ContainerStats> {
        let out = self
            .stdout("stats", ["stats", id, "--format", "json", "--no-stream"])
            .await?;
        let stats: Vec<ContainerStats> = parse_json("stats", &out)?;
        stats
            .into_iter()
            .next()
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    async fn pull(&self, image: &str) -> RuntimeResult<()> {
        self.checked("image pull", ["image", "pull", image]).await
    }

    async fn disk_usage(&self) -> RuntimeResult<DiskUsage> {
        let out = self
            .stdout("system df", ["system", "df", "--format", "json"])
            .await?;
        parse_json("system df", &out)
    }

    async fn prune(&self) -> RuntimeResult<()> {
        self.checked("image prune", ["image", "prune", "--all"]).await
    }

    async fn volume_list(&self) -> RuntimeResult<Vec<VolumeInfo>> {
        let out = self
            .stdout("volume list", ["volume", "list", "--format", "json"])
            .await?;
        if out.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        parse_json("volume list", &out)
    }

    async fn volume_create(&self, name: &str) -> RuntimeResult<()> {
        self.checked("volume create", ["volume", "create", name]).await
    }

    async fn volume_remove(&self, name: &str) -> RuntimeResult<()> {
        self.checked("volume remove", ["volume", "rm", name]).await
    }

    async fn network_list(&self) -> RuntimeResult<Vec<String>> {
        let out = self.stdout("network list", ["network", "list"]).await?;
        Ok(parse_network_list(&String::from_utf8_lossy(&out)))
    }

    async fn network_create(&self, name: &str, subnet: &str) -> RuntimeResult<()> {
        self.checked(
            "network create",
            ["network", "create", "--subnet", subnet, name],
        )
        .await
    }

    async fn network_delete(&self, name: &str) -> RuntimeResult<()> {
        self.checked("network delete", ["network", "delete", name])
            .await
    }
}

// ============================================================================
// Output parsing
// ============================================================================

fn combined(output: &Output) -> Vec<u8> {
    let mut all = output.stdout.clone();
    all.extend_from_slice(&output.stderr);
    all
}

fn parse_json<T: DeserializeOwned>(operation: &'static str, raw: &[u8]) -> RuntimeResult<T> {
    serde_json::from_slice(raw).map_err(|e| RuntimeError::Parse {
        operation,
        message: e.to_string(),
    })
}

fn parse_inspect(id: &str, raw: &[u8]) -> RuntimeResult<ContainerInfo> {
    let containers: Vec<ContainerInfo> = parse_json("inspect", raw)?;
    containers
        .into_iter()
        .next()
        .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
}

/// Network names from the `NETWORK  STATE  SUBNET` table
pub fn parse_network_list(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|name| *name != "NETWORK")
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_bin_path_uses_default() {
        let runtime = CliRuntime::new("");
        assert_eq!(runtime.bin_path(), Path::new(DEFAULT_CONTAINER_BIN));
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let runtime = CliRuntime::new("/nonexistent/styx/container");
        assert!(!runtime.is_available());
    }

    #[test]
    fn test_parse_inspect_first_record() {
        let raw = br#"[{"status":"running","configuration":{"id":"a"}},{"status":"stopped","configuration":{"id":"b"}}]"#;
        let info = parse_inspect("a", raw).unwrap();
        assert_eq!(info.id(), "a");
        assert!(info.is_running());
    }

    #[test]
    fn test_parse_inspect_empty_is_not_found() {
        let err = parse_inspect("ghost", b"[]").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_parse_inspect_malformed() {
        let err = parse_inspect("a", b"container a: running").unwrap_err();
        assert!(matches!(err, RuntimeError::Parse { operation: "inspect", .. }));
    }

    #[test]
    fn test_parse_network_list() {
        let text = "NETWORK  STATE    SUBNET\ndefault  running  192.168.64.0/24\nstyx     running  192.168.200.0/24\n\n";
        assert_eq!(parse_network_list(text), vec!["default", "styx"]);
    }

    #[test]
    fn test_parse_stats() {
        let raw = br#"[{"id":"a","cpuPercent":12.5,"memoryUsageBytes":1048576,"memoryLimitBytes":4194304}]"#;
        let stats: Vec<ContainerStats> = parse_json("stats", raw).unwrap();
        assert_eq!(stats[0].cpu_percent, 12.5);
        assert_eq!(stats[0].memory_usage_bytes, 1_048_576);
    }

    #[test]
    fn test_parse_disk_usage() {
        let raw = br#"{"images":{"total":4,"active":1,"sizeInBytes":100,"reclaimable":60},"containers":{"reclaimable":5},"volumes":{}}"#;
        let usage: DiskUsage = parse_json("system df", raw).unwrap();
        assert_eq!(usage.images.total, 4);
        assert_eq!(usage.total_reclaimable(), 65);
    }
}
