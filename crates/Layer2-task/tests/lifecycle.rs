//! Task lifecycle through the public driver API, against the in-memory runtime

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use styx_foundation::DriverConfig;
use styx_task::container::ExecIo;
use styx_task::{ContainerRuntime, Driver, DriverError, DriverPlugin, TaskLifecycle};
use styx_test_utils::{host_task, init_tracing, with_timeout, FakeRuntime, HostTaskBuilder};
use tokio::io::AsyncReadExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn driver(runtime: &Arc<FakeRuntime>) -> Driver {
    Driver::with_runtime(runtime.clone(), DriverConfig::default())
}

#[tokio::test]
async fn test_start_then_destroy_leaves_no_containers() {
    init_tracing();
    let alloc = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let driver = driver(&runtime);

    let (handle, _) = driver
        .start_task(host_task("web", "nginx:latest", alloc.path()))
        .await
        .unwrap();
    assert_eq!(handle.version, 1);
    assert_eq!(runtime.container_count(), 1);

    driver.destroy_task("web", false).await.unwrap();
    assert_eq!(runtime.container_count(), 0);
    assert!(driver.tasks().is_empty().await);
}

#[tokio::test]
async fn test_named_volume_created_before_launch() {
    init_tracing();
    let alloc = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let driver = driver(&runtime);

    let task = HostTaskBuilder::new("db", "postgres:16", alloc.path())
        .with_volumes(&["mydata:/data", "/srv/conf:/etc/conf:ro"])
        .build();
    driver.start_task(task).await.unwrap();

    assert!(runtime.has_volume("mydata"));
    assert!(!runtime.has_volume("/srv/conf"));
    let created = runtime.call_index("volume-create mydata").unwrap();
    let launched = runtime.call_index("run db").unwrap();
    assert!(created < launched);

    let info = runtime.inspect("db").await.unwrap();
    let destinations: Vec<&str> = info
        .configuration
        .mounts
        .iter()
        .map(|m| m.destination.as_str())
        .collect();
    assert_eq!(
        destinations,
        vec!["/local", "/secrets", "/alloc", "/data", "/etc/conf"]
    );
}

#[tokio::test]
async fn test_existing_named_volume_is_reused() {
    let alloc = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    runtime.volume_create("cache").await.unwrap();
    let driver = driver(&runtime);

    let task = HostTaskBuilder::new("redis", "redis:7", alloc.path())
        .with_volumes(&["cache:/data"])
        .build();
    driver.start_task(task).await.unwrap();

    assert_eq!(runtime.call_count("volume-create"), 1);
}

#[tokio::test]
async fn test_default_network_is_styx() {
    let alloc = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let driver = driver(&runtime);

    let (_, network) = driver
        .start_task(host_task("web", "nginx:latest", alloc.path()))
        .await
        .unwrap();

    assert_eq!(runtime.network_subnet("styx").as_deref(), Some("192.168.200.0/24"));
    let info = runtime.container("web").unwrap();
    assert_eq!(info.networks[0].network, "styx");

    let network = network.unwrap();
    assert!(network.ip.starts_with("192.168.200."));
    assert!(network.auto_advertise);
    assert_eq!(network.port_map["http"], 24080);
}

#[tokio::test]
async fn test_explicit_network_is_used() {
    let alloc = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    runtime.add_network("backend", "10.20.0.0/16");
    let driver = driver(&runtime);

    let task = HostTaskBuilder::new("api", "api:1", alloc.path())
        .with_network("backend")
        .build();
    let (_, network) = driver.start_task(task).await.unwrap();

    assert_eq!(runtime.container("api").unwrap().networks[0].network, "backend");
    assert!(network.unwrap().ip.starts_with("10.20.0."));
    assert_eq!(runtime.call_count("network-create"), 0);
}

#[tokio::test]
async fn test_task_id_is_sanitized_for_container_name() {
    let alloc = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let driver = driver(&runtime);

    driver
        .start_task(host_task("alloc-1/web/0", "nginx", alloc.path()))
        .await
        .unwrap();

    assert!(runtime.container("alloc-1-web-0").is_some());
    let status = driver.inspect_task("alloc-1/web/0").await.unwrap();
    assert_eq!(status.driver_attributes["container_id"], "alloc-1-web-0");
}

#[tokio::test]
async fn test_destroy_twice_is_noop() {
    let alloc = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let driver = driver(&runtime);

    driver
        .start_task(host_task("web", "nginx", alloc.path()))
        .await
        .unwrap();

    driver.destroy_task("web", true).await.unwrap();
    driver.destroy_task("web", true).await.unwrap();
    driver.destroy_task("never-existed", false).await.unwrap();

    assert!(matches!(
        driver.inspect_task("web").await,
        Err(DriverError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_unknown_task_is_not_found() {
    let runtime = Arc::new(FakeRuntime::new());
    let driver = driver(&runtime);
    let ctx = CancellationToken::new();

    let err = driver.inspect_task("ghost").await.unwrap_err();
    assert_eq!(err.to_string(), "task ghost not found");

    assert!(driver
        .stop_task("ghost", Duration::from_secs(1), None)
        .await
        .unwrap_err()
        .is_not_found());
    assert!(driver.signal_task("ghost", "SIGHUP").await.unwrap_err().is_not_found());
    assert!(driver.wait_task(ctx.clone(), "ghost").await.unwrap_err().is_not_found());
    assert!(driver
        .exec_task("ghost", &["ls".to_string()], Duration::from_secs(1))
        .await
        .unwrap_err()
        .is_not_found());
    assert!(driver
        .task_stats(ctx, "ghost", Duration::from_secs(1))
        .await
        .err()
        .unwrap()
        .is_not_found());
}

#[tokio::test]
async fn test_start_rejects_bad_requests() {
    let alloc = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let driver = driver(&runtime);

    let no_resources = HostTaskBuilder::new("web", "nginx", alloc.path())
        .without_resources()
        .build();
    assert!(matches!(
        driver.start_task(no_resources).await,
        Err(DriverError::InvalidRequest(_))
    ));

    let no_image = HostTaskBuilder::new("web", "", alloc.path()).build();
    assert!(matches!(
        driver.start_task(no_image).await,
        Err(DriverError::InvalidRequest(_))
    ));

    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn test_port_bound_to_host_address() {
    let alloc = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let driver = driver(&runtime);

    let task = HostTaskBuilder::new("web", "nginx", alloc.path())
        .with("ports", serde_json::json!(["127.0.0.1:8080:80", "53/udp"]))
        .build();
    driver.start_task(task).await.unwrap();

    let ports = runtime.container("web").unwrap().configuration.published_ports;
    assert_eq!(ports.len(), 2);
    assert_eq!(ports[0].host_ip, "127.0.0.1");
    assert_eq!(ports[0].host_port, 8080);
    assert_eq!(ports[0].container_port, 80);
    assert_eq!(ports[1].container_port, 53);
    assert_eq!(ports[1].protocol, "udp");
}

#[tokio::test]
async fn test_duplicate_start_is_rejected() {
    let alloc = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let driver = driver(&runtime);

    driver
        .start_task(host_task("web", "nginx", alloc.path()))
        .await
        .unwrap();
    let calls = runtime.calls().len();

    let err = driver
        .start_task(host_task("web", "nginx", alloc.path()))
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::InvalidRequest(_)));
    assert_eq!(runtime.calls().len(), calls);
    assert_eq!(runtime.container_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_external_kill_exits_within_one_interval() {
    init_tracing();
    let alloc = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let driver = driver(&runtime);

    driver
        .start_task(host_task("web", "nginx", alloc.path()))
        .await
        .unwrap();
    let exit = driver
        .wait_task(CancellationToken::new(), "web")
        .await
        .unwrap();
    assert_eq!(
        driver.inspect_task("web").await.unwrap().state,
        TaskLifecycle::Running
    );

    let killed_at = Instant::now();
    runtime.kill_container("web");

    let exit = exit.await.unwrap();
    assert!(killed_at.elapsed() <= Duration::from_secs(2));
    assert_eq!(exit.exit_code, 0);
    assert_eq!(exit.signal, 0);
    assert!(!exit.oom_killed);

    // Exited tasks stay queryable until destroyed
    let status = driver.inspect_task("web").await.unwrap();
    assert_eq!(status.state, TaskLifecycle::Exited);
    assert!(status.completed_at.is_some());
    assert_eq!(status.exit_result, Some(exit));
}

#[tokio::test(start_paused = true)]
async fn test_wait_ends_silently_on_cancel_and_destroy() {
    let alloc = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let driver = driver(&runtime);
    driver
        .start_task(host_task("web", "nginx", alloc.path()))
        .await
        .unwrap();

    let ctx = CancellationToken::new();
    let cancelled = driver.wait_task(ctx.clone(), "web").await.unwrap();
    ctx.cancel();
    assert!(cancelled.await.is_err());

    let destroyed = driver
        .wait_task(CancellationToken::new(), "web")
        .await
        .unwrap();
    driver.destroy_task("web", false).await.unwrap();
    assert!(destroyed.await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_stop_signals_then_stops() {
    let alloc = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let driver = driver(&runtime);
    driver
        .start_task(host_task("web", "nginx", alloc.path()))
        .await
        .unwrap();

    driver
        .stop_task("web", Duration::from_secs(5), Some("SIGTERM"))
        .await
        .unwrap();

    let kill = runtime.call_index("kill web SIGTERM").unwrap();
    let stop = runtime.call_index("stop web").unwrap();
    assert!(kill < stop);

    let exit = driver
        .wait_task(CancellationToken::new(), "web")
        .await
        .unwrap();
    assert_eq!(exit.await.unwrap().exit_code, 0);
}

#[tokio::test]
async fn test_exec_task() {
    let alloc = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let driver = driver(&runtime);
    driver
        .start_task(host_task("web", "nginx", alloc.path()))
        .await
        .unwrap();

    let cmd = vec!["echo".to_string(), "hi".to_string()];
    let ok = driver
        .exec_task("web", &cmd, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(ok.stdout, b"echo hi\n");
    assert_eq!(ok.exit_result.exit_code, 0);

    runtime.fail_exec("sh: nope: not found");
    let failed = driver
        .exec_task("web", &cmd, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(failed.exit_result.exit_code, 1);
    assert!(failed.exit_result.err.unwrap().contains("not found"));
    assert_eq!(failed.stdout, b"sh: nope: not found");
}

#[tokio::test]
async fn test_exec_task_streaming() {
    let alloc = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let driver = driver(&runtime);
    driver
        .start_task(host_task("web", "nginx", alloc.path()))
        .await
        .unwrap();

    let (mut client, server) = tokio::io::duplex(256);
    let io = ExecIo::new(
        std::io::Cursor::new(b"hello\n".to_vec()),
        server,
        tokio::io::sink(),
    );
    let exit = driver
        .exec_task_streaming("web", &["cat".to_string()], io)
        .await
        .unwrap();
    assert_eq!(exit.exit_code, 0);

    let mut echoed = String::new();
    client.read_to_string(&mut echoed).await.unwrap();
    assert_eq!(echoed, "hello\n");
}

#[tokio::test(start_paused = true)]
async fn test_stats_yield_zero_sample_on_failure() {
    let alloc = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let driver = driver(&runtime);
    driver
        .start_task(host_task("web", "nginx", alloc.path()))
        .await
        .unwrap();

    let ctx = CancellationToken::new();
    let mut stats = driver
        .task_stats(ctx.clone(), "web", Duration::from_secs(1))
        .await
        .unwrap();

    let sample = stats.next().await.unwrap();
    assert_eq!(sample.cpu_percent, 12.5);

    runtime.fail_stats(true);
    let sample = stats.next().await.unwrap();
    assert!(sample.is_zero());

    runtime.fail_stats(false);
    let sample = stats.next().await.unwrap();
    assert_eq!(sample.memory_rss_bytes, 64 * 1024 * 1024);

    ctx.cancel();
    assert!(stats.next().await.is_none());
}

#[tokio::test]
async fn test_task_events_published() {
    let alloc = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let driver = driver(&runtime);
    let ctx = CancellationToken::new();
    let mut events = driver.task_events(ctx.clone());

    let task = HostTaskBuilder::new("db", "postgres:16", alloc.path())
        .with_volumes(&["pgdata:/var/lib/postgresql"])
        .build();
    driver.start_task(task).await.unwrap();

    let volume = with_timeout(events.next()).await.unwrap();
    assert_eq!(volume.message, "Created volume");
    assert_eq!(volume.annotations["volume"], "pgdata");

    let started = with_timeout(events.next()).await.unwrap();
    assert_eq!(started.message, "Started container");
    assert_eq!(started.task_id, "db");
    assert_eq!(started.annotations["container_id"], "db");

    driver.shutdown();
    assert!(events.next().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_set_config_repoints_running_monitors() {
    let alloc = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let driver = driver(&runtime);

    driver
        .start_task(host_task("web", "nginx", alloc.path()))
        .await
        .unwrap();
    let exit = driver
        .wait_task(CancellationToken::new(), "web")
        .await
        .unwrap();
    let inspects = runtime.call_count("inspect");

    driver
        .set_config(DriverConfig::default().container_bin_path("/nonexistent/styx/container"))
        .unwrap();

    // The fake container keeps running; only the new binary's failures end the task.
    let exit = exit.await.unwrap();
    assert!(exit.err.unwrap().contains("could not run"));
    assert_eq!(runtime.call_count("inspect"), inspects);
    assert!(runtime.container("web").unwrap().is_running());
}
