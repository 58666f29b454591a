use std::sync::atomic::Ordering;

use playhost::models::workspace::{EngineType, WorkspaceStatus};
use playhost::supervisor::health::OverallHealth;
use playhost::supervisor::server::ServerStatus;
use playhost::AppError;

use super::test_helpers::{create_workspace, test_stack, test_stack_with};

#[tokio::test]
async fn start_rejects_non_preview_engines() {
    let stack = test_stack().await;
    let workspace = create_workspace(&stack.workspaces, EngineType::Unreal).await;

    let err = stack
        .supervisor
        .start_server(&workspace.id)
        .await
        .expect_err("unreal has no live preview");
    assert!(matches!(err, AppError::UnsupportedEngine(_)), "got: {err}");
    assert_eq!(stack.runtime.spawn_count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn start_twice_reuses_the_healthy_binding() {
    let stack = test_stack().await;
    let workspace = create_workspace(&stack.workspaces, EngineType::Playcanvas).await;

    let first = stack
        .supervisor
        .start_server(&workspace.id)
        .await
        .expect("first start");
    let persisted = stack.workspaces.get_by_id(&workspace.id).await.expect("fetch");
    assert_eq!(persisted.status, WorkspaceStatus::Ready);
    assert_eq!(persisted.preview_port, Some(first.port));
    assert_eq!(persisted.preview_pid, Some(first.pid));

    let second = stack
        .supervisor
        .start_server(&workspace.id)
        .await
        .expect("second start");
    assert_eq!(second.port, first.port);
    assert_eq!(second.pid, first.pid);
    assert_eq!(
        stack.runtime.spawn_count.load(Ordering::SeqCst),
        1,
        "idempotent start must not launch a second process"
    );
}

#[tokio::test]
async fn failed_start_marks_error_and_kills_the_partial_process() {
    let stack = test_stack_with(false, false).await;
    let workspace = create_workspace(&stack.workspaces, EngineType::Playcanvas).await;
    *stack.runtime.default_stderr.lock().unwrap() = Some("listen EADDRINUSE".into());

    let err = stack
        .supervisor
        .start_server(&workspace.id)
        .await
        .expect_err("server never becomes healthy");
    let rendered = err.to_string();
    assert!(matches!(err, AppError::StartFailed(_)), "got: {rendered}");
    assert!(
        rendered.contains("listen EADDRINUSE"),
        "captured stderr must be surfaced: {rendered}"
    );

    let persisted = stack.workspaces.get_by_id(&workspace.id).await.expect("fetch");
    assert_eq!(persisted.status, WorkspaceStatus::Error);
    assert!(persisted.preview_port.is_none());
    assert!(persisted.preview_pid.is_none());
    assert!(
        stack.runtime.alive_pids().is_empty(),
        "partially started process must be killed"
    );
}

#[tokio::test]
async fn stop_twice_succeeds_both_times() {
    let stack = test_stack().await;
    let workspace = create_workspace(&stack.workspaces, EngineType::Playcanvas).await;
    stack
        .supervisor
        .start_server(&workspace.id)
        .await
        .expect("start");

    stack
        .supervisor
        .stop_server(&workspace.id)
        .await
        .expect("first stop");
    let stopped = stack.workspaces.get_by_id(&workspace.id).await.expect("fetch");
    assert_eq!(stopped.status, WorkspaceStatus::Initializing);
    assert!(stopped.preview_pid.is_none());

    stack
        .supervisor
        .stop_server(&workspace.id)
        .await
        .expect("second stop is a no-op success");
}

#[tokio::test]
async fn send_command_requires_a_running_server() {
    let stack = test_stack().await;
    let workspace = create_workspace(&stack.workspaces, EngineType::Playcanvas).await;

    let err = stack
        .supervisor
        .send_command(&workspace.id, "add a platform")
        .await
        .expect_err("no server yet");
    assert!(matches!(err, AppError::NotRunning(_)));

    stack
        .supervisor
        .start_server(&workspace.id)
        .await
        .expect("start");
    let response = stack
        .supervisor
        .send_command(&workspace.id, "add a platform")
        .await
        .expect("command");
    assert_eq!(response["success"], serde_json::json!(true));

    let log = stack.endpoint.command_log.lock().unwrap().clone();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].1, "add a platform");
}

#[tokio::test]
async fn send_command_surfaces_upstream_failures() {
    let stack = test_stack().await;
    let workspace = create_workspace(&stack.workspaces, EngineType::Playcanvas).await;
    stack
        .supervisor
        .start_server(&workspace.id)
        .await
        .expect("start");

    stack.endpoint.fail_command.store(true, Ordering::SeqCst);
    let err = stack
        .supervisor
        .send_command(&workspace.id, "boom")
        .await
        .expect_err("upstream failure");
    assert!(matches!(err, AppError::UpstreamError(_)));
    assert!(err.to_string().contains("mock failure body"));
}

#[tokio::test]
async fn server_status_reflects_pid_and_endpoint_health() {
    let stack = test_stack().await;
    let workspace = create_workspace(&stack.workspaces, EngineType::Playcanvas).await;

    let status = stack
        .supervisor
        .server_status(&workspace.id)
        .await
        .expect("status");
    assert_eq!(status, ServerStatus::Stopped);

    let binding = stack
        .supervisor
        .start_server(&workspace.id)
        .await
        .expect("start");
    let status = stack
        .supervisor
        .server_status(&workspace.id)
        .await
        .expect("status");
    assert_eq!(status, ServerStatus::Running);

    stack.endpoint.healthy.store(false, Ordering::SeqCst);
    let status = stack
        .supervisor
        .server_status(&workspace.id)
        .await
        .expect("status");
    assert_eq!(status, ServerStatus::Unhealthy);

    stack.runtime.mark_dead(binding.pid);
    let status = stack
        .supervisor
        .server_status(&workspace.id)
        .await
        .expect("status");
    assert_eq!(status, ServerStatus::Stopped);
}

#[tokio::test]
async fn restart_replaces_the_process() {
    let stack = test_stack().await;
    let workspace = create_workspace(&stack.workspaces, EngineType::Playcanvas).await;

    let first = stack
        .supervisor
        .start_server(&workspace.id)
        .await
        .expect("start");
    let second = stack
        .supervisor
        .restart_server(&workspace.id)
        .await
        .expect("restart");

    assert_ne!(first.pid, second.pid);
    assert_eq!(stack.runtime.spawn_count.load(Ordering::SeqCst), 2);
    assert!(!stack.runtime.alive_pids().contains(&first.pid));
}

#[tokio::test]
async fn auto_restart_exhausts_after_max_attempts_without_leaks() {
    let stack = test_stack_with(false, false).await;
    let workspace = create_workspace(&stack.workspaces, EngineType::Playcanvas).await;

    let err = stack
        .supervisor
        .auto_restart_server(&workspace.id, 3)
        .await
        .expect_err("every attempt fails");
    assert!(matches!(err, AppError::RestartExhausted(3)), "got: {err}");
    assert_eq!(err.to_string(), "restart exhausted after 3 attempts");
    assert_eq!(
        stack.runtime.spawn_count.load(Ordering::SeqCst),
        3,
        "one spawn per attempt"
    );
    assert!(
        stack.runtime.alive_pids().is_empty(),
        "no lingering process may survive exhaustion"
    );
}

#[tokio::test]
async fn health_check_reports_per_dimension_results() {
    let stack = test_stack().await;
    let workspace = create_workspace(&stack.workspaces, EngineType::Playcanvas).await;

    // Nothing running, workspace directory absent: every dimension fails.
    let report = stack
        .supervisor
        .perform_health_check(&workspace.id)
        .await
        .expect("report");
    assert_eq!(report.overall, OverallHealth::Unhealthy);

    stack
        .supervisor
        .start_server(&workspace.id)
        .await
        .expect("start");
    let dir = stack.config.workspace_dir(workspace.company_id, &workspace.id);
    std::fs::write(dir.join("package.json"), "{}").expect("seed required file");

    let report = stack
        .supervisor
        .perform_health_check(&workspace.id)
        .await
        .expect("report");
    assert_eq!(report.overall, OverallHealth::Healthy);

    // Endpoint down but process alive and files present: degraded.
    stack.endpoint.healthy.store(false, Ordering::SeqCst);
    let report = stack
        .supervisor
        .perform_health_check(&workspace.id)
        .await
        .expect("report");
    assert_eq!(report.overall, OverallHealth::Degraded);
}
