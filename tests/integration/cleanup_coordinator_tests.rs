use std::sync::atomic::Ordering;

use playhost::models::workspace::{
    EngineType, META_BUILD_STORAGE_DISK, META_LATEST_BUILD_PATH,
};
use playhost::AppError;

use super::test_helpers::{create_workspace, insert_session, seed_file, test_stack, test_stack_with};

#[tokio::test]
async fn cleanup_releases_every_backend_and_deletes_the_row() {
    let stack = test_stack().await;
    let mut workspace = create_workspace(&stack.workspaces, EngineType::Playcanvas).await;

    // Build artifacts recorded on a different disk than the default one.
    workspace.metadata.insert(
        META_LATEST_BUILD_PATH.into(),
        serde_json::json!(format!("exports/{}/latest", workspace.id)),
    );
    workspace
        .metadata
        .insert(META_BUILD_STORAGE_DISK.into(), serde_json::json!("artifacts"));
    stack
        .workspaces
        .update_metadata(&workspace.id, &workspace.metadata)
        .await
        .expect("metadata");

    // One active session (task running) and one already stopped.
    let active = insert_session(&stack.sessions, &workspace.id, 40, Some("task-live")).await;
    let stopped = insert_session(&stack.sessions, &workspace.id, 40, None).await;
    stack
        .sessions
        .mark_stopped(&stopped.id)
        .await
        .expect("pre-stop");

    // A preview process is recorded on the workspace row.
    let binding = stack
        .supervisor
        .start_server(&workspace.id)
        .await
        .expect("start preview");

    // Storage spread across three prefixes and two disks.
    seed_file(
        &stack.config,
        "local",
        &format!("workspaces/7/{}/scene.json", workspace.id),
        "scene",
    );
    seed_file(
        &stack.config,
        "local",
        &format!("builds/7/{}/bundle.js", workspace.id),
        "bundle-bytes",
    );
    seed_file(
        &stack.config,
        "artifacts",
        &format!("exports/{}/latest/game.zip", workspace.id),
        "zip-bytes",
    );
    seed_file(
        &stack.config,
        "public",
        &format!("multiplayer/7/{}/{}/save.dat", workspace.id, active.id),
        "save",
    );

    // An orphaned remote task still tagged with the workspace id.
    stack
        .scheduler
        .tagged_tasks
        .lock()
        .unwrap()
        .insert(workspace.id.clone(), vec!["task-orphan".into()]);

    let workspace = stack.workspaces.get_by_id(&workspace.id).await.expect("reload");
    let outcome = stack.coordinator.cleanup_workspace(&workspace).await;

    assert!(outcome.success);
    assert_eq!(outcome.sessions_terminated, 1, "only the active session needed stopping");
    assert_eq!(outcome.files_cleaned, 4);
    assert_eq!(
        outcome.storage_freed_bytes,
        ("scene".len() + "bundle-bytes".len() + "zip-bytes".len() + "save".len()) as u64
    );
    // Per-session handle plus the tag-discovered orphan.
    assert_eq!(outcome.remote_tasks_stopped, 2);

    let mut stopped_handles = stack.scheduler.stopped_handles();
    stopped_handles.sort();
    assert_eq!(stopped_handles, vec!["task-live", "task-orphan"]);

    assert!(
        !stack.runtime.alive_pids().contains(&binding.pid),
        "preview process must be terminated"
    );

    // Rows are gone: sessions first, workspace last.
    assert!(stack
        .sessions
        .list_for_workspace(&workspace.id)
        .await
        .expect("list")
        .is_empty());
    let err = stack
        .workspaces
        .get_by_id(&workspace.id)
        .await
        .expect_err("row deleted");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn scheduler_outage_does_not_block_workspace_deletion() {
    let stack = test_stack().await;
    let workspace = create_workspace(&stack.workspaces, EngineType::Playcanvas).await;
    insert_session(&stack.sessions, &workspace.id, 40, Some("task-live")).await;
    stack.scheduler.hard_fail_stop.store(true, Ordering::SeqCst);

    let outcome = stack.coordinator.cleanup_workspace(&workspace).await;

    assert!(outcome.success, "cleanup must run to completion regardless");
    assert_eq!(
        outcome.sessions_terminated, 0,
        "only sessions whose stop call succeeded are counted"
    );
    assert_eq!(outcome.remote_tasks_stopped, 0);
    assert!(matches!(
        stack
            .workspaces
            .get_by_id(&workspace.id)
            .await
            .expect_err("row deleted"),
        AppError::NotFound(_)
    ));
}

#[tokio::test]
async fn cleanup_is_reentrant_and_reports_nothing_on_the_second_run() {
    let stack = test_stack().await;
    let workspace = create_workspace(&stack.workspaces, EngineType::Playcanvas).await;
    insert_session(&stack.sessions, &workspace.id, 40, Some("task-live")).await;
    seed_file(
        &stack.config,
        "local",
        &format!("workspaces/7/{}/scene.json", workspace.id),
        "scene",
    );

    let first = stack.coordinator.cleanup_workspace(&workspace).await;
    assert!(first.success);
    assert_eq!(first.sessions_terminated, 1);
    assert_eq!(first.files_cleaned, 1);

    let second = stack.coordinator.cleanup_workspace(&workspace).await;
    assert!(second.success, "re-running cleanup must not throw");
    assert_eq!(second.sessions_terminated, 0);
    assert_eq!(second.files_cleaned, 0);
    assert_eq!(second.storage_freed_bytes, 0);
    assert_eq!(second.remote_tasks_stopped, 0);
}

#[tokio::test]
async fn configured_cdn_receives_every_workspace_path_pattern() {
    let stack = test_stack_with(true, true).await;
    let workspace = create_workspace(&stack.workspaces, EngineType::Playcanvas).await;
    let session = insert_session(&stack.sessions, &workspace.id, 40, Some("task-live")).await;

    let outcome = stack.coordinator.cleanup_workspace(&workspace).await;
    assert!(outcome.success);

    // builds + workspaces + api, plus two per session.
    assert_eq!(outcome.cache_paths_cleaned, 5);
    let submitted = stack.cache.submitted.lock().unwrap().clone();
    assert_eq!(submitted.len(), 1);
    assert!(submitted[0]
        .iter()
        .any(|p| p == &format!("/api/workspace/{}/*", workspace.id)));
    assert!(submitted[0]
        .iter()
        .any(|p| p == &format!("/multiplayer/session/{}/*", session.id)));
}

#[tokio::test]
async fn unconfigured_cdn_reports_zero_paths() {
    let stack = test_stack().await;
    let workspace = create_workspace(&stack.workspaces, EngineType::Playcanvas).await;
    insert_session(&stack.sessions, &workspace.id, 40, None).await;

    let outcome = stack.coordinator.cleanup_workspace(&workspace).await;
    assert!(outcome.success);
    assert_eq!(outcome.cache_paths_cleaned, 0);
}

#[tokio::test]
async fn cdn_failure_reports_zero_paths_without_failing_cleanup() {
    let stack = test_stack_with(true, true).await;
    let workspace = create_workspace(&stack.workspaces, EngineType::Playcanvas).await;
    stack.cache.fail.store(true, Ordering::SeqCst);

    let outcome = stack.coordinator.cleanup_workspace(&workspace).await;
    assert!(outcome.success);
    assert_eq!(outcome.cache_paths_cleaned, 0);
}

#[tokio::test]
async fn cleanup_stats_count_old_workspaces_and_session_backlog() {
    let stack = test_stack().await;

    let mut old = playhost::models::workspace::Workspace::new(
        1,
        "old".into(),
        EngineType::Playcanvas,
    );
    old.created_at = chrono::Utc::now() - chrono::Duration::hours(48);
    stack.workspaces.create(&old).await.expect("create");
    let fresh = create_workspace(&stack.workspaces, EngineType::Unreal).await;

    insert_session(&stack.sessions, &old.id, 40, None).await;
    insert_session(&stack.sessions, &fresh.id, -5, None).await;

    let stats = stack.coordinator.get_cleanup_stats().await.expect("stats");
    assert_eq!(stats.total_workspaces, 2);
    assert_eq!(stats.old_workspaces, 1);
    assert_eq!(stats.active_sessions, 1);
    assert_eq!(stats.expired_sessions, 1);
}
