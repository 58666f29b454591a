use playhost::AppError;

#[test]
fn display_includes_variant_context() {
    let cases = [
        (
            AppError::Config("bad toml".into()),
            "config: bad toml",
        ),
        (AppError::Db("locked".into()), "db: locked"),
        (
            AppError::UnsupportedEngine("unreal".into()),
            "unsupported engine: unreal",
        ),
        (
            AppError::ResourceExhausted("no free port".into()),
            "resource exhausted: no free port",
        ),
        (
            AppError::StartFailed("timeout".into()),
            "start failed: timeout",
        ),
        (
            AppError::NotRunning("no server".into()),
            "not running: no server",
        ),
        (
            AppError::UpstreamError("500".into()),
            "upstream error: 500",
        ),
        (
            AppError::SessionStartFailed("quota".into()),
            "session start failed: quota",
        ),
        (AppError::Scheduler("down".into()), "scheduler: down"),
        (AppError::Storage("enoent".into()), "storage: enoent"),
        (AppError::Cache("403".into()), "cache: 403"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn restart_exhausted_names_attempt_count() {
    let err = AppError::RestartExhausted(3);
    assert_eq!(err.to_string(), "restart exhausted after 3 attempts");
}

#[test]
fn sqlx_errors_map_to_db() {
    let err: AppError = sqlx::Error::RowNotFound.into();
    assert!(matches!(err, AppError::Db(_)));
}
