use std::time::Duration;

use comms::{HttpRouter, Router, RouterErr, Run, Status};

#[test]
fn decode_active_runs_listing() {
    let json = r#"[
        {"id": 1, "site_uid": "a", "role": "coordinator", "status": 3, "batch": 1,
         "project": 4, "cur_seq": 1, "tasks": [{"model": "LinearRegression",
         "config": {"total_round": 1, "current_round": 1}}]},
        {"id": 2, "site_uid": "b", "role": "participant", "status": "Running", "batch": 1,
         "project": 4, "cur_seq": 1, "tasks": [{"model": "LinearRegression",
         "config": {"total_round": 1, "current_round": 1}}]}
    ]"#;

    let runs: Vec<Run> = serde_json::from_str(json).unwrap();

    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].status, Status::Preparing);
    assert_eq!(runs[1].status, Status::Running);
    assert!(runs.iter().all(|run| run.check().is_ok() && run.is_last_round()));
}

#[test]
fn reject_unknown_status_names() {
    let json = r#"{"id": 1, "site_uid": "a", "role": "participant", "status": "Paused",
                   "batch": 1, "project": 4, "cur_seq": 1, "tasks": []}"#;

    assert!(serde_json::from_str::<Run>(json).is_err());
}

#[tokio::test]
async fn unreachable_router_is_a_transient_error() {
    // Nothing listens on port 9 locally, the connection is refused right away.
    let router = HttpRouter::new("http://127.0.0.1:9", Duration::from_millis(500), 1).unwrap();

    let err = router.active_runs().await.unwrap_err();

    assert!(matches!(err, RouterErr::Transport(_)));
    assert!(err.is_transient());
}
