//! Command scorer tests using throwaway shell scripts
#![cfg(unix)]

use refract_candidate::{ArtifactRef, Score};
use refract_oracle::{CommandScorer, OracleError, RetryPolicy, ScoreMode, ScoringOracle};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[tokio::test]
async fn scores_from_script_output() {
    let dir = tempfile::tempdir().unwrap();
    let scorer = script(
        dir.path(),
        "score.sh",
        r#"echo "loading"; echo '{"clip_score": 0.8, "aesthetic_score": 6.0}'"#,
    );

    let raw = CommandScorer::new(scorer)
        .score(&ArtifactRef::new("/tmp/x.png"), "a prompt", ScoreMode::Both)
        .await
        .unwrap();
    let score = Score::combine(raw);
    assert!((score.total - 7.0).abs() < 1e-9);
}

#[tokio::test]
async fn passes_scoring_flags() {
    let dir = tempfile::tempdir().unwrap();
    let scorer = script(
        dir.path(),
        "flags.sh",
        r#"if [ "$1" = "--image" ] && [ "$3" = "--prompt" ] && [ "$5" = "--mode" ] && [ "$6" = "both" ]; then
  echo '{"clip_score": 1.0, "aesthetic_score": 1.0}'
else
  echo '{"clip_score": 0.0, "aesthetic_score": 0.0}'
fi"#,
    );

    let raw = CommandScorer::new(scorer)
        .score(&ArtifactRef::new("/tmp/x.png"), "two words", ScoreMode::Both)
        .await
        .unwrap();
    assert!((raw.alignment - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn failing_script_is_exhausted_after_retries() {
    let dir = tempfile::tempdir().unwrap();
    let scorer = script(dir.path(), "fail.sh", "echo boom >&2; exit 3");

    let err = CommandScorer::new(scorer)
        .with_retry(RetryPolicy::new(2, Duration::from_millis(5)))
        .score(&ArtifactRef::new("/tmp/x.png"), "p", ScoreMode::Both)
        .await
        .unwrap_err();

    match err {
        OracleError::Exhausted { attempts, last } => {
            assert_eq!(attempts, 2);
            assert!(matches!(*last, OracleError::Process { .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn missing_program_gives_up() {
    let err = CommandScorer::new("/no/such/scorer")
        .score(&ArtifactRef::new("/tmp/x.png"), "p", ScoreMode::Both)
        .await
        .unwrap_err();
    match err {
        OracleError::Exhausted { last, .. } => assert!(matches!(*last, OracleError::Io(_))),
        other => panic!("unexpected error: {other:?}"),
    }
}
