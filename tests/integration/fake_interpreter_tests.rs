//! Engine behaviour against shell scripts standing in for the interpreter,
//! so these run whether or not PHP is installed

use crate::common::{wait_for, TestSandbox};
use assert_matches::assert_matches;
use phpbox_sandbox::{
    DetachedRun, PatternClassifier, SandboxError, Severity, Variables, CODE_EXTENSION,
};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(10);

/// Answers each request with the requested path as its output. `mode=slow`
/// delays the answer, `mode=stray` prints outside the reply first.
const SESSION: &str = r#"#!/bin/sh
while IFS= read -r line; do
  case "$line" in
    *'"mode":"slow"'*) sleep 1 ;;
    *'"mode":"stray"'*) printf 'stray ' ;;
  esac
  path=$(printf '%s' "$line" | sed 's/^{"path":"\([^"]*\)".*/\1/')
  printf '\n\036phpbox-reply:{"output":"%s","fault":null,"terminated":false}\n' "$path"
done
"#;

fn vars(pairs: &[(&str, &str)]) -> Variables {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

#[tokio::test]
async fn test_synchronous_feeds_unit_on_stdin() {
    let sandbox = TestSandbox::with_fake_interpreter("#!/bin/sh\ncat\n");

    let result = sandbox
        .engine
        .run_synchronous("echo 1;", &Variables::new())
        .await
        .unwrap();

    assert_eq!(result.output, result.prepared.as_str());
    assert_eq!(result.exit_code, Some(0));
    sandbox.assert_empty();
}

#[tokio::test]
async fn test_synchronous_exit_status_keeps_output() {
    let sandbox = TestSandbox::with_fake_interpreter(
        "#!/bin/sh\ncat >/dev/null\nprintf 'partial output'\nexit 3\n",
    );

    let result = sandbox
        .engine
        .run_synchronous("exit(3);", &Variables::new())
        .await
        .unwrap();

    assert_eq!(result.output, "partial output");
    assert_eq!(result.exit_code, Some(3));
    sandbox.assert_empty();
}

#[tokio::test]
async fn test_synchronous_killed_interpreter_is_fatal() {
    let sandbox = TestSandbox::with_fake_interpreter("#!/bin/sh\ncat >/dev/null\nkill -9 $$\n");

    let err = sandbox
        .engine
        .run_synchronous("echo 1;", &Variables::new())
        .await
        .unwrap_err();

    assert_matches!(err, SandboxError::FatalError(ref record) => {
        assert!(record.message.contains("signal"));
    });
    sandbox.assert_empty();
}

#[tokio::test]
async fn test_synchronous_log_is_classified() {
    let sandbox = TestSandbox::with_fake_interpreter(
        "#!/bin/sh\ncat >/dev/null\necho 'PHP Warning:  disk is full in x.php on line 1' >&2\n",
    );

    let err = sandbox
        .engine
        .run_synchronous("echo 1;", &Variables::new())
        .await
        .unwrap_err();

    assert_matches!(err, SandboxError::Warning(ref record) => {
        assert!(record.message.contains("disk is full"));
    });
    sandbox.assert_empty();
}

#[tokio::test]
async fn test_custom_classifier_is_used() {
    let script = "#!/bin/sh\ncat >/dev/null\necho 'WARN low disk' >&2\n";

    // unknown text is fatal under the built-in rules
    let sandbox = TestSandbox::with_fake_interpreter(script);
    let err = sandbox
        .engine
        .run_synchronous("echo 1;", &Variables::new())
        .await
        .unwrap_err();
    assert_matches!(err, SandboxError::FatalError(_));

    let mut sandbox = TestSandbox::with_fake_interpreter(script);
    sandbox.engine = sandbox
        .engine
        .with_classifier(PatternClassifier::new([(Severity::Warning, r"^WARN")]).unwrap());
    let err = sandbox
        .engine
        .run_synchronous("echo 1;", &Variables::new())
        .await
        .unwrap_err();

    assert_matches!(err, SandboxError::Warning(ref record) => {
        assert_eq!(record.raw.trim(), "WARN low disk");
    });
    sandbox.assert_empty();
}

#[tokio::test]
async fn test_detached_child_removes_its_script() {
    // the artifact path is the last argument
    let sandbox = TestSandbox::with_fake_interpreter(
        "#!/bin/sh\nfor last; do :; done\nprintf done > \"$MARKER\"\nrm -f \"$last\"\n",
    );
    let marker = sandbox.scratch_dir().join("done.txt");
    let marker_path = marker.display().to_string();

    let run = sandbox
        .engine
        .run_detached("echo 1;", &vars(&[("MARKER", marker_path.as_str())]), false)
        .await
        .unwrap();
    assert_matches!(run, DetachedRun::Launched { .. });

    assert!(wait_for(TIMEOUT, || marker.exists()).await);
    assert!(wait_for(TIMEOUT, || sandbox.is_empty()).await);
}

#[tokio::test]
async fn test_detached_wait_reports_status_and_cleans_up() {
    let sandbox = TestSandbox::with_fake_interpreter("#!/bin/sh\nexit 4\n");

    let run = sandbox
        .engine
        .run_detached("echo 1;", &Variables::new(), true)
        .await
        .unwrap();

    assert_matches!(run, DetachedRun::Completed { exit_code: Some(4), .. });
    assert!(!run.success());
    sandbox.assert_empty();
}

#[tokio::test]
async fn test_inline_round_trip() {
    let sandbox = TestSandbox::with_fake_interpreter(SESSION);

    for _ in 0..3 {
        let result = sandbox
            .engine
            .run_inline("echo 1;", &Variables::new())
            .await
            .unwrap();
        assert!(result.output.ends_with(&result.token.file_name(CODE_EXTENSION)));
    }
    sandbox.assert_empty();
}

#[tokio::test]
async fn test_inline_recovers_from_dropped_call() {
    let sandbox = TestSandbox::with_fake_interpreter(SESSION);

    let dropped = tokio::time::timeout(
        Duration::from_millis(100),
        sandbox.engine.run_inline("echo 1;", &vars(&[("mode", "slow")])),
    )
    .await;
    assert!(dropped.is_err());

    // the answer to the dropped call must not be taken for this one
    let result = sandbox
        .engine
        .run_inline("echo 2;", &Variables::new())
        .await
        .unwrap();
    assert!(result.output.ends_with(&result.token.file_name(CODE_EXTENSION)));
    sandbox.assert_empty();
}

#[tokio::test]
async fn test_inline_keeps_output_printed_outside_reply() {
    let sandbox = TestSandbox::with_fake_interpreter(SESSION);

    let result = sandbox
        .engine
        .run_inline("ob_end_flush(); echo 1;", &vars(&[("mode", "stray")]))
        .await
        .unwrap();

    assert!(result.output.starts_with("stray "));
    assert!(result.output.ends_with(&result.token.file_name(CODE_EXTENSION)));

    // the session is still in step afterwards
    let result = sandbox
        .engine
        .run_inline("echo 2;", &Variables::new())
        .await
        .unwrap();
    assert!(result.output.ends_with(&result.token.file_name(CODE_EXTENSION)));
}
