//! Detached execution: fire-and-forget children that delete their own script

use crate::common::{wait_for, TestSandbox};
use assert_matches::assert_matches;
use phpbox_sandbox::{DetachedRun, Variables, SELF_DESTRUCT_DIRECTIVE};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_run_in_background() {
    let Some(sandbox) = TestSandbox::new() else { return };
    let write_dir = sandbox.scratch_dir();

    let php = r#"
$index = (int) $_SERVER['index'];
$writeDir = trim($_SERVER['writeDir']);

$filename = $writeDir . DIRECTORY_SEPARATOR . "background_$index.txt";

file_put_contents($filename, (string) $index);
"#;

    for index in 0..10 {
        let vars: Variables = [
            ("index".to_string(), index.to_string()),
            ("writeDir".to_string(), write_dir.display().to_string()),
        ]
        .into_iter()
        .collect();

        let run = sandbox.engine.run_detached(php, &vars, false).await.unwrap();
        assert_matches!(run, DetachedRun::Launched { .. });
    }

    let all_written = wait_for(TIMEOUT, || {
        (0..10).all(|index| write_dir.join(format!("background_{}.txt", index)).exists())
    })
    .await;
    assert!(all_written, "Unable to verify background file creation in {:?}", TIMEOUT);

    for index in 0..10 {
        let content = std::fs::read_to_string(write_dir.join(format!("background_{}.txt", index)));
        assert_eq!(content.unwrap(), index.to_string());
    }

    // each child removes its own script
    assert!(wait_for(TIMEOUT, || sandbox.is_empty()).await);
    sandbox.assert_empty();
}

#[tokio::test]
async fn test_prepared_unit_self_destructs() {
    let Some(sandbox) = TestSandbox::new() else { return };

    let cases = [
        ("$x = null;", format!("<?php $x = null; {}", SELF_DESTRUCT_DIRECTIVE)),
        ("<?php $x = null;", format!("<?php $x = null; {}", SELF_DESTRUCT_DIRECTIVE)),
        ("<?php $x = null; ?>", format!("<?php $x = null; {} ?>", SELF_DESTRUCT_DIRECTIVE)),
    ];

    for (code, expected) in cases {
        sandbox.engine.run_detached(code, &Variables::new(), false).await.unwrap();
        assert_eq!(sandbox.engine.last_prepared().unwrap().as_str(), expected);
    }

    assert!(wait_for(TIMEOUT, || sandbox.is_empty()).await);
}

#[tokio::test]
async fn test_debug_waits_for_child() {
    let Some(sandbox) = TestSandbox::new() else { return };
    let marker = sandbox.scratch_dir().join("done.txt");

    let vars: Variables = [("marker".to_string(), marker.display().to_string())]
        .into_iter()
        .collect();
    let run = sandbox
        .engine
        .run_detached("file_put_contents($_SERVER['marker'], 'done');", &vars, true)
        .await
        .unwrap();

    assert_matches!(run, DetachedRun::Completed { exit_code: Some(0), .. });
    assert!(run.success());
    // no polling: the child has already finished
    assert_eq!(std::fs::read_to_string(&marker).unwrap(), "done");
    sandbox.assert_empty();
}

#[tokio::test]
async fn test_debug_failure_still_cleans_up() {
    let Some(sandbox) = TestSandbox::new() else { return };

    // the fatal error stops the script before it can delete itself
    let run = sandbox
        .engine
        .run_detached("call_to_undefined_function();", &Variables::new(), true)
        .await
        .unwrap();

    assert_matches!(run, DetachedRun::Completed { exit_code: Some(code), .. } if code != 0);
    assert!(!run.success());
    sandbox.assert_empty();
}
