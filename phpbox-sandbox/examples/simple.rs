//! Simple sandbox example - run one snippet with each strategy
//!
//! Needs a PHP CLI binary: `PHPBOX_PHP_BINARY=/usr/bin/php cargo run --example simple`

use phpbox_sandbox::{DetachedRun, EngineConfig, ExecutionEngine, SandboxError, Variables};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let php = std::env::var("PHPBOX_PHP_BINARY").unwrap_or_else(|_| "php".to_string());
    let cache = std::env::temp_dir().join("phpbox-example");
    let engine = ExecutionEngine::new(EngineConfig::new(php, &cache));

    println!("=== PHP Sandbox Example ===\n");
    println!("Sandbox dir: {}\n", engine.sandbox_dir().display());

    // Example 1: Inline, state is shared between calls
    println!("Example 1: Inline");
    engine
        .run_inline("function greet($who) { return \"Hello, $who!\"; }", &Variables::new())
        .await?;
    let result = engine.run_inline("echo greet('sandbox');", &Variables::new()).await?;
    println!("  output: {}", result.output);

    // Example 2: Synchronous, variables arrive through the environment
    println!("\nExample 2: Synchronous");
    let vars: Variables = [("factor".to_string(), "7".to_string())].into_iter().collect();
    let result = engine
        .run_synchronous("echo 6 * (int) $_SERVER['factor'];", &vars)
        .await?;
    println!("  output: {} ({}ms)", result.output, result.duration_ms);

    // Example 3: Diagnostics become typed errors
    println!("\nExample 3: Warning");
    match engine
        .run_synchronous("include('missing.php');", &Variables::new())
        .await
    {
        Err(SandboxError::Warning(record)) => println!("  warning: {}", record.message),
        other => println!("  unexpected: {:?}", other.map(|r| r.output)),
    }

    // Example 4: Detached, waiting only because this is a demo
    println!("\nExample 4: Detached");
    match engine
        .run_detached("file_put_contents('php://stderr', \"background\\n\");", &Variables::new(), true)
        .await?
    {
        DetachedRun::Completed { exit_code, .. } => println!("  exit code: {:?}", exit_code),
        DetachedRun::Launched { pid, .. } => println!("  launched: {:?}", pid),
    }

    Ok(())
}
