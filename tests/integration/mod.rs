mod detached_tests;
#[cfg(unix)]
mod fake_interpreter_tests;
