//! External tool execution.
//!
//! The live accessor drives `cpupower` through `CommandRunner`, so tests can
//! script its output with `MockRunner` instead of touching the CPU.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;
use std::process::Command;
use std::rc::Rc;

use tracing::debug;

pub trait CommandRunner {
    /// Stdout of `program args...`; on a non-zero exit, its combined output.
    fn run(&self, program: &Path, args: &[&str]) -> Result<String, String>;
}


/// Spawns the program directly, without a shell.
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, program: &Path, args: &[&str]) -> Result<String, String> {
        debug!(program = %program.display(), ?args, "running external command");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| format!("cannot execute {}: {}", program.display(), e))?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = format!("{}{}", stdout, stderr);
        let combined = combined.trim();
        if combined.is_empty() {
            Err(format!("{} exited with {}", program.display(), output.status))
        } else {
            Err(combined.to_string())
        }
    }
}


#[derive(Default)]
struct Script {
    responses: VecDeque<Result<String, String>>,
    calls: Vec<String>,
}


/// Scripted runner. Clones share one script, so a test can keep a handle
/// after boxing the runner into an accessor.
#[derive(Clone, Default)]
pub struct MockRunner {
    script: Rc<RefCell<Script>>,
}


impl MockRunner {
    pub fn new() -> Self {
        MockRunner::default()
    }

    /// Responses are handed out in order; once they run out, calls succeed
    /// with empty output.
    pub fn with_responses(responses: Vec<Result<String, String>>) -> Self {
        let runner = MockRunner::new();
        runner.script.borrow_mut().responses = responses.into();
        runner
    }

    /// Every call so far as `program arg arg ...`.
    pub fn calls(&self) -> Vec<String> {
        self.script.borrow().calls.clone()
    }
}


impl CommandRunner for MockRunner {
    fn run(&self, program: &Path, args: &[&str]) -> Result<String, String> {
        let mut script = self.script.borrow_mut();
        let mut line = program.display().to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        script.calls.push(line);
        script.responses.pop_front().unwrap_or_else(|| Ok(String::new()))
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_records_calls_through_clones() {
        let runner = MockRunner::new();
        let boxed: Box<dyn CommandRunner> = Box::new(runner.clone());
        boxed.run(Path::new("cpupower"), &["-c", "all", "info", "-b"]).unwrap();
        boxed.run(Path::new("cpupower"), &["-c", "0", "set", "-b", "0"]).unwrap();
        assert_eq!(
            runner.calls(),
            vec!["cpupower -c all info -b", "cpupower -c 0 set -b 0"]
        );
    }

    #[test]
    fn mock_hands_out_responses_in_order() {
        let runner = MockRunner::with_responses(vec![Ok("first".into()), Err("fail".into())]);
        let p = Path::new("x");
        assert_eq!(runner.run(p, &[]).unwrap(), "first");
        assert_eq!(runner.run(p, &[]).unwrap_err(), "fail");
        assert_eq!(runner.run(p, &[]).unwrap(), "");
    }

    #[test]
    fn process_runner_output_and_failure() {
        let sh = Path::new("/bin/sh");
        assert_eq!(ProcessRunner.run(sh, &["-c", "echo hosttune"]).unwrap().trim(), "hosttune");
        let err = ProcessRunner.run(sh, &["-c", "echo oops >&2; exit 3"]).unwrap_err();
        assert_eq!(err, "oops");
        let err = ProcessRunner.run(sh, &["-c", "exit 4"]).unwrap_err();
        assert!(err.contains("exited with"));
    }

    #[test]
    fn missing_program() {
        let err = ProcessRunner
            .run(Path::new("/nonexistent/hosttune-tool"), &[])
            .unwrap_err();
        assert!(err.starts_with("cannot execute"));
    }
}
