//! Scripted [`CommandRunner`] for tests.
//!
//! Records every invocation and answers from rules matched on program name
//! and leading arguments. Unmatched commands succeed with empty output.
//!
//! ```
//! use fleet_sync::testing::ScriptedRunner;
//!
//! let runner = ScriptedRunner::new()
//!     .once_fail("docker", &["service", "inspect"], 1, "Error: no such service: apps_blog")
//!     .on_stdout("git", &["rev-parse", "HEAD"], "0123abcd\n");
//! ```

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::ProcessError;
use crate::process::{CommandRunner, Invocation, ProcessOutput};

#[derive(Debug, Clone)]
enum Reply {
    Output(ProcessOutput),
    Timeout,
}

#[derive(Debug, Clone)]
struct Rule {
    program: String,
    prefix: Vec<String>,
    reply: Reply,
    /// `None` = unlimited.
    remaining: Option<usize>,
}

impl Rule {
    fn matches(&self, inv: &Invocation) -> bool {
        self.remaining != Some(0)
            && self.program == inv.program
            && inv.args.len() >= self.prefix.len()
            && self.prefix.iter().zip(&inv.args).all(|(want, got)| want == got)
    }
}

/// Test double that never spawns processes.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, program: &str, prefix: &[&str], reply: Reply, remaining: Option<usize>) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                program: program.to_string(),
                prefix: prefix.iter().map(|s| s.to_string()).collect(),
                reply,
                remaining,
            });
        }
        self
    }

    /// Always answer matching commands with `stdout` and exit 0.
    pub fn on_stdout(self, program: &str, prefix: &[&str], stdout: &str) -> Self {
        let output = ProcessOutput {
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        };
        self.push(program, prefix, Reply::Output(output), None)
    }

    /// Always fail matching commands.
    pub fn on_fail(self, program: &str, prefix: &[&str], code: i32, stderr: &str) -> Self {
        self.push(program, prefix, Reply::Output(failure(code, stderr)), None)
    }

    /// Fail the next matching command only.
    pub fn once_fail(self, program: &str, prefix: &[&str], code: i32, stderr: &str) -> Self {
        self.push(program, prefix, Reply::Output(failure(code, stderr)), Some(1))
    }

    /// Make matching commands time out.
    pub fn on_timeout(self, program: &str, prefix: &[&str]) -> Self {
        self.push(program, prefix, Reply::Timeout, None)
    }

    /// Every invocation seen so far, in order.
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Rendered command lines, in order.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(Invocation::command_line).collect()
    }

    /// Number of invocations whose command line starts with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.command_lines()
            .iter()
            .filter(|line| line.starts_with(prefix))
            .count()
    }
}

fn failure(code: i32, stderr: &str) -> ProcessOutput {
    ProcessOutput {
        code: Some(code),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(invocation.clone());
        }

        let reply = match self.rules.lock() {
            Ok(mut rules) => rules.iter_mut().find(|r| r.matches(invocation)).map(|rule| {
                if let Some(n) = rule.remaining.as_mut() {
                    *n -= 1;
                }
                rule.reply.clone()
            }),
            Err(_) => None,
        };

        match reply {
            Some(Reply::Output(output)) => Ok(output),
            Some(Reply::Timeout) => Err(ProcessError::Timeout {
                command: invocation.command_line(),
                after: invocation.timeout,
            }),
            None => Ok(ProcessOutput {
                code: Some(0),
                ..Default::default()
            }),
        }
    }
}
