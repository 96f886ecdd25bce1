//! Scripted [`CommandRunner`] for exercising orchestration without real processes

use crate::error::{CloudError, Result};
use crate::runner::{CommandOutput, CommandRunner, CommandSpec};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Canned reply for a scripted command
#[derive(Debug, Clone)]
pub enum Reply {
    /// Exit 0 with the given stdout
    Ok(String),
    /// Nonzero exit with the given stderr
    Fail { exit_code: i32, stderr: String },
    /// The runner's deadline fired
    Timeout,
    /// The process could not be started
    SpawnError(String),
    /// Exit 0 with empty output after a delay
    Slow(Duration),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Ok(String::new())
    }

    pub fn stdout(stdout: impl Into<String>) -> Self {
        Reply::Ok(stdout.into())
    }

    pub fn fail(stderr: impl Into<String>) -> Self {
        Reply::Fail {
            exit_code: 1,
            stderr: stderr.into(),
        }
    }
}

#[derive(Debug)]
struct Script {
    pattern: String,
    replies: VecDeque<Reply>,
}

/// Replies to commands whose command line contains a pattern.
///
/// Scripts are matched in registration order. Each script replays its
/// replies in order and keeps repeating the last one. Unmatched commands
/// succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    scripts: Mutex<Vec<Script>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, pattern: impl Into<String>, replies: Vec<Reply>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push(Script {
                pattern: pattern.into(),
                replies: replies.into(),
            });
        }
        self
    }

    /// Every command seen so far, in order
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of commands whose command line contains `pattern`
    pub fn count(&self, pattern: &str) -> usize {
        self.calls()
            .iter()
            .filter(|spec| spec.display().contains(pattern))
            .count()
    }

    fn next_reply(&self, line: &str) -> Option<Reply> {
        let mut scripts = self.scripts.lock().ok()?;
        let script = scripts.iter_mut().find(|s| line.contains(s.pattern.as_str()))?;
        if script.replies.len() > 1 {
            script.replies.pop_front()
        } else {
            script.replies.front().cloned()
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(spec.clone());
        }

        match self.next_reply(&spec.display()).unwrap_or_else(Reply::ok) {
            Reply::Ok(stdout) => Ok(CommandOutput {
                stdout,
                stderr: String::new(),
                exit_code: Some(0),
            }),
            Reply::Fail { exit_code, stderr } => Ok(CommandOutput {
                stdout: String::new(),
                stderr,
                exit_code: Some(exit_code),
            }),
            Reply::Timeout => Err(CloudError::ExecutionTimeout {
                command: spec.display(),
                timeout_secs: spec.timeout.as_secs(),
            }),
            Reply::SpawnError(message) => Err(CloudError::ProcessError {
                command: spec.display(),
                message,
            }),
            Reply::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(CommandOutput {
                    exit_code: Some(0),
                    ..CommandOutput::default()
                })
            }
        }
    }
}
