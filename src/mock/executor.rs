//! Scripted remote executor
//!
//! Commands are answered from rules matched by substring, first rule wins.
//! A rule holds a queue of replies; the last reply repeats once the others
//! are used up. Unmatched commands succeed with empty output.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use super::failure::{FailureConfig, FailureInjector, MockOp};
use crate::ports::{CommandOutput, ExecError, ExecutorFactory, RemoteExecutor};
use crate::resource::ExecSystem;

/// One scripted answer
#[derive(Debug, Clone)]
pub enum Reply {
    Output(CommandOutput),
    Fail(FailureConfig),
}

#[derive(Debug)]
struct Rule {
    pattern: String,
    replies: VecDeque<Reply>,
}

/// A file written through [`RemoteExecutor::put_file`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutFile {
    pub content: String,
    pub mode: u32,
}

#[derive(Debug, Default)]
struct ExecState {
    rules: Vec<Rule>,
    commands: Vec<String>,
    files: BTreeMap<String, PutFile>,
    failures: FailureInjector,
}

/// Remote executor answering from a script
#[derive(Debug)]
pub struct ScriptedExecutor {
    host: String,
    port: u16,
    user: String,
    state: Mutex<ExecState>,
}

impl ScriptedExecutor {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            state: Mutex::new(ExecState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ExecState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn push(&self, pattern: &str, reply: Reply) {
        let mut state = self.lock();
        match state.rules.iter_mut().find(|r| r.pattern == pattern) {
            Some(rule) => rule.replies.push_back(reply),
            None => state.rules.push(Rule {
                pattern: pattern.to_string(),
                replies: VecDeque::from([reply]),
            }),
        }
    }

    /// Queue a reply for commands containing `pattern`
    pub fn on(&self, pattern: &str, exit_code: i32, output: &str) {
        self.push(
            pattern,
            Reply::Output(CommandOutput {
                exit_code,
                output: output.to_string(),
            }),
        );
    }

    /// Queue a failure for commands containing `pattern`
    pub fn fail_on(&self, pattern: &str, failure: FailureConfig) {
        self.push(pattern, Reply::Fail(failure));
    }

    pub fn inject(&self, op: MockOp, config: FailureConfig) {
        self.lock().failures.inject(op, config);
    }

    /// Every command executed so far
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// Number of executed commands containing `pattern`
    pub fn count(&self, pattern: &str) -> usize {
        self.lock()
            .commands
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }

    pub fn file(&self, path: &str) -> Option<PutFile> {
        self.lock().files.get(path).cloned()
    }

    pub fn files(&self) -> BTreeMap<String, PutFile> {
        self.lock().files.clone()
    }
}

impl RemoteExecutor for ScriptedExecutor {
    fn execute(&self, command: &str) -> Result<CommandOutput, ExecError> {
        let mut state = self.lock();
        state.commands.push(command.to_string());

        if let Some(failure) = state.failures.check(MockOp::Execute) {
            return Err(failure.exec_error(&self.host, self.port, &self.user));
        }

        let reply = state
            .rules
            .iter_mut()
            .find(|r| command.contains(&r.pattern))
            .and_then(|rule| {
                if rule.replies.len() > 1 {
                    rule.replies.pop_front()
                } else {
                    rule.replies.front().cloned()
                }
            });

        match reply {
            Some(Reply::Output(output)) => Ok(output),
            Some(Reply::Fail(failure)) => {
                Err(failure.exec_error(&self.host, self.port, &self.user))
            }
            None => Ok(CommandOutput {
                exit_code: 0,
                output: String::new(),
            }),
        }
    }

    fn put_file(&self, path: &str, content: &[u8], mode: u32) -> Result<(), ExecError> {
        let mut state = self.lock();
        if let Some(failure) = state.failures.check(MockOp::PutFile) {
            return Err(failure.exec_error(&self.host, self.port, &self.user));
        }
        state.files.insert(
            path.to_string(),
            PutFile {
                content: String::from_utf8_lossy(content).into_owned(),
                mode,
            },
        );
        Ok(())
    }
}

/// Hands out one shared [`ScriptedExecutor`]
#[derive(Debug)]
pub struct MockExecutorFactory {
    executor: Arc<ScriptedExecutor>,
    failures: Mutex<FailureInjector>,
    connects: Mutex<u32>,
}

impl MockExecutorFactory {
    pub fn new(executor: Arc<ScriptedExecutor>) -> Self {
        Self {
            executor,
            failures: Mutex::new(FailureInjector::new()),
            connects: Mutex::new(0),
        }
    }

    pub fn executor(&self) -> Arc<ScriptedExecutor> {
        self.executor.clone()
    }

    /// Arm a failure for [`ExecutorFactory::connect`]
    pub fn inject_connect(&self, config: FailureConfig) {
        self.failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .inject(MockOp::Connect, config);
    }

    /// Successful and failed connection attempts
    pub fn connects(&self) -> u32 {
        *self.connects.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl ExecutorFactory for MockExecutorFactory {
    fn connect(&self, system: &ExecSystem) -> Result<Arc<dyn RemoteExecutor>, ExecError> {
        *self.connects.lock().unwrap_or_else(|p| p.into_inner()) += 1;

        let failure = self
            .failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .check(MockOp::Connect);
        if let Some(failure) = failure {
            return Err(failure.exec_error(&system.host, system.port, &system.effective_user));
        }

        Ok(self.executor.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobflow_recovery::SshFailureKind;

    #[test]
    fn test_reply_queue_last_repeats() {
        let exec = ScriptedExecutor::new("login", 22, "alice");
        exec.on("squeue", 0, "PENDING");
        exec.on("squeue", 0, "RUNNING");

        assert_eq!(exec.execute("squeue -j 1").unwrap().output, "PENDING");
        assert_eq!(exec.execute("squeue -j 1").unwrap().output, "RUNNING");
        assert_eq!(exec.execute("squeue -j 1").unwrap().output, "RUNNING");
        assert_eq!(exec.count("squeue"), 3);
    }

    #[test]
    fn test_unmatched_command_succeeds() {
        let exec = ScriptedExecutor::new("login", 22, "alice");
        let out = exec.execute("true").unwrap();
        assert!(out.success());
    }

    #[test]
    fn test_fail_then_succeed() {
        let exec = ScriptedExecutor::new("login", 22, "alice");
        exec.fail_on("sbatch", FailureConfig::ssh(SshFailureKind::Connection));
        exec.on("sbatch", 0, "Submitted batch job 7");

        match exec.execute("sbatch jobflow.sh") {
            Err(ExecError::Ssh(e)) => assert_eq!(e.kind, SshFailureKind::Connection),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            exec.execute("sbatch jobflow.sh").unwrap().output,
            "Submitted batch job 7"
        );
    }

    #[test]
    fn test_put_file_recorded() {
        let exec = ScriptedExecutor::new("login", 22, "alice");
        exec.put_file("jobs/1/jobflow.sh", b"#!/bin/bash\n", 0o700).unwrap();
        let file = exec.file("jobs/1/jobflow.sh").unwrap();
        assert_eq!(file.mode, 0o700);
        assert!(file.content.starts_with("#!/bin/bash"));
    }
}
