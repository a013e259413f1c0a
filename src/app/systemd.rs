// Handles all interactions with the `systemctl` command.

use std::future::Future;
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use super::model::{Scope, unit_file_name};

pub const SYSTEMCTL: &str = "systemctl";

/// Default timeout for a single `systemctl` invocation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// `systemctl status` exit code for a unit that is loaded but not running.
const STATUS_NOT_RUNNING: i32 = 3;

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} timed out after {}s", .timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },
    #[error("{program} exited with {}", describe_code(.code))]
    Status { program: String, code: Option<i32> },
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

/// Runs external commands and reports only how they exited.
///
/// Output is discarded. A run succeeds when the exit code is one of `accept`;
/// every other outcome, including failure to spawn, is an [`InvokeError`].
/// Dropping the returned future must terminate the child.
pub trait ProcessInvoker: Send + Sync + 'static {
    fn run(
        &self,
        program: &str,
        args: &[String],
        accept: &[i32],
    ) -> impl Future<Output = Result<i32, InvokeError>> + Send;
}

/// Production invoker backed by `tokio::process`.
pub struct TokioInvoker {
    timeout: Duration,
}

impl TokioInvoker {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TokioInvoker {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl ProcessInvoker for TokioInvoker {
    fn run(
        &self,
        program: &str,
        args: &[String],
        accept: &[i32],
    ) -> impl Future<Output = Result<i32, InvokeError>> + Send {
        let timeout = self.timeout;
        async move {
            let mut child = tokio::process::Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .map_err(|source| InvokeError::Spawn {
                    program: program.to_string(),
                    source,
                })?;

            let status = match tokio::time::timeout(timeout, child.wait()).await {
                Ok(status) => status.map_err(|source| InvokeError::Wait {
                    program: program.to_string(),
                    source,
                })?,
                Err(_) => {
                    let _ = child.kill().await;
                    return Err(InvokeError::TimedOut {
                        program: program.to_string(),
                        timeout,
                    });
                }
            };

            match status.code() {
                Some(code) if accept.contains(&code) => Ok(code),
                code => Err(InvokeError::Status {
                    program: program.to_string(),
                    code,
                }),
            }
        }
    }
}

pub enum ServiceAction {
    Start,
    Stop,
}

impl ServiceAction {
    pub fn for_state(active: bool) -> Self {
        if active {
            ServiceAction::Start
        } else {
            ServiceAction::Stop
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
        }
    }
}

/// Builds `[--user] <verb> <name>.service`.
pub fn systemctl_args(verb: &str, name: &str, scope: Scope) -> Vec<String> {
    let mut args = Vec::with_capacity(3);
    if scope == Scope::User {
        args.push("--user".to_string());
    }
    args.push(verb.to_string());
    args.push(unit_file_name(name));
    args
}

/// Outcome of the add-flow existence check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Existence {
    Found,
    NotFound,
    /// The check itself could not run; carries the diagnostic.
    ProbeFailed(String),
}

impl Existence {
    pub fn is_found(&self) -> bool {
        matches!(self, Existence::Found)
    }
}

/// Answers state questions about units. Never retries.
pub struct StateProber<I> {
    invoker: Arc<I>,
}

impl<I> Clone for StateProber<I> {
    fn clone(&self) -> Self {
        Self {
            invoker: Arc::clone(&self.invoker),
        }
    }
}

impl<I: ProcessInvoker> StateProber<I> {
    pub fn new(invoker: Arc<I>) -> Self {
        Self { invoker }
    }

    /// `systemctl is-active`: exit 0 means active, anything else does not.
    pub async fn is_active(&self, name: &str, scope: Scope) -> bool {
        let args = systemctl_args("is-active", name, scope);
        match self.invoker.run(SYSTEMCTL, &args, &[0]).await {
            Ok(_) => true,
            Err(err) => {
                debug!(unit = name, %scope, error = %err, "unit reported inactive");
                false
            }
        }
    }

    /// `systemctl status`: exit 0 or 3 means the unit exists.
    pub async fn exists(&self, name: &str, scope: Scope) -> Existence {
        let args = systemctl_args("status", name, scope);
        match self
            .invoker
            .run(SYSTEMCTL, &args, &[0, STATUS_NOT_RUNNING])
            .await
        {
            Ok(_) => Existence::Found,
            Err(InvokeError::Status { .. }) => Existence::NotFound,
            Err(err) => Existence::ProbeFailed(err.to_string()),
        }
    }
}

/// Starts and stops units. Does not touch any cached state.
pub struct ActionExecutor<I> {
    invoker: Arc<I>,
}

impl<I: ProcessInvoker> ActionExecutor<I> {
    pub fn new(invoker: Arc<I>) -> Self {
        Self { invoker }
    }

    pub async fn set_active(
        &self,
        name: &str,
        scope: Scope,
        desired: bool,
    ) -> Result<(), InvokeError> {
        let action = ServiceAction::for_state(desired);
        let args = systemctl_args(action.verb(), name, scope);
        self.invoker.run(SYSTEMCTL, &args, &[0]).await.map(|_| ())
    }
}
