// Scripted `ProcessInvoker` for tests.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::Mutex;
use std::time::Duration;

use super::systemd::{InvokeError, ProcessInvoker};

#[derive(Clone)]
enum Reply {
    Exit { code: i32, delay: Duration },
    SpawnFailure,
}

/// Replies are keyed by `systemctl` verb and unit name (without `.service`).
/// Unscripted calls exit with status 4, systemd's "no such unit".
#[derive(Default)]
pub struct FakeInvoker {
    replies: HashMap<(String, String), Reply>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_code(self, verb: &str, name: &str, code: i32) -> Self {
        self.with_delayed_code(verb, name, code, Duration::ZERO)
    }

    pub fn with_delayed_code(mut self, verb: &str, name: &str, code: i32, delay: Duration) -> Self {
        self.replies
            .insert((verb.to_string(), name.to_string()), Reply::Exit { code, delay });
        self
    }

    pub fn with_spawn_failure(mut self, verb: &str, name: &str) -> Self {
        self.replies
            .insert((verb.to_string(), name.to_string()), Reply::SpawnFailure);
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

impl ProcessInvoker for FakeInvoker {
    fn run(
        &self,
        program: &str,
        args: &[String],
        accept: &[i32],
    ) -> impl Future<Output = Result<i32, InvokeError>> + Send {
        self.calls.lock().unwrap().push(args.to_vec());

        let mut rest = args.iter().filter(|arg| arg.as_str() != "--user");
        let verb = rest.next().cloned().unwrap_or_default();
        let unit = rest.next().cloned().unwrap_or_default();
        let name = unit.strip_suffix(".service").unwrap_or(&unit).to_string();
        let reply = self
            .replies
            .get(&(verb, name))
            .cloned()
            .unwrap_or(Reply::Exit {
                code: 4,
                delay: Duration::ZERO,
            });
        let program = program.to_string();
        let accept = accept.to_vec();

        async move {
            match reply {
                Reply::SpawnFailure => Err(InvokeError::Spawn {
                    program,
                    source: io::Error::from(io::ErrorKind::NotFound),
                }),
                Reply::Exit { code, delay } => {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    if accept.contains(&code) {
                        Ok(code)
                    } else {
                        Err(InvokeError::Status {
                            program,
                            code: Some(code),
                        })
                    }
                }
            }
        }
    }
}
