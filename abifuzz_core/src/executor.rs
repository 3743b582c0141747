use crate::abi::{AbiValue, AccountRef};
use crate::candidate::Candidate;
use crate::state::StateSnapshot;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Result of dispatching one candidate to the execution backend.
///
/// Coverage lines are opaque integers; the core only ever treats them as set
/// members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Accepted { coverage: Vec<u32> },
    Rejected,
    AssertionFailed,
}

/// Communication failures at the backend boundary. The control loop folds
/// these into the rejected-call count so transient backend hiccups never kill
/// a long campaign.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend I/O error: {0}")]
    Io(String),
    #[error("backend protocol error: {0}")]
    Protocol(String),
    #[error("backend call timed out")]
    Timeout,
    #[error("failed to spawn backend adapter: {0}")]
    Spawn(String),
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Protocol(err.to_string())
    }
}

/// Static facts the backend reports once, before the campaign starts.
#[derive(Debug, Clone)]
pub struct BackendInfo {
    /// Total number of program locations, for coverage percentages.
    pub line_count: usize,
    /// The externally managed pool of known accounts.
    pub accounts: Vec<AccountRef>,
}

/// Balance queries and top-ups for the currency-transfer mutator — the one
/// mutation strategy with an external side effect.
pub trait AccountFunder {
    fn spendable_balance(&mut self, account: &AccountRef) -> Result<u64, BackendError>;
    fn fund_if_low(&mut self, account: &AccountRef) -> Result<(), BackendError>;
}

/// The execution backend consumed by the control loop. Entirely a black box:
/// the core never interprets coverage lines or state keys, it only compares
/// them.
pub trait Backend: AccountFunder {
    fn info(&mut self) -> Result<BackendInfo, BackendError>;
    fn dispatch(&mut self, candidate: &Candidate) -> Result<Outcome, BackendError>;
    fn load_state(&mut self) -> Result<StateSnapshot, BackendError>;
}

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
enum WireRequest<'a> {
    Info,
    Dispatch {
        method: &'a str,
        sender: &'a AccountRef,
        args: &'a [AbiValue],
    },
    LoadState,
    Balance {
        account: &'a AccountRef,
    },
    Fund {
        account: &'a AccountRef,
    },
}

#[derive(Deserialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
enum DispatchReply {
    Accepted {
        #[serde(default)]
        coverage: Vec<u32>,
    },
    Rejected,
    AssertionFailed,
}

#[derive(Deserialize)]
struct InfoReply {
    line_count: usize,
    accounts: Vec<String>,
}

#[derive(Deserialize)]
struct BalanceReply {
    spendable: u64,
}

#[derive(Deserialize)]
struct FundReply {}

pub struct CommandBackendConfig {
    /// Adapter program and its fixed arguments. The adapter receives one JSON
    /// request on stdin and answers with one JSON document on stdout.
    pub command: Vec<String>,
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
}

/// A `Backend` that shells out to a user-supplied adapter process per
/// request. The adapter owns everything runtime-specific: submitting the
/// call, collecting the execution trace, and reading program state back.
pub struct CommandBackend {
    config: CommandBackendConfig,
}

impl CommandBackend {
    pub fn new(config: CommandBackendConfig) -> Self {
        Self { config }
    }

    fn send<T: DeserializeOwned>(&self, request: &WireRequest<'_>) -> Result<T, BackendError> {
        let output = self.roundtrip(request)?;
        Ok(serde_json::from_slice(&output)?)
    }

    fn roundtrip(&self, request: &WireRequest<'_>) -> Result<Vec<u8>, BackendError> {
        if self.config.command.is_empty() {
            return Err(BackendError::Spawn("empty adapter command".to_string()));
        }
        let mut cmd = Command::new(&self.config.command[0]);
        if self.config.command.len() > 1 {
            cmd.args(&self.config.command[1..]);
        }
        if let Some(cwd) = &self.config.working_dir {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());

        let mut child = cmd
            .spawn()
            .map_err(|e| BackendError::Spawn(format!("{:?}: {e}", self.config.command)))?;

        let request_bytes = serde_json::to_vec(request)?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&request_bytes)?;
            // Dropping stdin closes the pipe so the adapter sees EOF.
        }

        // Drain stdout on its own thread: a reply larger than the OS pipe
        // buffer would otherwise block the adapter and trip the timeout.
        let reader = child.stdout.take().map(|mut stdout| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                stdout.read_to_end(&mut buf).map(|_| buf)
            })
        });

        let status = self.wait_with_timeout(&mut child, self.config.timeout)?;
        let output = match reader {
            Some(handle) => handle
                .join()
                .map_err(|_| BackendError::Io("stdout reader thread panicked".to_string()))??,
            None => Vec::new(),
        };
        if !status.success() {
            return Err(BackendError::Protocol(format!(
                "adapter exited with {status}"
            )));
        }
        Ok(output)
    }

    fn wait_with_timeout(
        &self,
        child: &mut Child,
        timeout: Duration,
    ) -> Result<std::process::ExitStatus, BackendError> {
        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    if start.elapsed() > timeout {
                        if let Err(e) = child.kill() {
                            return Err(BackendError::Io(format!(
                                "failed to kill timed-out adapter: {e}"
                            )));
                        }
                        let _ = child.wait();
                        return Err(BackendError::Timeout);
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => {
                    return Err(BackendError::Io(format!("error waiting for adapter: {e}")));
                }
            }
        }
    }
}

impl AccountFunder for CommandBackend {
    fn spendable_balance(&mut self, account: &AccountRef) -> Result<u64, BackendError> {
        let reply: BalanceReply = self.send(&WireRequest::Balance { account })?;
        Ok(reply.spendable)
    }

    fn fund_if_low(&mut self, account: &AccountRef) -> Result<(), BackendError> {
        let _: FundReply = self.send(&WireRequest::Fund { account })?;
        Ok(())
    }
}

impl Backend for CommandBackend {
    fn info(&mut self) -> Result<BackendInfo, BackendError> {
        let reply: InfoReply = self.send(&WireRequest::Info)?;
        Ok(BackendInfo {
            line_count: reply.line_count,
            accounts: reply.accounts.into_iter().map(AccountRef).collect(),
        })
    }

    fn dispatch(&mut self, candidate: &Candidate) -> Result<Outcome, BackendError> {
        let reply: DispatchReply = self.send(&WireRequest::Dispatch {
            method: &candidate.method,
            sender: &candidate.sender,
            args: &candidate.args,
        })?;
        Ok(match reply {
            DispatchReply::Accepted { coverage } => Outcome::Accepted { coverage },
            DispatchReply::Rejected => Outcome::Rejected,
            DispatchReply::AssertionFailed => Outcome::AssertionFailed,
        })
    }

    fn load_state(&mut self) -> Result<StateSnapshot, BackendError> {
        self.send(&WireRequest::LoadState)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell_backend(script: &str, timeout_ms: u64) -> CommandBackend {
        CommandBackend::new(CommandBackendConfig {
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            timeout: Duration::from_millis(timeout_ms),
            working_dir: None,
        })
    }

    #[test]
    fn info_round_trips_through_an_adapter_process() {
        let mut backend = shell_backend(
            r#"cat > /dev/null; printf '{"line_count": 42, "accounts": ["A1", "A2"]}'"#,
            2000,
        );
        let info = backend.info().unwrap();
        assert_eq!(info.line_count, 42);
        assert_eq!(
            info.accounts,
            vec![AccountRef("A1".to_string()), AccountRef("A2".to_string())]
        );
    }

    #[test]
    fn dispatch_parses_all_three_outcomes() {
        let mut backend = shell_backend(
            r#"cat > /dev/null; printf '{"result": "accepted", "coverage": [3, 1, 2]}'"#,
            2000,
        );
        let candidate = Candidate::new(
            "m",
            vec![AbiValue::Uint(1)],
            AccountRef("A1".to_string()),
        );
        assert_eq!(
            backend.dispatch(&candidate).unwrap(),
            Outcome::Accepted {
                coverage: vec![3, 1, 2]
            }
        );

        let mut rejected = shell_backend(r#"cat > /dev/null; printf '{"result": "rejected"}'"#, 2000);
        assert_eq!(rejected.dispatch(&candidate).unwrap(), Outcome::Rejected);

        let mut failed = shell_backend(
            r#"cat > /dev/null; printf '{"result": "assertion-failed"}'"#,
            2000,
        );
        assert_eq!(failed.dispatch(&candidate).unwrap(), Outcome::AssertionFailed);
    }

    #[test]
    fn replies_larger_than_the_pipe_buffer_still_arrive() {
        // 200 KB of leading whitespace overflows the OS pipe buffer, so the
        // adapter can only finish if stdout is drained while it runs.
        let mut backend = shell_backend(
            r#"cat > /dev/null; head -c 200000 /dev/zero | tr '\0' ' '; printf '{"line_count": 7, "accounts": ["A1"]}'"#,
            2000,
        );
        let info = backend.info().unwrap();
        assert_eq!(info.line_count, 7);
        assert_eq!(info.accounts, vec![AccountRef("A1".to_string())]);
    }

    #[test]
    fn hung_adapter_times_out() {
        let mut backend = shell_backend("cat > /dev/null; sleep 30", 100);
        match backend.load_state() {
            Err(BackendError::Timeout) => {}
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[test]
    fn adapter_failure_is_a_protocol_error() {
        let mut backend = shell_backend("cat > /dev/null; exit 3", 2000);
        match backend.load_state() {
            Err(BackendError::Protocol(msg)) => assert!(msg.contains("exited")),
            other => panic!("expected Protocol error, got {other:?}"),
        }
    }

    #[test]
    fn garbage_output_is_a_protocol_error() {
        let mut backend = shell_backend(r#"cat > /dev/null; printf 'not json'"#, 2000);
        match backend.info() {
            Err(BackendError::Protocol(_)) => {}
            other => panic!("expected Protocol error, got {other:?}"),
        }
    }
}
