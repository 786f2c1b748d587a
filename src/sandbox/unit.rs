use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const STOP_SIGNAL: &str = "TERMINATE";

/// The single inbound message a unit produces: a decoupled error/result
/// pair, sent as a two-element JSON array. `error` is `None` on success.
#[derive(Debug)]
pub(crate) struct UnitReply {
    pub error: Option<Value>,
    pub result: Value,
}

#[derive(Debug)]
pub(crate) enum UnitOutcome {
    Completed(UnitReply),
    Cancelled,
}

/// One disposable child process serving exactly one request. The caller
/// seeds it, sends one command, and awaits one reply; the process is
/// killed on drop so no unit outlives its request.
pub(crate) struct ExecutionUnit {
    id: Uuid,
    child: Child,
    stdin: Option<ChildStdin>,
    replies: Receiver<UnitReply>,
}

impl ExecutionUnit {
    pub fn spawn(mut command: Command) -> Result<Self> {
        command.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = command.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Sandbox("Failed to open execution unit stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Sandbox("Failed to open execution unit stdout".into()))?;
        let stderr = child.stderr.take();

        let id = Uuid::new_v4();
        let (tx, rx) = std::sync::mpsc::channel();

        std::thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines().map_while(std::result::Result::ok) {
                let payload: Value = match serde_json::from_str(&line) {
                    Ok(value) => value,
                    Err(err) => {
                        log::warn!("Execution unit {} emitted unparsable line: {}", id, err);
                        continue;
                    }
                };

                let Value::Array(mut pair) = payload else {
                    log::warn!("Execution unit {} reply is not an [error, result] pair", id);
                    continue;
                };
                if pair.len() != 2 {
                    log::warn!("Execution unit {} reply is not an [error, result] pair", id);
                    continue;
                }

                let result = pair.pop().unwrap_or(Value::Null);
                let error = match pair.pop() {
                    Some(Value::Null) | None => None,
                    Some(error) => Some(error),
                };

                // Only the first reply counts; anything after is ignored.
                let _ = tx.send(UnitReply { error, result });
                break;
            }
        });

        if let Some(stderr) = stderr {
            std::thread::spawn(move || {
                let reader = BufReader::new(stderr);
                for line in reader.lines().map_while(std::result::Result::ok) {
                    log::warn!("Execution unit {} stderr: {}", id, line);
                }
            });
        }

        Ok(Self { id, child, stdin: Some(stdin), replies: rx })
    }

    pub fn send_seed<S: Serialize>(&mut self, seed: &S) -> Result<()> {
        let line = serde_json::to_string(seed)?;
        self.send_line(&line)
    }

    pub fn send_command(&mut self, command: &str) -> Result<()> {
        self.send_line(command)
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Sandbox("Execution unit stdin already closed".into()))?;
        writeln!(stdin, "{}", line)?;
        stdin.flush()?;
        Ok(())
    }

    /// Block until the unit replies, the token fires, or `timeout` elapses.
    /// Cancellation follows the polite-then-forced protocol: an in-band stop
    /// signal, a bounded `grace` wait for cleanup, then a hard kill. A reply
    /// arriving after cancellation is treated the same as no reply at all.
    pub fn await_reply(
        &mut self,
        token: &CancellationToken,
        timeout: Option<Duration>,
        grace: Duration,
    ) -> Result<UnitOutcome> {
        let started = Instant::now();
        loop {
            if token.is_cancelled() {
                self.cancel_with_grace(grace);
                return Ok(UnitOutcome::Cancelled);
            }

            match self.replies.recv_timeout(POLL_INTERVAL) {
                Ok(reply) => return Ok(UnitOutcome::Completed(reply)),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Sandbox(format!(
                        "Execution unit {} exited without replying",
                        self.id
                    )));
                }
            }

            if let Some(limit) = timeout
                && started.elapsed() >= limit
            {
                return Err(Error::Timeout(format!(
                    "Timed out waiting for execution unit reply ({}s)",
                    limit.as_secs()
                )));
            }
        }
    }

    fn cancel_with_grace(&mut self, grace: Duration) {
        if let Err(err) = self.send_line(STOP_SIGNAL) {
            log::warn!("Execution unit {}: stop signal not delivered: {}", self.id, err);
        }

        // Wait out the grace period, leaving early if the unit exits or
        // finishes its cleanup and replies.
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if matches!(self.child.try_wait(), Ok(Some(_))) {
                break;
            }
            match self.replies.recv_timeout(POLL_INTERVAL) {
                Ok(_) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => std::thread::sleep(POLL_INTERVAL),
            }
        }

        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for ExecutionUnit {
    fn drop(&mut self) {
        self.stdin.take();
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
