//! Streaming process execution.
//!
//! stdout and stderr are drained by two reader tasks feeding one channel, so
//! a child writing heavily to either pipe can never stall on a full OS
//! buffer while we wait on the other.

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{CommandSpec, LineMatcher, NoMatch};

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Every output line (stdout and stderr, in arrival order), newline terminated.
    pub transcript: String,
    /// Exit code, if the process was not terminated by a signal.
    pub exit_code: Option<i32>,
    /// Wall-clock runtime.
    pub duration: Duration,
    /// Number of lines the matcher accepted.
    pub matched_lines: usize,
}

/// Structured process failure.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
        output: String,
    },

    #[error("`{command}` exited with {status}")]
    Exit {
        command: String,
        status: ExitStatus,
        output: String,
    },

    #[error("`{command}` was cancelled")]
    Cancelled { command: String, output: String },
}

impl ProcessError {
    /// Description of the command that failed.
    pub fn command(&self) -> &str {
        match self {
            Self::Spawn { command, .. }
            | Self::Wait { command, .. }
            | Self::Exit { command, .. }
            | Self::Cancelled { command, .. } => command,
        }
    }

    /// Output captured before the failure. Empty when the process never started.
    pub fn output(&self) -> &str {
        match self {
            Self::Spawn { .. } => "",
            Self::Wait { output, .. } | Self::Exit { output, .. } | Self::Cancelled { output, .. } => {
                output
            }
        }
    }

    pub fn is_spawn(&self) -> bool {
        matches!(self, Self::Spawn { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Run `spec` to completion, streaming its output line by line.
///
/// Each line is passed through `matcher`, then handed to `on_line` together
/// with the match result, then appended to the transcript. Line order is the
/// order in which lines arrived from the child.
///
/// Tripping `cancel` kills the child and returns [`ProcessError::Cancelled`]
/// with whatever was captured so far.
pub async fn run_streaming<M, F>(
    spec: &CommandSpec,
    cancel: &CancellationToken,
    matcher: M,
    mut on_line: F,
) -> Result<CommandOutput, ProcessError>
where
    M: LineMatcher,
    F: FnMut(&str, Option<M::Output>),
{
    let command = spec.describe();
    let started = Instant::now();

    let mut cmd = spec.to_command();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        command: command.clone(),
        source,
    })?;

    debug!(command = %command, pid = ?child.id(), "Spawned process");

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    if let Some(stdout) = child.stdout.take() {
        spawn_line_reader(stdout, "stdout", tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_line_reader(stderr, "stderr", tx.clone());
    }
    // The channel closes once both readers hit EOF.
    drop(tx);

    let mut transcript = String::new();
    let mut matched_lines = 0usize;
    let mut cancelled = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                cancelled = true;
                break;
            }
            next = rx.recv() => match next {
                Some(line) => {
                    let matched = matcher.match_line(&line);
                    if matched.is_some() {
                        matched_lines += 1;
                    }
                    on_line(&line, matched);
                    transcript.push_str(&line);
                    transcript.push('\n');
                }
                None => break,
            }
        }
    }

    let waited = if cancelled {
        None
    } else {
        tokio::select! {
            _ = cancel.cancelled() => None,
            status = child.wait() => Some(status),
        }
    };

    let Some(waited) = waited else {
        if let Err(e) = child.kill().await {
            warn!(command = %command, error = %e, "Failed to kill cancelled process");
        }
        debug!(command = %command, "Process cancelled");
        return Err(ProcessError::Cancelled {
            command,
            output: transcript,
        });
    };

    let status = match waited {
        Ok(status) => status,
        Err(source) => {
            return Err(ProcessError::Wait {
                command,
                source,
                output: transcript,
            });
        }
    };

    let duration = started.elapsed();

    if !status.success() {
        warn!(command = %command, %status, "Process exited unsuccessfully");
        return Err(ProcessError::Exit {
            command,
            status,
            output: transcript,
        });
    }

    debug!(
        command = %command,
        elapsed_ms = duration.as_millis() as u64,
        matched_lines,
        "Process finished"
    );

    Ok(CommandOutput {
        transcript,
        exit_code: status.code(),
        duration,
        matched_lines,
    })
}

/// Run `spec` and only collect its transcript.
pub async fn run_capture(
    spec: &CommandSpec,
    cancel: &CancellationToken,
) -> Result<CommandOutput, ProcessError> {
    run_streaming(spec, cancel, NoMatch, |_, _| {}).await
}

/// Read `reader` until EOF, forwarding lines to `tx`.
///
/// Bytes are decoded lossily and both `\n` and `\r` terminate a line, since
/// progress-printing tools often redraw with a bare carriage return.
fn spawn_line_reader<R>(reader: R, stream: &'static str, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let chunk = String::from_utf8_lossy(&buf);
                    for line in chunk
                        .split(['\r', '\n'])
                        .filter(|line| !line.is_empty())
                    {
                        trace!(stream, "{}", line);
                        if tx.send(line.to_string()).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    debug!(stream, error = %e, "Stopped reading process output");
                    break;
                }
            }
        }
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").arg("-c").arg(script)
    }

    struct PrefixMatcher(&'static str);

    impl LineMatcher for PrefixMatcher {
        type Output = usize;

        fn match_line(&self, line: &str) -> Option<usize> {
            line.starts_with(self.0).then(|| line.len())
        }
    }

    #[tokio::test]
    async fn test_lines_are_delivered_in_order() {
        let mut seen = Vec::new();
        let output = run_streaming(
            &sh("echo one; echo two; echo three"),
            &CancellationToken::new(),
            PrefixMatcher("t"),
            |line, matched| seen.push((line.to_string(), matched)),
        )
        .await
        .unwrap();

        assert_eq!(
            seen,
            vec![
                ("one".to_string(), None),
                ("two".to_string(), Some(3)),
                ("three".to_string(), Some(5)),
            ]
        );
        assert_eq!(output.transcript, "one\ntwo\nthree\n");
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.matched_lines, 2);
    }

    #[tokio::test]
    async fn test_nonzero_exit_keeps_transcript() {
        let err = run_capture(&sh("echo boom; echo oops 1>&2; exit 3"), &CancellationToken::new())
            .await
            .unwrap_err();

        match &err {
            ProcessError::Exit { status, output, .. } => {
                assert_eq!(status.code(), Some(3));
                assert!(output.contains("boom"));
                assert!(output.contains("oops"));
            }
            other => panic!("expected exit error, got {other:?}"),
        }
        assert!(err.command().starts_with("sh -c"));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let spec = CommandSpec::new("vidra-definitely-missing-binary").arg("--version");
        let err = run_capture(&spec, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_spawn());
        assert_eq!(err.output(), "");
        assert_eq!(err.command(), "vidra-definitely-missing-binary --version");
    }

    #[tokio::test]
    async fn test_cancellation_kills_child() {
        let cancel = CancellationToken::new();
        let trip = cancel.clone();

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            run_streaming(
                &sh("echo started; sleep 30; echo never"),
                &cancel,
                NoMatch,
                |line, _| {
                    if line == "started" {
                        trip.cancel();
                    }
                },
            ),
        )
        .await
        .expect("cancelled run should return promptly");

        let err = result.unwrap_err();
        assert!(err.is_cancelled());
        assert!(err.output().contains("started"));
        assert!(!err.output().contains("never"));
    }

    #[tokio::test]
    async fn test_heavy_output_on_both_pipes_does_not_stall() {
        let script = "i=0; while [ $i -lt 5000 ]; do echo out $i; echo err $i 1>&2; i=$((i+1)); done";
        let saw_last = Arc::new(AtomicBool::new(false));
        let flag = saw_last.clone();

        let output = tokio::time::timeout(
            Duration::from_secs(30),
            run_streaming(&sh(script), &CancellationToken::new(), NoMatch, |line, _| {
                if line == "out 4999" {
                    flag.store(true, Ordering::SeqCst);
                }
            }),
        )
        .await
        .expect("run should not deadlock")
        .unwrap();

        assert_eq!(output.transcript.lines().count(), 10_000);
        assert!(saw_last.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_carriage_returns_split_lines() {
        let output = run_capture(&sh("printf 'a\\rb\\n'"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.transcript, "a\nb\n");
    }
}
