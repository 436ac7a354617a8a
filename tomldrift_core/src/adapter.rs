use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Outcome of handing one candidate input to a decoder.
///
/// Rejection is a routine, first-class result — never an error path. Harness
/// breakage lives in [`AdapterError`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// The decoder accepted the input; the payload is its canonical output
    /// (tagged interchange JSON or the native re-serialization, depending
    /// on the comparison mode).
    Decoded(String),
    /// The decoder rejected the input as invalid.
    Rejected,
}

/// Harness-vs-environment failures while invoking a decoder.
///
/// Any of these aborts the whole run: without a working adapter there is
/// nothing meaningful left to test, and none of them says anything about
/// the decoder's TOML handling.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// The decoder executable could not be started.
    #[error("failed to spawn decoder {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing the input to the decoder, or reading its output, failed.
    #[error("I/O with decoder {name} failed: {detail}")]
    Io { name: String, detail: String },

    /// The decoder did not exit within the configured deadline.
    #[error("decoder {name} exceeded its {timeout:?} deadline")]
    Timeout { name: String, timeout: Duration },

    /// The decoder's output was not valid UTF-8 and cannot be compared.
    #[error("decoder {name} produced non-UTF-8 output")]
    BadEncoding { name: String },
}

/// One decoder binding. Two instances of this capability, over different
/// external binaries, are all the oracle needs; fake implementations stand
/// in for real processes in tests.
pub trait DecoderAdapter: Send + Sync {
    /// Short label ("A", "B", or the binary path) used in reports.
    fn name(&self) -> &str;

    /// Feeds `input` to the decoder and captures its outcome. One external
    /// process per call, no retry: adapters are assumed deterministic and
    /// locally available, so a failed invocation is fatal.
    fn decode(&self, input: &[u8]) -> Result<DecodeOutcome, AdapterError>;
}

/// How a [`CommandAdapter`] delivers the candidate input to the process.
#[derive(Debug, Clone)]
pub enum InputDelivery {
    /// Write the input to the child's stdin (the toml-test convention).
    Stdin,
    /// Write the input to a temp file and substitute its path for `{}` in
    /// the template, e.g. `--file={}`.
    File(String),
}

/// Settings for one external decoder process.
#[derive(Debug, Clone)]
pub struct CommandAdapterConfig {
    /// Executable plus fixed arguments.
    pub command: Vec<String>,
    pub input_delivery: InputDelivery,
    /// Per-invocation deadline; exceeding it is an [`AdapterError::Timeout`].
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
}

/// A [`DecoderAdapter`] over an external executable, spoken to via the
/// stream contract: input in, canonical payload or rejection out, exit
/// status distinguishing the two.
#[derive(Debug)]
pub struct CommandAdapter {
    name: String,
    config: CommandAdapterConfig,
}

impl CommandAdapter {
    pub fn new(name: impl Into<String>, config: CommandAdapterConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    /// Convenience constructor for the common case: one executable path,
    /// stdin delivery.
    pub fn from_path(name: impl Into<String>, path: impl Into<String>, timeout: Duration) -> Self {
        Self::new(
            name,
            CommandAdapterConfig {
                command: vec![path.into()],
                input_delivery: InputDelivery::Stdin,
                timeout,
                working_dir: None,
            },
        )
    }

    fn io_error(&self, detail: impl std::fmt::Display) -> AdapterError {
        AdapterError::Io {
            name: self.name.clone(),
            detail: detail.to_string(),
        }
    }

    /// Polls the child until it exits or the deadline passes. The child is
    /// killed on timeout so no hung subprocess outlives the round.
    fn wait_with_timeout(&self, child: &mut Child) -> Result<ExitStatus, AdapterError> {
        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    if start.elapsed() > self.config.timeout {
                        if let Err(e) = child.kill() {
                            return Err(self.io_error(format!("failed to kill timed-out decoder: {e}")));
                        }
                        let _ = child.wait();
                        return Err(AdapterError::Timeout {
                            name: self.name.clone(),
                            timeout: self.config.timeout,
                        });
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => return Err(self.io_error(format!("error waiting for decoder: {e}"))),
            }
        }
    }
}

/// Drains a child pipe on its own thread, so a decoder that fills the pipe
/// buffer before exiting cannot deadlock the `try_wait` loop.
fn drain_pipe<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<std::io::Result<Vec<u8>>> {
    std::thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buffer)?;
        }
        Ok(buffer)
    })
}

impl DecoderAdapter for CommandAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn decode(&self, input: &[u8]) -> Result<DecodeOutcome, AdapterError> {
        let mut cmd = Command::new(&self.config.command[0]);
        if self.config.command.len() > 1 {
            cmd.args(&self.config.command[1..]);
        }
        if let Some(cwd) = &self.config.working_dir {
            cmd.current_dir(cwd);
        }

        let mut temp_file_handle: Option<tempfile::NamedTempFile> = None;
        match &self.config.input_delivery {
            InputDelivery::Stdin => {
                cmd.stdin(Stdio::piped());
            }
            InputDelivery::File(arg_template) => {
                cmd.stdin(Stdio::null());
                let named_temp_file = tempfile::NamedTempFile::new()
                    .map_err(|e| self.io_error(format!("failed to create temp file: {e}")))?;
                File::create(named_temp_file.path())
                    .and_then(|mut f| f.write_all(input))
                    .map_err(|e| self.io_error(format!("failed to write temp file: {e}")))?;
                let path_str = named_temp_file
                    .path()
                    .to_str()
                    .ok_or_else(|| self.io_error("temp file path is not valid UTF-8"))?
                    .to_string();
                for part in arg_template.replace("{}", &path_str).split_whitespace() {
                    cmd.arg(part);
                }
                temp_file_handle = Some(named_temp_file);
            }
        }

        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|source| AdapterError::Spawn {
            name: self.name.clone(),
            source,
        })?;

        // The stdin write runs on its own thread, like the pipe drains, so
        // a decoder that stops reading stdin cannot stall the harness: the
        // whole interaction sits under the try_wait deadline, and killing
        // the child on timeout unblocks the writer via EPIPE.
        let stdin_writer = if let InputDelivery::Stdin = self.config.input_delivery {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| self.io_error("child stdin was not available after piping"))?;
            let input = input.to_vec();
            Some(std::thread::spawn(move || -> std::io::Result<()> {
                match child_stdin.write_all(&input) {
                    // A decoder may close stdin early after deciding the
                    // input is invalid; EPIPE here is not a harness failure.
                    Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(e),
                    // Dropping stdin signals EOF so the decoder can finish.
                    _ => Ok(()),
                }
            }))
        } else {
            None
        };

        let stdout_reader = drain_pipe(child.stdout.take());
        let stderr_reader = drain_pipe(child.stderr.take());

        // On the timeout path the child has been killed, so the writer and
        // drain threads unblock and finish on their own.
        let status = self.wait_with_timeout(&mut child)?;

        if let Some(writer) = stdin_writer {
            writer
                .join()
                .map_err(|_| self.io_error("stdin writer thread panicked"))?
                .map_err(|e| self.io_error(format!("failed to write to decoder stdin: {e}")))?;
        }

        let stdout = stdout_reader
            .join()
            .map_err(|_| self.io_error("stdout reader thread panicked"))?
            .map_err(|e| self.io_error(format!("failed to read decoder stdout: {e}")))?;
        // stderr is drained for hygiene but carries no protocol meaning.
        let _ = stderr_reader.join();

        drop(temp_file_handle);

        if status.success() {
            let payload = String::from_utf8(stdout).map_err(|_| AdapterError::BadEncoding {
                name: self.name.clone(),
            })?;
            Ok(DecodeOutcome::Decoded(payload))
        } else {
            Ok(DecodeOutcome::Rejected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(name: &str, script: &str, timeout_ms: u64) -> CommandAdapter {
        CommandAdapter::new(
            name,
            CommandAdapterConfig {
                command: vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()],
                input_delivery: InputDelivery::Stdin,
                timeout: Duration::from_millis(timeout_ms),
                working_dir: None,
            },
        )
    }

    #[test]
    fn successful_exit_yields_decoded_stdout() {
        let adapter = sh("echoer", "cat", 2000);
        let outcome = adapter.decode(b"a = 1\n").expect("cat should run");
        assert_eq!(outcome, DecodeOutcome::Decoded("a = 1\n".to_string()));
    }

    #[test]
    fn nonzero_exit_yields_rejection() {
        let adapter = sh("rejecter", "cat > /dev/null; exit 1", 2000);
        let outcome = adapter.decode(b"a=1z=2").expect("sh should run");
        assert_eq!(outcome, DecodeOutcome::Rejected);
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let adapter = CommandAdapter::from_path(
            "ghost",
            "/this/decoder/does/not/exist_12345",
            Duration::from_secs(1),
        );
        match adapter.decode(b"a=1") {
            Err(AdapterError::Spawn { name, .. }) => assert_eq!(name, "ghost"),
            other => panic!("expected a spawn error, got {other:?}"),
        }
    }

    #[test]
    fn hung_decoder_times_out() {
        let adapter = sh("sleeper", "sleep 5", 100);
        match adapter.decode(b"") {
            Err(AdapterError::Timeout { name, .. }) => assert_eq!(name, "sleeper"),
            other => panic!("expected a timeout, got {other:?}"),
        }
    }

    #[test]
    fn stdin_write_is_covered_by_the_deadline() {
        // A decoder that stops reading stdin must not stall the harness
        // past its deadline, even when the input exceeds the pipe buffer.
        let adapter = sh("stuck", "sleep 100; cat > /dev/null", 200);
        let big = vec![b'#'; 1 << 20];
        let start = Instant::now();
        match adapter.decode(&big) {
            Err(AdapterError::Timeout { name, .. }) => assert_eq!(name, "stuck"),
            other => panic!("expected a timeout, got {other:?}"),
        }
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "decode must return at the deadline, not when the decoder exits"
        );
    }

    #[test]
    fn file_delivery_substitutes_temp_path() {
        let adapter = CommandAdapter::new(
            "filecat",
            CommandAdapterConfig {
                command: vec!["/bin/cat".to_string()],
                input_delivery: InputDelivery::File("{}".to_string()),
                timeout: Duration::from_secs(2),
                working_dir: None,
            },
        );
        let outcome = adapter.decode(b"foo = 2021-04-08\n").expect("cat should run");
        assert_eq!(
            outcome,
            DecodeOutcome::Decoded("foo = 2021-04-08\n".to_string())
        );
    }

    #[test]
    fn early_exit_while_writing_stdin_is_a_rejection_not_an_io_error() {
        // The child closes stdin immediately; a large input forces the
        // writer into the closed pipe.
        let adapter = sh("early", "exec <&-; exit 1", 2000);
        let big = vec![b'#'; 1 << 20];
        match adapter.decode(&big) {
            Ok(DecodeOutcome::Rejected) => {}
            other => panic!("expected a rejection, got {other:?}"),
        }
    }
}
