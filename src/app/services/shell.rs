use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::app::config::ShellSettings;
use crate::app::error::AppError;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// A command for the shell executor. With `through_shell` the program and arguments are joined
/// into one `sh -c` script, so pipes and redirections work.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub through_shell: bool,
    pub timeout: Option<Duration>,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            through_shell: false,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn through_shell(mut self, through_shell: bool) -> Self {
        self.through_shell = through_shell;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn to_command(&self) -> Command {
        let mut command = if self.through_shell {
            let mut script = self.program.clone();
            for arg in &self.args {
                script.push(' ');
                script.push_str(arg);
            }
            let mut command = Command::new("sh");
            command.arg("-c").arg(script);
            command
        } else {
            let mut command = Command::new(&self.program);
            command.args(&self.args);
            command
        };
        for (key, value) in &self.env {
            command.env(key, value);
        }
        command
    }
}

pub struct ShellExecutor {
    default_timeout: Duration,
}

impl ShellExecutor {
    pub fn new(settings: &ShellSettings) -> Self {
        Self {
            default_timeout: Duration::from_millis(settings.default_timeout_ms),
        }
    }

    pub fn execute_sync(&self, command: &ShellCommand, trace_id: &str) -> Result<CommandOutput, AppError> {
        execute_sync(command, command.timeout.unwrap_or(self.default_timeout), trace_id)
    }

    pub fn execute_stream(&self, command: &ShellCommand, trace_id: &str) -> Result<ShellStream, AppError> {
        execute_stream(command, trace_id)
    }
}

fn drain<R: Read + Send + 'static>(reader: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut reader = reader;
        let mut buffer = Vec::<u8>::new();
        let mut temp = [0u8; 4096];
        loop {
            match reader.read(&mut temp) {
                Ok(0) => break,
                Ok(count) => buffer.extend_from_slice(&temp[..count]),
                Err(_) => break,
            }
        }
        buffer
    })
}

/// Runs `command` to completion, killing it once `timeout` elapses.
pub fn execute_sync(
    command: &ShellCommand,
    timeout: Duration,
    trace_id: &str,
) -> Result<CommandOutput, AppError> {
    debug!(trace_id, program = %command.program, args = ?command.args, "executing shell command");
    let mut child = command
        .to_command()
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| AppError::system(format!("Failed to spawn command: {err}"), trace_id))?;

    // Both pipes are drained concurrently so a chatty child cannot fill a pipe buffer and stall.
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stdout", trace_id))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stderr", trace_id))?;
    let stdout_handle = drain(stdout);
    let stderr_handle = drain(stderr);

    let start = Instant::now();
    let exit_code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = stdout_handle.join();
                    let _ = stderr_handle.join();
                    warn!(trace_id, program = %command.program, ?timeout, "shell command timed out");
                    return Err(AppError::timeout(
                        format!("Command timed out after {timeout:?}"),
                        trace_id,
                    ));
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(err) => {
                let _ = stdout_handle.join();
                let _ = stderr_handle.join();
                return Err(AppError::system(
                    format!("Failed to poll command: {err}"),
                    trace_id,
                ));
            }
        }
    };

    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        exit_code,
    })
}

/// Live stdout of a running command. Dropping the stream kills the command.
pub struct ShellStream {
    child: Child,
    stdout: ChildStdout,
}

impl ShellStream {
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Waits for the command to exit after its output has been consumed.
    pub fn wait(mut self) -> Result<Option<i32>, AppError> {
        self.child
            .wait()
            .map(|status| status.code())
            .map_err(|err| AppError::system(format!("Failed to wait for command: {err}"), ""))
    }
}

impl Read for ShellStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stdout.read(buf)
    }
}

impl Drop for ShellStream {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

pub fn execute_stream(command: &ShellCommand, trace_id: &str) -> Result<ShellStream, AppError> {
    debug!(trace_id, program = %command.program, "streaming shell command");
    let mut child = command
        .to_command()
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|err| AppError::system(format!("Failed to spawn command: {err}"), trace_id))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stdout", trace_id))?;
    Ok(ShellStream { child, stdout })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};

    #[test]
    fn execute_sync_does_not_deadlock_on_large_stdout() {
        let command = ShellCommand::new("i=0; while [ $i -lt 100000 ]; do echo 1234567890; i=$((i+1)); done")
            .through_shell(true);
        let output = execute_sync(&command, Duration::from_secs(10), "test-large-output")
            .expect("expected large-output command to complete without timing out");
        assert!(output.success());
        assert!(output.stdout.len() >= 1_000_000);
    }

    #[test]
    fn passes_arguments_and_environment() {
        let command = ShellCommand::new("sh")
            .args(["-c", "printf '%s:%s' \"$1\" \"$GREETING\"", "sh", "world"])
            .env("GREETING", "hello");
        let output = execute_sync(&command, Duration::from_secs(5), "test-env").expect("run");
        assert_eq!(output.stdout, "world:hello");
    }

    #[test]
    fn reports_exit_code_and_stderr() {
        let command = ShellCommand::new("echo oops >&2; exit 3").through_shell(true);
        let output = execute_sync(&command, Duration::from_secs(5), "test-exit").expect("run");
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[test]
    fn times_out_long_commands() {
        let executor = ShellExecutor::new(&ShellSettings {
            default_timeout_ms: 100,
        });
        let err = executor
            .execute_sync(&ShellCommand::new("sleep").arg("5"), "test-timeout")
            .expect_err("timeout");
        assert_eq!(err.code, "ERR_TIMEOUT");
    }

    #[test]
    fn stream_yields_output_and_kills_on_drop() {
        let command = ShellCommand::new("echo first; echo second; sleep 30").through_shell(true);
        let stream = execute_stream(&command, "test-stream").expect("spawn");
        let mut lines = BufReader::new(stream).lines();
        assert_eq!(lines.next().expect("line").expect("read"), "first");
        assert_eq!(lines.next().expect("line").expect("read"), "second");
        drop(lines);
    }
}
