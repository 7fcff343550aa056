//! External command execution with a wall-clock limit.
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Exited successfully; captured stdout (empty unless requested)
    Completed(String),
    /// Killed after exceeding the timeout
    TimedOut(Duration),
}

/// Render a command line for logs and dry-run plans.
pub fn command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program.to_string())
        .chain(args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Kill `child` and wait for it so no process outlives its caller. A child
/// that already exited makes `kill` fail, which is fine.
fn reap(child: &mut Child) -> std::io::Result<()> {
    if let Err(e) = child.kill() {
        debug!("kill: {}", e);
    }
    child.wait().map(|_| ())
}

/// Run `program` with `args`, killing it once `timeout` elapses. Stderr is
/// inherited; stdout is captured when `capture_stdout` is set and discarded
/// otherwise. A non-zero exit is `CommandFailed`.
pub fn run_with_timeout(
    program: &str,
    args: &[String],
    timeout: Option<Duration>,
    capture_stdout: bool,
) -> Result<CommandOutcome> {
    let line = command_line(program, args);
    debug!("Running `{}`", line);
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(if capture_stdout { Stdio::piped() } else { Stdio::null() })
        .spawn()
        .map_err(|e| Error::CommandFailed {
            command: line.clone(),
            status: e.to_string(),
        })?;

    // drain stdout concurrently so a full pipe never blocks the child
    let reader = child.stdout.take().map(|mut out| {
        thread::spawn(move || {
            let mut buf = String::new();
            out.read_to_string(&mut buf).map(|_| buf)
        })
    });

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => {
                warn!("Lost track of `{}`: {}; killing", line, e);
                reap(&mut child)?;
                return Err(e.into());
            }
        }
        if let Some(limit) = timeout {
            if started.elapsed() >= limit {
                warn!("`{}` exceeded {:?}; killing", line, limit);
                reap(&mut child)?;
                return Ok(CommandOutcome::TimedOut(limit));
            }
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = match reader {
        Some(handle) => handle
            .join()
            .map_err(|_| Error::Processing(format!("stdout reader of `{}` panicked", line)))??,
        None => String::new(),
    };

    if !status.success() {
        return Err(Error::CommandFailed {
            command: line,
            status: status.to_string(),
        });
    }
    Ok(CommandOutcome::Completed(stdout))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_of_successful_command() {
        let out = run_with_timeout("echo", &["N45W090".to_string()], Some(Duration::from_secs(10)), true).unwrap();
        assert_eq!(out, CommandOutcome::Completed("N45W090\n".to_string()));
    }

    #[test]
    fn kills_command_after_timeout() {
        let started = Instant::now();
        let out = run_with_timeout("sleep", &["30".to_string()], Some(Duration::from_millis(200)), false).unwrap();
        assert_eq!(out, CommandOutcome::TimedOut(Duration::from_millis(200)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn reaped_child_is_no_longer_running() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        reap(&mut child).unwrap();
        assert!(child.try_wait().unwrap().is_some());
        // a second reap of an exited child still succeeds
        reap(&mut child).unwrap();
    }

    #[test]
    fn non_zero_exit_is_an_error() {
        let err = run_with_timeout("false", &[], None, false).unwrap_err();
        assert!(matches!(err, Error::CommandFailed { .. }));
    }

    #[test]
    fn command_line_joins_arguments() {
        let args = vec!["s3".to_string(), "ls".to_string()];
        assert_eq!(command_line("aws", &args), "aws s3 ls");
    }
}
