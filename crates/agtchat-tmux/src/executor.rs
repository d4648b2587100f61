//! TmuxCommandRunner trait and TmuxExecutor (sync subprocess wrapper with a deadline).

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::TmuxError;

/// Default deadline for a single tmux invocation.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

const WAIT_POLL: Duration = Duration::from_millis(10);

/// Trait for executing tmux commands. Enables mock injection for testing.
pub trait TmuxCommandRunner: Send + Sync {
    fn run(&self, args: &[&str]) -> Result<String, TmuxError>;
}

impl<T: TmuxCommandRunner + ?Sized> TmuxCommandRunner for &T {
    fn run(&self, args: &[&str]) -> Result<String, TmuxError> {
        (**self).run(args)
    }
}

impl<T: TmuxCommandRunner + ?Sized> TmuxCommandRunner for std::sync::Arc<T> {
    fn run(&self, args: &[&str]) -> Result<String, TmuxError> {
        (**self).run(args)
    }
}

/// Real tmux executor. A hung tmux client is killed once the deadline passes.
pub struct TmuxExecutor {
    tmux_bin: String,
    socket_path: Option<String>,
    socket_name: Option<String>,
    timeout: Duration,
}

impl TmuxExecutor {
    pub fn new(tmux_bin: impl Into<String>) -> Self {
        Self {
            tmux_bin: tmux_bin.into(),
            socket_path: None,
            socket_name: None,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_socket_path(mut self, path: impl Into<String>) -> Self {
        self.socket_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_socket_name(mut self, name: impl Into<String>) -> Self {
        self.socket_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.tmux_bin);
        // Socket path takes precedence over socket name
        if let Some(ref path) = self.socket_path {
            cmd.args(["-S", path]);
        } else if let Some(ref name) = self.socket_name {
            cmd.args(["-L", name]);
        }
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl Default for TmuxExecutor {
    fn default() -> Self {
        Self::new("tmux")
    }
}

impl TmuxCommandRunner for TmuxExecutor {
    fn run(&self, args: &[&str]) -> Result<String, TmuxError> {
        let mut child = self.command(args).spawn()?;
        let deadline = Instant::now() + self.timeout;

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                tracing::warn!(?args, timeout = ?self.timeout, "tmux command timed out");
                let _ = child.kill();
                let _ = child.wait();
                return Err(TmuxError::Timeout(self.timeout));
            }
            std::thread::sleep(WAIT_POLL);
        };

        // tmux output is small; reading after exit cannot fill the pipe buffer.
        let mut stdout = String::new();
        let mut stderr = String::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_string(&mut stdout)?;
        }
        if let Some(mut err) = child.stderr.take() {
            err.read_to_string(&mut stderr)?;
        }

        if !status.success() {
            return Err(TmuxError::CommandFailed(format!(
                "exit code {}: {}",
                status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        Ok(stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_executor() {
        let exec = TmuxExecutor::default();
        assert_eq!(exec.tmux_bin, "tmux");
        assert!(exec.socket_path.is_none());
        assert!(exec.socket_name.is_none());
        assert_eq!(exec.timeout, DEFAULT_COMMAND_TIMEOUT);
    }

    #[test]
    fn socket_path_wins_over_name() {
        let exec = TmuxExecutor::default()
            .with_socket_name("myname")
            .with_socket_path("/tmp/my.sock");
        let cmd = exec.command(&["list-panes"]);
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, ["-S", "/tmp/my.sock", "list-panes"]);
    }

    #[cfg(unix)]
    #[test]
    fn hung_command_times_out() {
        let exec = TmuxExecutor::new("sleep").with_timeout(Duration::from_millis(50));
        let err = exec.run(&["5"]).expect_err("should time out");
        assert!(matches!(err, TmuxError::Timeout(_)));
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_reports_exit_code() {
        let exec = TmuxExecutor::new("false");
        let err = exec.run(&[]).expect_err("should fail");
        assert!(err.to_string().contains("exit code 1"));
    }

    #[test]
    fn blanket_ref_impl() {
        struct Mock;
        impl TmuxCommandRunner for Mock {
            fn run(&self, _args: &[&str]) -> Result<String, TmuxError> {
                Ok("ok".to_string())
            }
        }
        let mock = Mock;
        let r: &Mock = &mock;
        assert_eq!(r.run(&[]).expect("ok"), "ok");
        let shared = std::sync::Arc::new(Mock);
        assert_eq!(shared.run(&[]).expect("ok"), "ok");
    }
}
