use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::{Child, Command};

/// Time a step gets to exit after SIGINT before it is killed.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Puts the step in its own session so the whole tree can be signalled.
#[cfg(unix)]
pub(super) fn detach_session(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub(super) fn detach_session(_cmd: &mut Command) {}

#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: i32) {
    if let Some(pid) = pid {
        unsafe {
            libc::kill(-(pid as i32), signal);
        }
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: Option<u32>, _signal: i32) {}

/// Interrupts the step's process group, escalating to SIGKILL. The group is
/// always killed at the end: background jobs ignore SIGINT and would keep
/// the output pipes open after the shell exits.
pub(super) async fn stop_step(child: &mut Child) -> Option<ExitStatus> {
    let pid = child.id();
    signal_group(pid, libc::SIGINT);
    let status = match tokio::time::timeout(STOP_GRACE, child.wait()).await {
        Ok(status) => status.ok(),
        Err(_) => {
            tracing::debug!(pid = ?pid, "step ignored SIGINT, killing");
            signal_group(pid, libc::SIGKILL);
            let _ = child.start_kill();
            tokio::time::timeout(STOP_GRACE, child.wait())
                .await
                .ok()
                .and_then(Result::ok)
        }
    };
    signal_group(pid, libc::SIGKILL);
    status
}
