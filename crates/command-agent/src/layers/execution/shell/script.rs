use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use tokio::fs::File;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::process::{detach_session, stop_step};
use super::stream::{capture_stream, Captured};

pub(super) const STDOUT_FILE: &str = "stdout";
pub(super) const STDERR_FILE: &str = "stderr";

/// How long output is still read after the step ends. Descendants that
/// survive the step can hold the pipes open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

pub(super) struct ScriptStep<'a> {
    pub(super) commands: &'a str,
    pub(super) working_dir: Option<&'a Path>,
    pub(super) timeout: Duration,
    pub(super) output_dir: PathBuf,
    pub(super) max_output_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum StepEnd {
    Exited(Option<i32>),
    Cancelled,
    TimedOut,
}

pub(super) struct StepRun {
    pub(super) end: StepEnd,
    pub(super) stdout: Captured,
    pub(super) stderr: Captured,
}

/// Runs `commands` with `/bin/bash -c`, mirroring both streams into the
/// step's output directory.
pub(super) async fn run_script(
    step: ScriptStep<'_>,
    cancel: &CancellationToken,
) -> anyhow::Result<StepRun> {
    tokio::fs::create_dir_all(&step.output_dir)
        .await
        .with_context(|| format!("failed to create {}", step.output_dir.display()))?;
    let stdout_file = File::create(step.output_dir.join(STDOUT_FILE)).await?;
    let stderr_file = File::create(step.output_dir.join(STDERR_FILE)).await?;

    let mut cmd = Command::new("/bin/bash");
    cmd.arg("-c").arg(step.commands);
    cmd.current_dir(step.working_dir.unwrap_or(step.output_dir.as_path()));
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);
    detach_session(&mut cmd);
    let mut child = cmd.spawn().context("spawn /bin/bash -c")?;

    let stdout = child.stdout.take().context("missing stdout")?;
    let stderr = child.stderr.take().context("missing stderr")?;
    let limit = step.max_output_bytes;
    let drain = CancellationToken::new();
    let stdout_task = tokio::spawn(capture_stream(stdout, limit, stdout_file, drain.clone()));
    let stderr_task = tokio::spawn(capture_stream(stderr, limit, stderr_file, drain.clone()));

    let end = tokio::select! {
        status = child.wait() => StepEnd::Exited(status.context("wait on step")?.code()),
        _ = cancel.cancelled() => {
            stop_step(&mut child).await;
            StepEnd::Cancelled
        }
        _ = tokio::time::sleep(step.timeout) => {
            stop_step(&mut child).await;
            StepEnd::TimedOut
        }
    };

    let drain_deadline = tokio::spawn({
        let drain = drain.clone();
        async move {
            tokio::time::sleep(DRAIN_GRACE).await;
            drain.cancel();
        }
    });
    let stdout = stdout_task
        .await
        .context("stdout task join")?
        .context("stdout read")?;
    let stderr = stderr_task
        .await
        .context("stderr task join")?
        .context("stderr read")?;
    drain_deadline.abort();
    if drain.is_cancelled() {
        tracing::debug!(event = "step.output_cut", "step left output pipes open");
    }
    Ok(StepRun {
        end,
        stdout,
        stderr,
    })
}
