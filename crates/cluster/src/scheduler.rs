//! SLURM command construction and output parsing.
//!
//! Pure functions only; the commands are executed over SSH by
//! [`RemoteBackend`](crate::RemoteBackend).

use std::sync::LazyLock;

use regex::Regex;
use splatscan_core::backend::{BackendError, JobHandle};
use splatscan_core::params::JobParams;

use crate::session::CommandOutput;

static SUBMITTED_JOB_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Submitted batch job (\d+)").expect("valid regex"));

/// Quote `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:,@".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// `sbatch <script> keep_pre keep_post keep_train_images iterations`
pub fn submit_command(job_script: &str, params: &JobParams) -> String {
    let mut command = format!("sbatch {}", shell_quote(job_script));
    for arg in params.positional_args() {
        command.push(' ');
        command.push_str(&arg);
    }
    command
}

/// `squeue -j <id>`
pub fn queue_command(handle: &JobHandle) -> String {
    format!("squeue -j {}", shell_quote(handle.as_str()))
}

/// Extract the scheduler job identifier from `sbatch` output.
pub fn parse_job_id(stdout: &str) -> Option<JobHandle> {
    SUBMITTED_JOB_RE
        .captures(stdout)
        .and_then(|caps| caps.get(1))
        .map(|id| JobHandle::new(id.as_str()))
}

/// Turn the output of the submission command into a job handle.
///
/// Anything on stderr is treated as a failed submission, as is stdout that
/// does not announce a job id.
pub fn interpret_submission(output: &CommandOutput) -> Result<JobHandle, BackendError> {
    let stderr = output.stderr.trim();
    if !stderr.is_empty() {
        return Err(BackendError::Submission(format!(
            "sbatch reported an error (exit {}): {stderr}",
            output.exit_status
        )));
    }

    parse_job_id(&output.stdout).ok_or_else(|| {
        BackendError::Submission(format!(
            "no job id in sbatch output: {}",
            output.stdout.trim()
        ))
    })
}

/// Whether `squeue` output still lists the job.
///
/// Compares whole whitespace-separated tokens so that job `12` is not
/// mistaken for job `123`.
pub fn queue_lists_job(output: &str, handle: &JobHandle) -> bool {
    output
        .split_whitespace()
        .any(|token| token == handle.as_str())
}
