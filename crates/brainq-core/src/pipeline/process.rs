//! Subprocess execution for toolchain invocations.

use std::path::Path;
use std::process::Stdio;

use tracing::debug;

use crate::error::PipelineError;

/// Diagnostic output kept on failure (tail end, where MATLAB puts the error).
const MAX_DIAGNOSTIC_BYTES: usize = 4096;

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Run `program` with explicit arguments in `working_dir` and wait for it.
///
/// No shell is involved. The child is killed if the returned future is
/// dropped, which is how the worker's processing timeout reaps a hung
/// toolchain. A non-zero exit becomes `PipelineError::Process`.
pub async fn run(
    program: &Path,
    args: &[String],
    working_dir: &Path,
) -> Result<ProcessOutput, PipelineError> {
    debug!(program = %program.display(), ?args, cwd = %working_dir.display(), "spawning process");

    let child = tokio::process::Command::new(program)
        .args(args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| PipelineError::Spawn {
            program: program.display().to_string(),
            source,
        })?;

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| PipelineError::io(format!("failed to wait for {}", program.display()), e))?;

    let result = ProcessOutput {
        exit_code: output.status.code(),
        stdout: output.stdout,
        stderr: output.stderr,
    };

    if !output.status.success() {
        return Err(PipelineError::Process {
            exit_code: result.exit_code,
            stderr: diagnostic(&result),
        });
    }
    Ok(result)
}

/// stderr tail, falling back to stdout when stderr is empty.
fn diagnostic(output: &ProcessOutput) -> String {
    let source = if output.stderr.iter().all(u8::is_ascii_whitespace) {
        &output.stdout
    } else {
        &output.stderr
    };
    let start = source.len().saturating_sub(MAX_DIAGNOSTIC_BYTES);
    String::from_utf8_lossy(&source[start..]).trim().to_string()
}
