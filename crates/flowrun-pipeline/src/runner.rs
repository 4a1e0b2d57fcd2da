//! Running external programs.
//!
//! Task bodies never spawn processes themselves; they hand an
//! [`Invocation`] to a [`ProgramRunner`]. The production runner spawns a
//! subprocess, tests use an in-memory recorder.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::error::ProgramError;
use crate::programs::Invocation;

/// Lines of stderr kept for the error message of a failed program.
const STDERR_TAIL_LINES: usize = 20;

/// Runs one external program to completion.
#[async_trait]
pub trait ProgramRunner: Send + Sync {
    /// Run the invocation and return its standard output.
    ///
    /// A non-zero exit status is an error.
    async fn run(&self, invocation: &Invocation) -> Result<String, ProgramError>;
}

/// Runs programs as subprocesses.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    /// Directory the programs are looked up in. PATH lookup when unset.
    bin_dir: Option<PathBuf>,
}

impl ProcessRunner {
    /// Create a runner that resolves programs on PATH.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the directory holding the program binaries.
    pub fn with_bin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bin_dir = Some(dir.into());
        self
    }

    fn resolve(&self, program: &str) -> PathBuf {
        match &self.bin_dir {
            Some(dir) if !Path::new(program).is_absolute() => dir.join(program),
            _ => PathBuf::from(program),
        }
    }
}

#[async_trait]
impl ProgramRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<String, ProgramError> {
        let program = invocation.program.clone();
        let mut cmd = Command::new(self.resolve(&program));
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(command = %invocation, "Spawning program");

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProgramError::NotFound(program.clone())
            } else {
                error!(program = %program, error = %e, "Failed to spawn program");
                ProgramError::Spawn {
                    program: program.clone(),
                    source: e,
                }
            }
        })?;

        let mut stdout = child.stdout.take().ok_or_else(|| ProgramError::InvalidOutput {
            program: program.clone(),
            reason: "stdout not captured".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| ProgramError::InvalidOutput {
            program: program.clone(),
            reason: "stderr not captured".to_string(),
        })?;

        // Spawn stderr reader for logging; it keeps the tail for errors
        let stderr_program = program.clone();
        let stderr_task = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut line = String::new();
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        warn!(program = %stderr_program, stderr = %trimmed, "Program stderr");
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(trimmed.to_string());
                    }
                    Err(e) => {
                        error!(program = %stderr_program, error = %e, "Error reading program stderr");
                        break;
                    }
                }
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        let mut output = String::new();
        stdout
            .read_to_string(&mut output)
            .await
            .map_err(|e| ProgramError::InvalidOutput {
                program: program.clone(),
                reason: e.to_string(),
            })?;

        let status = child.wait().await.map_err(|e| ProgramError::Spawn {
            program: program.clone(),
            source: e,
        })?;
        let stderr_tail = stderr_task.await.unwrap_or_default();

        let exit_code = status.code().unwrap_or(-1);
        if !status.success() {
            return Err(ProgramError::Failed {
                program,
                code: exit_code,
                stderr: stderr_tail,
            });
        }

        info!(program = %program, stdout_bytes = output.len(), "Program finished");
        Ok(output)
    }
}
