use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::ExtractorSettings;
use crate::error::UsiError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub trait SpectrumExtractor: Send + Sync {
    fn extract(
        &self,
        raw_file: &Path,
        scan: &str,
        cancel: &CancellationToken,
    ) -> Result<Value, UsiError>;
}

#[derive(Debug, Clone)]
pub struct ThermoRawFileParser {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ThermoRawFileParser {
    pub fn new(settings: &ExtractorSettings) -> Self {
        Self {
            program: settings.program.clone(),
            args: settings.args.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }

    pub fn query_args(&self, raw_file: &Path, scan: &str) -> Vec<String> {
        let mut args = self.args.clone();
        args.extend([
            "query".to_string(),
            format!("-i={}", raw_file.display()),
            format!("-n={scan}"),
            "-s".to_string(),
        ]);
        args
    }

    pub fn tool_version(&self) -> Option<String> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if stdout.is_empty() { None } else { Some(stdout) }
    }

    fn wait(&self, child: &mut Child, cancel: &CancellationToken) -> Result<ExitStatus, UsiError> {
        let started = Instant::now();
        loop {
            if let Some(status) = child
                .try_wait()
                .map_err(|err| UsiError::ExtractionFailed(err.to_string()))?
            {
                return Ok(status);
            }
            if cancel.is_cancelled() {
                kill(child);
                return Err(UsiError::Cancelled);
            }
            if started.elapsed() >= self.timeout {
                kill(child);
                return Err(UsiError::ExtractionFailed(format!(
                    "{} timed out after {}s",
                    self.program.display(),
                    self.timeout.as_secs()
                )));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl SpectrumExtractor for ThermoRawFileParser {
    fn extract(
        &self,
        raw_file: &Path,
        scan: &str,
        cancel: &CancellationToken,
    ) -> Result<Value, UsiError> {
        let args = self.query_args(raw_file, scan);
        tracing::debug!(program = %self.program.display(), ?args, "starting extractor");
        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group, so a wrapper script and the tool it starts die together.
            command.process_group(0);
        }
        let mut child = command
            .spawn()
            .map_err(|err| {
                UsiError::ExtractionFailed(format!("{}: {err}", self.program.display()))
            })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        // Readers are only joined once the child has exited on its own; a
        // process that left the group may still hold the pipes after a kill.
        let status = self.wait(&mut child, cancel)?;
        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("{} exited with {status}", self.program.display())
            } else {
                stderr
            };
            return Err(UsiError::ExtractionFailed(message));
        }

        serde_json::from_slice(&stdout)
            .map_err(|err| UsiError::ExtractionFailed(format!("invalid JSON output: {err}")))
    }
}

fn drain<R: Read + Send + 'static>(source: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut source) = source {
            if let Err(err) = source.read_to_end(&mut buffer) {
                tracing::debug!(error = %err, read = buffer.len(), "extractor output read failed");
            }
        }
        buffer
    })
}

fn kill(child: &mut Child) {
    #[cfg(unix)]
    kill_group(child.id());
    if let Err(err) = child.kill() {
        tracing::warn!(error = %err, "failed to kill extractor");
    }
    if let Err(err) = child.wait() {
        tracing::debug!(error = %err, "failed to reap extractor");
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    let status = Command::new("/bin/sh")
        .arg("-c")
        .arg(format!("kill -s KILL -- -{pgid}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(status) if status.success() => {}
        Ok(status) => tracing::debug!(pgid, %status, "extractor process group already gone"),
        Err(err) => tracing::warn!(pgid, error = %err, "failed to signal extractor process group"),
    }
}
