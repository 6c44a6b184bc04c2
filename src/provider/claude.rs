use super::Backend;
use crate::error::BackendError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout as tokio_timeout;

pub struct ClaudeBackend {
    pub binary: PathBuf,
    pub model: String,
}

#[async_trait]
impl Backend for ClaudeBackend {
    fn name(&self) -> &'static str {
        "claude_cli"
    }

    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        timeout: Duration,
    ) -> Result<String, BackendError> {
        // Build command - use string for PATH lookup if not an absolute/relative path
        let binary_str = self.binary.to_string_lossy();
        let mut cmd = if binary_str.contains('/') || binary_str.contains('\\') {
            Command::new(&self.binary)
        } else {
            Command::new(binary_str.as_ref())
        };

        // Ensure subscription auth is used (not API key)
        cmd.env_remove("ANTHROPIC_API_KEY");
        cmd.kill_on_drop(true);

        cmd.arg("-p")
            .arg(user_prompt)
            .arg("--system-prompt")
            .arg(system_prompt)
            .arg("--model")
            .arg(&self.model)
            .arg("--output-format")
            .arg("json");

        let output = tokio_timeout(timeout, cmd.output())
            .await
            .map_err(|_| BackendError::Timeout(timeout))?
            .map_err(BackendError::Io)?;

        if !output.status.success() {
            return Err(BackendError::NonZeroExit {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}
