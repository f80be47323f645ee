//! Process-backed transform runner.
//!
//! Spawns the collaborator program per call, feeds it positional
//! arguments, and parses its stdout as JSON. A hard timeout bounds
//! every call; on expiry the child is killed rather than orphaned.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command as TokioCommand;

use crate::config::TransformConfig;
use crate::error::TransformError;
use crate::transform::{SlideData, TransformRunner};

/// Envelope the collaborator prints on stdout.
#[derive(Debug, Deserialize)]
struct CollaboratorReply {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    total_slides: Option<u32>,
    #[serde(default)]
    slides: Option<Vec<crate::transform::Slide>>,
}

pub struct ProcessTransformRunner {
    config: TransformConfig,
}

impl ProcessTransformRunner {
    pub fn new(config: TransformConfig) -> Self {
        Self { config }
    }

    async fn invoke(&self, subcommand: &str, extra: &[&Path]) -> Result<String, TransformError> {
        let mut command = TokioCommand::new(&self.config.program);
        command
            .args(&self.config.args)
            .arg(subcommand)
            .args(extra)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        log::debug!(
            "Spawning transform: {} {:?} {} {:?}",
            self.config.program,
            self.config.args,
            subcommand,
            extra
        );

        let timeout = self.config.timeout();
        // Dropping the future on timeout kills the child.
        let output = match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(TransformError::Spawn(e.to_string())),
            Err(_) => {
                log::error!(
                    "Transform '{}' exceeded {:?}, killing process",
                    subcommand,
                    timeout
                );
                return Err(TransformError::Timeout {
                    seconds: timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransformError::ProcessFailed {
                status: output.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn parse_reply(stdout: &str) -> Result<CollaboratorReply, TransformError> {
        let reply: CollaboratorReply = serde_json::from_str(stdout)
            .map_err(|e| TransformError::InvalidOutput(e.to_string()))?;
        if !reply.success {
            let detail = reply
                .error
                .unwrap_or_else(|| "collaborator reported failure without detail".to_string());
            return Err(TransformError::InvalidOutput(detail));
        }
        Ok(reply)
    }
}

#[async_trait]
impl TransformRunner for ProcessTransformRunner {
    async fn extract(&self, input: &Path) -> Result<SlideData, TransformError> {
        let stdout = self.invoke("extract", &[input]).await?;
        let reply = Self::parse_reply(&stdout)?;

        Ok(SlideData {
            total_slides: reply.total_slides.ok_or_else(|| {
                TransformError::InvalidOutput("extract reply missing total_slides".to_string())
            })?,
            slides: reply.slides.unwrap_or_default(),
        })
    }

    async fn generate(
        &self,
        input: &Path,
        output: &Path,
        translations: &serde_json::Value,
    ) -> Result<(), TransformError> {
        // Translations go through a temp file; argv has length limits
        // and large decks blow past them.
        let translations_path = translations_temp_path();
        let serialized = serde_json::to_string(translations)
            .map_err(|e| TransformError::InvalidOutput(e.to_string()))?;
        tokio::fs::write(&translations_path, serialized)
            .await
            .map_err(|e| TransformError::Io {
                path: translations_path.clone(),
                source: e,
            })?;

        let result = self
            .invoke("generate", &[input, output, &translations_path])
            .await
            .and_then(|stdout| Self::parse_reply(&stdout).map(|_| ()));

        if let Err(e) = tokio::fs::remove_file(&translations_path).await {
            log::warn!(
                "Failed to remove temp file {}: {}",
                translations_path.display(),
                e
            );
        }

        result
    }
}

fn translations_temp_path() -> PathBuf {
    std::env::temp_dir().join(format!("deckrelay-translations-{}.json", uuid::Uuid::new_v4()))
}
