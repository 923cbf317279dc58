//! External-command gateway.
//!
//! Each content kind may be mapped to an argv. The fragment text is written to
//! the child's stdin and the transformed text is read back from its stdout.
//! The placeholder `{path}` in any argument is replaced with the fragment's
//! source path.

use std::path::Path;
use std::process::Stdio;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use bundlewright_shared::{BundleError, ContentKind, Result, TransformConfig};

use crate::TransformGateway;

/// Maximum number of stderr bytes quoted in a transform error.
const STDERR_EXCERPT: usize = 400;

/// Gateway that shells out to one command per content kind.
#[derive(Debug, Clone, Default)]
pub struct CommandTransform {
    script: Vec<String>,
    style: Vec<String>,
    markup: Vec<String>,
}

impl CommandTransform {
    /// Build from the `[transform]` config section.
    pub fn from_config(config: &TransformConfig) -> Self {
        Self {
            script: config.script.clone(),
            style: config.style.clone(),
            markup: config.markup.clone(),
        }
    }

    fn argv(&self, kind: ContentKind) -> &[String] {
        match kind {
            ContentKind::Script => &self.script,
            ContentKind::Style => &self.style,
            ContentKind::Markup => &self.markup,
        }
    }

    async fn run(&self, kind: ContentKind, text: String, source_path: &Path) -> Result<String> {
        let argv = self.argv(kind);
        let Some((program, args)) = argv.split_first() else {
            return Ok(text);
        };
        let path_str = source_path.to_string_lossy();
        let args: Vec<String> = args.iter().map(|a| a.replace("{path}", &path_str)).collect();

        debug!(%kind, %program, path = %source_path.display(), "running transform command");

        let mut child = Command::new(program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BundleError::transform(
                    kind,
                    source_path,
                    format!("failed to spawn `{program}`: {e}"),
                )
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            BundleError::transform(kind, source_path, "failed to capture transform stdin")
        })?;

        // Feed stdin while the child output is drained, so large inputs cannot
        // deadlock on a full pipe.
        let feed = async move {
            stdin.write_all(text.as_bytes()).await?;
            stdin.shutdown().await
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());

        let output = output.map_err(|e| {
            BundleError::transform(kind, source_path, format!("`{program}` did not finish: {e}"))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let excerpt: String = stderr.chars().take(STDERR_EXCERPT).collect();
            return Err(BundleError::transform(
                kind,
                source_path,
                format!("`{program}` exited with {}: {}", output.status, excerpt.trim()),
            ));
        }
        fed.map_err(|e| {
            BundleError::transform(kind, source_path, format!("failed to write to `{program}`: {e}"))
        })?;

        String::from_utf8(output.stdout).map_err(|e| {
            BundleError::transform(kind, source_path, format!("`{program}` produced non UTF-8 output: {e}"))
        })
    }
}

impl TransformGateway for CommandTransform {
    fn transform<'a>(
        &'a self,
        kind: ContentKind,
        text: String,
        source_path: &'a Path,
    ) -> BoxFuture<'a, Result<String>> {
        self.run(kind, text, source_path).boxed()
    }

    fn name(&self) -> &str {
        "command"
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn config(script: &[&str]) -> TransformConfig {
        TransformConfig {
            script: script.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn kind_without_command_passes_through() {
        let gateway = CommandTransform::from_config(&config(&["tr", "a-z", "A-Z"]));
        let out = gateway
            .transform(ContentKind::Style, "a{}".into(), Path::new("a.css"))
            .await
            .unwrap();
        assert_eq!(out, "a{}");
    }

    #[tokio::test]
    async fn pipes_text_through_command() {
        let gateway = CommandTransform::from_config(&config(&["tr", "a-z", "A-Z"]));
        let out = gateway
            .transform(ContentKind::Script, "run();".into(), Path::new("run.js"))
            .await
            .unwrap();
        assert_eq!(out, "RUN();");
    }

    #[tokio::test]
    async fn path_placeholder_is_substituted() {
        let gateway = CommandTransform::from_config(&config(&["echo", "{path}"]));
        let out = gateway
            .transform(ContentKind::Script, String::new(), Path::new("src/app.js"))
            .await
            .unwrap();
        assert_eq!(out.trim(), "src/app.js");
    }

    #[tokio::test]
    async fn failing_command_is_a_transform_error() {
        let gateway = CommandTransform::from_config(&config(&["false"]));
        let err = gateway
            .transform(ContentKind::Script, "x".into(), Path::new("x.js"))
            .await
            .unwrap_err();
        assert!(matches!(err, BundleError::Transform { .. }));
    }

    #[tokio::test]
    async fn missing_program_is_a_transform_error() {
        let gateway =
            CommandTransform::from_config(&config(&["bundlewright-no-such-program-4711"]));
        let err = gateway
            .transform(ContentKind::Script, "x".into(), Path::new("x.js"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }
}
