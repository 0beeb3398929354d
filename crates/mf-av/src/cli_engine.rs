//! [`Engine`] implementation that spawns the real command-line tools.

use std::sync::Arc;

use async_trait::async_trait;
use mf_core::{EngineErrorKind, Error, InvocationId};

use crate::command::{ProcessLimits, ToolCommand};
use crate::engine::{Engine, EngineCall, EngineFailure, EngineInvocation};
use crate::tools::ToolRegistry;

/// Runs each [`EngineTask`](crate::EngineTask) as a child process of the
/// discovered tool, under the call's deadline, cancellation token and limits.
#[derive(Debug, Clone)]
pub struct CliEngine {
    tools: Arc<ToolRegistry>,
}

impl CliEngine {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }
}

#[async_trait]
impl Engine for CliEngine {
    async fn invoke(&self, call: EngineCall) -> Result<EngineInvocation, EngineFailure> {
        let tool = call.task.tool();
        let program = self.tools.require(tool)?.path.clone();
        let args = call.task.arguments(&call.limits);
        let operation = call.task.operation();
        let id = InvocationId::new();

        tracing::debug!(invocation = %id, engine = %tool, operation, ?args, "Invoking engine");

        let mut cmd = ToolCommand::new(program);
        cmd.args(args.iter().cloned())
            .deadline(call.deadline)
            .cancel_token(call.cancel.clone())
            .limits(ProcessLimits::from_resource_limits(&call.limits));
        let output = cmd.run().await?;
        let checked = output.check(tool.name());

        let invocation = EngineInvocation {
            id,
            engine: tool.name().to_string(),
            operation,
            args,
            limits: call.limits,
            exit_code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
            elapsed: output.elapsed,
        };

        if let Err(e) = checked {
            tracing::warn!(
                invocation = %id,
                engine = %tool,
                operation,
                status = %output.status,
                stderr = %invocation.stderr.trim(),
                "Engine failed: {e}"
            );
            return Err(EngineFailure::ran(e, invocation));
        }

        if let Some(path) = call.task.output() {
            if !path.is_file() {
                tracing::warn!(invocation = %id, engine = %tool, operation, "Engine exited cleanly without writing output");
                let e = Error::engine(EngineErrorKind::Crashed, tool.name(), "no output produced");
                return Err(EngineFailure::ran(e, invocation));
            }
        }

        tracing::debug!(invocation = %id, engine = %tool, operation, elapsed = ?invocation.elapsed, "Engine finished");
        Ok(invocation)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::engine::EngineTask;
    use crate::tools::Tool;
    use mf_core::{ErrorKind, ResourceLimits};
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    /// Install a shell script standing in for `magick`.
    fn fake_magick(dir: &Path, body: &str) -> CliEngine {
        let script = dir.join("magick");
        std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        CliEngine::new(Arc::new(ToolRegistry::with_paths([(Tool::Magick, script)])))
    }

    fn call(task: EngineTask) -> EngineCall {
        EngineCall::new(
            task,
            ResourceLimits::default(),
            Instant::now() + Duration::from_secs(10),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn records_arguments_and_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let engine = fake_magick(dir.path(), "printf '3\\n3\\n3\\n'");
        let inv = engine
            .invoke(call(EngineTask::CountPages {
                input: PathBuf::from("/w/input.pdf"),
            }))
            .await
            .unwrap();

        assert_eq!(inv.engine, "magick");
        assert_eq!(inv.operation, "count-pages");
        assert_eq!(inv.exit_code, Some(0));
        assert_eq!(inv.stdout_last_line(), Some("3"));
        assert!(inv.args.contains(&"pdf:/w/input.pdf".to_string()));
    }

    #[tokio::test]
    async fn missing_tool_is_engine_not_found() {
        let engine = CliEngine::new(Arc::new(ToolRegistry::default()));
        let err = engine
            .invoke(call(EngineTask::ResolveFont {
                family: "DejaVu Sans".into(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EngineNotFound);
    }

    #[tokio::test]
    async fn exhaustion_is_classified() {
        let dir = tempfile::tempdir().unwrap();
        let engine = fake_magick(
            dir.path(),
            "echo 'magick: cache resources exhausted' >&2; exit 1",
        );
        let err = engine
            .invoke(call(EngineTask::CountPages {
                input: PathBuf::from("/w/input.pdf"),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExceeded);
    }

    #[tokio::test]
    async fn failed_run_keeps_exit_status_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let engine = fake_magick(dir.path(), "echo 'no decode delegate' >&2; exit 3");
        let failure = engine
            .invoke(call(EngineTask::CountPages {
                input: PathBuf::from("/w/input.pdf"),
            }))
            .await
            .unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::EngineCrashed);

        let inv = failure.invocation.expect("tool ran to an exit");
        assert_eq!(inv.operation, "count-pages");
        assert_eq!(inv.exit_code, Some(3));
        assert!(inv.stderr.contains("no decode delegate"));
    }

    #[tokio::test]
    async fn missing_tool_has_no_run_on_record() {
        let engine = CliEngine::new(Arc::new(ToolRegistry::default()));
        let failure = engine
            .invoke(call(EngineTask::ResolveFont {
                family: "DejaVu Sans".into(),
            }))
            .await
            .unwrap_err();
        assert!(failure.invocation.is_none());
    }

    #[tokio::test]
    async fn clean_exit_without_output_is_crashed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = fake_magick(dir.path(), "exit 0");
        let err = engine
            .invoke(call(EngineTask::RasterizePage {
                input: dir.path().join("input.pdf"),
                page: 0,
                dpi: 72,
                output: dir.path().join("page-0001.png"),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EngineCrashed);
        assert!(err.to_string().contains("no output produced"));
        assert_eq!(err.invocation.map(|i| i.exit_code), Some(Some(0)));
    }
}
