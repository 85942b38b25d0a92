//! Convert stage: DWG to DXF via LibreDWG's dwg2dxf.

use std::time::Duration;

use crate::error::StageError;
use crate::pipeline::{PipelineContext, ProgressSink, StageAdapter, StageKind};

use super::tool::run_tool;

pub struct ConvertStage {
    dwg2dxf_cmd: String,
    timeout: Duration,
}

impl ConvertStage {
    pub fn new(dwg2dxf_cmd: impl Into<String>, timeout: Duration) -> Self {
        Self {
            dwg2dxf_cmd: dwg2dxf_cmd.into(),
            timeout,
        }
    }
}

impl StageAdapter for ConvertStage {
    fn kind(&self) -> StageKind {
        StageKind::Convert
    }

    fn execute(
        &self,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressSink,
    ) -> Result<(), StageError> {
        let stem = ctx
            .dwg_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "drawing".to_string());
        let dxf_path = ctx.job_dir.join(format!("{stem}.dxf"));

        let args = vec![
            "-y".to_string(),
            "-o".to_string(),
            dxf_path.display().to_string(),
            ctx.dwg_path.display().to_string(),
        ];
        run_tool(&self.dwg2dxf_cmd, &args, self.timeout)?;

        // dwg2dxf can exit 0 on drawings it silently gave up on.
        let produced = dxf_path
            .metadata()
            .map(|m| m.len() > 0)
            .unwrap_or(false);
        if !produced {
            return Err(StageError::MissingOutput(dxf_path));
        }

        progress.report(1.0, "DXF conversion finished");
        ctx.dxf_path = Some(dxf_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::pipeline::NoopProgress;

    fn ctx_in(dir: &std::path::Path) -> PipelineContext {
        PipelineContext::new(
            "j1",
            "plan.dwg",
            dir.join("plan.dwg"),
            dir.to_path_buf(),
        )
    }

    #[test]
    fn test_missing_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("plan.dwg"), b"not a real dwg").unwrap();
        // "true" exits 0 without writing anything.
        let stage = ConvertStage::new("true", Duration::from_secs(5));
        let err = stage.execute(&mut ctx_in(dir.path()), &NoopProgress).unwrap_err();
        assert!(matches!(err, StageError::MissingOutput(_)));
    }

    #[test]
    fn test_successful_conversion_records_dxf_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("plan.dwg"), b"dwg bytes").unwrap();
        // Fake converter: writes the -o target, ignoring the input.
        let script = dir.path().join("fake-dwg2dxf.sh");
        std::fs::write(&script, "#!/bin/sh\nshift\nshift\necho '0\\nSECTION' > \"$1\"\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let stage = ConvertStage::new(script.display().to_string(), Duration::from_secs(5));
        let mut ctx = ctx_in(dir.path());
        stage.execute(&mut ctx, &NoopProgress).unwrap();
        assert_eq!(ctx.dxf_path, Some(dir.path().join("plan.dxf")));
        assert!(ctx.dxf_path.as_ref().unwrap().exists());
    }

    #[test]
    fn test_spawn_failure_propagates() {
        let stage = ConvertStage::new("no-such-converter", Duration::from_secs(1));
        let mut ctx = ctx_in(&PathBuf::from("/tmp"));
        let err = stage.execute(&mut ctx, &NoopProgress).unwrap_err();
        assert!(matches!(err, StageError::ToolSpawn { .. }));
    }
}
