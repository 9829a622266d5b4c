use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::info;

use crate::error::{Result, TilerError};

/// Container formats produced by the conversion tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    B3dm,
    Glb,
}

impl ContainerFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::B3dm => "b3dm",
            ContainerFormat::Glb => "glb",
        }
    }

    fn flag(&self) -> &'static str {
        match self {
            ContainerFormat::B3dm => "--b3dm",
            ContainerFormat::Glb => "-b",
        }
    }
}

/// Collaborator that merges the texture images referenced by a mesh into a
/// single atlas.
///
/// `input_obj` and `output_base` are file names inside `work_dir`; the
/// repacker must produce `<output_base>.obj`, `<output_base>.mtl`, and
/// `<output_base>.png` there, with UVs rewritten into atlas space.
pub trait AtlasRepacker: Sync {
    fn repack(&self, work_dir: &Path, input_obj: &str, output_base: &str) -> Result<()>;
}

/// Collaborator that converts a mesh into a binary tile container, writing
/// `<output_base>.<ext>` and returning its path.
pub trait ContainerWriter: Sync {
    fn convert(
        &self,
        format: ContainerFormat,
        input_base: &Path,
        output_base: &Path,
    ) -> Result<PathBuf>;
}

/// Default repacker: shells out to `example_repack`.
pub struct CommandRepacker {
    pub program: String,
}

impl Default for CommandRepacker {
    fn default() -> Self {
        Self {
            program: "example_repack".to_owned(),
        }
    }
}

impl AtlasRepacker for CommandRepacker {
    fn repack(&self, work_dir: &Path, input_obj: &str, output_base: &str) -> Result<()> {
        // The tool resolves paths naively, so run it from the tile's build
        // directory with bare file names.
        let mut cmd = Command::new(&self.program);
        cmd.arg(input_obj).arg(output_base).current_dir(work_dir);
        run_tool(cmd, &self.program)
    }
}

/// Default container writer: shells out to `obj23dtiles`.
pub struct CommandContainerWriter {
    pub program: String,
}

impl Default for CommandContainerWriter {
    fn default() -> Self {
        Self {
            program: "obj23dtiles".to_owned(),
        }
    }
}

impl ContainerWriter for CommandContainerWriter {
    fn convert(
        &self,
        format: ContainerFormat,
        input_base: &Path,
        output_base: &Path,
    ) -> Result<PathBuf> {
        let input_obj = input_base.with_extension("obj");
        let mut cmd = Command::new(&self.program);
        cmd.arg(format.flag()).arg("-i").arg(&input_obj);
        run_tool(cmd, &self.program)?;

        // The tool does not respect an output argument; it writes next to
        // its input. Move the result where the caller asked for it.
        let produced = input_base.with_extension(format.extension());
        let target = output_base.with_extension(format.extension());
        fs::rename(&produced, &target)?;
        Ok(target)
    }
}

fn run_tool(mut cmd: Command, program: &str) -> Result<()> {
    info!(?cmd, "running external tool");
    let output = cmd
        .output()
        .map_err(|e| TilerError::ExternalToolFailed(format!("{program}: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TilerError::ExternalToolFailed(format!(
            "{program} exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}
