use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Result, TilerError};
use crate::imaging::ImageOps;
use crate::mesh::{abs_path_from_file, absolute_path};

/// Diffuse texture image bound to a material by a `map_Kd` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterialBinding {
    /// Image path exactly as written in the MTL file (usually relative).
    pub image_path: String,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
}

/// The OBJ format's MTL companion file.
///
/// Only diffuse texture bindings are surfaced, since the tiler needs them
/// for the upsample/repack/downsample chain and for texel-size estimation.
/// The original line sequence is retained so every other directive is
/// re-emitted unchanged when a modified MTL is written.
#[derive(Debug, Clone)]
pub struct MaterialLibrary {
    /// Absolute path the MTL file was read from; relative image paths
    /// resolve against its directory.
    pub input_path: PathBuf,
    /// Material name to texture binding. Ordered for deterministic
    /// iteration.
    pub materials: BTreeMap<String, MaterialBinding>,
    /// Unmodified lines of the source file, in order.
    pub lines: Vec<String>,
}

/// Split a directive line into (command, argument). The argument is the
/// whitespace-trimmed remainder of the line, so it may contain spaces.
/// Returns `None` for blank lines, comments, and bare commands.
fn split_directive(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let (cmd, rest) = trimmed.split_once(char::is_whitespace)?;
    let arg = rest.trim();
    if arg.is_empty() { None } else { Some((cmd, arg)) }
}

impl MaterialLibrary {
    /// Parse an MTL file. Each bound texture image is opened to read its
    /// resolution, which downstream texel-size math depends on.
    pub fn read(path: &Path, images: &dyn ImageOps) -> Result<Self> {
        let input_path = absolute_path(path)?;
        info!(path = %input_path.display(), "reading material library");

        let text = fs::read_to_string(&input_path)?;
        let lines: Vec<String> = text.lines().map(str::to_owned).collect();

        let mut materials = BTreeMap::new();
        let mut current: Option<String> = None;

        for line in &lines {
            let mut tokens = line.split_whitespace();
            if tokens.next() == Some("newmtl") && tokens.next().is_none() {
                return Err(TilerError::MalformedMaterial(format!(
                    "{}: newmtl without a material name",
                    input_path.display()
                )));
            }
            let Some((cmd, arg)) = split_directive(line) else {
                continue;
            };

            match cmd {
                "newmtl" => current = Some(arg.to_owned()),
                "map_Kd" => {
                    let name = current.clone().ok_or_else(|| {
                        TilerError::MalformedMaterial(format!(
                            "{}: map_Kd before any newmtl",
                            input_path.display()
                        ))
                    })?;
                    let full_image_path = abs_path_from_file(arg, &input_path);
                    let (width, height) = images.dimensions(&full_image_path)?;
                    materials.insert(
                        name,
                        MaterialBinding {
                            image_path: arg.to_owned(),
                            width,
                            height,
                        },
                    );
                }
                _ => {}
            }
        }

        Ok(Self {
            input_path,
            materials,
            lines,
        })
    }

    /// Write the library to `output_path`, re-emitting the stored lines in
    /// order. Each `map_Kd` argument is looked up in `texture_map` and
    /// replaced when present; all other directives pass through verbatim.
    /// Referenced texture images must be written separately.
    pub fn write(&self, output_path: &Path, texture_map: &BTreeMap<String, String>) -> Result<()> {
        info!(path = %output_path.display(), "writing material library");

        let mut out = fs::File::create(output_path)?;
        for line in &self.lines {
            match split_directive(line) {
                Some(("map_Kd", arg)) => {
                    let image = texture_map.get(arg).map(String::as_str).unwrap_or(arg);
                    writeln!(out, "map_Kd {image}")?;
                }
                _ => writeln!(out, "{line}")?,
            }
        }
        Ok(())
    }
}
