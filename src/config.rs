use std::path::PathBuf;

use clap::Parser;

/// Default size hint for tile texture images, in texels per side.
pub const DEFAULT_TARGET_TEXELS_PER_TILE: u32 = 512;

/// Fully resolved tiler configuration (constructed from CLI args).
#[derive(Debug, Clone)]
pub struct TilerConfig {
    pub in_mesh: PathBuf,
    pub out_dir: PathBuf,
    pub image_size: u32,
    pub debug_glb: bool,
    pub debug_tileset: bool,
    pub verbose: bool,
}

impl Default for TilerConfig {
    fn default() -> Self {
        Self {
            in_mesh: PathBuf::new(),
            out_dir: PathBuf::new(),
            image_size: DEFAULT_TARGET_TEXELS_PER_TILE,
            debug_glb: false,
            debug_tileset: false,
            verbose: false,
        }
    }
}

/// CLI argument definition (clap derive).
#[derive(Parser, Debug)]
#[command(
    name = "mesh-tiler",
    about = "Textured OBJ mesh to streamable 3D Tiles converter",
    version
)]
pub struct CliArgs {
    /// Input OBJ file
    pub in_mesh: PathBuf,

    /// Output directory for the tile set
    pub out_dir: PathBuf,

    /// Desired resolution hint for tile texture images
    #[arg(short = 's', long = "image-size", default_value_t = DEFAULT_TARGET_TEXELS_PER_TILE)]
    pub image_size: u32,

    /// Also output GLB format tiles and a leaf tile listing
    #[arg(long)]
    pub debug_glb: bool,

    /// Enable tileset viewer debugging output
    #[arg(long)]
    pub debug_tileset: bool,

    /// Enable verbose logging
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl From<CliArgs> for TilerConfig {
    fn from(args: CliArgs) -> Self {
        TilerConfig {
            in_mesh: args.in_mesh,
            out_dir: args.out_dir,
            image_size: args.image_size,
            debug_glb: args.debug_glb,
            debug_tileset: args.debug_tileset,
            verbose: args.verbose,
        }
    }
}
