use std::fs;
use std::time::{Duration, Instant};

use glam::DVec3;
use tracing::info;

use crate::config::TilerConfig;
use crate::error::{Result, TilerError};
use crate::imaging::{DiskImages, ImageOps};
use crate::mesh::{Geometry, absolute_path};
use crate::tiling::generator::TileGenerator;
use crate::tiling::tile_system::{DEFAULT_TILE_PATH_FORMAT, TileSystem};
use crate::tiling::tools::{
    AtlasRepacker, CommandContainerWriter, CommandRepacker, ContainerWriter,
};

/// Summary of a completed tiler run.
#[derive(Debug)]
pub struct RunSummary {
    pub tile_count: usize,
    pub duration: Duration,
}

/// Auto-configured tile system parameters.
#[derive(Debug, Clone, Copy)]
pub struct AutoConfig {
    pub origin: DVec3,
    pub scale: f64,
    pub min_zoom: u32,
}

/// Derive tile system parameters so the (0,0,0) tile at zoom level 0
/// contains the whole geometry, making a single top-level tile that holds
/// everything. The 10% inflation keeps boundary faces away from tile-edge
/// degeneracies.
///
/// The parameters could instead be read from a config file to keep the tile
/// system stable from run to run, but the auto-config is convenient.
pub fn auto_configure(geom: &Geometry) -> AutoConfig {
    let bbox = geom.bounding_box();
    let max_dim = bbox.dimensions().max_element();
    AutoConfig {
        origin: bbox.center() - DVec3::splat(0.55 * max_dim),
        scale: 1.1 * max_dim,
        min_zoom: 0,
    }
}

/// Driver: reads the source mesh, configures the tile system, and runs the
/// tile generator.
pub struct Tiler;

impl Tiler {
    /// Run the tiler with the default collaborators: the `example_repack`
    /// and `obj23dtiles` command-line tools and filesystem imaging.
    pub fn run(config: &TilerConfig) -> Result<RunSummary> {
        Self::run_with(
            config,
            &CommandRepacker::default(),
            &CommandContainerWriter::default(),
            &DiskImages,
        )
    }

    /// Run the tiler with explicit collaborators.
    pub fn run_with(
        config: &TilerConfig,
        repacker: &dyn AtlasRepacker,
        writer: &dyn ContainerWriter,
        images: &dyn ImageOps,
    ) -> Result<RunSummary> {
        let start = Instant::now();

        if config.out_dir.exists() {
            return Err(TilerError::OutputExists(
                config.out_dir.display().to_string(),
            ));
        }

        info!(input = %config.in_mesh.display(), "reading source mesh");
        let geom = Geometry::read(&config.in_mesh, images)?;

        let auto = auto_configure(&geom);
        info!(
            origin = ?auto.origin.to_array(),
            scale = auto.scale,
            min_zoom = auto.min_zoom,
            "auto-configured tile system"
        );

        let out_dir = absolute_path(&config.out_dir)?;
        fs::create_dir_all(&out_dir)?;

        if config.debug_tileset {
            info!("--debug-tileset: viewer emission is not included in this build");
        }

        let tile_system = TileSystem::new(auto.origin, auto.scale, DEFAULT_TILE_PATH_FORMAT);
        let mut generator = TileGenerator::new(
            &out_dir,
            tile_system,
            auto.min_zoom,
            config.image_size,
            config.debug_glb,
            repacker,
            writer,
            images,
        );

        let tileset = generator.generate(&geom)?;
        let tile_count = tileset.root.content_count();
        let duration = start.elapsed();
        info!(tiles = tile_count, elapsed = ?duration, "tile set complete");

        Ok(RunSummary {
            tile_count,
            duration,
        })
    }
}
