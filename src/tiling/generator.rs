use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use glam::{DMat3, DVec3};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::error::{Result, TilerError};
use crate::imaging::ImageOps;
use crate::mesh::{Geometry, abs_path_from_file, rel_path_from_file};
use crate::tiling::tile_system::TileSystem;
use crate::tiling::tileset::{
    Asset, BIG_GEOMETRIC_ERROR, BoundingVolume, Refine, TileContent, TileMeta, Tileset,
};
use crate::tiling::tools::{AtlasRepacker, ContainerFormat, ContainerWriter};
use crate::types::Tile;

/// Upsampling factor applied to every source texture before repacking.
///
/// The repacker's own pixel resampling is crude; upsampling first and
/// downsampling afterwards moves the resampling work into the imaging
/// backend. Raising this toward 3.0 gives a noticeable quality improvement,
/// but the repacker's image loader cannot handle inputs much past 1 GB in
/// memory, so 1.0 is the safe setting while 8192x8192 source textures are
/// in play.
pub const UPSAMPLE_FACTOR: f64 = 1.0;

/// A tile is a leaf once its effective scale factor is within this margin
/// of full source resolution; round-off keeps the computed factor from
/// landing on exactly 1.0.
const FULL_RES_EPSILON: f64 = 1e-3;

/// Z-up to Y-up rotation: (x, y, z) -> (x, z, -y).
const Z_UP_TO_Y_UP: DMat3 = DMat3::from_cols(
    DVec3::new(1.0, 0.0, 0.0),
    DVec3::new(0.0, 0.0, -1.0),
    DVec3::new(0.0, 1.0, 0.0),
);

/// Y-up to Z-up rotation, inverse of [`Z_UP_TO_Y_UP`].
const Y_UP_TO_Z_UP: DMat3 = DMat3::from_cols(
    DVec3::new(1.0, 0.0, 0.0),
    DVec3::new(0.0, 0.0, 1.0),
    DVec3::new(0.0, -1.0, 0.0),
);

/// Scratch directory removed on every exit path, normal return or error.
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create(path: PathBuf) -> Result<Self> {
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            warn!(path = %self.path.display(), "failed to remove scratch directory: {e}");
        }
    }
}

/// Append a suffix to a path's file name, keeping the directory.
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Generates a streamable 3D Tiles tile set from a [`Geometry`].
///
/// Owns the scratch state for a single [`generate`](Self::generate) call:
/// derived paths, the upsampled-texture table, and the source texel size.
/// Nothing persists across calls.
pub struct TileGenerator<'a> {
    /// Output directory holding the `build` scratch area and the installed
    /// `tiles` tree.
    out_path: PathBuf,
    tile_system: TileSystem,
    /// Zoom level of the top tiles that carry actual geometry.
    min_zoom: u32,
    /// Size hint for the width and height of each tile's texture image.
    /// Corner cases can produce larger or smaller images.
    target_texels_per_tile: u32,
    /// Also emit GLB-format tiles and a leaf tile listing.
    debug_glb: bool,
    repacker: &'a dyn AtlasRepacker,
    writer: &'a dyn ContainerWriter,
    images: &'a dyn ImageOps,
    /// Original texture image path (as referenced by the source MTL) to the
    /// absolute path of its upsampled copy in the build area.
    up_texture_map: BTreeMap<String, PathBuf>,
    /// Median source texel size in mesh units (meters per texel for
    /// geometry authored in meters).
    input_texel_size: f64,
    /// Relative paths of leaf GLB tiles, collected when `debug_glb` is on.
    leaf_tiles: Vec<String>,
}

impl<'a> TileGenerator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        out_path: &Path,
        tile_system: TileSystem,
        min_zoom: u32,
        target_texels_per_tile: u32,
        debug_glb: bool,
        repacker: &'a dyn AtlasRepacker,
        writer: &'a dyn ContainerWriter,
        images: &'a dyn ImageOps,
    ) -> Self {
        Self {
            out_path: out_path.to_path_buf(),
            tile_system,
            min_zoom,
            target_texels_per_tile,
            debug_glb,
            repacker,
            writer,
            images,
            up_texture_map: BTreeMap::new(),
            input_texel_size: 0.0,
            leaf_tiles: Vec::new(),
        }
    }

    /// Output a 3D Tiles tile set for the given geometry. This is the main
    /// driver function; the returned manifest has also been written to
    /// `<out>/tiles/tileset.json`.
    pub fn generate(&mut self, geom: &Geometry) -> Result<Tileset> {
        self.input_texel_size = geom.median_texel_size()?;
        info!(
            texel_size = self.input_texel_size,
            "estimated source texel size"
        );

        let _scratch = ScratchDir::create(self.build_path())?;
        self.upsample_textures(geom)?;

        let children = self.generate_top_tiles(geom)?;

        let tileset = Tileset {
            asset: Asset {
                version: "1.0".into(),
            },
            geometric_error: BIG_GEOMETRIC_ERROR,
            root: TileMeta {
                bounding_volume: BoundingVolume {
                    obb: geom.bounding_volume(),
                },
                geometric_error: BIG_GEOMETRIC_ERROR,
                refine: Refine::Replace,
                content: None,
                children: Some(children),
            },
        };

        let tileset_path = self.tileset_path();
        let json = serde_json::to_string_pretty(&tileset)
            .map_err(|e| TilerError::Io(io::Error::other(e)))?;
        fs::write(&tileset_path, json)?;
        self.install_file(&tileset_path)?;

        if self.debug_glb {
            let list_path = self.build_path().join("leaf_tiles.txt");
            fs::write(&list_path, self.leaf_tiles.join("\n") + "\n")?;
            self.install_file(&list_path)?;
        }

        Ok(tileset)
    }

    fn build_path(&self) -> PathBuf {
        self.out_path.join("build")
    }

    fn tiles_path(&self) -> PathBuf {
        self.out_path.join("tiles")
    }

    fn tileset_path(&self) -> PathBuf {
        self.build_path().join("tileset.json")
    }

    /// Base path (no extension) for a tile's final output in the build area.
    fn tile_base(&self, tile: &Tile) -> PathBuf {
        self.build_path().join(self.tile_system.path(tile))
    }

    fn crop_base(&self, tile: &Tile) -> PathBuf {
        with_suffix(&self.tile_base(tile), "_crop")
    }

    fn repack_base(&self, tile: &Tile) -> PathBuf {
        with_suffix(&self.tile_base(tile), "_repack")
    }

    fn downsample_base(&self, tile: &Tile) -> PathBuf {
        with_suffix(&self.tile_base(tile), "_downsample")
    }

    /// Copy each source texture into the build area, scaled by
    /// [`UPSAMPLE_FACTOR`], before any per-tile work. Per-tile MTL rewrites
    /// consult the resulting table.
    fn upsample_textures(&mut self, geom: &Geometry) -> Result<()> {
        let Some(mtllib) = &geom.mtllib else {
            return Ok(());
        };
        let build = self.build_path();
        let images = self.images;

        let sources: BTreeSet<String> = mtllib
            .materials
            .values()
            .map(|b| b.image_path.clone())
            .collect();

        let upsampled: Vec<(String, PathBuf)> = sources
            .into_iter()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|image_path| {
                let full_input = abs_path_from_file(&image_path, &mtllib.input_path);
                let stem = Path::new(&image_path)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let output = build.join(format!("up_{stem}.png"));
                images.resize_scale(UPSAMPLE_FACTOR, &full_input, &output)?;
                Ok((image_path, output))
            })
            .collect::<Result<_>>()?;

        self.up_texture_map.extend(upsampled);
        Ok(())
    }

    /// Generate the top tiles that contain actual geometry: every tile at
    /// `min_zoom` whose index lies in the integer box covering the
    /// geometry's bounds. All of them become children of a content-less
    /// synthetic root.
    fn generate_top_tiles(&mut self, geom: &Geometry) -> Result<Vec<TileMeta>> {
        let bbox = geom.bounding_box();
        let min_idx = self.tile_system.index_for_point(bbox.min, self.min_zoom);
        let max_idx = self.tile_system.index_for_point(bbox.max, self.min_zoom);

        let mut children = Vec::new();
        for xi in min_idx[0]..=max_idx[0] {
            for yi in min_idx[1]..=max_idx[1] {
                for zi in min_idx[2]..=max_idx[2] {
                    let tile = Tile::new(self.min_zoom, xi, yi, zi);
                    if let Some(meta) =
                        self.generate_tile(geom, &tile, true, BIG_GEOMETRIC_ERROR)?
                    {
                        children.push(meta);
                    }
                }
            }
        }
        Ok(children)
    }

    /// Generate one tile, recursing into its children while the texture
    /// budget still calls for refinement. Returns `None` when the tile's
    /// crop holds no geometry.
    fn generate_tile(
        &mut self,
        parent_geom: &Geometry,
        tile: &Tile,
        is_top: bool,
        parent_max_error: f64,
    ) -> Result<Option<TileMeta>> {
        info!(%tile, "generate_tile");

        let geom = parent_geom.cropped(&self.tile_system.bounding_box(tile));
        if geom.is_empty() {
            return Ok(None);
        }

        self.write_cropped_tile(&geom, tile)?;
        self.repack_texture(tile)?;

        // If cropping discarded nothing, splitting further will not help:
        // the tile holds faces too large for centroid cropping to shed, and
        // the recursion would never bottom out. Force full resolution at
        // this zoom level instead.
        let force_full_res = !is_top && parent_geom.face_count() == geom.face_count();

        let scale_factor = self.downsample_texture(tile, force_full_res)?;
        self.convert_to_b3dm(tile)?;
        let debug_glb_path = if self.debug_glb {
            Some(self.convert_to_glb(tile)?)
        } else {
            None
        };

        let b3dm_path = self.tile_base(tile).with_extension("b3dm");
        let uri = rel_path_from_file(&b3dm_path, &self.tileset_path())
            .to_string_lossy()
            .into_owned();

        // The 3D Tiles geometricError of a tile is the maximum error
        // incurred by *not* loading it, i.e. the error of the parent
        // content this tile replaces.
        let mut meta = TileMeta {
            bounding_volume: BoundingVolume {
                obb: geom.bounding_volume(),
            },
            geometric_error: parent_max_error,
            refine: Refine::Replace,
            content: Some(TileContent { uri }),
            children: None,
        };

        // Mesh geometry is identical at every zoom level; only texture
        // resolution differs, so the max error at a zoom level is the
        // physical size of one of its texels.
        let max_error = self.input_texel_size / scale_factor;

        if scale_factor > 1.0 - FULL_RES_EPSILON {
            // Full source resolution reached: leaf tile.
            if let Some(glb_path) = debug_glb_path {
                let list_path = self.build_path().join("leaf_tiles.txt");
                self.leaf_tiles.push(
                    rel_path_from_file(&glb_path, &list_path)
                        .to_string_lossy()
                        .into_owned(),
                );
            }
            return Ok(Some(meta));
        }

        let mut children = Vec::new();
        for child in self.tile_system.children(tile).collect::<Vec<_>>() {
            if let Some(child_meta) = self.generate_tile(&geom, &child, false, max_error)? {
                children.push(child_meta);
            }
        }
        meta.children = Some(children);
        Ok(Some(meta))
    }

    /// Write the cropped tile: modified OBJ and MTL referencing the
    /// upsampled texture images through per-tile relative paths.
    fn write_cropped_tile(&self, geom: &Geometry, tile: &Tile) -> Result<()> {
        let crop_obj = self.crop_base(tile).with_extension("obj");
        if let Some(dir) = crop_obj.parent() {
            fs::create_dir_all(dir)?;
        }

        let mut texture_map = BTreeMap::new();
        for (original, upsampled) in &self.up_texture_map {
            texture_map.insert(
                original.clone(),
                rel_path_from_file(upsampled, &crop_obj)
                    .to_string_lossy()
                    .into_owned(),
            );
        }

        // The source geometry is Z-up but glTF specifies Y-up, and the
        // b3dm payload is wrapped binary glTF. 3D Tiles itself is Z-up and
        // applies the inverse rotation to glTF content on load, so
        // rotating here lands the rendered geometry back where it was
        // authored.
        let tf_geom = geom.rotated(Z_UP_TO_Y_UP);
        tf_geom.write(&crop_obj, &texture_map)
    }

    /// Repack the cropped tile's texture images into a single atlas via the
    /// external repacker, run from the tile's build directory.
    fn repack_texture(&self, tile: &Tile) -> Result<()> {
        let crop_base = self.crop_base(tile);
        let repack_base = self.repack_base(tile);
        let work_dir = crop_base
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let input_obj = format!("{}.obj", file_name(&crop_base));
        self.repacker
            .repack(&work_dir, &input_obj, &file_name(&repack_base))
    }

    /// Downsample the repacked atlas and write a mesh pointing at it.
    /// Returns the effective scale factor of the whole chain from original
    /// source image to final downsampled image.
    fn downsample_texture(&self, tile: &Tile, force_full_res: bool) -> Result<f64> {
        let repack_base = self.repack_base(tile);
        let downsample_base = self.downsample_base(tile);

        let repack_image = repack_base.with_extension("png");
        let downsample_image = downsample_base.with_extension("jpg");

        let scale_factor = if force_full_res {
            let factor = 1.0 / UPSAMPLE_FACTOR;
            self.images
                .resize_scale(factor, &repack_image, &downsample_image)?;
            factor
        } else {
            let target = self.target_texels_per_tile;
            self.images.resize_to(
                (target, target),
                &repack_image,
                &downsample_image,
                Some(1.0 / UPSAMPLE_FACTOR),
            )?
        };

        let repack_geom = Geometry::read(&repack_base.with_extension("obj"), self.images)?;
        let Some(mtllib) = &repack_geom.mtllib else {
            return Err(TilerError::MalformedMaterial(format!(
                "{}: repacked mesh has no material library",
                repack_base.display()
            )));
        };
        let mut bindings = mtllib.materials.values();
        let (Some(binding), None) = (bindings.next(), bindings.next()) else {
            return Err(TilerError::MalformedMaterial(format!(
                "{}: repacked mesh must bind exactly one material image",
                repack_base.display()
            )));
        };

        let mut texture_map = BTreeMap::new();
        texture_map.insert(binding.image_path.clone(), file_name(&downsample_image));
        repack_geom.write(&downsample_base.with_extension("obj"), &texture_map)?;

        Ok(scale_factor * UPSAMPLE_FACTOR)
    }

    /// Convert the downsampled mesh into the final b3dm container and
    /// install it under the tiles directory.
    fn convert_to_b3dm(&self, tile: &Tile) -> Result<()> {
        let b3dm = self.writer.convert(
            ContainerFormat::B3dm,
            &self.downsample_base(tile),
            &self.tile_base(tile),
        )?;
        self.install_file(&b3dm)?;
        Ok(())
    }

    /// Debug only: convert the downsampled mesh to GLB as well. The GLB is
    /// inspected Z-up, so the Y-up rotation applied for the container
    /// pipeline is undone first.
    fn convert_to_glb(&self, tile: &Tile) -> Result<PathBuf> {
        let downsample_base = self.downsample_base(tile);
        let geom = Geometry::read(&downsample_base.with_extension("obj"), self.images)?;

        let unrot_base = with_suffix(&downsample_base, "_unrot");
        let unrot_geom = geom.rotated(Y_UP_TO_Z_UP);
        unrot_geom.write(&unrot_base.with_extension("obj"), &BTreeMap::new())?;

        let glb = self
            .writer
            .convert(ContainerFormat::Glb, &unrot_base, &self.tile_base(tile))?;
        self.install_file(&glb)?;
        Ok(glb)
    }

    /// Copy a file from the build area to the corresponding location under
    /// the output tiles directory.
    fn install_file(&self, build_path: &Path) -> Result<PathBuf> {
        let suffix = build_path.strip_prefix(self.build_path()).map_err(|_| {
            TilerError::Io(io::Error::other(format!(
                "{} is not inside the build directory",
                build_path.display()
            )))
        })?;
        let install_path = self.tiles_path().join(suffix);
        if let Some(dir) = install_path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::copy(build_path, &install_path)?;
        Ok(install_path)
    }
}
