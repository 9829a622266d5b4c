use glam::DVec3;

use crate::types::{BoundingBox, Tile};

/// Default template for building tile paths from tile indices.
pub const DEFAULT_TILE_PATH_FORMAT: &str = "{zoom}/{xi}/{yi}/{zi}";

/// A cubic octree tile system: the mapping between integer tile indices and
/// the nominal bounding box of each tile, plus the tile naming scheme.
#[derive(Debug, Clone)]
pub struct TileSystem {
    /// Minimum corner of the (0,0,0) tile at every zoom level.
    ///
    /// Placing the origin at (or just below) the minimum corner of the
    /// source geometry keeps tile indices small and positive. Negative
    /// indices work, but geometry bracketing the origin forces low-zoom
    /// tiles to split sub-optimally.
    pub origin: DVec3,
    /// Width of the cubic tiles at zoom level 0. Each zoom level halves
    /// the width.
    pub scale: f64,
    /// Format template with `{zoom}`, `{xi}`, `{yi}`, `{zi}` placeholders.
    pub path_format: String,
}

impl TileSystem {
    pub fn new(origin: DVec3, scale: f64, path_format: &str) -> Self {
        Self {
            origin,
            scale,
            path_format: path_format.to_owned(),
        }
    }

    /// Path fragment for a tile, built from the template.
    pub fn path(&self, tile: &Tile) -> String {
        self.path_format
            .replace("{zoom}", &tile.zoom.to_string())
            .replace("{xi}", &tile.xi.to_string())
            .replace("{yi}", &tile.yi.to_string())
            .replace("{zi}", &tile.zi.to_string())
    }

    /// Width of the cubic tiles at the given zoom level.
    pub fn zoom_scale(&self, zoom: u32) -> f64 {
        self.scale / 2f64.powi(zoom as i32)
    }

    /// Nominal bounding box for a tile.
    ///
    /// A tile's actual geometry content can extend outside this volume
    /// (cropping is by face centroid), so 3D Tiles bounding volumes must be
    /// recomputed from the cropped content instead.
    pub fn bounding_box(&self, tile: &Tile) -> BoundingBox {
        let side = self.zoom_scale(tile.zoom);
        let idx = DVec3::new(tile.xi as f64, tile.yi as f64, tile.zi as f64);
        let min = self.origin + side * idx;
        BoundingBox::new(min, min + DVec3::splat(side))
    }

    /// Index vector of the tile containing `point` at the given zoom level,
    /// flooring toward negative infinity on each axis.
    pub fn index_for_point(&self, point: DVec3, zoom: u32) -> [i64; 3] {
        let scaled = (point - self.origin) / self.zoom_scale(zoom);
        [
            scaled.x.floor() as i64,
            scaled.y.floor() as i64,
            scaled.z.floor() as i64,
        ]
    }

    /// The eight children of a tile at the next zoom level.
    pub fn children(&self, tile: &Tile) -> impl Iterator<Item = Tile> + use<> {
        let base = (tile.zoom + 1, 2 * tile.xi, 2 * tile.yi, 2 * tile.zi);
        (0..8u8).map(move |octant| {
            Tile::new(
                base.0,
                base.1 + i64::from(octant & 1),
                base.2 + i64::from((octant >> 1) & 1),
                base.3 + i64::from((octant >> 2) & 1),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system() -> TileSystem {
        TileSystem::new(
            DVec3::new(-1.0, -1.0, -1.0),
            2.0,
            DEFAULT_TILE_PATH_FORMAT,
        )
    }

    #[test]
    fn zoom_scale_halves_per_level() {
        let ts = system();
        assert_eq!(ts.zoom_scale(0), 2.0);
        assert_eq!(ts.zoom_scale(1), 1.0);
        assert_eq!(ts.zoom_scale(3), 0.25);
    }

    #[test]
    fn path_from_template() {
        let ts = system();
        assert_eq!(ts.path(&Tile::new(2, 3, 0, 1)), "2/3/0/1");

        let ts = TileSystem::new(DVec3::ZERO, 1.0, "z{zoom}_x{xi}_y{yi}_z{zi}");
        assert_eq!(ts.path(&Tile::new(1, 0, 1, 0)), "z1_x0_y1_z0");
    }

    #[test]
    fn bounding_box_of_root_tile() {
        let ts = system();
        let bb = ts.bounding_box(&Tile::new(0, 0, 0, 0));
        assert_eq!(bb.min, DVec3::new(-1.0, -1.0, -1.0));
        assert_eq!(bb.max, DVec3::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn bounding_box_at_zoom_one() {
        let ts = system();
        let bb = ts.bounding_box(&Tile::new(1, 1, 0, 0));
        assert_eq!(bb.min, DVec3::new(0.0, -1.0, -1.0));
        assert_eq!(bb.max, DVec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn index_round_trips_through_bounding_box() {
        let ts = system();
        for tile in [Tile::new(0, 0, 0, 0), Tile::new(2, 1, 3, 2), Tile::new(3, 0, 7, 5)] {
            let bb = ts.bounding_box(&tile);
            let interior = bb.center();
            assert_eq!(
                ts.index_for_point(interior, tile.zoom),
                [tile.xi, tile.yi, tile.zi]
            );
            // Min corner belongs to the tile, max corner to the neighbour
            assert_eq!(
                ts.index_for_point(bb.min, tile.zoom),
                [tile.xi, tile.yi, tile.zi]
            );
            assert_eq!(
                ts.index_for_point(bb.max, tile.zoom),
                [tile.xi + 1, tile.yi + 1, tile.zi + 1]
            );
        }
    }

    #[test]
    fn index_floors_toward_negative_infinity() {
        let ts = TileSystem::new(DVec3::ZERO, 1.0, DEFAULT_TILE_PATH_FORMAT);
        assert_eq!(
            ts.index_for_point(DVec3::new(-0.25, 0.25, -1.5), 0),
            [-1, 0, -2]
        );
    }

    #[test]
    fn children_tile_the_parent() {
        let ts = system();
        let parent = Tile::new(1, 1, 0, 1);
        let children: Vec<Tile> = ts.children(&parent).collect();
        assert_eq!(children.len(), 8);

        let parent_bb = ts.bounding_box(&parent);
        for child in &children {
            assert_eq!(child.zoom, 2);
            let bb = ts.bounding_box(child);
            // Child boxes nest inside the parent box
            assert!(parent_bb.contains(bb.min));
            assert!(bb.max.x <= parent_bb.max.x + 1e-12);
            assert!(bb.max.y <= parent_bb.max.y + 1e-12);
            assert!(bb.max.z <= parent_bb.max.z + 1e-12);
        }

        // Pairwise disjoint under half-open semantics: each child center is
        // inside exactly one child box
        for child in &children {
            let center = ts.bounding_box(child).center();
            let containing = children
                .iter()
                .filter(|c| ts.bounding_box(c).contains(center))
                .count();
            assert_eq!(containing, 1);
        }

        // Indices are 2*parent + {0,1}
        for child in &children {
            assert!(child.xi == 2 * parent.xi || child.xi == 2 * parent.xi + 1);
            assert!(child.yi == 2 * parent.yi || child.yi == 2 * parent.yi + 1);
            assert!(child.zi == 2 * parent.zi || child.zi == 2 * parent.zi + 1);
        }
    }

    #[test]
    fn boundary_points_belong_to_one_tile() {
        let ts = system();
        // A point exactly on the shared face between (0,0,0) and (1,0,0)
        // at zoom 1 belongs to the higher tile only.
        let boundary = DVec3::new(0.0, -0.5, -0.5);
        assert_eq!(ts.index_for_point(boundary, 1), [1, 0, 0]);
        assert!(!ts.bounding_box(&Tile::new(1, 0, 0, 0)).contains(boundary));
        assert!(ts.bounding_box(&Tile::new(1, 1, 0, 0)).contains(boundary));
    }
}
