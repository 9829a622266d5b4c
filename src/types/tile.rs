use glam::DVec3;

/// A cubic tile in the octree tile system, addressed by zoom level and
/// integer indices along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tile {
    pub zoom: u32,
    pub xi: i64,
    pub yi: i64,
    pub zi: i64,
}

impl Tile {
    pub fn new(zoom: u32, xi: i64, yi: i64, zi: i64) -> Self {
        Self { zoom, xi, yi, zi }
    }
}

impl std::fmt::Display for Tile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}/{}", self.zoom, self.xi, self.yi, self.zi)
    }
}

/// Axis-aligned bounding box in 3-D.
///
/// Containment uses half-open interval semantics `min <= p < max` on each
/// axis. Adjacent tiles at the same zoom level share boundaries, so these
/// semantics ensure every point belongs to exactly one tile per zoom level,
/// even when it falls exactly on a shared boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: DVec3,
    pub max: DVec3,
}

impl BoundingBox {
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// Centre point of the box.
    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    /// Half-extents along each axis.
    pub fn half_extents(&self) -> DVec3 {
        (self.max - self.min) * 0.5
    }

    /// Extent along each axis.
    pub fn dimensions(&self) -> DVec3 {
        self.max - self.min
    }

    /// Whether a point lies inside the box under half-open semantics:
    /// the min faces belong to the box, the max faces do not.
    pub fn contains(&self, p: DVec3) -> bool {
        self.min.x <= p.x
            && p.x < self.max.x
            && self.min.y <= p.y
            && p.y < self.max.y
            && self.min.z <= p.z
            && p.z < self.max.z
    }
}
