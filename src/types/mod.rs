pub mod tile;

pub use tile::{BoundingBox, Tile};
