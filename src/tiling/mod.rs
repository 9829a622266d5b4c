pub mod generator;
pub mod tile_system;
pub mod tileset;
pub mod tools;

pub use generator::TileGenerator;
pub use tile_system::{DEFAULT_TILE_PATH_FORMAT, TileSystem};
pub use tileset::{TileMeta, Tileset};
pub use tools::{AtlasRepacker, CommandContainerWriter, CommandRepacker, ContainerWriter};
