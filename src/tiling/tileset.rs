use serde::Serialize;

/// Arbitrary big value for the 3D Tiles `geometricError` property, used
/// where a tile must always be rendered.
pub const BIG_GEOMETRIC_ERROR: f64 = 100.0;

/// The tileset manifest written to `tileset.json`.
///
/// <https://github.com/CesiumGS/3d-tiles/tree/1.0/specification#tileset-json>
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tileset {
    pub asset: Asset,
    /// The error, in meters, introduced if the tileset is not rendered.
    pub geometric_error: f64,
    pub root: TileMeta,
}

/// Metadata about the entire tileset.
#[derive(Debug, Clone, Serialize)]
pub struct Asset {
    /// The 3D Tiles version defining the manifest schema and the base set
    /// of tile formats.
    pub version: String,
}

/// Specifies how children refine their parent when traversing the tileset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Refine {
    #[serde(rename = "ADD")]
    Add,
    #[serde(rename = "REPLACE")]
    Replace,
}

/// One node of the tileset manifest tree.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TileMeta {
    pub bounding_volume: BoundingVolume,
    /// The error, in meters, introduced if this tile is rendered and its
    /// children are not.
    pub geometric_error: f64,
    pub refine: Refine,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<TileContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TileMeta>>,
}

impl TileMeta {
    /// Count the nodes in this subtree that carry content.
    pub fn content_count(&self) -> usize {
        let own = usize::from(self.content.is_some());
        own + self
            .children
            .iter()
            .flatten()
            .map(TileMeta::content_count)
            .sum::<usize>()
    }
}

/// An oriented bounding box: center followed by three half-axis vectors,
/// twelve numbers total.
#[derive(Debug, Clone, Serialize)]
pub struct BoundingVolume {
    #[serde(rename = "box")]
    pub obb: [f64; 12],
}

/// Link to a tile's content, relative to the manifest file.
#[derive(Debug, Clone, Serialize)]
pub struct TileContent {
    pub uri: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(uri: Option<&str>) -> TileMeta {
        TileMeta {
            bounding_volume: BoundingVolume {
                obb: [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            },
            geometric_error: 0.5,
            refine: Refine::Replace,
            content: uri.map(|u| TileContent { uri: u.to_owned() }),
            children: None,
        }
    }

    #[test]
    fn serializes_camel_case_fields() {
        let tileset = Tileset {
            asset: Asset {
                version: "1.0".into(),
            },
            geometric_error: BIG_GEOMETRIC_ERROR,
            root: leaf(Some("0/0/0/0.b3dm")),
        };

        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&tileset).unwrap()).unwrap();

        assert_eq!(json["asset"]["version"], "1.0");
        assert_eq!(json["geometricError"], 100.0);
        assert_eq!(json["root"]["refine"], "REPLACE");
        assert_eq!(json["root"]["content"]["uri"], "0/0/0/0.b3dm");
        assert_eq!(
            json["root"]["boundingVolume"]["box"]
                .as_array()
                .unwrap()
                .len(),
            12
        );
    }

    #[test]
    fn omits_absent_content_and_children() {
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&leaf(None)).unwrap()).unwrap();
        assert!(json.get("content").is_none());
        assert!(json.get("children").is_none());
    }

    #[test]
    fn content_count_walks_the_tree() {
        let mut root = leaf(None);
        root.children = Some(vec![leaf(Some("a.b3dm")), leaf(Some("b.b3dm"))]);
        assert_eq!(root.content_count(), 2);

        let mut deep = leaf(Some("c.b3dm"));
        deep.children = Some(vec![root]);
        assert_eq!(deep.content_count(), 3);
    }
}
