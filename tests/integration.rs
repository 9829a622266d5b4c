//! End-to-end integration tests.
//!
//! These tests create synthetic input files, run the full pipeline with
//! stub external tools standing in for `example_repack` and `obj23dtiles`,
//! and validate the emitted tile set.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use mesh_tiler::config::TilerConfig;
use mesh_tiler::error::{Result, TilerError};
use mesh_tiler::imaging::DiskImages;
use mesh_tiler::mesh::{Geometry, MaterialBinding, MaterialLibrary, abs_path_from_file};
use mesh_tiler::pipeline::Tiler;
use mesh_tiler::tiling::tools::{AtlasRepacker, ContainerFormat, ContainerWriter};

/// Repacker stand-in: merges the crop's materials into one by copying the
/// first referenced texture image as the atlas and rewriting the mesh to
/// bind a single material.
struct StubRepacker;

impl AtlasRepacker for StubRepacker {
    fn repack(&self, work_dir: &Path, input_obj: &str, output_base: &str) -> Result<()> {
        let geom = Geometry::read(&work_dir.join(input_obj), &DiskImages)?;
        let mtllib = geom.mtllib.as_ref().expect("crop should carry materials");
        let binding = mtllib
            .materials
            .values()
            .next()
            .expect("crop should bind at least one image");

        let atlas_name = format!("{output_base}.png");
        let source = abs_path_from_file(&binding.image_path, &mtllib.input_path);
        fs::copy(&source, work_dir.join(&atlas_name))?;

        let mut materials = BTreeMap::new();
        materials.insert(
            "atlas".to_owned(),
            MaterialBinding {
                image_path: atlas_name.clone(),
                width: binding.width,
                height: binding.height,
            },
        );
        let merged = Geometry {
            face_materials: vec![0; geom.face_count()],
            material_names: vec!["atlas".to_owned()],
            mtllib: Some(MaterialLibrary {
                input_path: work_dir.join(format!("{output_base}.mtl")),
                materials,
                lines: vec!["newmtl atlas".to_owned(), format!("map_Kd {atlas_name}")],
            }),
            ..geom
        };
        merged.write(&work_dir.join(format!("{output_base}.obj")), &BTreeMap::new())
    }
}

/// Container writer stand-in: checks its input exists and emits a marker
/// file with the requested extension.
struct StubWriter;

impl ContainerWriter for StubWriter {
    fn convert(
        &self,
        format: ContainerFormat,
        input_base: &Path,
        output_base: &Path,
    ) -> Result<PathBuf> {
        assert!(
            input_base.with_extension("obj").exists(),
            "{} should exist before conversion",
            input_base.with_extension("obj").display()
        );
        let target = output_base.with_extension(format.extension());
        fs::write(&target, format.extension())?;
        Ok(target)
    }
}

/// Write a textured n x n grid OBJ (+ MTL + PNG) in the z=0 plane.
fn write_textured_grid(dir: &Path, n: usize, image_size: u32) -> PathBuf {
    let verts = n + 1;

    let mut obj = String::from("mtllib material.mtl\n");
    for y in 0..verts {
        for x in 0..verts {
            let fx = x as f64 / n as f64;
            let fy = y as f64 / n as f64;
            obj.push_str(&format!("v {fx} {fy} 0\n"));
            obj.push_str(&format!("vt {fx} {fy}\n"));
        }
    }
    obj.push_str("usemtl textured\n");
    for y in 0..n {
        for x in 0..n {
            let tl = y * verts + x + 1;
            let tr = tl + 1;
            let bl = tl + verts;
            let br = bl + 1;
            obj.push_str(&format!("f {tl}/{tl} {bl}/{bl} {tr}/{tr}\n"));
            obj.push_str(&format!("f {tr}/{tr} {bl}/{bl} {br}/{br}\n"));
        }
    }
    fs::write(dir.join("model.obj"), &obj).unwrap();

    fs::write(
        dir.join("material.mtl"),
        "newmtl textured\nKd 0.8 0.8 0.8\nmap_Kd texture.png\n",
    )
    .unwrap();

    let img = image::RgbaImage::from_fn(image_size, image_size, |x, y| {
        if (x / 4 + y / 4) % 2 == 0 {
            image::Rgba([200, 60, 60, 255])
        } else {
            image::Rgba([60, 60, 200, 255])
        }
    });
    img.save(dir.join("texture.png")).unwrap();

    dir.join("model.obj")
}

/// Write a two-triangle mesh whose face centroids straddle x = 0.
fn write_straddling_mesh(dir: &Path, image_size: u32) -> PathBuf {
    image::RgbaImage::from_pixel(image_size, image_size, image::Rgba([90, 140, 90, 255]))
        .save(dir.join("texture.png"))
        .unwrap();
    fs::write(
        dir.join("material.mtl"),
        "newmtl textured\nmap_Kd texture.png\n",
    )
    .unwrap();
    let obj = dir.join("model.obj");
    fs::write(
        &obj,
        "mtllib material.mtl\n\
         v -0.5 -0.1 0\nv -0.25 0.2 0\nv 0 -0.1 0\nv 0.25 0.2 0\nv 0.5 -0.1 0\n\
         vt 0 0\nvt 0.25 1\nvt 0.5 0\nvt 0.75 1\nvt 1 0\n\
         usemtl textured\n\
         f 1/1 2/2 3/3\nf 3/3 4/4 5/5\n",
    )
    .unwrap();
    obj
}

fn run_stubbed(config: &TilerConfig) -> Result<mesh_tiler::pipeline::RunSummary> {
    Tiler::run_with(config, &StubRepacker, &StubWriter, &DiskImages)
}

/// Walk a tileset.json tile node, checking content files and error
/// monotonicity.
fn validate_tile(tile: &serde_json::Value, tiles_dir: &Path, parent_error: f64) -> usize {
    let error = tile["geometricError"].as_f64().expect("geometricError");
    assert!(error >= 0.0);
    assert!(
        error <= parent_error + 1e-9,
        "tile error {error} exceeds parent error {parent_error}"
    );
    assert!(
        tile["boundingVolume"]["box"].as_array().is_some_and(|b| b.len() == 12),
        "tile must carry a 12-number bounding volume box"
    );

    let mut count = 0;
    if let Some(uri) = tile["content"]["uri"].as_str() {
        assert!(
            tiles_dir.join(uri).exists(),
            "content uri {uri} should resolve"
        );
        count += 1;
    }
    if let Some(children) = tile["children"].as_array() {
        for child in children {
            count += validate_tile(child, tiles_dir, error);
        }
    }
    count
}

fn count_files_with_extension(dir: &Path, ext: &str) -> usize {
    let mut n = 0;
    for entry in fs::read_dir(dir).unwrap().filter_map(|e| e.ok()) {
        let p = entry.path();
        if p.is_dir() {
            n += count_files_with_extension(&p, ext);
        } else if p.extension().is_some_and(|e| e == ext) {
            n += 1;
        }
    }
    n
}

#[test]
fn full_pipeline_single_leaf() {
    let tmp = tempfile::tempdir().unwrap();
    let input_dir = tmp.path().join("input");
    let output_dir = tmp.path().join("output");
    fs::create_dir_all(&input_dir).unwrap();

    // 64px texture inside a 512px budget: one full-resolution tile
    let in_mesh = write_textured_grid(&input_dir, 4, 64);

    let config = TilerConfig {
        in_mesh,
        out_dir: output_dir.clone(),
        ..Default::default()
    };

    let summary = run_stubbed(&config).expect("pipeline should succeed");
    assert_eq!(summary.tile_count, 1);

    let tileset_path = output_dir.join("tiles/tileset.json");
    assert!(tileset_path.exists(), "tileset.json should be installed");
    assert!(
        !output_dir.join("build").exists(),
        "scratch build area should be cleaned up"
    );

    let tileset: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&tileset_path).unwrap()).unwrap();
    assert_eq!(tileset["asset"]["version"], "1.0");
    assert_eq!(tileset["geometricError"], 100.0);
    assert_eq!(tileset["root"]["refine"], "REPLACE");
    assert!(tileset["root"]["content"].is_null(), "synthetic root has no content");

    let top = tileset["root"]["children"].as_array().unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0]["content"]["uri"], "0/0/0/0.b3dm");
    assert!(top[0]["children"].is_null(), "full-res tile is a leaf");

    let counted = validate_tile(&tileset["root"], &output_dir.join("tiles"), f64::INFINITY);
    assert_eq!(counted, summary.tile_count);
}

#[test]
fn full_pipeline_recurses_until_full_resolution() {
    let tmp = tempfile::tempdir().unwrap();
    let input_dir = tmp.path().join("input");
    let output_dir = tmp.path().join("output");
    fs::create_dir_all(&input_dir).unwrap();

    // 128px texture against a 32px budget forces several refinement levels
    let in_mesh = write_straddling_mesh(&input_dir, 128);

    let config = TilerConfig {
        in_mesh,
        out_dir: output_dir.clone(),
        image_size: 32,
        ..Default::default()
    };

    let summary = run_stubbed(&config).expect("pipeline should succeed");
    assert!(summary.tile_count > 1, "refinement should produce several tiles");

    let tileset: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(output_dir.join("tiles/tileset.json")).unwrap(),
    )
    .unwrap();

    let top = tileset["root"]["children"].as_array().unwrap();
    assert_eq!(top.len(), 1);
    let siblings = top[0]["children"].as_array().unwrap();
    assert_eq!(
        siblings.len(),
        2,
        "the two triangles straddle a tile boundary at zoom 1"
    );

    let counted = validate_tile(&tileset["root"], &output_dir.join("tiles"), f64::INFINITY);
    assert_eq!(counted, summary.tile_count);

    let b3dm_count = count_files_with_extension(&output_dir.join("tiles"), "b3dm");
    assert_eq!(b3dm_count, summary.tile_count);
}

#[test]
fn debug_glb_outputs_leaf_listing_and_glbs() {
    let tmp = tempfile::tempdir().unwrap();
    let input_dir = tmp.path().join("input");
    let output_dir = tmp.path().join("output");
    fs::create_dir_all(&input_dir).unwrap();

    let in_mesh = write_textured_grid(&input_dir, 2, 64);

    let config = TilerConfig {
        in_mesh,
        out_dir: output_dir.clone(),
        debug_glb: true,
        ..Default::default()
    };

    let summary = run_stubbed(&config).expect("pipeline should succeed");
    assert!(summary.tile_count >= 1);

    let listing = fs::read_to_string(output_dir.join("tiles/leaf_tiles.txt")).unwrap();
    let entries: Vec<&str> = listing.lines().collect();
    assert!(!entries.is_empty());
    for entry in entries {
        assert!(
            output_dir.join("tiles").join(entry).exists(),
            "listed GLB {entry} should be installed"
        );
    }

    let glb_count = count_files_with_extension(&output_dir.join("tiles"), "glb");
    assert_eq!(glb_count, summary.tile_count, "every tile also gets a GLB");
}

#[test]
fn pipeline_refuses_existing_output_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let input_dir = tmp.path().join("input");
    let output_dir = tmp.path().join("output");
    fs::create_dir_all(&input_dir).unwrap();
    fs::create_dir_all(&output_dir).unwrap();

    let in_mesh = write_textured_grid(&input_dir, 2, 64);

    let config = TilerConfig {
        in_mesh,
        out_dir: output_dir,
        ..Default::default()
    };

    let err = run_stubbed(&config).unwrap_err();
    assert!(matches!(err, TilerError::OutputExists(_)));
}

#[test]
fn pipeline_fails_cleanly_on_untextured_mesh() {
    let tmp = tempfile::tempdir().unwrap();
    let input_dir = tmp.path().join("input");
    fs::create_dir_all(&input_dir).unwrap();

    // No mtllib: texel-size estimation has nothing to work with
    let in_mesh = input_dir.join("model.obj");
    fs::write(&in_mesh, "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n").unwrap();

    let config = TilerConfig {
        in_mesh,
        out_dir: tmp.path().join("output"),
        ..Default::default()
    };

    let err = run_stubbed(&config).unwrap_err();
    assert!(matches!(err, TilerError::BadTexture(_)));
}
