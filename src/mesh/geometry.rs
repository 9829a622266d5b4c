use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};

use glam::{DMat3, DVec2, DVec3};
use tracing::{info, warn};

use crate::error::{Result, TilerError};
use crate::imaging::ImageOps;
use crate::mesh::{abs_path_from_file, absolute_path, rel_path_from_file, MaterialLibrary};
use crate::types::BoundingBox;

/// Index value marking an absent `vt` or `vn` reference in a face corner.
pub const ABSENT: i32 = -1;

/// Poison value written into remap slots for collected rows; dereferencing
/// one fails loudly instead of silently aliasing another row.
const UNUSED: i32 = i32::MAX;

/// One corner of a triangular face: 0-based indices into the position,
/// texcoord, and normal arrays. `vt` and `vn` may be [`ABSENT`]; `v` is
/// always present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceVertex {
    pub v: i32,
    pub vt: i32,
    pub vn: i32,
}

/// Parse one of the vertex arguments to the OBJ `f` directive. Each
/// argument carries up to three 1-based indices referencing the v, vt, and
/// vn arrays; empty slots (as in `3//7`) map to [`ABSENT`].
fn parse_face_vertex(token: &str, context: &dyn Fn() -> String) -> Result<FaceVertex> {
    let mut idx = [ABSENT; 3];
    let parts: Vec<&str> = token.split('/').collect();
    if parts.len() > 3 {
        return Err(TilerError::MalformedMesh(format!(
            "{}: face vertex '{token}' has more than three indices",
            context()
        )));
    }
    for (slot, part) in idx.iter_mut().zip(&parts) {
        if part.is_empty() {
            continue;
        }
        let value: i32 = part.parse().map_err(|_| {
            TilerError::MalformedMesh(format!(
                "{}: invalid index '{part}' in face vertex '{token}'",
                context()
            ))
        })?;
        if value < 1 {
            return Err(TilerError::MalformedMesh(format!(
                "{}: non-positive index {value} in face vertex '{token}' \
                 (relative indices are not supported)",
                context()
            )));
        }
        *slot = value - 1;
    }
    if idx[0] == ABSENT {
        return Err(TilerError::MalformedMesh(format!(
            "{}: face vertex '{token}' is missing its position index",
            context()
        )));
    }
    Ok(FaceVertex {
        v: idx[0],
        vt: idx[1],
        vn: idx[2],
    })
}

/// Serialize one face corner back to its OBJ token, converting to 1-based
/// indices and using the canonical truncated forms for absent slots.
fn dump_face_vertex(fv: FaceVertex) -> String {
    let v = fv.v + 1;
    if fv.vt == ABSENT {
        if fv.vn == ABSENT {
            format!("{v}")
        } else {
            format!("{v}//{}", fv.vn + 1)
        }
    } else if fv.vn == ABSENT {
        format!("{v}/{}", fv.vt + 1)
    } else {
        format!("{v}/{}/{}", fv.vt + 1, fv.vn + 1)
    }
}

/// Non-destructively garbage collect rows of `in_objects` not referenced by
/// `in_refs`. [`ABSENT`] references pass through untouched.
///
/// Returns rewritten references and the kept rows, satisfying
/// `out_objects[out_refs[i]] == in_objects[in_refs[i]]` for every present
/// reference.
fn garbage_collect<T: Copy>(in_refs: &[i32], in_objects: &[T]) -> (Vec<i32>, Vec<T>) {
    let mut keep: Vec<i32> = in_refs.iter().copied().filter(|&r| r >= 0).collect();
    keep.sort_unstable();
    keep.dedup();

    let mut remap = vec![UNUSED; in_objects.len()];
    for (new_idx, &old_idx) in keep.iter().enumerate() {
        remap[old_idx as usize] = new_idx as i32;
    }

    let out_refs = in_refs
        .iter()
        .map(|&r| if r < 0 { r } else { remap[r as usize] })
        .collect();
    let out_objects = keep.iter().map(|&i| in_objects[i as usize]).collect();

    (out_refs, out_objects)
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(f64::total_cmp);
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// Triangular mesh read from an OBJ file, together with its material
/// companion. Covers the subset of the format produced by photogrammetry
/// pipelines: positions, texcoords, normals, triangle faces, and diffuse
/// texture bindings.
///
/// Transforms (`rotated`, `cropped`) return new instances; the parser is
/// the only other constructor.
#[derive(Debug, Clone)]
pub struct Geometry {
    /// Absolute path the OBJ file was read from.
    pub input_path: PathBuf,
    /// Vertex positions in xyz space.
    pub positions: Vec<DVec3>,
    /// UV texture coordinates, each in 0..1. Scale by the texture image
    /// size to get pixel coordinates.
    pub texcoords: Vec<DVec2>,
    /// Vertex normals in xyz space.
    pub normals: Vec<DVec3>,
    /// Triangles as three corners each, indexing the arrays above.
    pub faces: Vec<[FaceVertex; 3]>,
    /// Per-face index into `material_names`, or [`ABSENT`] for faces seen
    /// before any `usemtl`.
    pub face_materials: Vec<i32>,
    /// Material names in `usemtl` order.
    pub material_names: Vec<String>,
    /// Companion MTL, when the OBJ referenced one.
    pub mtllib: Option<MaterialLibrary>,
}

impl Geometry {
    /// Parse an OBJ file. The companion MTL file and its texture images are
    /// loaded as well (images only for their dimensions).
    pub fn read(path: &Path, images: &dyn ImageOps) -> Result<Self> {
        let input_path = absolute_path(path)?;
        info!(path = %input_path.display(), "reading geometry");

        let text = fs::read_to_string(&input_path)?;

        let mut positions = Vec::new();
        let mut texcoords = Vec::new();
        let mut normals = Vec::new();
        let mut faces: Vec<[FaceVertex; 3]> = Vec::new();
        let mut face_materials: Vec<i32> = Vec::new();
        let mut material_names: Vec<String> = Vec::new();
        let mut mtllib = None;

        for (line_idx, line) in text.lines().enumerate() {
            let line_no = line_idx + 1;
            let context = || format!("{}:{line_no}", input_path.display());

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = trimmed.split_whitespace().collect();
            let cmd = fields[0];
            let args = &fields[1..];

            match cmd {
                "v" => positions.push(parse_vec3(args, &context)?),
                "vt" => texcoords.push(parse_vec2(args, &context)?),
                "vn" => normals.push(parse_vec3(args, &context)?),
                "f" => {
                    if args.len() != 3 {
                        return Err(TilerError::MalformedMesh(format!(
                            "{}: 'f' expects 3 vertices, got {} \
                             (only triangulated meshes are supported)",
                            context(),
                            args.len()
                        )));
                    }
                    let mut corners = [FaceVertex {
                        v: ABSENT,
                        vt: ABSENT,
                        vn: ABSENT,
                    }; 3];
                    for (corner, &token) in corners.iter_mut().zip(args) {
                        *corner = parse_face_vertex(token, &context)?;
                    }
                    faces.push(corners);
                    face_materials.push(material_names.len() as i32 - 1);
                }
                "mtllib" => {
                    if args.len() != 1 {
                        return Err(TilerError::MalformedMesh(format!(
                            "{}: 'mtllib' expects 1 argument, got {}",
                            context(),
                            args.len()
                        )));
                    }
                    let mtl_path = abs_path_from_file(args[0], &input_path);
                    mtllib = Some(MaterialLibrary::read(&mtl_path, images)?);
                }
                "usemtl" => {
                    if args.len() != 1 {
                        return Err(TilerError::MalformedMesh(format!(
                            "{}: 'usemtl' expects 1 argument, got {}",
                            context(),
                            args.len()
                        )));
                    }
                    material_names.push(args[0].to_owned());
                }
                _ => {
                    warn!(command = cmd, line = line_no, "unknown OBJ directive, ignoring");
                }
            }
        }

        let geom = Self {
            input_path,
            positions,
            texcoords,
            normals,
            faces,
            face_materials,
            material_names,
            mtllib,
        };
        geom.validate()?;
        Ok(geom)
    }

    /// Check that every face reference resolves and that vt/vn usage is
    /// consistent within each face.
    fn validate(&self) -> Result<()> {
        for (i, face) in self.faces.iter().enumerate() {
            let vt_present = face[0].vt != ABSENT;
            let vn_present = face[0].vn != ABSENT;
            for corner in face {
                if (corner.vt != ABSENT) != vt_present || (corner.vn != ABSENT) != vn_present {
                    return Err(TilerError::MalformedMesh(format!(
                        "{}: face {i} mixes present and absent indices",
                        self.input_path.display()
                    )));
                }
                let in_range = |idx: i32, len: usize| idx == ABSENT || (idx as usize) < len;
                if !in_range(corner.v, self.positions.len())
                    || !in_range(corner.vt, self.texcoords.len())
                    || !in_range(corner.vn, self.normals.len())
                {
                    return Err(TilerError::MalformedMesh(format!(
                        "{}: face {i} references an out-of-range vertex",
                        self.input_path.display()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Write an OBJ file and its associated MTL file. Any texture images
    /// referenced by the MTL must be written separately; `texture_map`
    /// rewrites their `map_Kd` paths (see [`MaterialLibrary::write`]).
    pub fn write(&self, output_path: &Path, texture_map: &BTreeMap<String, String>) -> Result<()> {
        let output_path = absolute_path(output_path)?;
        info!(path = %output_path.display(), "writing geometry");

        let mut out = BufWriter::new(fs::File::create(&output_path)?);

        if let Some(mtllib) = &self.mtllib {
            let mtl_path = output_path.with_extension("mtl");
            mtllib.write(&mtl_path, texture_map)?;
            writeln!(
                out,
                "mtllib {}",
                rel_path_from_file(&mtl_path, &output_path).display()
            )?;
        }

        for v in &self.positions {
            writeln!(out, "v {} {} {}", v.x, v.y, v.z)?;
        }
        for vt in &self.texcoords {
            writeln!(out, "vt {} {}", vt.x, vt.y)?;
        }
        for vn in &self.normals {
            writeln!(out, "vn {} {} {}", vn.x, vn.y, vn.z)?;
        }

        let mut last_mtl: Option<i32> = None;
        for (face, &m) in self.faces.iter().zip(&self.face_materials) {
            if last_mtl != Some(m) {
                if m >= 0 {
                    writeln!(out)?;
                    writeln!(out, "usemtl {}", self.material_names[m as usize])?;
                }
                last_mtl = Some(m);
            }
            writeln!(
                out,
                "f {} {} {}",
                dump_face_vertex(face[0]),
                dump_face_vertex(face[1]),
                dump_face_vertex(face[2])
            )?;
        }

        Ok(())
    }

    /// Return a copy with the rotation applied to the xyz coordinates.
    /// Only positions and normals change; texcoords are UV coordinates and
    /// stay untouched.
    pub fn rotated(&self, rotation: DMat3) -> Geometry {
        Geometry {
            positions: self.positions.iter().map(|&p| rotation * p).collect(),
            normals: self.normals.iter().map(|&n| rotation * n).collect(),
            ..self.clone()
        }
    }

    /// Return a copy approximately cropped to the nominal bounding box:
    /// each face whose centroid lies inside the box (half-open) is kept.
    /// This assigns every face to exactly one tile per zoom level, at the
    /// cost of kept faces possibly extending beyond the box. Tile bounding
    /// volumes must therefore be recomputed from the cropped content
    /// rather than taken from the nominal tile box.
    ///
    /// Vertex data not referenced by the kept faces is garbage collected.
    /// Materials are not: the repack step downstream only touches the ones
    /// still referenced.
    pub fn cropped(&self, bbox: &BoundingBox) -> Geometry {
        let mut faces = Vec::new();
        let mut face_materials = Vec::new();
        for (face, &m) in self.faces.iter().zip(&self.face_materials) {
            let centroid = (self.positions[face[0].v as usize]
                + self.positions[face[1].v as usize]
                + self.positions[face[2].v as usize])
                / 3.0;
            if bbox.contains(centroid) {
                faces.push(*face);
                face_materials.push(m);
            }
        }

        let collect_axis = |get: &dyn Fn(&FaceVertex) -> i32| -> Vec<i32> {
            faces.iter().flat_map(|f| f.iter().map(get)).collect()
        };
        let (v_refs, positions) = garbage_collect(&collect_axis(&|c| c.v), &self.positions);
        let (vt_refs, texcoords) = garbage_collect(&collect_axis(&|c| c.vt), &self.texcoords);
        let (vn_refs, normals) = garbage_collect(&collect_axis(&|c| c.vn), &self.normals);

        for (i, face) in faces.iter_mut().enumerate() {
            for (k, corner) in face.iter_mut().enumerate() {
                corner.v = v_refs[i * 3 + k];
                corner.vt = vt_refs[i * 3 + k];
                corner.vn = vn_refs[i * 3 + k];
            }
        }

        Geometry {
            input_path: self.input_path.clone(),
            positions,
            texcoords,
            normals,
            faces,
            face_materials,
            material_names: self.material_names.clone(),
            mtllib: self.mtllib.clone(),
        }
    }

    /// Axis-aligned box containing all vertex positions. Meaningful only
    /// for non-empty meshes.
    pub fn bounding_box(&self) -> BoundingBox {
        let mut min = DVec3::splat(f64::INFINITY);
        let mut max = DVec3::splat(f64::NEG_INFINITY);
        for p in &self.positions {
            min = min.min(*p);
            max = max.max(*p);
        }
        BoundingBox::new(min, max)
    }

    /// The mesh bounds in 3D Tiles `boundingVolume.box` form: centroid
    /// followed by three axis-aligned half-axis vectors.
    pub fn bounding_volume(&self) -> [f64; 12] {
        let bbox = self.bounding_box();
        let c = bbox.center();
        let h = bbox.half_extents();
        [
            c.x, c.y, c.z, //
            h.x, 0.0, 0.0, //
            0.0, h.y, 0.0, //
            0.0, 0.0, h.z,
        ]
    }

    /// Whether the mesh contains no faces.
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Median physical size of one texture pixel. With xyz coordinates in
    /// meters the result is meters per texel.
    ///
    /// For each face edge, the xyz length is divided by the length of the
    /// matching UV edge mapped to pixel space through the face material's
    /// image dimensions. Zero-length texel edges are discarded. Taking the
    /// median keeps round-off on tiny triangles from skewing the estimate;
    /// the tiling still assumes the mesh has roughly uniform texel size.
    pub fn median_texel_size(&self) -> Result<f64> {
        let mtllib = self.mtllib.as_ref().ok_or_else(|| {
            TilerError::BadTexture(format!(
                "{}: mesh has no material library",
                self.input_path.display()
            ))
        })?;

        let mut ratios = Vec::new();
        for (face, &m) in self.faces.iter().zip(&self.face_materials) {
            if m < 0 {
                continue;
            }
            let name = &self.material_names[m as usize];
            let binding = mtllib.materials.get(name).ok_or_else(|| {
                TilerError::MalformedMaterial(format!(
                    "material '{name}' is not defined in {}",
                    mtllib.input_path.display()
                ))
            })?;
            let image_size = DVec2::new(binding.width as f64, binding.height as f64);

            for k in 0..3 {
                let a = face[k];
                let b = face[(k + 1) % 3];
                if a.vt == ABSENT || b.vt == ABSENT {
                    continue;
                }
                let xyz_len = (self.positions[b.v as usize] - self.positions[a.v as usize])
                    .length();
                let texel_len = ((self.texcoords[b.vt as usize]
                    - self.texcoords[a.vt as usize])
                    * image_size)
                    .length();
                if texel_len != 0.0 {
                    ratios.push(xyz_len / texel_len);
                }
            }
        }

        if ratios.is_empty() {
            return Err(TilerError::BadTexture(format!(
                "{}: no non-degenerate textured edges to estimate texel size from",
                self.input_path.display()
            )));
        }
        Ok(median(ratios))
    }
}

fn parse_vec3(args: &[&str], context: &dyn Fn() -> String) -> Result<DVec3> {
    if args.len() != 3 {
        return Err(TilerError::MalformedMesh(format!(
            "{}: expected 3 coordinates, got {}",
            context(),
            args.len()
        )));
    }
    Ok(DVec3::new(
        parse_float(args[0], context)?,
        parse_float(args[1], context)?,
        parse_float(args[2], context)?,
    ))
}

fn parse_vec2(args: &[&str], context: &dyn Fn() -> String) -> Result<DVec2> {
    if args.len() != 2 {
        return Err(TilerError::MalformedMesh(format!(
            "{}: expected 2 coordinates, got {}",
            context(),
            args.len()
        )));
    }
    Ok(DVec2::new(
        parse_float(args[0], context)?,
        parse_float(args[1], context)?,
    ))
}

fn parse_float(s: &str, context: &dyn Fn() -> String) -> Result<f64> {
    s.parse().map_err(|_| {
        TilerError::MalformedMesh(format!("{}: invalid coordinate '{s}'", context()))
    })
}
