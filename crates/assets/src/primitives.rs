//! Built-in geometry used for defaults and tests.

use glam::Vec3;
use strata_gfx::MeshVertex;

/// Unit cube centred on the origin: 24 vertices, 36 indices, outward normals.
pub fn cube() -> (Vec<MeshVertex>, Vec<u32>) {
    let faces: [(Vec3, Vec3, Vec3); 6] = [
        (Vec3::X, Vec3::Y, Vec3::NEG_Z),
        (Vec3::NEG_X, Vec3::Y, Vec3::Z),
        (Vec3::Y, Vec3::NEG_Z, Vec3::X),
        (Vec3::NEG_Y, Vec3::Z, Vec3::X),
        (Vec3::Z, Vec3::Y, Vec3::X),
        (Vec3::NEG_Z, Vec3::Y, Vec3::NEG_X),
    ];
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, up, right) in faces {
        let base = vertices.len() as u32;
        let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
        for (u, v) in corners {
            let position = (normal + right * u + up * v) * 0.5;
            vertices.push(MeshVertex {
                position: position.to_array(),
                normal: normal.to_array(),
                uv: [(u + 1.0) * 0.5, 1.0 - (v + 1.0) * 0.5],
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    (vertices, indices)
}

/// Square in the XZ plane facing +Y with the given half size.
pub fn plane(half_size: f32) -> (Vec<MeshVertex>, Vec<u32>) {
    let corners = [(-1.0, 1.0), (1.0, 1.0), (1.0, -1.0), (-1.0, -1.0)];
    let vertices = corners
        .iter()
        .map(|&(x, z)| MeshVertex {
            position: [x * half_size, 0.0, z * half_size],
            normal: [0.0, 1.0, 0.0],
            uv: [(x + 1.0) * 0.5, (z + 1.0) * 0.5],
        })
        .collect();
    (vertices, vec![0, 1, 2, 0, 2, 3])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_counts() {
        let (v, i) = cube();
        assert_eq!(v.len(), 24);
        assert_eq!(i.len(), 36);
        assert!(i.iter().all(|&x| (x as usize) < v.len()));
    }

    #[test]
    fn cube_faces_wind_outward() {
        let (v, i) = cube();
        for tri in i.chunks(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|x| Vec3::from(v[x as usize].position));
            let n = Vec3::from(v[tri[0] as usize].normal);
            assert!((b - a).cross(c - a).dot(n) > 0.0);
        }
    }

    #[test]
    fn plane_faces_up() {
        let (v, i) = plane(2.0);
        let [a, b, c] = [i[0], i[1], i[2]].map(|x| Vec3::from(v[x as usize].position));
        assert!((b - a).cross(c - a).y > 0.0);
    }
}
