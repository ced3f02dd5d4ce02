use crate::data::Particle;
use crate::math::{Aabb, DVec3};

/// Regular cell grid over a rank's region.
///
/// Cells are at least `min_cell_width` wide, so two finite particles can
/// only touch when their cells are neighbours. Points outside the region
/// are clamped into the boundary cells, which keeps that property. Walls
/// are kept in a separate list and paired with every finite particle.
#[derive(Debug, Clone)]
pub struct LinkedCells {
    domain: Aabb,
    cell_size: DVec3,
    dims: [usize; 3],
    cells: Vec<Vec<usize>>,
    infinite: Vec<usize>,
}

/// Forward half of the 26-neighbourhood; each cell pair is visited once.
fn half_stencil() -> impl Iterator<Item = [i64; 3]> {
    (-1..=1i64).flat_map(|dz| {
        (-1..=1i64).flat_map(move |dy| {
            (-1..=1i64).filter_map(move |dx| {
                let forward = dz > 0 || (dz == 0 && (dy > 0 || (dy == 0 && dx > 0)));
                forward.then_some([dx, dy, dz])
            })
        })
    })
}

impl LinkedCells {
    pub fn new(domain: Aabb, min_cell_width: f64) -> Self {
        let size = domain.size();
        let count = |extent: f64| {
            if min_cell_width > 0.0 && extent.is_finite() {
                ((extent / min_cell_width).floor() as usize).max(1)
            } else {
                1
            }
        };
        let dims = [count(size.x), count(size.y), count(size.z)];
        let cell_size = size / DVec3::new(dims[0] as f64, dims[1] as f64, dims[2] as f64);
        Self {
            domain,
            cell_size,
            dims,
            cells: vec![Vec::new(); dims[0] * dims[1] * dims[2]],
            infinite: Vec::new(),
        }
    }

    pub fn domain(&self) -> Aabb {
        self.domain
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn cell_width(&self) -> f64 {
        self.cell_size.min_element()
    }

    pub fn clear(&mut self) {
        self.cells.iter_mut().for_each(Vec::clear);
        self.infinite.clear();
    }

    pub fn cell_coords(&self, p: DVec3) -> [usize; 3] {
        let rel = (p - self.domain.min) / self.cell_size;
        let clamp = |v: f64, n: usize| {
            if v.is_nan() || v < 0.0 {
                0
            } else {
                (v as usize).min(n - 1)
            }
        };
        [
            clamp(rel.x, self.dims[0]),
            clamp(rel.y, self.dims[1]),
            clamp(rel.z, self.dims[2]),
        ]
    }

    /// Linear cell index, also used as sorting key for memory locality.
    pub fn cell_index(&self, p: DVec3) -> usize {
        let [x, y, z] = self.cell_coords(p);
        self.linear([x, y, z])
    }

    fn linear(&self, [x, y, z]: [usize; 3]) -> usize {
        x + self.dims[0] * (y + self.dims[1] * z)
    }

    pub fn rebuild(&mut self, particles: &[Particle]) {
        self.clear();
        for (idx, p) in particles.iter().enumerate() {
            if p.is_infinite() {
                self.infinite.push(idx);
            } else {
                let cell = self.cell_index(p.position);
                self.cells[cell].push(idx);
            }
        }
    }

    /// Calls `f` once for every candidate pair; pairs of two walls are skipped.
    pub fn for_each_pair(&self, mut f: impl FnMut(usize, usize)) {
        let [nx, ny, nz] = self.dims;
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    let cell = &self.cells[self.linear([x, y, z])];
                    for (i, &a) in cell.iter().enumerate() {
                        for &b in &cell[i + 1..] {
                            f(a, b);
                        }
                    }
                    for [dx, dy, dz] in half_stencil() {
                        let (ox, oy, oz) = (x as i64 + dx, y as i64 + dy, z as i64 + dz);
                        if ox < 0 || oy < 0 || oz < 0 {
                            continue;
                        }
                        let (ox, oy, oz) = (ox as usize, oy as usize, oz as usize);
                        if ox >= nx || oy >= ny || oz >= nz {
                            continue;
                        }
                        let other = &self.cells[self.linear([ox, oy, oz])];
                        for &a in cell {
                            for &b in other {
                                f(a, b);
                            }
                        }
                    }
                }
            }
        }
        for &wall in &self.infinite {
            for cell in &self.cells {
                for &p in cell {
                    f(p, wall);
                }
            }
        }
    }
}
