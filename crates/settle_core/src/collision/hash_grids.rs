use crate::data::Particle;
use crate::math::{DVec3, IVec3};
use std::collections::HashMap;

/// Hierarchical hash grid broad phase.
///
/// Level `k` has cells of `base * 2^k`; a particle is stored in the first
/// level whose cells are at least its interaction diameter. Pairs within a
/// level come from the neighbouring cells of that level; a particle is
/// tested against coarser levels through the 27 cells around it there.
#[derive(Debug, Clone, Default)]
pub struct HashGrids {
    base_size: f64,
    levels: Vec<HashMap<IVec3, Vec<usize>>>,
    infinite: Vec<usize>,
}

impl HashGrids {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    fn cell_size(&self, level: usize) -> f64 {
        self.base_size * f64::powi(2.0, level as i32)
    }

    fn key(&self, p: DVec3, level: usize) -> IVec3 {
        (p / self.cell_size(level)).floor().as_ivec3()
    }

    pub fn rebuild(&mut self, particles: &[Particle]) {
        self.levels.clear();
        self.infinite.clear();
        self.base_size = particles
            .iter()
            .filter(|p| !p.is_infinite())
            .map(|p| 2.0 * p.interaction_radius)
            .fold(f64::INFINITY, f64::min);
        if !self.base_size.is_finite() || self.base_size <= 0.0 {
            self.base_size = 1.0;
        }
        for (idx, p) in particles.iter().enumerate() {
            if p.is_infinite() {
                self.infinite.push(idx);
                continue;
            }
            let ratio = (2.0 * p.interaction_radius / self.base_size).max(1.0);
            let level = ratio.log2().ceil() as usize;
            if self.levels.len() <= level {
                self.levels.resize_with(level + 1, HashMap::new);
            }
            let key = self.key(p.position, level);
            self.levels[level].entry(key).or_default().push(idx);
        }
    }

    /// Candidate pairs as sorted `(min, max)` index tuples without duplicates.
    pub fn pairs(&self, particles: &[Particle]) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        let mut emit = |a: usize, b: usize| out.push((a.min(b), a.max(b)));

        for (level, cells) in self.levels.iter().enumerate() {
            for (key, members) in cells {
                for (i, &a) in members.iter().enumerate() {
                    for &b in &members[i + 1..] {
                        emit(a, b);
                    }
                }
                for dz in -1..=1 {
                    for dy in -1..=1 {
                        for dx in -1..=1 {
                            let forward = dz > 0 || (dz == 0 && (dy > 0 || (dy == 0 && dx > 0)));
                            if !forward {
                                continue;
                            }
                            if let Some(other) = cells.get(&(*key + IVec3::new(dx, dy, dz))) {
                                for &a in members {
                                    for &b in other {
                                        emit(a, b);
                                    }
                                }
                            }
                        }
                    }
                }
                for &a in members {
                    for coarser in level + 1..self.levels.len() {
                        let center = self.key(particles[a].position, coarser);
                        for dz in -1..=1 {
                            for dy in -1..=1 {
                                for dx in -1..=1 {
                                    let k = center + IVec3::new(dx, dy, dz);
                                    if let Some(other) = self.levels[coarser].get(&k) {
                                        for &b in other {
                                            emit(a, b);
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        for &wall in &self.infinite {
            for cells in &self.levels {
                for members in cells.values() {
                    for &p in members {
                        emit(p, wall);
                    }
                }
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }
}
