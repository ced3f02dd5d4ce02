//! Block-based domain partitioning
//!
//! The domain is cut into a regular grid of blocks. Blocks are handed to
//! ranks in contiguous runs of their linear index. Every point of the
//! domain belongs to exactly one block: intervals are half-open, and the
//! upper face of a non-periodic direction is folded into the last block.

use crate::{BlockId, Rank};
use settle_core::math::{Aabb, DVec3, IVec3};

#[derive(Debug, Clone, PartialEq)]
pub struct BlockForest {
    domain: Aabb,
    blocks: [usize; 3],
    periodic: [bool; 3],
    num_ranks: usize,
}

impl BlockForest {
    pub fn new(domain: Aabb, blocks_per_direction: [usize; 3], periodic: [bool; 3], num_ranks: usize) -> Self {
        let blocks = blocks_per_direction.map(|b| b.max(1));
        let num_blocks = blocks[0] * blocks[1] * blocks[2];
        Self {
            domain,
            blocks,
            periodic,
            num_ranks: num_ranks.clamp(1, num_blocks),
        }
    }

    pub fn domain(&self) -> Aabb {
        self.domain
    }

    pub fn periodic(&self) -> [bool; 3] {
        self.periodic
    }

    pub fn blocks_per_direction(&self) -> [usize; 3] {
        self.blocks
    }

    pub fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks[0] * self.blocks[1] * self.blocks[2]
    }

    pub fn block_size(&self) -> DVec3 {
        self.domain.size() / DVec3::new(self.blocks[0] as f64, self.blocks[1] as f64, self.blocks[2] as f64)
    }

    pub fn smallest_block_extent(&self) -> f64 {
        self.block_size().min_element()
    }

    /// Domain extent along periodic directions, zero elsewhere.
    pub fn period(&self) -> DVec3 {
        let size = self.domain.size();
        DVec3::new(
            if self.periodic[0] { size.x } else { 0.0 },
            if self.periodic[1] { size.y } else { 0.0 },
            if self.periodic[2] { size.z } else { 0.0 },
        )
    }

    pub fn image_offset(&self, image: IVec3) -> DVec3 {
        image.as_dvec3() * self.period()
    }

    fn coords(&self, id: BlockId) -> [usize; 3] {
        let [nx, ny, _] = self.blocks;
        [id.0 % nx, (id.0 / nx) % ny, id.0 / (nx * ny)]
    }

    fn id(&self, [x, y, z]: [usize; 3]) -> BlockId {
        BlockId(x + self.blocks[0] * (y + self.blocks[1] * z))
    }

    /// Block coordinates of `p`, clamped into the grid.
    fn clamped_coords(&self, p: DVec3) -> [usize; 3] {
        let rel = (p - self.domain.min) / self.block_size();
        let c = |v: f64, n: usize| if v.is_nan() || v < 0.0 { 0 } else { (v as usize).min(n - 1) };
        [c(rel.x, self.blocks[0]), c(rel.y, self.blocks[1]), c(rel.z, self.blocks[2])]
    }

    pub fn block_aabb(&self, id: BlockId) -> Aabb {
        let [x, y, z] = self.coords(id);
        let size = self.block_size();
        let min = self.domain.min + DVec3::new(x as f64, y as f64, z as f64) * size;
        Aabb::new(min, min + size)
    }

    pub fn rank_of(&self, id: BlockId) -> Rank {
        id.0 * self.num_ranks / self.num_blocks()
    }

    pub fn blocks_of_rank(&self, rank: Rank) -> Vec<BlockId> {
        (0..self.num_blocks())
            .map(BlockId)
            .filter(|&b| self.rank_of(b) == rank)
            .collect()
    }

    /// Bounding box of all blocks of `rank`.
    pub fn rank_aabb(&self, rank: Rank) -> Aabb {
        self.blocks_of_rank(rank)
            .into_iter()
            .map(|b| self.block_aabb(b))
            .reduce(|a, b| a.merged(&b))
            .unwrap_or(Aabb::new(self.domain.min, self.domain.min))
    }

    /// Wraps `p` into the domain along periodic directions. Returns the
    /// mapped point and the number of periods `k` with `p = mapped + k * period`.
    pub fn map_into_domain(&self, p: DVec3) -> (DVec3, IVec3) {
        let size = self.domain.size();
        let mut mapped = p;
        let mut shift = IVec3::ZERO;
        for axis in 0..3 {
            if !self.periodic[axis] || size[axis] <= 0.0 {
                continue;
            }
            let k = ((p[axis] - self.domain.min[axis]) / size[axis]).floor();
            mapped[axis] = p[axis] - k * size[axis];
            if mapped[axis] >= self.domain.max[axis] {
                mapped[axis] = self.domain.min[axis];
            }
            shift[axis] = k as i32;
        }
        (mapped, shift)
    }

    pub fn block_containing(&self, p: DVec3) -> BlockId {
        let (mapped, _) = self.map_into_domain(p);
        self.id(self.clamped_coords(mapped))
    }

    pub fn owner_of(&self, p: DVec3) -> Rank {
        self.rank_of(self.block_containing(p))
    }

    /// Whether `p` lies in a block of `rank` without periodic mapping.
    /// Points beyond a periodic face belong to nobody; non-periodic
    /// directions are clamped.
    pub fn is_point_in_rank(&self, rank: Rank, p: DVec3) -> bool {
        for axis in 0..3 {
            if self.periodic[axis] && (p[axis] < self.domain.min[axis] || p[axis] >= self.domain.max[axis]) {
                return false;
            }
        }
        self.rank_of(self.id(self.clamped_coords(p))) == rank
    }

    /// The block and its (up to 26) neighbours, each with the wrap count
    /// needed to reach it: the neighbour sits at `block_aabb + wrap * period`
    /// seen from `id`.
    pub fn neighborhood(&self, id: BlockId) -> Vec<(BlockId, IVec3)> {
        let c = self.coords(id);
        let mut out = Vec::with_capacity(27);
        for dz in -1..=1i64 {
            for dy in -1..=1i64 {
                for dx in -1..=1i64 {
                    let mut coords = [0usize; 3];
                    let mut wrap = IVec3::ZERO;
                    let mut valid = true;
                    for (axis, d) in [dx, dy, dz].into_iter().enumerate() {
                        let n = self.blocks[axis] as i64;
                        let raw = c[axis] as i64 + d;
                        if self.periodic[axis] {
                            let w = raw.div_euclid(n);
                            coords[axis] = (raw - w * n) as usize;
                            wrap[axis] = w as i32;
                        } else if (0..n).contains(&raw) {
                            coords[axis] = raw as usize;
                        } else {
                            valid = false;
                        }
                    }
                    if valid {
                        let entry = (self.id(coords), wrap);
                        if !out.contains(&entry) {
                            out.push(entry);
                        }
                    }
                }
            }
        }
        out
    }
}
