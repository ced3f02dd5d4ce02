//! Aggregate evaluation
//!
//! Statistics over the owned particles and the contacts of all ranks. Each
//! rank computes a partial value; the partials are combined through the
//! cluster's all-reduce so every quantity is counted exactly once.

use crate::resolve::DomainSpec;
use settle_core::data::Particle;
use settle_core::distribution::ScaleMode;
use settle_core::math::{sorted_ascending, DVec3};
use settle_net::Cluster;
use settle_services::ParticleRecord;
use std::f64::consts::PI;
use std::fmt;

/// Number of shape bin edges spread evenly over `[0, 1]`.
pub const NUM_SHAPE_BINS: usize = 17;

/// Per-step snapshot of the owned particles.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParticleAggregateInfo {
    pub num_particles: u64,
    pub particle_volume: f64,
    /// Highest particle center.
    pub maximum_height: f64,
    /// Volume weighted mean height of the particle centers.
    pub height_of_mass: f64,
    pub maximum_velocity: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct ParticlePartial {
    count: u64,
    volume: f64,
    weighted_height: f64,
    max_height: f64,
    max_velocity: f64,
}

impl ParticlePartial {
    fn of<'a>(particles: impl Iterator<Item = &'a Particle>) -> Self {
        let mut partial = Self::default();
        for p in particles {
            let volume = p.volume();
            partial.count += 1;
            partial.volume += volume;
            partial.weighted_height += volume * p.position.z;
            partial.max_height = partial.max_height.max(p.position.z);
            partial.max_velocity = partial.max_velocity.max(p.linear_velocity.length());
        }
        partial
    }

    fn combine(self, other: Self) -> Self {
        Self {
            count: self.count + other.count,
            volume: self.volume + other.volume,
            weighted_height: self.weighted_height + other.weighted_height,
            max_height: self.max_height.max(other.max_height),
            max_velocity: self.max_velocity.max(other.max_velocity),
        }
    }
}

impl ParticleAggregateInfo {
    pub fn evaluate(cluster: &mut Cluster) -> Self {
        let total = cluster
            .all_reduce(|domain| ParticlePartial::of(domain.particles.locals()), ParticlePartial::combine)
            .unwrap_or_default();
        Self {
            num_particles: total.count,
            particle_volume: total.volume,
            maximum_height: total.max_height,
            height_of_mass: if total.volume > 0.0 {
                total.weighted_height / total.volume
            } else {
                0.0
            },
            maximum_velocity: total.max_velocity,
        }
    }

    pub fn mass(&self, density: f64) -> f64 {
        self.particle_volume * density
    }

    /// Diameter of the sphere with the ensemble-average particle volume.
    pub fn average_diameter(&self) -> f64 {
        if self.num_particles == 0 {
            return 0.0;
        }
        (6.0 * self.particle_volume / (PI * self.num_particles as f64)).cbrt()
    }
}

impl fmt::Display for ParticleAggregateInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} particles, volume = {:.6}, max height = {:.4}, height of mass = {:.4}, max velocity = {:.4}",
            self.num_particles, self.particle_volume, self.maximum_height, self.height_of_mass, self.maximum_velocity
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ContactInfo {
    pub num_contacts: u64,
    pub maximum_penetration_depth: f64,
    pub average_penetration_depth: f64,
}

impl ContactInfo {
    pub fn evaluate(cluster: &mut Cluster) -> Self {
        let (count, sum, max) = cluster
            .all_reduce(
                |domain| {
                    domain.contacts.iter().fold((0u64, 0.0, 0.0f64), |(n, sum, max), c| {
                        let depth = c.penetration_depth();
                        (n + 1, sum + depth, max.max(depth))
                    })
                },
                |a, b| (a.0 + b.0, a.1 + b.1, a.2.max(b.2)),
            )
            .unwrap_or((0, 0.0, 0.0));
        Self {
            num_contacts: count,
            maximum_penetration_depth: max,
            average_penetration_depth: if count > 0 { sum / count as f64 } else { 0.0 },
        }
    }
}

impl fmt::Display for ContactInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} contacts, max penetration = {:.3e}, avg penetration = {:.3e}",
            self.num_contacts, self.maximum_penetration_depth, self.average_penetration_depth
        )
    }
}

fn add_elementwise<T: Copy + std::ops::Add<Output = T>>(mut a: Vec<T>, b: Vec<T>) -> Vec<T> {
    for (x, y) in a.iter_mut().zip(b) {
        *x = *x + y;
    }
    a
}

fn layer_count(height: f64, layer_height: f64) -> usize {
    if layer_height > 0.0 && height > 0.0 {
        (height / layer_height).ceil() as usize
    } else {
        0
    }
}

/// Volume of the slice `lo <= z < hi` of a sphere of radius `r` centered
/// at zero.
fn sphere_slab_volume(r: f64, lo: f64, hi: f64) -> f64 {
    let lo = lo.clamp(-r, r);
    let hi = hi.clamp(-r, r);
    if hi <= lo {
        return 0.0;
    }
    PI * (r * r * (hi - lo) - (hi.powi(3) - lo.powi(3)) / 3.0)
}

/// Solid fraction per horizontal layer. Each particle is represented by
/// the sphere of equal volume around its center.
#[derive(Debug, Clone, PartialEq)]
pub struct PorosityProfile {
    layer_height: f64,
    area: f64,
    solid: Vec<f64>,
    volume: f64,
    weighted_height: f64,
}

impl PorosityProfile {
    pub fn evaluate(cluster: &mut Cluster, domain: &DomainSpec, layer_height: f64) -> Self {
        let layers = layer_count(domain.height(), layer_height);
        let (solid, volume, weighted_height) = cluster
            .all_reduce(
                |rank| {
                    let mut solid = vec![0.0; layers];
                    let mut volume = 0.0;
                    let mut weighted_height = 0.0;
                    for p in rank.particles.locals() {
                        let v = p.volume();
                        volume += v;
                        weighted_height += v * p.position.z;
                        let r = (3.0 * v / (4.0 * PI)).cbrt();
                        let z = p.position.z;
                        let first = ((z - r) / layer_height).floor().max(0.0) as usize;
                        let last = (((z + r) / layer_height).floor().max(0.0) as usize).min(layers.saturating_sub(1));
                        for (i, layer) in solid.iter_mut().enumerate().take(last + 1).skip(first) {
                            let bottom = i as f64 * layer_height;
                            *layer += sphere_slab_volume(r, bottom - z, bottom + layer_height - z);
                        }
                    }
                    (solid, volume, weighted_height)
                },
                |a, b| (add_elementwise(a.0, b.0), a.1 + b.1, a.2 + b.2),
            )
            .unwrap_or((vec![0.0; layers], 0.0, 0.0));
        Self {
            layer_height,
            area: domain.cross_section,
            solid,
            volume,
            weighted_height,
        }
    }

    pub fn num_layers(&self) -> usize {
        self.solid.len()
    }

    pub fn layer_center(&self, layer: usize) -> f64 {
        (layer as f64 + 0.5) * self.layer_height
    }

    pub fn solid_volume(&self, layer: usize) -> f64 {
        self.solid[layer]
    }

    pub fn porosity(&self, layer: usize) -> f64 {
        1.0 - self.solid[layer] / (self.area * self.layer_height)
    }

    /// Porosity of a bed whose height is twice the height of mass.
    pub fn estimate_total_porosity(&self) -> f64 {
        if self.volume <= 0.0 {
            return 1.0;
        }
        let height_of_mass = self.weighted_height / self.volume;
        1.0 - self.volume / (self.area * 2.0 * height_of_mass)
    }

    pub const HEADER: [&'static str; 3] = ["z", "porosity", "solidVolume"];

    pub fn rows(&self) -> Vec<Vec<f64>> {
        (0..self.num_layers())
            .map(|i| vec![self.layer_center(i), self.porosity(i), self.solid[i]])
            .collect()
    }
}

/// Contact count and mean penetration per horizontal layer, binned by the
/// contact position.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactLayers {
    layer_height: f64,
    counts: Vec<u64>,
    penetration: Vec<f64>,
}

impl ContactLayers {
    pub fn evaluate(cluster: &mut Cluster, height: f64, layer_height: f64) -> Self {
        let layers = layer_count(height, layer_height);
        let (counts, penetration) = cluster
            .all_reduce(
                |rank| {
                    let mut counts = vec![0u64; layers];
                    let mut penetration = vec![0.0; layers];
                    if layers > 0 {
                        for c in rank.contacts.iter() {
                            let layer = ((c.position.z / layer_height).floor().max(0.0) as usize).min(layers - 1);
                            counts[layer] += 1;
                            penetration[layer] += c.penetration_depth();
                        }
                    }
                    (counts, penetration)
                },
                |a, b| (add_elementwise(a.0, b.0), add_elementwise(a.1, b.1)),
            )
            .unwrap_or((vec![0; layers], vec![0.0; layers]));
        Self {
            layer_height,
            counts,
            penetration,
        }
    }

    pub fn count(&self, layer: usize) -> u64 {
        self.counts[layer]
    }

    pub fn mean_penetration(&self, layer: usize) -> f64 {
        match self.counts[layer] {
            0 => 0.0,
            n => self.penetration[layer] / n as f64,
        }
    }

    pub const HEADER: [&'static str; 3] = ["z", "numContacts", "avgPenetrationDepth"];

    pub fn rows(&self) -> Vec<Vec<f64>> {
        (0..self.counts.len())
            .map(|i| {
                vec![
                    (i as f64 + 0.5) * self.layer_height,
                    self.counts[i] as f64,
                    self.mean_penetration(i),
                ]
            })
            .collect()
    }
}

/// Shape factors of ascending semi-axes `(S, I, L)`.
pub fn flatness(semi_axes: DVec3) -> f64 {
    let a = sorted_ascending(semi_axes);
    a.x / a.y
}

pub fn elongation(semi_axes: DVec3) -> f64 {
    let a = sorted_ascending(semi_axes);
    a.y / a.z
}

pub fn equancy(semi_axes: DVec3) -> f64 {
    let a = sorted_ascending(semi_axes);
    a.x / a.z
}

/// Bucket of `value` given ascending edges; `edges.len() + 1` buckets.
fn bucket(edges: &[f64], value: f64) -> usize {
    edges.partition_point(|&e| e <= value)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShapeHistogram {
    pub name: &'static str,
    pub edges: Vec<f64>,
    pub counts: Vec<u64>,
}

/// Size distribution (mass fractions and numbers) and shape factor
/// distributions of the owned particles.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleHistogram {
    pub size_edges: Vec<f64>,
    pub mass_fractions: Vec<f64>,
    pub numbers: Vec<u64>,
    pub shapes: Vec<ShapeHistogram>,
}

type ShapeFactor = (&'static str, fn(DVec3) -> f64);

const SHAPE_FACTORS: [ShapeFactor; 3] = [("flatness", flatness), ("elongation", elongation), ("equancy", equancy)];

impl ParticleHistogram {
    pub fn shape_edges() -> Vec<f64> {
        (0..NUM_SHAPE_BINS)
            .map(|i| i as f64 / (NUM_SHAPE_BINS - 1) as f64)
            .collect()
    }

    pub fn evaluate(cluster: &mut Cluster, size_edges: &[f64], scale_mode: ScaleMode) -> Self {
        let shape_edges = Self::shape_edges();
        let buckets = size_edges.len() + 1;
        let shape_buckets = shape_edges.len() + 1;
        let empty = || {
            (
                vec![0.0; buckets],
                vec![0u64; buckets],
                vec![vec![0u64; shape_buckets]; SHAPE_FACTORS.len()],
            )
        };

        let (volumes, numbers, shapes) = cluster
            .all_reduce(
                |rank| {
                    let (mut volumes, mut numbers, mut shapes) = empty();
                    for p in rank.particles.locals() {
                        let axes = p.shape.semi_axes();
                        let b = bucket(size_edges, scale_mode.size_of(axes));
                        volumes[b] += p.volume();
                        numbers[b] += 1;
                        for (counts, (_, factor)) in shapes.iter_mut().zip(SHAPE_FACTORS) {
                            counts[bucket(&shape_edges, factor(axes))] += 1;
                        }
                    }
                    (volumes, numbers, shapes)
                },
                |a, b| {
                    let shapes = a.2.into_iter().zip(b.2).map(|(x, y)| add_elementwise(x, y)).collect();
                    (add_elementwise(a.0, b.0), add_elementwise(a.1, b.1), shapes)
                },
            )
            .unwrap_or_else(empty);

        let total: f64 = volumes.iter().sum();
        let mass_fractions = volumes
            .iter()
            .map(|v| if total > 0.0 { v / total } else { 0.0 })
            .collect();
        Self {
            size_edges: size_edges.to_vec(),
            mass_fractions,
            numbers,
            shapes: SHAPE_FACTORS
                .iter()
                .zip(shapes)
                .map(|(&(name, _), counts)| ShapeHistogram {
                    name,
                    edges: shape_edges.clone(),
                    counts,
                })
                .collect(),
        }
    }
}

impl fmt::Display for ParticleHistogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Histogram over size bins {:?}", self.size_edges)?;
        let fractions: Vec<String> = self.mass_fractions.iter().map(|m| format!("{m:.4}")).collect();
        writeln!(f, "  mass fractions: {}", fractions.join(" "))?;
        write!(f, "  numbers: {:?}", self.numbers)
    }
}

/// Output records of the owned particles, sorted by uid.
pub fn particle_records(cluster: &Cluster, scale_mode: ScaleMode) -> Vec<ParticleRecord> {
    let mut records: Vec<ParticleRecord> = cluster
        .ranks()
        .iter()
        .flat_map(|rank| rank.particles.locals())
        .map(|p| {
            let axes = sorted_ascending(p.shape.semi_axes());
            ParticleRecord {
                uid: p.uid.0,
                owner: p.owner,
                shape: p.shape.name(),
                position: p.position.to_array(),
                linear_velocity: p.linear_velocity.to_array(),
                semi_axes: axes.to_array(),
                interaction_radius: p.interaction_radius,
                size: scale_mode.size_of(axes),
                num_contacts: p.num_contacts,
            }
        })
        .collect();
    records.sort_by_key(|r| r.uid);
    records
}
