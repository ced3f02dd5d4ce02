//! Particle and contact data
//!
//! Each rank owns one [`ParticleStorage`] holding its local particles and
//! the ghost copies it received from neighbouring ranks, plus one
//! [`ContactStorage`] that is rebuilt every step.

mod contact;
mod particle;
mod shape;
mod storage;

pub use contact::{Contact, ContactStorage};
pub use particle::{ContactHistory, Particle, ParticleFlags, ParticleUid, Rank};
pub use shape::{MassProperties, Shape};
pub use storage::ParticleStorage;
