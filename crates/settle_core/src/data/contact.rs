use crate::math::{DMat3, DVec3};

/// A detected contact between two replicas on one rank.
///
/// `normal` points from the second particle towards the first; a negative
/// `distance` is a penetration depth.
#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    pub id1: usize,
    pub id2: usize,
    pub distance: f64,
    pub normal: DVec3,
    pub position: DVec3,

    // HCSITS working state, filled by the contact initialization.
    pub r1: DVec3,
    pub r2: DVec3,
    /// Columns are the normal and the two tangents.
    pub basis: DMat3,
    pub mu: f64,
    pub erp: f64,
    pub approach_velocity: f64,
    pub delassus: DMat3,
    pub delassus_inv: DMat3,
    /// Accumulated impulse in contact coordinates.
    pub impulse: DVec3,
}

impl Contact {
    pub fn new(id1: usize, id2: usize, distance: f64, normal: DVec3, position: DVec3) -> Self {
        Self {
            id1,
            id2,
            distance,
            normal,
            position,
            r1: DVec3::ZERO,
            r2: DVec3::ZERO,
            basis: DMat3::IDENTITY,
            mu: 0.0,
            erp: 0.0,
            approach_velocity: 0.0,
            delassus: DMat3::ZERO,
            delassus_inv: DMat3::ZERO,
            impulse: DVec3::ZERO,
        }
    }

    pub fn penetration_depth(&self) -> f64 {
        (-self.distance).max(0.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContactStorage {
    contacts: Vec<Contact>,
}

impl ContactStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.contacts.clear();
    }

    pub fn push(&mut self, contact: Contact) {
        self.contacts.push(contact);
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Contact> {
        self.contacts.iter_mut()
    }

    pub fn as_slice(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn as_mut_slice(&mut self) -> &mut [Contact] {
        &mut self.contacts
    }
}
