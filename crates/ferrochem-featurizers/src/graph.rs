//! Graph-convolution inputs: per-atom feature rows, a directed edge list and
//! optional per-edge features.
use crate::featurizer::{Datapoint, Featurizer};
use crate::molecule::{BondOrder, Molecule};
use anyhow::Result;
use ferrochem_core::{Features, GraphData};
use itertools::Itertools;
use ndarray::Array2;

const ATOM_TYPES: [u8; 9] = [6, 7, 8, 9, 15, 16, 17, 35, 53];
const MAX_DEGREE: usize = 5;
const MAX_HYDROGENS: usize = 4;

/// Atom type one-hot (+ other), charge, aromatic, degree one-hot, H-count one-hot, in-ring.
pub const NODE_FEATURES: usize = ATOM_TYPES.len() + 1 + 1 + 1 + (MAX_DEGREE + 1) + (MAX_HYDROGENS + 1) + 1;
/// Single, double, triple, aromatic one-hot, then in-ring.
pub const EDGE_FEATURES: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct MolGraphConvFeaturizer {
    pub use_edges: bool,
}

impl MolGraphConvFeaturizer {
    pub fn new(use_edges: bool) -> Self {
        Self { use_edges }
    }

    fn node_row(mol: &Molecule, atom: usize, in_ring: bool) -> Vec<f32> {
        let a = &mol.atoms()[atom];
        let mut row = vec![0.0; NODE_FEATURES];
        let type_slot = ATOM_TYPES
            .iter()
            .position(|&z| z == a.atomic_number)
            .unwrap_or(ATOM_TYPES.len());
        row[type_slot] = 1.0;
        let mut offset = ATOM_TYPES.len() + 1;
        row[offset] = a.formal_charge as f32;
        row[offset + 1] = if a.aromatic { 1.0 } else { 0.0 };
        offset += 2;
        row[offset + mol.degree(atom).min(MAX_DEGREE)] = 1.0;
        offset += MAX_DEGREE + 1;
        row[offset + (mol.total_hydrogens(atom) as usize).min(MAX_HYDROGENS)] = 1.0;
        offset += MAX_HYDROGENS + 1;
        row[offset] = if in_ring { 1.0 } else { 0.0 };
        row
    }

    fn edge_row(order: BondOrder, in_ring: bool) -> [f32; EDGE_FEATURES] {
        let mut row = [0.0; EDGE_FEATURES];
        let slot = match order {
            BondOrder::Single => 0,
            BondOrder::Double => 1,
            BondOrder::Triple | BondOrder::Quadruple => 2,
            BondOrder::Aromatic => 3,
        };
        row[slot] = 1.0;
        row[4] = if in_ring { 1.0 } else { 0.0 };
        row
    }
}

impl Featurizer for MolGraphConvFeaturizer {
    fn name(&self) -> String {
        format!("MolGraphConvFeaturizer_use_edges{}", self.use_edges)
    }

    fn featurize_one(&self, datapoint: &Datapoint) -> Result<Features> {
        let mol = datapoint.molecule()?;
        let ring_atoms = mol.ring_atoms();
        let ring_bonds = mol.ring_bonds();

        let rows = (0..mol.num_atoms())
            .flat_map(|i| Self::node_row(&mol, i, ring_atoms[i]))
            .collect_vec();
        let node_features = Array2::from_shape_vec((mol.num_atoms(), NODE_FEATURES), rows)?;

        let directed = mol
            .bonds()
            .iter()
            .enumerate()
            .flat_map(|(b, bond)| [(bond.begin, bond.end, b), (bond.end, bond.begin, b)])
            .collect_vec();
        let mut edge_index = Array2::zeros((2, directed.len()));
        for (e, &(src, dst, _)) in directed.iter().enumerate() {
            edge_index[[0, e]] = src;
            edge_index[[1, e]] = dst;
        }

        let edge_features = if self.use_edges {
            let rows = directed
                .iter()
                .flat_map(|&(_, _, b)| Self::edge_row(mol.bonds()[b].order, ring_bonds[b]))
                .collect_vec();
            Some(Array2::from_shape_vec((directed.len(), EDGE_FEATURES), rows)?)
        } else {
            None
        };

        Ok(Features::Graph(GraphData {
            node_features,
            edge_index,
            edge_features,
        }))
    }
}
