//! Circular (Morgan / ECFP-style) fingerprints.
//!
//! Every atom starts from a hashed invariant. At each radius the identifier of an atom is
//! rehashed together with the sorted `(bond, neighbour identifier)` pairs around it, so an
//! identifier at radius `r` describes the environment within `r` bonds. All identifiers from
//! radius 0 to `radius` are folded into `size` bits.
use crate::featurizer::{Datapoint, Featurizer};
use crate::molecule::{BondOrder, Chirality, Molecule};
use anyhow::{bail, Result};
use ferrochem_core::Features;
use ndarray::Array1;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct CircularFingerprint {
    pub radius: usize,
    pub size: usize,
    /// Include chirality tags in the atom invariants.
    pub chiral: bool,
    /// Include bond orders when growing environments.
    pub bonds: bool,
    /// Pharmacophoric (FCFP-style) invariants instead of atomic ones.
    pub features: bool,
    /// Count occurrences per bit instead of setting 0/1.
    pub counts: bool,
}

impl Default for CircularFingerprint {
    fn default() -> Self {
        Self {
            radius: 2,
            size: 2048,
            chiral: false,
            bonds: true,
            features: false,
            counts: false,
        }
    }
}

/// Identifier hashing that is stable across platforms and releases: every field is written
/// little-endian into SHA-256 and the first 8 bytes of the digest form the identifier.
struct IdHasher(Sha256);

impl IdHasher {
    fn new() -> Self {
        Self(Sha256::new())
    }

    fn int(mut self, value: i64) -> Self {
        self.0.update(value.to_le_bytes());
        self
    }

    fn flag(self, value: bool) -> Self {
        self.int(value as i64)
    }

    fn id(mut self, value: u64) -> Self {
        self.0.update(value.to_le_bytes());
        self
    }

    fn finish(self) -> u64 {
        let digest = self.0.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(head)
    }
}

fn chirality_code(chirality: Option<Chirality>) -> i64 {
    match chirality {
        None => 0,
        Some(Chirality::CounterClockwise) => 1,
        Some(Chirality::Clockwise) => 2,
    }
}

fn bond_code(order: BondOrder) -> u8 {
    match order {
        BondOrder::Single => 1,
        BondOrder::Double => 2,
        BondOrder::Triple => 3,
        BondOrder::Quadruple => 4,
        BondOrder::Aromatic => 5,
    }
}

impl CircularFingerprint {
    pub fn new(radius: usize, size: usize) -> Self {
        Self {
            radius,
            size,
            ..Self::default()
        }
    }

    fn atom_invariant(&self, mol: &Molecule, atom: usize, in_ring: bool) -> u64 {
        let a = &mol.atoms()[atom];
        let chirality = if self.chiral { a.chirality } else { None };
        if self.features {
            let z = a.atomic_number;
            let hydrogens = mol.total_hydrogens(atom);
            let donor = matches!(z, 7 | 8) && hydrogens > 0;
            let acceptor = matches!(z, 7 | 8) && a.formal_charge <= 0;
            let halogen = matches!(z, 9 | 17 | 35 | 53);
            let basic = z == 7 && !a.aromatic && a.formal_charge >= 0;
            let acidic = z == 8 && hydrogens > 0 && a.formal_charge <= 0;
            IdHasher::new()
                .int(-1)
                .flag(donor)
                .flag(acceptor)
                .flag(a.aromatic)
                .flag(halogen)
                .flag(basic)
                .flag(acidic)
                .int(chirality_code(chirality))
                .finish()
        } else {
            IdHasher::new()
                .int(a.atomic_number as i64)
                .int(mol.heavy_degree(atom) as i64)
                .int(mol.total_hydrogens(atom) as i64)
                .int(a.formal_charge as i64)
                .int(a.isotope.map_or(-1, |i| i as i64))
                .flag(in_ring)
                .int(chirality_code(chirality))
                .finish()
        }
    }

    /// All environment identifiers, radius 0 first.
    pub fn identifiers(&self, mol: &Molecule) -> Vec<u64> {
        let heavy: Vec<usize> = (0..mol.num_atoms())
            .filter(|&i| !mol.atoms()[i].is_hydrogen())
            .collect();
        let ring_atoms = mol.ring_atoms();
        let mut current: Vec<u64> = (0..mol.num_atoms())
            .map(|i| self.atom_invariant(mol, i, ring_atoms[i]))
            .collect();
        let mut all: Vec<u64> = heavy.iter().map(|&i| current[i]).collect();

        for r in 1..=self.radius {
            let next: Vec<u64> = (0..mol.num_atoms())
                .map(|atom| {
                    let mut env: Vec<(u8, u64)> = mol
                        .neighbors(atom)
                        .iter()
                        .filter(|&&(n, _)| !mol.atoms()[n].is_hydrogen())
                        .map(|&(n, b)| {
                            let code = if self.bonds {
                                bond_code(mol.bonds()[b].order)
                            } else {
                                0
                            };
                            (code, current[n])
                        })
                        .collect();
                    env.sort_unstable();
                    env.iter()
                        .fold(
                            IdHasher::new().int(r as i64).id(current[atom]),
                            |h, &(code, id)| h.int(code as i64).id(id),
                        )
                        .finish()
                })
                .collect();
            all.extend(heavy.iter().map(|&i| next[i]));
            current = next;
        }
        all
    }
}

impl Featurizer for CircularFingerprint {
    fn name(&self) -> String {
        format!("CircularFingerprint_radius{}_size{}", self.radius, self.size)
    }

    fn featurize_one(&self, datapoint: &Datapoint) -> Result<Features> {
        if self.size == 0 {
            bail!("fingerprint size must be positive");
        }
        let mol = datapoint.molecule()?;
        let mut bits = Array1::<f32>::zeros(self.size);
        for id in self.identifiers(&mol) {
            let bit = (id % self.size as u64) as usize;
            if self.counts {
                bits[bit] += 1.0;
            } else {
                bits[bit] = 1.0;
            }
        }
        Ok(Features::Array(bits.into_dyn()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits(fp: &CircularFingerprint, smiles: &str) -> Vec<f32> {
        match fp.featurize_one(&Datapoint::Smiles(smiles)).unwrap() {
            Features::Array(a) => a.iter().copied().collect(),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_shape_and_determinism() {
        let fp = CircularFingerprint::default();
        let a = bits(&fp, "CC(=O)Oc1ccccc1C(=O)O");
        assert_eq!(a.len(), 2048);
        assert_eq!(a, bits(&fp, "CC(=O)Oc1ccccc1C(=O)O"));
        assert!(a.iter().any(|&b| b == 1.0));
    }

    #[test]
    fn test_different_molecules_differ() {
        let fp = CircularFingerprint::default();
        assert_ne!(bits(&fp, "CCO"), bits(&fp, "CCN"));
    }

    #[test]
    fn test_identifier_count_grows_with_radius() {
        let mol = Molecule::from_smiles("CCCC").unwrap();
        assert_eq!(CircularFingerprint::new(0, 64).identifiers(&mol).len(), 4);
        assert_eq!(CircularFingerprint::new(2, 64).identifiers(&mol).len(), 12);
    }

    #[test]
    fn test_counts_mode() {
        let fp = CircularFingerprint {
            counts: true,
            ..CircularFingerprint::new(0, 1024)
        };
        // two methyl and two methylene invariants, one count each
        let total: f32 = bits(&fp, "CCCC").iter().sum();
        assert_eq!(total, 4.0);
    }

    #[test]
    fn test_identifiers_are_stable() {
        // methane: Z=6, no heavy neighbours, 4 H, neutral, no isotope, acyclic, achiral
        let mol = Molecule::from_smiles("C").unwrap();
        assert_eq!(
            CircularFingerprint::new(0, 64).identifiers(&mol),
            vec![15212297547521592288]
        );
    }
}
