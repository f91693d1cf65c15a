//! # ferrochem-featurizers
//!
//! Turns molecules (SMILES strings, XYZ coordinate files) and tabular records into
//! [`ferrochem_core::Features`].
//!
//! * [`Molecule`]: atoms, bonds and optional 3D coordinates, parsed from SMILES or XYZ
//! * [`Featurizer`]: the common interface; [`FeaturizerKind`] selects one by name
//! * fingerprints, Coulomb matrices, graph inputs and character sequences
//!
mod coulomb;
mod featurizer;
mod fingerprint;
mod graph;
mod molecule;
mod raw;
mod sequence;
mod smiles;

pub use coulomb::{coulomb_matrix, symmetric_eigenvalues, BPSymmetryFunctionInput, CoulombMatrix, CoulombMatrixEig};
pub use featurizer::{Datapoint, Featurizer, FeaturizerKind, FeaturizerSpec, DEFAULT_MAX_ATOMS};
pub use fingerprint::CircularFingerprint;
pub use graph::{MolGraphConvFeaturizer, EDGE_FEATURES, NODE_FEATURES};
pub use molecule::{atomic_number, element_symbol, Atom, Bond, BondOrder, Chirality, Molecule};
pub use raw::{RawFeaturizer, UserDefinedFeaturizer};
pub use sequence::{create_char_to_idx, SmilesToSeq, PAD_TOKEN, UNK_TOKEN};
pub use smiles::{parse_smiles, SmilesError};
