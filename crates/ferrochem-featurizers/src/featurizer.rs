//! The featurizer interface and the name registry.
use crate::coulomb::{BPSymmetryFunctionInput, CoulombMatrix, CoulombMatrixEig};
use crate::fingerprint::CircularFingerprint;
use crate::graph::MolGraphConvFeaturizer;
use crate::raw::{RawFeaturizer, UserDefinedFeaturizer};
use crate::sequence::SmilesToSeq;
use crate::Molecule;
use anyhow::{anyhow, Result};
use ferrochem_core::Features;
use std::borrow::Cow;
use std::collections::HashMap;
use std::str::FromStr;
use strum::{Display, EnumIter, EnumString};

/// One raw input to a featurizer.
#[derive(Debug, Clone, Copy)]
pub enum Datapoint<'a> {
    Smiles(&'a str),
    Molecule(&'a Molecule),
    Record(&'a HashMap<String, f64>),
}

impl<'a> Datapoint<'a> {
    pub fn molecule(&self) -> Result<Cow<'a, Molecule>> {
        match *self {
            Datapoint::Smiles(s) => Ok(Cow::Owned(Molecule::from_smiles(s)?)),
            Datapoint::Molecule(m) => Ok(Cow::Borrowed(m)),
            Datapoint::Record(_) => Err(anyhow!("a tabular record is not a molecule")),
        }
    }
}

pub trait Featurizer {
    /// Identifies the featurizer and its parameters; used to name cache folders.
    fn name(&self) -> String;

    fn featurize_one(&self, datapoint: &Datapoint) -> Result<Features>;

    /// Featurize a batch. Datapoints that fail are logged and yield `None`.
    fn featurize(&self, datapoints: &[Datapoint]) -> Vec<Option<Features>> {
        datapoints
            .iter()
            .enumerate()
            .map(|(i, dp)| match self.featurize_one(dp) {
                Ok(features) => Some(features),
                Err(e) => {
                    tracing::warn!("{}: failed to featurize datapoint {}: {}", self.name(), i, e);
                    None
                }
            })
            .collect()
    }
}

/// Featurizers that can be selected by name with default parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum FeaturizerKind {
    UserDefinedFeaturizer,
    RawFeaturizer,
    CircularFingerprint,
    CoulombMatrix,
    CoulombMatrixEig,
    BPSymmetryFunctionInput,
    SmilesToSeq,
    MolGraphConvFeaturizer,
}

/// Atom budget for the coordinate featurizers when built by name.
pub const DEFAULT_MAX_ATOMS: usize = 50;

impl FeaturizerKind {
    pub fn create(self) -> Box<dyn Featurizer> {
        match self {
            FeaturizerKind::UserDefinedFeaturizer => Box::new(UserDefinedFeaturizer::new(Vec::new())),
            FeaturizerKind::RawFeaturizer => Box::new(RawFeaturizer::default()),
            FeaturizerKind::CircularFingerprint => Box::new(CircularFingerprint::default()),
            FeaturizerKind::CoulombMatrix => Box::new(CoulombMatrix::new(DEFAULT_MAX_ATOMS)),
            FeaturizerKind::CoulombMatrixEig => Box::new(CoulombMatrixEig::new(DEFAULT_MAX_ATOMS)),
            FeaturizerKind::BPSymmetryFunctionInput => {
                Box::new(BPSymmetryFunctionInput::new(DEFAULT_MAX_ATOMS))
            }
            FeaturizerKind::SmilesToSeq => Box::new(SmilesToSeq::default()),
            FeaturizerKind::MolGraphConvFeaturizer => Box::new(MolGraphConvFeaturizer::default()),
        }
    }
}

/// A featurizer chosen by name or supplied as an instance.
pub enum FeaturizerSpec {
    Name(String),
    Instance(Box<dyn Featurizer>),
}

impl FeaturizerSpec {
    pub fn resolve(self) -> Result<Box<dyn Featurizer>> {
        match self {
            FeaturizerSpec::Name(name) => FeaturizerKind::from_str(&name)
                .map(FeaturizerKind::create)
                .map_err(|_| anyhow!("Unknown featurizer '{}'", name)),
            FeaturizerSpec::Instance(featurizer) => Ok(featurizer),
        }
    }
}

impl From<&str> for FeaturizerSpec {
    fn from(name: &str) -> Self {
        FeaturizerSpec::Name(name.to_string())
    }
}

impl<F: Featurizer + 'static> From<Box<F>> for FeaturizerSpec {
    fn from(featurizer: Box<F>) -> Self {
        FeaturizerSpec::Instance(featurizer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_every_kind_resolves_by_name() {
        for kind in FeaturizerKind::iter() {
            let featurizer = FeaturizerSpec::Name(kind.to_string()).resolve().unwrap();
            assert!(featurizer.name().starts_with(&kind.to_string()));
        }
    }

    #[test]
    fn test_unknown_name() {
        let err = FeaturizerSpec::from("RDKitDescriptors").resolve().err().unwrap();
        assert!(err.to_string().contains("RDKitDescriptors"));
    }

    #[test]
    fn test_instance_passthrough() {
        let spec = FeaturizerSpec::from(Box::new(CircularFingerprint::new(1, 64)));
        assert_eq!(spec.resolve().unwrap().name(), "CircularFingerprint_radius1_size64");
    }

    #[test]
    fn test_batch_skips_failures() {
        let featurizer = FeaturizerKind::CircularFingerprint.create();
        let out = featurizer.featurize(&[Datapoint::Smiles("CCO"), Datapoint::Smiles("C1CC")]);
        assert!(out[0].is_some());
        assert!(out[1].is_none());
    }
}
