use crate::featurizer::{Datapoint, Featurizer};
use anyhow::{anyhow, bail, Result};
use ferrochem_core::{Features, GraphData};
use ndarray::{Array1, Array2};

/// Picks named numeric fields out of a tabular record, in order.
#[derive(Debug, Clone, Default)]
pub struct UserDefinedFeaturizer {
    pub feature_fields: Vec<String>,
}

impl UserDefinedFeaturizer {
    pub fn new(feature_fields: Vec<String>) -> Self {
        Self { feature_fields }
    }
}

impl Featurizer for UserDefinedFeaturizer {
    fn name(&self) -> String {
        "UserDefinedFeaturizer".to_string()
    }

    fn featurize_one(&self, datapoint: &Datapoint) -> Result<Features> {
        let Datapoint::Record(record) = datapoint else {
            bail!("UserDefinedFeaturizer expects a tabular record");
        };
        let values = self
            .feature_fields
            .iter()
            .map(|field| {
                record
                    .get(field)
                    .map(|&v| v as f32)
                    .ok_or_else(|| anyhow!("record has no field '{}'", field))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Features::Array(Array1::from(values).into_dyn()))
    }
}

/// Passes the input through: the SMILES text itself, or the bare molecular graph with atomic
/// numbers as the only node feature.
#[derive(Debug, Clone, Default)]
pub struct RawFeaturizer {
    pub smiles: bool,
}

impl Featurizer for RawFeaturizer {
    fn name(&self) -> String {
        format!("RawFeaturizer_smiles{}", self.smiles)
    }

    fn featurize_one(&self, datapoint: &Datapoint) -> Result<Features> {
        if self.smiles {
            return match datapoint {
                Datapoint::Smiles(s) => {
                    // validate, but keep the text as given
                    crate::Molecule::from_smiles(s)?;
                    Ok(Features::Text(s.to_string()))
                }
                _ => bail!("RawFeaturizer(smiles = true) needs SMILES input"),
            };
        }
        let mol = datapoint.molecule()?;
        let node_features = Array2::from_shape_fn((mol.num_atoms(), 1), |(i, _)| {
            mol.atoms()[i].atomic_number as f32
        });
        let mut edge_index = Array2::zeros((2, mol.bonds().len() * 2));
        for (b, bond) in mol.bonds().iter().enumerate() {
            edge_index[[0, 2 * b]] = bond.begin;
            edge_index[[1, 2 * b]] = bond.end;
            edge_index[[0, 2 * b + 1]] = bond.end;
            edge_index[[1, 2 * b + 1]] = bond.begin;
        }
        Ok(Features::Graph(GraphData {
            node_features,
            edge_index,
            edge_features: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_user_defined_fields_in_order() {
        let record: HashMap<String, f64> =
            [("a".to_string(), 1.0), ("b".to_string(), 2.0)].into_iter().collect();
        let f = UserDefinedFeaturizer::new(vec!["b".into(), "a".into()]);
        match f.featurize_one(&Datapoint::Record(&record)).unwrap() {
            Features::Array(a) => assert_eq!(a.as_slice().unwrap(), &[2.0, 1.0]),
            other => panic!("unexpected {:?}", other),
        }
        let missing = UserDefinedFeaturizer::new(vec!["c".into()]);
        assert!(missing.featurize_one(&Datapoint::Record(&record)).is_err());
        assert!(f.featurize_one(&Datapoint::Smiles("CC")).is_err());
    }

    #[test]
    fn test_raw_smiles_and_graph() {
        let text = RawFeaturizer { smiles: true }
            .featurize_one(&Datapoint::Smiles("CCO"))
            .unwrap();
        assert_eq!(text, Features::Text("CCO".into()));

        match RawFeaturizer::default()
            .featurize_one(&Datapoint::Smiles("CCO"))
            .unwrap()
        {
            Features::Graph(g) => {
                assert_eq!(g.num_nodes(), 3);
                assert_eq!(g.num_edges(), 4);
                assert_eq!(g.node_features[[2, 0]], 8.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
