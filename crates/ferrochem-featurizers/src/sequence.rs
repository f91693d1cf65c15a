use crate::featurizer::{Datapoint, Featurizer};
use anyhow::{anyhow, bail, Result};
use ferrochem_core::Features;
use ndarray::Array1;
use std::collections::{BTreeMap, BTreeSet};

pub const PAD_TOKEN: &str = "<pad>";
pub const UNK_TOKEN: &str = "<unk>";

/// Characters seen in SMILES no longer than `max_len`, sorted, followed by the pad and
/// unknown tokens.
pub fn create_char_to_idx<S: AsRef<str>>(smiles: &[S], max_len: usize) -> BTreeMap<String, usize> {
    let chars: BTreeSet<char> = smiles
        .iter()
        .map(|s| s.as_ref())
        .filter(|s| s.chars().count() <= max_len)
        .flat_map(str::chars)
        .collect();
    chars
        .into_iter()
        .map(String::from)
        .chain([PAD_TOKEN.to_string(), UNK_TOKEN.to_string()])
        .enumerate()
        .map(|(i, token)| (token, i))
        .collect()
}

/// Encodes SMILES characters as vocabulary indices, with `pad_len` pad tokens in front and
/// padding behind up to `max_len + 2 * pad_len`.
#[derive(Debug, Clone)]
pub struct SmilesToSeq {
    pub char_to_idx: BTreeMap<String, usize>,
    pub max_len: usize,
    pub pad_len: usize,
}

const DEFAULT_CHARSET: &str = "#()+-./123456789=@BCFHINOPS[]\\clnors";

impl Default for SmilesToSeq {
    fn default() -> Self {
        Self::new(create_char_to_idx(&[DEFAULT_CHARSET], usize::MAX))
    }
}

impl SmilesToSeq {
    pub fn new(char_to_idx: BTreeMap<String, usize>) -> Self {
        Self {
            char_to_idx,
            max_len: 250,
            pad_len: 10,
        }
    }

    fn token(&self, token: &str) -> Result<usize> {
        self.char_to_idx
            .get(token)
            .copied()
            .ok_or_else(|| anyhow!("vocabulary is missing the '{}' token", token))
    }

    pub fn to_seq(&self, smiles: &str) -> Result<Vec<usize>> {
        let pad = self.token(PAD_TOKEN)?;
        let unk = self.token(UNK_TOKEN)?;
        let mut seq = vec![pad; self.pad_len];
        seq.extend(smiles.chars().map(|c| {
            self.char_to_idx
                .get(c.to_string().as_str())
                .copied()
                .unwrap_or(unk)
        }));
        seq.resize(self.max_len + 2 * self.pad_len, pad);
        Ok(seq)
    }

    /// Inverse of [`SmilesToSeq::to_seq`]; pad tokens are dropped.
    pub fn smiles_from_seq(&self, seq: &[usize]) -> Result<String> {
        let idx_to_char: BTreeMap<usize, &str> = self
            .char_to_idx
            .iter()
            .map(|(token, &i)| (i, token.as_str()))
            .collect();
        let mut smiles = String::new();
        for &i in seq {
            match idx_to_char.get(&i) {
                Some(&PAD_TOKEN) => {}
                Some(token) => smiles.push_str(token),
                None => bail!("index {} is not in the vocabulary", i),
            }
        }
        Ok(smiles)
    }
}

impl Featurizer for SmilesToSeq {
    fn name(&self) -> String {
        format!("SmilesToSeq_max_len{}_pad_len{}", self.max_len, self.pad_len)
    }

    fn featurize_one(&self, datapoint: &Datapoint) -> Result<Features> {
        let Datapoint::Smiles(smiles) = datapoint else {
            bail!("SmilesToSeq needs SMILES input");
        };
        let length = smiles.chars().count();
        if length > self.max_len {
            bail!(
                "SMILES of length {} exceeds max_len = {}",
                length,
                self.max_len
            );
        }
        let seq = self.to_seq(smiles)?;
        Ok(Features::Array(
            Array1::from_iter(seq.into_iter().map(|i| i as f32)).into_dyn(),
        ))
    }
}
