//! Sequence-to-sequence translation with GRU encoder and decoder.
//!
//! The encoder reads the (optionally reversed) input followed by an end token and compresses its
//! final GRU state into a fixed-size embedding. The decoder receives that embedding at every
//! step and emits a distribution over output tokens plus the end token for each of
//! `max_output_length` positions. Decoding the per-position distributions is a beam search.
//!
//! In variational mode the encoder produces a mean and a log-variance; training samples the
//! embedding from that gaussian and adds a KL term whose weight ramps from 0 to 1 between
//! `annealing_start_step` and `annealing_final_step`. Inference always uses the mean.
use crate::beam::beam_search;
use anyhow::{anyhow, bail, Result};
use bon::Builder;
use candle_core::{DType, Device, Tensor, D};
use candle_nn::rnn::{gru, GRUConfig, GRU, RNN};
use candle_nn::{embedding, linear, AdamW, Dropout, Embedding, Linear, Module, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone, Builder)]
pub struct SeqToSeqConfig<T> {
    pub input_tokens: Vec<T>,
    pub output_tokens: Vec<T>,
    pub max_output_length: usize,
    #[builder(default = 4)]
    pub encoder_layers: usize,
    #[builder(default = 4)]
    pub decoder_layers: usize,
    #[builder(default = 512)]
    pub embedding_dimension: usize,
    #[builder(default = 0.0)]
    pub dropout: f32,
    #[builder(default = true)]
    pub reverse_input: bool,
    #[builder(default = false)]
    pub variational: bool,
    #[builder(default = 5000)]
    pub annealing_start_step: usize,
    #[builder(default = 10000)]
    pub annealing_final_step: usize,
    #[builder(default = 100)]
    pub batch_size: usize,
    #[builder(default = 0.001)]
    pub learning_rate: f64,
    pub seed: Option<u64>,
    #[builder(default = Device::Cpu)]
    pub device: Device,
}

/// Weight of the KL term at `step`.
pub fn annealing_weight(step: usize, start: usize, end: usize) -> f64 {
    if step < start {
        0.0
    } else if step >= end {
        1.0
    } else {
        (step - start) as f64 / (end - start) as f64
    }
}

fn index_of<T: Clone + Eq + Hash>(tokens: &[T]) -> HashMap<T, usize> {
    tokens
        .iter()
        .enumerate()
        .map(|(i, t)| (t.clone(), i))
        .collect()
}

fn stacked_gru(layers: usize, dim: usize, vb: &VarBuilder, prefix: &str) -> Result<Vec<GRU>> {
    (0..layers)
        .map(|i| Ok(gru(dim, dim, GRUConfig::default(), vb.pp(format!("{}{}", prefix, i)))?))
        .collect()
}

fn run_stacked(grus: &[GRU], mut xs: Tensor) -> Result<Tensor> {
    for layer in grus {
        let states = layer.seq(&xs)?;
        xs = layer.states_to_tensor(&states)?;
    }
    Ok(xs)
}

pub struct SeqToSeq<T> {
    config: SeqToSeqConfig<T>,
    input_index: HashMap<T, usize>,
    output_index: HashMap<T, usize>,
    varmap: VarMap,
    embedding: Embedding,
    encoder: Vec<GRU>,
    to_mean: Linear,
    to_log_var: Option<Linear>,
    decoder: Vec<GRU>,
    to_tokens: Linear,
    optimizer: AdamW,
    rng: StdRng,
    global_step: usize,
}

impl<T: Clone + Eq + Hash> SeqToSeq<T> {
    pub fn new(config: SeqToSeqConfig<T>) -> Result<Self> {
        if config.input_tokens.is_empty() || config.output_tokens.is_empty() {
            bail!("input and output vocabularies must be non-empty");
        }
        if config.max_output_length == 0 || config.embedding_dimension == 0 {
            bail!("max_output_length and embedding_dimension must be positive");
        }
        let input_index = index_of(&config.input_tokens);
        let output_index = index_of(&config.output_tokens);
        if input_index.len() != config.input_tokens.len()
            || output_index.len() != config.output_tokens.len()
        {
            bail!("token vocabularies contain duplicates");
        }

        let dim = config.embedding_dimension;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &config.device);
        let embedding = embedding(config.input_tokens.len() + 1, dim, vb.pp("encoder.embedding"))?;
        let encoder = stacked_gru(config.encoder_layers, dim, &vb, "encoder.gru")?;
        let to_mean = linear(dim, dim, vb.pp("encoder.mean"))?;
        let to_log_var = if config.variational {
            Some(linear(dim, dim, vb.pp("encoder.log_var"))?)
        } else {
            None
        };
        let decoder = stacked_gru(config.decoder_layers, dim, &vb, "decoder.gru")?;
        let to_tokens = linear(dim, config.output_tokens.len() + 1, vb.pp("decoder.output"))?;

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        reinitialize(&varmap, &mut rng)?;
        let optimizer = AdamW::new(
            varmap.all_vars(),
            ParamsAdamW {
                lr: config.learning_rate,
                ..Default::default()
            },
        )?;
        tracing::debug!(
            "SeqToSeq with {} input and {} output tokens, {} parameter tensors",
            config.input_tokens.len(),
            config.output_tokens.len(),
            varmap.all_vars().len()
        );

        Ok(Self {
            config,
            input_index,
            output_index,
            varmap,
            embedding,
            encoder,
            to_mean,
            to_log_var,
            decoder,
            to_tokens,
            optimizer,
            rng,
            global_step: 0,
        })
    }

    pub fn config(&self) -> &SeqToSeqConfig<T> {
        &self.config
    }

    /// Optimizer steps taken so far.
    pub fn global_step(&self) -> usize {
        self.global_step
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    fn input_end(&self) -> usize {
        self.config.input_tokens.len()
    }

    fn output_end(&self) -> usize {
        self.config.output_tokens.len()
    }

    /// Token ids `[batch, longest + 1]` with the end token after each sequence, and the
    /// position of that end token per row.
    fn input_batch(&self, sequences: &[Vec<T>]) -> Result<(Tensor, Vec<usize>)> {
        let end = self.input_end() as u32;
        let width = sequences.iter().map(Vec::len).max().unwrap_or(0) + 1;
        let mut ids = Vec::with_capacity(sequences.len() * width);
        let mut lengths = Vec::with_capacity(sequences.len());
        for (row, sequence) in sequences.iter().enumerate() {
            let mut tokens = sequence
                .iter()
                .enumerate()
                .map(|(col, t)| {
                    self.input_index
                        .get(t)
                        .map(|&i| i as u32)
                        .ok_or_else(|| anyhow!("unknown input token in sequence {} at {}", row, col))
                })
                .collect::<Result<Vec<_>>>()?;
            if self.config.reverse_input {
                tokens.reverse();
            }
            lengths.push(tokens.len());
            tokens.resize(width, end);
            ids.extend(tokens);
        }
        let ids = Tensor::from_vec(ids, (sequences.len(), width), &self.config.device)?;
        Ok((ids, lengths))
    }

    /// Labels and mask `[batch, max_output_length]`; the end token follows each target when it
    /// fits.
    fn target_batch(&self, sequences: &[Vec<T>]) -> Result<(Tensor, Tensor, usize)> {
        let steps = self.config.max_output_length;
        let end = self.output_end() as u32;
        let mut labels = vec![end; sequences.len() * steps];
        let mut mask = vec![0f32; sequences.len() * steps];
        let mut counted = 0;
        for (row, sequence) in sequences.iter().enumerate() {
            if sequence.len() > steps {
                bail!(
                    "target sequence {} has {} tokens, more than max_output_length = {}",
                    row,
                    sequence.len(),
                    steps
                );
            }
            for (col, t) in sequence.iter().enumerate() {
                let idx = self
                    .output_index
                    .get(t)
                    .ok_or_else(|| anyhow!("unknown output token in sequence {} at {}", row, col))?;
                labels[row * steps + col] = *idx as u32;
            }
            let used = (sequence.len() + 1).min(steps);
            mask[row * steps..row * steps + used].fill(1.0);
            counted += used;
        }
        let shape = (sequences.len(), steps);
        Ok((
            Tensor::from_vec(labels, shape, &self.config.device)?,
            Tensor::from_vec(mask, shape, &self.config.device)?,
            counted,
        ))
    }

    /// `(mean, log_var)` of the embedding, each `[batch, embedding_dimension]`.
    fn encode(&self, ids: &Tensor, lengths: &[usize], train: bool) -> Result<(Tensor, Option<Tensor>)> {
        let mut xs = self.embedding.forward(ids)?;
        if train && self.config.dropout > 0.0 {
            xs = Dropout::new(self.config.dropout).forward(&xs, true)?;
        }
        let xs = run_stacked(&self.encoder, xs)?;
        let last = lengths
            .iter()
            .enumerate()
            .map(|(row, &len)| xs.get(row)?.get(len))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let last = Tensor::stack(&last, 0)?;
        let mean = self.to_mean.forward(&last)?;
        let log_var = match &self.to_log_var {
            Some(layer) => Some(layer.forward(&last)?),
            None => None,
        };
        Ok((mean, log_var))
    }

    /// Logits `[batch, max_output_length, output tokens + 1]`.
    fn decode(&self, embeddings: &Tensor) -> Result<Tensor> {
        let (batch, dim) = embeddings.dims2()?;
        let xs = embeddings
            .unsqueeze(1)?
            .broadcast_as((batch, self.config.max_output_length, dim))?
            .contiguous()?;
        let xs = run_stacked(&self.decoder, xs)?;
        Ok(self.to_tokens.forward(&xs)?)
    }

    fn gaussian(&mut self, shape: (usize, usize)) -> Result<Tensor> {
        let n = shape.0 * shape.1;
        let values: Vec<f32> = (0..n)
            .map(|_| {
                // Box-Muller
                let u1: f64 = self.rng.gen_range(f64::MIN_POSITIVE..1.0);
                let u2: f64 = self.rng.gen();
                ((-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()) as f32
            })
            .collect();
        Ok(Tensor::from_vec(values, shape, &self.config.device)?)
    }

    fn train_batch(&mut self, batch: &[(Vec<T>, Vec<T>)]) -> Result<f32> {
        let inputs: Vec<Vec<T>> = batch.iter().map(|(i, _)| i.clone()).collect();
        let targets: Vec<Vec<T>> = batch.iter().map(|(_, t)| t.clone()).collect();
        let (ids, lengths) = self.input_batch(&inputs)?;
        let (labels, mask, counted) = self.target_batch(&targets)?;

        let (mean, log_var) = self.encode(&ids, &lengths, true)?;
        let embeddings = match &log_var {
            Some(log_var) => {
                let eps = self.gaussian(mean.dims2()?)?;
                let std = (log_var * 0.5)?.exp()?;
                (&mean + (std * eps)?)?
            }
            None => mean.clone(),
        };

        let logits = self.decode(&embeddings)?;
        let log_probs = candle_nn::ops::log_softmax(&logits, D::Minus1)?;
        let picked = log_probs.gather(&labels.unsqueeze(2)?, 2)?.squeeze(2)?;
        let mut loss = ((picked * &mask)?.sum_all()?.neg()? / counted.max(1) as f64)?;

        if let Some(log_var) = &log_var {
            let weight = annealing_weight(
                self.global_step,
                self.config.annealing_start_step,
                self.config.annealing_final_step,
            );
            let kl = (((log_var + 1.0)? - mean.sqr()?)? - log_var.exp()?)?
                .sum(1)?
                .mean_all()?;
            loss = (loss + (kl * (-0.5 * weight))?)?;
        }

        self.optimizer.backward_step(&loss)?;
        self.global_step += 1;
        Ok(loss.to_scalar::<f32>()?)
    }

    /// Train on `(input, target)` pairs for `epochs` passes. Returns the loss of the last batch.
    pub fn fit_sequences<I>(&mut self, sequences: I, epochs: usize) -> Result<f32>
    where
        I: IntoIterator<Item = (Vec<T>, Vec<T>)>,
    {
        let pairs: Vec<(Vec<T>, Vec<T>)> = sequences.into_iter().collect();
        if pairs.is_empty() {
            bail!("no training sequences");
        }
        let mut loss = f32::NAN;
        for epoch in 0..epochs {
            for batch in pairs.chunks(self.config.batch_size.max(1)) {
                loss = self.train_batch(batch)?;
            }
            tracing::info!("epoch {}: loss {:.4}", epoch + 1, loss);
        }
        Ok(loss)
    }

    /// Embedding of each sequence (the mean in variational mode).
    pub fn predict_embeddings(&self, sequences: &[Vec<T>]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(sequences.len());
        for batch in sequences.chunks(self.config.batch_size.max(1)) {
            let (ids, lengths) = self.input_batch(batch)?;
            let (mean, _) = self.encode(&ids, &lengths, false)?;
            out.extend(mean.to_vec2::<f32>()?);
        }
        Ok(out)
    }

    pub fn predict_from_embeddings(&self, embeddings: &[Vec<f32>], beam_width: usize) -> Result<Vec<Vec<T>>> {
        if beam_width == 0 {
            bail!("beam_width must be at least 1");
        }
        let dim = self.config.embedding_dimension;
        let mut out = Vec::with_capacity(embeddings.len());
        for batch in embeddings.chunks(self.config.batch_size.max(1)) {
            if let Some(bad) = batch.iter().find(|e| e.len() != dim) {
                bail!("embedding has {} values, expected {}", bad.len(), dim);
            }
            let flat: Vec<f32> = batch.iter().flatten().copied().collect();
            let embeddings = Tensor::from_vec(flat, (batch.len(), dim), &self.config.device)?;
            let probs = candle_nn::ops::softmax(&self.decode(&embeddings)?, D::Minus1)?;
            for positions in probs.to_vec3::<f32>()? {
                let tokens = beam_search(&positions, beam_width, self.output_end());
                out.push(
                    tokens
                        .into_iter()
                        .map(|i| self.config.output_tokens[i].clone())
                        .collect(),
                );
            }
        }
        Ok(out)
    }

    pub fn predict_from_sequences(&self, sequences: &[Vec<T>], beam_width: usize) -> Result<Vec<Vec<T>>> {
        let embeddings = self.predict_embeddings(sequences)?;
        self.predict_from_embeddings(&embeddings, beam_width)
    }

    pub fn predict_embedding(&self, sequence: &[T]) -> Result<Vec<f32>> {
        self.predict_embeddings(&[sequence.to_vec()])?
            .pop()
            .ok_or_else(|| anyhow!("no embedding produced"))
    }

    pub fn predict_from_embedding(&self, embedding: &[f32], beam_width: usize) -> Result<Vec<T>> {
        self.predict_from_embeddings(&[embedding.to_vec()], beam_width)?
            .pop()
            .ok_or_else(|| anyhow!("no sequence produced"))
    }

    pub fn predict_from_sequence(&self, sequence: &[T], beam_width: usize) -> Result<Vec<T>> {
        self.predict_from_sequences(&[sequence.to_vec()], beam_width)?
            .pop()
            .ok_or_else(|| anyhow!("no sequence produced"))
    }
}

/// Redraw every parameter from `U(-1/sqrt(fan_in), 1/sqrt(fan_in))` so initialization follows
/// the configured seed on every device.
fn reinitialize(varmap: &VarMap, rng: &mut StdRng) -> Result<()> {
    let vars = varmap
        .data()
        .lock()
        .map_err(|_| anyhow!("parameter store lock poisoned"))?;
    let mut names: Vec<&String> = vars.keys().collect();
    names.sort();
    for name in names {
        let var = &vars[name];
        let fan_in = var.dims().last().copied().unwrap_or(1).max(1);
        let bound = 1.0 / (fan_in as f32).sqrt();
        let values: Vec<f32> = (0..var.elem_count())
            .map(|_| rng.gen_range(-bound..bound))
            .collect();
        var.set(&Tensor::from_vec(values, var.shape(), var.device())?)?;
    }
    Ok(())
}
