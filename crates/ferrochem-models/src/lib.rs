//! # ferrochem-models
//!
//! [`SeqToSeq`]: a GRU encoder/decoder that maps token sequences to fixed-size embeddings and
//! back, optionally as a variational autoencoder.
//!
//! ```ignore
//! let config = SeqToSeqConfig::builder()
//!     .input_tokens(tokens.clone())
//!     .output_tokens(tokens)
//!     .max_output_length(40)
//!     .build();
//! let mut model = SeqToSeq::new(config)?;
//! model.fit_sequences(pairs, 10)?;
//! let decoded = model.predict_from_sequences(&inputs, 4)?;
//! ```
mod beam;
mod seqtoseq;

pub use beam::beam_search;
pub use seqtoseq::{annealing_weight, SeqToSeq, SeqToSeqConfig};
