//! Byte-level corpus and random-window batch sampling.
//!
//! Every byte is a token, so the vocabulary is 256 and no tokenizer is
//! needed. Gzip input is decompressed on load.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use candle_core::{Device, Tensor};
use flate2::read::GzDecoder;
use rand::Rng;
use tracing::info;

use crate::error::{Error, Result};

/// Train share of the corpus (90M of the first 95M bytes of enwik8).
pub const DEFAULT_TRAIN_FRACTION: f64 = 90.0 / 95.0;

/// A byte corpus split into train and validation halves.
#[derive(Debug, Clone)]
pub struct ByteCorpus {
    pub train: Vec<u8>,
    pub valid: Vec<u8>,
}

impl ByteCorpus {
    /// Splits `data` so the first `train_fraction` of it is training data.
    pub fn from_bytes(data: Vec<u8>, train_fraction: f64) -> Result<Self> {
        if !(train_fraction > 0.0 && train_fraction < 1.0) {
            return Err(Error::invalid_config(format!(
                "train_fraction must be in (0, 1), got {train_fraction}"
            )));
        }
        let split = (data.len() as f64 * train_fraction).round() as usize;
        let mut train = data;
        let valid = train.split_off(split.min(train.len()));
        Ok(Self { train, valid })
    }

    /// Reads up to `max_bytes` from `path` (gunzipped when it ends in `.gz`).
    pub fn from_file(
        path: impl AsRef<Path>,
        max_bytes: Option<usize>,
        train_fraction: f64,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };

        let mut data = Vec::new();
        match max_bytes {
            Some(limit) => reader.take(limit as u64).read_to_end(&mut data)?,
            None => reader.read_to_end(&mut data)?,
        };
        info!(path = %path.display(), bytes = data.len(), "loaded corpus");

        Self::from_bytes(data, train_fraction)
    }
}

/// Draws random `seq_len + 1` windows from a byte buffer.
#[derive(Debug, Clone)]
pub struct TextSampler {
    data: Vec<u8>,
    seq_len: usize,
}

impl TextSampler {
    /// Fails if `data` cannot hold a single window.
    pub fn new(data: Vec<u8>, seq_len: usize) -> Result<Self> {
        if seq_len == 0 {
            return Err(Error::invalid_config("seq_len must be positive"));
        }
        if data.len() <= seq_len + 1 {
            return Err(Error::Data(format!(
                "corpus of {} bytes is too short for windows of {}",
                data.len(),
                seq_len + 1
            )));
        }
        Ok(Self { data, seq_len })
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// One window of `seq_len + 1` tokens.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<u32> {
        let start = rng.gen_range(0..self.data.len() - self.seq_len - 1);
        self.data[start..start + self.seq_len + 1]
            .iter()
            .map(|&b| b as u32)
            .collect()
    }

    /// `batch_size` windows stacked into a `[batch_size, seq_len + 1]` tensor.
    pub fn batch<R: Rng + ?Sized>(
        &self,
        batch_size: usize,
        rng: &mut R,
        device: &Device,
    ) -> Result<Tensor> {
        let width = self.seq_len + 1;
        let mut flat = Vec::with_capacity(batch_size * width);
        for _ in 0..batch_size {
            flat.extend(self.sample(rng));
        }
        Ok(Tensor::from_vec(flat, (batch_size, width), device)?)
    }
}

/// Renders byte tokens as text, mapping control bytes to spaces.
pub fn decode_token(token: u32) -> char {
    char::from_u32(token.max(32)).unwrap_or(' ')
}

/// Renders a token sequence as text.
pub fn decode_tokens(tokens: &[u32]) -> String {
    tokens.iter().map(|&t| decode_token(t)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_split() {
        let corpus = ByteCorpus::from_bytes((0..100u8).collect(), 0.9).unwrap();
        assert_eq!(corpus.train.len(), 90);
        assert_eq!(corpus.valid.len(), 10);
        assert_eq!(corpus.valid[0], 90);
        assert!(ByteCorpus::from_bytes(vec![1, 2], 1.0).is_err());
    }

    #[test]
    fn test_windows_are_contiguous() {
        let sampler = TextSampler::new((0..200u8).collect(), 16).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let window = sampler.sample(&mut rng);
            assert_eq!(window.len(), 17);
            assert!(window.windows(2).all(|w| w[1] == w[0] + 1));
        }
    }

    #[test]
    fn test_batch_shape() {
        let sampler = TextSampler::new(vec![b'a'; 64], 8).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let batch = sampler.batch(3, &mut rng, &Device::Cpu).unwrap();
        assert_eq!(batch.dims(), &[3, 9]);
        assert_eq!(batch.dtype(), candle_core::DType::U32);
    }

    #[test]
    fn test_short_corpus_rejected() {
        assert!(TextSampler::new(vec![0; 9], 8).is_err());
    }

    #[test]
    fn test_decode_tokens() {
        assert_eq!(decode_tokens(&[72, 105, 0, 10]), "Hi  ");
    }
}
