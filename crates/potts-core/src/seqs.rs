//! Alphabets and fixed-length sequence batches.

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorInfo, PottsError};

/// Ordered alphabet mapping letters to residue indices `0..q`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Alphabet {
    letters: Vec<char>,
}

impl Alphabet {
    /// Parses an alphabet from a string of distinct letters.
    pub fn new(letters: &str) -> Result<Self, PottsError> {
        let chars: Vec<char> = letters.chars().collect();
        if chars.is_empty() || chars.len() > u8::MAX as usize {
            return Err(PottsError::Config(
                ErrorInfo::new("alphabet-size", "alphabet must hold 1..=255 letters")
                    .with_context("alphabet", letters),
            ));
        }
        for (idx, c) in chars.iter().enumerate() {
            if chars[..idx].contains(c) {
                return Err(PottsError::Config(
                    ErrorInfo::new("alphabet-duplicate", "alphabet letters must be distinct")
                        .with_context("letter", c),
                ));
            }
        }
        Ok(Self { letters: chars })
    }

    /// Alphabet size `q`.
    pub fn len(&self) -> usize {
        self.letters.len()
    }

    /// Always false for a constructed alphabet.
    pub fn is_empty(&self) -> bool {
        self.letters.is_empty()
    }

    /// Encodes a string into residue indices.
    pub fn encode(&self, text: &str) -> Result<Vec<u8>, PottsError> {
        text.chars()
            .map(|c| {
                self.letters
                    .iter()
                    .position(|&l| l == c)
                    .map(|p| p as u8)
                    .ok_or_else(|| {
                        PottsError::Config(
                            ErrorInfo::new("alphabet-letter", "sequence letter not in alphabet")
                                .with_context("letter", c)
                                .with_context("alphabet", self.to_string()),
                        )
                    })
            })
            .collect()
    }

    /// Decodes residue indices into a string.
    pub fn decode(&self, seq: &[u8]) -> String {
        seq.iter()
            .map(|&r| self.letters.get(r as usize).copied().unwrap_or('?'))
            .collect()
    }
}

impl std::fmt::Display for Alphabet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for c in &self.letters {
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl TryFrom<String> for Alphabet {
    type Error = PottsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Alphabet::new(&value)
    }
}

impl From<Alphabet> for String {
    fn from(value: Alphabet) -> Self {
        value.to_string()
    }
}

/// Contiguous batch of sequences of equal length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeqBatch {
    length: usize,
    data: Vec<u8>,
}

impl SeqBatch {
    /// Empty batch for sequences of length `length`.
    pub fn new(length: usize) -> Self {
        Self {
            length,
            data: Vec::new(),
        }
    }

    /// `count` copies of `seq`.
    pub fn filled(seq: &[u8], count: usize) -> Self {
        let mut data = Vec::with_capacity(seq.len() * count);
        for _ in 0..count {
            data.extend_from_slice(seq);
        }
        Self {
            length: seq.len(),
            data,
        }
    }

    /// Builds a batch from owned rows, checking that every row has length `length`.
    pub fn from_rows(length: usize, rows: Vec<Vec<u8>>) -> Result<Self, PottsError> {
        let mut batch = Self::new(length);
        for row in rows {
            batch.push(&row)?;
        }
        Ok(batch)
    }

    /// Sequence length.
    pub fn seq_len(&self) -> usize {
        self.length
    }

    /// Number of sequences.
    pub fn len(&self) -> usize {
        if self.length == 0 {
            0
        } else {
            self.data.len() / self.length
        }
    }

    /// True when the batch holds no sequences.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Sequence `idx`.
    pub fn get(&self, idx: usize) -> &[u8] {
        &self.data[idx * self.length..(idx + 1) * self.length]
    }

    /// Mutable sequence `idx`.
    pub fn get_mut(&mut self, idx: usize) -> &mut [u8] {
        &mut self.data[idx * self.length..(idx + 1) * self.length]
    }

    /// Appends a sequence.
    pub fn push(&mut self, seq: &[u8]) -> Result<(), PottsError> {
        if seq.len() != self.length {
            return Err(PottsError::Consistency(
                ErrorInfo::new("seq-length", "sequence length does not match batch")
                    .with_context("expected", self.length)
                    .with_context("found", seq.len()),
            ));
        }
        self.data.extend_from_slice(seq);
        Ok(())
    }

    /// Iterates sequences.
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks(self.length.max(1))
    }

    /// Overwrites sequences starting at `offset` with the contents of `src`.
    pub fn write_at(&mut self, offset: usize, src: &SeqBatch) -> Result<(), PottsError> {
        if src.length != self.length || offset + src.len() > self.len() {
            return Err(PottsError::Consistency(
                ErrorInfo::new("seq-store", "snapshot does not fit the destination buffer")
                    .with_context("offset", offset)
                    .with_context("count", src.len())
                    .with_context("capacity", self.len()),
            ));
        }
        let start = offset * self.length;
        self.data[start..start + src.data.len()].copy_from_slice(&src.data);
        Ok(())
    }

    /// Splits into consecutive batches of the given sizes, which must cover the batch exactly.
    pub fn split(&self, sizes: &[usize]) -> Result<Vec<SeqBatch>, PottsError> {
        let expected: usize = sizes.iter().sum();
        if expected != self.len() {
            return Err(PottsError::Consistency(
                ErrorInfo::new("seq-count", format!("expected {expected} total sequences, got {}", self.len()))
                    .with_context("expected", expected)
                    .with_context("found", self.len()),
            ));
        }
        let mut out = Vec::with_capacity(sizes.len());
        let mut start = 0;
        for &size in sizes {
            let end = start + size * self.length;
            out.push(SeqBatch {
                length: self.length,
                data: self.data[start..end].to_vec(),
            });
            start = end;
        }
        Ok(out)
    }

    /// Last `count` sequences of the batch.
    pub fn tail(&self, count: usize) -> SeqBatch {
        let count = count.min(self.len());
        SeqBatch {
            length: self.length,
            data: self.data[(self.len() - count) * self.length..].to_vec(),
        }
    }
}
