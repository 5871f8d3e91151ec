//! Minimal sample-addressing types.
//!
//! The dataset façade's full indexing syntax (step slices, fancy indexing,
//! multi-axis selection) lives outside this crate; here we only need enough
//! to drive the read path and describe it in error messages.

/// Addresses one or more samples of a tensor by global index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleIndex {
    /// A single sample.
    Single(usize),
    /// A contiguous half-open range of samples, `start..end`.
    Range(std::ops::Range<usize>),
    /// Every sample currently in the tensor.
    All,
}

impl SampleIndex {
    /// Expands this index into the concrete list of global sample indices,
    /// given the tensor's current length. Out-of-range indices are dropped,
    /// same as `Range`/`All` — callers that need a single out-of-range index
    /// to be a hard error (see [`Error::SampleIndexOutOfRange`](crate::error::Error::SampleIndexOutOfRange))
    /// check bounds themselves before calling this.
    pub fn resolve(&self, len: usize) -> Vec<usize> {
        match self {
            Self::Single(i) => {
                if *i < len {
                    vec![*i]
                } else {
                    Vec::new()
                }
            }
            Self::Range(r) => r.clone().filter(|i| *i < len).collect(),
            Self::All => (0..len).collect(),
        }
    }

    /// Whether a read against this index should squeeze the result down to a
    /// single array (`Single`) rather than a list.
    pub fn is_single(&self) -> bool {
        matches!(self, Self::Single(_))
    }
}

impl From<usize> for SampleIndex {
    fn from(i: usize) -> Self {
        Self::Single(i)
    }
}

impl From<std::ops::Range<usize>> for SampleIndex {
    fn from(r: std::ops::Range<usize>) -> Self {
        Self::Range(r)
    }
}

/// Whether a read should fail on mismatched shapes (`Dense`) or always
/// succeed by returning one array per sample (`List`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    Dense,
    List,
}
