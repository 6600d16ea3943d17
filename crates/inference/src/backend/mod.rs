use ndarray::{Array, ArrayD, Axis, IxDyn};

#[cfg(feature = "ort-backend")]
pub mod ort;

/// Model executor. Maps a batched `[batch, H, W, C]` tensor to the raw
/// per-scale predictions, one row per batch member.
pub trait InferenceBackend {
    /// Run inference on a batch. Output row `i` must belong to input row `i`.
    fn infer(&mut self, images: &Array<f32, IxDyn>) -> anyhow::Result<InferenceOutput>;
}

/// Raw predictions, one array per feature scale.
///
/// Each array is `[batch, grid_h, grid_w, anchors, 5 + num_classes]`.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutput {
    pub scales: Vec<ArrayD<f32>>,
}

impl InferenceOutput {
    pub fn new(scales: Vec<ArrayD<f32>>) -> Self {
        Self { scales }
    }

    /// Size of the leading batch axis, if every scale agrees on it.
    pub fn batch_len(&self) -> Option<usize> {
        let mut lens = self.scales.iter().map(|s| s.shape().first().copied());
        let first = lens.next()??;
        lens.all(|len| len == Some(first)).then_some(first)
    }

    /// Split a batched output into `n` single-item outputs, preserving row
    /// order. Each piece keeps a leading batch axis of length 1.
    pub fn split(self, n: usize) -> anyhow::Result<Vec<InferenceOutput>> {
        match self.batch_len() {
            Some(len) if len == n => {}
            other => anyhow::bail!(
                "Executor returned batch axis {:?} for a batch of {}",
                other,
                n
            ),
        }

        Ok((0..n)
            .map(|i| InferenceOutput {
                scales: self
                    .scales
                    .iter()
                    .map(|scale| scale.index_axis(Axis(0), i).insert_axis(Axis(0)).to_owned())
                    .collect(),
            })
            .collect())
    }
}
