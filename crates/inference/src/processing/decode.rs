use super::{Detection, sigmoid};
use crate::config::DecodeConfig;
use crate::error::DetectError;
use ndarray::ArrayD;
use preprocess::LetterboxTransform;

/// Box parameters plus objectness ahead of the class scores in every anchor row.
const BOX_FIELDS: usize = 5;

#[derive(Debug, Clone)]
struct ScaleParams {
    anchors: Vec<[f32; 2]>,
    stride: f32,
    xyscale: f32,
}

/// Turns raw multi-scale YOLO predictions into scored boxes in original-image
/// pixels.
#[derive(Debug, Clone)]
pub struct AnchorDecoder {
    scales: Vec<ScaleParams>,
    input_size: u32,
    pub score_threshold: f32,
}

impl AnchorDecoder {
    pub fn new(config: &DecodeConfig, input_size: u32) -> Self {
        let scales = config
            .anchors
            .iter()
            .zip(&config.strides)
            .zip(&config.xyscale)
            .map(|((anchors, &stride), &xyscale)| ScaleParams {
                anchors: anchors.clone(),
                stride,
                xyscale,
            })
            .collect();

        Self {
            scales,
            input_size,
            score_threshold: config.score_threshold,
        }
    }

    /// Decode one image's predictions.
    ///
    /// Each entry of `predictions` is `[1, grid_h, grid_w, anchors, 5 + classes]`
    /// for the scale at the same index. Output boxes are merged across scales in
    /// no particular order, already clipped to the original image and filtered
    /// by `score_threshold`.
    #[tracing::instrument(skip_all, fields(scales = predictions.len()))]
    pub fn decode(
        &self,
        predictions: &[ArrayD<f32>],
        transform: &LetterboxTransform,
    ) -> Result<Vec<Detection>, DetectError> {
        if predictions.len() != self.scales.len() {
            return Err(DetectError::ShapeMismatch(format!(
                "expected {} prediction scales, got {}",
                self.scales.len(),
                predictions.len()
            )));
        }

        let mut candidates = Vec::new();
        for (prediction, params) in predictions.iter().zip(&self.scales) {
            self.decode_scale(prediction, params, transform, &mut candidates)?;
        }

        tracing::trace!(candidates = candidates.len(), "Decoded candidates");
        Ok(candidates)
    }

    fn decode_scale(
        &self,
        prediction: &ArrayD<f32>,
        params: &ScaleParams,
        transform: &LetterboxTransform,
        out: &mut Vec<Detection>,
    ) -> Result<(), DetectError> {
        let expected_grid = (self.input_size as f32 / params.stride) as usize;
        let (grid_h, grid_w, num_anchors, depth) = match prediction.shape() {
            &[1, h, w, a, d] => (h, w, a, d),
            other => {
                return Err(DetectError::ShapeMismatch(format!(
                    "prediction shape {:?} is not [1, grid_h, grid_w, anchors, 5 + classes]",
                    other
                )));
            }
        };
        if grid_h != expected_grid || grid_w != expected_grid {
            return Err(DetectError::ShapeMismatch(format!(
                "stride {} expects a {}x{} grid, got {}x{}",
                params.stride, expected_grid, expected_grid, grid_h, grid_w
            )));
        }
        if num_anchors != params.anchors.len() || depth <= BOX_FIELDS {
            return Err(DetectError::ShapeMismatch(format!(
                "expected {} anchors with at least one class, got {} anchors of depth {}",
                params.anchors.len(),
                num_anchors,
                depth
            )));
        }

        let data = prediction.as_standard_layout();
        let flat = data.as_slice().ok_or_else(|| {
            DetectError::ShapeMismatch("prediction is not contiguous".to_string())
        })?;

        let max_x = transform.orig_width as f32 - 1.0;
        let max_y = transform.orig_height as f32 - 1.0;
        // Grid-sensitivity: stretch the sigmoid around the cell center
        let xy_bias = 0.5 * (params.xyscale - 1.0);

        for (cell, rows) in flat.chunks_exact(num_anchors * depth).enumerate() {
            let gx = (cell % grid_w) as f32;
            let gy = (cell / grid_w) as f32;

            for (row, anchor) in rows.chunks_exact(depth).zip(&params.anchors) {
                let objectness = sigmoid(row[4]);

                // Sigmoid is monotonic, so the best raw logit is the best class
                let (class_idx, &best_logit) = row[BOX_FIELDS..]
                    .iter()
                    .enumerate()
                    .fold((0, &f32::NEG_INFINITY), |best, cur| {
                        if *cur.1 > *best.1 { cur } else { best }
                    });
                let score = objectness * sigmoid(best_logit);
                if !(score > self.score_threshold) {
                    continue;
                }

                let cx = (sigmoid(row[0]) * params.xyscale - xy_bias + gx) * params.stride;
                let cy = (sigmoid(row[1]) * params.xyscale - xy_bias + gy) * params.stride;
                let w = row[2].exp() * anchor[0];
                let h = row[3].exp() * anchor[1];

                // max/min below would turn a NaN corner into an image edge
                if !(cx.is_finite() && cy.is_finite() && w.is_finite() && h.is_finite()) {
                    continue;
                }

                let (x1, y1) = transform.to_original(cx - w * 0.5, cy - h * 0.5);
                let (x2, y2) = transform.to_original(cx + w * 0.5, cy + h * 0.5);

                let x1 = x1.max(0.0);
                let y1 = y1.max(0.0);
                let x2 = x2.min(max_x);
                let y2 = y2.min(max_y);

                if !(x2 > x1 && y2 > y1) {
                    continue;
                }

                out.push(Detection {
                    x1,
                    y1,
                    x2,
                    y2,
                    score,
                    class_id: class_idx as u32,
                });
            }
        }

        Ok(())
    }
}
