use super::{Detection, iou};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SuppressionMode {
    /// Drop every box overlapping a kept box by at least the threshold.
    Nms,
    /// Decay overlapping boxes by `exp(-iou² / sigma)` instead of dropping them.
    SoftNms { sigma: f32 },
}

/// Per-class greedy non-max suppression with a fixed threshold and mode.
#[derive(Debug, Clone, Copy)]
pub struct NonMaxSuppressor {
    pub iou_threshold: f32,
    pub mode: SuppressionMode,
}

impl NonMaxSuppressor {
    pub fn new(iou_threshold: f32, mode: SuppressionMode) -> Self {
        Self {
            iou_threshold,
            mode,
        }
    }

    pub fn suppress(&self, candidates: &[Detection]) -> Vec<Detection> {
        suppress(candidates, self.iou_threshold, self.mode)
    }
}

/// Greedy NMS run independently per class.
///
/// Classes are processed in ascending id order. Within a class the highest
/// score is emitted first; equal scores keep their input order.
///
/// Only hard mode is idempotent: suppressing its output again returns it
/// unchanged. Soft mode is not, since every rerun decays the surviving
/// overlapping boxes once more.
#[tracing::instrument(skip(candidates), fields(candidates = candidates.len()))]
pub fn suppress(candidates: &[Detection], iou_threshold: f32, mode: SuppressionMode) -> Vec<Detection> {
    let mut by_class: BTreeMap<u32, Vec<Detection>> = BTreeMap::new();
    for det in candidates {
        by_class.entry(det.class_id).or_default().push(*det);
    }

    let mut kept = Vec::new();
    for (_, mut remaining) in by_class {
        while let Some(best_idx) = argmax_first(&remaining) {
            let best = remaining.remove(best_idx);
            kept.push(best);

            match mode {
                SuppressionMode::Nms => {
                    remaining.retain(|other| iou(&best, other) < iou_threshold);
                }
                SuppressionMode::SoftNms { sigma } => {
                    for other in remaining.iter_mut() {
                        let overlap = iou(&best, other);
                        if overlap >= iou_threshold {
                            other.score *= (-(overlap * overlap) / sigma).exp();
                        }
                    }
                    remaining.retain(|other| other.score > 0.0);
                }
            }
        }
    }

    tracing::trace!(kept = kept.len(), "Suppression done");
    kept
}

/// Index of the highest score; the earliest wins ties.
fn argmax_first(dets: &[Detection]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, det) in dets.iter().enumerate() {
        match best {
            Some((_, score)) if det.score <= score => {}
            _ => best = Some((i, det.score)),
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: f32 = 0.213;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32, score: f32, class_id: u32) -> Detection {
        Detection {
            x1,
            y1,
            x2,
            y2,
            score,
            class_id,
        }
    }

    /// Two same-class boxes with IoU = 0.9 (100x100 vs 100x90 sharing a corner)
    fn overlapping_pair() -> Vec<Detection> {
        vec![
            det(0.0, 0.0, 100.0, 100.0, 0.9, 0),
            det(0.0, 0.0, 100.0, 90.0, 0.7, 0),
        ]
    }

    #[test]
    fn test_hard_nms_keeps_only_highest() {
        let kept = suppress(&overlapping_pair(), THRESHOLD, SuppressionMode::Nms);

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].score, 0.9);
    }

    #[test]
    fn test_soft_nms_decays_overlapping_score() {
        // 0.7 * exp(-0.81 / 0.3) ≈ 0.047
        let kept = suppress(
            &overlapping_pair(),
            THRESHOLD,
            SuppressionMode::SoftNms { sigma: 0.3 },
        );

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert!(kept[1].score < 0.7);
        assert!((kept[1].score - 0.7 * (-0.81f32 / 0.3).exp()).abs() < 1e-4);
    }

    #[test]
    fn test_soft_nms_rerun_decays_again() {
        let mode = SuppressionMode::SoftNms { sigma: 0.3 };
        let once = suppress(&overlapping_pair(), THRESHOLD, mode);
        let twice = suppress(&once, THRESHOLD, mode);

        assert_eq!(twice.len(), 2);
        assert_eq!(twice[0], once[0]);
        assert!(twice[1].score < once[1].score);
    }

    #[test]
    fn test_soft_nms_leaves_low_overlap_untouched() {
        let candidates = vec![
            det(0.0, 0.0, 10.0, 10.0, 0.9, 0),
            det(9.0, 9.0, 19.0, 19.0, 0.6, 0),
        ];
        let kept = suppress(&candidates, THRESHOLD, SuppressionMode::SoftNms { sigma: 0.3 });
        assert_eq!(kept[1].score, 0.6);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        // IoU exactly 0.5: 10x10 boxes offset by a third of the width
        let candidates = vec![
            det(0.0, 0.0, 12.0, 10.0, 0.9, 0),
            det(4.0, 0.0, 16.0, 10.0, 0.8, 0),
        ];
        let overlap = iou(&candidates[0], &candidates[1]);
        assert!((overlap - 0.5).abs() < 1e-6);

        let kept = suppress(&candidates, overlap, SuppressionMode::Nms);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_classes_are_suppressed_independently() {
        let mut candidates = overlapping_pair();
        candidates[1].class_id = 5;

        let kept = suppress(&candidates, THRESHOLD, SuppressionMode::Nms);

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].class_id, 0);
        assert_eq!(kept[1].class_id, 5);
    }

    #[test]
    fn test_output_order_class_then_score() {
        let candidates = vec![
            det(0.0, 0.0, 10.0, 10.0, 0.3, 2),
            det(50.0, 50.0, 60.0, 60.0, 0.8, 1),
            det(100.0, 100.0, 110.0, 110.0, 0.9, 2),
            det(200.0, 200.0, 210.0, 210.0, 0.4, 1),
        ];

        let kept = suppress(&candidates, THRESHOLD, SuppressionMode::Nms);
        let order: Vec<(u32, f32)> = kept.iter().map(|d| (d.class_id, d.score)).collect();

        assert_eq!(order, vec![(1, 0.8), (1, 0.4), (2, 0.9), (2, 0.3)]);
    }

    #[test]
    fn test_equal_scores_keep_input_order() {
        let candidates = vec![
            det(0.0, 0.0, 10.0, 10.0, 0.5, 0),
            det(100.0, 0.0, 110.0, 10.0, 0.5, 0),
            det(200.0, 0.0, 210.0, 10.0, 0.5, 0),
        ];

        let kept = suppress(&candidates, THRESHOLD, SuppressionMode::Nms);

        assert_eq!(kept, candidates);
    }

    #[test]
    fn test_suppression_is_idempotent() {
        // Cluster of overlapping boxes in two classes plus isolated boxes
        let mut candidates = Vec::new();
        for i in 0..20 {
            let offset = (i % 7) as f32 * 3.0;
            let score = 0.3 + (i as f32 * 0.031) % 0.6;
            candidates.push(det(
                offset,
                offset * 0.5,
                offset + 40.0,
                offset * 0.5 + 30.0,
                score,
                (i % 2) as u32,
            ));
        }
        candidates.push(det(300.0, 300.0, 320.0, 330.0, 0.99, 0));
        candidates.push(det(300.0, 300.0, 320.0, 330.0, 0.99, 0));

        let once = suppress(&candidates, THRESHOLD, SuppressionMode::Nms);
        let twice = suppress(&once, THRESHOLD, SuppressionMode::Nms);

        assert!(!once.is_empty());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_empty_input() {
        assert!(suppress(&[], THRESHOLD, SuppressionMode::Nms).is_empty());
    }

    #[test]
    fn test_suppressor_uses_configured_mode() {
        let nms = NonMaxSuppressor::new(THRESHOLD, SuppressionMode::Nms);
        assert_eq!(nms.suppress(&overlapping_pair()).len(), 1);
    }
}
