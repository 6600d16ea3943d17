pub mod decode;
pub mod nms;

pub use decode::AnchorDecoder;
pub use nms::{NonMaxSuppressor, SuppressionMode, suppress};

/// Axis-aligned box in original-image pixels with its best class.
///
/// Produced by the decoder as a candidate, emitted by NMS as a detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
    pub class_id: u32,
}

impl Detection {
    #[inline]
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// `[x1, y1, x2, y2, score, class_id]`, the wire row format.
    pub fn to_row(&self) -> [f32; 6] {
        [
            self.x1,
            self.y1,
            self.x2,
            self.y2,
            self.score,
            self.class_id as f32,
        ]
    }
}

/// Intersection over union of two boxes. Zero when the union is empty.
#[inline]
pub fn iou(a: &Detection, b: &Detection) -> f32 {
    let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.area() + b.area() - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

/// Sigmoid activation function
#[inline]
pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection {
            x1,
            y1,
            x2,
            y2,
            score: 1.0,
            class_id: 0,
        }
    }

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(10.0) > 0.99);
        assert!(sigmoid(-10.0) < 0.01);
    }

    #[test]
    fn test_iou_identical_and_disjoint() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(iou(&a, &bbox(20.0, 20.0, 30.0, 30.0)), 0.0);
    }

    #[test]
    fn test_iou_partial_overlap() {
        // Overlap 5x10 = 50, union 100 + 100 - 50 = 150
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        let b = bbox(5.0, 0.0, 15.0, 10.0);
        assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_degenerate_boxes() {
        let point = bbox(5.0, 5.0, 5.0, 5.0);
        assert_eq!(iou(&point, &point), 0.0);
    }

    #[test]
    fn test_to_row_layout() {
        let det = Detection {
            x1: 1.0,
            y1: 2.0,
            x2: 3.0,
            y2: 4.0,
            score: 0.5,
            class_id: 7,
        };
        assert_eq!(det.to_row(), [1.0, 2.0, 3.0, 4.0, 0.5, 7.0]);
    }
}
