//! Cost matrix construction

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector2;
use ndarray::Array2;

use super::{Detection, DistanceMetric, Track};

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Build the cost matrix between tracks (rows) and detections (columns).
pub fn cost_matrix(tracks: &[Track], dets: &[Detection], metric: DistanceMetric) -> Array2<f64> {
    Array2::from_shape_fn((tracks.len(), dets.len()), |(i, j)| match metric {
        DistanceMetric::Euclidean => (tracks[i].position - dets[j].position()).norm(),
        DistanceMetric::Iou => 1.0 - iou(
            tracks[i].position, tracks[i].size,
            dets[j].position(), dets[j].size()
        ),
    })
}

/// Intersection over union of two centre-size boxes.
///
/// If either size is unknown, or the union is empty, the IoU is zero.
pub fn iou(
    centre_a: Vector2<f64>,
    size_a: Option<Vector2<f64>>,
    centre_b: Vector2<f64>,
    size_b: Option<Vector2<f64>>
) -> f64 {
    let (size_a, size_b) = match (size_a, size_b) {
        (Some(a), Some(b)) => (a, b),
        _ => return 0.0
    };

    let min_a = centre_a - size_a * 0.5;
    let max_a = centre_a + size_a * 0.5;
    let min_b = centre_b - size_b * 0.5;
    let max_b = centre_b + size_b * 0.5;

    let inter_w = (max_a.x.min(max_b.x) - min_a.x.max(min_b.x)).max(0.0);
    let inter_h = (max_a.y.min(max_b.y) - min_a.y.max(min_b.y)).max(0.0);
    let inter = inter_w * inter_h;

    let union = size_a.x * size_a.y + size_b.x * size_b.y - inter;

    if union > 0.0 {
        inter / union
    }
    else {
        0.0
    }
}
