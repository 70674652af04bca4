//! Target selection

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector2;
use ordered_float::OrderedFloat;

use super::{FollowCtrlParams, RangeModel, TargetPriority};
use crate::tracker::{Track, TrackId};

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Returns true if the track may be followed: confirmed and not coasting for too long.
pub fn is_selectable(track: &Track, max_coast_cycles: u32) -> bool {
    track.is_confirmed() && track.time_since_update <= max_coast_cycles
}

/// Select the best target among the selectable tracks.
///
/// Ties are broken in favour of the lowest track ID.
pub fn select_target(tracks: &[Track], params: &FollowCtrlParams) -> Option<TrackId> {
    let ego = ego_point(params);

    tracks
        .iter()
        .filter(|t| is_selectable(t, params.max_coast_cycles))
        .min_by_key(|t| {
            let cost = match params.priority {
                TargetPriority::ClosestToEgo => (t.position - ego).norm(),
                TargetPriority::HighestConfidence => -t.confidence,
                TargetPriority::LargestBox => -t.box_area(),
            };
            (OrderedFloat(cost), t.id)
        })
        .map(|t| t.id)
}

/// Estimated range to the track in meters.
pub fn estimate_range(track: &Track, params: &FollowCtrlParams) -> f64 {
    let ego_range = || (track.position - ego_point(params)).norm() * params.ego_range_scale;

    match params.range_model {
        RangeModel::BoxHeight => match track.box_height() {
            Some(h) if h > 0.0 => params.range_scale / h,
            _ => ego_range()
        },
        RangeModel::EgoDistance => ego_range()
    }
}

/// Normalised horizontal offset of the track from the forward axis, in [-1, 1] for a track
/// inside the image.
pub fn lateral_error(track: &Track, params: &FollowCtrlParams) -> f64 {
    (track.position.x - params.forward_axis_x_px) / (params.image_width_px * 0.5)
}

fn ego_point(params: &FollowCtrlParams) -> Vector2<f64> {
    Vector2::new(params.ego_point_px[0], params.ego_point_px[1])
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tracker::{Detection, TrackStatus};
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};

    fn track(id: u64, x: f64, y: f64, size: Option<(f64, f64)>, conf: f64) -> Track {
        let d = Detection::new(x, y, size, conf, 0, Utc.timestamp_millis(0)).unwrap();
        let mut t = Track::spawn(TrackId(id), &d);
        t.status = TrackStatus::Confirmed;
        t
    }

    #[test]
    fn test_selectable() {
        let mut t = track(0, 0.0, 0.0, None, 1.0);
        assert!(is_selectable(&t, 3));

        t.time_since_update = 4;
        assert!(!is_selectable(&t, 3));

        t.time_since_update = 0;
        t.status = TrackStatus::Tentative;
        assert!(!is_selectable(&t, 3));
    }

    #[test]
    fn test_priorities() {
        let tracks = vec![
            track(0, 100.0, 100.0, Some((10.0, 10.0)), 0.9),
            track(1, 640.0, 600.0, Some((5.0, 5.0)), 0.5),
            track(2, 1000.0, 100.0, Some((50.0, 80.0)), 0.7),
        ];

        let mut params = FollowCtrlParams::default();
        assert_eq!(select_target(&tracks, &params), Some(TrackId(1)));

        params.priority = TargetPriority::HighestConfidence;
        assert_eq!(select_target(&tracks, &params), Some(TrackId(0)));

        params.priority = TargetPriority::LargestBox;
        assert_eq!(select_target(&tracks, &params), Some(TrackId(2)));
    }

    #[test]
    fn test_ties_go_to_lowest_id() {
        let tracks = vec![
            track(3, 500.0, 700.0, None, 0.8),
            track(4, 780.0, 700.0, None, 0.8),
        ];

        let mut params = FollowCtrlParams::default();
        assert_eq!(select_target(&tracks, &params), Some(TrackId(3)));

        params.priority = TargetPriority::HighestConfidence;
        assert_eq!(select_target(&tracks, &params), Some(TrackId(3)));

        params.priority = TargetPriority::LargestBox;
        assert_eq!(select_target(&tracks, &params), Some(TrackId(3)));
    }

    #[test]
    fn test_range_models() {
        let mut params = FollowCtrlParams::default();

        let t = track(0, 640.0, 620.0, Some((50.0, 100.0)), 1.0);
        assert_relative_eq!(estimate_range(&t, &params), 5.0);

        // No size, falls back to the ego distance of 100 px
        let t = track(0, 640.0, 620.0, None, 1.0);
        assert_relative_eq!(estimate_range(&t, &params), 1.0);

        params.range_model = RangeModel::EgoDistance;
        let t = track(0, 640.0, 620.0, Some((50.0, 100.0)), 1.0);
        assert_relative_eq!(estimate_range(&t, &params), 1.0);
    }

    #[test]
    fn test_lateral_error() {
        let params = FollowCtrlParams::default();
        assert_relative_eq!(lateral_error(&track(0, 640.0, 0.0, None, 1.0), &params), 0.0);
        assert_relative_eq!(lateral_error(&track(0, 1280.0, 0.0, None, 1.0), &params), 1.0);
        assert_relative_eq!(lateral_error(&track(0, 320.0, 0.0, None, 1.0), &params), -0.5);
    }
}
