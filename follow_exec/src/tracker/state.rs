//! Implementations for the Tracker state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, error, info, trace};
use ndarray::{Array2, Axis};
use serde::Serialize;
use std::collections::HashSet;

// Internal
use super::{
    assignment, cost_matrix, Detection, Track, TrackId, TrackStatus, TrackerError, TrackerParams,
};
use util::module::State;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Tracker module state
#[derive(Debug, Clone, Default)]
pub struct Tracker {
    pub(crate) params: TrackerParams,

    /// Live tracks in ascending ID order
    tracks: Vec<Track>,

    /// ID given to the next spawned track
    next_id: u64,

    report: StatusReport,
}

/// Input data to the tracker.
#[derive(Debug, Clone, Default)]
pub struct InputData {
    /// Validated detections in arrival order, empty if none arrived this cycle
    pub detections: Vec<Detection>,

    /// Time since the previous update.
    ///
    /// Units: seconds
    pub dt: f64,
}

/// Output of one tracker update.
#[derive(Debug, Clone, Default)]
pub struct OutputData {
    /// All live tracks after the update, in ascending ID order
    pub tracks: Vec<Track>,

    /// Lifecycle changes that happened during the update
    pub events: Vec<TrackEvent>,
}

/// Status report for tracker processing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatusReport {
    pub num_detections: usize,
    pub num_low_confidence: usize,
    pub num_tracks: usize,
    pub num_confirmed: usize,
    pub num_matched: usize,
    pub num_gated: usize,
    pub num_spawned: usize,
    pub num_deleted: usize,
    pub num_pruned: usize,
    pub num_discarded: usize,
    pub assignment_cost: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// A change in the lifecycle of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackEvent {
    /// A new tentative track was created for an unassociated detection
    Spawned(TrackId),

    /// A tentative track reached the confirmation threshold
    Confirmed(TrackId),

    /// A track went unassociated for longer than the maximum age
    Deleted(TrackId),

    /// A track was removed to keep the set within capacity
    Pruned(TrackId),

    /// A track was removed because it violated an invariant of the track set
    Discarded(TrackId),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Tracker {
    /// Create a new tracker with the given parameters.
    pub fn new(params: TrackerParams) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }

    /// Live tracks in ascending ID order.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Find a live track by its ID.
    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks
            .binary_search_by_key(&id, |t| t.id)
            .ok()
            .map(|i| &self.tracks[i])
    }

    /// Remove all tracks. IDs continue from where they were.
    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    /// Replace the parameters, keeping the current tracks.
    pub fn set_params(&mut self, params: TrackerParams) {
        self.params = params;
    }

    /// Run one update of the tracker.
    pub fn update(
        &mut self,
        detections: &[Detection],
        dt: f64
    ) -> Result<(OutputData, StatusReport), TrackerError> {
        if !dt.is_finite() || dt < 0.0 {
            return Err(TrackerError::InvalidDt(dt))
        }

        self.report = StatusReport::default();
        self.report.num_detections = detections.len();

        let mut events = Vec::new();

        // ---- FILTER ----

        let dets: Vec<&Detection> = detections
            .iter()
            .filter(|d| d.confidence() >= self.params.min_confidence)
            .collect();
        self.report.num_low_confidence = detections.len() - dets.len();

        // ---- PREDICT ----

        self.check_track_set(&mut events);

        for t in self.tracks.iter_mut() {
            t.predict(dt);
        }

        // ---- ASSOCIATE ----

        let mut cost = None;
        if !self.tracks.is_empty() && !dets.is_empty() {
            let owned: Vec<Detection> = dets.iter().map(|d| (*d).clone()).collect();
            let c = cost_matrix(&self.tracks, &owned, self.params.metric);
            cost = Some(self.discard_non_finite(c, &mut events));
        }

        let mut matched_tracks = vec![false; self.tracks.len()];
        let mut matched_dets = vec![false; dets.len()];

        if let Some(cost) = cost.filter(|c| c.nrows() > 0) {
            let pairs = match assignment::solve(cost.view()) {
                Ok(p) => p,
                Err(e) => {
                    error!("Association failed, all tracks and detections left unmatched: {}", e);
                    Vec::new()
                }
            };
            let (pairs, num_gated) = assignment::gate(pairs, cost.view(), self.params.gate());

            self.report.num_gated = num_gated;
            self.report.assignment_cost = assignment::total_cost(&pairs, cost.view());

            for p in pairs {
                if p.row >= self.tracks.len() || p.col >= dets.len() {
                    error!("Assignment pair ({}, {}) is out of range, ignored", p.row, p.col);
                    continue
                }
                if matched_tracks[p.row] || matched_dets[p.col] {
                    error!("Assignment pair ({}, {}) reuses a row or column, ignored", p.row, p.col);
                    continue
                }

                matched_tracks[p.row] = true;
                matched_dets[p.col] = true;

                let track = &mut self.tracks[p.row];
                trace!("{} matched detection {}", track.id, p.col);

                if track.update(dets[p.col], self.params.velocity_smoothing, self.params.confirm_hits) {
                    info!("Track {} confirmed", track.id);
                    events.push(TrackEvent::Confirmed(track.id));
                }
                self.report.num_matched += 1;
            }
        }

        // ---- UNMATCHED TRACKS ----

        for (t, _) in self.tracks.iter_mut().zip(matched_tracks.iter()).filter(|(_, m)| !**m) {
            t.mark_missed();
        }

        let max_age = self.params.max_age;
        let mut deleted = Vec::new();
        self.tracks.retain(|t| {
            if t.time_since_update > max_age {
                deleted.push(t.id);
                false
            }
            else {
                true
            }
        });
        for id in deleted {
            debug!("Track {} deleted", id);
            events.push(TrackEvent::Deleted(id));
            self.report.num_deleted += 1;
        }

        // ---- UNMATCHED DETECTIONS ----

        for (d, _) in dets.iter().zip(matched_dets.iter()).filter(|(_, m)| !**m) {
            let id = TrackId(self.next_id);
            self.next_id += 1;

            self.tracks.push(Track::spawn(id, d));
            debug!("Track {} spawned at ({:.1}, {:.1})", id, d.position().x, d.position().y);
            events.push(TrackEvent::Spawned(id));
            self.report.num_spawned += 1;
        }

        // ---- CAPACITY ----

        self.prune(&mut events);

        // ---- REPORT ----

        self.report.num_tracks = self.tracks.len();
        self.report.num_confirmed = self.tracks.iter().filter(|t| t.is_confirmed()).count();

        trace!(
            "Tracker: {} dets, {} tracks ({} confirmed), {} matched",
            self.report.num_detections,
            self.report.num_tracks,
            self.report.num_confirmed,
            self.report.num_matched
        );

        Ok((
            OutputData {
                tracks: self.tracks.clone(),
                events,
            },
            self.report
        ))
    }

    /// Prune tracks until the set is within capacity.
    ///
    /// The victim is the worst track by: tentative before confirmed, most frames since update,
    /// fewest hits, highest ID.
    fn prune(&mut self, events: &mut Vec<TrackEvent>) {
        while self.tracks.len() > self.params.max_tracks {
            let victim = self.tracks
                .iter()
                .enumerate()
                .max_by_key(|(_, t)| (
                    t.status == TrackStatus::Tentative,
                    t.time_since_update,
                    std::cmp::Reverse(t.hits),
                    t.id
                ))
                .map(|(i, _)| i);

            match victim {
                Some(i) => {
                    let t = self.tracks.remove(i);
                    debug!("Track {} pruned, track set over capacity", t.id);
                    events.push(TrackEvent::Pruned(t.id));
                    self.report.num_pruned += 1;
                },
                None => break
            }
        }
    }

    /// Discard the tracks whose row of the cost matrix holds a non-finite cost, returning the
    /// cost matrix of the remaining tracks.
    fn discard_non_finite(
        &mut self,
        cost: Array2<f64>,
        events: &mut Vec<TrackEvent>
    ) -> Array2<f64> {
        let keep: Vec<usize> = cost
            .outer_iter()
            .enumerate()
            .filter(|(_, row)| row.iter().all(|c| c.is_finite()))
            .map(|(i, _)| i)
            .collect();

        if keep.len() == self.tracks.len() {
            return cost
        }

        let mut row = 0;
        let mut discarded = Vec::new();
        self.tracks.retain(|t| {
            let kept = keep.contains(&row);
            row += 1;
            if !kept {
                discarded.push(t.id);
            }
            kept
        });

        for id in discarded {
            error!("Track {} has a non-finite association cost, discarded", id);
            events.push(TrackEvent::Discarded(id));
            self.report.num_discarded += 1;
        }

        cost.select(Axis(0), &keep)
    }

    /// Discard any track which breaks the ordering or uniqueness of IDs.
    fn check_track_set(&mut self, events: &mut Vec<TrackEvent>) {
        let mut seen = HashSet::with_capacity(self.tracks.len());
        let mut last: Option<TrackId> = None;
        let mut discarded = Vec::new();

        self.tracks.retain(|t| {
            let ordered = last.map(|l| t.id > l).unwrap_or(true);
            if seen.insert(t.id) && ordered {
                last = Some(t.id);
                true
            }
            else {
                discarded.push(t.id);
                false
            }
        });

        for id in discarded {
            error!("Track {} violates the track set ordering, discarded", id);
            events.push(TrackEvent::Discarded(id));
            self.report.num_discarded += 1;
        }
    }

    #[cfg(test)]
    pub(crate) fn tracks_mut(&mut self) -> &mut Vec<Track> {
        &mut self.tracks
    }
}

impl State for Tracker {
    type InitData = TrackerParams;
    type InitError = TrackerError;

    type InputData = InputData;
    type OutputData = OutputData;
    type StatusReport = StatusReport;
    type ProcError = TrackerError;

    /// Initialise the tracker, removing all tracks.
    fn init(&mut self, init_data: Self::InitData) -> Result<(), Self::InitError> {
        init_data.validate().map_err(TrackerError::InvalidParams)?;

        self.params = init_data;
        self.clear();

        Ok(())
    }

    fn proc(&mut self, input_data: &Self::InputData)
        -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError>
    {
        self.update(&input_data.detections, input_data.dt)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tracker::DistanceMetric;
    use chrono::{TimeZone, Utc};

    fn det(x: f64, y: f64) -> Detection {
        Detection::new(x, y, None, 0.9, 0, Utc.timestamp_millis(0)).unwrap()
    }

    fn boxed(x: f64, y: f64, w: f64, h: f64) -> Detection {
        Detection::new(x, y, Some((w, h)), 0.9, 0, Utc.timestamp_millis(0)).unwrap()
    }

    #[test]
    fn test_spawn_and_confirm() {
        let mut tracker = Tracker::new(TrackerParams::default());

        let (out, rpt) = tracker.update(&[det(100.0, 50.0)], 0.1).unwrap();
        assert_eq!(out.tracks.len(), 1);
        assert_eq!(out.tracks[0].id, TrackId(0));
        assert_eq!(out.tracks[0].status, TrackStatus::Tentative);
        assert_eq!(out.events, vec![TrackEvent::Spawned(TrackId(0))]);
        assert_eq!(rpt.num_spawned, 1);

        let (out, rpt) = tracker.update(&[det(105.0, 52.0)], 0.1).unwrap();
        assert_eq!(out.tracks.len(), 1);
        assert_eq!(out.tracks[0].status, TrackStatus::Confirmed);
        assert_eq!(out.tracks[0].hits, 2);
        assert_eq!(out.events, vec![TrackEvent::Confirmed(TrackId(0))]);
        assert_eq!(rpt.num_matched, 1);
    }

    #[test]
    fn test_empty_detections_age_tracks() {
        let mut tracker = Tracker::new(TrackerParams::default());
        tracker.update(&[det(0.0, 0.0), det(500.0, 0.0)], 0.1).unwrap();

        // Ages to max_age without deletion, deleted on the next
        for _ in 0..10 {
            let (out, _) = tracker.update(&[], 0.1).unwrap();
            assert_eq!(out.tracks.len(), 2);
        }
        let (out, rpt) = tracker.update(&[], 0.1).unwrap();
        assert!(out.tracks.is_empty());
        assert_eq!(rpt.num_deleted, 2);
        assert_eq!(
            out.events,
            vec![TrackEvent::Deleted(TrackId(0)), TrackEvent::Deleted(TrackId(1))]
        );
    }

    #[test]
    fn test_gating_spawns_new_track() {
        let mut tracker = Tracker::new(TrackerParams::default());
        tracker.update(&[det(0.0, 0.0)], 0.1).unwrap();

        // Beyond the 60 px gate, so the old track misses and a new one spawns
        let (out, rpt) = tracker.update(&[det(100.0, 0.0)], 0.1).unwrap();
        assert_eq!(rpt.num_gated, 1);
        assert_eq!(rpt.num_matched, 0);
        assert_eq!(out.tracks.len(), 2);
        assert_eq!(out.tracks[0].time_since_update, 1);
        assert_eq!(out.tracks[1].id, TrackId(1));
    }

    #[test]
    fn test_ids_never_reused() {
        let mut tracker = Tracker::new(TrackerParams::default());
        tracker.update(&[det(0.0, 0.0)], 0.1).unwrap();
        tracker.clear();
        let (out, _) = tracker.update(&[det(0.0, 0.0)], 0.1).unwrap();
        assert_eq!(out.tracks[0].id, TrackId(1));

        tracker.init(TrackerParams::default()).unwrap();
        let (out, _) = tracker.update(&[det(0.0, 0.0)], 0.1).unwrap();
        assert_eq!(out.tracks[0].id, TrackId(2));
    }

    #[test]
    fn test_max_tracks_pruning() {
        let mut tracker = Tracker::new(TrackerParams {
            max_tracks: 2,
            ..Default::default()
        });

        // Two tracks, the first confirmed
        tracker.update(&[det(0.0, 0.0), det(200.0, 0.0)], 0.1).unwrap();
        tracker.update(&[det(0.0, 0.0)], 0.1).unwrap();

        // A third detection spawns a track, the stale tentative T1 is pruned
        let (out, rpt) = tracker.update(&[det(0.0, 0.0), det(400.0, 0.0)], 0.1).unwrap();
        assert_eq!(rpt.num_pruned, 1);
        assert!(out.events.contains(&TrackEvent::Pruned(TrackId(1))));
        let ids: Vec<TrackId> = out.tracks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![TrackId(0), TrackId(2)]);
    }

    #[test]
    fn test_low_confidence_ignored() {
        let mut tracker = Tracker::new(TrackerParams {
            min_confidence: 0.95,
            ..Default::default()
        });

        let (out, rpt) = tracker.update(&[det(0.0, 0.0)], 0.1).unwrap();
        assert!(out.tracks.is_empty());
        assert_eq!(rpt.num_low_confidence, 1);
    }

    #[test]
    fn test_iou_metric() {
        let mut tracker = Tracker::new(TrackerParams {
            metric: DistanceMetric::Iou,
            ..Default::default()
        });

        tracker.update(&[boxed(100.0, 100.0, 50.0, 100.0)], 0.1).unwrap();

        // Large overlap associates, a point detection can't
        let (out, rpt) = tracker.update(
            &[det(105.0, 100.0), boxed(105.0, 100.0, 50.0, 100.0)], 0.1
        ).unwrap();
        assert_eq!(rpt.num_matched, 1);
        assert_eq!(out.tracks.len(), 2);
        assert_eq!(out.tracks[0].hits, 2);
        assert_eq!(out.tracks[1].size, None);
    }

    #[test]
    fn test_invalid_dt() {
        let mut tracker = Tracker::new(TrackerParams::default());
        assert!(matches!(tracker.update(&[], -0.1), Err(TrackerError::InvalidDt(_))));
        assert!(matches!(tracker.update(&[], f64::NAN), Err(TrackerError::InvalidDt(_))));
    }

    #[test]
    fn test_non_finite_cost_discards_track() {
        let mut tracker = Tracker::new(TrackerParams::default());
        tracker.update(&[det(0.0, 0.0), det(300.0, 0.0)], 0.1).unwrap();

        // A track whose state overflowed
        tracker.tracks_mut()[1].position.x = f64::INFINITY;

        let (out, rpt) = tracker.update(&[det(2.0, 0.0), det(500.0, 0.0)], 0.1).unwrap();
        assert_eq!(rpt.num_discarded, 1);
        assert!(out.events.contains(&TrackEvent::Discarded(TrackId(1))));
        assert_eq!(rpt.num_matched, 1);
        assert_eq!(rpt.num_spawned, 1);

        let ids: Vec<TrackId> = out.tracks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![TrackId(0), TrackId(2)]);

        // Following updates carry on normally
        let (out, rpt) = tracker.update(&[det(4.0, 0.0), det(500.0, 0.0)], 0.1).unwrap();
        assert_eq!(rpt.num_matched, 2);
        assert_eq!(rpt.num_discarded, 0);
        assert_eq!(out.tracks.len(), 2);
    }

    #[test]
    fn test_duplicate_ids_discarded() {
        let mut tracker = Tracker::new(TrackerParams::default());
        tracker.update(&[det(0.0, 0.0), det(300.0, 0.0)], 0.1).unwrap();

        // Corrupt the set with a duplicate of T0
        let dup = tracker.tracks()[0].clone();
        tracker.tracks_mut().push(dup);

        let (out, rpt) = tracker.update(&[], 0.1).unwrap();
        assert_eq!(rpt.num_discarded, 1);
        assert_eq!(out.tracks.len(), 2);
        assert!(out.events.contains(&TrackEvent::Discarded(TrackId(0))));
    }

    #[test]
    fn test_crossing_targets_keep_ids() {
        let mut tracker = Tracker::new(TrackerParams::default());

        // Two targets approaching each other horizontally
        let mut a = 100.0;
        let mut b = 300.0;
        for _ in 0..8 {
            tracker.update(&[det(a, 0.0), det(b, 50.0)], 0.1).unwrap();
            a += 20.0;
            b -= 20.0;
        }

        let t0 = tracker.get(TrackId(0)).unwrap();
        let t1 = tracker.get(TrackId(1)).unwrap();
        assert_eq!(t0.position.y, 0.0);
        assert_eq!(t1.position.y, 50.0);
        assert_eq!(tracker.tracks().len(), 2);
    }
}
