// src/tracker.rs

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::state::{BBox, FallEvent};

/// A provisional identity for a sequence of spatially-proximate fall
/// candidates across frames. Owned exclusively by the producer loop; only
/// derived `FallEvent` records leave this module.
struct Track {
    centroid: (f32, f32),
    frames_since_seen: u32,
}

/// A classified fall candidate entering association for one frame cycle.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub bbox: BBox,
    pub confidence: f32,
}

pub struct Tracker {
    tracks: HashMap<u64, Track>,
    next_id: u64,
    match_distance: f32,
    evict_frames: u32,
}

impl Tracker {
    pub fn new(match_distance: f32, evict_frames: u32) -> Self {
        Self {
            tracks: HashMap::new(),
            next_id: 1,
            match_distance,
            evict_frames,
        }
    }

    /// Associate one frame's fall candidates with the active tracks.
    ///
    /// Every existing track ages by one cycle. Candidates are matched in
    /// input order to the nearest unmatched track within the distance
    /// threshold; unmatched candidates allocate a fresh id. Ids are never
    /// reused: a track that goes unmatched for more than the eviction
    /// threshold is removed, and a reappearing object gets a new id.
    pub fn associate(&mut self, candidates: &[Candidate], now: DateTime<Utc>) -> Vec<FallEvent> {
        for track in self.tracks.values_mut() {
            track.frames_since_seen += 1;
        }

        let mut events = Vec::with_capacity(candidates.len());
        let mut matched: HashSet<u64> = HashSet::new();

        for candidate in candidates {
            let center = candidate.bbox.center();
            if !center.0.is_finite() || !center.1.is_finite() {
                warn!(bbox = ?candidate.bbox, "discarding candidate with non-finite geometry");
                continue;
            }

            let mut best_id: Option<u64> = None;
            let mut best_dist = self.match_distance;
            for (id, track) in self.tracks.iter() {
                if matched.contains(id) {
                    continue;
                }
                let dx = center.0 - track.centroid.0;
                let dy = center.1 - track.centroid.1;
                let dist = (dx * dx + dy * dy).sqrt();
                if dist < best_dist {
                    best_dist = dist;
                    best_id = Some(*id);
                }
            }

            let id = match best_id {
                Some(id) => {
                    if let Some(track) = self.tracks.get_mut(&id) {
                        track.centroid = center;
                        track.frames_since_seen = 0;
                    }
                    id
                }
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    self.tracks.insert(
                        id,
                        Track {
                            centroid: center,
                            frames_since_seen: 0,
                        },
                    );
                    id
                }
            };
            matched.insert(id);

            events.push(FallEvent {
                track_id: id,
                bbox: candidate.bbox,
                confidence: candidate.confidence,
                timestamp: now,
            });
        }

        let evict_frames = self.evict_frames;
        self.tracks
            .retain(|_, track| track.frames_since_seen <= evict_frames);

        events
    }

    pub fn active_tracks(&self) -> usize {
        self.tracks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{DEFAULT_EVICT_FRAMES, DEFAULT_MATCH_DISTANCE};

    fn candidate(x: f32, y: f32) -> Candidate {
        Candidate {
            bbox: BBox {
                x,
                y,
                width: 0.0,
                height: 0.0,
            },
            confidence: 0.9,
        }
    }

    fn tracker() -> Tracker {
        Tracker::new(DEFAULT_MATCH_DISTANCE, DEFAULT_EVICT_FRAMES)
    }

    #[test]
    fn first_candidate_gets_id_one() {
        let mut t = tracker();
        let events = t.associate(&[candidate(100.0, 100.0)], Utc::now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].track_id, 1);
    }

    #[test]
    fn nearby_candidate_keeps_its_id() {
        let mut t = tracker();
        t.associate(&[candidate(100.0, 100.0)], Utc::now());
        let events = t.associate(&[candidate(130.0, 100.0)], Utc::now());
        assert_eq!(events[0].track_id, 1);
        assert_eq!(t.active_tracks(), 1);
    }

    #[test]
    fn far_candidate_gets_a_new_strictly_greater_id() {
        let mut t = tracker();
        t.associate(&[candidate(100.0, 100.0)], Utc::now());
        let events = t.associate(&[candidate(500.0, 500.0)], Utc::now());
        assert_eq!(events[0].track_id, 2);
        assert_eq!(t.active_tracks(), 2);
    }

    #[test]
    fn candidate_exactly_at_threshold_distance_is_a_new_track() {
        let mut t = tracker();
        t.associate(&[candidate(0.0, 0.0)], Utc::now());
        // Distance equals the threshold; matching requires strictly less.
        let events = t.associate(&[candidate(DEFAULT_MATCH_DISTANCE, 0.0)], Utc::now());
        assert_eq!(events[0].track_id, 2);
    }

    #[test]
    fn one_track_matches_at_most_one_candidate_per_cycle() {
        let mut t = tracker();
        t.associate(&[candidate(100.0, 100.0)], Utc::now());
        // Both candidates are within range of track 1; only the first (input
        // order) may claim it.
        let events = t.associate(
            &[candidate(110.0, 100.0), candidate(90.0, 100.0)],
            Utc::now(),
        );
        assert_eq!(events[0].track_id, 1);
        assert_eq!(events[1].track_id, 2);
    }

    #[test]
    fn simultaneous_tracks_never_share_an_id() {
        let mut t = tracker();
        for _ in 0..10 {
            let events = t.associate(
                &[
                    candidate(0.0, 0.0),
                    candidate(300.0, 0.0),
                    candidate(600.0, 0.0),
                ],
                Utc::now(),
            );
            let mut ids: Vec<u64> = events.iter().map(|e| e.track_id).collect();
            ids.sort_unstable();
            ids.dedup();
            assert_eq!(ids.len(), 3);
        }
        assert_eq!(t.active_tracks(), 3);
    }

    #[test]
    fn track_survives_gaps_up_to_the_eviction_threshold() {
        let mut t = tracker();
        t.associate(&[candidate(100.0, 100.0)], Utc::now());
        for _ in 0..DEFAULT_EVICT_FRAMES {
            t.associate(&[], Utc::now());
        }
        let events = t.associate(&[candidate(105.0, 100.0)], Utc::now());
        assert_eq!(events[0].track_id, 1);
    }

    #[test]
    fn evicted_track_id_is_never_reassigned() {
        let mut t = tracker();
        t.associate(&[candidate(100.0, 100.0)], Utc::now());
        for _ in 0..=DEFAULT_EVICT_FRAMES {
            t.associate(&[], Utc::now());
        }
        assert_eq!(t.active_tracks(), 0);
        // Same position as the evicted track, but the identity is gone.
        let events = t.associate(&[candidate(100.0, 100.0)], Utc::now());
        assert_eq!(events[0].track_id, 2);
    }

    #[test]
    fn non_finite_candidate_is_discarded_without_aborting_the_batch() {
        let mut t = tracker();
        let events = t.associate(
            &[
                Candidate {
                    bbox: BBox {
                        x: f32::NAN,
                        y: 10.0,
                        width: 5.0,
                        height: 5.0,
                    },
                    confidence: 0.5,
                },
                candidate(200.0, 200.0),
            ],
            Utc::now(),
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].track_id, 1);
    }

    #[test]
    fn nearest_track_wins_over_a_farther_one() {
        let mut t = tracker();
        t.associate(&[candidate(0.0, 0.0), candidate(90.0, 0.0)], Utc::now());
        let events = t.associate(&[candidate(70.0, 0.0)], Utc::now());
        // 70 is 20 away from track 2 and 70 away from track 1.
        assert_eq!(events[0].track_id, 2);
    }
}
