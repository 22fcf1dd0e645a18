//! Multi-object tracking.
//!
//! Detections are associated with live tracks by the Euclidean distance between box
//! centres. Only same-class pairs within `max_distance` are admissible. Assignment
//! is greedy global nearest-neighbour: every admissible pair is ranked by
//! `(distance, track id, detection index)` and accepted when neither side has been
//! taken yet. Unmatched tracks coast on their last known box until evicted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::detect::Detection;
use crate::geometry::BBox;

pub const DEFAULT_MAX_DISTANCE: f32 = 100.0;
pub const DEFAULT_HIT_COUNTER_MAX: u32 = 15;
pub const DEFAULT_INITIALIZATION_DELAY: u32 = 3;

#[derive(Clone, Debug, PartialEq)]
pub struct TrackerConfig {
    pub enabled: bool,
    /// Largest centre distance (pixels) at which a detection may continue a track.
    pub max_distance: f32,
    /// Tracks are evicted once they miss more than twice this many frames in a row.
    pub hit_counter_max: u32,
    /// Consecutive matches needed before a new track is confirmed.
    pub initialization_delay: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_distance: DEFAULT_MAX_DISTANCE,
            hit_counter_max: DEFAULT_HIT_COUNTER_MAX,
            initialization_delay: DEFAULT_INITIALIZATION_DELAY,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    Tentative,
    Confirmed,
    Stale,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: u64,
    pub class_name: String,
    pub bbox: BBox,
    pub confidence: f32,
    /// Frames survived since creation.
    pub age: u64,
    pub hits: u32,
    pub misses: u32,
    pub state: TrackState,
    pub violations: Vec<String>,
    #[serde(skip)]
    confirmed_once: bool,
}

impl Track {
    fn spawn(id: u64, detection: &Detection, initialization_delay: u32) -> Self {
        let mut track = Self {
            id,
            class_name: detection.class_name.clone(),
            bbox: detection.bbox,
            confidence: detection.confidence,
            age: 0,
            hits: 1,
            misses: 0,
            state: TrackState::Tentative,
            violations: Vec::new(),
            confirmed_once: false,
        };
        track.refresh_state(initialization_delay);
        track
    }

    fn hit(&mut self, detection: &Detection, initialization_delay: u32) {
        self.bbox = detection.bbox;
        self.confidence = detection.confidence;
        self.hits = self.hits.saturating_add(1);
        self.misses = 0;
        self.refresh_state(initialization_delay);
    }

    fn miss(&mut self) {
        self.hits = 0;
        self.misses = self.misses.saturating_add(1);
        self.state = TrackState::Stale;
    }

    fn refresh_state(&mut self, initialization_delay: u32) {
        if self.confirmed_once || self.hits >= initialization_delay {
            self.state = TrackState::Confirmed;
            self.confirmed_once = true;
        } else {
            self.state = TrackState::Tentative;
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == TrackState::Confirmed
    }
}

pub struct ObjectTracker {
    config: TrackerConfig,
    tracks: BTreeMap<u64, Track>,
    next_id: u64,
}

impl ObjectTracker {
    pub fn new(config: TrackerConfig) -> Self {
        if !config.enabled {
            log::info!("object tracking disabled; detections pass through untracked");
        }
        Self {
            config,
            tracks: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Associates one frame of detections with tracks and returns them annotated
    /// with track ids. Identity when tracking is disabled.
    pub fn update(&mut self, mut detections: Vec<Detection>) -> Vec<Detection> {
        if !self.config.enabled {
            return detections;
        }

        let assignments = self.assign(&detections);
        let delay = self.config.initialization_delay;

        for track in self.tracks.values_mut() {
            track.age = track.age.saturating_add(1);
        }

        let mut matched = Vec::with_capacity(assignments.len());
        for (index, detection) in detections.iter_mut().enumerate() {
            let track_id = match assignments.get(&index) {
                Some(&track_id) => {
                    if let Some(track) = self.tracks.get_mut(&track_id) {
                        track.hit(detection, delay);
                    }
                    track_id
                }
                None => {
                    let track_id = self.next_id;
                    self.next_id += 1;
                    self.tracks
                        .insert(track_id, Track::spawn(track_id, detection, delay));
                    log::debug!("new {} track {}", detection.class_name, track_id);
                    track_id
                }
            };
            matched.push(track_id);
            detection.track_id = Some(track_id);
        }

        let eviction = self.config.hit_counter_max.saturating_mul(2);
        self.tracks.retain(|id, track| {
            if matched.contains(id) {
                return true;
            }
            track.miss();
            if track.misses > eviction {
                log::debug!("evicting track {} after {} misses", id, track.misses);
                return false;
            }
            true
        });

        detections
    }

    /// Greedy nearest-neighbour assignment: detection index to track id.
    fn assign(&self, detections: &[Detection]) -> BTreeMap<usize, u64> {
        let mut pairs: Vec<(f32, u64, usize)> = Vec::new();
        for (id, track) in &self.tracks {
            let predicted = track.bbox.center();
            for (index, detection) in detections.iter().enumerate() {
                if detection.class_name != track.class_name {
                    continue;
                }
                let distance = predicted.distance(&detection.bbox.center());
                if distance.is_finite() && distance <= self.config.max_distance {
                    pairs.push((distance, *id, index));
                }
            }
        }
        pairs.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        let mut assignments = BTreeMap::new();
        let mut taken_tracks = Vec::new();
        for (_, id, index) in pairs {
            if assignments.contains_key(&index) || taken_tracks.contains(&id) {
                continue;
            }
            assignments.insert(index, id);
            taken_tracks.push(id);
        }
        assignments
    }

    pub fn get_track_info(&self, id: u64) -> Option<Track> {
        self.tracks.get(&id).cloned()
    }

    /// Records a violation label on a track. Duplicate labels and unknown ids are ignored.
    pub fn add_violation(&mut self, id: u64, label: &str) {
        if let Some(track) = self.tracks.get_mut(&id) {
            if !track.violations.iter().any(|existing| existing == label) {
                track.violations.push(label.to_string());
            }
        }
    }

    pub fn reset(&mut self) {
        self.tracks.clear();
        self.next_id = 1;
    }

    /// Number of live (not yet evicted) tracks.
    pub fn active_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// Snapshot of every live track, ordered by id.
    pub fn tracks(&self) -> Vec<Track> {
        self.tracks.values().cloned().collect()
    }
}
