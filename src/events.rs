//! Detection events: what the recognition stage hands to the event sink.

use std::time::SystemTime;

use crate::faces::FaceRegion;
use crate::frame::Frame;

/// Who a face region was matched to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DetectedIdentity {
    Known(String),
    Unknown,
}

impl DetectedIdentity {
    /// Label used in audit records and log lines.
    pub fn label(&self) -> &str {
        match self {
            DetectedIdentity::Known(name) => name,
            DetectedIdentity::Unknown => "unknown",
        }
    }
}

/// One recognition outcome for one face region in one frame.
///
/// Consumed exactly once by the event sink, then immutable history.
#[derive(Clone, Debug)]
pub struct DetectionEvent {
    pub identity: DetectedIdentity,
    /// Match confidence in [0, 1]; 0 for unknowns.
    pub confidence: f32,
    /// Capture time of the frame the face was found in.
    pub timestamp: SystemTime,
    /// Bounding region in original frame coordinates.
    pub region: FaceRegion,
    pub frame_seq: u64,
    /// Full-resolution frame, carried only by stranger alerts so the sink
    /// can write a snapshot.
    pub snapshot_frame: Option<Frame>,
}

impl DetectionEvent {
    /// Stranger alerts get a snapshot and a distinct audit status.
    pub fn is_alert(&self) -> bool {
        matches!(self.identity, DetectedIdentity::Unknown)
    }
}

/// Map a match distance to a confidence in [0, 1].
///
/// Normalized against the tolerance so confidences stay comparable when
/// the tolerance knob changes: a match right at the tolerance edge scores
/// near 0, an exact match scores 1.
pub fn confidence_from_distance(distance: f32, tolerance: f32) -> f32 {
    if tolerance <= 0.0 {
        return 0.0;
    }
    (1.0 - distance / tolerance).clamp(0.0, 1.0)
}
