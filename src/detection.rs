//! [`AudioDetection`] / [`VideoDetection`] — one successful 32-bit frame
//! decode, from audio or video respectively (spec.md §3).
//!
//! Kept as two distinct types (rather than one tagged union) because their
//! position field differs in kind (`sample_position` vs `video_frame_index`)
//! and every caller of the Correlator already knows which side it's
//! building — see `spec.md`'s design notes on avoiding needless polymorphism.

use serde::{Deserialize, Serialize};

/// A checksum-valid frame decode from audio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioDetection {
    pub sample_position: u64,
    pub frame_id: u32,
    pub confidence: f64,
}

/// A checksum-valid frame decode from video.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoDetection {
    pub video_frame_index: u64,
    pub frame_id: u32,
    pub confidence: f64,
}
