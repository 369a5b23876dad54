//! Sparse feature tracking: ORB keypoints, cross-checked matching and RANSAC homographies

pub mod homography;
pub mod matcher;
pub mod orb;
mod tracker;

pub use homography::{estimate_homography, Homography, HomographyEstimate, RansacParams};
pub use matcher::{match_cross_check, FeatureMatch};
pub use orb::{Descriptor, Keypoint, KeypointSet, OrbExtractor};
pub use tracker::{
    track, CancelToken, EndReason, FeatureTracker, FrameOutcome, SkipReason, Step, TrackedFrame,
    TrackingSession,
};
