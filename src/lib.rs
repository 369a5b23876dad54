//! Classical vision operations on still images and frame streams:
//! template search, feature tracking, cascade detection, edge contours and
//! GrabCut segmentation.

pub mod capture;
pub mod config;
pub mod contours;
pub mod detect;
pub mod draw;
pub mod edges;
pub mod error;
pub mod features;
pub mod geometry;
pub mod integral;
pub mod output;
pub mod search;
pub mod segmentation;

pub use config::VisionConfig;
pub use error::{Result, VisionError};
pub use geometry::{Extraction, Region};
