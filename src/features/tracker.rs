use super::homography::{estimate_homography, Homography, Point2, RansacParams};
use super::matcher::match_cross_check;
use super::orb::{KeypointSet, OrbExtractor};
use crate::capture::FrameSource;
use crate::config::TrackerConfig;
use crate::draw;
use crate::error::{ensure_non_empty, Result};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Homography estimation needs strictly more matches than this
const MIN_MATCHES: usize = 4;
const WAIT_SLICE: Duration = Duration::from_millis(5);
/// Outline corners may fall at most this many frame sizes outside the frame
const OUTLINE_REACH: f64 = 4.0;

/// Cooperative cancellation flag shared between a session and its controller
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep up to `timeout`, returning early once cancelled.
    fn wait(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while !self.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(WAIT_SLICE.min(deadline - now));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoFrameKeypoints,
    NoReferenceKeypoints,
    TooFewMatches,
    DegenerateHomography,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Reference outline found; corners in (0,0), (w,0), (w,h), (0,h) order
    Located {
        corners: [Point2; 4],
        matches: usize,
        inliers: usize,
    },
    Skipped(SkipReason),
}

#[derive(Debug, Clone)]
pub struct TrackedFrame {
    pub index: usize,
    pub outcome: FrameOutcome,
    /// The frame, with the outline drawn when located
    pub display: RgbImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Cancelled,
    EndOfStream,
}

#[derive(Debug)]
pub enum Step {
    Frame(TrackedFrame),
    Finished(EndReason),
}

/// Reference keypoints, extracted once and reused for every frame
pub struct FeatureTracker {
    extractor: OrbExtractor,
    reference: KeypointSet,
    size: (u32, u32),
    ransac: RansacParams,
}

impl FeatureTracker {
    pub fn new(reference: &RgbImage, config: &TrackerConfig) -> Result<Self> {
        ensure_non_empty(reference.width(), reference.height(), "reference")?;

        let extractor = OrbExtractor::new(config);
        let keypoints = extractor.extract(reference);
        tracing::info!(
            "Reference {}x{}: {} keypoints",
            reference.width(),
            reference.height(),
            keypoints.len()
        );

        Ok(Self {
            extractor,
            reference: keypoints,
            size: reference.dimensions(),
            ransac: RansacParams {
                threshold: config.ransac_threshold,
                max_iterations: config.max_iterations,
            },
        })
    }

    pub fn reference_keypoints(&self) -> &KeypointSet {
        &self.reference
    }

    /// Locate the reference in one frame, drawing its outline on `display`.
    pub fn track_frame(&self, frame: &RgbImage, display: &mut RgbImage) -> FrameOutcome {
        let _span = tracing::debug_span!("track_frame").entered();
        draw::reset_display(display, frame);

        if self.reference.is_empty() {
            return FrameOutcome::Skipped(SkipReason::NoReferenceKeypoints);
        }
        let observed = self.extractor.extract(frame);
        if observed.is_empty() {
            return FrameOutcome::Skipped(SkipReason::NoFrameKeypoints);
        }

        let matches = match_cross_check(&self.reference.descriptors, &observed.descriptors);
        let (src, dst): (Vec<Point2>, Vec<Point2>) = matches
            .iter()
            .map(|m| {
                let r = &self.reference.keypoints[m.query];
                let f = &observed.keypoints[m.train];
                ((r.x as f64, r.y as f64), (f.x as f64, f.y as f64))
            })
            .unzip();

        match self.locate(&src, &dst, frame.dimensions()) {
            Ok((corners, inliers)) => {
                let polygon: Vec<(f32, f32)> =
                    corners.iter().map(|&(x, y)| (x as f32, y as f32)).collect();
                draw::draw_polygon(display, &polygon, draw::GREEN);
                FrameOutcome::Located {
                    corners,
                    matches: matches.len(),
                    inliers,
                }
            }
            Err(reason) => FrameOutcome::Skipped(reason),
        }
    }

    /// Fit reference -> frame correspondences and project the reference outline.
    ///
    /// Returns the outline corners and the inlier count.
    fn locate(
        &self,
        src: &[Point2],
        dst: &[Point2],
        frame_size: (u32, u32),
    ) -> std::result::Result<([Point2; 4], usize), SkipReason> {
        if src.len() <= MIN_MATCHES {
            tracing::debug!("Only {} matches", src.len());
            return Err(SkipReason::TooFewMatches);
        }

        let Some(estimate) = estimate_homography(src, dst, &self.ransac) else {
            tracing::warn!("No homography from {} matches, skipping frame", src.len());
            return Err(SkipReason::DegenerateHomography);
        };

        match project_outline(&estimate.homography, self.size, frame_size) {
            Some(corners) => Ok((corners, estimate.inlier_count())),
            None => {
                tracing::warn!("Outline projects far outside the frame, skipping frame");
                Err(SkipReason::DegenerateHomography)
            }
        }
    }
}

/// Project the reference rectangle. `None` when a corner is not finite or lands
/// more than `OUTLINE_REACH` frame sizes outside the frame.
fn project_outline(
    homography: &Homography,
    reference_size: (u32, u32),
    frame_size: (u32, u32),
) -> Option<[Point2; 4]> {
    let (w, h) = (reference_size.0 as f64, reference_size.1 as f64);
    let (fw, fh) = (frame_size.0 as f64, frame_size.1 as f64);
    let x_range = -OUTLINE_REACH * fw..=(1.0 + OUTLINE_REACH) * fw;
    let y_range = -OUTLINE_REACH * fh..=(1.0 + OUTLINE_REACH) * fh;

    let outline = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];
    let mut corners = [(0.0, 0.0); 4];
    for (slot, &corner) in corners.iter_mut().zip(&outline) {
        let (x, y) = homography.project(corner)?;
        if !x_range.contains(&x) || !y_range.contains(&y) {
            return None;
        }
        *slot = (x, y);
    }
    Some(corners)
}

enum SessionState {
    Ready,
    Running { next_index: usize },
    Finished(EndReason),
}

/// Pull-driven tracking loop over a frame source
pub struct TrackingSession<S: FrameSource> {
    tracker: FeatureTracker,
    source: S,
    cancel: CancelToken,
    state: SessionState,
}

impl<S: FrameSource> TrackingSession<S> {
    pub fn new(tracker: FeatureTracker, source: S, cancel: CancelToken) -> Self {
        Self {
            tracker,
            source,
            cancel,
            state: SessionState::Ready,
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn finished(&self) -> Option<EndReason> {
        match self.state {
            SessionState::Finished(reason) => Some(reason),
            _ => None,
        }
    }

    /// Process one frame, or report why the session is over.
    pub fn step(&mut self) -> Result<Step> {
        let index = match self.state {
            SessionState::Finished(reason) => return Ok(Step::Finished(reason)),
            SessionState::Ready => {
                tracing::info!("Tracking session started");
                0
            }
            SessionState::Running { next_index } => next_index,
        };
        self.state = SessionState::Running { next_index: index };

        if self.cancel.is_cancelled() {
            return Ok(self.finish(EndReason::Cancelled));
        }

        let Some(frame) = self.source.next_frame()? else {
            return Ok(self.finish(EndReason::EndOfStream));
        };

        let mut display = RgbImage::new(frame.width(), frame.height());
        let outcome = self.tracker.track_frame(&frame, &mut display);
        tracing::debug!("Frame {}: {:?}", index, outcome);

        self.state = SessionState::Running {
            next_index: index + 1,
        };
        Ok(Step::Frame(TrackedFrame {
            index,
            outcome,
            display,
        }))
    }

    /// Drive the session to completion, waiting up to `poll` between frames.
    pub fn run<F>(&mut self, poll: Duration, mut on_frame: F) -> Result<EndReason>
    where
        F: FnMut(TrackedFrame) -> Result<()>,
    {
        loop {
            match self.step()? {
                Step::Frame(frame) => {
                    on_frame(frame)?;
                    self.cancel.wait(poll);
                }
                Step::Finished(reason) => return Ok(reason),
            }
        }
    }

    fn finish(&mut self, reason: EndReason) -> Step {
        tracing::info!("Tracking session finished: {:?}", reason);
        self.state = SessionState::Finished(reason);
        Step::Finished(reason)
    }
}

/// Track `reference` through every frame of `source` until cancelled or the stream ends.
pub fn track<S, F>(
    reference: &RgbImage,
    source: S,
    config: &TrackerConfig,
    cancel: CancelToken,
    on_frame: F,
) -> Result<EndReason>
where
    S: FrameSource,
    F: FnMut(TrackedFrame) -> Result<()>,
{
    let tracker = FeatureTracker::new(reference, config)?;
    let mut session = TrackingSession::new(tracker, source, cancel);
    session.run(Duration::from_millis(config.poll_interval_ms), on_frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameSequence;
    use crate::error::VisionError;
    use crate::geometry::{crop, Region};
    use image::Rgb;

    /// Non-repeating patchwork of flat cells
    fn scene(width: u32, height: u32) -> RgbImage {
        const LEVELS: [u8; 5] = [20, 80, 140, 200, 250];
        RgbImage::from_fn(width, height, |x, y| {
            let (cx, cy) = (x / 10, y / 10);
            let hash = (cx.wrapping_mul(73_856_093) ^ cy.wrapping_mul(19_349_663)) % 5;
            let v = LEVELS[hash as usize];
            Rgb([v, v, v])
        })
    }

    fn close(a: Point2, b: Point2, tolerance: f64) -> bool {
        (a.0 - b.0).abs() <= tolerance && (a.1 - b.1).abs() <= tolerance
    }

    #[test]
    fn test_empty_reference_rejected() {
        let result = FeatureTracker::new(&RgbImage::new(0, 0), &TrackerConfig::default());
        assert!(matches!(result, Err(VisionError::InvalidInput(_))));
    }

    #[test]
    fn test_identical_frame_is_located() {
        let reference = scene(120, 100);
        let tracker = FeatureTracker::new(&reference, &TrackerConfig::default()).unwrap();
        let mut display = RgbImage::new(1, 1);

        match tracker.track_frame(&reference, &mut display) {
            FrameOutcome::Located {
                corners, inliers, ..
            } => {
                assert!(inliers >= 4);
                let expected = [(0.0, 0.0), (120.0, 0.0), (120.0, 100.0), (0.0, 100.0)];
                for (c, e) in corners.iter().zip(expected) {
                    assert!(close(*c, e, 0.5), "{:?} vs {:?}", c, e);
                }
            }
            other => panic!("expected a location, got {:?}", other),
        }
        assert_eq!(display.dimensions(), reference.dimensions());
    }

    #[test]
    fn test_reference_found_inside_larger_frame() {
        let frame = scene(220, 180);
        let reference = crop(&frame, Region::new(50, 40, 100, 90));
        let tracker = FeatureTracker::new(&reference, &TrackerConfig::default()).unwrap();
        let mut display = RgbImage::new(1, 1);

        match tracker.track_frame(&frame, &mut display) {
            FrameOutcome::Located { corners, .. } => {
                assert!(close(corners[0], (50.0, 40.0), 3.0), "{:?}", corners);
                assert!(close(corners[2], (150.0, 130.0), 3.0), "{:?}", corners);
            }
            other => panic!("expected a location, got {:?}", other),
        }
    }

    #[test]
    fn test_uniform_frame_is_skipped_untouched() {
        let tracker = FeatureTracker::new(&scene(100, 100), &TrackerConfig::default()).unwrap();
        let frame = RgbImage::from_pixel(90, 90, Rgb([128, 128, 128]));
        let mut display = RgbImage::new(1, 1);
        assert_eq!(
            tracker.track_frame(&frame, &mut display),
            FrameOutcome::Skipped(SkipReason::NoFrameKeypoints)
        );
        assert_eq!(display, frame);
    }

    #[test]
    fn test_featureless_reference_skips_every_frame() {
        let reference = RgbImage::from_pixel(60, 60, Rgb([10, 10, 10]));
        let tracker = FeatureTracker::new(&reference, &TrackerConfig::default()).unwrap();
        assert!(tracker.reference_keypoints().is_empty());
        let mut display = RgbImage::new(1, 1);
        assert_eq!(
            tracker.track_frame(&scene(100, 100), &mut display),
            FrameOutcome::Skipped(SkipReason::NoReferenceKeypoints)
        );
    }

    #[test]
    fn test_session_steps_until_end_of_stream() {
        let reference = scene(120, 100);
        let frames = vec![
            reference.clone(),
            RgbImage::from_pixel(120, 100, Rgb([0, 0, 0])),
        ];
        let tracker = FeatureTracker::new(&reference, &TrackerConfig::default()).unwrap();
        let mut session = TrackingSession::new(tracker, FrameSequence::new(frames), CancelToken::new());

        match session.step().unwrap() {
            Step::Frame(f) => {
                assert_eq!(f.index, 0);
                assert!(matches!(f.outcome, FrameOutcome::Located { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
        match session.step().unwrap() {
            Step::Frame(f) => {
                assert_eq!(f.index, 1);
                assert_eq!(f.outcome, FrameOutcome::Skipped(SkipReason::NoFrameKeypoints));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            session.step().unwrap(),
            Step::Finished(EndReason::EndOfStream)
        ));
        assert_eq!(session.finished(), Some(EndReason::EndOfStream));
        // stays finished
        assert!(matches!(
            session.step().unwrap(),
            Step::Finished(EndReason::EndOfStream)
        ));
    }

    #[test]
    fn test_cancel_is_checked_before_fetching() {
        let reference = scene(80, 80);
        let tracker = FeatureTracker::new(&reference, &TrackerConfig::default()).unwrap();
        let token = CancelToken::new();
        let mut session = TrackingSession::new(
            tracker,
            FrameSequence::new(vec![reference.clone(), reference]),
            token.clone(),
        );

        let reason = session
            .run(Duration::ZERO, |frame| {
                if frame.index == 0 {
                    token.cancel();
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(reason, EndReason::Cancelled);
        assert_eq!(session.finished(), Some(EndReason::Cancelled));
    }

    #[test]
    fn test_track_reports_every_frame() {
        let reference = scene(80, 80);
        let frames = FrameSequence::new(vec![reference.clone(); 3]);
        let config = TrackerConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        let mut indices = Vec::new();
        let reason = track(&reference, frames, &config, CancelToken::new(), |frame| {
            indices.push(frame.index);
            Ok(())
        })
        .unwrap();
        assert_eq!(reason, EndReason::EndOfStream);
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_wait_returns_early_when_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        let start = Instant::now();
        token.wait(Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    fn shifted(points: &[Point2], dx: f64, dy: f64) -> Vec<Point2> {
        points.iter().map(|&(x, y)| (x + dx, y + dy)).collect()
    }

    #[test]
    fn test_capped_features_give_too_few_matches() {
        let reference = scene(120, 100);
        let config = TrackerConfig {
            max_features: 4,
            ..Default::default()
        };
        let tracker = FeatureTracker::new(&reference, &config).unwrap();
        assert!(!tracker.reference_keypoints().is_empty());

        let mut display = RgbImage::new(1, 1);
        assert_eq!(
            tracker.track_frame(&reference, &mut display),
            FrameOutcome::Skipped(SkipReason::TooFewMatches)
        );
        assert_eq!(display, reference);
    }

    #[test]
    fn test_five_matches_needed() {
        let tracker = FeatureTracker::new(&scene(120, 100), &TrackerConfig::default()).unwrap();
        let src = [(10.0, 10.0), (100.0, 12.0), (95.0, 80.0), (15.0, 85.0), (50.0, 40.0)];
        let dst = shifted(&src, 10.0, 5.0);

        assert_eq!(
            tracker.locate(&src[..4], &dst[..4], (140, 110)),
            Err(SkipReason::TooFewMatches)
        );
        assert_eq!(tracker.locate(&[], &[], (140, 110)), Err(SkipReason::TooFewMatches));

        let (corners, inliers) = tracker.locate(&src, &dst, (140, 110)).unwrap();
        assert_eq!(inliers, 5);
        assert!(close(corners[0], (10.0, 5.0), 1e-4), "{:?}", corners);
        assert!(close(corners[2], (130.0, 105.0), 1e-4), "{:?}", corners);
    }

    #[test]
    fn test_collinear_matches_are_degenerate() {
        let tracker = FeatureTracker::new(&scene(120, 100), &TrackerConfig::default()).unwrap();
        let src: Vec<Point2> = (0..8).map(|i| (i as f64 * 10.0, i as f64 * 20.0 + 3.0)).collect();
        let dst = shifted(&src, 4.0, 4.0);
        assert_eq!(
            tracker.locate(&src, &dst, (120, 100)),
            Err(SkipReason::DegenerateHomography)
        );
    }

    #[test]
    fn test_outline_near_horizon_is_rejected() {
        let near_horizon = Homography::from_matrix(nalgebra::Matrix3::new(
            1.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, //
            -0.0045, -0.0045, 0.9900001,
        ));
        assert_eq!(project_outline(&near_horizon, (110, 110), (160, 120)), None);

        let identity = Homography::from_matrix(nalgebra::Matrix3::identity());
        assert_eq!(
            project_outline(&identity, (110, 110), (160, 120)),
            Some([(0.0, 0.0), (110.0, 0.0), (110.0, 110.0), (0.0, 110.0)])
        );
    }

    #[test]
    fn test_outline_within_reach_is_kept() {
        let shift = Homography::from_matrix(nalgebra::Matrix3::new(
            1.0, 0.0, -300.0, //
            0.0, 1.0, 0.0, //
            0.0, 0.0, 1.0,
        ));
        let corners = project_outline(&shift, (50, 50), (100, 100)).unwrap();
        assert_eq!(corners[0], (-300.0, 0.0));

        let far = Homography::from_matrix(nalgebra::Matrix3::new(
            1.0, 0.0, -500.0, //
            0.0, 1.0, 0.0, //
            0.0, 0.0, 1.0,
        ));
        assert_eq!(project_outline(&far, (50, 50), (100, 100)), None);
    }
}
