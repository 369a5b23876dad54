use super::gmm::{kmeans, Color, Gmm};
use super::graph::FlowGraph;
use super::mask::{Label, LabelMask};
use super::types::SegmentationModel;
use crate::config::SegmentConfig;
use crate::error::{Result, VisionError};
use image::RgbImage;

const GAMMA: f64 = 50.0;
const LAMBDA: f64 = 9.0 * GAMMA;

/// Neighbour offsets already visited in scan order: left, up-left, up, up-right
const BACKWARD: [(i64, i64); 4] = [(-1, 0), (-1, -1), (0, -1), (1, -1)];

/// Iterated graph-cut refinement with colour mixture models
#[derive(Debug, Clone)]
pub struct GrabCut {
    iterations: usize,
    components: usize,
}

impl GrabCut {
    pub fn new(iterations: usize, components: usize) -> Self {
        Self {
            iterations,
            components: components.max(1),
        }
    }
}

impl From<&SegmentConfig> for GrabCut {
    fn from(config: &SegmentConfig) -> Self {
        Self::new(config.iterations, config.components)
    }
}

fn color_at(image: &RgbImage, x: u32, y: u32) -> Color {
    let p = image.get_pixel(x, y);
    [p[0] as f64, p[1] as f64, p[2] as f64]
}

fn color_distance_sq(a: &Color, b: &Color) -> f64 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)
}

/// Contrast term: inverse of twice the mean squared neighbour colour difference
fn compute_beta(colors: &[Color], width: i64, height: i64) -> f64 {
    let mut total = 0.0;
    let mut pairs = 0usize;
    for y in 0..height {
        for x in 0..width {
            let here = &colors[(y * width + x) as usize];
            for (dx, dy) in BACKWARD {
                let (nx, ny) = (x + dx, y + dy);
                if nx >= 0 && ny >= 0 && nx < width {
                    total += color_distance_sq(here, &colors[(ny * width + nx) as usize]);
                    pairs += 1;
                }
            }
        }
    }
    if pairs == 0 || total <= f64::EPSILON {
        return 0.0;
    }
    1.0 / (2.0 * total / pairs as f64)
}

struct Models {
    background: Gmm,
    foreground: Gmm,
}

impl GrabCut {
    fn split(mask: &LabelMask, colors: &[Color]) -> (Vec<usize>, Vec<usize>) {
        let mut background = Vec::new();
        let mut foreground = Vec::new();
        for (i, label) in mask.labels().iter().enumerate() {
            if label.is_foreground() {
                foreground.push(i);
            } else {
                background.push(i);
            }
        }
        debug_assert_eq!(background.len() + foreground.len(), colors.len());
        (background, foreground)
    }

    fn gather(colors: &[Color], indices: &[usize]) -> Vec<Color> {
        indices.iter().map(|&i| colors[i]).collect()
    }

    fn initial_models(&self, mask: &LabelMask, colors: &[Color]) -> Option<Models> {
        let (bg, fg) = Self::split(mask, colors);
        let bg = Self::gather(colors, &bg);
        let fg = Self::gather(colors, &fg);
        Some(Models {
            background: Gmm::fit(&bg, &kmeans(&bg, self.components), self.components)?,
            foreground: Gmm::fit(&fg, &kmeans(&fg, self.components), self.components)?,
        })
    }

    /// Reassign each pixel to its best component, then refit both mixtures.
    fn relearn(&self, mask: &LabelMask, colors: &[Color], models: &Models) -> Option<Models> {
        let (bg, fg) = Self::split(mask, colors);
        let bg = Self::gather(colors, &bg);
        let fg = Self::gather(colors, &fg);
        let bg_assign: Vec<usize> = bg.iter().map(|c| models.background.most_likely(c)).collect();
        let fg_assign: Vec<usize> = fg.iter().map(|c| models.foreground.most_likely(c)).collect();
        Some(Models {
            background: Gmm::fit(&bg, &bg_assign, self.components)?,
            foreground: Gmm::fit(&fg, &fg_assign, self.components)?,
        })
    }

    fn cut(&self, mask: &mut LabelMask, colors: &[Color], models: &Models, beta: f64) {
        let (w, h) = (mask.width() as i64, mask.height() as i64);
        let mut graph = FlowGraph::new(colors.len());

        for y in 0..h {
            for x in 0..w {
                let node = (y * w + x) as usize;
                let color = &colors[node];
                let (from_source, to_sink) = match mask.get(x as u32, y as u32) {
                    Label::Background => (0.0, LAMBDA),
                    Label::Foreground => (LAMBDA, 0.0),
                    _ => (
                        -models.background.likelihood(color).max(f64::MIN_POSITIVE).ln(),
                        -models.foreground.likelihood(color).max(f64::MIN_POSITIVE).ln(),
                    ),
                };
                graph.add_terminal_weights(node, from_source, to_sink);

                for (dx, dy) in BACKWARD {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= w {
                        continue;
                    }
                    let other = (ny * w + nx) as usize;
                    let scale = if dx != 0 && dy != 0 {
                        GAMMA / std::f64::consts::SQRT_2
                    } else {
                        GAMMA
                    };
                    let weight = scale * (-beta * color_distance_sq(color, &colors[other])).exp();
                    graph.add_edge(node, other, weight, weight);
                }
            }
        }

        let flow = graph.max_flow();
        let source_side = graph.source_side();
        for y in 0..h {
            for x in 0..w {
                if mask.get(x as u32, y as u32).is_probable() {
                    let label = if source_side[(y * w + x) as usize] {
                        Label::ProbableForeground
                    } else {
                        Label::ProbableBackground
                    };
                    mask.set(x as u32, y as u32, label);
                }
            }
        }
        tracing::debug!("Graph cut flow {:.1}", flow);
    }
}

impl SegmentationModel for GrabCut {
    fn refine(&mut self, image: &RgbImage, mask: &mut LabelMask) -> Result<()> {
        if (mask.width(), mask.height()) != image.dimensions() {
            return Err(VisionError::InvalidInput(format!(
                "mask is {}x{} but the image is {}x{}",
                mask.width(),
                mask.height(),
                image.width(),
                image.height()
            )));
        }

        let (w, h) = image.dimensions();
        let colors: Vec<Color> = (0..h)
            .flat_map(|y| (0..w).map(move |x| (x, y)))
            .map(|(x, y)| color_at(image, x, y))
            .collect();
        let beta = compute_beta(&colors, w as i64, h as i64);

        let Some(mut models) = self.initial_models(mask, &colors) else {
            tracing::warn!("Seed leaves one side empty, mask left as seeded");
            return Ok(());
        };

        for iteration in 0..self.iterations {
            let _span = tracing::debug_span!("grabcut_iteration", iteration).entered();
            match self.relearn(mask, &colors, &models) {
                Some(relearned) => models = relearned,
                None => {
                    tracing::debug!("One side became empty, stopping");
                    break;
                }
            }
            self.cut(mask, &colors, &models, beta);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Region;
    use image::Rgb;

    fn red_square_on_blue() -> RgbImage {
        RgbImage::from_fn(60, 60, |x, y| {
            if (20..40).contains(&x) && (20..40).contains(&y) {
                Rgb([220, 30, 30])
            } else {
                Rgb([20, 40, 200])
            }
        })
    }

    #[test]
    fn test_beta_of_flat_image_is_zero() {
        let colors = vec![[5.0, 5.0, 5.0]; 12];
        assert_eq!(compute_beta(&colors, 4, 3), 0.0);
    }

    #[test]
    fn test_square_separated_from_background() {
        let image = red_square_on_blue();
        let mut mask = LabelMask::from_seed(60, 60, Region::new(10, 10, 40, 40));
        GrabCut::new(5, 5).refine(&image, &mut mask).unwrap();

        assert!(mask.get(30, 30).is_foreground());
        assert!(mask.get(20, 20).is_foreground());
        assert_eq!(mask.get(12, 12), Label::ProbableBackground);
        assert_eq!(mask.get(45, 30), Label::ProbableBackground);
        // hard labels never change
        assert_eq!(mask.get(2, 2), Label::Background);
        assert_eq!(mask.count(Label::ProbableForeground), 400);
    }

    #[test]
    fn test_mismatched_mask_rejected() {
        let image = red_square_on_blue();
        let mut mask = LabelMask::new(10, 10, Label::ProbableForeground);
        assert!(GrabCut::new(1, 5).refine(&image, &mut mask).is_err());
    }

    #[test]
    fn test_seed_without_background_is_left_alone() {
        let image = red_square_on_blue();
        let mut mask = LabelMask::new(60, 60, Label::ProbableForeground);
        GrabCut::new(3, 5).refine(&image, &mut mask).unwrap();
        assert_eq!(mask.count(Label::ProbableForeground), 3600);
    }
}
