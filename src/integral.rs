//! Summed-area tables over interleaved 8-bit buffers

/// Per-channel sum and squared-sum tables with a zero guard row and column
#[derive(Debug, Clone)]
pub struct IntegralImage {
    width: usize,
    channels: usize,
    sums: Vec<u64>,
    squares: Vec<u64>,
}

impl IntegralImage {
    /// Build from row-major interleaved samples (`channels` per pixel).
    pub fn new(data: &[u8], width: u32, height: u32, channels: usize) -> Self {
        let (w, h) = (width as usize, height as usize);
        let stride = (w + 1) * channels;
        let mut sums = vec![0u64; (h + 1) * stride];
        let mut squares = vec![0u64; (h + 1) * stride];

        for y in 0..h {
            for x in 0..w {
                for c in 0..channels {
                    let value = data[(y * w + x) * channels + c] as u64;
                    let here = (y + 1) * stride + (x + 1) * channels + c;
                    let up = y * stride + (x + 1) * channels + c;
                    let left = (y + 1) * stride + x * channels + c;
                    let diag = y * stride + x * channels + c;

                    sums[here] = value + sums[up] + sums[left] - sums[diag];
                    squares[here] = value * value + squares[up] + squares[left] - squares[diag];
                }
            }
        }

        Self {
            width: w,
            channels,
            sums,
            squares,
        }
    }

    pub fn from_gray(image: &image::GrayImage) -> Self {
        Self::new(image.as_raw(), image.width(), image.height(), 1)
    }

    fn region(table: &[u64], idx: [usize; 4]) -> u64 {
        let [a, b, c, d] = idx;
        table[d] + table[a] - table[b] - table[c]
    }

    fn corners(&self, channel: usize, x: u32, y: u32, w: u32, h: u32) -> [usize; 4] {
        let stride = (self.width + 1) * self.channels;
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        [
            y0 * stride + x0 * self.channels + channel,
            y0 * stride + x1 * self.channels + channel,
            y1 * stride + x0 * self.channels + channel,
            y1 * stride + x1 * self.channels + channel,
        ]
    }

    /// Sum of `channel` over the `w` x `h` window at (x, y)
    pub fn sum(&self, channel: usize, x: u32, y: u32, w: u32, h: u32) -> u64 {
        Self::region(&self.sums, self.corners(channel, x, y, w, h))
    }

    /// Sum of squared samples of `channel` over the window at (x, y)
    pub fn square_sum(&self, channel: usize, x: u32, y: u32, w: u32, h: u32) -> u64 {
        Self::region(&self.squares, self.corners(channel, x, y, w, h))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gray_sums() {
        // 3x2 image:
        // 1 2 3
        // 4 5 6
        let data = [1u8, 2, 3, 4, 5, 6];
        let ii = IntegralImage::new(&data, 3, 2, 1);
        assert_eq!(ii.sum(0, 0, 0, 3, 2), 21);
        assert_eq!(ii.sum(0, 1, 0, 2, 2), 16);
        assert_eq!(ii.sum(0, 2, 1, 1, 1), 6);
        assert_eq!(ii.square_sum(0, 0, 1, 2, 1), 16 + 25);
    }

    #[test]
    fn test_interleaved_channels() {
        // 2x1 image with two channels: (1, 10) (2, 20)
        let data = [1u8, 10, 2, 20];
        let ii = IntegralImage::new(&data, 2, 1, 2);
        assert_eq!(ii.sum(0, 0, 0, 2, 1), 3);
        assert_eq!(ii.sum(1, 0, 0, 2, 1), 30);
        assert_eq!(ii.square_sum(1, 1, 0, 1, 1), 400);
    }
}
