use crate::error::{Result, StreamError};
use image::{GrayImage, ImageBuffer, Luma, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};
use imageproc::point::Point;
use tracing::debug;

/// Contours enclosing this many pixels² or fewer are color noise.
pub const MIN_REGION_AREA: f64 = 500.0;

/// Half-width of the square structuring element (2 → 5×5).
const MORPH_RADIUS: u8 = 2;

/// Hue bands (OpenCV 8-bit scale, 0..=180) that count as red. Red wraps
/// around hue 0, hence two bands.
const RED_HUE_BANDS: [(u8, u8); 2] = [(0, 10), (160, 180)];
const MIN_SATURATION: u8 = 100;
const MIN_VALUE: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// Raw interleaved 3-channel frame as delivered by a capture device.
#[derive(Debug, Clone)]
pub struct Mat {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub order: ChannelOrder,
}

impl Mat {
    /// Bytes needed for an interleaved 3-channel `width`×`height` frame.
    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }

    pub fn new(width: u32, height: u32, order: ChannelOrder) -> Self {
        Self {
            data: vec![0u8; Self::byte_len(width, height)],
            width,
            height,
            order,
        }
    }

    pub fn from_raw(width: u32, height: u32, order: ChannelOrder, data: Vec<u8>) -> Self {
        Self { data, width, height, order }
    }

    /// Convert to the RGB image the detector and classifier work on,
    /// swapping channels if the device delivered BGR.
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        if self.width == 0 || self.height == 0 {
            return Err(StreamError::InvalidFrame(format!(
                "empty frame {}x{}",
                self.width, self.height
            )));
        }

        let expected = Self::byte_len(self.width, self.height);
        if self.data.len() != expected {
            return Err(StreamError::InvalidFrame(format!(
                "{}x{} frame needs {} bytes, got {}",
                self.width,
                self.height,
                expected,
                self.data.len()
            )));
        }

        let data = match self.order {
            ChannelOrder::Rgb => self.data.clone(),
            ChannelOrder::Bgr => self
                .data
                .chunks_exact(3)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
        };

        ImageBuffer::from_raw(self.width, self.height, data)
            .ok_or_else(|| StreamError::InvalidFrame("failed to create image buffer".to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// A tomato-colored area: its bounding box plus the outer contour it came from.
#[derive(Debug, Clone)]
pub struct Region {
    pub bbox: BoundingBox,
    pub contour: Vec<Point<i32>>,
}

/// Convert one RGB pixel to HSV on the 8-bit OpenCV scale
/// (H in 0..=180, S and V in 0..=255).
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let s = if max > 0.0 { 255.0 * delta / max } else { 0.0 };

    let mut h = if delta == 0.0 {
        0.0
    } else if max == rf {
        60.0 * (gf - bf) / delta
    } else if max == gf {
        120.0 + 60.0 * (bf - rf) / delta
    } else {
        240.0 + 60.0 * (rf - gf) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }

    [(h / 2.0).round() as u8, s.round() as u8, max as u8]
}

fn is_red(hsv: [u8; 3]) -> bool {
    let [h, s, v] = hsv;
    s >= MIN_SATURATION
        && v >= MIN_VALUE
        && RED_HUE_BANDS.iter().any(|&(lo, hi)| h >= lo && h <= hi)
}

/// Binary mask (255 = red) of the pixels falling in either red band.
pub fn red_mask(image: &RgbImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut mask = GrayImage::new(width, height);

    for (x, y, pixel) in image.enumerate_pixels() {
        if is_red(rgb_to_hsv(pixel[0], pixel[1], pixel[2])) {
            mask.put_pixel(x, y, Luma([255]));
        }
    }

    mask
}

/// Polygon area of a closed contour (shoelace formula).
pub fn contour_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }

    let twice_area: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
        .sum();

    twice_area.abs() as f64 / 2.0
}

/// Smallest upright rectangle containing every contour point.
pub fn bounding_rect(points: &[Point<i32>]) -> BoundingBox {
    let min_x = points.iter().map(|p| p.x).min().unwrap_or(0);
    let max_x = points.iter().map(|p| p.x).max().unwrap_or(-1);
    let min_y = points.iter().map(|p| p.y).min().unwrap_or(0);
    let max_y = points.iter().map(|p| p.y).max().unwrap_or(-1);

    BoundingBox {
        x: min_x,
        y: min_y,
        width: max_x - min_x + 1,
        height: max_y - min_y + 1,
    }
}

/// Find tomato-like regions: red HSV mask, opened then closed with a 5×5
/// element, outermost contours only, area strictly above [`MIN_REGION_AREA`].
pub fn detect_regions(image: &RgbImage) -> Result<Vec<Region>> {
    if image.width() == 0 || image.height() == 0 {
        return Err(StreamError::InvalidFrame("cannot detect regions in an empty image".to_string()));
    }

    let mask = red_mask(image);
    let mask = open(&mask, Norm::LInf, MORPH_RADIUS);
    let mask = close(&mask, Norm::LInf, MORPH_RADIUS);

    let regions: Vec<Region> = find_contours::<i32>(&mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .filter(|c| contour_area(&c.points) > MIN_REGION_AREA)
        .map(|c| Region {
            bbox: bounding_rect(&c.points),
            contour: c.points,
        })
        .collect();

    debug!("Detected {} candidate tomato regions", regions.len());
    Ok(regions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn image_with_squares(width: u32, height: u32, squares: &[(u32, u32, u32)]) -> RgbImage {
        let mut img = RgbImage::from_pixel(width, height, Rgb([0, 0, 255]));
        for &(sx, sy, side) in squares {
            for y in sy..sy + side {
                for x in sx..sx + side {
                    img.put_pixel(x, y, Rgb([220, 20, 20]));
                }
            }
        }
        img
    }

    #[test]
    fn hsv_matches_opencv_scale() {
        assert_eq!(rgb_to_hsv(255, 0, 0), [0, 255, 255]);
        assert_eq!(rgb_to_hsv(0, 255, 0), [60, 255, 255]);
        assert_eq!(rgb_to_hsv(0, 0, 255), [120, 255, 255]);
        assert_eq!(rgb_to_hsv(0, 0, 0), [0, 0, 0]);
        // magenta-ish red sits in the upper band
        assert_eq!(rgb_to_hsv(255, 0, 60)[0], 173);
    }

    #[test]
    fn both_red_bands_are_masked() {
        assert!(is_red(rgb_to_hsv(200, 30, 10)));
        assert!(is_red(rgb_to_hsv(200, 10, 40)));
        assert!(!is_red(rgb_to_hsv(200, 120, 10)));
        // pale red fails the saturation floor
        assert!(!is_red(rgb_to_hsv(240, 200, 200)));
    }

    #[test]
    fn single_red_square_yields_one_region() {
        let img = image_with_squares(160, 120, &[(40, 30, 40)]);

        let regions = detect_regions(&img).unwrap();

        assert_eq!(regions.len(), 1);
        assert_eq!(
            regions[0].bbox,
            BoundingBox { x: 40, y: 30, width: 40, height: 40 }
        );
    }

    #[test]
    fn sub_threshold_specks_are_ignored() {
        // 20x20 squares enclose 19*19 = 361 px² as a polygon
        let img = image_with_squares(200, 120, &[(10, 10, 20), (80, 60, 20), (150, 20, 3)]);

        assert!(detect_regions(&img).unwrap().is_empty());
    }

    #[test]
    fn separate_squares_are_separate_regions() {
        let img = image_with_squares(200, 100, &[(10, 10, 30), (120, 50, 35)]);

        let regions = detect_regions(&img).unwrap();

        assert_eq!(regions.len(), 2);
    }

    #[test]
    fn shoelace_area_of_square_contour() {
        let points = vec![
            Point::new(0, 0),
            Point::new(10, 0),
            Point::new(10, 10),
            Point::new(0, 10),
        ];
        assert_eq!(contour_area(&points), 100.0);
        assert_eq!(bounding_rect(&points), BoundingBox { x: 0, y: 0, width: 11, height: 11 });
    }

    #[test]
    fn bgr_frames_are_swapped_to_rgb() {
        let frame = Mat::from_raw(1, 1, ChannelOrder::Bgr, vec![10, 20, 30]);
        let rgb = frame.to_rgb_image().unwrap();
        assert_eq!(rgb.get_pixel(0, 0).0, [30, 20, 10]);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn frame_size_does_not_wrap_in_u32() {
        // 40000 * 40000 * 3 exceeds u32::MAX
        assert_eq!(Mat::byte_len(40_000, 40_000), 4_800_000_000);
        assert_eq!(Mat::new(40_000, 1, ChannelOrder::Rgb).data.len(), 120_000);
    }

    #[test]
    fn malformed_frames_are_rejected() {
        let empty = Mat::new(0, 0, ChannelOrder::Rgb);
        assert!(matches!(empty.to_rgb_image(), Err(StreamError::InvalidFrame(_))));

        let short = Mat::from_raw(4, 4, ChannelOrder::Rgb, vec![0; 10]);
        assert!(matches!(short.to_rgb_image(), Err(StreamError::InvalidFrame(_))));
    }
}
