use crate::classifier::{ClassificationResult, Ripeness};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use tracing::debug;

const RIPE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const UNRIPE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

const BOX_THICKNESS: i32 = 2;
/// Gap between the label's baseline and the top edge of its box.
const LABEL_OFFSET: i32 = 10;

const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;
const GLYPH_SCALE: i32 = 2;
const GLYPH_SPACING: i32 = 1;

/// Draw every result onto a copy of `frame`; the input is left untouched.
/// Later results are drawn over earlier ones.
pub fn annotate(frame: &RgbImage, results: &[ClassificationResult]) -> RgbImage {
    let mut marked = frame.clone();

    for result in results {
        let color = label_color(result.label);
        let bbox = result.position;

        for inset in 0..BOX_THICKNESS {
            let width = bbox.width - 2 * inset;
            let height = bbox.height - 2 * inset;
            if width <= 0 || height <= 0 {
                break;
            }
            let rect = Rect::at(bbox.x + inset, bbox.y + inset).of_size(width as u32, height as u32);
            draw_hollow_rect_mut(&mut marked, rect, color);
        }

        let text = label_text(result);
        let top = bbox.y - LABEL_OFFSET - GLYPH_HEIGHT * GLYPH_SCALE;
        draw_label(&mut marked, &text, bbox.x, top, color);
    }

    debug!("Annotated {} results", results.len());
    marked
}

pub fn label_color(label: Ripeness) -> Rgb<u8> {
    match label {
        Ripeness::Ripe => RIPE_COLOR,
        Ripeness::Unripe => UNRIPE_COLOR,
    }
}

/// `"Ripe (91.3%)"`
pub fn label_text(result: &ClassificationResult) -> String {
    format!("{} ({:.1}%)", result.label.title(), result.confidence * 100.0)
}

fn draw_label(image: &mut RgbImage, text: &str, x: i32, y: i32, color: Rgb<u8>) {
    let advance = (GLYPH_WIDTH + GLYPH_SPACING) * GLYPH_SCALE;

    for (i, ch) in text.chars().enumerate() {
        let origin_x = x + i as i32 * advance;
        for (row, bits) in glyph(ch).iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (0x10 >> col) == 0 {
                    continue;
                }
                let px = origin_x + col * GLYPH_SCALE;
                let py = y + row as i32 * GLYPH_SCALE;
                fill_block(image, px, py, GLYPH_SCALE, color);
            }
        }
    }
}

fn fill_block(image: &mut RgbImage, x: i32, y: i32, size: i32, color: Rgb<u8>) {
    let (width, height) = (image.width() as i32, image.height() as i32);
    for dy in 0..size {
        for dx in 0..size {
            let (px, py) = (x + dx, y + dy);
            // Skip out-of-bounds pixels
            if px >= 0 && py >= 0 && px < width && py < height {
                image.put_pixel(px as u32, py as u32, color);
            }
        }
    }
}

/// 5x7 bitmap rows, most significant of the low five bits is the left column.
/// Covers the characters label text can contain.
fn glyph(ch: char) -> [u8; 7] {
    match ch {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '%' => [0x18, 0x19, 0x02, 0x04, 0x08, 0x13, 0x03],
        '(' => [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02],
        ')' => [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'e' => [0x00, 0x00, 0x0E, 0x11, 0x1F, 0x10, 0x0E],
        'i' => [0x04, 0x00, 0x0C, 0x04, 0x04, 0x04, 0x0E],
        'n' => [0x00, 0x00, 0x16, 0x19, 0x11, 0x11, 0x11],
        'p' => [0x00, 0x00, 0x1E, 0x11, 0x1E, 0x10, 0x10],
        'r' => [0x00, 0x00, 0x16, 0x19, 0x10, 0x10, 0x10],
        _ => [0x00; 7],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::BoundingBox;

    fn result(label: Ripeness, confidence: f32, x: i32, y: i32, side: i32) -> ClassificationResult {
        ClassificationResult {
            label,
            confidence,
            position: BoundingBox { x, y, width: side, height: side },
        }
    }

    #[test]
    fn label_text_has_one_decimal_percentage() {
        assert_eq!(label_text(&result(Ripeness::Ripe, 0.9, 0, 0, 10)), "Ripe (90.0%)");
        assert_eq!(label_text(&result(Ripeness::Unripe, 0.5123, 0, 0, 10)), "Unripe (51.2%)");
    }

    #[test]
    fn annotate_returns_copy_of_same_size() {
        let frame = RgbImage::from_pixel(120, 90, Rgb([0, 0, 255]));
        let original = frame.clone();

        let marked = annotate(&frame, &[result(Ripeness::Ripe, 0.9, 30, 40, 30)]);

        assert_eq!(marked.dimensions(), frame.dimensions());
        assert_eq!(frame, original);
        assert_ne!(marked, original);
    }

    #[test]
    fn box_outline_uses_label_color() {
        let frame = RgbImage::from_pixel(100, 100, Rgb([0, 0, 0]));

        let marked = annotate(
            &frame,
            &[
                result(Ripeness::Ripe, 0.8, 10, 40, 20),
                result(Ripeness::Unripe, 0.7, 60, 40, 20),
            ],
        );

        assert_eq!(*marked.get_pixel(10, 40), RIPE_COLOR);
        assert_eq!(*marked.get_pixel(11, 41), RIPE_COLOR);
        assert_eq!(*marked.get_pixel(20, 50), Rgb([0, 0, 0]));
        assert_eq!(*marked.get_pixel(79, 59), UNRIPE_COLOR);
    }

    #[test]
    fn later_results_draw_on_top() {
        let frame = RgbImage::from_pixel(100, 100, Rgb([0, 0, 0]));

        let marked = annotate(
            &frame,
            &[
                result(Ripeness::Ripe, 0.8, 40, 40, 20),
                result(Ripeness::Unripe, 0.8, 40, 40, 20),
            ],
        );

        assert_eq!(*marked.get_pixel(40, 40), UNRIPE_COLOR);
    }

    #[test]
    fn labels_near_the_top_edge_are_clipped() {
        let frame = RgbImage::from_pixel(200, 60, Rgb([0, 0, 0]));

        let marked = annotate(&frame, &[result(Ripeness::Unripe, 0.99, 0, 0, 30)]);

        assert_eq!(marked.dimensions(), (200, 60));
    }
}
