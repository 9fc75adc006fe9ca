/// Drawing primitives for annotated screenshots: alpha-blended rectangle
/// outlines and a minimal 5×5 bitmap font for index labels. The annotated
/// copies go to the model and to the on-disk audit trail; the source
/// screenshot is never touched.
use base64::Engine as _;

use crate::errors::{PinpointError, PinpointResult};

/// Accepted labels and their boxes on the primary annotated image.
pub const ACCEPT_COLOUR: [u8; 4] = [255, 68, 68, 255]; // red
/// Every raw detection / OCR span on the debug image.
pub const DEBUG_COLOUR: [u8; 4] = [68, 68, 255, 255]; // blue
/// Highlight for spans matching the current query.
pub const HIGHLIGHT_COLOUR: [u8; 4] = [255, 68, 68, 255]; // red

pub fn draw_rect(
    canvas: &mut image::RgbaImage,
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
    col: [u8; 4],
    thickness: i32,
) {
    let (w, h) = canvas.dimensions();
    let (iw, ih) = (w as i32, h as i32);

    // Top & bottom edges
    for t in 0..thickness {
        let ty = y1 + t;
        let by = y2 - t;
        for x in x1..=x2 {
            if x >= 0 && x < iw {
                if ty >= 0 && ty < ih {
                    set_pixel(canvas, x as u32, ty as u32, col);
                }
                if by >= 0 && by < ih {
                    set_pixel(canvas, x as u32, by as u32, col);
                }
            }
        }
    }
    // Left & right edges
    for t in 0..thickness {
        let lx = x1 + t;
        let rx = x2 - t;
        for y in y1..=y2 {
            if y >= 0 && y < ih {
                if lx >= 0 && lx < iw {
                    set_pixel(canvas, lx as u32, y as u32, col);
                }
                if rx >= 0 && rx < iw {
                    set_pixel(canvas, rx as u32, y as u32, col);
                }
            }
        }
    }
}

/// Text on a darkened background strip, anchored at (x, y). Used for the
/// `~N` / `D_N` / `#N: …` markers above each box.
pub fn draw_label(canvas: &mut image::RgbaImage, x: i32, y: i32, text: &str, col: [u8; 4], scale: u32) {
    let (w, h) = canvas.dimensions();
    let char_w = 5 * scale + 1; // glyph width + 1px gap
    let char_h = 5 * scale; // glyph height
    let pad = 2 * scale;
    let label_w = text.len() as u32 * char_w + pad * 2;
    let label_h = char_h + pad * 2;

    let x = x.max(0);
    let y = y.max(0);

    // Dark background
    for dy in 0..label_h {
        for dx in 0..label_w {
            let px = x as u32 + dx;
            let py = y as u32 + dy;
            if px < w && py < h {
                let p = canvas.get_pixel_mut(px, py);
                p[0] = (p[0] as f32 * 0.2) as u8;
                p[1] = (p[1] as f32 * 0.2) as u8;
                p[2] = (p[2] as f32 * 0.2) as u8;
                p[3] = 255;
            }
        }
    }

    let text_x = x as u32 + pad;
    let text_y = y as u32 + pad;
    let step = 5 * scale + 1;

    for (i, c) in text.to_uppercase().chars().enumerate() {
        let gx = text_x + i as u32 * step;
        if gx + 5 * scale >= w {
            break;
        }
        draw_mini_glyph(canvas, c, gx, text_y, col, scale);
    }
}

/// Label font scale for the image width: 2× on high-res screens (> 1600 px
/// wide) so markers stay readable when the image is shown to a VLM.
pub fn label_scale(image_width: u32) -> u32 {
    if image_width > 1600 {
        2
    } else {
        1
    }
}

/// Height in pixels of a label strip at the given scale, for anchoring the
/// strip just above a box.
pub fn label_height(scale: u32) -> i32 {
    (5 * scale + 4) as i32
}

pub fn encode_png(canvas: &image::RgbaImage) -> PinpointResult<Vec<u8>> {
    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(canvas.clone())
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .map_err(|e| PinpointError::Perception(format!("PNG encode: {e}")))?;
    Ok(out)
}

pub fn to_base64(png_bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(png_bytes)
}

// ── Glyph rendering ─────────────────────────────────────────────────────────

/// Minimal 5×5 font renderer. Supports `scale` for multi-pixel rendering on
/// high-DPI screens. Unsupported characters leave a gap.
fn draw_mini_glyph(canvas: &mut image::RgbaImage, c: char, px: u32, py: u32, col: [u8; 4], scale: u32) {
    let glyph = match c {
        '0'..='9' => MINI_FONT[(c as u8 - b'0') as usize],
        'A'..='Z' => MINI_FONT[10 + (c as u8 - b'A') as usize],
        ':' => [0b00000, 0b00100, 0b00000, 0b00100, 0b00000],
        '_' => [0b00000, 0b00000, 0b00000, 0b00000, 0b11111],
        '#' => [0b01010, 0b11111, 0b01010, 0b11111, 0b01010],
        '~' => [0b00000, 0b01000, 0b10101, 0b00010, 0b00000],
        '.' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00100],
        ',' => [0b00000, 0b00000, 0b00000, 0b00100, 0b01000],
        ' ' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000],
        _ => return,
    };
    let (w, h) = canvas.dimensions();
    for (row, &bits) in glyph.iter().enumerate() {
        for bit in 0..5u32 {
            if (bits >> (4 - bit)) & 1 == 0 {
                continue;
            }
            for sy in 0..scale {
                for sx in 0..scale {
                    let x = px + bit * scale + sx;
                    let y = py + row as u32 * scale + sy;
                    if x < w && y < h {
                        set_pixel(canvas, x, y, col);
                    }
                }
            }
        }
    }
}

fn set_pixel(canvas: &mut image::RgbaImage, x: u32, y: u32, col: [u8; 4]) {
    let p = canvas.get_pixel_mut(x, y);
    let a = col[3] as f32 / 255.0;
    p[0] = (p[0] as f32 * (1.0 - a) + col[0] as f32 * a).round() as u8;
    p[1] = (p[1] as f32 * (1.0 - a) + col[1] as f32 * a).round() as u8;
    p[2] = (p[2] as f32 * (1.0 - a) + col[2] as f32 * a).round() as u8;
    p[3] = 255;
}

/// 5×5 bitmap font: digits 0-9, letters A-Z.
const MINI_FONT: [[u8; 5]; 36] = [
    [0b01110, 0b10001, 0b10001, 0b10001, 0b01110], // 0
    [0b00100, 0b01100, 0b00100, 0b00100, 0b01110], // 1
    [0b01110, 0b10001, 0b00110, 0b01000, 0b11111], // 2
    [0b11110, 0b00001, 0b00110, 0b00001, 0b11110], // 3
    [0b00110, 0b01010, 0b10010, 0b11111, 0b00010], // 4
    [0b11111, 0b10000, 0b11110, 0b00001, 0b11110], // 5
    [0b01110, 0b10000, 0b11110, 0b10001, 0b01110], // 6
    [0b11111, 0b00001, 0b00010, 0b00100, 0b00100], // 7
    [0b01110, 0b10001, 0b01110, 0b10001, 0b01110], // 8
    [0b01110, 0b10001, 0b01111, 0b00001, 0b01110], // 9
    [0b01110, 0b10001, 0b11111, 0b10001, 0b10001], // A
    [0b11110, 0b10001, 0b11110, 0b10001, 0b11110], // B
    [0b01110, 0b10000, 0b10000, 0b10000, 0b01110], // C
    [0b11100, 0b10010, 0b10001, 0b10010, 0b11100], // D
    [0b11111, 0b10000, 0b11110, 0b10000, 0b11111], // E
    [0b11111, 0b10000, 0b11110, 0b10000, 0b10000], // F
    [0b01110, 0b10000, 0b10011, 0b10001, 0b01110], // G
    [0b10001, 0b10001, 0b11111, 0b10001, 0b10001], // H
    [0b01110, 0b00100, 0b00100, 0b00100, 0b01110], // I
    [0b00111, 0b00010, 0b00010, 0b10010, 0b01100], // J
    [0b10001, 0b10010, 0b11100, 0b10010, 0b10001], // K
    [0b10000, 0b10000, 0b10000, 0b10000, 0b11111], // L
    [0b10001, 0b11011, 0b10101, 0b10001, 0b10001], // M
    [0b10001, 0b11001, 0b10101, 0b10011, 0b10001], // N
    [0b01110, 0b10001, 0b10001, 0b10001, 0b01110], // O
    [0b11110, 0b10001, 0b11110, 0b10000, 0b10000], // P
    [0b01110, 0b10001, 0b10101, 0b10010, 0b01101], // Q
    [0b11110, 0b10001, 0b11110, 0b10010, 0b10001], // R
    [0b01111, 0b10000, 0b01110, 0b00001, 0b11110], // S
    [0b11111, 0b00100, 0b00100, 0b00100, 0b00100], // T
    [0b10001, 0b10001, 0b10001, 0b10001, 0b01110], // U
    [0b10001, 0b10001, 0b10001, 0b01010, 0b00100], // V
    [0b10001, 0b10001, 0b10101, 0b11011, 0b10001], // W
    [0b10001, 0b01010, 0b00100, 0b01010, 0b10001], // X
    [0b10001, 0b01010, 0b00100, 0b00100, 0b00100], // Y
    [0b11111, 0b00010, 0b00100, 0b01000, 0b11111], // Z
];
