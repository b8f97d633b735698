//! Face alignment via a 4-DOF similarity transform.
//!
//! Maps the five detected landmarks onto the InsightFace reference template
//! with a least-squares similarity estimate, then warps the face into a
//! square crop ready for encoding.

use image::RgbImage;

/// Reference landmark template for a 112×112 crop; scaled linearly for
/// other output sizes.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// Estimate a 2×3 similarity transform (scale, rotation, translation) from
/// `src` to `dst` landmarks by least squares.
///
/// Returns `[a, -b, tx, b, a, ty]` for the matrix
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
fn estimate_similarity(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 6] {
    // Normal equations for the overdetermined system: each landmark pair
    // contributes rows [sx, -sy, 1, 0] -> dx and [sy, sx, 0, 1] -> dy over
    // the unknowns [a, b, tx, ty].
    let mut ata = [[0.0f32; 4]; 4];
    let mut atb = [0.0f32; 4];

    for i in 0..5 {
        let (sx, sy) = src[i];
        let (dx, dy) = dst[i];
        let rows = [([sx, -sy, 1.0, 0.0], dx), ([sy, sx, 0.0, 1.0], dy)];
        for (row, rhs) in rows {
            for j in 0..4 {
                for k in 0..4 {
                    ata[j][k] += row[j] * row[k];
                }
                atb[j] += row[j] * rhs;
            }
        }
    }

    let x = solve_4x4(ata, atb);
    [x[0], -x[1], x[2], x[1], x[0], x[3]]
}

/// Gaussian elimination with partial pivoting for the 4×4 normal equations.
fn solve_4x4(ata: [[f32; 4]; 4], atb: [f32; 4]) -> [f32; 4] {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        m[i][..4].copy_from_slice(&ata[i]);
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let pivot_row = (col..4)
            .max_by(|&a, &b| {
                m[a][col]
                    .abs()
                    .partial_cmp(&m[b][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        m.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            // Degenerate landmark geometry; identity keeps the crop usable.
            return [1.0, 0.0, 0.0, 0.0];
        }
        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }
    x
}

/// Inverse-map each output pixel through the similarity transform and
/// bilinearly sample the source. Out-of-bounds samples are black.
fn warp_similarity(frame: &RgbImage, matrix: &[f32; 6], out_size: u32) -> RgbImage {
    let (a, tx, b, ty) = (matrix[0], matrix[2], matrix[3], matrix[5]);
    let width = frame.width() as i32;
    let height = frame.height() as i32;

    // Invert the rotation/scale part: M = [[a, -b], [b, a]], det = a² + b².
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return RgbImage::new(out_size, out_size);
    }
    let ia = a / det;
    let ib = b / det;

    let src = frame.as_raw();
    let sample = |x: i32, y: i32, c: usize| -> f32 {
        if x >= 0 && x < width && y >= 0 && y < height {
            src[(y as usize * width as usize + x as usize) * 3 + c] as f32
        } else {
            0.0
        }
    };

    let mut out = RgbImage::new(out_size, out_size);
    for oy in 0..out_size {
        for ox in 0..out_size {
            let dx = ox as f32 - tx;
            let dy = oy as f32 - ty;
            let sx = ia * dx + ib * dy;
            let sy = -ib * dx + ia * dy;

            let x0 = sx.floor() as i32;
            let y0 = sy.floor() as i32;
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            let mut pixel = [0u8; 3];
            for (c, out_c) in pixel.iter_mut().enumerate() {
                let val = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                    + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
                    + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
                    + sample(x0 + 1, y0 + 1, c) * fx * fy;
                *out_c = val.round().clamp(0.0, 255.0) as u8;
            }
            out.put_pixel(ox, oy, image::Rgb(pixel));
        }
    }
    out
}

/// Align a detected face to a canonical `out_size` × `out_size` crop using
/// its five landmarks.
pub fn align_face(frame: &RgbImage, landmarks: &[(f32, f32); 5], out_size: u32) -> RgbImage {
    let scale = out_size as f32 / 112.0;
    let reference = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * scale, y * scale));
    let matrix = estimate_similarity(landmarks, &reference);
    warp_similarity(frame, &matrix, out_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_when_landmarks_match_reference() {
        let pts = REFERENCE_LANDMARKS_112;
        let m = estimate_similarity(&pts, &pts);
        assert!((m[0] - 1.0).abs() < 1e-4, "a = {}", m[0]);
        assert!(m[1].abs() < 1e-4, "-b = {}", m[1]);
        assert!(m[2].abs() < 1e-3, "tx = {}", m[2]);
        assert!(m[3].abs() < 1e-4, "b = {}", m[3]);
        assert!((m[4] - 1.0).abs() < 1e-4, "a2 = {}", m[4]);
        assert!(m[5].abs() < 1e-3, "ty = {}", m[5]);
    }

    #[test]
    fn test_double_scale_landmarks_halve() {
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let m = estimate_similarity(&src, &REFERENCE_LANDMARKS_112);
        assert!((m[0] - 0.5).abs() < 0.05, "a = {}, expected ~0.5", m[0]);
    }

    #[test]
    fn test_align_face_output_size_tracks_encoder_input() {
        let frame = RgbImage::from_pixel(640, 480, image::Rgb([128, 128, 128]));
        for size in [112u32, 160] {
            let aligned = align_face(&frame, &REFERENCE_LANDMARKS_112, size);
            assert_eq!(aligned.dimensions(), (size, size));
        }
    }

    #[test]
    fn test_bright_patch_lands_on_reference_position() {
        let mut frame = RgbImage::new(200, 200);
        let src: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];

        // 5×5 bright patch at the left-eye landmark survives interpolation.
        let (lx, ly) = (src[0].0 as i32, src[0].1 as i32);
        for dy in -2..=2 {
            for dx in -2..=2 {
                frame.put_pixel(
                    (lx + dx) as u32,
                    (ly + dy) as u32,
                    image::Rgb([255, 255, 255]),
                );
            }
        }

        let aligned = align_face(&frame, &src, 112);
        let (rx, ry) = (
            REFERENCE_LANDMARKS_112[0].0.round() as u32,
            REFERENCE_LANDMARKS_112[0].1.round() as u32,
        );

        let mut max_val = 0u8;
        for dy in 0..3 {
            for dx in 0..3 {
                let p = aligned.get_pixel(rx - 1 + dx, ry - 1 + dy);
                max_val = max_val.max(p[0]);
            }
        }
        assert!(max_val > 100, "expected bright patch near ({rx}, {ry}), max={max_val}");
    }
}
