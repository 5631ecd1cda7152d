//! Five-point face alignment.
//!
//! Fits a similarity transform (scale, rotation, translation) from detected
//! landmarks onto the ArcFace reference template and resamples the face into
//! a 112x112 RGB crop.

use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112x112 crop.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// `dst = [a -b; b a] * src + t`
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    const IDENTITY: Self = Self { a: 1.0, b: 0.0, tx: 0.0, ty: 0.0 };

    /// Closed-form least-squares fit of `src` onto `dst`.
    fn fit(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let mut norm = 0.0f32;
        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (sx - msx, sy - msy);
            let (dx, dy) = (dx - mdx, dy - mdy);
            norm += sx * sx + sy * sy;
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
        }
        if norm < 1e-12 {
            return Self::IDENTITY;
        }

        let a = dot / norm;
        let b = cross / norm;
        Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        }
    }

    fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    fn inverse(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (a, b) = (self.a / det, -self.b / det);
        // -R^-1 * t
        let tx = -(a * self.tx - b * self.ty);
        let ty = -(b * self.tx + a * self.ty);
        Some(Self { a, b, tx, ty })
    }
}

/// Bilinear sample; pixels outside the image read as black.
fn sample(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let (x0, y0) = (x.floor() as i64, y.floor() as i64);
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);

    let texel = |px: i64, py: i64| -> [f32; 3] {
        if px < 0 || py < 0 || px >= w || py >= h {
            return [0.0; 3];
        }
        let p = image.get_pixel(px as u32, py as u32);
        [p[0] as f32, p[1] as f32, p[2] as f32]
    };

    let (tl, tr) = (texel(x0, y0), texel(x0 + 1, y0));
    let (bl, br) = (texel(x0, y0 + 1), texel(x0 + 1, y0 + 1));
    Rgb(std::array::from_fn(|c| {
        let top = tl[c] * (1.0 - fx) + tr[c] * fx;
        let bottom = bl[c] * (1.0 - fx) + br[c] * fx;
        (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
    }))
}

/// Align a detected face to the canonical 112x112 ArcFace crop.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let forward = Similarity::fit(landmarks, &REFERENCE_LANDMARKS_112);
    let Some(backward) = forward.inverse() else {
        return RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
    };

    RgbImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |ox, oy| {
        let (sx, sy) = backward.apply(ox as f32, oy as f32);
        sample(image, sx, sy)
    })
}
