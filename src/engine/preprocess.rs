//! Tensor preparation for the SCRFD detector and ArcFace embedder

use image::{DynamicImage, GenericImageView, ImageBuffer, Rgb, RgbImage};
use ndarray::Array4;

/// Input size for the ArcFace embedder
pub const EMBEDDER_INPUT_SIZE: u32 = 112;

/// InsightFace reference landmarks on a 112x112 aligned crop:
/// left eye, right eye, nose, left mouth corner, right mouth corner
const ARCFACE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// Letterbox the image into a square `input_size` canvas and build the NCHW tensor
pub fn preprocess_for_detection(image: &DynamicImage, input_size: u32) -> Array4<f32> {
    let info = ResizeInfo::new(image.dimensions(), (input_size, input_size));
    let new_w = ((image.width() as f32 * info.scale) as u32).max(1);
    let new_h = ((image.height() as f32 * info.scale) as u32).max(1);

    let resized = image
        .resize_exact(new_w, new_h, image::imageops::FilterType::Triangle)
        .to_rgb8();

    let mut canvas: RgbImage = ImageBuffer::from_pixel(input_size, input_size, Rgb([0, 0, 0]));
    image::imageops::replace(&mut canvas, &resized, info.offset_x as i64, info.offset_y as i64);

    image_to_nchw(&canvas)
}

/// Resize an aligned face crop to the embedder input and build the NCHW tensor
pub fn preprocess_for_embedding(face: &DynamicImage) -> Array4<f32> {
    let rgb = if face.dimensions() == (EMBEDDER_INPUT_SIZE, EMBEDDER_INPUT_SIZE) {
        face.to_rgb8()
    } else {
        face.resize_exact(
            EMBEDDER_INPUT_SIZE,
            EMBEDDER_INPUT_SIZE,
            image::imageops::FilterType::Lanczos3,
        )
        .to_rgb8()
    };
    image_to_nchw(&rgb)
}

/// NCHW tensor in BGR channel order, scaled to roughly [-1, 1]
/// InsightFace models are trained on OpenCV BGR input
fn image_to_nchw(rgb: &RgbImage) -> Array4<f32> {
    let (width, height) = rgb.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = (pixel[2] as f32 - 127.5) / 128.0;
        tensor[[0, 1, y, x]] = (pixel[1] as f32 - 127.5) / 128.0;
        tensor[[0, 2, y, x]] = (pixel[0] as f32 - 127.5) / 128.0;
    }

    tensor
}

/// Warp the face so its landmarks land on the ArcFace reference points
pub fn align_face(image: &DynamicImage, landmarks: &[(f32, f32); 5]) -> DynamicImage {
    let transform = similarity_transform(landmarks, &ARCFACE_LANDMARKS);
    warp_affine(&image.to_rgb8(), &transform, EMBEDDER_INPUT_SIZE, EMBEDDER_INPUT_SIZE)
}

/// Least-squares similarity transform (rotation, uniform scale, translation)
/// mapping `src` onto `dst`, as a 2x3 matrix
fn similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [[f32; 3]; 2] {
    let n = src.len() as f32;
    let centroid = |pts: &[(f32, f32); 5]| {
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
        (sx / n, sy / n)
    };
    let (scx, scy) = centroid(src);
    let (dcx, dcy) = centroid(dst);

    let (mut dot, mut cross, mut var) = (0.0f32, 0.0f32, 0.0f32);
    for (s, d) in src.iter().zip(dst.iter()) {
        let (sx, sy) = (s.0 - scx, s.1 - scy);
        let (dx, dy) = (d.0 - dcx, d.1 - dcy);
        dot += sx * dx + sy * dy;
        cross += sx * dy - sy * dx;
        var += sx * sx + sy * sy;
    }

    // degenerate landmarks: fall back to a pure translation
    let (a, b) = if var > 1e-10 { (dot / var, cross / var) } else { (1.0, 0.0) };

    [
        [a, -b, dcx - (a * scx - b * scy)],
        [b, a, dcy - (b * scx + a * scy)],
    ]
}

/// Backward-mapped bilinear warp; pixels mapping outside the source stay black
fn warp_affine(src: &RgbImage, m: &[[f32; 3]; 2], out_w: u32, out_h: u32) -> DynamicImage {
    let mut out: RgbImage = ImageBuffer::from_pixel(out_w, out_h, Rgb([0, 0, 0]));

    let det = m[0][0] * m[1][1] - m[0][1] * m[1][0];
    if det.abs() < f32::EPSILON || src.width() < 2 || src.height() < 2 {
        return DynamicImage::ImageRgb8(out);
    }
    let inv = [
        [m[1][1] / det, -m[0][1] / det],
        [-m[1][0] / det, m[0][0] / det],
    ];
    let (max_x, max_y) = ((src.width() - 1) as f32, (src.height() - 1) as f32);

    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let dx = x as f32 - m[0][2];
        let dy = y as f32 - m[1][2];
        let sx = inv[0][0] * dx + inv[0][1] * dy;
        let sy = inv[1][0] * dx + inv[1][1] * dy;

        if !(0.0..max_x).contains(&sx) || !(0.0..max_y).contains(&sy) {
            continue;
        }

        let (x0, y0) = (sx as u32, sy as u32);
        let (fx, fy) = (sx - x0 as f32, sy - y0 as f32);
        let p00 = src.get_pixel(x0, y0);
        let p10 = src.get_pixel(x0 + 1, y0);
        let p01 = src.get_pixel(x0, y0 + 1);
        let p11 = src.get_pixel(x0 + 1, y0 + 1);

        for c in 0..3 {
            let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
            let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
            pixel[c] = (top * (1.0 - fy) + bottom * fy).clamp(0.0, 255.0) as u8;
        }
    }

    DynamicImage::ImageRgb8(out)
}

/// Letterbox geometry used to map detections back to the source image
#[derive(Debug, Clone)]
pub struct ResizeInfo {
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub original_width: u32,
    pub original_height: u32,
}

impl ResizeInfo {
    pub fn new(original: (u32, u32), target: (u32, u32)) -> Self {
        let (orig_w, orig_h) = original;
        let (target_w, target_h) = target;

        let scale = f32::min(
            target_w as f32 / orig_w.max(1) as f32,
            target_h as f32 / orig_h.max(1) as f32,
        );

        let new_w = ((orig_w as f32 * scale) as u32).clamp(1, target_w);
        let new_h = ((orig_h as f32 * scale) as u32).clamp(1, target_h);

        Self {
            scale,
            offset_x: (target_w - new_w) / 2,
            offset_y: (target_h - new_h) / 2,
            original_width: orig_w,
            original_height: orig_h,
        }
    }

    /// Convert detection coordinates back to original image space
    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.offset_x as f32) / self.scale,
            (y - self.offset_y as f32) / self.scale,
        )
    }
}
