//! SCRFD Face Detector
//!
//! InsightFace SCRFD model; outputs bounding boxes and 5-point landmarks in
//! the coordinates of the image passed in.

use std::sync::Arc;

use anyhow::Result;
use image::{DynamicImage, GenericImageView};
use openvino::{ElementType, InferRequest, Shape, Tensor};
use tracing::{debug, warn};

use super::pool::{ModelPool, ModelType};
use super::preprocess::{preprocess_for_detection, ResizeInfo};

const NMS_THRESHOLD: f32 = 0.4;

/// Face detection result
#[derive(Debug, Clone, PartialEq)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub landmarks: [(f32, f32); 5],
}

impl FaceBox {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Intersection over union
    pub fn iou(&self, other: &FaceBox) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let intersection = w * h;
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// SCRFD Face Detector
pub struct FaceDetector {
    pool: Arc<ModelPool>,
    confidence_threshold: f32,
    input_size: u32,
}

impl FaceDetector {
    pub fn new(pool: Arc<ModelPool>, confidence_threshold: f32, input_size: u32) -> Self {
        Self {
            pool,
            confidence_threshold,
            input_size,
        }
    }

    /// Detect faces, highest confidence first
    pub fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceBox>> {
        let resize_info = ResizeInfo::new(image.dimensions(), (self.input_size, self.input_size));
        let input_tensor = preprocess_for_detection(image, self.input_size);

        let model = self.pool.get_model(ModelType::Detector)?;
        let mut request = model.create_infer_request()?;

        let side = self.input_size as i64;
        let input_shape = Shape::new(&[1, 3, side, side])?;
        let mut input = Tensor::new(ElementType::F32, &input_shape)?;

        let input_data = input_tensor
            .as_slice()
            .ok_or_else(|| anyhow::anyhow!("detector input tensor is not contiguous"))?;
        unsafe {
            let tensor_data = input.get_raw_data_mut()?.as_mut_ptr() as *mut f32;
            std::ptr::copy_nonoverlapping(input_data.as_ptr(), tensor_data, input_data.len());
        }

        request.set_input_tensor(&input)?;
        request.infer()?;

        let detections = self.parse_outputs(&request, &resize_info)?;
        let faces = nms(detections, NMS_THRESHOLD);
        debug!("Detected {} faces after NMS", faces.len());

        Ok(faces)
    }

    /// Decode SCRFD outputs
    ///
    /// The output layout depends on the export: scores, then bbox distances,
    /// then (optionally) keypoint offsets, one tensor per stride.
    fn parse_outputs(&self, request: &InferRequest, resize_info: &ResizeInfo) -> Result<Vec<FaceBox>> {
        let output_count = (0..20)
            .take_while(|&i| request.get_output_tensor_by_index(i).is_ok())
            .count();

        let (fmc, use_kps, anchors_per_cell) = match output_count {
            6 => (3, false, 2),
            9 => (3, true, 2),
            10 => (5, false, 1),
            15 => (5, true, 1),
            other => {
                warn!("Unknown SCRFD output count: {}, assuming 3 strides with keypoints", other);
                (3, true, 2)
            }
        };
        let strides: &[usize] = if fmc == 3 { &[8, 16, 32] } else { &[8, 16, 32, 64, 128] };

        let mut boxes = Vec::new();
        let (max_x, max_y) = (
            resize_info.original_width as f32,
            resize_info.original_height as f32,
        );

        for (idx, &stride) in strides.iter().enumerate() {
            let scores = read_tensor_f32(&request.get_output_tensor_by_index(idx)?)?;
            let bboxes = read_tensor_f32(&request.get_output_tensor_by_index(idx + fmc)?)?;
            let kps = if use_kps {
                Some(read_tensor_f32(&request.get_output_tensor_by_index(idx + fmc * 2)?)?)
            } else {
                None
            };

            let feat = self.input_size as usize / stride;
            let s = stride as f32;

            for cell in 0..feat * feat {
                let cx = (cell % feat) as f32 * s;
                let cy = (cell / feat) as f32 * s;

                for a in 0..anchors_per_cell {
                    let i = cell * anchors_per_cell + a;
                    let Some(&score) = scores.get(i) else { continue };
                    if score < self.confidence_threshold {
                        continue;
                    }
                    let Some(d) = bboxes.get(i * 4..i * 4 + 4) else { continue };

                    let (x1, y1) = resize_info.to_original(cx - d[0] * s, cy - d[1] * s);
                    let (x2, y2) = resize_info.to_original(cx + d[2] * s, cy + d[3] * s);

                    let mut landmarks = [(0.0f32, 0.0f32); 5];
                    if let Some(k) = kps.as_ref().and_then(|k| k.get(i * 10..i * 10 + 10)) {
                        for (j, lm) in landmarks.iter_mut().enumerate() {
                            *lm = resize_info.to_original(cx + k[j * 2] * s, cy + k[j * 2 + 1] * s);
                        }
                    }

                    boxes.push(FaceBox {
                        x1: x1.clamp(0.0, max_x),
                        y1: y1.clamp(0.0, max_y),
                        x2: x2.clamp(0.0, max_x),
                        y2: y2.clamp(0.0, max_y),
                        confidence: score,
                        landmarks,
                    });
                }
            }
        }

        debug!("{} candidate faces before NMS", boxes.len());
        Ok(boxes)
    }
}

fn read_tensor_f32(tensor: &Tensor) -> Result<Vec<f32>> {
    let len = tensor.get_shape()?.get_dimensions().iter().product::<i64>() as usize;
    let data = unsafe {
        let ptr = tensor.get_raw_data()?.as_ptr() as *const f32;
        std::slice::from_raw_parts(ptr, len).to_vec()
    };
    Ok(data)
}

/// Greedy non-maximum suppression, highest confidence first
pub fn nms(mut boxes: Vec<FaceBox>, threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if keep.iter().all(|kept| kept.iou(&candidate) <= threshold) {
            keep.push(candidate);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> FaceBox {
        FaceBox {
            x1,
            y1,
            x2,
            y2,
            confidence,
            landmarks: [(0.0, 0.0); 5],
        }
    }

    #[test]
    fn test_iou_calculation() {
        let a = face(0.0, 0.0, 10.0, 10.0, 0.9);
        let b = face(5.0, 5.0, 15.0, 15.0, 0.8);

        // Intersection 25, union 175
        assert!((a.iou(&b) - 25.0 / 175.0).abs() < 1e-6);
        assert_eq!(a.iou(&face(20.0, 20.0, 30.0, 30.0, 0.5)), 0.0);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let boxes = vec![
            face(0.0, 0.0, 10.0, 10.0, 0.7),
            face(1.0, 1.0, 11.0, 11.0, 0.95),
            face(50.0, 50.0, 60.0, 60.0, 0.8),
        ];
        let kept = nms(boxes, NMS_THRESHOLD);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.95);
        assert_eq!(kept[1].confidence, 0.8);
    }
}
