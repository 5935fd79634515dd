//! Wall-clock estimates returned with every 202 envelope and reused by
//! the reconciler for progress percentages.

use crate::models::TaskKind;

/// Reference point: one image at the default 1024x1024 resolution.
const BASE_PIXELS: f64 = 1024.0 * 1024.0;
const BASE_SECONDS: f64 = 3.0;
/// One-time cost of the first job loading the pipeline onto the GPU.
const MODEL_LOAD_PENALTY: f64 = 5.0;
const EXTRA_IMAGE_SECONDS: f64 = 2.0;

/// Text-to-image estimate: resolution-scaled base, the model-load penalty
/// until the pipeline has been observed warm, and a flat cost per extra
/// image.
pub fn generation_estimate(
    width: i32,
    height: i32,
    num_images: i32,
    pipeline_observed: bool,
) -> f64 {
    let scale = f64::from(width) * f64::from(height) / BASE_PIXELS;
    let mut seconds = BASE_SECONDS * scale;
    if !pipeline_observed {
        seconds += MODEL_LOAD_PENALTY;
    }
    seconds + f64::from((num_images - 1).max(0)) * EXTRA_IMAGE_SECONDS
}

/// Flat estimates for the editing kinds.
pub fn kind_estimate(kind: TaskKind) -> f64 {
    match kind {
        TaskKind::GenerateImage => BASE_SECONDS + MODEL_LOAD_PENALTY,
        TaskKind::InpaintImage => 15.0,
        TaskKind::SegmentPoint | TaskKind::SegmentBox => 5.0,
        TaskKind::SegmentAuto => 10.0,
        TaskKind::RemoveBackground
        | TaskKind::ReplaceBackgroundColor
        | TaskKind::GetBackgroundMask => 5.0,
        TaskKind::ReplaceBackground => 8.0,
        TaskKind::ApplyStyle => 10.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_resolution_first_job() {
        // 1024x1024, one image, pipeline cold: 3s base + 5s load.
        let estimate = generation_estimate(1024, 1024, 1, false);
        assert!((estimate - 8.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_warm_pipeline_drops_load_penalty() {
        let estimate = generation_estimate(1024, 1024, 1, true);
        assert!((estimate - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_extra_images_add_flat_cost() {
        let one = generation_estimate(1024, 1024, 1, true);
        let four = generation_estimate(1024, 1024, 4, true);
        assert!((four - one - 6.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_resolution_scales_linearly() {
        let small = generation_estimate(512, 512, 1, true);
        assert!((small - 0.75).abs() < f64::EPSILON);
        let large = generation_estimate(2048, 2048, 1, true);
        assert!((large - 12.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_kind_estimates() {
        assert_eq!(kind_estimate(TaskKind::InpaintImage), 15.0);
        assert_eq!(kind_estimate(TaskKind::SegmentPoint), 5.0);
        assert_eq!(kind_estimate(TaskKind::SegmentAuto), 10.0);
        assert_eq!(kind_estimate(TaskKind::RemoveBackground), 5.0);
        assert_eq!(kind_estimate(TaskKind::ReplaceBackground), 8.0);
        assert_eq!(kind_estimate(TaskKind::ApplyStyle), 10.0);
    }
}
