use crate::error::{CascadeError, Result};

/// Receptive field of the proposal network, in pixels.
pub const ANCHOR_SIZE: f32 = 12.0;

/// Compute the descending pyramid scales for an image whose shorter side is `min_dimension`.
///
/// The first scale maps `min_face_size` onto the anchor; each following scale
/// shrinks by `factor` until the shorter side would fall below the anchor.
pub fn build_scales(min_face_size: f32, factor: f32, min_dimension: u32) -> Result<Vec<f32>> {
    if !(min_face_size > 0.0) {
        return Err(CascadeError::InvalidParams(format!(
            "min_face_size must be positive, got {}",
            min_face_size
        )));
    }
    if !(factor > 0.0 && factor < 1.0) {
        return Err(CascadeError::InvalidParams(format!(
            "pyramid factor must be in (0, 1), got {}",
            factor
        )));
    }

    let min_dimension = min_dimension as f32;
    let mut scales = Vec::new();
    let mut scale = ANCHOR_SIZE / min_face_size;
    while min_dimension * scale >= ANCHOR_SIZE {
        scales.push(scale);
        scale *= factor;
    }

    Ok(scales)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_scales_sequence() {
        let scales = build_scales(12.0, 0.5, 48).unwrap();
        assert_eq!(scales, vec![1.0, 0.5, 0.25]);
    }

    #[test]
    fn test_scales_never_shrink_below_anchor() {
        for &(min_face, factor, dim) in &[(40.0, 0.709, 480u32), (20.0, 0.8, 1080), (12.0, 0.3, 100)] {
            let scales = build_scales(min_face, factor, dim).unwrap();
            assert!(!scales.is_empty());
            for pair in scales.windows(2) {
                assert!(pair[1] < pair[0]);
            }
            for &s in &scales {
                assert!(dim as f32 * s >= ANCHOR_SIZE);
            }
            let next = scales[scales.len() - 1] * factor;
            assert!((dim as f32) * next < ANCHOR_SIZE);
        }
    }

    #[test]
    fn test_image_smaller_than_min_face() {
        let scales = build_scales(40.0, 0.709, 30).unwrap();
        assert!(scales.is_empty());
    }

    #[test]
    fn test_rejects_invalid_params() {
        assert!(build_scales(0.0, 0.7, 100).is_err());
        assert!(build_scales(40.0, 1.0, 100).is_err());
        assert!(build_scales(40.0, 0.0, 100).is_err());
        assert!(build_scales(f32::NAN, 0.7, 100).is_err());
    }
}
