use crate::common::{Detection, DetectionSet};

/// Keeps detections with `confidence >= threshold`, in their original order.
///
/// NaN confidences never pass.
pub fn filter_by_confidence(detections: &[Detection], threshold: f32) -> DetectionSet {
    detections
        .iter()
        .filter(|d| d.confidence >= threshold)
        .cloned()
        .collect()
}

/// Checks that `threshold` is a usable confidence cut-off.
pub fn valid_threshold(threshold: f32) -> bool {
    threshold.is_finite() && (0.0..=1.0).contains(&threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::BBox;

    fn set(confs: &[f32]) -> DetectionSet {
        confs
            .iter()
            .enumerate()
            .map(|(i, &c)| Detection::new(i, "obj", c, BBox::new(0., 0., 1., 1.)))
            .collect()
    }

    #[test]
    fn boundary_is_inclusive() {
        let dets = set(&[0.49, 0.5, 0.51]);
        let kept = filter_by_confidence(&dets, 0.5);
        assert_eq!(kept.iter().map(|d| d.class_id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn order_is_preserved() {
        let dets = set(&[0.9, 0.1, 0.7, 0.8]);
        let kept = filter_by_confidence(&dets, 0.5);
        assert_eq!(kept.iter().map(|d| d.class_id).collect::<Vec<_>>(), vec![0, 2, 3]);
    }

    #[test]
    fn higher_threshold_yields_subset() {
        let dets = set(&[0.05, 0.3, 0.3, 0.6, 0.95, 1.0, f32::NAN]);
        let cuts = [0.0, 0.05, 0.3, 0.31, 0.6, 0.99, 1.0];
        for (i, &t1) in cuts.iter().enumerate() {
            for &t2 in &cuts[i..] {
                let lo = filter_by_confidence(&dets, t1);
                let hi = filter_by_confidence(&dets, t2);
                assert!(hi.iter().all(|d| lo.contains(d)), "t1={t1} t2={t2}");
            }
        }
    }

    #[test]
    fn extreme_thresholds_are_not_errors() {
        let dets = set(&[0.0, 0.2, 0.999]);
        assert_eq!(filter_by_confidence(&dets, 0.0).len(), 3);
        assert!(filter_by_confidence(&dets, 1.0).is_empty());
        assert!(filter_by_confidence(&[], 0.5).is_empty());
    }

    #[test]
    fn nan_confidence_is_dropped() {
        let dets = set(&[f32::NAN]);
        assert!(filter_by_confidence(&dets, 0.0).is_empty());
    }

    #[test]
    fn threshold_range() {
        assert!(valid_threshold(0.0));
        assert!(valid_threshold(1.0));
        assert!(!valid_threshold(-0.1));
        assert!(!valid_threshold(1.5));
        assert!(!valid_threshold(f32::NAN));
    }
}
