//! Adaptive score threshold for the cross-encoder: recomputed per query from
//! the shape of the score distribution instead of a fixed cutoff.

pub const BASE_THRESHOLD: f32 = 0.2;

/// Pick a cutoff for the given rerank scores. Returns the threshold and the
/// reason label attached to the top surviving result.
pub fn dynamic_threshold(scores: &[f32]) -> (f32, &'static str) {
    if scores.is_empty() {
        return (BASE_THRESHOLD, "no_scores");
    }
    if scores.len() < 2 {
        return (BASE_THRESHOLD, "too_few_scores");
    }

    let max_score = scores.iter().copied().fold(f32::MIN, f32::max);
    let mean_score = scores.iter().sum::<f32>() / scores.len() as f32;
    let std_score = {
        let variance = scores
            .iter()
            .map(|score| (score - mean_score).powi(2))
            .sum::<f32>()
            / scores.len() as f32;
        variance.sqrt()
    };

    let mut sorted = scores.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    let top_gap = sorted[0] - sorted[1];

    // A single result far ahead of the rest: return only the winner.
    if top_gap > 0.3 {
        return (sorted[0] - 0.01, "clear_winner");
    }

    if mean_score > 0.5 {
        return (
            (mean_score - std_score * 0.5).max(BASE_THRESHOLD),
            "high_quality_results",
        );
    }

    if std_score > 0.2 {
        return (mean_score.max(BASE_THRESHOLD), "high_variance");
    }

    if max_score < 0.3 {
        return (max_score * 0.5, "low_quality_all");
    }

    ((mean_score - std_score).max(BASE_THRESHOLD), "adaptive")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_scores_fall_back_to_base() {
        assert_eq!(dynamic_threshold(&[]), (BASE_THRESHOLD, "no_scores"));
    }

    #[test]
    fn single_score_uses_base_threshold() {
        let (threshold, reason) = dynamic_threshold(&[0.9]);
        assert_eq!(threshold, BASE_THRESHOLD);
        assert_eq!(reason, "too_few_scores");
    }

    #[test]
    fn clear_winner_keeps_only_the_top_score() {
        // Gap between 0.9 and 0.55 exceeds 0.3.
        let scores = [0.9, 0.55, 0.54, 0.50, 0.48];
        let (threshold, reason) = dynamic_threshold(&scores);

        assert_eq!(reason, "clear_winner");
        assert!((threshold - 0.89).abs() < 1e-6);
        assert_eq!(scores.iter().filter(|s| **s >= threshold).count(), 1);
    }

    #[test]
    fn high_quality_results_branch() {
        let scores = [0.7, 0.65, 0.6, 0.55];
        let (threshold, reason) = dynamic_threshold(&scores);

        assert_eq!(reason, "high_quality_results");
        let mean = 0.625;
        assert!(threshold <= mean);
        assert!(threshold >= BASE_THRESHOLD);
    }

    #[test]
    fn high_variance_branch_uses_mean() {
        let scores = [0.49, 0.45, 0.02, 0.01];
        let (threshold, reason) = dynamic_threshold(&scores);

        assert_eq!(reason, "high_variance");
        let mean = scores.iter().sum::<f32>() / scores.len() as f32;
        assert!((threshold - mean).abs() < 1e-6);
    }

    #[test]
    fn uniformly_low_scores_halve_the_maximum() {
        let scores = [0.25, 0.24, 0.23, 0.22];
        let (threshold, reason) = dynamic_threshold(&scores);

        assert_eq!(reason, "low_quality_all");
        assert!((threshold - 0.125).abs() < 1e-6);
    }

    #[test]
    fn adaptive_branch_subtracts_std_from_mean() {
        let scores = [0.42, 0.40, 0.38, 0.36];
        let (threshold, reason) = dynamic_threshold(&scores);

        assert_eq!(reason, "adaptive");
        assert!(threshold >= BASE_THRESHOLD);
        assert!(threshold < 0.42);
    }
}
