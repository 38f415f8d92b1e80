use shared::ClassPrediction;

/// Numerically stable softmax over the full class set.
pub fn softmax(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|&s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Returns the `k` most probable classes, most probable first.
///
/// Equal probabilities keep class index order. `k` larger than the class
/// count is clamped.
pub fn rank(scores: &[f32], labels: &[String], k: usize) -> Vec<ClassPrediction> {
    let probabilities = softmax(scores);

    let mut order: Vec<usize> = (0..probabilities.len()).collect();
    // sort_by is stable, so ties stay in ascending index order
    order.sort_by(|&a, &b| probabilities[b].total_cmp(&probabilities[a]));

    order
        .into_iter()
        .take(k.min(probabilities.len()))
        .map(|i| ClassPrediction {
            class: labels
                .get(i)
                .cloned()
                .unwrap_or_else(|| format!("Class {}", i)),
            confidence: probabilities[i],
        })
        .collect()
}
