//! Evaluation metrics: ROC AUC and log-loss.

use serde::{Deserialize, Serialize};

/// Area under the ROC curve via the rank-statistic (Mann-Whitney) form.
///
/// Ties in the scores receive averaged ranks. Returns `None` when the labels
/// contain only one class, where AUC is undefined.
pub fn roc_auc(labels: &[f32], scores: &[f32]) -> Option<f64> {
    assert_eq!(
        labels.len(),
        scores.len(),
        "labels and scores must have equal length"
    );
    let n = labels.len();
    let positives = labels.iter().filter(|&&y| y > 0.5).count();
    let negatives = n - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        scores[a]
            .partial_cmp(&scores[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // Average ranks across tied scores, then sum the positive ranks.
    let mut rank_sum_pos = 0.0f64;
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if labels[idx] > 0.5 {
                rank_sum_pos += avg_rank;
            }
        }
        i = j + 1;
    }

    let p = positives as f64;
    let q = negatives as f64;
    Some((rank_sum_pos - p * (p + 1.0) / 2.0) / (p * q))
}

/// Mean binary log-loss with predictions clamped away from 0 and 1.
pub fn log_loss(labels: &[f32], scores: &[f32]) -> f32 {
    assert_eq!(
        labels.len(),
        scores.len(),
        "labels and scores must have equal length"
    );
    if labels.is_empty() {
        return 0.0;
    }
    let mut total = 0.0;
    for (&y, &p) in labels.iter().zip(scores) {
        let p = p.clamp(1e-7, 1.0 - 1e-7);
        total += -y * p.ln() - (1.0 - y) * (1.0 - p).ln();
    }
    total / labels.len() as f32
}

/// One periodic-evaluation report emitted by the training loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalReport {
    /// Global step at report time.
    pub step: u64,
    /// Validation AUC, when both classes were present.
    pub auc: Option<f64>,
    /// Training loss of the most recent batch.
    pub loss: f32,
    /// Seconds since the previous report.
    pub elapsed_secs: f64,
}
