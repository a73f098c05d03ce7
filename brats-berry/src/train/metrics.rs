//! 二分类指标.

/// 一组二分类预测的指标. 正类为 1.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BinaryMetrics {
    /// 准确率.
    pub accuracy: f64,

    /// 精确率. 没有正类预测时为 0.
    pub precision: f64,

    /// 召回率. 没有正类样本时为 0.
    pub recall: f64,

    /// F1 分数.
    pub f1: f64,

    /// ROC AUC. 只有一个类别时无定义.
    pub roc_auc: Option<f64>,
}

impl BinaryMetrics {
    /// 由真实标签和硬预测 (0/1) 计算.
    ///
    /// # 注意
    ///
    /// 两者长度不同时程序 panic.
    pub fn compute(labels: &[u8], preds: &[u8]) -> Self {
        assert_eq!(labels.len(), preds.len(), "labels and predictions differ in length");
        let (mut tp, mut fp, mut tn, mut fn_) = (0usize, 0usize, 0usize, 0usize);
        for (&y, &p) in labels.iter().zip(preds) {
            match (y != 0, p != 0) {
                (true, true) => tp += 1,
                (false, true) => fp += 1,
                (false, false) => tn += 1,
                (true, false) => fn_ += 1,
            }
        }
        let accuracy = ratio(tp + tn, labels.len());
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = ratio(2 * tp, 2 * tp + fp + fn_);
        let scores: Vec<f32> = preds.iter().map(|&p| f32::from(p)).collect();
        Self {
            accuracy,
            precision,
            recall,
            f1,
            roc_auc: roc_auc(labels, &scores),
        }
    }
}

#[inline]
fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// ROC 曲线下面积, 即随机取一正一负样本时正样本得分更高的概率 (相等记 1/2).
///
/// 只有一个类别时返回 `None`.
pub fn roc_auc(labels: &[u8], scores: &[f32]) -> Option<f64> {
    assert_eq!(labels.len(), scores.len(), "labels and scores differ in length");
    let mut pairs: Vec<(f32, bool)> = scores
        .iter()
        .zip(labels)
        .map(|(&s, &y)| (s, y != 0))
        .collect();
    let n_pos = pairs.iter().filter(|(_, y)| *y).count();
    let n_neg = pairs.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    // 平均秩, 相等得分共享秩.
    let mut rank_sum = 0.0f64;
    let mut i = 0;
    while i < pairs.len() {
        let mut j = i;
        while j < pairs.len() && pairs[j].0 == pairs[i].0 {
            j += 1;
        }
        let avg_rank = (i + 1 + j) as f64 / 2.0;
        let pos_in_group = pairs[i..j].iter().filter(|(_, y)| *y).count();
        rank_sum += avg_rank * pos_in_group as f64;
        i = j;
    }
    let u = rank_sum - (n_pos * (n_pos + 1)) as f64 / 2.0;
    Some(u / (n_pos * n_neg) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_confusion_based() {
        let labels = [1, 1, 1, 0, 0, 0, 0, 1];
        let preds = [1, 0, 1, 0, 1, 0, 0, 1];
        let m = BinaryMetrics::compute(&labels, &preds);
        // tp = 3, fp = 1, tn = 3, fn = 1
        assert!(close(m.accuracy, 0.75));
        assert!(close(m.precision, 0.75));
        assert!(close(m.recall, 0.75));
        assert!(close(m.f1, 0.75));
        assert!(close(m.roc_auc.unwrap(), 0.75));
    }

    #[test]
    fn test_no_positive_prediction() {
        let m = BinaryMetrics::compute(&[1, 0, 0], &[0, 0, 0]);
        assert_eq!(m.precision, 0.0);
        assert_eq!(m.recall, 0.0);
        assert_eq!(m.f1, 0.0);
        assert!(close(m.roc_auc.unwrap(), 0.5));
    }

    #[test]
    fn test_single_class_auc_undefined() {
        let m = BinaryMetrics::compute(&[1, 1], &[1, 0]);
        assert_eq!(m.roc_auc, None);
        assert!(close(m.accuracy, 0.5));
    }

    #[test]
    fn test_auc_with_scores() {
        let labels = [0, 0, 1, 1];
        let scores = [0.1, 0.4, 0.35, 0.8];
        assert!(close(roc_auc(&labels, &scores).unwrap(), 0.75));
        assert!(close(roc_auc(&labels, &[0.0, 0.1, 0.2, 0.3]).unwrap(), 1.0));
    }
}
