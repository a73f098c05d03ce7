//! 训练日志文件.
//!
//! 每个阶段 (训练/验证) 各有两个只追加的文本文件:
//! `{Train|Validation}_loss.txt` 和 `{Train|Validation}_metrics.txt`.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use super::metrics::BinaryMetrics;

/// 训练阶段.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Split {
    /// 训练集.
    Train,

    /// 验证集.
    Validation,
}

impl Split {
    /// 文件名和日志行中使用的名字.
    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            Split::Train => "Train",
            Split::Validation => "Validation",
        }
    }
}

/// 损失日志的一行.
pub fn loss_line(split: Split, epoch: usize, loss: f64) -> String {
    format!("Epoch: {epoch} \t{} Loss: {loss:.6}\n", split.name())
}

/// 指标日志的一个块.
pub fn metrics_block(split: Split, epoch: usize, loss: f64, m: &BinaryMetrics) -> String {
    let name = split.name();
    let auc = m.roc_auc.unwrap_or(f64::NAN);
    let mut s = format!("Epoch: {epoch:<5}\n");
    s.push_str(&format!("{name:<10} Average Loss:  {loss:.4}\n"));
    s.push_str(&format!("{name:<10} Accuracy:      {:.4}\n", m.accuracy));
    s.push_str(&format!("{name:<10} Precision:     {:.4}\n", m.precision));
    s.push_str(&format!("{name:<10} Recall:        {:.4}\n", m.recall));
    s.push_str(&format!("{name:<10} F1 Score:      {:.4}\n", m.f1));
    s.push_str(&format!("{name:<10} ROC AUC Score: {auc:.4}\n"));
    s
}

fn append(path: &Path, text: &str) -> io::Result<()> {
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    f.write_all(text.as_bytes())
}

/// 向 `dir/{split}_loss.txt` 追加一行.
pub fn log_loss(dir: &Path, split: Split, epoch: usize, loss: f64) -> io::Result<()> {
    append(
        &dir.join(format!("{}_loss.txt", split.name())),
        &loss_line(split, epoch, loss),
    )
}

/// 向 `dir/{split}_metrics.txt` 追加一个块.
pub fn log_metrics(
    dir: &Path,
    split: Split,
    epoch: usize,
    loss: f64,
    m: &BinaryMetrics,
) -> io::Result<()> {
    append(
        &dir.join(format!("{}_metrics.txt", split.name())),
        &metrics_block(split, epoch, loss, m),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loss_line() {
        assert_eq!(
            loss_line(Split::Train, 3, 0.25),
            "Epoch: 3 \tTrain Loss: 0.250000\n"
        );
    }

    #[test]
    fn test_metrics_block() {
        let m = BinaryMetrics {
            accuracy: 0.5,
            precision: 1.0,
            recall: 0.25,
            f1: 0.4,
            roc_auc: None,
        };
        let block = metrics_block(Split::Validation, 12, 0.69314, &m);
        let lines: Vec<&str> = block.lines().collect();
        assert_eq!(lines[0], "Epoch: 12   ");
        assert_eq!(lines[1], "Validation Average Loss:  0.6931");
        assert_eq!(lines[2], "Validation Accuracy:      0.5000");
        assert_eq!(lines[4], "Validation Recall:        0.2500");
        assert_eq!(lines[6], "Validation ROC AUC Score: NaN");
        assert_eq!(lines.len(), 7);
    }

    #[test]
    fn test_logs_append() {
        let dir = tempfile::tempdir().unwrap();
        log_loss(dir.path(), Split::Validation, 1, 1.0).unwrap();
        log_loss(dir.path(), Split::Validation, 2, 0.5).unwrap();
        let text = std::fs::read_to_string(dir.path().join("Validation_loss.txt")).unwrap();
        assert_eq!(
            text,
            "Epoch: 1 \tValidation Loss: 1.000000\nEpoch: 2 \tValidation Loss: 0.500000\n"
        );
    }
}
