//! 分层 batch 划分.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use thiserror::Error;

/// 无法构造分层划分.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum StratifyError {
    /// batch 大小为 0.
    #[error("batch size must be positive")]
    ZeroBatchSize,

    /// 样本太少, 划分不出至少两个 batch.
    #[error("{n} samples with batch size {batch_size} give fewer than 2 batches")]
    TooFewBatches {
        /// 样本个数.
        n: usize,
        /// batch 大小.
        batch_size: usize,
    },

    /// batch 个数多于任何一个类别的样本数.
    #[error("{n_batches} batches exceed the size of every class (largest has {largest})")]
    ClassTooSmall {
        /// batch 个数.
        n_batches: usize,
        /// 最大类别的样本数.
        largest: usize,
    },
}

/// 按标签分层地把 `0..N` 划分为 `N / batch_size` 个 batch,
/// 使每个 batch 的标签分布接近整体分布.
///
/// 划分方式与 k 折分层交叉验证相同: 每一折的测试集即一个 batch.
/// 每次调用 [`StratifiedBatchSampler::iter`] 时, 若开启了 `shuffle`, 会重新随机划分.
#[derive(Debug)]
pub struct StratifiedBatchSampler {
    /// 每个样本的类别编号, 按首次出现的顺序编码.
    encoded: Vec<usize>,
    n_classes: usize,
    n_batches: usize,
    shuffle: bool,
    rng: StdRng,
}

impl StratifiedBatchSampler {
    /// 由标签 `y` 和 batch 大小创建.
    pub fn new(y: &[u8], batch_size: usize, shuffle: bool, seed: u64) -> Result<Self, StratifyError> {
        if batch_size == 0 {
            return Err(StratifyError::ZeroBatchSize);
        }
        let n_batches = y.len() / batch_size;
        if n_batches < 2 {
            return Err(StratifyError::TooFewBatches {
                n: y.len(),
                batch_size,
            });
        }

        let mut classes: Vec<u8> = Vec::new();
        let encoded: Vec<usize> = y
            .iter()
            .map(|v| match classes.iter().position(|c| c == v) {
                Some(i) => i,
                None => {
                    classes.push(*v);
                    classes.len() - 1
                }
            })
            .collect();
        let n_classes = classes.len();

        let largest = counts(&encoded, n_classes).into_iter().max().unwrap_or(0);
        if n_batches > largest {
            return Err(StratifyError::ClassTooSmall { n_batches, largest });
        }

        Ok(Self {
            encoded,
            n_classes,
            n_batches,
            shuffle,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// batch 个数 (不是样本个数).
    #[inline]
    pub fn len(&self) -> usize {
        self.n_batches
    }

    /// 恒为 `false`, 构造时已保证至少两个 batch.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.n_batches == 0
    }

    /// 为每个样本分配所属 batch.
    fn assign(&mut self) -> Vec<usize> {
        let k = self.n_batches;
        let mut sorted = self.encoded.clone();
        sorted.sort_unstable();

        // allocation[i][c]: 第 i 个 batch 分到的 c 类样本数.
        let allocation: Vec<Vec<usize>> = (0..k)
            .map(|i| {
                let strided: Vec<usize> = sorted.iter().skip(i).step_by(k).copied().collect();
                counts(&strided, self.n_classes)
            })
            .collect();

        let mut assigned = vec![0usize; self.encoded.len()];
        for c in 0..self.n_classes {
            let mut batches_for_class: Vec<usize> = (0..k)
                .flat_map(|i| std::iter::repeat(i).take(allocation[i][c]))
                .collect();
            if self.shuffle {
                batches_for_class.shuffle(&mut self.rng);
            }
            let members = self
                .encoded
                .iter()
                .enumerate()
                .filter_map(|(idx, e)| (*e == c).then_some(idx));
            for (idx, b) in members.zip(batches_for_class) {
                assigned[idx] = b;
            }
        }
        assigned
    }

    /// 开始一轮遍历. 每个 batch 在迭代到时才收集其索引.
    pub fn iter(&mut self) -> Batches {
        Batches {
            assigned: self.assign(),
            next: 0,
            n_batches: self.n_batches,
        }
    }
}

fn counts(encoded: &[usize], n_classes: usize) -> Vec<usize> {
    let mut ans = vec![0usize; n_classes];
    for e in encoded {
        ans[*e] += 1;
    }
    ans
}

/// 一轮遍历中的 batch 序列, 元素为升序排列的样本索引.
#[derive(Debug)]
pub struct Batches {
    assigned: Vec<usize>,
    next: usize,
    n_batches: usize,
}

impl Iterator for Batches {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.n_batches {
            return None;
        }
        let b = self.next;
        self.next += 1;
        Some(
            self.assigned
                .iter()
                .enumerate()
                .filter_map(|(idx, a)| (*a == b).then_some(idx))
                .collect(),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = self.n_batches - self.next;
        (rest, Some(rest))
    }
}

impl ExactSizeIterator for Batches {}
