//! 数据增强.

use ndarray::{ArrayViewMut2, ArrayViewMut3, Axis};
use rand::Rng;

/// 对比度增强: 以通道均值为中心按因子缩放强度.
#[derive(Copy, Clone, Debug)]
pub struct ContrastAugment {
    /// 缩放因子范围.
    pub range: (f32, f32),

    /// 结果是否截断到通道原有的最小/最大值.
    pub preserve_range: bool,

    /// 每个通道单独抽取因子.
    pub per_channel: bool,

    /// 每个通道被增强的概率.
    pub p_per_channel: f64,
}

impl Default for ContrastAugment {
    fn default() -> Self {
        Self {
            range: (0.75, 1.25),
            preserve_range: true,
            per_channel: true,
            p_per_channel: 0.15,
        }
    }
}

impl ContrastAugment {
    /// 抽取一个缩放因子. 范围跨过 1 时, 缩小和放大各占一半概率.
    fn factor<R: Rng + ?Sized>(&self, rng: &mut R) -> f32 {
        let (lo, hi) = self.range;
        if rng.gen::<f64>() < 0.5 && lo < 1.0 {
            uniform(rng, lo, 1.0)
        } else {
            uniform(rng, lo.max(1.0), hi)
        }
    }

    /// 原地增强一个 `(C, H, W)` 样本.
    pub fn apply<R: Rng + ?Sized>(&self, mut sample: ArrayViewMut3<f32>, rng: &mut R) {
        let shared = (!self.per_channel).then(|| self.factor(rng));
        for channel in sample.axis_iter_mut(Axis(0)) {
            if rng.gen::<f64>() >= self.p_per_channel {
                continue;
            }
            let factor = match shared {
                Some(f) => f,
                None => self.factor(rng),
            };
            self.scale_channel(channel, factor);
        }
    }

    fn scale_channel(&self, mut channel: ArrayViewMut2<f32>, factor: f32) {
        if channel.is_empty() {
            return;
        }
        let mean = channel.sum() / channel.len() as f32;
        let (min, max) = channel
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(*v), hi.max(*v))
            });
        let preserve = self.preserve_range;
        channel.mapv_inplace(|v| {
            let v = (v - mean) * factor + mean;
            if preserve {
                v.clamp(min, max)
            } else {
                v
            }
        });
    }
}

#[inline]
fn uniform<R: Rng + ?Sized>(rng: &mut R, lo: f32, hi: f32) -> f32 {
    if lo >= hi {
        lo
    } else {
        rng.gen_range(lo..hi)
    }
}
