//! HGG/LGG 分类网络.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{Linear, LinearConfig, PaddingConfig2d};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::consts::MODALITIES;

/// 分类网络配置.
#[derive(Clone, Debug)]
pub struct ClassifierConfig {
    /// 输入通道数 (模态数).
    pub in_channels: usize,

    /// 第一层卷积的通道数, 第二层加倍.
    pub hidden: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            in_channels: MODALITIES.len(),
            hidden: 16,
        }
    }
}

/// 两层步长为 2 的卷积, 全局平均池化, 再接一个线性层输出一个 logit.
#[derive(Module, Debug)]
pub struct HggLggClassifier<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    pool: AdaptiveAvgPool2d,
    head: Linear<B>,
}

impl<B: Backend> HggLggClassifier<B> {
    /// 按配置初始化参数.
    pub fn new(cfg: &ClassifierConfig, device: &B::Device) -> Self {
        let conv1 = Conv2dConfig::new([cfg.in_channels, cfg.hidden], [3, 3])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let conv2 = Conv2dConfig::new([cfg.hidden, cfg.hidden * 2], [3, 3])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();
        let head = LinearConfig::new(cfg.hidden * 2, 1).init(device);
        Self {
            conv1,
            conv2,
            pool,
            head,
        }
    }

    /// `(B, C, H, W)` -> `(B, 1)` 的 logit.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = relu(self.conv1.forward(x));
        let x = relu(self.conv2.forward(x));
        let x = self.pool.forward(x).flatten::<2>(1, 3);
        self.head.forward(x)
    }
}

/// 逐元素的带 `pos_weight` 的 BCE-with-logits:
///
/// `(1 - y) * x + (1 + (w - 1) * y) * (ln(1 + e^(-|x|)) + max(-x, 0))`.
pub fn bce_with_logits<B: Backend, const D: usize>(
    logits: Tensor<B, D>,
    targets: Tensor<B, D>,
    pos_weight: f32,
) -> Tensor<B, D> {
    let log_weight = targets.clone().mul_scalar(pos_weight - 1.0).add_scalar(1.0);
    let softplus_neg = logits.clone().abs().neg().exp().log1p() + logits.clone().neg().clamp_min(0.0);
    targets.neg().add_scalar(1.0) * logits + log_weight * softplus_neg
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type B = NdArray<f32>;

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let model = HggLggClassifier::<B>::new(&ClassifierConfig::default(), &device);
        let x = Tensor::<B, 4>::zeros([3, 4, 32, 20], &device);
        assert_eq!(model.forward(x).dims(), [3, 1]);
    }

    #[test]
    fn test_bce_matches_reference() {
        let device = Default::default();
        let logits = Tensor::<B, 1>::from_data(TensorData::new(vec![0.0f32, 2.0, -3.0], [3]), &device);
        let targets = Tensor::<B, 1>::from_data(TensorData::new(vec![1.0f32, 0.0, 1.0], [3]), &device);
        let got = bce_with_logits(logits, targets, 2.0)
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        let sp = |x: f32| (1.0 + (-x).exp()).ln(); // -ln(sigmoid(x))
        let expected = [2.0 * sp(0.0), 2.0 + sp(2.0), 2.0 * sp(-3.0)];
        for (g, e) in got.iter().zip(expected) {
            assert!((g - e).abs() < 1e-5, "{g} vs {e}");
        }
    }
}
