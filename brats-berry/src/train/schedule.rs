/// 多项式学习率衰减: `lr(t) = initial_lr * (1 - t / max_steps) ^ exponent`.
#[derive(Clone, Debug)]
pub struct PolyLrScheduler {
    initial_lr: f64,
    max_steps: usize,
    exponent: f64,
    ctr: usize,
}

impl PolyLrScheduler {
    /// 创建调度器.
    ///
    /// # 注意
    ///
    /// `max_steps` 为 0 时程序 panic.
    pub fn new(initial_lr: f64, max_steps: usize, exponent: f64) -> Self {
        assert!(max_steps > 0, "max steps must be positive");
        Self {
            initial_lr,
            max_steps,
            exponent,
            ctr: 0,
        }
    }

    /// 计算第 `step` 步的学习率. `step` 为 `None` 时使用内部计数器, 并使其加一.
    ///
    /// 超过 `max_steps` 的步数按 `max_steps` 计, 学习率为 0.
    pub fn step(&mut self, step: Option<usize>) -> f64 {
        let t = match step {
            Some(t) => t,
            None => {
                self.ctr += 1;
                self.ctr - 1
            }
        };
        let ratio = t.min(self.max_steps) as f64 / self.max_steps as f64;
        self.initial_lr * (1.0 - ratio).powf(self.exponent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_steps() {
        let mut s = PolyLrScheduler::new(1e-3, 100, 0.9);
        assert_eq!(s.step(Some(0)), 1e-3);
        let mid = s.step(Some(50));
        assert!((mid - 1e-3 * 0.5f64.powf(0.9)).abs() < 1e-15);
        assert_eq!(s.step(Some(100)), 0.0);
        assert_eq!(s.step(Some(250)), 0.0);
    }

    #[test]
    fn test_internal_counter() {
        let mut s = PolyLrScheduler::new(1.0, 4, 1.0);
        let lrs: Vec<f64> = (0..5).map(|_| s.step(None)).collect();
        assert_eq!(lrs, vec![1.0, 0.75, 0.5, 0.25, 0.0]);
    }

    #[test]
    fn test_monotone_decay() {
        let mut s = PolyLrScheduler::new(0.01, 30, 0.9);
        let lrs: Vec<f64> = (0..30).map(|t| s.step(Some(t))).collect();
        assert!(lrs.windows(2).all(|w| w[0] > w[1]));
    }
}
