//! 2D 包围盒的选取与裁剪/填充.

use ndarray::{s, ArrayView3, ArrayViewMut3};
use rand::Rng;

use crate::Idx2d;

/// 2D 包围盒, 左闭右开. 上下界可以落在切片之外.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BBox2d {
    /// 每个维度的下界 (含).
    pub lbs: [i64; 2],

    /// 每个维度的上界 (不含).
    pub ubs: [i64; 2],
}

impl BBox2d {
    /// 与形状为 `shape` 的切片求交, 返回有效区域的 (下界, 上界).
    ///
    /// 若完全不相交, 则对应维度的上界等于下界.
    pub fn valid(&self, (h, w): Idx2d) -> ([usize; 2], [usize; 2]) {
        let shape = [h as i64, w as i64];
        let mut lo = [0usize; 2];
        let mut hi = [0usize; 2];
        for d in 0..2 {
            let l = self.lbs[d].clamp(0, shape[d]);
            let u = self.ubs[d].clamp(l, shape[d]);
            lo[d] = l as usize;
            hi[d] = u as usize;
        }
        (lo, hi)
    }

    /// 每个维度 (前, 后) 两侧需要填充的宽度.
    pub fn padding(&self, (h, w): Idx2d) -> [(usize, usize); 2] {
        let shape = [h as i64, w as i64];
        let mut ans = [(0usize, 0usize); 2];
        for d in 0..2 {
            ans[d] = (
                (-self.lbs[d]).max(0) as usize,
                (self.ubs[d] - shape[d]).max(0) as usize,
            );
        }
        ans
    }

    /// 包围盒大小.
    #[inline]
    pub fn size(&self) -> Idx2d {
        (
            (self.ubs[0] - self.lbs[0]) as usize,
            (self.ubs[1] - self.lbs[1]) as usize,
        )
    }
}

/// 包围盒选取策略.
///
/// `need_to_pad` 是 patch 相对于最终 patch 多出的部分 (为数据增强预留),
/// 包围盒可以向切片外延伸这么多.
#[derive(Copy, Clone, Debug)]
pub struct BBoxPolicy {
    patch: [usize; 2],
    need_to_pad: [usize; 2],
}

impl BBoxPolicy {
    /// 由 patch 大小和最终 patch 大小创建. 最终 patch 大于 patch 的维度不额外填充.
    pub fn new(patch: Idx2d, final_patch: Idx2d) -> Self {
        Self {
            patch: [patch.0, patch.1],
            need_to_pad: [
                patch.0.saturating_sub(final_patch.0),
                patch.1.saturating_sub(final_patch.1),
            ],
        }
    }

    /// patch 大小.
    #[inline]
    pub fn patch(&self) -> Idx2d {
        (self.patch[0], self.patch[1])
    }

    /// 对形状为 `shape` 的切片, 包围盒下界的取值范围 `[lbs, ubs]` (闭区间).
    ///
    /// 切片加上预留填充仍小于 patch 时, 会在两侧填充得更多.
    pub fn bounds(&self, (h, w): Idx2d) -> ([i64; 2], [i64; 2]) {
        let shape = [h as i64, w as i64];
        let mut lbs = [0i64; 2];
        let mut ubs = [0i64; 2];
        for d in 0..2 {
            let patch = self.patch[d] as i64;
            let mut pad = self.need_to_pad[d] as i64;
            if pad + shape[d] < patch {
                pad = patch - shape[d];
            }
            lbs[d] = (-pad).div_euclid(2);
            ubs[d] = shape[d] + pad / 2 + pad % 2 - patch;
        }
        (lbs, ubs)
    }

    #[inline]
    fn with_lbs(&self, lbs: [i64; 2]) -> BBox2d {
        BBox2d {
            lbs,
            ubs: [lbs[0] + self.patch[0] as i64, lbs[1] + self.patch[1] as i64],
        }
    }

    /// 在允许范围内均匀随机放置包围盒.
    pub fn random<R: Rng + ?Sized>(&self, shape: Idx2d, rng: &mut R) -> BBox2d {
        let (lbs, ubs) = self.bounds(shape);
        self.with_lbs([rng.gen_range(lbs[0]..=ubs[0]), rng.gen_range(lbs[1]..=ubs[1])])
    }

    /// 以 `anchor` 为中心放置包围盒, 下界不低于允许范围.
    pub fn anchored(&self, shape: Idx2d, (ah, aw): Idx2d) -> BBox2d {
        let (lbs, _) = self.bounds(shape);
        let half = [(self.patch[0] / 2) as i64, (self.patch[1] / 2) as i64];
        self.with_lbs([
            lbs[0].max(ah as i64 - half[0]),
            lbs[1].max(aw as i64 - half[1]),
        ])
    }
}

/// 将 `src` (`(C, H, W)`) 中 `bbox` 覆盖的区域复制到 `dst` (`(C, bh, bw)`),
/// 切片之外的部分填充为 `pad`.
///
/// # 注意
///
/// `dst` 的空间形状必须等于 `bbox.size()`, 通道数必须与 `src` 一致, 否则程序 panic.
pub fn crop_and_pad<T: Copy>(src: ArrayView3<T>, bbox: &BBox2d, pad: T, mut dst: ArrayViewMut3<T>) {
    let (c, h, w) = src.dim();
    let (bh, bw) = bbox.size();
    assert_eq!(dst.dim(), (c, bh, bw), "batch buffer shape does not match bbox");

    dst.fill(pad);
    let (lo, hi) = bbox.valid((h, w));
    if lo[0] == hi[0] || lo[1] == hi[1] {
        return;
    }
    let [(before_h, _), (before_w, _)] = bbox.padding((h, w));
    let (len_h, len_w) = (hi[0] - lo[0], hi[1] - lo[1]);
    dst.slice_mut(s![.., before_h..before_h + len_h, before_w..before_w + len_w])
        .assign(&src.slice(s![.., lo[0]..hi[0], lo[1]..hi[1]]));
}
