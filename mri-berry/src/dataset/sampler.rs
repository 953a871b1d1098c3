//! 切片采样策略.
//!
//! 数据集的访问模式在构造时二选一:
//!
//! 1. [`DeterministicSampler`] -- 全局下标经扁平索引映射到固定的
//!   (病人, 切片), 一轮恰好访问每张切片一次. 用于验证/评估.
//! 2. [`WeightedRandomSampler`] -- 忽略传入的下标; 先均匀随机抽取
//!   病人, 再按切片权重抽取切片. 用于训练, 使前景面积大的切片被
//!   过采样.
//!
//! 注意: 加权随机模式下数据集的 "长度" 只是名义值 (等于扁平索引
//! 大小), 仅用于决定每轮的 batch 数, 不保证每张切片在一轮内都被
//! 访问到. 这是刻意的覆盖性质, 不是缺陷.

use either::{for_both, Either};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::Idx2d;

/// 采样策略公共接口: 把一个全局样本下标变换成 (病人, 切片) 坐标.
pub trait SliceSampler: Send + Sync {
    /// 选取下标 `index` 对应的 (病人, 切片).
    ///
    /// 实现可以忽略 `index` (随机策略), 但 `index` 超出名义长度时
    /// 的行为由各实现自行定义.
    fn pick(&self, index: usize) -> Idx2d;
}

/// 确定性采样: 下标直接查扁平索引.
#[derive(Debug, Clone)]
pub struct DeterministicSampler {
    index: Vec<Idx2d>,
}

impl DeterministicSampler {
    /// 从扁平 (病人, 切片) 索引构建.
    pub fn new(index: Vec<Idx2d>) -> Self {
        Self { index }
    }
}

impl SliceSampler for DeterministicSampler {
    #[inline]
    fn pick(&self, index: usize) -> Idx2d {
        self.index[index]
    }
}

/// 加权随机采样: 均匀抽病人, 再按切片权重抽切片.
#[derive(Debug, Clone)]
pub struct WeightedRandomSampler {
    slice_dists: Vec<WeightedIndex<f32>>,
}

impl WeightedRandomSampler {
    /// 从每个病人的切片权重构建.
    ///
    /// `weights` 必须非空, 且每个病人的权重向量都是合法分布
    /// (各项非负, 和为正), 否则 panic.
    pub fn new(weights: &[Vec<f32>]) -> Self {
        assert!(!weights.is_empty(), "病人数为零, 无法构建采样器");
        let slice_dists = weights
            .iter()
            .map(|w| WeightedIndex::new(w).expect("切片权重不是合法分布"))
            .collect();
        Self { slice_dists }
    }
}

impl SliceSampler for WeightedRandomSampler {
    fn pick(&self, _index: usize) -> Idx2d {
        let mut rng = rand::thread_rng();
        let patient = rng.gen_range(0..self.slice_dists.len());
        let slice = self.slice_dists[patient].sample(&mut rng);
        (patient, slice)
    }
}

// 两种策略的封闭集合. 直接用 `Either` 是考虑今后扩展的可能性不大.
impl SliceSampler for Either<DeterministicSampler, WeightedRandomSampler> {
    #[inline]
    fn pick(&self, index: usize) -> Idx2d {
        for_both!(self, s => s.pick(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::weights::slice_weights;

    #[test]
    fn test_deterministic_sampler_is_identity_on_index() {
        let sampler = DeterministicSampler::new(vec![(0, 0), (0, 1), (1, 0)]);
        assert_eq!(sampler.pick(0), (0, 0));
        assert_eq!(sampler.pick(1), (0, 1));
        assert_eq!(sampler.pick(2), (1, 0));
    }

    #[test]
    fn test_weighted_sampler_matches_configured_weights() {
        // 单病人, 两张切片, 权重 [0.9, 0.1].
        let sampler = WeightedRandomSampler::new(&[vec![0.9, 0.1]]);

        const N: usize = 10_000;
        let mut first = 0usize;
        for _ in 0..N {
            let (patient, slice) = sampler.pick(0);
            assert_eq!(patient, 0);
            if slice == 0 {
                first += 1;
            }
        }
        let freq = first as f32 / N as f32;
        assert!((freq - 0.9).abs() < 0.05, "经验频率 {freq} 偏离配置权重");
    }

    #[test]
    fn test_weighted_sampler_covers_all_patients() {
        // 全零掩膜病人也能被采到: 权重退化为均匀分布.
        let weights = vec![slice_weights(&[0.0, 0.0]), slice_weights(&[5.0, 5.0])];
        let sampler = WeightedRandomSampler::new(&weights);

        let mut seen = [false; 2];
        for _ in 0..1000 {
            let (patient, slice) = sampler.pick(0);
            assert!(slice < 2);
            seen[patient] = true;
        }
        assert!(seen[0] && seen[1]);
    }
}
