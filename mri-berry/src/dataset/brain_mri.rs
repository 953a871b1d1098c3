//! 脑部 MRI 分割数据集.
//!
//! [`VolumeStore`] 在构造时一次性完成装配与预处理, 之后完全只读;
//! 多个数据集实例 (如训练集与验证集) 通过 `Arc` 共享同一份体数据,
//! 数据加载的各个 worker 线程也只持有只读引用, 无需加锁.

use std::path::Path;
use std::sync::Arc;

use burn::data::dataset::Dataset;
use either::Either;

use super::assemble::{assemble_volumes, ScanError};
use super::preprocess::preprocess;
use super::sampler::{DeterministicSampler, SliceSampler, WeightedRandomSampler};
use super::weights::{patient_slice_index, slice_weights};
use crate::augment::JointTransform;
use crate::data::{MriVolume, SliceSample};
use crate::Idx2d;

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelIterator, ParallelIterator};
    }
}

/// 预处理完成的病人体数据仓库.
///
/// 包含所有病人的体数据、每个病人的切片采样分布, 以及确定性迭代用
/// 的全局扁平索引. 构造完成后不可变.
#[derive(Debug)]
pub struct VolumeStore {
    volumes: Vec<MriVolume>,
    weights: Vec<Vec<f32>>,
    index: Vec<Idx2d>,
}

impl VolumeStore {
    /// 从数据根目录装配并预处理所有病人体数据.
    ///
    /// `image_size` 为预处理管线的目标切片边长. 任何装配错误都会
    /// 中止构建并原样返回.
    pub fn from_dir(root: &Path, image_size: usize) -> Result<Arc<Self>, ScanError> {
        let volumes = assemble_volumes(root)?;
        log::info!("preprocessing {} patient volume(s)...", volumes.len());
        let volumes = preprocess_all(volumes, image_size);
        Ok(Arc::new(Self::from_volumes(volumes)))
    }

    /// 从已预处理的体数据直接构建仓库 (实验与测试用途).
    ///
    /// `volumes` 为空时 panic.
    pub fn from_volumes(volumes: Vec<MriVolume>) -> Self {
        assert!(!volumes.is_empty(), "体数据仓库不能为空");
        let weights = volumes
            .iter()
            .map(|v| slice_weights(&v.positive_counts()))
            .collect();
        let lens: Vec<usize> = volumes.iter().map(MriVolume::len_slices).collect();
        let index = patient_slice_index(&lens);
        Self {
            volumes,
            weights,
            index,
        }
    }

    /// 病人数.
    #[inline]
    pub fn num_patients(&self) -> usize {
        self.volumes.len()
    }

    /// 全部病人的切片总数, 即扁平索引大小.
    #[inline]
    pub fn num_slices(&self) -> usize {
        self.index.len()
    }

    /// 第 `patient` 个病人的体数据.
    ///
    /// 越界时 panic.
    #[inline]
    pub fn volume(&self, patient: usize) -> &MriVolume {
        &self.volumes[patient]
    }

    /// 第 `patient` 个病人的切片采样分布.
    ///
    /// 越界时 panic.
    #[inline]
    pub fn slice_weights_of(&self, patient: usize) -> &[f32] {
        &self.weights[patient]
    }

    /// 全局 (病人, 切片) 扁平索引.
    #[inline]
    pub fn index(&self) -> &[Idx2d] {
        &self.index
    }
}

#[cfg(feature = "rayon")]
fn preprocess_all(volumes: Vec<MriVolume>, image_size: usize) -> Vec<MriVolume> {
    volumes
        .into_par_iter()
        .map(|v| preprocess(v, image_size))
        .collect()
}

#[cfg(not(feature = "rayon"))]
fn preprocess_all(volumes: Vec<MriVolume>, image_size: usize) -> Vec<MriVolume> {
    volumes
        .into_iter()
        .map(|v| preprocess(v, image_size))
        .collect()
}

/// 数据集访问模式, 构造时二选一.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AccessMode {
    /// 确定性迭代: 一轮恰好访问每张切片一次. 用于验证.
    Deterministic,

    /// 加权随机: 均匀抽病人, 按权重抽切片, 忽略传入下标. 用于训练.
    WeightedRandom,
}

/// 脑部 MRI (图像, 掩膜) 切片数据集.
///
/// 实现 burn 的 [`Dataset`], 可直接交给
/// [`DataLoaderBuilder`](burn::data::dataloader::DataLoaderBuilder)
/// 做多 worker 批量加载. 样本在每次访问时即时生成.
pub struct BrainMriDataset {
    store: Arc<VolumeStore>,
    sampler: Either<DeterministicSampler, WeightedRandomSampler>,
    transform: Option<JointTransform>,
}

impl BrainMriDataset {
    /// 创建数据集.
    ///
    /// `transform` 为 `Some` 时, 每次访问都会对切片对施加一次
    /// 独立随机抽取的联合增广.
    pub fn new(
        store: Arc<VolumeStore>,
        mode: AccessMode,
        transform: Option<JointTransform>,
    ) -> Self {
        let sampler = match mode {
            AccessMode::Deterministic => {
                Either::Left(DeterministicSampler::new(store.index().to_vec()))
            }
            AccessMode::WeightedRandom => {
                let weights: Vec<Vec<f32>> = (0..store.num_patients())
                    .map(|p| store.slice_weights_of(p).to_vec())
                    .collect();
                Either::Right(WeightedRandomSampler::new(&weights))
            }
        };
        Self {
            store,
            sampler,
            transform,
        }
    }

    /// 当前访问模式.
    pub fn mode(&self) -> AccessMode {
        match &self.sampler {
            Either::Left(_) => AccessMode::Deterministic,
            Either::Right(_) => AccessMode::WeightedRandom,
        }
    }
}

impl Dataset<SliceSample> for BrainMriDataset {
    fn get(&self, index: usize) -> Option<SliceSample> {
        if index >= self.store.num_slices() {
            return None;
        }
        let (patient, slice) = self.sampler.pick(index);
        let (image, mask) = self.store.volume(patient).slice_pair(slice);

        let (image, mask) = match &self.transform {
            Some(t) => {
                let shape = (image.dim(), mask.dim());
                let out = t.apply(&image, &mask);
                // 增广必须保形, 否则说明实现有缺陷, 立刻失败.
                assert_eq!(
                    (out.0.dim(), out.1.dim()),
                    shape,
                    "联合增广改变了切片形状"
                );
                out
            }
            None => (image, mask),
        };
        Some(SliceSample::from_hwc(image, mask))
    }

    fn len(&self) -> usize {
        self.store.num_slices()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Array4};

    /// 两个病人的合成仓库: 切片的掩膜前景数各不相同, 便于核对顺序.
    fn synthetic_store() -> Arc<VolumeStore> {
        let mut volumes = Vec::new();
        for (pid, slices) in [("p0", 2usize), ("p1", 3usize)] {
            let mut scan = Array4::<f32>::zeros((slices, 8, 8, 3));
            scan.fill(1.0);
            let mut mask = Array3::<f32>::zeros((slices, 8, 8));
            for z in 0..slices {
                // 病人 p0 的切片前景数 1, 2; p1 的为 1, 2, 3.
                for k in 0..=z {
                    mask[(z, 0, k)] = 1.0;
                }
            }
            volumes.push(MriVolume::new(pid, scan, mask));
        }
        Arc::new(VolumeStore::from_volumes(volumes))
    }

    #[test]
    fn test_store_layout() {
        let store = synthetic_store();
        assert_eq!(store.num_patients(), 2);
        assert_eq!(store.num_slices(), 5);
        assert_eq!(
            store.index(),
            &[(0, 0), (0, 1), (1, 0), (1, 1), (1, 2)]
        );
        for p in 0..2 {
            let sum: f32 = store.slice_weights_of(p).iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_deterministic_mode_visits_every_slice_once() {
        let store = synthetic_store();
        let ds = BrainMriDataset::new(store, AccessMode::Deterministic, None);
        assert_eq!(ds.mode(), AccessMode::Deterministic);
        assert_eq!(ds.len(), 5);

        // 切片按 (病人序, 切片序) 迭代; 用前景数区分切片.
        let sums: Vec<f32> = (0..ds.len())
            .map(|i| ds.get(i).unwrap().mask.sum())
            .collect();
        assert_eq!(sums, vec![1.0, 2.0, 1.0, 2.0, 3.0]);
        assert!(ds.get(5).is_none());
    }

    #[test]
    fn test_weighted_mode_returns_valid_samples() {
        let store = synthetic_store();
        let ds = BrainMriDataset::new(
            store,
            AccessMode::WeightedRandom,
            Some(JointTransform::new(15.0, 0.05, 0.5)),
        );
        assert_eq!(ds.mode(), AccessMode::WeightedRandom);
        assert_eq!(ds.len(), 5);

        for _ in 0..32 {
            let sample = ds.get(0).unwrap();
            assert_eq!(sample.image.dim(), (3, 8, 8));
            assert_eq!(sample.mask.dim(), (1, 8, 8));
        }
    }
}
