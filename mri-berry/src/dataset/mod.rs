//! 数据集操作.
//!
//! 从磁盘装配病人体数据, 经预处理管线归一化后, 以 burn
//! [`Dataset`](burn::data::dataset::Dataset) 的形式向训练循环提供
//! (图像, 掩膜) 样本.

use std::path::{Path, PathBuf};

pub mod assemble;
pub mod batcher;
pub mod filename;
pub mod preprocess;
pub mod sampler;
pub mod weights;

mod brain_mri;

pub use assemble::{assemble_volumes, ScanError};
pub use batcher::{SliceBatch, SliceBatcher};
pub use brain_mri::{AccessMode, BrainMriDataset, VolumeStore};
pub use sampler::{DeterministicSampler, SliceSampler, WeightedRandomSampler};

/// 获取 `{用户主目录}/dataset` 目录.
pub fn home_dataset_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    ans.extend(it);
    Some(ans)
}
