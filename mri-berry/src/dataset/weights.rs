//! 切片采样权重与全局索引.
//!
//! 训练时希望多采掩膜前景面积大的切片. 每个病人内部,
//! 切片权重正比于其前景像素数, 再叠加一个均匀的平滑项
//! (前景总数的 10%, 平摊到所有切片), 最后归一化为概率分布.
//! 平滑项保证空掩膜切片也有非零概率.

use itertools::Itertools;

use crate::Idx2d;

/// 由每张切片的前景像素数计算该病人的切片采样分布.
///
/// 设 `total` 为前景像素总数, 则
/// `w_i = (c_i + 0.1 * total / n) / (1.1 * total)`, 各项和为 1.
/// 当 `total` 为零 (整个病人无任何前景) 时退化为均匀分布,
/// 保证返回值永远是合法的概率分布.
///
/// `counts` 为空时 panic.
pub fn slice_weights(counts: &[f32]) -> Vec<f32> {
    assert!(!counts.is_empty(), "病人切片数为零, 无法构建采样分布");
    let n = counts.len() as f32;
    let total: f32 = counts.iter().sum();
    if total <= 0.0 {
        return vec![1.0 / n; counts.len()];
    }
    let smoothing = total * 0.1 / n;
    let denom = total * 1.1;
    counts.iter().map(|c| (c + smoothing) / denom).collect()
}

/// 建立全局扁平索引: 按病人序、切片序把每个 (病人, 切片)
/// 对映射到一个全局样本下标. 确定性迭代 (如验证) 使用该索引.
pub fn patient_slice_index(slice_counts: &[usize]) -> Vec<Idx2d> {
    slice_counts
        .iter()
        .enumerate()
        .flat_map(|(patient, count)| (0..*count).map(move |z| (patient, z)))
        .collect_vec()
}
