//! 脑部 MRI 体数据基础结构.
//!
//! 一个病人的数据由等长的两组 2D 切片构成: 3 通道 FLAIR 图像切片与
//! 单通道二值掩膜切片. 本模块将它们装配成按 `(切片, 高, 宽[, 通道])`
//! 组织的 3D/4D 数组, 并提供按切片访问的视图.

use ndarray::{Array2, Array3, Array4, ArrayView2, ArrayView3, ArrayView4, Axis};

use crate::consts::mask;
use crate::Idx2d;

/// 一个病人的 3D MRI 体数据: 图像栈 + 掩膜栈.
///
/// 图像按 `(S, H, W, C)` 组织, 掩膜按 `(S, H, W)` 组织, 其中 `S`
/// 为切片数, `C` 为图像通道数. 掩膜像素值只能为
/// [`mask::BACKGROUND`] 或 [`mask::FOREGROUND`].
///
/// # 注意
///
/// 该结构一经装配即不可变 (训练期间只读). 两个栈的切片数与空间尺寸
/// 必须一致, 否则构造时 panic.
#[derive(Debug, Clone)]
pub struct MriVolume {
    patient_id: String,
    scan: Array4<f32>,
    mask: Array3<f32>,
}

impl MriVolume {
    /// 从已装配的图像栈与掩膜栈创建体数据.
    ///
    /// 两个栈的 `(S, H, W)` 部分形状不一致时 panic.
    pub fn new(patient_id: impl Into<String>, scan: Array4<f32>, mask: Array3<f32>) -> Self {
        let patient_id = patient_id.into();
        let (s, h, w, _) = scan.dim();
        assert_eq!(
            (s, h, w),
            mask.dim(),
            "病人 {patient_id} 的图像栈与掩膜栈形状不一致"
        );
        Self {
            patient_id,
            scan,
            mask,
        }
    }

    /// 病人标识.
    #[inline]
    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    /// 切片数.
    #[inline]
    pub fn len_slices(&self) -> usize {
        self.mask.dim().0
    }

    /// 单张切片的空间尺寸 `(H, W)`.
    #[inline]
    pub fn slice_shape(&self) -> Idx2d {
        let (_, h, w) = self.mask.dim();
        (h, w)
    }

    /// 图像通道数.
    #[inline]
    pub fn channels(&self) -> usize {
        self.scan.dim().3
    }

    /// 获得图像栈的一份不可变 shallow copy.
    #[inline]
    pub fn scan(&self) -> ArrayView4<'_, f32> {
        self.scan.view()
    }

    /// 获得掩膜栈的一份不可变 shallow copy.
    #[inline]
    pub fn mask(&self) -> ArrayView3<'_, f32> {
        self.mask.view()
    }

    /// 获取第 `z` 张图像切片视图, 形状 `(H, W, C)`.
    ///
    /// 当 `z` 越界时 panic.
    #[inline]
    pub fn scan_slice_at(&self, z: usize) -> ArrayView3<'_, f32> {
        self.scan.index_axis(Axis(0), z)
    }

    /// 获取第 `z` 张掩膜切片视图, 形状 `(H, W)`.
    ///
    /// 当 `z` 越界时 panic.
    #[inline]
    pub fn mask_slice_at(&self, z: usize) -> ArrayView2<'_, f32> {
        self.mask.index_axis(Axis(0), z)
    }

    /// 取出第 `z` 张 (图像, 掩膜) 切片对的独立副本.
    ///
    /// 当 `z` 越界时 panic.
    pub fn slice_pair(&self, z: usize) -> (Array3<f32>, Array2<f32>) {
        (
            self.scan_slice_at(z).to_owned(),
            self.mask_slice_at(z).to_owned(),
        )
    }

    /// 第 `z` 张掩膜切片的前景像素个数.
    ///
    /// 当 `z` 越界时 panic.
    pub fn positive_count(&self, z: usize) -> f32 {
        self.mask_slice_at(z)
            .iter()
            .filter(|p| mask::is_foreground(**p))
            .count() as f32
    }

    /// 所有掩膜切片的前景像素个数, 按切片序排列.
    pub fn positive_counts(&self) -> Vec<f32> {
        (0..self.len_slices())
            .map(|z| self.positive_count(z))
            .collect()
    }

    /// 拆出底层的 (图像栈, 掩膜栈).
    #[inline]
    pub fn into_parts(self) -> (String, Array4<f32>, Array3<f32>) {
        (self.patient_id, self.scan, self.mask)
    }
}

/// 一个训练样本: 通道优先布局的 (图像, 掩膜) 切片对.
///
/// `image` 形状为 `(C, H, W)`, `mask` 形状为 `(1, H, W)`.
/// 样本在每次访问时即时生成, 不做缓存.
#[derive(Debug, Clone)]
pub struct SliceSample {
    /// 图像切片, `(C, H, W)`.
    pub image: Array3<f32>,

    /// 掩膜切片, `(1, H, W)`.
    pub mask: Array3<f32>,
}

impl SliceSample {
    /// 从 `(H, W, C)` 图像与 `(H, W)` 掩膜构建通道优先样本.
    ///
    /// 两者空间尺寸不一致时 panic.
    pub fn from_hwc(image: Array3<f32>, mask: Array2<f32>) -> Self {
        let (h, w, _) = image.dim();
        assert_eq!((h, w), mask.dim(), "样本图像与掩膜空间尺寸不一致");

        let image = image
            .permuted_axes([2, 0, 1])
            .as_standard_layout()
            .to_owned();
        let mask = mask.insert_axis(Axis(0));
        Self { image, mask }
    }

    /// 样本空间尺寸 `(H, W)`.
    #[inline]
    pub fn spatial_shape(&self) -> Idx2d {
        let (_, h, w) = self.image.dim();
        (h, w)
    }
}
