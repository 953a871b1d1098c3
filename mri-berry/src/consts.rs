//! 通用常量.

/// 掩膜像素值.
pub mod mask {
    /// 掩膜背景值.
    pub const BACKGROUND: f32 = 0.0;

    /// 掩膜前景 (异常组织) 值.
    pub const FOREGROUND: f32 = 1.0;

    /// 8-bit 灰度掩膜二值化阈值. 大于该值的像素判定为前景.
    pub const GRAY_THRESHOLD: u8 = 127;

    /// 像素是否为前景?
    #[inline]
    pub fn is_foreground(p: f32) -> bool {
        p > 0.5
    }

    /// 像素是否为背景?
    #[inline]
    pub fn is_background(p: f32) -> bool {
        !is_foreground(p)
    }
}

/// 输入图像通道数. LGG MRI 数据集的切片为 3 通道伪彩色图像.
pub const IN_CHANNELS: usize = 3;

/// 输出掩膜通道数. 二分类分割只需 1 个通道.
pub const OUT_CHANNELS: usize = 1;

/// 切片文件扩展名.
pub const SLICE_EXT: &str = "tif";

/// 掩膜文件名标记. 文件名含有该子串的切片视为标注文件.
pub const MASK_MARKER: &str = "mask";

/// 默认目标切片边长 (像素).
pub const DEFAULT_IMAGE_SIZE: usize = 256;
