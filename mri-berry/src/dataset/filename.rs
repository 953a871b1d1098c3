//! 切片文件名文法解析.
//!
//! LGG MRI 数据集的切片文件名形如
//! `TCGA_CS_4941_19960909_11.tif` (图像) 或
//! `TCGA_CS_4941_19960909_11_mask.tif` (掩膜):
//! 倒数第二个点号段中, 第 5 个下划线字段为切片序号;
//! 文件名含 `mask` 子串的为标注文件.
//!
//! 解析器只接受合法名字, 不做 best-effort 字符串切分:
//! 无法解析的 `.tif` 文件名是装配阶段的硬错误.

use std::fmt;

use crate::consts::MASK_MARKER;

/// 切片文件的类别.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SliceKind {
    /// 原始图像切片.
    Image,

    /// 标注 (掩膜) 切片.
    Mask,
}

/// 一个解析成功的切片文件名.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SliceName {
    /// 病人内切片序号.
    pub index: u32,

    /// 图像还是掩膜?
    pub kind: SliceKind,
}

impl SliceName {
    /// 是否为掩膜文件.
    #[inline]
    pub fn is_mask(&self) -> bool {
        matches!(self.kind, SliceKind::Mask)
    }
}

/// 文件名不符合切片文法.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NameError {
    /// 点号段不足两个, 无法取出序号所在段.
    MissingStem,

    /// 序号所在段的下划线字段不足 5 个.
    TooFewFields(usize),

    /// 第 5 个下划线字段不是合法的非负整数.
    BadIndex(String),
}

impl fmt::Display for NameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingStem => write!(f, "file name has no dot-separated stem"),
            Self::TooFewFields(n) => {
                write!(f, "slice index field missing: only {n} underscore field(s)")
            }
            Self::BadIndex(s) => write!(f, "slice index field {s:?} is not an integer"),
        }
    }
}

/// 解析一个 `.tif` 切片文件名 (不含路径).
///
/// 调用者应自行保证 `file_name` 以 `.tif` 结尾; 本函数只检查文法.
pub fn parse_slice_name(file_name: &str) -> Result<SliceName, NameError> {
    let segments: Vec<&str> = file_name.split('.').collect();
    if segments.len() < 2 {
        return Err(NameError::MissingStem);
    }

    // 倒数第二个点号段, 即去掉扩展名后的 stem.
    let stem = segments[segments.len() - 2];
    let fields: Vec<&str> = stem.split('_').collect();
    if fields.len() < 5 {
        return Err(NameError::TooFewFields(fields.len()));
    }

    let index: u32 = fields[4]
        .parse()
        .map_err(|_| NameError::BadIndex(fields[4].to_owned()))?;

    let kind = if file_name.contains(MASK_MARKER) {
        SliceKind::Mask
    } else {
        SliceKind::Image
    };

    Ok(SliceName { index, kind })
}
