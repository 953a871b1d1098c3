//! 病人体数据装配.
//!
//! 递归扫描数据根目录, 将每个含有 `.tif` 切片的目录视为一个病人:
//! 切片按文件名中的序号排序, 掩膜与图像分组配对, 并去掉首尾两张
//! 切片 (最外侧切片通常缺乏有效标注). 装配阶段发现的任何数据问题
//! 都会中止构建并返回描述性错误, 而不是静默丢弃病人.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use ndarray::{Array2, Array3, Array4, Axis};

use super::filename::{parse_slice_name, NameError, SliceKind};
use crate::consts::{mask, SLICE_EXT};
use crate::data::MriVolume;
use crate::Idx2d;

/// 数据集装配错误.
#[derive(Debug)]
pub enum ScanError {
    /// 目录或文件不可读.
    Io {
        /// 出错路径.
        path: PathBuf,
        /// 底层 I/O 错误.
        source: std::io::Error,
    },

    /// 切片文件解码失败.
    Decode {
        /// 出错路径.
        path: PathBuf,
        /// 底层图像解码错误.
        source: image::ImageError,
    },

    /// `.tif` 文件名不符合切片文法.
    FileName {
        /// 出错路径.
        path: PathBuf,
        /// 文法错误.
        source: NameError,
    },

    /// 同一病人的同类切片出现重复序号.
    DuplicateSlice {
        /// 病人标识.
        patient: String,
        /// 图像还是掩膜?
        kind: SliceKind,
        /// 重复的切片序号.
        index: u32,
    },

    /// 图像切片数与掩膜切片数不一致.
    InconsistentVolume {
        /// 病人标识.
        patient: String,
        /// 图像切片数.
        images: usize,
        /// 掩膜切片数.
        masks: usize,
    },

    /// 切片数太少, 去掉首尾后为空.
    TooFewSlices {
        /// 病人标识.
        patient: String,
        /// 实际切片数.
        count: usize,
    },

    /// 同一病人的切片空间尺寸不一致.
    SliceShape {
        /// 病人标识.
        patient: String,
        /// 首张切片的 `(H, W)`.
        expected: Idx2d,
        /// 不一致切片的 `(H, W)`.
        found: Idx2d,
    },

    /// 根目录下没有任何含切片的病人目录.
    Empty(PathBuf),
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "cannot read {}: {source}", path.display()),
            Self::Decode { path, source } => {
                write!(f, "cannot decode {}: {source}", path.display())
            }
            Self::FileName { path, source } => {
                write!(f, "bad slice file name {}: {source}", path.display())
            }
            Self::DuplicateSlice {
                patient,
                kind,
                index,
            } => write!(
                f,
                "patient {patient}: duplicate {kind:?} slice index {index}"
            ),
            Self::InconsistentVolume {
                patient,
                images,
                masks,
            } => write!(
                f,
                "patient {patient}: {images} image slice(s) but {masks} mask slice(s)"
            ),
            Self::TooFewSlices { patient, count } => write!(
                f,
                "patient {patient}: {count} slice(s) is not enough to trim the edges"
            ),
            Self::SliceShape {
                patient,
                expected,
                found,
            } => write!(
                f,
                "patient {patient}: slice shape {found:?} differs from {expected:?}"
            ),
            Self::Empty(root) => write!(f, "no patient slices under {}", root.display()),
        }
    }
}

impl std::error::Error for ScanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Decode { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// 递归装配 `root` 下所有病人的体数据.
///
/// 每个直接含有 `.tif` 文件的目录装配为一个病人, 病人标识取目录名;
/// 不含切片的目录只作为中间结点继续下探. 返回值按病人标识升序排列,
/// 保证多次装配顺序一致.
pub fn assemble_volumes(root: &Path) -> Result<Vec<MriVolume>, ScanError> {
    let mut volumes = Vec::new();
    visit_dir(root, &mut volumes)?;
    if volumes.is_empty() {
        return Err(ScanError::Empty(root.to_owned()));
    }
    volumes.sort_by(|a, b| a.patient_id().cmp(b.patient_id()));
    log::debug!("assembled {} patient volume(s)", volumes.len());
    Ok(volumes)
}

fn visit_dir(dir: &Path, out: &mut Vec<MriVolume>) -> Result<(), ScanError> {
    let mut subdirs = Vec::new();
    let mut slices = Vec::new();

    let entries = fs::read_dir(dir).map_err(|source| ScanError::Io {
        path: dir.to_owned(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| ScanError::Io {
            path: dir.to_owned(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            subdirs.push(path);
        } else if path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case(SLICE_EXT))
        {
            slices.push(path);
        }
    }

    if !slices.is_empty() {
        let patient_id = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        out.push(assemble_patient(patient_id, &slices)?);
    }

    // 子目录按名字升序下探, 保证遍历顺序确定.
    subdirs.sort();
    for sub in &subdirs {
        visit_dir(sub, out)?;
    }
    Ok(())
}

/// 装配单个病人目录下的所有切片.
fn assemble_patient(patient_id: String, slices: &[PathBuf]) -> Result<MriVolume, ScanError> {
    let mut image_files: Vec<(u32, &PathBuf)> = Vec::new();
    let mut mask_files: Vec<(u32, &PathBuf)> = Vec::new();

    for path in slices {
        // read_dir 产生的路径一定有文件名部分, 可直接 unwrap.
        let file_name = path.file_name().unwrap().to_string_lossy();
        let parsed = parse_slice_name(&file_name).map_err(|source| ScanError::FileName {
            path: path.clone(),
            source,
        })?;
        if parsed.is_mask() {
            mask_files.push((parsed.index, path));
        } else {
            image_files.push((parsed.index, path));
        }
    }

    sort_and_check(&patient_id, SliceKind::Image, &mut image_files)?;
    sort_and_check(&patient_id, SliceKind::Mask, &mut mask_files)?;

    if image_files.len() != mask_files.len() {
        return Err(ScanError::InconsistentVolume {
            patient: patient_id,
            images: image_files.len(),
            masks: mask_files.len(),
        });
    }
    if image_files.len() < 3 {
        return Err(ScanError::TooFewSlices {
            patient: patient_id,
            count: image_files.len(),
        });
    }

    // 去掉首尾两张切片.
    let image_files = &image_files[1..image_files.len() - 1];
    let mask_files = &mask_files[1..mask_files.len() - 1];

    let images: Vec<Array3<f32>> = image_files
        .iter()
        .map(|(_, p)| read_image_slice(p))
        .collect::<Result<_, _>>()?;
    let masks: Vec<Array2<f32>> = mask_files
        .iter()
        .map(|(_, p)| read_mask_slice(p))
        .collect::<Result<_, _>>()?;

    stack_volume(patient_id, images, masks)
}

/// 按切片序号升序排序, 并拒绝重复序号.
fn sort_and_check(
    patient: &str,
    kind: SliceKind,
    files: &mut [(u32, &PathBuf)],
) -> Result<(), ScanError> {
    files.sort_unstable_by_key(|(index, _)| *index);
    if let Some(((index, _), _)) = files.iter().tuple_windows().find(|((a, _), (b, _))| a == b) {
        return Err(ScanError::DuplicateSlice {
            patient: patient.to_owned(),
            kind,
            index: *index,
        });
    }
    Ok(())
}

/// 将 `.tif` 图像切片读为 `(H, W, 3)` 的 `f32` 数组, 像素值 0..=255.
fn read_image_slice(path: &Path) -> Result<Array3<f32>, ScanError> {
    let rgb = image::open(path)
        .map_err(|source| ScanError::Decode {
            path: path.to_owned(),
            source,
        })?
        .into_rgb8();
    let (w, h) = rgb.dimensions();
    let data: Vec<f32> = rgb.into_raw().into_iter().map(f32::from).collect();
    // 行优先 (H, W, C) 布局, 长度一定匹配, 可直接 unwrap.
    Ok(Array3::from_shape_vec((h as usize, w as usize, 3), data).unwrap())
}

/// 将 `.tif` 掩膜切片读为 `(H, W)` 的二值 `f32` 数组.
///
/// 灰度值大于 [`mask::GRAY_THRESHOLD`] 的像素判定为前景.
fn read_mask_slice(path: &Path) -> Result<Array2<f32>, ScanError> {
    let gray = image::open(path)
        .map_err(|source| ScanError::Decode {
            path: path.to_owned(),
            source,
        })?
        .into_luma8();
    let (w, h) = gray.dimensions();
    let data: Vec<f32> = gray
        .into_raw()
        .into_iter()
        .map(|p| {
            if p > mask::GRAY_THRESHOLD {
                mask::FOREGROUND
            } else {
                mask::BACKGROUND
            }
        })
        .collect();
    // 同上, 长度一定匹配.
    Ok(Array2::from_shape_vec((h as usize, w as usize), data).unwrap())
}

/// 将逐切片数组堆叠为体数据, 同时校验空间尺寸一致.
fn stack_volume(
    patient_id: String,
    images: Vec<Array3<f32>>,
    masks: Vec<Array2<f32>>,
) -> Result<MriVolume, ScanError> {
    let (h, w, c) = images[0].dim();
    for img in &images {
        let (ih, iw, _) = img.dim();
        if (ih, iw) != (h, w) {
            return Err(ScanError::SliceShape {
                patient: patient_id,
                expected: (h, w),
                found: (ih, iw),
            });
        }
    }
    for m in &masks {
        if m.dim() != (h, w) {
            return Err(ScanError::SliceShape {
                patient: patient_id,
                expected: (h, w),
                found: m.dim(),
            });
        }
    }

    let s = images.len();
    let mut scan = Array4::<f32>::zeros((s, h, w, c));
    let mut mask = Array3::<f32>::zeros((s, h, w));
    for (z, sl) in images.iter().enumerate() {
        scan.index_axis_mut(Axis(0), z).assign(sl);
    }
    for (z, sl) in masks.iter().enumerate() {
        mask.index_axis_mut(Axis(0), z).assign(sl);
    }
    Ok(MriVolume::new(patient_id, scan, mask))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, RgbImage};
    use std::fs;
    use std::path::PathBuf;

    /// 每个测试独立的临时数据根目录.
    fn temp_root(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mri-berry-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_slice(dir: &Path, patient: &str, index: u32, is_mask: bool) {
        if is_mask {
            let mut img = GrayImage::new(16, 16);
            // 中央 4x4 前景块.
            for y in 6..10 {
                for x in 6..10 {
                    img.put_pixel(x, y, image::Luma([255]));
                }
            }
            img.save(dir.join(format!("{patient}_{index}_mask.tif"))).unwrap();
        } else {
            let img = RgbImage::from_fn(16, 16, |x, y| image::Rgb([x as u8, y as u8, index as u8]));
            img.save(dir.join(format!("{patient}_{index}.tif"))).unwrap();
        }
    }

    /// 病人标识嵌在文件名前缀中, 凑足 5 个下划线字段.
    const PATIENT: &str = "TCGA_CS_4941_19960909";

    fn write_patient(root: &Path, name: &str, slice_count: u32, mask_count: u32) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        for i in 0..slice_count {
            write_slice(&dir, PATIENT, i, false);
        }
        for i in 0..mask_count {
            write_slice(&dir, PATIENT, i, true);
        }
        dir
    }

    #[test]
    fn test_assemble_trims_edge_slices() {
        let root = temp_root("trim");
        write_patient(&root, "patient-b", 5, 5);
        write_patient(&root, "patient-a", 4, 4);

        let volumes = assemble_volumes(&root).unwrap();
        assert_eq!(volumes.len(), 2);
        // 病人按标识升序.
        assert_eq!(volumes[0].patient_id(), "patient-a");
        assert_eq!(volumes[1].patient_id(), "patient-b");
        // 首尾切片被去掉.
        assert_eq!(volumes[0].len_slices(), 4 - 2);
        assert_eq!(volumes[1].len_slices(), 5 - 2);
        assert_eq!(volumes[0].slice_shape(), (16, 16));

        // 掩膜阈值化后是二值的, 每张切片前景块为 4x4.
        assert_eq!(volumes[1].positive_counts(), vec![16.0, 16.0, 16.0]);

        // 去掉首张后, 第一张保留切片是原序号 1 (蓝通道值为 1).
        let slice = volumes[1].scan_slice_at(0);
        assert_eq!(slice[(0, 0, 2)], 1.0);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_assemble_recurses_and_skips_sliceless_dirs() {
        let root = temp_root("recurse");
        let nested = root.join("cohort").join("site-1");
        fs::create_dir_all(&nested).unwrap();
        write_patient(&nested, "p0", 3, 3);

        let volumes = assemble_volumes(&root).unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].patient_id(), "p0");
        assert_eq!(volumes[0].len_slices(), 1);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_assemble_detects_count_mismatch() {
        let root = temp_root("mismatch");
        write_patient(&root, "p0", 4, 3);

        match assemble_volumes(&root) {
            Err(ScanError::InconsistentVolume {
                patient,
                images,
                masks,
            }) => {
                assert_eq!(patient, "p0");
                assert_eq!((images, masks), (4, 3));
            }
            other => panic!("unexpected result: {other:?}"),
        }

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_assemble_rejects_too_few_slices() {
        let root = temp_root("short");
        write_patient(&root, "p0", 2, 2);

        assert!(matches!(
            assemble_volumes(&root),
            Err(ScanError::TooFewSlices { count: 2, .. })
        ));

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_assemble_rejects_bad_file_name() {
        let root = temp_root("badname");
        let dir = write_patient(&root, "p0", 3, 3);
        let img = RgbImage::new(16, 16);
        img.save(dir.join("extra.tif")).unwrap();

        assert!(matches!(
            assemble_volumes(&root),
            Err(ScanError::FileName { .. })
        ));

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_assemble_empty_root() {
        let root = temp_root("empty");
        assert!(matches!(assemble_volumes(&root), Err(ScanError::Empty(_))));
        fs::remove_dir_all(&root).unwrap();
    }
}
