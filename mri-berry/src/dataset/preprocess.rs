//! 体数据预处理管线.
//!
//! 四个阶段顺序固定: 裁剪 -> 方形补零 -> 重采样 -> 标准化.
//! 裁剪必须先于补零/重采样, 避免把分辨率浪费在背景上;
//! 标准化必须使用重采样之后体数据的统计量.
//!
//! 裁剪的内容判据取图像与掩膜的并集: 只要任一通道像素值或掩膜值
//! 严格大于零, 该位置即视为内容. 这样保证裁剪永远不会切掉任何
//! 已标注区域.

use ndarray::{s, Array3, Array4, ArrayView2, ArrayViewMut2, Axis};

use crate::data::MriVolume;

/// 对一个病人体数据执行完整预处理.
///
/// `size` 为目标切片边长. 掩膜在重采样时使用最近邻插值,
/// 标准化阶段不会改动掩膜.
pub fn preprocess(volume: MriVolume, size: usize) -> MriVolume {
    normalize(resize(pad_to_square(crop_to_content(volume)), size))
}

/// 裁剪到最小包围盒.
///
/// 包围盒取整个体数据中所有内容位置 (图像任一通道或掩膜值大于零)
/// 在 `(H, W)` 平面上的最小外接矩形. 完全为零的体数据保持原状.
pub fn crop_to_content(volume: MriVolume) -> MriVolume {
    let (id, scan, mask) = volume.into_parts();
    let (slices, h, w, channels) = scan.dim();

    let (mut h_min, mut h_max) = (h, 0usize);
    let (mut w_min, mut w_max) = (w, 0usize);
    for z in 0..slices {
        for i in 0..h {
            for j in 0..w {
                let content = mask[(z, i, j)] > 0.0
                    || (0..channels).any(|k| scan[(z, i, j, k)] > 0.0);
                if content {
                    h_min = h_min.min(i);
                    h_max = h_max.max(i);
                    w_min = w_min.min(j);
                    w_max = w_max.max(j);
                }
            }
        }
    }

    // 全零体数据没有包围盒, 保持原状.
    if h_min > h_max {
        return MriVolume::new(id, scan, mask);
    }

    let scan = scan
        .slice(s![.., h_min..=h_max, w_min..=w_max, ..])
        .to_owned();
    let mask = mask.slice(s![.., h_min..=h_max, w_min..=w_max]).to_owned();
    MriVolume::new(id, scan, mask)
}

/// 对称补零到正方形, 内容居中. 多出来的一个像素补在尾侧.
pub fn pad_to_square(volume: MriVolume) -> MriVolume {
    let (id, scan, mask) = volume.into_parts();
    let (slices, h, w, channels) = scan.dim();
    if h == w {
        return MriVolume::new(id, scan, mask);
    }

    let side = h.max(w);
    let h_before = (side - h) / 2;
    let w_before = (side - w) / 2;

    let mut new_scan = Array4::<f32>::zeros((slices, side, side, channels));
    new_scan
        .slice_mut(s![.., h_before..h_before + h, w_before..w_before + w, ..])
        .assign(&scan);
    let mut new_mask = Array3::<f32>::zeros((slices, side, side));
    new_mask
        .slice_mut(s![.., h_before..h_before + h, w_before..w_before + w])
        .assign(&mask);
    MriVolume::new(id, new_scan, new_mask)
}

/// 将每张切片重采样到 `size x size`.
///
/// 图像通道用双线性插值, 掩膜用最近邻插值 (保持二值).
pub fn resize(volume: MriVolume, size: usize) -> MriVolume {
    let (id, scan, mask) = volume.into_parts();
    let (slices, h, w, channels) = scan.dim();
    if (h, w) == (size, size) {
        return MriVolume::new(id, scan, mask);
    }

    let mut new_scan = Array4::<f32>::zeros((slices, size, size, channels));
    let mut new_mask = Array3::<f32>::zeros((slices, size, size));
    for z in 0..slices {
        let src = scan.index_axis(Axis(0), z);
        let mut dst = new_scan.index_axis_mut(Axis(0), z);
        for ch in 0..channels {
            let src_ch = src.index_axis(Axis(2), ch);
            let mut dst_ch = dst.index_axis_mut(Axis(2), ch);
            bilinear_resize(src_ch, &mut dst_ch);
        }
        let mut dst_mask = new_mask.index_axis_mut(Axis(0), z);
        nearest_resize(mask.index_axis(Axis(0), z), &mut dst_mask);
    }
    MriVolume::new(id, new_scan, new_mask)
}

/// 图像栈逐通道标准化: 减去通道均值, 除以通道标准差.
/// 统计量在当前体数据上计算. 掩膜保持不变.
///
/// 某个通道方差为零说明数据退化, 程序直接 panic.
pub fn normalize(volume: MriVolume) -> MriVolume {
    let (id, mut scan, mask) = volume.into_parts();
    let channels = scan.dim().3;
    for ch in 0..channels {
        let (mean, std) = {
            let view = scan.index_axis(Axis(3), ch);
            let n = view.len() as f32;
            let mean = view.sum() / n;
            let var = view.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
            (mean, var.sqrt())
        };
        assert!(
            std > 0.0,
            "病人 {id} 的图像通道 {ch} 方差为零, 无法标准化"
        );
        scan.index_axis_mut(Axis(3), ch)
            .mapv_inplace(|v| (v - mean) / std);
    }
    MriVolume::new(id, scan, mask)
}

/// 把 `(i + 0.5) * scale - 0.5` 形式的像素中心映射限制在合法范围内.
#[inline]
fn source_coord(i: usize, scale: f32, max: usize) -> f32 {
    ((i as f32 + 0.5) * scale - 0.5).clamp(0.0, (max - 1) as f32)
}

fn bilinear_resize(src: ArrayView2<f32>, dst: &mut ArrayViewMut2<f32>) {
    let (sh, sw) = src.dim();
    let (dh, dw) = dst.dim();
    let scale_h = sh as f32 / dh as f32;
    let scale_w = sw as f32 / dw as f32;

    for i in 0..dh {
        let sy = source_coord(i, scale_h, sh);
        let y0 = sy.floor() as usize;
        let y1 = (y0 + 1).min(sh - 1);
        let fy = sy - y0 as f32;
        for j in 0..dw {
            let sx = source_coord(j, scale_w, sw);
            let x0 = sx.floor() as usize;
            let x1 = (x0 + 1).min(sw - 1);
            let fx = sx - x0 as f32;

            let top = src[(y0, x0)] * (1.0 - fx) + src[(y0, x1)] * fx;
            let bottom = src[(y1, x0)] * (1.0 - fx) + src[(y1, x1)] * fx;
            dst[(i, j)] = top * (1.0 - fy) + bottom * fy;
        }
    }
}

fn nearest_resize(src: ArrayView2<f32>, dst: &mut ArrayViewMut2<f32>) {
    let (sh, sw) = src.dim();
    let (dh, dw) = dst.dim();
    let scale_h = sh as f32 / dh as f32;
    let scale_w = sw as f32 / dw as f32;

    for i in 0..dh {
        let y = source_coord(i, scale_h, sh).round() as usize;
        for j in 0..dw {
            let x = source_coord(j, scale_w, sw).round() as usize;
            dst[(i, j)] = src[(y, x)];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Array4};

    fn float_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    /// 一个已经是方形、内容充满全幅的体数据.
    fn canonical_volume(side: usize) -> MriVolume {
        let mut scan = Array4::<f32>::zeros((2, side, side, 3));
        // 四角与中心都有内容, 包围盒即全幅.
        scan.fill(10.0);
        let mut mask = Array3::<f32>::zeros((2, side, side));
        mask[(0, side / 2, side / 2)] = 1.0;
        MriVolume::new("p0", scan, mask)
    }

    #[test]
    fn test_crop_pad_resize_idempotent_on_canonical_volume() {
        let volume = canonical_volume(8);
        let expected_scan = volume.scan().to_owned();
        let expected_mask = volume.mask().to_owned();

        let out = resize(pad_to_square(crop_to_content(volume)), 8);
        assert_eq!(out.scan(), expected_scan);
        assert_eq!(out.mask(), expected_mask);
    }

    #[test]
    fn test_crop_uses_image_and_mask_union() {
        let mut scan = Array4::<f32>::zeros((1, 10, 10, 3));
        let mut mask = Array3::<f32>::zeros((1, 10, 10));
        // 图像内容在 (2, 3), 掩膜内容在 (7, 5): 包围盒是二者并集.
        scan[(0, 2, 3, 1)] = 5.0;
        mask[(0, 7, 5)] = 1.0;

        let out = crop_to_content(MriVolume::new("p0", scan, mask));
        assert_eq!(out.slice_shape(), (6, 3)); // 行 2..=7, 列 3..=5
        assert!(float_eq(out.scan()[(0, 0, 0, 1)], 5.0));
        assert!(float_eq(out.mask()[(0, 5, 2)], 1.0));
    }

    #[test]
    fn test_crop_keeps_all_zero_volume() {
        let scan = Array4::<f32>::zeros((1, 4, 6, 3));
        let mask = Array3::<f32>::zeros((1, 4, 6));
        let out = crop_to_content(MriVolume::new("p0", scan, mask));
        assert_eq!(out.slice_shape(), (4, 6));
    }

    #[test]
    fn test_pad_centers_content() {
        let mut scan = Array4::<f32>::zeros((1, 2, 6, 3));
        scan.fill(1.0);
        let mut mask = Array3::<f32>::zeros((1, 2, 6));
        mask.fill(1.0);

        let out = pad_to_square(MriVolume::new("p0", scan, mask));
        assert_eq!(out.slice_shape(), (6, 6));
        // 高度方向补 4 行: 前 2 后 2.
        assert!(float_eq(out.mask()[(0, 1, 0)], 0.0));
        assert!(float_eq(out.mask()[(0, 2, 0)], 1.0));
        assert!(float_eq(out.mask()[(0, 3, 0)], 1.0));
        assert!(float_eq(out.mask()[(0, 4, 0)], 0.0));
    }

    #[test]
    fn test_resize_constant_image_and_binary_mask() {
        let mut scan = Array4::<f32>::zeros((1, 4, 4, 3));
        scan.fill(3.0);
        let mut mask = Array3::<f32>::zeros((1, 4, 4));
        mask.slice_mut(s![0, .., ..]).fill(1.0);

        let out = resize(MriVolume::new("p0", scan, mask), 8);
        assert_eq!(out.slice_shape(), (8, 8));
        // 常数图像双线性插值后仍为常数.
        assert!(out.scan().iter().all(|v| float_eq(*v, 3.0)));
        // 掩膜最近邻插值后仍为二值.
        assert!(out.mask().iter().all(|v| *v == 0.0 || *v == 1.0));
        assert!(float_eq(out.mask()[(0, 4, 4)], 1.0));
    }

    #[test]
    fn test_normalize_standardizes_channels() {
        let mut scan = Array4::<f32>::zeros((1, 2, 2, 3));
        for (i, v) in scan.iter_mut().enumerate() {
            *v = i as f32;
        }
        let mask = Array3::<f32>::zeros((1, 2, 2));

        let out = normalize(MriVolume::new("p0", scan, mask));
        for ch in 0..3 {
            let view = out.scan().index_axis_move(Axis(3), ch).to_owned();
            let n = view.len() as f32;
            let mean = view.sum() / n;
            let var = view.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
            assert!(float_eq(mean, 0.0));
            assert!(float_eq(var, 1.0));
        }
        // 掩膜不受标准化影响.
        assert!(out.mask().iter().all(|v| *v == 0.0));
    }

    #[test]
    #[should_panic(expected = "方差为零")]
    fn test_normalize_rejects_constant_channel() {
        let scan = Array4::<f32>::zeros((1, 2, 2, 3));
        let mask = Array3::<f32>::zeros((1, 2, 2));
        let _ = normalize(MriVolume::new("p0", scan, mask));
    }
}
