//! 几何联合增广.
//!
//! 对一个 (图像, 掩膜) 切片对施加同一组随机几何变换:
//! 旋转角从 `[-angle, +angle]` 度均匀抽取, 等比缩放因子从
//! `[1-scale, 1+scale]` 均匀抽取, 水平翻转按概率触发.
//! 图像通道用双线性插值, 掩膜用最近邻插值 (保持标签值),
//! 越界位置取零. 每次访问的随机抽取相互独立.
//!
//! 确定性的形变核心 [`warp_pair`] 独立于随机抽取暴露,
//! 便于验证空间对应关系.

use ndarray::{s, Array2, Array3};
use rand::Rng;

/// 随机几何联合变换的配置与执行器.
#[derive(Debug, Clone)]
pub struct JointTransform {
    angle_deg: f32,
    scale_delta: f32,
    flip_prob: f64,
}

impl JointTransform {
    /// 创建联合变换.
    ///
    /// `angle_deg` 为最大旋转角 (度, 非负), `scale_delta` 为最大
    /// 缩放偏移 (非负且小于 1), `flip_prob` 为水平翻转概率
    /// (0.0..=1.0). 参数越界时 panic.
    pub fn new(angle_deg: f32, scale_delta: f32, flip_prob: f64) -> Self {
        assert!(angle_deg >= 0.0, "旋转角上限必须非负");
        assert!(
            (0.0..1.0).contains(&scale_delta),
            "缩放偏移必须在 [0, 1) 内"
        );
        assert!((0.0..=1.0).contains(&flip_prob), "翻转概率必须在 [0, 1] 内");
        Self {
            angle_deg,
            scale_delta,
            flip_prob,
        }
    }

    /// 对一个 (图像, 掩膜) 对施加一次独立随机抽取的联合变换.
    ///
    /// 输出形状与输入一致.
    pub fn apply(&self, image: &Array3<f32>, mask: &Array2<f32>) -> (Array3<f32>, Array2<f32>) {
        let mut rng = rand::thread_rng();
        let angle = rng.gen_range(-self.angle_deg..=self.angle_deg);
        let scale = rng.gen_range(1.0 - self.scale_delta..=1.0 + self.scale_delta);
        let flip = rng.gen_bool(self.flip_prob);
        warp_pair(image, mask, angle, scale, flip)
    }
}

/// 确定性形变核心: 以切片中心为原点旋转 `angle_deg` 度并缩放
/// `scale` 倍, 然后按需水平翻转. 图像与掩膜使用完全相同的几何
/// 映射, 保证前景区域对应关系不变.
///
/// 图像形状须为 `(H, W, C)`, 掩膜为 `(H, W)`, 空间尺寸不一致时
/// panic. `scale` 必须为正.
pub fn warp_pair(
    image: &Array3<f32>,
    mask: &Array2<f32>,
    angle_deg: f32,
    scale: f32,
    flip: bool,
) -> (Array3<f32>, Array2<f32>) {
    let (h, w, channels) = image.dim();
    assert_eq!((h, w), mask.dim(), "图像与掩膜空间尺寸不一致");
    assert!(scale > 0.0, "缩放因子必须为正");

    let mut out_image = Array3::<f32>::zeros((h, w, channels));
    let mut out_mask = Array2::<f32>::zeros((h, w));

    let theta = angle_deg.to_radians();
    let (sin, cos) = theta.sin_cos();
    let center_y = (h as f32 - 1.0) * 0.5;
    let center_x = (w as f32 - 1.0) * 0.5;

    for i in 0..h {
        let dy = i as f32 - center_y;
        for j in 0..w {
            let dx = j as f32 - center_x;
            // 输出 = 旋转缩放(输入), 故反向映射回输入坐标.
            let src_y = (cos * dy - sin * dx) / scale + center_y;
            let src_x = (sin * dy + cos * dx) / scale + center_x;

            for ch in 0..channels {
                out_image[(i, j, ch)] = bilinear_at(image, src_y, src_x, ch);
            }
            out_mask[(i, j)] = nearest_at(mask, src_y, src_x);
        }
    }

    if flip {
        let out_image = out_image.slice(s![.., ..;-1, ..]).to_owned();
        let out_mask = out_mask.slice(s![.., ..;-1]).to_owned();
        return (out_image, out_mask);
    }
    (out_image, out_mask)
}

/// 双线性采样, 越界取零.
fn bilinear_at(image: &Array3<f32>, y: f32, x: f32, ch: usize) -> f32 {
    let (h, w, _) = image.dim();
    if y < 0.0 || x < 0.0 || y > (h - 1) as f32 || x > (w - 1) as f32 {
        return 0.0;
    }
    let y0 = y.floor() as usize;
    let x0 = x.floor() as usize;
    let y1 = (y0 + 1).min(h - 1);
    let x1 = (x0 + 1).min(w - 1);
    let fy = y - y0 as f32;
    let fx = x - x0 as f32;

    let top = image[(y0, x0, ch)] * (1.0 - fx) + image[(y0, x1, ch)] * fx;
    let bottom = image[(y1, x0, ch)] * (1.0 - fx) + image[(y1, x1, ch)] * fx;
    top * (1.0 - fy) + bottom * fy
}

/// 最近邻采样, 越界取零.
fn nearest_at(mask: &Array2<f32>, y: f32, x: f32) -> f32 {
    let (h, w) = mask.dim();
    let yi = y.round();
    let xi = x.round();
    if yi < 0.0 || xi < 0.0 || yi > (h - 1) as f32 || xi > (w - 1) as f32 {
        return 0.0;
    }
    mask[(yi as usize, xi as usize)]
}
