//! 样本批量化.
//!
//! 把一组 [`SliceSample`] 转换为目标设备上的 4D 张量批:
//! 图像 `(N, C, H, W)`, 掩膜 `(N, 1, H, W)`.

use burn::data::dataloader::batcher::Batcher;
use burn::tensor::backend::Backend;
use burn::tensor::{Shape, Tensor, TensorData};
use ndarray::Array3;

use crate::data::SliceSample;

/// (图像, 掩膜) 切片批量化器.
#[derive(Clone, Debug, Default)]
pub struct SliceBatcher;

/// 一个训练批: 图像与掩膜张量位于同一设备.
#[derive(Clone, Debug)]
pub struct SliceBatch<B: Backend> {
    /// 图像批, `(N, C, H, W)`.
    pub images: Tensor<B, 4>,

    /// 掩膜批, `(N, 1, H, W)`.
    pub masks: Tensor<B, 4>,
}

impl<B: Backend> Batcher<B, SliceSample, SliceBatch<B>> for SliceBatcher {
    fn batch(&self, items: Vec<SliceSample>, device: &B::Device) -> SliceBatch<B> {
        let images = items
            .iter()
            .map(|sample| array3_to_tensor::<B>(&sample.image, device))
            .collect();
        let masks = items
            .iter()
            .map(|sample| array3_to_tensor::<B>(&sample.mask, device))
            .collect();

        SliceBatch {
            images: Tensor::stack(images, 0),
            masks: Tensor::stack(masks, 0),
        }
    }
}

/// 把一个 `(C, H, W)` 数组搬运为设备上的 3D 张量.
fn array3_to_tensor<B: Backend>(array: &Array3<f32>, device: &B::Device) -> Tensor<B, 3> {
    let (c, h, w) = array.dim();
    let data: Vec<f32> = array.as_standard_layout().iter().copied().collect();
    Tensor::from_data(
        TensorData::new(data, Shape::new([c, h, w])).convert::<B::FloatElem>(),
        device,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};

    type TestBackend = burn::backend::NdArray;

    #[test]
    fn test_batch_shapes_and_values() {
        let device = Default::default();
        let mut image = Array3::<f32>::zeros((4, 5, 3));
        image[(0, 0, 0)] = 42.0;
        let mut mask = Array2::<f32>::zeros((4, 5));
        mask[(2, 3)] = 1.0;
        let sample = SliceSample::from_hwc(image, mask);

        let batch: SliceBatch<TestBackend> =
            SliceBatcher.batch(vec![sample.clone(), sample], &device);
        assert_eq!(batch.images.dims(), [2, 3, 4, 5]);
        assert_eq!(batch.masks.dims(), [2, 1, 4, 5]);

        let images = batch.images.into_data().to_vec::<f32>().unwrap();
        // 批内第一个样本, 通道 0, 像素 (0, 0).
        assert_eq!(images[0], 42.0);
        let masks = batch.masks.into_data().to_vec::<f32>().unwrap();
        assert_eq!(masks[2 * 5 + 3], 1.0);
    }
}
