//! Dice 损失.
//!
//! 以 Dice 系数 (预测与真值掩膜的重叠度, 取值 [0, 1]) 的补作为
//! 可微损失: `loss = 1 - (2 * 交集 + smooth) / (和 + smooth)`.
//! 平滑常数避免全空掩膜导致的除零.

use burn::config::Config;
use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// [Dice 损失](DiceLoss) 配置.
#[derive(Config, Debug)]
pub struct DiceLossConfig {
    /// 平滑常数.
    #[config(default = 1.0)]
    pub smooth: f32,
}

impl DiceLossConfig {
    /// 初始化 [Dice 损失](DiceLoss).
    pub fn init(&self) -> DiceLoss {
        self.assertions();
        DiceLoss {
            smooth: self.smooth,
        }
    }

    fn assertions(&self) {
        assert!(self.smooth >= 0.0, "Dice 平滑常数必须非负");
    }
}

/// 计算预测掩膜与真值掩膜之间的 Dice 损失.
#[derive(Module, Debug, Clone)]
pub struct DiceLoss {
    /// 平滑常数.
    pub smooth: f32,
}

impl Default for DiceLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl DiceLoss {
    /// 以默认平滑常数 (1.0) 创建.
    pub fn new() -> Self {
        DiceLossConfig::new().init()
    }

    /// 计算损失.
    ///
    /// 取两个输入的第 0 个输出通道展平为一维后计算 Dice 系数.
    /// 两个输入形状必须完全一致, 否则 panic.
    ///
    /// # Shapes
    ///
    /// - y_pred: `(N, C, H, W)`
    /// - y_true: `(N, C, H, W)`
    /// - output: `(1,)`
    pub fn forward<B: Backend>(&self, y_pred: Tensor<B, 4>, y_true: Tensor<B, 4>) -> Tensor<B, 1> {
        assert_eq!(
            y_pred.dims(),
            y_true.dims(),
            "预测与真值掩膜形状不一致"
        );

        let pred = y_pred.narrow(1, 0, 1).flatten::<1>(0, 3);
        let target = y_true.narrow(1, 0, 1).flatten::<1>(0, 3);

        let intersection = (pred.clone() * target.clone()).sum();
        let dsc = (intersection * 2.0 + self.smooth) / (pred.sum() + target.sum() + self.smooth);
        dsc.neg() + 1.0
    }
}
