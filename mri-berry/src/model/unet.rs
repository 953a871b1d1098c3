//! U-Net 编码器-解码器分割网络.
//!
//! 编码路径共 `depth` 级, 每级为两个 3x3 (padding 1) 卷积 + ReLU,
//! 通道数从 `2^filter_power` 起逐级翻倍; 除最后一级外, 每级输出
//! 在 2x2 最大池化前保留为 skip connection. 解码路径共 `depth-1`
//! 级, 每级先用 2x2 步长 2 的转置卷积上采样并把通道数减半, 与对应
//! 的 skip connection 沿通道拼接后, 再过一个与编码级相同结构的双
//! 卷积块. 输出头为 1x1 卷积, 产生与输入同空间尺寸的未归一化
//! logits.
//!
//! skip connection 按创建的逆序消费: 最后保留的编码特征与第一个
//! 解码级配对. 输入空间尺寸必须能被 `2^(depth-1)` 整除, 否则池化
//! 与上采样无法对齐, 前向会在进入任何卷积之前直接 panic,
//! 绝不静默产出错误形状.

use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{PaddingConfig2d, Relu};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// U-Net 结构配置.
#[derive(Config, Debug)]
pub struct UNetConfig {
    /// 输入图像通道数.
    #[config(default = 3)]
    pub in_channels: usize,

    /// 输出掩膜通道数.
    #[config(default = 1)]
    pub out_channels: usize,

    /// 编码级数.
    #[config(default = 5)]
    pub depth: usize,

    /// 第一级的通道数指数: 基础通道数为 `2^filter_power`.
    #[config(default = 6)]
    pub filter_power: usize,
}

impl UNetConfig {
    /// 在给定设备上初始化模型.
    ///
    /// `depth` 为零时 panic.
    pub fn init<B: Backend>(&self, device: &B::Device) -> UNet<B> {
        assert!(self.depth >= 1, "U-Net 编码级数必须至少为 1");

        let mut down_path = Vec::with_capacity(self.depth);
        let mut prev = self.in_channels;
        for i in 0..self.depth {
            let out = 1usize << (self.filter_power + i);
            down_path.push(ConvBlock::new(prev, out, device));
            prev = out;
        }

        let mut up_path = Vec::with_capacity(self.depth - 1);
        for i in (0..self.depth - 1).rev() {
            let out = 1usize << (self.filter_power + i);
            up_path.push(UpBlock::new(prev, out, device));
            prev = out;
        }

        UNet {
            depth: self.depth,
            down_path,
            up_path,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            last: Conv2dConfig::new([prev, self.out_channels], [1, 1]).init(device),
        }
    }
}

/// U-Net 分割网络.
#[derive(Module, Debug)]
pub struct UNet<B: Backend> {
    depth: usize,
    down_path: Vec<ConvBlock<B>>,
    up_path: Vec<UpBlock<B>>,
    pool: MaxPool2d,
    last: Conv2d<B>,
}

impl<B: Backend> UNet<B> {
    /// 前向传播.
    ///
    /// 输入形状 `(N, in_channels, H, W)`, 输出形状
    /// `(N, out_channels, H, W)`. `H` 和 `W` 必须能被
    /// `2^(depth-1)` 整除, 否则 panic.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, h, w] = x.dims();
        let stride = 1usize << (self.depth - 1);
        assert!(
            h % stride == 0 && w % stride == 0,
            "输入空间尺寸 ({h}, {w}) 不能被 2^(depth-1) = {stride} 整除"
        );

        let mut x = x;
        let mut skips: Vec<Tensor<B, 4>> = Vec::with_capacity(self.depth - 1);
        for (i, down) in self.down_path.iter().enumerate() {
            x = down.forward(x);
            log::trace!("down[{i}] output {:?}", x.dims());
            if i != self.down_path.len() - 1 {
                skips.push(x.clone());
                x = self.pool.forward(x);
                log::trace!("down[{i}] pooled {:?}", x.dims());
            }
        }

        for (i, up) in self.up_path.iter().enumerate() {
            // skip 按创建逆序消费, 计数保证非空, 可直接 unwrap.
            let skip = skips.pop().unwrap();
            x = up.forward(x, skip);
            log::trace!("up[{i}] output {:?}", x.dims());
        }

        self.last.forward(x)
    }
}

/// 编码/解码共用的双卷积块: (3x3 conv + ReLU) x 2.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    activation: Relu,
}

impl<B: Backend> ConvBlock<B> {
    /// 创建 `in_channels -> out_channels` 的双卷积块.
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv1 = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let conv2 = Conv2dConfig::new([out_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        Self {
            conv1,
            conv2,
            activation: Relu::new(),
        }
    }

    /// 前向传播, 保持空间尺寸不变.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.activation.forward(self.conv1.forward(x));
        self.activation.forward(self.conv2.forward(x))
    }
}

/// 解码级: 转置卷积上采样 + skip 拼接 + 双卷积块.
#[derive(Module, Debug)]
pub struct UpBlock<B: Backend> {
    up: ConvTranspose2d<B>,
    conv_block: ConvBlock<B>,
}

impl<B: Backend> UpBlock<B> {
    /// 创建 `in_channels -> out_channels` 的解码级.
    ///
    /// 拼接后的通道数等于 `in_channels` (上采样输出 + skip 各占
    /// `out_channels`), 故双卷积块仍是 `in_channels -> out_channels`.
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let up = ConvTranspose2dConfig::new([in_channels, out_channels], [2, 2])
            .with_stride([2, 2])
            .init(device);
        Self {
            up,
            conv_block: ConvBlock::new(in_channels, out_channels, device),
        }
    }

    /// 前向传播: 上采样 `x`, 与 `skip` 沿通道拼接后卷积.
    ///
    /// 两者空间尺寸对不齐时由底层张量操作 panic.
    pub fn forward(&self, x: Tensor<B, 4>, skip: Tensor<B, 4>) -> Tensor<B, 4> {
        let up = self.up.forward(x);
        log::trace!("upsampled {:?}, skip {:?}", up.dims(), skip.dims());
        let x = Tensor::cat(vec![up, skip], 1);
        self.conv_block.forward(x)
    }
}
