#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 提供脑部 MRI FLAIR 数据集的结构化加载、预处理、采样与
//! U-Net 语义分割训练功能.
//!
//! 数据假设按照 LGG (lower-grade glioma) MRI 数据集的模式组织:
//! 根目录下每个病人一个子目录, 子目录内为按序编号的 2D 切片
//! (`.tif` 文件), 掩膜切片的文件名含有 `mask` 标记.
//!
//! # 注意
//!
//! 1. 该 crate 目前仅针对上述目录布局做了直接适配
//!   (但若新数据按照相同模式组织, 也可以工作).
//! 2. 数据集装配阶段的 I/O 与一致性问题以 `Result` 形式返回;
//!   其余非期望情况下 (如张量形状不合法), 程序会直接 panic,
//!   而不会导致内存错误. As what Rust promises.
//!
//! # 开发计划
//!
//! ### 切片文件名文法解析 ✅
//!
//! 将原先隐式的字符串切分替换为显式的、可测试的文法解析器.
//!
//! 实现位于 `mri-berry/src/dataset/filename.rs`.
//!
//! ### 病人体数据装配 ✅
//!
//! 递归扫描目录树, 将每个病人的切片分组、排序并装配成 3D 体数据,
//! 去掉首尾两张标注稀疏的切片.
//!
//! 实现位于 `mri-berry/src/dataset/assemble.rs`.
//!
//! ### 体数据预处理管线 ✅
//!
//! 裁剪 (crop) -> 方形补零 (pad) -> 重采样 (resize) -> 标准化
//! (normalize), 顺序固定.
//!
//! 实现位于 `mri-berry/src/dataset/preprocess.rs`.
//!
//! ### 切片采样权重与全局索引 ✅
//!
//! 按掩膜前景面积为每张切片分配采样概率, 同时建立确定性迭代所需的
//! (病人, 切片) 扁平索引.
//!
//! 实现位于 `mri-berry/src/dataset/weights.rs`.
//!
//! ### 几何联合增广 ✅
//!
//! 随机旋转 / 等比缩放 / 水平翻转, 对图像与掩膜使用同一组随机参数,
//! 保证空间对应关系.
//!
//! 实现位于 `mri-berry/src/augment.rs`.
//!
//! ### U-Net 模型与 Dice 损失 ✅
//!
//! 编码器-解码器结构与可微重叠度损失, 基于 burn 模块系统实现.
//!
//! 实现位于 `mri-berry/src/model/*`.
//!
//! ### 训练循环与产物输出 ✅
//!
//! 自定义训练循环 (前向 / Dice 损失 / 反向 / Adam 步进),
//! 训练结束后输出模型参数快照、配置与运行摘要.
//!
//! 实现位于 `mri-berry/src/train.rs`.

/// 二维索引. 在本 crate 中既用作 (行, 列) 像素坐标,
/// 也用作 (病人, 切片) 采样坐标.
pub type Idx2d = (usize, usize);

/// 三维索引.
pub type Idx3d = (usize, usize, usize);

/// 脑部 MRI 体数据基础结构.
mod data;

pub use data::{MriVolume, SliceSample};

pub mod consts;

pub mod augment;
pub mod dataset;
pub mod model;
pub mod prelude;
pub mod train;
