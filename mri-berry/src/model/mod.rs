//! U-Net 分割模型与 Dice 损失.

pub mod dice;
pub mod unet;

pub use dice::{DiceLoss, DiceLossConfig};
pub use unet::{ConvBlock, UNet, UNetConfig, UpBlock};
