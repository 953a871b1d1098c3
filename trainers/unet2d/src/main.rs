//! 脑部 MRI FLAIR 异常分割 U-Net 训练入口.
//!
//! 计算后端在编译期选择: 默认使用 ndarray CPU 后端;
//! 打开 `wgpu` feature 后使用 GPU (wgpu) 后端.
//!
//! 运行时配置通过环境变量给出:
//!
//! 1. `$BRAIN_MRI_DATA_DIR` -- 数据根目录. 缺省为
//!   `$HOME/dataset/lgg-mri-segmentation`.
//! 2. `$BRAIN_MRI_ARTIFACT_DIR` -- 产物输出目录. 缺省为
//!   `./artifacts`.

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use burn::backend::Autodiff;
use burn::optim::AdamConfig;
use mri_berry::prelude::*;

#[cfg(feature = "wgpu")]
type Back = burn::backend::Wgpu;

#[cfg(not(feature = "wgpu"))]
type Back = burn::backend::NdArray;

#[cfg(feature = "wgpu")]
fn select_device() -> burn::backend::wgpu::WgpuDevice {
    burn::backend::wgpu::WgpuDevice::default()
}

#[cfg(not(feature = "wgpu"))]
fn select_device() -> burn::backend::ndarray::NdArrayDevice {
    burn::backend::ndarray::NdArrayDevice::Cpu
}

/// 获取数据根目录.
///
/// 1. 若环境变量 `$BRAIN_MRI_DATA_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/lgg-mri-segmentation`.
fn data_dir_from_env_or_home() -> PathBuf {
    if let Ok(d) = env::var("BRAIN_MRI_DATA_DIR") {
        PathBuf::from(d)
    } else {
        home_dataset_dir_with(["lgg-mri-segmentation"]).expect("Home directory not found")
    }
}

/// 获取产物输出目录.
fn artifact_dir_from_env() -> PathBuf {
    match env::var("BRAIN_MRI_ARTIFACT_DIR") {
        Ok(d) => PathBuf::from(d),
        Err(_) => PathBuf::from("artifacts"),
    }
}

fn main() -> ExitCode {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .env()
        .init()
        .expect("Logger init error");

    let data_dir = data_dir_from_env_or_home();
    let artifact_dir = artifact_dir_from_env();
    let config = TrainingConfig::new(UNetConfig::new(), AdamConfig::new());

    log::info!("data dir: {}", data_dir.display());
    log::info!("artifact dir: {}", artifact_dir.display());

    match train::<Autodiff<Back>>(&artifact_dir, &data_dir, config, select_device()) {
        Ok(summary) => {
            log::info!(
                "run finished: {} epoch(s), mean valid dice loss {:.4}",
                summary.epochs,
                summary.mean_valid_loss
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("training aborted: {e}");
            ExitCode::FAILURE
        }
    }
}
