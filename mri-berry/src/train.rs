//! 训练循环.
//!
//! 自定义的逐批训练: 前向 -> Dice 损失 -> 反向 -> Adam 步进.
//! 数据加载由 burn 的多 worker `DataLoader` 完成, worker 只读共享
//! 预处理后的体数据; 只有主线程会改动模型参数, 且同一时刻至多有
//! 一次梯度计算. 任何阶段的不可恢复错误都会中止整个训练,
//! 没有重试逻辑.
//!
//! 训练结束后在产物目录写出三件产物: 模型参数快照 (`model.mpk`),
//! 训练配置 (`config.json`) 与运行摘要 (`summary.json`).

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Instant;

use burn::config::Config;
use burn::data::dataloader::DataLoaderBuilder;
use burn::module::{AutodiffModule, Module};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::record::{CompactRecorder, RecorderError};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use serde::Serialize;

use crate::augment::JointTransform;
use crate::dataset::{AccessMode, BrainMriDataset, ScanError, SliceBatcher, VolumeStore};
use crate::model::{DiceLoss, UNet, UNetConfig};

/// 一次训练运行的完整配置.
///
/// 配置不可变, 在构造数据集与训练循环时按值传入;
/// 训练开始时会以 JSON 形式存档.
#[derive(Config)]
pub struct TrainingConfig {
    /// 模型结构配置.
    pub model: UNetConfig,

    /// 优化器配置.
    pub optimizer: AdamConfig,

    /// 训练轮数.
    #[config(default = 1)]
    pub num_epochs: usize,

    /// 批大小.
    #[config(default = 4)]
    pub batch_size: usize,

    /// 数据加载 worker 数.
    #[config(default = 4)]
    pub num_workers: usize,

    /// 随机种子.
    #[config(default = 42)]
    pub seed: u64,

    /// 学习率.
    #[config(default = 1e-4)]
    pub learning_rate: f64,

    /// 预处理目标切片边长.
    #[config(default = 256)]
    pub image_size: usize,

    /// 增广最大缩放偏移.
    #[config(default = 0.05)]
    pub aug_scale: f32,

    /// 增广最大旋转角 (度).
    #[config(default = 15.0)]
    pub aug_angle: f32,

    /// 增广水平翻转概率.
    #[config(default = 0.5)]
    pub flip_prob: f64,
}

/// 训练运行错误.
#[derive(Debug)]
pub enum TrainError {
    /// 数据集装配失败.
    Scan(ScanError),

    /// 产物目录或文件写入失败.
    Io(std::io::Error),

    /// 模型参数快照写出失败.
    Recorder(RecorderError),
}

impl fmt::Display for TrainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scan(e) => write!(f, "dataset construction failed: {e}"),
            Self::Io(e) => write!(f, "artifact I/O failed: {e}"),
            Self::Recorder(e) => write!(f, "model snapshot failed: {e}"),
        }
    }
}

impl std::error::Error for TrainError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Scan(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Recorder(e) => Some(e),
        }
    }
}

impl From<ScanError> for TrainError {
    fn from(e: ScanError) -> Self {
        Self::Scan(e)
    }
}

/// 一次训练运行的摘要, 以 JSON 形式随模型快照一同存档.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// 实际完成的轮数.
    pub epochs: usize,

    /// 最后一轮的训练批数.
    pub train_batches: usize,

    /// 最后一个训练批的 Dice 损失.
    pub final_train_loss: f32,

    /// 最后一轮的验证批数.
    pub valid_batches: usize,

    /// 最后一轮验证集的平均 Dice 损失.
    pub mean_valid_loss: f32,

    /// 运行耗时 (秒).
    pub duration_secs: f64,
}

/// 执行一次完整训练.
///
/// 训练集以加权随机模式访问并施加联合增广, 验证集以确定性模式
/// 访问且不增广; 两者共享同一份预处理体数据. 每轮先训练后验证,
/// 验证阶段不跟踪梯度、不更新参数.
pub fn train<B: AutodiffBackend>(
    artifact_dir: &Path,
    data_dir: &Path,
    config: TrainingConfig,
    device: B::Device,
) -> Result<RunSummary, TrainError> {
    let started = Instant::now();
    fs::create_dir_all(artifact_dir).map_err(TrainError::Io)?;
    config
        .save(artifact_dir.join("config.json"))
        .map_err(TrainError::Io)?;
    B::seed(config.seed);

    let store = VolumeStore::from_dir(data_dir, config.image_size)?;
    log::info!(
        "dataset ready: {} patient(s), {} slice(s)",
        store.num_patients(),
        store.num_slices()
    );

    let transform = JointTransform::new(config.aug_angle, config.aug_scale, config.flip_prob);
    let train_ds = BrainMriDataset::new(store.clone(), AccessMode::WeightedRandom, Some(transform));
    let valid_ds = BrainMriDataset::new(store, AccessMode::Deterministic, None);

    let loader_train = DataLoaderBuilder::new(SliceBatcher)
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .set_device(device.clone())
        .build(train_ds);
    let loader_valid = DataLoaderBuilder::new(SliceBatcher)
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .set_device(device.clone())
        .build(valid_ds);

    let mut model: UNet<B> = config.model.init(&device);
    let mut optim = config.optimizer.init::<B, UNet<B>>();
    let dice = DiceLoss::new();

    let mut final_train_loss = 0.0f32;
    let mut train_batches = 0usize;
    let mut valid_batches = 0usize;
    let mut mean_valid_loss = 0.0f32;

    for epoch in 1..=config.num_epochs {
        log::info!("epoch {epoch}/{}", config.num_epochs);
        train_batches = 0;

        for (iteration, batch) in loader_train.iter().enumerate() {
            let output = model.forward(batch.images);
            let loss = dice.forward(output, batch.masks);
            let loss_value = loss.clone().into_scalar().elem::<f32>();
            log::info!("[train] epoch {epoch} iteration {iteration} dice loss {loss_value:.4}");

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(config.learning_rate, model, grads);

            final_train_loss = loss_value;
            train_batches += 1;
        }

        // 验证阶段: 去掉自动微分, 不更新参数.
        let model_valid = model.valid();
        let mut loss_sum = 0.0f32;
        let mut sample_count = 0usize;
        valid_batches = 0;
        for batch in loader_valid.iter() {
            let n = batch.images.dims()[0];
            let output = model_valid.forward(batch.images);
            let loss = dice.forward(output, batch.masks);
            loss_sum += loss.into_scalar().elem::<f32>() * n as f32;
            sample_count += n;
            valid_batches += 1;
        }
        if sample_count > 0 {
            mean_valid_loss = loss_sum / sample_count as f32;
        }
        log::info!("[valid] epoch {epoch} mean dice loss {mean_valid_loss:.4}");
    }

    model
        .save_file(artifact_dir.join("model"), &CompactRecorder::new())
        .map_err(TrainError::Recorder)?;

    let summary = RunSummary {
        epochs: config.num_epochs,
        train_batches,
        final_train_loss,
        valid_batches,
        mean_valid_loss,
        duration_secs: started.elapsed().as_secs_f64(),
    };
    // 纯数据结构序列化不会生成 Err, 可直接 unwrap.
    let json = serde_json::to_string_pretty(&summary).unwrap();
    fs::write(artifact_dir.join("summary.json"), json).map_err(TrainError::Io)?;

    log::info!(
        "training done in {:.1}s, artifacts under {}",
        summary.duration_secs,
        artifact_dir.display()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use image::{GrayImage, RgbImage};
    use std::path::PathBuf;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mri-berry-train-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// 在 `root` 下写一个 4 切片的合成病人.
    fn write_patient(root: &Path, name: &str) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        for i in 0..4u32 {
            let img = RgbImage::from_fn(16, 16, |x, y| {
                image::Rgb([(x * 10) as u8, (y * 10) as u8, (i + 1) as u8])
            });
            img.save(dir.join(format!("TCGA_XX_0000_19990101_{i}.tif")))
                .unwrap();

            let mut m = GrayImage::new(16, 16);
            for y in 6..10 {
                for x in 6..10 {
                    m.put_pixel(x, y, image::Luma([255]));
                }
            }
            m.save(dir.join(format!("TCGA_XX_0000_19990101_{i}_mask.tif")))
                .unwrap();
        }
    }

    #[test]
    fn test_end_to_end_training_run() {
        // 重复初始化会失败, 忽略即可.
        let _ = simple_logger::SimpleLogger::new()
            .with_level(log::LevelFilter::Info)
            .init();

        let data_dir = temp_dir("data");
        let artifact_dir = temp_dir("artifacts");
        write_patient(&data_dir, "patient-0");
        write_patient(&data_dir, "patient-1");

        // 小模型 + 小分辨率, 只验证整条链路能跑通并落盘.
        let config = TrainingConfig::new(
            UNetConfig::new().with_depth(2).with_filter_power(1),
            AdamConfig::new(),
        )
        .with_num_epochs(1)
        .with_batch_size(2)
        .with_num_workers(1)
        .with_image_size(16);

        let summary =
            train::<Autodiff<NdArray>>(&artifact_dir, &data_dir, config, Default::default())
                .unwrap();

        // 2 个病人 x 2 张保留切片, 批大小 2.
        assert_eq!(summary.epochs, 1);
        assert_eq!(summary.train_batches, 2);
        assert_eq!(summary.valid_batches, 2);
        assert!(summary.final_train_loss.is_finite());
        assert!(summary.mean_valid_loss.is_finite());

        assert!(artifact_dir.join("config.json").is_file());
        assert!(artifact_dir.join("summary.json").is_file());
        assert!(artifact_dir.join("model.mpk").is_file());

        fs::remove_dir_all(&data_dir).unwrap();
        fs::remove_dir_all(&artifact_dir).unwrap();
    }
}
