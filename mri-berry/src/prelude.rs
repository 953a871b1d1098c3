//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx3d};

pub use crate::data::{MriVolume, SliceSample};

pub use crate::augment::JointTransform;

pub use crate::dataset::{
    self, home_dataset_dir_with, AccessMode, BrainMriDataset, ScanError, SliceBatch, SliceBatcher,
    VolumeStore,
};

pub use crate::model::{DiceLoss, DiceLossConfig, UNet, UNetConfig};

pub use crate::train::{train, RunSummary, TrainError, TrainingConfig};
