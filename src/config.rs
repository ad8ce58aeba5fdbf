use std::path::PathBuf;
use std::sync::OnceLock;

use crate::kernels::{DenseFlowParams, FeatureParams, KernelsKind, LkParams};
use crate::session::SessionSettings;
use crate::strategy::{StrategyKind, StrategyParams};

pub static CONFIG: OnceLock<Config> = OnceLock::new();

#[derive(Clone, Debug, PartialEq)]
#[derive(clap::Parser)]
pub struct Config {
    /// Seed for the feature trail colors
    #[clap(long, default_value = "0")]
    pub seed: u64,

    /// Which kernels estimate the motion
    #[clap(long, value_enum, default_value = "opencv")]
    pub kernels: KernelsKind,

    /// Grid stride of the line mode, in pixels
    #[clap(long, default_value = "16")]
    pub step: usize,

    #[clap(long, default_value = "3")]
    pub dense_levels: usize,

    #[clap(long, default_value = "15")]
    pub dense_win_size: usize,

    #[clap(long, default_value = "3")]
    pub dense_iterations: usize,

    #[clap(long, default_value = "100")]
    pub max_corners: usize,

    #[clap(long, default_value = "0.3")]
    pub quality_level: f64,

    #[clap(long, default_value = "7")]
    pub min_distance: f64,

    #[clap(long, default_value = "7")]
    pub block_size: usize,

    #[clap(long, default_value = "15")]
    pub lk_win_size: usize,

    #[clap(long, default_value = "2")]
    pub lk_max_level: usize,

    #[clap(long, default_value = "10")]
    pub lk_iters: usize,

    #[clap(long, default_value = "0.03")]
    pub lk_epsilon: f64,

    /// Start without mirroring the frames
    #[clap(long)]
    pub no_flip: bool,

    /// How long to wait for a key after each frame, in milliseconds
    #[clap(long, default_value = "1")]
    pub poll_ms: i32,

    #[clap(long, default_value = "img_raw.png")]
    pub raw_output: PathBuf,

    #[clap(long, default_value = "img_w_flow.png")]
    pub flow_output: PathBuf,
}

impl Config {
    pub fn strategy_params(&self) -> StrategyParams {
        StrategyParams {
            dense: DenseFlowParams {
                levels: self.dense_levels,
                win_size: self.dense_win_size,
                iterations: self.dense_iterations,
                ..Default::default()
            },
            features: FeatureParams {
                max_corners: self.max_corners,
                quality_level: self.quality_level,
                min_distance: self.min_distance,
                block_size: self.block_size,
            },
            lk: LkParams {
                win_size: self.lk_win_size,
                max_level: self.lk_max_level,
                max_iters: self.lk_iters,
                epsilon: self.lk_epsilon,
                ..Default::default()
            },
            line_step: self.step,
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            flip: !self.no_flip,
            poll_ms: self.poll_ms,
            raw_output: self.raw_output.clone(),
            flow_output: self.flow_output.clone(),
            default_mode: StrategyKind::DenseHsv,
        }
    }
}
