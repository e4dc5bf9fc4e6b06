use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;
use opencv::imgproc::InterpolationFlags;

use crate::cli::*;
use crate::store::StoreError;

static DEFAULT_MODEL: LazyLock<String> = LazyLock::new(|| {
    ProjectDirs::from("", "", "imsim")
        .map(|dirs| dirs.data_dir().join("mobilenet_v2.onnx"))
        .unwrap_or_else(|| PathBuf::from("mobilenet_v2.onnx"))
        .to_string_lossy()
        .into_owned()
});

fn default_model_path() -> &'static str {
    DEFAULT_MODEL.as_str()
}

#[derive(Parser, Debug, Clone)]
pub struct ModelOptions {
    /// MobileNetV2 的 ONNX 模型文件路径（include_top=False, pooling='avg'）
    #[arg(short, long, value_name = "FILE", default_value = default_model_path())]
    pub model: PathBuf,
    /// 缩放到 224x224 时使用的插值方式
    #[arg(long, value_name = "FLAG", default_value = "nearest", value_parser = parse_interpolation)]
    pub interpolation: InterpolationFlags,
    /// 模型输入张量的布局，Keras 导出的模型一般为 nhwc
    #[arg(long, value_enum, default_value_t = Layout::Nchw)]
    pub layout: Layout,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "imsim", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 特征缓存文件所在目录
    #[arg(short, long, default_value = ".")]
    pub cache_dir: CacheDir,
    /// 图片数据集目录，只扫描第一层
    #[arg(short, long, default_value = "data")]
    pub dataset: PathBuf,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 提取数据集中所有图片的特征并缓存
    Build(BuildCommand),
    /// 搜索与指定图片相似的图片
    Search(SearchCommand),
    /// 删除特征缓存
    Clean(CleanCommand),
}

/// 缓存目录在磁盘上的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// 两个缓存文件都不存在
    Absent,
    /// 两个缓存文件都存在
    Present,
}

#[derive(Debug, Clone)]
pub struct CacheDir {
    path: PathBuf,
}

impl CacheDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回特征矩阵文件的路径
    pub fn features(&self) -> PathBuf {
        self.path.join("fashion_features.npy")
    }

    /// 返回图片路径列表文件的路径
    pub fn filenames(&self) -> PathBuf {
        self.path.join("fashion_filenames.json")
    }

    /// 返回特征矩阵文件的临时路径
    pub fn features_tmp(&self) -> PathBuf {
        self.path.join("fashion_features.npy.tmp")
    }

    /// 返回图片路径列表文件的临时路径
    pub fn filenames_tmp(&self) -> PathBuf {
        self.path.join("fashion_filenames.json.tmp")
    }

    /// 检查缓存文件是否存在，只存在其中一个时视为缓存损坏
    pub fn probe(&self) -> Result<StoreState, StoreError> {
        let features = self.features();
        let filenames = self.filenames();
        match (features.exists(), filenames.exists()) {
            (true, true) => Ok(StoreState::Present),
            (false, false) => Ok(StoreState::Absent),
            (true, false) => Err(StoreError::Incomplete { missing: filenames }),
            (false, true) => Err(StoreError::Incomplete { missing: features }),
        }
    }
}

impl FromStr for CacheDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

fn parse_interpolation(s: &str) -> Result<InterpolationFlags, String> {
    match s {
        "nearest" => Ok(InterpolationFlags::INTER_NEAREST),
        "linear" => Ok(InterpolationFlags::INTER_LINEAR),
        "cubic" => Ok(InterpolationFlags::INTER_CUBIC),
        "area" => Ok(InterpolationFlags::INTER_AREA),
        "lanczos4" => Ok(InterpolationFlags::INTER_LANCZOS4),
        _ => Err(format!("无效的插值方式: {}", s)),
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// (batch, channel, height, width)
    Nchw,
    /// (batch, height, width, channel)
    Nhwc,
}
