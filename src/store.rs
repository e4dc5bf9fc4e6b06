use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use log::{info, warn};
use ndarray::prelude::*;
use ndarray_npy::{read_npy, write_npy};
use regex::Regex;
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::CacheDir;
use crate::embed::Embedder;
use crate::utils;

/// 特征库相关的错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("特征缓存不完整，缺少 {}，请先执行 clean 或使用 --rebuild", .missing.display())]
    Incomplete { missing: PathBuf },
    #[error("特征缓存已损坏: {embeddings} 条特征对应 {identifiers} 个路径")]
    LengthMismatch { embeddings: usize, identifiers: usize },
    #[error("特征维度不一致: 期望 {expected}，实际 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("文件不存在: {}", .0.display())]
    QueryNotFound(PathBuf),
}

/// 图片特征库
///
/// `embeddings` 的第 i 行为 `paths[i]` 对应图片的特征
#[derive(Debug, Clone)]
pub struct FeatureStore {
    embeddings: Array2<f32>,
    paths: Vec<String>,
}

impl FeatureStore {
    /// 从特征矩阵和路径列表构建特征库，两者长度必须一致
    pub fn new(embeddings: Array2<f32>, paths: Vec<String>) -> Result<Self, StoreError> {
        if embeddings.nrows() != paths.len() {
            return Err(StoreError::LengthMismatch {
                embeddings: embeddings.nrows(),
                identifiers: paths.len(),
            });
        }
        Ok(Self { embeddings, paths })
    }

    pub fn embeddings(&self) -> ArrayView2<'_, f32> {
        self.embeddings.view()
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// 特征维度，空特征库为 0
    pub fn dim(&self) -> usize {
        self.embeddings.ncols()
    }

    /// 扫描目录并提取其中所有图片的特征
    ///
    /// 无法读取的图片会被跳过，并在进度条上方打印警告
    ///
    /// # Arguments
    ///
    /// * `dir` - 图片目录，不会递归扫描子目录
    /// * `embedder` - 特征提取模型
    /// * `interpolation` - 缩放到模型输入尺寸时使用的插值方式
    /// * `pb` - 进度条
    pub fn build<E: Embedder>(
        dir: impl AsRef<Path>,
        embedder: &mut E,
        interpolation: i32,
        pb: &ProgressBar,
    ) -> Result<Self> {
        let entries = scan_images(dir.as_ref())?;
        info!("扫描完成，共 {} 张图片", entries.len());
        pb.set_length(entries.len() as u64);

        let mut rows = Vec::new();
        let mut paths = Vec::with_capacity(entries.len());
        let mut dim = None;

        for entry in entries {
            // 单张图片损坏时跳过，模型出错则直接中止
            let image = match utils::imread_resized(&entry, interpolation) {
                Ok(image) => image,
                Err(e) => {
                    warn!("跳过图片 {}: {:#}", entry, e);
                    pb.println(format!("读取图片失败: {}", entry));
                    pb.inc(1);
                    continue;
                }
            };
            let feature = embedder
                .embed(&image)
                .with_context(|| format!("计算特征失败: {}", entry))?;

            let expected = *dim.get_or_insert(feature.len());
            if feature.len() != expected {
                return Err(StoreError::DimensionMismatch { expected, actual: feature.len() }.into());
            }
            rows.extend(feature);
            pb.set_message(entry.clone());
            paths.push(entry);
            pb.inc(1);
        }

        let embeddings = Array2::from_shape_vec((paths.len(), dim.unwrap_or(0)), rows)?;
        Ok(Self::new(embeddings, paths)?)
    }

    /// 从缓存目录读取特征库，并校验两个文件的长度是否一致
    pub fn load(cache: &CacheDir) -> Result<Self> {
        let embeddings: Array2<f32> = read_npy(cache.features())
            .with_context(|| format!("读取特征文件失败: {}", cache.features().display()))?;
        let file = File::open(cache.filenames())
            .with_context(|| format!("读取路径文件失败: {}", cache.filenames().display()))?;
        let paths: Vec<String> = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("读取路径文件失败: {}", cache.filenames().display()))?;
        Ok(Self::new(embeddings, paths)?)
    }

    /// 将特征库写入缓存目录
    ///
    /// 两个文件都先写入临时文件再重命名，特征文件最后重命名。
    /// 两次重命名之间中断时由 [`FeatureStore::resume_save`] 补全
    pub fn save(&self, cache: &CacheDir) -> Result<()> {
        fs::create_dir_all(cache.path())?;

        write_npy(cache.features_tmp(), &self.embeddings)?;
        let mut writer = BufWriter::new(File::create(cache.filenames_tmp())?);
        serde_json::to_writer(&mut writer, &self.paths)?;
        writer.flush()?;

        fs::rename(cache.filenames_tmp(), cache.filenames())?;
        fs::rename(cache.features_tmp(), cache.features())?;
        Ok(())
    }

    /// 补全上次中断的 `save`
    ///
    /// 路径文件已就位、特征文件缺失但其临时文件完整存在时，说明中断发生在两次重命名之间，
    /// 此时完成剩下的重命名。返回是否做了补全
    pub fn resume_save(cache: &CacheDir) -> Result<bool> {
        let (features, features_tmp) = (cache.features(), cache.features_tmp());
        if !cache.filenames().exists() || features.exists() || !features_tmp.exists() {
            return Ok(false);
        }
        warn!("发现未完成的缓存写入，继续重命名 {}", features_tmp.display());
        fs::rename(&features_tmp, &features)
            .with_context(|| format!("重命名失败: {}", features_tmp.display()))?;
        Ok(true)
    }

    /// 删除缓存目录中的特征库，包括残留的临时文件
    pub fn clean(cache: &CacheDir) -> Result<()> {
        for path in [cache.features(), cache.filenames(), cache.features_tmp(), cache.filenames_tmp()] {
            match fs::remove_file(&path) {
                Ok(()) => info!("删除 {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).with_context(|| format!("删除失败: {}", path.display())),
            }
        }
        Ok(())
    }
}

/// 列出目录第一层中所有文件名以 .jpg/.jpeg/.png 结尾的文件（包括指向文件的符号链接），按文件名排序
pub fn scan_images(dir: &Path) -> Result<Vec<String>> {
    let re_suf = Regex::new(r"(?i)\.(jpg|jpeg|png)$").expect("failed to build regex");
    let mut entries = vec![];
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("无法读取目录: {}", dir.display()))?;
        let path = entry.path();
        // is_file 会跟随符号链接
        if !path.is_file() {
            continue;
        }
        if re_suf.is_match(&entry.file_name().to_string_lossy()) {
            entries.push(path.to_string_lossy().to_string());
        }
    }
    Ok(entries)
}
