use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use indicatif::ProgressBar;
use log::{debug, info};
use ndarray::ArrayView1;
use opencv::imgproc::InterpolationFlags;

use crate::config::{CacheDir, StoreState};
use crate::embed::Embedder;
use crate::rank::rank;
use crate::store::{FeatureStore, StoreError};
use crate::utils;

pub struct ImSimBuilder {
    cache_dir: CacheDir,
    dataset: PathBuf,
    interpolation: i32,
    rebuild: bool,
    progress: ProgressBar,
}

impl ImSimBuilder {
    pub fn new(cache_dir: CacheDir, dataset: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir,
            dataset: dataset.into(),
            interpolation: InterpolationFlags::INTER_NEAREST as i32,
            rebuild: false,
            progress: ProgressBar::hidden(),
        }
    }

    /// 缩放图片时使用的插值方式
    pub fn interpolation(mut self, interpolation: InterpolationFlags) -> Self {
        self.interpolation = interpolation as i32;
        self
    }

    /// 打开前删除已有的特征缓存
    pub fn rebuild(mut self, rebuild: bool) -> Self {
        self.rebuild = rebuild;
        self
    }

    /// 提取特征时使用的进度条
    pub fn progress(mut self, pb: ProgressBar) -> Self {
        self.progress = pb;
        self
    }

    /// 打开特征库：缓存存在时直接读取，否则扫描数据集重新提取并写入缓存
    pub fn open<E: Embedder>(self, mut embedder: E) -> Result<ImSim<E>> {
        if self.rebuild {
            FeatureStore::clean(&self.cache_dir)?;
        }
        FeatureStore::resume_save(&self.cache_dir)?;

        let store = match self.cache_dir.probe()? {
            StoreState::Present => {
                info!("读取特征缓存: {}", self.cache_dir.features().display());
                let store = FeatureStore::load(&self.cache_dir)?;
                info!("共 {} 张图片", store.len());
                store
            }
            StoreState::Absent => {
                info!("开始提取特征: {}", self.dataset.display());
                let store = FeatureStore::build(
                    &self.dataset,
                    &mut embedder,
                    self.interpolation,
                    &self.progress,
                )?;
                store.save(&self.cache_dir)?;
                self.progress.finish_with_message("特征提取完成");
                info!("特征已保存，共 {} 张图片", store.len());
                store
            }
        };

        Ok(ImSim { cache_dir: self.cache_dir, interpolation: self.interpolation, embedder, store })
    }
}

/// 特征库和特征提取模型的组合
pub struct ImSim<E> {
    cache_dir: CacheDir,
    interpolation: i32,
    embedder: E,
    store: FeatureStore,
}

impl<E: Embedder> ImSim<E> {
    pub fn store(&self) -> &FeatureStore {
        &self.store
    }

    pub fn cache_dir(&self) -> &CacheDir {
        &self.cache_dir
    }

    /// 计算图片文件的特征，处理流程和建库时完全一致
    pub fn embed_file(&mut self, image_path: impl AsRef<Path>) -> Result<Vec<f32>> {
        let image_path = image_path.as_ref();
        if !image_path.is_file() {
            return Err(StoreError::QueryNotFound(image_path.to_path_buf()).into());
        }
        let image = utils::imread_resized(&image_path.to_string_lossy(), self.interpolation)?;
        self.embedder.embed(&image)
    }

    /// 在特征库中搜索特征向量，返回 Vec<(相似度, 图片路径)>
    pub fn search_des(&self, feature: &[f32], top_n: usize) -> Result<Vec<(f32, String)>> {
        Ok(rank(&self.store, ArrayView1::from(feature), top_n)?)
    }

    /// 在特征库中搜索图片
    ///
    /// # Arguments
    ///
    /// * `image_path` - 图片路径，文件不存在时返回 `StoreError::QueryNotFound`
    /// * `top_n` - 返回的结果数量
    pub fn search_file(
        &mut self,
        image_path: impl AsRef<Path>,
        top_n: usize,
    ) -> Result<Vec<(f32, String)>> {
        let instant = Instant::now();
        let feature = self.embed_file(image_path)?;
        let result = self.search_des(&feature, top_n)?;
        debug!("search time: {:.2}s", instant.elapsed().as_secs_f32());
        Ok(result)
    }
}
