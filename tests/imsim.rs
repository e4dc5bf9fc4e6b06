use std::cell::Cell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use anyhow::Result;
use imsim::config::CacheDir;
use imsim::embed::Embedder;
use imsim::store::{FeatureStore, StoreError};
use imsim::utils;
use imsim::{ImSim, ImSimBuilder};
use ndarray::Array2;
use ndarray_npy::write_npy;
use opencv::core::{CV_8UC3, Mat, Rect, Scalar, Size};
use opencv::imgproc;
use opencv::prelude::*;
use rstest::*;
use tempfile::TempDir;

/// 把图片缩小到 4x4 后直接作为特征，并记录调用次数
#[derive(Clone, Default)]
struct PixelEmbedder {
    calls: Rc<Cell<usize>>,
}

impl Embedder for PixelEmbedder {
    fn embed(&mut self, image: &Mat) -> Result<Vec<f32>> {
        self.calls.set(self.calls.get() + 1);
        let mut small = Mat::default();
        imgproc::resize(image, &mut small, Size::new(4, 4), 0., 0., imgproc::INTER_AREA)?;
        Ok(small.data_bytes()?.iter().map(|&v| (v as f32 - 128.) / 128.).collect())
    }
}

fn solid(color: Scalar) -> Mat {
    Mat::new_rows_cols_with_default(64, 64, CV_8UC3, color).unwrap()
}

fn write_png(dir: &Path, name: &str, img: &Mat) {
    utils::imwrite(dir.join(name).to_str().unwrap(), img).unwrap();
}

struct Workspace {
    dataset: TempDir,
    cache: TempDir,
}

impl Workspace {
    fn cache_dir(&self) -> CacheDir {
        CacheDir::new(self.cache.path())
    }

    fn image(&self, name: &str) -> String {
        self.dataset.path().join(name).to_string_lossy().to_string()
    }

    fn open(&self, embedder: PixelEmbedder) -> Result<ImSim<PixelEmbedder>> {
        ImSimBuilder::new(self.cache_dir(), self.dataset.path()).open(embedder)
    }
}

/// a 和 b 几乎相同，c 与它们无关，另外放入一些应被忽略的文件
#[fixture]
fn workspace() -> Workspace {
    let dataset = TempDir::new().unwrap();
    let dir = dataset.path();

    let a = solid(Scalar::new(20., 40., 230., 0.));
    let mut b = a.clone();
    imgproc::rectangle(
        &mut b,
        Rect::new(0, 0, 8, 8),
        Scalar::all(255.),
        -1,
        imgproc::LINE_8,
        0,
    )
    .unwrap();
    let c = solid(Scalar::new(230., 200., 10., 0.));

    write_png(dir, "a.png", &a);
    write_png(dir, "b.png", &b);
    write_png(dir, "c.png", &c);
    fs::write(dir.join("broken.jpg"), b"not an image").unwrap();
    fs::write(dir.join("notes.txt"), b"ignored").unwrap();
    fs::create_dir(dir.join("nested")).unwrap();
    write_png(&dir.join("nested"), "d.png", &a);

    Workspace { dataset, cache: TempDir::new().unwrap() }
}

#[rstest]
fn build_keeps_paths_and_embeddings_aligned(workspace: Workspace) -> Result<()> {
    let embedder = PixelEmbedder::default();
    let db = workspace.open(embedder.clone())?;
    let store = db.store();

    assert_eq!(store.len(), 3);
    assert_eq!(store.embeddings().nrows(), 3);
    assert_eq!(store.paths(), [workspace.image("a.png"), workspace.image("b.png"), workspace.image("c.png")]);
    // broken.jpg 读取失败，不会调用模型
    assert_eq!(embedder.calls.get(), 3);

    let mut check = PixelEmbedder::default();
    for (path, row) in store.paths().iter().zip(store.embeddings().rows()) {
        let image = utils::imread_resized(path, imgproc::INTER_NEAREST)?;
        assert_eq!(check.embed(&image)?, row.to_vec());
    }
    Ok(())
}

#[rstest]
fn reload_matches_build(workspace: Workspace) -> Result<()> {
    let built = workspace.open(PixelEmbedder::default())?;
    assert!(workspace.cache_dir().features().exists());
    assert!(workspace.cache_dir().filenames().exists());

    let embedder = PixelEmbedder::default();
    let loaded = workspace.open(embedder.clone())?;
    assert_eq!(embedder.calls.get(), 0);
    assert_eq!(loaded.store().paths(), built.store().paths());
    assert_eq!(loaded.store().embeddings(), built.store().embeddings());

    let rebuilt = ImSimBuilder::new(workspace.cache_dir(), workspace.dataset.path())
        .rebuild(true)
        .open(embedder.clone())?;
    assert_eq!(embedder.calls.get(), 3);
    assert_eq!(rebuilt.store().paths(), built.store().paths());
    Ok(())
}

#[rstest]
fn near_duplicate_ranks_above_unrelated(workspace: Workspace) -> Result<()> {
    let mut db = workspace.open(PixelEmbedder::default())?;

    let result = db.search_file(workspace.image("a.png"), 2)?;
    let paths = result.iter().map(|(_, p)| p.clone()).collect::<Vec<_>>();
    assert_eq!(paths, [workspace.image("a.png"), workspace.image("b.png")]);
    assert!((result[0].0 - 1.).abs() < 1e-5);
    assert!(result[0].0 >= result[1].0);
    Ok(())
}

#[rstest]
fn stored_image_is_most_similar_to_itself(workspace: Workspace) -> Result<()> {
    let mut db = workspace.open(PixelEmbedder::default())?;
    let paths = db.store().paths().to_vec();

    for path in paths {
        let result = db.search_file(&path, 10)?;
        assert_eq!(result.len(), 3);
        assert_eq!(result[0].1, path);
        assert!((result[0].0 - 1.).abs() < 1e-5);
        assert!(result.windows(2).all(|w| w[0].0 >= w[1].0));
    }
    Ok(())
}

#[rstest]
fn missing_query_is_not_embedded(workspace: Workspace) -> Result<()> {
    let embedder = PixelEmbedder::default();
    let mut db = workspace.open(embedder.clone())?;
    let calls = embedder.calls.get();

    let err = db.search_file(workspace.image("missing.png"), 5).unwrap_err();
    assert!(matches!(err.downcast_ref::<StoreError>(), Some(StoreError::QueryNotFound(_))));
    assert_eq!(embedder.calls.get(), calls);
    Ok(())
}

#[rstest]
fn empty_dataset_gives_empty_results(workspace: Workspace) -> Result<()> {
    let empty = TempDir::new()?;
    let cache = TempDir::new()?;
    let mut db = ImSimBuilder::new(CacheDir::new(cache.path()), empty.path())
        .open(PixelEmbedder::default())?;

    assert!(db.store().is_empty());
    assert!(db.search_file(workspace.image("a.png"), 5)?.is_empty());
    assert!(db.search_des(&[1., 2., 3.], 5)?.is_empty());

    let reloaded = ImSimBuilder::new(CacheDir::new(cache.path()), empty.path())
        .open(PixelEmbedder::default())?;
    assert!(reloaded.store().is_empty());
    Ok(())
}

#[rstest]
fn half_written_cache_is_rejected(workspace: Workspace) -> Result<()> {
    workspace.open(PixelEmbedder::default())?;
    fs::remove_file(workspace.cache_dir().filenames())?;

    let err = workspace.open(PixelEmbedder::default()).err().unwrap();
    assert!(matches!(err.downcast_ref::<StoreError>(), Some(StoreError::Incomplete { .. })));
    Ok(())
}

#[rstest]
fn interrupted_save_is_finished_on_open(workspace: Workspace) -> Result<()> {
    let built = workspace.open(PixelEmbedder::default())?;
    let cache = workspace.cache_dir();
    fs::rename(cache.features(), cache.features_tmp())?;

    let embedder = PixelEmbedder::default();
    let loaded = workspace.open(embedder.clone())?;
    assert_eq!(embedder.calls.get(), 0);
    assert_eq!(loaded.store().paths(), built.store().paths());
    assert!(!cache.features_tmp().exists());
    Ok(())
}

#[cfg(unix)]
#[rstest]
fn symlinked_image_is_indexed(workspace: Workspace) -> Result<()> {
    std::os::unix::fs::symlink(workspace.image("a.png"), workspace.image("z.png"))?;

    let mut imsim = workspace.open(PixelEmbedder::default())?;
    assert_eq!(imsim.store().len(), 4);
    let results = imsim.search_file(workspace.image("z.png"), 2)?;
    assert!(results[0].0 > 0.999);
    Ok(())
}

#[rstest]
fn mismatched_cache_is_rejected(workspace: Workspace) -> Result<()> {
    let cache = workspace.cache_dir();
    write_npy(cache.features(), &Array2::<f32>::zeros((2, 48)))?;
    fs::write(cache.filenames(), r#"["a.png", "b.png", "c.png"]"#)?;

    let err = FeatureStore::load(&cache).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::LengthMismatch { embeddings: 2, identifiers: 3 })
    ));
    Ok(())
}
