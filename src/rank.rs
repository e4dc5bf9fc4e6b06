use ndarray::ArrayView1;

use crate::store::{FeatureStore, StoreError};

/// 计算两个向量的余弦相似度，任一向量模长为 0 时返回 0
pub fn cosine_similarity(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    let norm = a.dot(&a).sqrt() * b.dot(&b).sqrt();
    if norm == 0. {
        return 0.;
    }
    a.dot(&b) / norm
}

/// 按余弦相似度从高到低返回特征库中最相似的 `top_n` 张图片，返回 Vec<(相似度, 图片路径)>
///
/// `top_n` 超过特征库大小时返回全部图片，相似度相同时保持特征库中的顺序
pub fn rank(
    store: &FeatureStore,
    query: ArrayView1<f32>,
    top_n: usize,
) -> Result<Vec<(f32, String)>, StoreError> {
    if store.is_empty() {
        return Ok(vec![]);
    }
    if query.len() != store.dim() {
        return Err(StoreError::DimensionMismatch { expected: store.dim(), actual: query.len() });
    }

    let mut scores = store
        .embeddings()
        .rows()
        .into_iter()
        .map(|row| cosine_similarity(query, row))
        .enumerate()
        .collect::<Vec<_>>();
    scores.sort_by(|a, b| b.1.total_cmp(&a.1));
    scores.truncate(top_n);

    Ok(scores.into_iter().map(|(i, score)| (score, store.paths()[i].clone())).collect())
}
