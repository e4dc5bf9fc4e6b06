use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Result, anyhow, bail};
use log::{debug, info};
use opencv::core::{CV_32F, Mat, Scalar, Size, Vector};
use opencv::dnn::{self, Net};
use opencv::prelude::*;

use crate::config::{Layout, ModelOptions};

/// 模型要求的输入边长
pub const INPUT_SIZE: i32 = 224;

/// 图片特征提取模型
pub trait Embedder {
    /// 计算一张已缩放到 224x224 的 BGR 图片的特征向量
    fn embed(&mut self, image: &Mat) -> Result<Vec<f32>>;
}

/// 通过 OpenCV DNN 运行的 MobileNetV2 ONNX 模型
///
/// 模型在第一次调用 `embed` 时才会加载，不需要计算特征的命令不要求模型文件存在
pub struct OnnxEmbedder {
    path: PathBuf,
    layout: Layout,
    net: Option<Net>,
}

impl OnnxEmbedder {
    pub fn create(opts: &ModelOptions) -> Self {
        Self { path: opts.model.clone(), layout: opts.layout, net: None }
    }

    fn get_net(&mut self) -> Result<&mut Net> {
        if self.net.is_none() {
            if !self.path.exists() {
                bail!(
                    "模型文件不存在: {}\n请将 MobileNetV2 (include_top=False, pooling='avg') 导出为 ONNX 后放到该位置，或通过 --model 指定",
                    self.path.display()
                );
            }
            let path = self.path.to_str().ok_or_else(|| anyhow!("模型路径不是合法的 UTF-8"))?;
            debug!("加载模型: {}", path);
            let instant = Instant::now();
            let net = dnn::read_net_from_onnx(path)?;
            info!("模型加载完成，耗时 {:.2}s", instant.elapsed().as_secs_f32());
            self.net = Some(net);
        }
        self.net.as_mut().ok_or_else(|| anyhow!("模型未加载"))
    }
}

impl Embedder for OnnxEmbedder {
    fn embed(&mut self, image: &Mat) -> Result<Vec<f32>> {
        let layout = self.layout;
        // MobileNetV2 的预处理：RGB，x / 127.5 - 1
        let blob = dnn::blob_from_image(
            image,
            1. / 127.5,
            Size::new(INPUT_SIZE, INPUT_SIZE),
            Scalar::all(127.5),
            true,
            false,
            CV_32F,
        )?;
        let blob = match layout {
            Layout::Nchw => blob,
            Layout::Nhwc => {
                let mut output = Mat::default();
                opencv::core::transpose_nd(&blob, &Vector::<i32>::from_slice(&[0, 2, 3, 1]), &mut output)?;
                output
            }
        };

        let net = self.get_net()?;
        net.set_input_def(&blob)?;
        let output = net.forward_single_def()?;
        let output = if output.is_continuous() { output } else { output.try_clone()? };
        Ok(output.data_typed::<f32>()?.to_vec())
    }
}
