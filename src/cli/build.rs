use anyhow::Result;
use clap::Parser;
use indicatif::ProgressBar;
use log::info;

use crate::ImSimBuilder;
use crate::cli::SubCommandExtend;
use crate::config::{ModelOptions, Opts};
use crate::embed::OnnxEmbedder;
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct BuildCommand {
    #[command(flatten)]
    pub model: ModelOptions,
    /// 删除已有的特征缓存并重新提取
    #[arg(long)]
    pub rebuild: bool,
}

impl SubCommandExtend for BuildCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let db = ImSimBuilder::new(opts.cache_dir.clone(), opts.dataset.clone())
            .interpolation(self.model.interpolation)
            .rebuild(self.rebuild)
            .progress(ProgressBar::no_length().with_style(pb_style()))
            .open(OnnxEmbedder::create(&self.model))?;
        info!(
            "特征库就绪: {}，共 {} 张图片，维度 {}",
            db.cache_dir().features().display(),
            db.store().len(),
            db.store().dim()
        );
        Ok(())
    }
}
