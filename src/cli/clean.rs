use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::store::FeatureStore;

#[derive(Parser, Debug, Clone)]
pub struct CleanCommand {}

impl SubCommandExtend for CleanCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        info!("清理特征缓存: {}", opts.cache_dir.path().display());
        FeatureStore::clean(&opts.cache_dir)?;
        info!("清理完成");
        Ok(())
    }
}
