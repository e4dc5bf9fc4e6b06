use anyhow::Result;
use clap::{Parser, ValueEnum};
use indicatif::ProgressBar;
use log::info;

use crate::ImSimBuilder;
use crate::cli::SubCommandExtend;
use crate::config::{ModelOptions, Opts};
use crate::embed::OnnxEmbedder;
use crate::utils::{self, pb_style};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub model: ModelOptions,
    /// 被搜索的图片文件名，相对于数据集目录，不填则在运行时输入
    pub image: Option<String>,
    /// 显示的结果数量
    #[arg(long, value_name = "COUNT", default_value_t = 5)]
    pub count: usize,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
    /// 不使用 GUI 展示，而是将结果拼图保存到文件
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<String>,
    /// 不展示结果拼图
    #[arg(long)]
    pub no_show: bool,
    /// 删除已有的特征缓存并重新提取
    #[arg(long)]
    pub rebuild: bool,
}

impl SubCommandExtend for SearchCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let mut db = ImSimBuilder::new(opts.cache_dir.clone(), opts.dataset.clone())
            .interpolation(self.model.interpolation)
            .rebuild(self.rebuild)
            .progress(ProgressBar::no_length().with_style(pb_style()))
            .open(OnnxEmbedder::create(&self.model))?;

        let name = match &self.image {
            Some(name) => name.clone(),
            None => utils::read_line("请输入图片文件名: ")?,
        };
        let image = opts.dataset.join(&name);
        if !image.is_file() {
            println!("文件不存在: {}", image.display());
            return Ok(());
        }

        info!("搜索相似图片: {}", image.display());
        let result = db.search_file(&image, self.count)?;
        print_result(&result, self)?;

        if self.no_show {
            return Ok(());
        }
        let output = utils::montage(&image.to_string_lossy(), &result)?;
        match &self.output {
            Some(file) => utils::imwrite(file, &output)?,
            None => utils::imshow("result", &output)?,
        }
        Ok(())
    }
}

fn print_result(result: &[(f32, String)], opts: &SearchCommand) -> Result<()> {
    match opts.output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for (k, v) in result {
                println!("{:.4}\t{}", k, v);
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}
