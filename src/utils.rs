use std::io::{BufRead, Write};

use anyhow::{Result, bail};
use indicatif::ProgressStyle;
use opencv::core::{self, Mat, Point, Scalar, Size, Vector};
use opencv::prelude::*;
use opencv::{highgui, imgcodecs, imgproc};

use crate::embed::INPUT_SIZE;

/// 读取彩色图片，读取失败或解码失败时返回错误
pub fn imread(filename: &str) -> Result<Mat> {
    let img = imgcodecs::imread(filename, imgcodecs::IMREAD_COLOR)?;
    if img.empty() {
        bail!("无法读取图片: {}", filename);
    }
    Ok(img)
}

/// 读取图片并缩放到模型的输入尺寸
pub fn imread_resized(filename: &str, interpolation: i32) -> Result<Mat> {
    let img = imread(filename)?;
    let mut output = Mat::default();
    imgproc::resize(
        &img,
        &mut output,
        Size::new(INPUT_SIZE, INPUT_SIZE),
        0.,
        0.,
        interpolation,
    )?;
    Ok(output)
}

pub fn imshow(winname: &str, mat: &impl core::ToInputArray) -> Result<()> {
    highgui::imshow(winname, mat)?;
    while highgui::get_window_property(winname, highgui::WindowPropertyFlags::WND_PROP_VISIBLE as i32)? >= 1.0 {
        highgui::wait_key(50)?;
    }
    Ok(())
}

pub fn imwrite(filename: &str, img: &impl core::ToInputArray) -> Result<()> {
    let flags = Vector::<i32>::new();
    if !imgcodecs::imwrite(filename, img, &flags)? {
        bail!("无法写入图片: {}", filename);
    }
    Ok(())
}

/// 等比缩放到指定高度
pub fn resize_to_height(img: &Mat, height: i32) -> Result<Mat> {
    let scale = height as f64 / img.rows() as f64;
    let width = ((img.cols() as f64 * scale).round() as i32).max(1);
    let mut output = Mat::default();
    imgproc::resize(
        img,
        &mut output,
        Size::new(width, height),
        0.,
        0.,
        imgproc::InterpolationFlags::INTER_AREA as i32,
    )?;
    Ok(output)
}

/// 将查询图片和搜索结果横向拼接为一张图，每张图片左上角标注标题
pub fn montage(query: &str, results: &[(f32, String)]) -> Result<Mat> {
    const TILE_HEIGHT: i32 = 256;

    let mut tiles = Vector::<Mat>::new();
    let images = std::iter::once((query, "Input Image".to_string())).chain(
        results.iter().enumerate().map(|(i, (score, path))| {
            (path.as_str(), format!("Similar {} ({:.2})", i + 1, score))
        }),
    );
    for (path, title) in images {
        let mut tile = resize_to_height(&imread(path)?, TILE_HEIGHT)?;
        imgproc::put_text(
            &mut tile,
            &title,
            Point::new(6, 20),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.5,
            Scalar::new(0., 0., 255., 0.),
            1,
            imgproc::LINE_AA,
            false,
        )?;
        tiles.push(tile);
    }

    let mut output = Mat::default();
    core::hconcat(&tiles, &mut output)?;
    Ok(output)
}

pub fn read_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_owned())
}

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} ({eta}) {wide_msg}",
    )
    .expect("invalid progress bar template")
    .progress_chars("##-")
}
