//! ZSNAP 命令行入口
//!
//! 读取 JSON 线段数组 `[[[x1, y1], [x2, y2]], ...]`，用精确有理数内核执行吸附取整，
//! 输出每条线段对应的折线 `[[[x, y], ...], ...]`。

use std::ffi::OsStr;
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use num_rational::BigRational;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use zsnap_core::prelude::*;

/// 输入线段：两个端点
type RawSegment = [[f64; 2]; 2];

/// 吸附取整命令行工具
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 输入 JSON 文件，缺省或 "-" 时读取标准输入
    input: Option<PathBuf>,

    /// 像素宽度
    #[arg(short = 'w', long, default_value = "1.0")]
    pixel_size: f64,

    /// 只执行一次吸附取整，不做 ISR
    #[arg(long)]
    sr_only: bool,

    /// 输出原始尺度坐标，而不是整数网格坐标
    #[arg(long)]
    real_output: bool,

    /// kd 树数量上限
    #[arg(short = 'k', long)]
    kd_trees: Option<u32>,

    /// ISR 轮数上限
    #[arg(long)]
    max_rounds: Option<usize>,

    /// SnapConfig JSON 文件，命令行参数覆盖其中的值
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 输出文件，缺省写到标准输出
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 输出调试日志
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn snap_config(&self) -> Result<SnapConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("Invalid config {}", path.display()))?
            }
            None => SnapConfig::default(),
        };

        if self.sr_only {
            config.do_isr = false;
        }
        if self.real_output {
            config.integer_output = false;
        }
        if let Some(trees) = self.kd_trees {
            config.number_of_kd_trees = trees;
        }
        if self.max_rounds.is_some() {
            config.max_isr_rounds = self.max_rounds;
        }
        Ok(config)
    }

    fn read_input(&self) -> Result<String> {
        match &self.input {
            Some(path) if path.as_os_str() != OsStr::new("-") => fs::read_to_string(path)
                .with_context(|| format!("Failed to read input {}", path.display())),
            _ => {
                let mut text = String::new();
                io::stdin()
                    .read_to_string(&mut text)
                    .context("Failed to read standard input")?;
                Ok(text)
            }
        }
    }
}

/// 浮点坐标精确转换为有理数
fn exact(value: f64) -> Result<BigRational> {
    match BigRational::from_float(value) {
        Some(v) => Ok(v),
        None => bail!("Coordinate {} is not finite", value),
    }
}

fn to_segment(raw: &RawSegment) -> Result<Segment2<BigRational>> {
    let [[x1, y1], [x2, y2]] = *raw;
    Ok(Segment2::new(
        Point2::new(exact(x1)?, exact(y1)?),
        Point2::new(exact(x2)?, exact(y2)?),
    ))
}

fn to_json_points(polyline: &Polyline<BigRational>) -> Result<Vec<[f64; 2]>> {
    polyline
        .iter()
        .map(|p| {
            p.to_f64()
                .map(|q| [q.x, q.y])
                .with_context(|| format!("Output point {:?} does not fit f64", p))
        })
        .collect()
}

fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志，写到标准错误以免混入输出
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing::subscriber::set_global_default(
        FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(io::stderr)
            .finish(),
    )?;

    let config = args.snap_config()?;
    debug!("Using config: {:?}", config);

    let raw: Vec<RawSegment> =
        serde_json::from_str(&args.read_input()?).context("Input must be a JSON array of segments")?;
    let segments = raw.iter().map(to_segment).collect::<Result<Vec<_>>>()?;
    let pixel_size = exact(args.pixel_size)?;

    info!("Rounding {} segments with pixel size {}", segments.len(), args.pixel_size);

    let kernel = ExactKernel;
    let report = SnapRounder::new(&kernel, config)
        .run(&segments, pixel_size)
        .context("Snap rounding failed")?;

    info!(
        "{} hot pixels, {} added in {} ISR rounds",
        report.hot_pixels.len(),
        report.added_pixels,
        report.isr_rounds
    );

    let polylines = report
        .polylines
        .iter()
        .map(to_json_points)
        .collect::<Result<Vec<_>>>()?;
    let text = serde_json::to_string_pretty(&polylines)?;

    match &args.output {
        Some(path) => fs::write(path, text)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => writeln!(io::stdout(), "{}", text)?,
    }

    Ok(())
}
