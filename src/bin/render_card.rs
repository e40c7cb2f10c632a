//! 本地渲染工具：读取成绩 JSON，输出 BestN 成绩卡。
//!
//! 输入可以是 `ScoreRecord` 数组，也可以是带头部信息的对象：
//! `{"player_name": "...", "rks": 15.2, "records": [...]}`。
//! 使用 `--song` 时输入为单曲信息：`{"title": "...", "constants": {"IN": 15.8}}`。

use std::fs;
use std::path::PathBuf;

use serde::Deserialize;

use phi_card::AppConfig;
use phi_card::features::image::{
    CardHeader, ImageFormat, ImageService, OutputKind, RenderConfig, RenderJob, SongCard,
    prewarm,
};
use phi_card::features::score::{ScoreRecord, rank_records};
use phi_card::logging::init_tracing;

const DEFAULT_TOP_N: usize = 30;

#[derive(Deserialize)]
#[serde(untagged)]
enum Input {
    Records(Vec<ScoreRecord>),
    WithHeader {
        #[serde(flatten)]
        header: CardHeader,
        records: Vec<ScoreRecord>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse(std::env::args().skip(1).collect());
    if args.help || args.input.is_none() || args.output.is_none() {
        print_help();
        return Ok(());
    }

    // 配置文件缺失或无效时使用默认配置
    let config_err = AppConfig::init_global().err();
    let config = AppConfig::global();
    init_tracing(&config.logging);
    if let Some(e) = config_err {
        tracing::warn!("配置加载失败，使用默认配置: {}", e);
    }
    prewarm(config);

    let (Some(input), Some(output)) = (args.input, args.output) else {
        return Ok(());
    };
    let raw = fs::read_to_string(&input)?;

    let mut render = RenderConfig::from_app_config(config);
    if args.vector {
        render.output = OutputKind::Vector;
    }
    if let Some(format) = args.format {
        render.format = format;
    }
    if let Some(quality) = args.quality {
        render.quality = quality;
    }

    let (header, mut job) = if args.song {
        let song: SongCard = serde_json::from_str(&raw)?;
        (None, RenderJob::song(song, render))
    } else {
        let (header, records) = match serde_json::from_str::<Input>(&raw)? {
            Input::Records(records) => (None, records),
            Input::WithHeader { header, records } => (Some(header), records),
        };
        (header, RenderJob::new(rank_records(records, args.top_n), render))
    };
    if let Some(header) = header {
        job = job.with_header(header);
    }
    // 未指定扩展名时按输出类型补全
    let output = if output.extension().is_some() {
        output
    } else if job.config.output == OutputKind::Vector {
        output.with_extension("svg")
    } else {
        output.with_extension(job.config.format.extension())
    };
    let outcome = ImageService::shared().render(job).await?;

    fs::write(&output, outcome.card.as_bytes())?;
    println!(
        "已写入: {} ({}, {} 字节, 曲绘 {}/{}, 耗时 {:?})",
        output.display(),
        outcome.card.content_type(),
        outcome.card.len(),
        outcome.report.covers,
        outcome.report.entries,
        outcome.report.timings.total
    );
    Ok(())
}

struct Args {
    help: bool,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    vector: bool,
    song: bool,
    format: Option<ImageFormat>,
    quality: Option<u32>,
    top_n: usize,
}

impl Args {
    fn parse(argv: Vec<String>) -> Self {
        let mut args = Self {
            help: false,
            input: None,
            output: None,
            vector: false,
            song: false,
            format: None,
            quality: None,
            top_n: DEFAULT_TOP_N,
        };

        let mut it = argv.into_iter();
        while let Some(a) = it.next() {
            match a.as_str() {
                "-h" | "--help" => args.help = true,
                "--vector" => args.vector = true,
                "--song" => args.song = true,
                "--format" => {
                    args.format = it.next().and_then(|v| match v.to_ascii_lowercase().as_str() {
                        "png" => Some(ImageFormat::Png),
                        "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
                        "webp" => Some(ImageFormat::Webp),
                        _ => None,
                    });
                }
                "--quality" => {
                    args.quality = it.next().and_then(|v| v.parse().ok());
                }
                "--top" => {
                    if let Some(v) = it.next() {
                        args.top_n = v.parse().unwrap_or(DEFAULT_TOP_N);
                    }
                }
                _ if args.input.is_none() => args.input = Some(PathBuf::from(&a)),
                _ if args.output.is_none() => args.output = Some(PathBuf::from(&a)),
                _ => {}
            }
        }
        args
    }
}

fn print_help() {
    println!(
        "用法: render_card <records.json> <output> [--vector] [--song] [--format png|jpeg|webp] [--quality 1-100] [--top N]\n\
         \n\
         配置从当前目录的 config.toml 读取，可用 PHICARD__ 前缀的环境变量覆盖。"
    );
}
