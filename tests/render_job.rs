use std::path::Path;
use std::sync::Arc;

use image::{Rgba, RgbaImage};
use phi_card::AppError;
use phi_card::features::image::{
    AssetCache, AssetCacheOptions, BackgroundProcessor, CardHeader, ImageFormat, ImageService,
    MatchResolver, OutputKind, RenderConfig, RenderJob, SongCard, min_canvas_width,
};
use phi_card::features::score::{Difficulty, ScoreRecord, rank_records};

fn populate(dir: &Path, titles: &[String]) {
    for (i, t) in titles.iter().enumerate() {
        RgbaImage::from_fn(128, 68, |x, y| Rgba([(i * 8) as u8, x as u8, y as u8, 255]))
            .save(dir.join(format!("{t}.Artist.png")))
            .unwrap();
    }
}

fn records(titles: &[String]) -> Vec<ScoreRecord> {
    let recs = titles
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let mut r = ScoreRecord::new(
                t.clone(),
                "Artist",
                Difficulty::IN,
                1_000_000 - (i as u32) * 7_000,
                0.995 - i as f64 * 0.002,
                i % 3 == 0,
            );
            r.constant = Some(15.8 - i as f64 * 0.1);
            r
        })
        .collect();
    rank_records(recs, 30)
}

fn service() -> ImageService {
    ImageService::new(
        Arc::new(AssetCache::new(AssetCacheOptions::default())),
        BackgroundProcessor::new(4),
        MatchResolver::default(),
        4,
    )
}

fn config(dir: &Path) -> RenderConfig {
    RenderConfig {
        quality: 95,
        output: OutputKind::Raster,
        illustration_dir: dir.to_path_buf(),
        background_image: None,
        ..RenderConfig::default()
    }
}

fn titles(range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|i| format!("Song{i}")).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn best30_with_one_missing_cover_degrades_gracefully() {
    let dir = tempfile::tempdir().unwrap();
    let all = titles(0..30);
    let on_disk: Vec<String> = all.iter().filter(|t| *t != "Song17").cloned().collect();
    populate(dir.path(), &on_disk);

    let outcome = service()
        .render(RenderJob::new(records(&all), config(dir.path())))
        .await
        .unwrap();

    assert_eq!(outcome.report.entries, 30);
    assert_eq!(outcome.report.covers, 29);
    assert_eq!(outcome.report.placeholders, 1);
    assert_eq!(outcome.card.content_type(), "image/png");
    let bytes = outcome.card.as_bytes();
    assert!(!bytes.is_empty());
    assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");

    let decoded = image::load_from_memory(bytes).unwrap();
    assert_eq!(decoded.width(), 1200);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn second_job_sharing_keys_decodes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let all = titles(0..20);
    populate(dir.path(), &all);
    let svc = service();

    let first = svc
        .render(RenderJob::new(records(&all[..10]), config(dir.path())))
        .await
        .unwrap();
    assert_eq!(first.report.decodes, 10);

    let mut shared: Vec<String> = all[..10].to_vec();
    shared.reverse();
    let second = svc
        .render(RenderJob::new(records(&shared), config(dir.path())))
        .await
        .unwrap();
    assert_eq!(second.report.decodes, 0);
    assert_eq!(second.report.cache_hits, 10);
    // 背景变体同样复用
    assert_eq!(svc.backgrounds().computed(), 1);
}

#[tokio::test]
async fn empty_job_is_a_validation_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = service()
        .render(RenderJob::new(Vec::new(), config(dir.path())))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn zero_width_is_a_validation_error() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = RenderConfig {
        width: 0,
        ..config(dir.path())
    };
    let err = service()
        .render(RenderJob::new(records(&titles(0..3)), cfg))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn out_of_range_quality_is_clamped_not_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let all = titles(0..3);
    populate(dir.path(), &all);
    let cfg = RenderConfig {
        quality: 0,
        darken_level: 4.0,
        format: ImageFormat::Jpeg,
        ..config(dir.path())
    };
    let outcome = service()
        .render(RenderJob::new(records(&all), cfg))
        .await
        .unwrap();
    assert_eq!(outcome.report.clamped.len(), 2);
    assert_eq!(outcome.card.content_type(), "image/jpeg");
    assert_eq!(&outcome.card.as_bytes()[..2], &[0xFF, 0xD8]);
}

#[tokio::test]
async fn webp_output() {
    let dir = tempfile::tempdir().unwrap();
    let all = titles(0..4);
    populate(dir.path(), &all);
    let cfg = RenderConfig {
        format: ImageFormat::Webp,
        quality: 80,
        glow_enabled: false,
        ..config(dir.path())
    };
    let outcome = service()
        .render(RenderJob::new(records(&all), cfg))
        .await
        .unwrap();
    let bytes = outcome.card.as_bytes();
    assert_eq!(outcome.card.content_type(), "image/webp");
    assert_eq!(&bytes[..4], b"RIFF");
    assert_eq!(&bytes[8..12], b"WEBP");
}

#[tokio::test]
async fn vector_output_references_covers_without_decoding() {
    let dir = tempfile::tempdir().unwrap();
    let all = titles(0..5);
    populate(dir.path(), &all[..4]);
    let cfg = RenderConfig {
        output: OutputKind::Vector,
        embed_images: false,
        public_base_url: Some("https://cdn.example.com/ill".into()),
        ..config(dir.path())
    };
    let svc = service();
    let outcome = svc.render(RenderJob::new(records(&all), cfg)).await.unwrap();

    let svg = String::from_utf8(outcome.card.into_bytes()).unwrap();
    assert!(svg.starts_with("<svg"));
    assert!(svg.contains("https://cdn.example.com/ill/Song0.Artist.png"));
    assert!(svg.contains("#333333"));
    assert_eq!(outcome.report.placeholders, 1);
    assert_eq!(outcome.report.decodes, 0);
    assert_eq!(svc.cache().stats().decodes, 0);
}

#[tokio::test]
async fn vector_output_can_embed_cached_bitmaps() {
    let dir = tempfile::tempdir().unwrap();
    let all = titles(0..3);
    populate(dir.path(), &all);
    let cfg = RenderConfig {
        output: OutputKind::Vector,
        embed_images: true,
        ..config(dir.path())
    };
    let svc = service();
    let outcome = svc.render(RenderJob::new(records(&all), cfg.clone())).await.unwrap();
    assert_eq!(outcome.card.content_type(), "image/svg+xml; charset=utf-8");
    let svg = String::from_utf8(outcome.card.into_bytes()).unwrap();
    // 3 张曲绘 + 1 张背景
    assert_eq!(svg.matches("data:image/jpeg;base64,").count(), 4);
    assert_eq!(outcome.report.decodes, 3);

    let again = svc.render(RenderJob::new(records(&all), cfg)).await.unwrap();
    assert_eq!(again.report.decodes, 0);
}

#[tokio::test]
async fn control_characters_in_titles_render_in_both_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let all = vec!["Bad\u{1}Title".to_string(), "Fine".to_string()];
    let svc = service();

    let raster = svc
        .render(RenderJob::new(records(&all), config(dir.path())))
        .await
        .unwrap();
    assert_eq!(&raster.card.as_bytes()[..8], b"\x89PNG\r\n\x1a\n");

    let cfg = RenderConfig {
        output: OutputKind::Vector,
        embed_images: false,
        ..config(dir.path())
    };
    let vector = svc.render(RenderJob::new(records(&all), cfg)).await.unwrap();
    let svg = String::from_utf8(vector.card.into_bytes()).unwrap();
    assert!(!svg.contains('\u{1}'));
    assert!(svg.contains("BadTitle"));
}

#[tokio::test]
async fn narrow_canvas_is_widened_and_reported() {
    let dir = tempfile::tempdir().unwrap();
    let all = titles(0..1);
    populate(dir.path(), &all);
    let cfg = RenderConfig {
        width: 400,
        ..config(dir.path())
    };
    let columns = cfg.columns;
    let outcome = service()
        .render(RenderJob::new(records(&all), cfg))
        .await
        .unwrap();
    assert_eq!(outcome.report.clamped.len(), 1);
    assert!(outcome.report.clamped[0].starts_with("width 400 -> "));

    let decoded = image::load_from_memory(outcome.card.as_bytes()).unwrap();
    assert_eq!(decoded.width(), min_canvas_width(columns));
}

#[tokio::test]
async fn header_avatar_is_loaded_from_the_avatar_directory() {
    let dir = tempfile::tempdir().unwrap();
    let avatars = tempfile::tempdir().unwrap();
    let all = titles(0..3);
    populate(dir.path(), &all);
    RgbaImage::from_pixel(120, 120, Rgba([220, 30, 30, 255]))
        .save(avatars.path().join("Cat.png"))
        .unwrap();

    let header = CardHeader {
        player_name: "Player".into(),
        avatar: Some("Cat".into()),
        challenge_rank: Some(548),
        rks: Some(15.2),
        ..CardHeader::default()
    };
    let cfg = RenderConfig {
        avatar_dir: avatars.path().to_path_buf(),
        ..config(dir.path())
    };
    let svc = service();
    let outcome = svc
        .render(RenderJob::new(records(&all), cfg.clone()).with_header(header.clone()))
        .await
        .unwrap();
    // 3 张曲绘 + 头像
    assert_eq!(outcome.report.decodes, 4);
    assert_eq!(outcome.report.entries, 3);

    let vector_cfg = RenderConfig {
        output: OutputKind::Vector,
        embed_images: false,
        ..cfg
    };
    let vector = svc
        .render(RenderJob::new(records(&all), vector_cfg).with_header(header))
        .await
        .unwrap();
    let svg = String::from_utf8(vector.card.into_bytes()).unwrap();
    assert!(svg.contains("Cat.png"));
    assert!(svg.contains(">48<"));
}

#[tokio::test]
async fn missing_avatar_falls_back_to_placeholder() {
    let dir = tempfile::tempdir().unwrap();
    let avatars = tempfile::tempdir().unwrap();
    let all = titles(0..2);
    populate(dir.path(), &all);
    let header = CardHeader {
        avatar: Some("Nobody".into()),
        ..CardHeader::default()
    };
    let cfg = RenderConfig {
        avatar_dir: avatars.path().to_path_buf(),
        ..config(dir.path())
    };
    let outcome = service()
        .render(RenderJob::new(records(&all), cfg).with_header(header))
        .await
        .unwrap();
    assert_eq!(outcome.report.covers, 2);
    assert_eq!(outcome.report.decodes, 2);
}

fn song() -> SongCard {
    SongCard {
        title: "Song0".into(),
        composer: "Artist".into(),
        illustrator: "Painter".into(),
        constants: [(Difficulty::HD, 10.4), (Difficulty::IN, 15.8)]
            .into_iter()
            .collect(),
    }
}

#[tokio::test]
async fn song_card_renders_as_raster() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path(), &titles(0..1));
    let cfg = RenderConfig {
        width: 900,
        ..config(dir.path())
    };
    let outcome = service().render(RenderJob::song(song(), cfg)).await.unwrap();
    assert_eq!(outcome.report.entries, 1);
    assert_eq!(outcome.report.covers, 1);
    assert_eq!(outcome.report.decodes, 1);

    let decoded = image::load_from_memory(outcome.card.as_bytes()).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (900, 600));
}

#[tokio::test]
async fn song_card_renders_as_vector_with_cover_backdrop() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path(), &titles(0..1));
    let cfg = RenderConfig {
        output: OutputKind::Vector,
        embed_images: false,
        public_base_url: Some("https://cdn.example.com/ill".into()),
        ..config(dir.path())
    };
    let outcome = service().render(RenderJob::song(song(), cfg)).await.unwrap();
    let svg = String::from_utf8(outcome.card.into_bytes()).unwrap();
    assert!(svg.contains("IN 15.8"));
    assert!(svg.contains("HD 10.4"));
    assert!(svg.contains("Painter"));
    // 曲绘既是封面也是背景
    assert_eq!(
        svg.matches("https://cdn.example.com/ill/Song0.Artist.png").count(),
        2
    );
}

#[tokio::test]
async fn song_card_without_cover_uses_placeholder() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = service()
        .render(RenderJob::song(song(), config(dir.path())))
        .await
        .unwrap();
    assert_eq!(outcome.report.placeholders, 1);
    assert_eq!(outcome.report.covers, 0);
}
