use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use image::Rgb;

use crate::caching::{FetchError, ImageError};
use crate::config::{Config, InMemoryCacheConfig};
use crate::download::ByteFetcher;
use crate::services::SharedServices;
use crate::test::{self, TestFetcher, png_bytes};

use super::*;

fn png(width: u32, height: u32, color: [u8; 3]) -> FetchResult<Bytes> {
    Ok(Bytes::from(png_bytes(width, height, color)))
}

fn loader(fetcher: &Arc<TestFetcher>, config: &InMemoryCacheConfig) -> ImageLoader {
    ImageLoader::new(fetcher.clone(), config, tokio::runtime::Handle::current())
}

#[tokio::test(start_paused = true)]
async fn test_missing_path() {
    test::setup();

    let fetcher = TestFetcher::new(Duration::from_millis(10)).into_ref();
    let loader = loader(&fetcher, &Default::default());

    assert_eq!(loader.load_raw(None).await, Ok(None));
    assert!(loader.load_image(None).await.unwrap().is_none());
    assert!(loader.cached_image(None).is_none());
    assert!(loader.placeholder_color(None).is_none());
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_load_image_caches() {
    test::setup();

    let fetcher = TestFetcher::new(Duration::from_millis(10))
        .with_response("/poster.png", png(4, 3, [10, 20, 30]))
        .into_ref();
    let loader = loader(&fetcher, &Default::default());

    assert!(loader.cached_image(Some("/poster.png")).is_none());

    let first = loader.load_image(Some("/poster.png")).await.unwrap().unwrap();
    assert_eq!((first.width(), first.height()), (4, 3));

    let second = loader.load_image(Some("/poster.png")).await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(fetcher.calls(), 1);

    let cached = loader.cached_image(Some("/poster.png")).unwrap();
    assert!(Arc::ptr_eq(&first, &cached));
    assert_eq!(loader.memory_usage(), (1, 36));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_loads_share_image() {
    test::setup();

    let fetcher = TestFetcher::new(Duration::from_millis(50))
        .with_response("/poster.png", png(2, 2, [1, 2, 3]))
        .into_ref();
    let loader = loader(&fetcher, &Default::default());

    let (first, second, raw) = futures::join!(
        loader.load_image(Some("/poster.png")),
        loader.load_image(Some("/poster.png")),
        loader.load_raw(Some("/poster.png"))
    );

    let first = first.unwrap().unwrap();
    let second = second.unwrap().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(raw.unwrap().unwrap(), png(2, 2, [1, 2, 3]).unwrap());
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(loader.in_flight_count(), 0);
}

/// A load started while another one is still decoding the same image joins it.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_load_while_decoding_joins() {
    test::setup();

    let fetcher = TestFetcher::new(Duration::from_millis(10))
        .with_response("/backdrop.png", png(1500, 1000, [40, 80, 120]))
        .into_ref();
    let loader = Arc::new(loader(&fetcher, &Default::default()));

    let first = tokio::spawn({
        let loader = Arc::clone(&loader);
        async move { loader.load_image(Some("/backdrop.png")).await }
    });

    // the download is done, decoding has at most just started
    fetcher.fetch_returned().await;
    let second = loader.load_image(Some("/backdrop.png")).await.unwrap().unwrap();
    let first = first.await.unwrap().unwrap().unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(loader.in_flight_count(), 0);
    assert!(loader.cached_image(Some("/backdrop.png")).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_load_raw_is_not_cached() {
    test::setup();

    let fetcher = TestFetcher::new(Duration::from_millis(10))
        .with_response("/backdrop.png", png(2, 2, [0, 0, 0]))
        .into_ref();
    let loader = loader(&fetcher, &Default::default());

    let bytes = loader.load_raw(Some("/backdrop.png")).await.unwrap();
    assert!(bytes.is_some());
    assert!(loader.cached_image(Some("/backdrop.png")).is_none());

    loader.load_raw(Some("/backdrop.png")).await.unwrap();
    assert_eq!(fetcher.calls(), 2);
    assert_eq!(loader.memory_usage(), (0, 0));
}

#[tokio::test(start_paused = true)]
async fn test_fetch_errors() {
    test::setup();

    let fetcher = TestFetcher::new(Duration::from_millis(10))
        .with_response(
            "/private.png",
            Err(FetchError::PermissionDenied("403 Forbidden".into())),
        )
        .into_ref();
    let loader = loader(&fetcher, &Default::default());

    let err = loader.load_image(Some("/missing.png")).await.unwrap_err();
    assert_eq!(err, ImageError::Fetch(FetchError::NotFound));

    let err = loader.load_raw(Some("/private.png")).await.unwrap_err();
    assert_eq!(err, FetchError::PermissionDenied("403 Forbidden".into()));

    // nothing is remembered about failures
    loader.load_image(Some("/missing.png")).await.unwrap_err();
    assert_eq!(fetcher.calls_for("/missing.png"), 2);
    assert_eq!(loader.memory_usage(), (0, 0));
}

#[tokio::test(start_paused = true)]
async fn test_decode_errors() {
    test::setup();

    let fetcher = TestFetcher::new(Duration::from_millis(10))
        .with_response("/truncated.png", Ok(Bytes::from_static(b"\x89PNG\r\n")))
        .into_ref();
    let loader = loader(&fetcher, &Default::default());

    let (first, second) = futures::join!(
        loader.load_image(Some("/truncated.png")),
        loader.load_image(Some("/truncated.png"))
    );
    assert!(matches!(first, Err(ImageError::Decode(_))));
    assert!(matches!(second, Err(ImageError::Decode(_))));
    assert_eq!(fetcher.calls(), 1);

    // the raw bytes are still fine to load
    let raw = loader.load_raw(Some("/truncated.png")).await.unwrap();
    assert_eq!(raw.unwrap().as_ref(), b"\x89PNG\r\n");

    fetcher.set_response("/truncated.png", png(1, 1, [0, 0, 0]));
    assert!(loader.load_image(Some("/truncated.png")).await.is_ok());
    assert_eq!(fetcher.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cached_image_keeps_recency() {
    test::setup();

    let fetcher = TestFetcher::new(Duration::from_millis(10))
        .with_response("/a.png", png(1, 1, [0, 0, 0]))
        .with_response("/b.png", png(1, 1, [0, 0, 0]))
        .with_response("/c.png", png(1, 1, [0, 0, 0]))
        .into_ref();
    let config = InMemoryCacheConfig {
        decoded_count_limit: 2,
        ..Default::default()
    };
    let loader = loader(&fetcher, &config);

    loader.load_image(Some("/a.png")).await.unwrap();
    loader.load_image(Some("/b.png")).await.unwrap();

    // peeking does not save "/a.png" from eviction
    assert!(loader.cached_image(Some("/a.png")).is_some());
    loader.load_image(Some("/c.png")).await.unwrap();

    assert!(loader.cached_image(Some("/a.png")).is_none());
    assert!(loader.cached_image(Some("/b.png")).is_some());
    assert!(loader.cached_image(Some("/c.png")).is_some());

    // a memory hit does count as a use
    loader.load_image(Some("/b.png")).await.unwrap();
    loader.load_image(Some("/a.png")).await.unwrap();

    assert!(loader.cached_image(Some("/b.png")).is_some());
    assert!(loader.cached_image(Some("/c.png")).is_none());
    assert_eq!(fetcher.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_images_are_not_cached() {
    test::setup();

    let fetcher = TestFetcher::new(Duration::from_millis(10))
        .with_response("/small.png", png(2, 1, [0, 0, 0]))
        .with_response("/large.png", png(8, 8, [0, 0, 0]))
        .into_ref();
    let config = InMemoryCacheConfig {
        decoded_cost_limit: 100,
        ..Default::default()
    };
    let loader = loader(&fetcher, &config);

    loader.load_image(Some("/small.png")).await.unwrap();
    let large = loader.load_image(Some("/large.png")).await.unwrap().unwrap();
    assert_eq!(large.cost(), 8 * 8 * 3);

    assert!(loader.cached_image(Some("/large.png")).is_none());
    assert!(loader.cached_image(Some("/small.png")).is_some());
    assert_eq!(loader.memory_usage(), (1, 6));
}

#[tokio::test(start_paused = true)]
async fn test_invalidate() {
    test::setup();

    let fetcher = TestFetcher::new(Duration::from_millis(10))
        .with_response("/poster.png", png(1, 1, [0, 0, 0]))
        .into_ref();
    let loader = loader(&fetcher, &Default::default());

    loader.load_image(Some("/poster.png")).await.unwrap();
    assert!(loader.invalidate("/poster.png"));
    assert!(!loader.invalidate("/poster.png"));
    assert!(loader.cached_image(Some("/poster.png")).is_none());

    loader.load_image(Some("/poster.png")).await.unwrap();
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_placeholder_color() {
    test::setup();

    let fetcher = TestFetcher::new(Duration::from_millis(10))
        .with_response("/poster.png", png(3, 2, [200, 100, 50]))
        .into_ref();
    let loader = loader(&fetcher, &Default::default());

    assert!(loader.placeholder_color(Some("/poster.png")).is_none());
    loader.load_image(Some("/poster.png")).await.unwrap();
    assert_eq!(
        loader.placeholder_color(Some("/poster.png")),
        Some(Rgb([200, 100, 50]))
    );
}

#[tokio::test(start_paused = true)]
async fn test_shared_services() {
    test::setup();

    let fetcher = TestFetcher::new(Duration::from_millis(10))
        .with_response("/poster.png", png(1, 1, [0, 0, 0]))
        .into_ref();
    let services = SharedServices::with_fetcher(
        Config::default(),
        fetcher.clone(),
        tokio::runtime::Handle::current(),
    )
    .unwrap();

    let image = services.images.load_image(Some("/poster.png")).await.unwrap();
    assert!(image.is_some());

    let raw = services.fetcher.fetch_bytes("/poster.png").await.unwrap();
    assert_eq!(raw, png(1, 1, [0, 0, 0]).unwrap());
    assert_eq!(fetcher.calls(), 2);
}
