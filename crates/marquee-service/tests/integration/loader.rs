use std::sync::Arc;

use marquee_service::caching::{FetchError, ImageError};

use crate::{ArtworkServer, png_bytes, setup_service};

#[tokio::test]
async fn test_concurrent_raw_loads() {
    let server = ArtworkServer::new();
    server.insert("poster.jpg", &b"0123456789"[..]);

    let services = setup_service(server.url("delay/50ms"), |_| {});
    let images = &services.images;

    let (a, b, c) = futures::join!(
        images.load_raw(Some("/poster.jpg")),
        images.load_raw(Some("/poster.jpg")),
        images.load_raw(Some("/poster.jpg"))
    );

    for bytes in [a, b, c] {
        assert_eq!(bytes.unwrap().unwrap().as_ref(), b"0123456789");
    }
    assert_eq!(server.accesses(), 1);
    assert_eq!(images.in_flight_count(), 0);
}

#[tokio::test]
async fn test_concurrent_image_loads() {
    let server = ArtworkServer::new();
    server.insert("poster.png", png_bytes(4, 6, [120, 80, 40]));

    let services = setup_service(server.url("delay/50ms"), |_| {});
    let images = &services.images;

    let (a, b) = futures::join!(
        images.load_image(Some("/poster.png")),
        images.load_image(Some("/poster.png"))
    );
    let (a, b) = (a.unwrap().unwrap(), b.unwrap().unwrap());
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!((a.width(), a.height()), (4, 6));
    assert_eq!(server.accesses(), 1);

    // served from memory from now on
    let c = images.load_image(Some("/poster.png")).await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&a, &c));
    assert_eq!(server.accesses(), 0);
    assert_eq!(images.memory_usage(), (1, 4 * 6 * 3));
}

#[tokio::test]
async fn test_errors_are_retried() {
    let server = ArtworkServer::new();

    let services = setup_service(server.base_url(), |_| {});
    let images = &services.images;

    let err = images.load_image(Some("/late.png")).await.unwrap_err();
    assert_eq!(err, ImageError::Fetch(FetchError::NotFound));
    assert!(images.cached_image(Some("/late.png")).is_none());

    server.insert("late.png", png_bytes(1, 1, [0, 0, 0]));
    let image = images.load_image(Some("/late.png")).await.unwrap();
    assert!(image.is_some());
    assert_eq!(server.accesses(), 2);
}

#[tokio::test]
async fn test_malformed_image() {
    let server = ArtworkServer::new();

    let services = setup_service(server.url("garbage_data"), |_| {});
    let images = &services.images;

    let err = images.load_image(Some("/not-a-poster")).await.unwrap_err();
    assert!(matches!(err, ImageError::Decode(_)), "{err:?}");
    assert!(images.cached_image(Some("/not-a-poster")).is_none());

    // the raw bytes are served regardless
    let bytes = images.load_raw(Some("/not-a-poster")).await.unwrap().unwrap();
    assert_eq!(bytes.as_ref(), b"not-a-poster");
}
