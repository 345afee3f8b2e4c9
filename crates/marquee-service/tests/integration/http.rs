use std::time::Duration;

use marquee_service::caching::FetchError;
use marquee_service::download::ByteFetcher;

use crate::{ArtworkServer, png_bytes, setup_service};

#[tokio::test]
async fn test_download() {
    let server = ArtworkServer::new();
    let poster = png_bytes(2, 3, [10, 20, 30]);
    server.insert("poster.png", poster.clone());

    let services = setup_service(server.base_url(), |_| {});

    let bytes = services.fetcher.fetch_bytes("/poster.png").await.unwrap();
    assert_eq!(bytes.as_ref(), poster.as_slice());
    assert_eq!(server.hits("/artwork/poster.png"), 1);

    let err = services.fetcher.fetch_bytes("/missing.png").await.unwrap_err();
    assert_eq!(err, FetchError::NotFound);
}

#[tokio::test]
async fn test_base_url_with_path() {
    let server = ArtworkServer::new();
    server.insert("w500/poster.png", png_bytes(1, 1, [0, 0, 0]));

    let services = setup_service(server.url("artwork/w500"), |_| {});

    services.fetcher.fetch_bytes("poster.png").await.unwrap();
    services.fetcher.fetch_bytes("/poster.png").await.unwrap();
    assert_eq!(server.hits("/artwork/w500/poster.png"), 2);
}

#[tokio::test]
async fn test_status_codes() {
    let server = ArtworkServer::new();

    for (status, expected) in [
        ("401", FetchError::PermissionDenied("401 Unauthorized".into())),
        ("403", FetchError::PermissionDenied("403 Forbidden".into())),
        ("404", FetchError::NotFound),
        ("410", FetchError::NotFound),
        (
            "500",
            FetchError::DownloadError("500 Internal Server Error".into()),
        ),
        ("503", FetchError::DownloadError("503 Service Unavailable".into())),
    ] {
        let base_url = server.url(&format!("respond_statuscode/{status}"));
        let services = setup_service(base_url, |_| {});

        let err = services.fetcher.fetch_bytes("/poster.png").await.unwrap_err();
        assert_eq!(err, expected, "status {status}");
    }
}

#[tokio::test]
async fn test_head_timeout() {
    let server = ArtworkServer::new();
    server.insert("poster.png", png_bytes(1, 1, [0, 0, 0]));

    let services = setup_service(server.url("delay/1s"), |config| {
        config.head_timeout = Duration::from_millis(100);
    });

    let err = services.fetcher.fetch_bytes("/poster.png").await.unwrap_err();
    assert_eq!(err, FetchError::Timeout(Duration::from_millis(100)));
}

#[tokio::test]
async fn test_connection_refused() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let base_url = format!("http://127.0.0.1:{port}/artwork").parse().unwrap();
    let services = setup_service(base_url, |_| {});

    let err = services.fetcher.fetch_bytes("/poster.png").await.unwrap_err();
    assert!(matches!(err, FetchError::DownloadError(_)), "{err:?}");
}
