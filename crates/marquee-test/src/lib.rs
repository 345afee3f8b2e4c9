//! Helpers for testing the artwork loader.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using an [`ArtworkServer`], make sure that the server is held until all requests to
//!    the server have been made. Dropping it stops serving, and all connections to it will fail.
//!    To avoid this, assign it to a variable: `let server = ArtworkServer::new();`.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{self, Request};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use image::{ImageFormat, Rgb, RgbImage};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;
use url::Url;

/// Captures the logs of `marquee_service` in the test output.
///
/// Call this first in every test. Logs of other crates, such as `hyper` or `reqwest`, are muted.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("marquee_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Encodes a PNG of the given dimensions, filled with a single color.
pub fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let mut png = Cursor::new(Vec::new());
    RgbImage::from_pixel(width, height, Rgb(color))
        .write_to(&mut png, ImageFormat::Png)
        .unwrap();
    png.into_inner()
}

/// Serves a [`Router`] on a random local port until dropped.
///
/// Needs to be created within a `tokio` runtime, usually that of a `tokio::test`.
#[derive(Debug)]
pub struct Server {
    task: tokio::task::JoinHandle<()>,
    addr: SocketAddr,
}

impl Server {
    pub fn with_router(router: Router) -> Self {
        let listener = std::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();

        let task = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, router).await.unwrap();
        });

        Self { task, addr }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// An absolute `localhost` URL for `path` on this server.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        Url::parse(&format!("http://localhost:{}/{path}", self.addr.port())).unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.task.abort();
    }
}

type Artwork = Arc<Mutex<BTreeMap<String, Bytes>>>;

fn serve_artwork(artwork: &Artwork, path: &str) -> Response {
    let path = path.trim_start_matches('/');
    match artwork.lock().unwrap().get(path) {
        Some(data) => data.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// An artwork server holding its files in memory, counting the requests it receives.
///
/// Routes:
///
///  - `/artwork/*path`: Serves the file inserted at `path`, or responds with `404`.
///  - `/delay/:time/*path`: Waits for the given `humantime` duration, then serves like
///    `/artwork`.
///  - `/respond_statuscode/:num/*tail`: Responds with an empty body and the given status.
///  - `/garbage_data/*tail`: Responds with `tail` as text, which is not an image.
pub struct ArtworkServer {
    server: Server,
    artwork: Artwork,
    hits: Arc<Mutex<BTreeMap<String, usize>>>,
}

impl ArtworkServer {
    pub fn new() -> Self {
        let artwork = Artwork::default();
        let hits = Arc::new(Mutex::new(BTreeMap::new()));

        let count_hits = {
            let hits = hits.clone();
            move |req: Request, next: Next| {
                *hits
                    .lock()
                    .unwrap()
                    .entry(req.uri().path().to_owned())
                    .or_default() += 1;
                next.run(req)
            }
        };

        let router = Router::new()
            .route(
                "/artwork/*path",
                get({
                    let artwork = artwork.clone();
                    move |extract::Path(path): extract::Path<String>| async move {
                        serve_artwork(&artwork, &path)
                    }
                }),
            )
            .route(
                "/delay/:time/*path",
                get({
                    let artwork = artwork.clone();
                    move |extract::Path((time, path)): extract::Path<(String, String)>| async move {
                        let duration = humantime::parse_duration(&time).unwrap();
                        tokio::time::sleep(duration).await;

                        serve_artwork(&artwork, &path)
                    }
                }),
            )
            .route(
                "/respond_statuscode/:num/*tail",
                get(
                    |extract::Path((num, _)): extract::Path<(u16, String)>| async move {
                        StatusCode::from_u16(num).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                    },
                ),
            )
            .route(
                "/garbage_data/*tail",
                get(|extract::Path(tail): extract::Path<String>| async move { tail }),
            )
            .layer(middleware::from_fn(count_hits));

        let server = Server::with_router(router);

        Self {
            server,
            artwork,
            hits,
        }
    }

    /// Makes `data` available at `/artwork/<path>`.
    pub fn insert(&self, path: &str, data: impl Into<Bytes>) {
        let path = path.trim_start_matches('/').to_owned();
        self.artwork.lock().unwrap().insert(path, data.into());
    }

    /// The number of requests for the given URL path, such as `/artwork/poster.png`.
    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or_default()
    }

    /// Takes the total number of requests received so far, resetting the counts.
    pub fn accesses(&self) -> usize {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_values().sum()
    }

    pub fn url(&self, path: &str) -> Url {
        self.server.url(path)
    }

    /// The base URL under which all inserted artwork is served.
    pub fn base_url(&self) -> Url {
        self.url("artwork/")
    }
}

impl Default for ArtworkServer {
    fn default() -> Self {
        Self::new()
    }
}
