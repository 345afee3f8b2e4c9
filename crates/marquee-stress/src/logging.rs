//! Sentry, logging and metrics for the stresstest.
//!
//! Each of them can be pointed at a local sink which swallows everything. That way the machinery
//! is exercised like in production, without an external service skewing the results.

use std::collections::BTreeMap;
use std::env;
use std::future::Future;
use std::io::Write;
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::pin::Pin;

use anyhow::{Context, Result};
use marquee_service::config::Config as MarqueeConfig;
use marquee_service::{logging, metrics, services};

#[derive(Debug, Default)]
pub struct Config {
    pub backtraces: bool,
    pub sentry: bool,
    pub tracing: bool,
    pub metrics: bool,
}

/// A local sink, which has to be spawned on the runtime.
pub type Sink = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Keeps Sentry alive for as long as it is held.
#[derive(Default)]
pub struct Guard {
    _sentry: Option<sentry::ClientInitGuard>,
    pub http_sink: Option<Sink>,
    pub udp_sink: Option<Sink>,
}

/// Initializes Sentry, logging and metrics, using the local sinks as requested by `config`.
///
/// Whatever is not redirected to a local sink is set up according to `service_config`.
///
/// # Safety
/// This function uses [`std::env::set_var`] to modify the environment. That function is only safe
/// to call in single-threaded contexts to prevent unsynchronized concurrent access to the environment.
pub unsafe fn init(config: Config, service_config: &MarqueeConfig) -> Result<Guard> {
    if config.backtraces {
        // SAFETY: As documented, this function may only be called in a single-threaded context.
        unsafe { env::set_var("RUST_BACKTRACE", "1") };
    }

    let (sentry, http_sink) = if config.sentry {
        let (dsn, sink) = sentry_sink().context("failed to bind local Sentry sink")?;
        let options = sentry::ClientOptions {
            release: sentry::release_name!(),
            traces_sample_rate: 1.0,
            ..Default::default()
        };
        (Some(sentry::init((dsn, options))), Some(sink))
    } else {
        let sentry = service_config.sentry_dsn.clone().map(|dsn| {
            sentry::init(sentry::ClientOptions {
                dsn: Some(dsn),
                release: sentry::release_name!(),
                ..Default::default()
            })
        });
        (sentry, None)
    };

    if config.tracing {
        // All the formatting happens, but the output goes nowhere.
        logging::init_json_logging("info", || NoopWriter);
    } else {
        // SAFETY: Forwarded from the safety requirements of this function.
        unsafe { logging::init_logging(service_config) };
    }

    let udp_sink = if config.metrics {
        let (host, sink) = statsd_sink().context("failed to bind local statsd sink")?;

        // have some default tags, just to be closer to the real world config
        let tags = BTreeMap::from([
            ("host".to_owned(), "stresstest".to_owned()),
            ("env".to_owned(), "stresstest".to_owned()),
        ]);
        metrics::configure_statsd("marquee", host, tags)?;
        Some(sink)
    } else {
        services::configure_metrics(service_config)?;
        None
    };

    Ok(Guard {
        _sentry: sentry,
        http_sink,
        udp_sink,
    })
}

/// An HTTP server answering every Sentry envelope with `OK`, and a DSN pointing to it.
fn sentry_sink() -> std::io::Result<(String, Sink)> {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))?;
    listener.set_nonblocking(true)?;
    let dsn = format!("http://some_token@{}/1234", listener.local_addr()?);

    let sink: Sink = Box::pin(async move {
        async fn ok() -> &'static str {
            "OK"
        }
        use axum::handler::HandlerWithoutStateExt;

        if let Ok(listener) = tokio::net::TcpListener::from_std(listener) {
            axum::serve(listener, ok.into_make_service()).await.ok();
        }
    });

    Ok((dsn, sink))
}

/// A UDP socket discarding every statsd packet, and its address.
fn statsd_sink() -> std::io::Result<(SocketAddr, Sink)> {
    let socket = UdpSocket::bind(SocketAddr::from(([127, 0, 0, 1], 0)))?;
    socket.set_nonblocking(true)?;
    let addr = socket.local_addr()?;

    let sink: Sink = Box::pin(async move {
        let Ok(socket) = tokio::net::UdpSocket::from_std(socket) else {
            return;
        };
        let mut buf = Vec::with_capacity(1024);
        loop {
            buf.clear();
            if socket.recv_buf(&mut buf).await.is_err() {
                break;
            }
        }
    });

    Ok((addr, sink))
}

struct NoopWriter;
impl Write for NoopWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        // try to prevent the compiler from optimizing away all the formatting code:
        let buf = std::hint::black_box(buf);

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
