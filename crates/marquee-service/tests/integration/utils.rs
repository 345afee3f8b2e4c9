use marquee_service::config::Config;
use marquee_service::services::SharedServices;
use marquee_test as test;
use url::Url;

pub use test::{ArtworkServer, png_bytes};

/// Setup tests and create the services, fetching artwork from `base_url`.
///
/// The `update_config` closure can modify any default configuration if needed before the
/// services are created.
pub fn setup_service(base_url: Url, update_config: impl FnOnce(&mut Config)) -> SharedServices {
    test::setup();

    let mut config = Config::default();
    config.artwork.base_url = base_url;
    update_config(&mut config);

    let handle = tokio::runtime::Handle::current();
    SharedServices::new(config, handle).unwrap()
}
