use devapi_host::config::HostConfig;
use tokio::task::LocalSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), devapi_host::HostError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = HostConfig::from_env()?;
    info!(addr = %config.addr(), root = %config.root().display(), flash = %config.flash().display(), "starting devapi host");

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received ctrl-c"),
            Err(e) => error!(cause = %e, "can't listen for ctrl-c"),
        }
        ctrl_c.cancel();
    });

    LocalSet::new().run_until(devapi_host::run(config, shutdown)).await
}
