use std::process::ExitCode;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use deploy_listener::config;
use deploy_listener::dispatcher::{DeployHandler, Dispatcher};
use deploy_listener::env::Config;
use deploy_listener::rabbitmq::{AmqpBroker, Subscriber};
use deploy_listener::shutdown;
use deploy_listener::updater::{DockerEngine, Updater};

fn load_configuration() -> Result<Config> {
    let file_config = config::find_config_file()
        .map(|path| config::load_config(&path))
        .transpose()?;

    Config::load(file_config)
}

async fn run() -> Result<()> {
    let Config {
        subscriber: subscriber_config,
        docker_host,
    } = load_configuration().context("Failed to load configuration")?;

    let engine = DockerEngine::new(&docker_host).context("Failed to set up Docker client")?;
    let dispatcher = Dispatcher::new(DeployHandler::new(Updater::new(engine)));

    let token = CancellationToken::new();
    shutdown::install_signal_handler(token.clone());

    info!(
        exchange = %subscriber_config.exchange,
        queue = %subscriber_config.queue,
        "Starting deploy listener"
    );
    let subscriber = Subscriber::new(subscriber_config, AmqpBroker::default(), token.clone());
    let (deliveries, subscription) = subscriber.consume();

    let dispatch = tokio::spawn(async move { dispatcher.run(deliveries).await });

    let outcome = subscription.await.context("Subscriber task failed")?;
    token.cancel();
    let handled = dispatch.await.context("Dispatcher task failed")?;
    info!(handled, "Deploy listener stopped");

    outcome.context("Subscription stopped")
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
