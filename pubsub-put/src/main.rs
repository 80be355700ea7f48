/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

use clap::Parser;
use pubsub_session::{
    Config, Encoding, MemoryOptions, MemoryTransport, Owned, Publisher, PublisherOptions,
    PutOptions, Session, SessionError, Transport,
};
use session_config_static_file::StaticConfigFile;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const APP_TAG: &str = "pubsub-put:";

#[derive(Debug, Parser)]
#[command(name = "pubsub-put")]
#[command(about = "Open a session, publish one value, then tear everything down")]
struct Args {
    /// Key expression to publish on
    #[arg(short, long, default_value = "demo/example/session_move_test")]
    key: String,

    /// Value to publish
    #[arg(short, long, default_value = "Session Move!")]
    value: String,

    /// Encoding of the value
    #[arg(short, long, default_value = "text/plain")]
    encoding: String,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// How long to keep the session open after publishing, in milliseconds
    #[arg(long, default_value_t = 1000)]
    linger_ms: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{APP_TAG} {err}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> Result<(), SessionError> {
    let config = match &args.config {
        Some(path) => StaticConfigFile::new(path.as_str()).load()?,
        None => Config::default(),
    };
    let encoding = Encoding::parse(&args.encoding)?;

    let (transport, mut router) = MemoryTransport::new(MemoryOptions::default());
    let router_task = tokio::spawn(async move {
        while let Some(delivery) = router.recv().await {
            info!(
                "{APP_TAG} delivered {} ({}) on {} via {}: {}",
                delivery.publication.encoding,
                delivery.publication.len(),
                delivery.key_expr,
                delivery.publication.target,
                String::from_utf8_lossy(&delivery.publication.payload)
            );
        }
    });

    let result = publish_once(&args, config, encoding, Arc::new(transport)).await;
    router_task.abort();
    result
}

/// Opens a session, publishes one value and always releases the publisher and the session
/// before returning, whether publishing succeeded or not.
async fn publish_once(
    args: &Args,
    config: Config,
    encoding: Encoding,
    transport: Arc<dyn Transport>,
) -> Result<(), SessionError> {
    info!("{APP_TAG} opening session");
    let mut session = Owned::new(Session::open(config, transport).await?);
    let mut publisher: Owned<Publisher> = Owned::null();

    let published = async {
        info!("{APP_TAG} declaring publisher on '{}'", args.key);
        publisher = Owned::new(
            session
                .loan()?
                .declare_publisher(args.key.as_str(), PublisherOptions::default())
                .await?,
        );

        // hand the session to a new owner; the publisher keeps working
        let moved = session.take()?;
        session = moved;

        info!("{APP_TAG} putting '{}'", args.value);
        publisher
            .loan()?
            .put(
                args.value.clone(),
                PutOptions::default().encoding(encoding.clone()),
            )
            .await?;

        tokio::time::sleep(Duration::from_millis(args.linger_ms)).await;
        Ok::<(), SessionError>(())
    }
    .await;

    if publisher.check() {
        if let Err(err) = publisher.release().await {
            warn!("{APP_TAG} unable to undeclare publisher: {err}");
        }
    }
    let closed = session.release().await;

    published?;
    closed?;
    info!("{APP_TAG} done");
    Ok(())
}
