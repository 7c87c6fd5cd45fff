// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

use anyhow::Result;
use std::sync::Arc;

use mep2d::{config, mep2, store};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = config::load()?;
    let store = Arc::new(store::MailStore::open(&config.store.path, config.store.max_message_size)?);

    mep2::server::start(config.server, store).await
}
