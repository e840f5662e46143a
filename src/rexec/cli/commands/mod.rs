/*
 * Copyright (C) 2024 The Rexec Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::error::Error;
use std::sync::Arc;

use crate::rexec::cli::args::{Commands, Rexec};
use crate::rexec::config::ProxyConfig;
use crate::rexec::server;

pub mod cp;

pub async fn dispatch(cli: Rexec) -> Result<i32, Box<dyn Error + Send + Sync>> {
    match cli.command {
        Commands::Server(args) => {
            let config = ProxyConfig::load(&args)?;
            server::serve(Arc::new(config)).await?;
            Ok(0)
        }
        Commands::Cp(args) => cp::run(&args).await,
    }
}
