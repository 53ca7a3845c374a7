/*
 * petrel mail transfer agent
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

//! petrel executable

use anyhow::Context;
use clap::Parser;
use petrel_config::Config;
use petrel_server::{bind_socket, Server};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path of the JSON configuration.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
}

fn bind_all(addrs: &[std::net::SocketAddr]) -> anyhow::Result<Vec<std::net::TcpListener>> {
    addrs.iter().map(|addr| bind_socket(*addr)).collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::from_json_file(path)
            .with_context(|| format!("cannot load '{}'", path.display()))?,
        None => Config::default(),
    };

    let interfaces = &config.server.interfaces;
    let sockets = (
        bind_all(&interfaces.addr)?,
        bind_all(&interfaces.addr_submission)?,
        bind_all(&interfaces.addr_submissions)?,
    );

    let server = Server::new(std::sync::Arc::new(config), None, None, None)?;
    server.listen(sockets).await
}
