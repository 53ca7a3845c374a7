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

use crate::handler::{DefaultHandler, HandlerFactory, Realm};
use crate::store::MailboxFactory;
use anyhow::Context;
use petrel_common::{ConnectionKind, ConnectionMetadata, Reply};
use petrel_config::{get_rustls_config, Config, NetworkScreen};
use petrel_protocol::{rustls, AcceptArgs, Receiver, SessionHandler};
use tokio_stream::StreamExt;

/// Bind a listener, left non-blocking so the runtime can adopt it.
///
/// # Errors
///
/// * the address cannot be bound or configured
pub fn bind_socket(addr: std::net::SocketAddr) -> anyhow::Result<std::net::TcpListener> {
    let socket = std::net::TcpListener::bind(addr)
        .with_context(|| format!("failed to bind '{addr}'"))?;
    socket
        .set_nonblocking(true)
        .with_context(|| format!("failed to make '{addr}' non-blocking"))?;
    Ok(socket)
}

/// An accepted connection on its way to a session.
struct Inbound {
    kind: ConnectionKind,
    server_addr: std::net::SocketAddr,
    client_addr: std::net::SocketAddr,
    stream: tokio::net::TcpStream,
}

/// TCP/IP server: accepts on every configured interface, screens peers, and
/// spawns one session task per admitted connection.
pub struct Server {
    busy_reply: Reply,
    screened_reply: Reply,

    config: std::sync::Arc<Config>,
    tls_config: Option<std::sync::Arc<rustls::ServerConfig>>,
    screen: NetworkScreen,
    xclient_screen: Option<NetworkScreen>,
    factory: Option<std::sync::Arc<dyn HandlerFactory>>,
    realm: Option<std::sync::Arc<Realm>>,
    mailboxes: Option<std::sync::Arc<dyn MailboxFactory>>,
}

impl Server {
    /// Create a server with the configuration provided.
    ///
    /// # Errors
    ///
    /// * cannot initialize the [rustls] config
    #[allow(clippy::expect_used)]
    pub fn new(
        config: std::sync::Arc<Config>,
        factory: Option<std::sync::Arc<dyn HandlerFactory>>,
        realm: Option<std::sync::Arc<Realm>>,
        mailboxes: Option<std::sync::Arc<dyn MailboxFactory>>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            busy_reply: "554 5.3.2 Too many concurrent connections, try again later\r\n"
                .parse::<Reply>()
                .expect("valid smtp reply"),
            screened_reply: "554 5.7.1 Connection refused\r\n"
                .parse::<Reply>()
                .expect("valid smtp reply"),
            tls_config: if let Some(tls) = &config.server.tls {
                Some(std::sync::Arc::new(get_rustls_config(tls)?))
            } else {
                None
            },
            screen: config.server.networks.to_screen(),
            xclient_screen: (!config.server.xclient.trusted.is_empty()).then(|| {
                petrel_config::FieldServerNetworks {
                    allow: config.server.xclient.trusted.clone(),
                    deny: vec![],
                }
                .to_screen()
            }),
            factory,
            realm,
            mailboxes,
            config,
        })
    }

    fn is_xclient_authorized(&self, peer: std::net::IpAddr) -> bool {
        self.xclient_screen
            .as_ref()
            .map_or(false, |screen| screen.permits(peer))
    }

    async fn refuse(mut stream: tokio::net::TcpStream, reply: &Reply) {
        if let Err(error) =
            tokio::io::AsyncWriteExt::write_all(&mut stream, reply.to_string().as_bytes()).await
        {
            tracing::error!(%error, "failed to deliver the refusal");
        }
        if let Err(error) = tokio::io::AsyncWriteExt::shutdown(&mut stream).await {
            tracing::error!(%error, "failed to close the refused connection");
        }
    }

    #[tracing::instrument(name = "handle-client", skip_all, fields(client = %inbound.client_addr, server = %inbound.server_addr))]
    async fn handle_client(
        &self,
        client_counter: std::sync::Arc<std::sync::atomic::AtomicI64>,
        inbound: Inbound,
    ) {
        tracing::info!(kind = %inbound.kind, "connection accepted");

        if !self.screen.permits(inbound.client_addr.ip()) {
            tracing::warn!("peer is screened out, refusing");
            Self::refuse(inbound.stream, &self.screened_reply).await;
            return;
        }

        let cap = self.config.server.client_count_max;
        if cap != -1 && client_counter.load(std::sync::atomic::Ordering::SeqCst) >= cap {
            tracing::warn!(cap, "concurrent connection cap reached, refusing");
            Self::refuse(inbound.stream, &self.busy_reply).await;
            return;
        }

        client_counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        let args = AcceptArgs::new(
            inbound.client_addr,
            inbound.server_addr,
            time::OffsetDateTime::now_utc(),
            uuid::Uuid::new_v4(),
            inbound.kind,
        );

        let handler = self.create_handler(&args);
        let session = serve(
            args,
            inbound.stream,
            self.config.clone(),
            self.tls_config.clone(),
            handler,
            self.is_xclient_authorized(inbound.client_addr.ip()),
        );

        tokio::spawn(async move {
            // the session logs its own failures
            let _outcome = session.await;
            client_counter.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
        });
    }

    fn create_handler(&self, args: &AcceptArgs) -> Box<dyn SessionHandler> {
        let metadata = ConnectionMetadata::new(
            args.client_addr,
            args.server_addr,
            args.kind,
            args.timestamp,
            args.uuid,
        );
        self.factory
            .as_ref()
            .and_then(|factory| factory.create(&metadata))
            .unwrap_or_else(|| {
                Box::new(DefaultHandler::new(
                    self.realm.clone(),
                    self.mailboxes.clone(),
                ))
            })
    }

    /// Accept connections on every socket until the last accept task dies.
    /// Each listener runs its own accept loop; admitted connections are
    /// funneled through one channel so `handle_client` stays serialized.
    ///
    /// # Errors
    ///
    /// * a socket cannot be adopted by the runtime
    #[tracing::instrument(skip_all)]
    pub async fn listen(
        self,
        sockets: (
            Vec<std::net::TcpListener>,
            Vec<std::net::TcpListener>,
            Vec<std::net::TcpListener>,
        ),
    ) -> anyhow::Result<()> {
        if self.tls_config.is_none() && !sockets.2.is_empty() {
            tracing::warn!(
                "No TLS configuration provided, the tunneled interfaces (port 465) cannot serve"
            );
        }

        let (inbound_tx, mut inbound_rx) = tokio::sync::mpsc::channel::<Inbound>(64);
        let (relay, submission, tunneled) = sockets;
        let mut interfaces = vec![];

        for (kind, sockets) in [
            (ConnectionKind::Relay, relay),
            (ConnectionKind::Submission, submission),
            (ConnectionKind::Tunneled, tunneled),
        ] {
            for socket in sockets {
                let listener = tokio::net::TcpListener::from_std(socket)
                    .context("failed to adopt a bound socket")?;
                let server_addr = listener
                    .local_addr()
                    .context("failed to read a listener address")?;
                interfaces.push(server_addr);

                let inbound_tx = inbound_tx.clone();
                tokio::spawn(async move {
                    loop {
                        match listener.accept().await {
                            Ok((stream, client_addr)) => {
                                let inbound = Inbound {
                                    kind,
                                    server_addr,
                                    client_addr,
                                    stream,
                                };
                                if inbound_tx.send(inbound).await.is_err() {
                                    return;
                                }
                            }
                            Err(error) => {
                                tracing::error!(%error, %server_addr, "accept failed");
                            }
                        }
                    }
                });
            }
        }
        drop(inbound_tx);

        tracing::info!(?interfaces, "accepting clients");

        let client_counter = std::sync::Arc::new(std::sync::atomic::AtomicI64::new(0));
        while let Some(inbound) = inbound_rx.recv().await {
            self.handle_client(client_counter.clone(), inbound).await;
        }
        Ok(())
    }
}

/// Run one accepted connection to completion.
///
/// # Errors
///
/// Session-fatal transport errors; protocol-level failures have already been
/// answered on the wire.
#[tracing::instrument(skip_all, fields(uuid = %args.uuid))]
pub async fn serve(
    args: AcceptArgs,
    tcp_stream: tokio::net::TcpStream,
    config: std::sync::Arc<Config>,
    tls_config: Option<std::sync::Arc<rustls::ServerConfig>>,
    handler: Box<dyn SessionHandler>,
    xclient_allowed: bool,
) -> anyhow::Result<()> {
    let receiver = Receiver::new(tcp_stream, args, config, tls_config, xclient_allowed);
    let smtp_stream = receiver.into_stream(handler);
    tokio::pin!(smtp_stream);

    while let Some(transaction) = smtp_stream.next().await {
        if transaction.is_err() {
            break;
        }
    }

    tracing::info!("session finished");
    Ok(())
}
