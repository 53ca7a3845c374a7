mod common;

use common::{insecure_client_tls, local_test, spawn_server, write_test_certificate};
use petrel_common::ConnectionKind;
use petrel_config::{Config, FieldServerTls};
use petrel_protocol::rustls;
use petrel_server::DefaultHandler;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

fn tls_config(tag: &str) -> Config {
    let (certificate, private_key) = write_test_certificate(tag);
    let mut config = local_test();
    config.server.tls = Some(FieldServerTls {
        certificate,
        private_key,
        handshake_timeout: std::time::Duration::from_secs(2),
    });
    config
}

async fn read_reply<S: tokio::io::AsyncBufRead + Unpin>(stream: &mut S) -> Vec<String> {
    let mut lines = vec![];
    loop {
        let mut line = String::new();
        stream.read_line(&mut line).await.unwrap();
        let done = line.chars().nth(3) != Some('-');
        lines.push(line.trim_end().to_owned());
        if done {
            break;
        }
    }
    lines
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn starttls_resets_the_esmtp_state() {
    let (server_addr, server) = spawn_server(
        tls_config("starttls"),
        Box::new(DefaultHandler::new(None, None)),
        ConnectionKind::Relay,
    )
    .await;

    tokio::time::timeout(std::time::Duration::from_secs(10), async move {
        let stream = tokio::net::TcpStream::connect(server_addr).await.unwrap();
        let mut stream = tokio::io::BufReader::new(stream);

        assert_eq!(
            read_reply(&mut stream).await,
            ["220 testserver.com ESMTP petrel"]
        );

        stream.get_mut().write_all(b"EHLO a\r\n").await.unwrap();
        let capabilities = read_reply(&mut stream).await;
        assert!(capabilities.contains(&"250-STARTTLS".to_owned()));

        stream.get_mut().write_all(b"STARTTLS\r\n").await.unwrap();
        assert_eq!(read_reply(&mut stream).await, ["220 Ready to start TLS"]);

        let connector = tokio_rustls::TlsConnector::from(insecure_client_tls());
        let stream = connector
            .connect(
                rustls::ServerName::try_from("testserver.com").unwrap(),
                stream.into_inner(),
            )
            .await
            .unwrap();
        let mut stream = tokio::io::BufReader::new(stream);

        // the secured channel starts from scratch: EHLO is required again
        stream
            .get_mut()
            .write_all(b"MAIL FROM:<x@y>\r\n")
            .await
            .unwrap();
        assert_eq!(
            read_reply(&mut stream).await,
            ["503 5.5.1 EHLO/HELO required"]
        );

        stream.get_mut().write_all(b"EHLO a\r\n").await.unwrap();
        let capabilities = read_reply(&mut stream).await;
        assert!(!capabilities.contains(&"250-STARTTLS".to_owned()));
        // REQUIRETLS only exists on a secured channel
        assert!(capabilities.contains(&"250-REQUIRETLS".to_owned()));

        stream.get_mut().write_all(b"QUIT\r\n").await.unwrap();
        assert_eq!(
            read_reply(&mut stream).await,
            ["221 2.0.0 Service closing transmission channel"]
        );

        drop(stream);
        server.await.unwrap();
    })
    .await
    .expect("session timed out");
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn starttls_without_tls_material_is_refused() {
    let (server_addr, server) = spawn_server(
        local_test(),
        Box::new(DefaultHandler::new(None, None)),
        ConnectionKind::Relay,
    )
    .await;

    tokio::time::timeout(std::time::Duration::from_secs(10), async move {
        let stream = tokio::net::TcpStream::connect(server_addr).await.unwrap();
        let mut stream = tokio::io::BufReader::new(stream);

        read_reply(&mut stream).await;
        stream.get_mut().write_all(b"EHLO a\r\n").await.unwrap();
        let capabilities = read_reply(&mut stream).await;
        assert!(!capabilities.contains(&"250-STARTTLS".to_owned()));

        stream.get_mut().write_all(b"STARTTLS\r\n").await.unwrap();
        assert_eq!(
            read_reply(&mut stream).await,
            ["454 4.7.0 TLS not available due to temporary reason"]
        );

        stream.get_mut().write_all(b"QUIT\r\n").await.unwrap();
        read_reply(&mut stream).await;
        drop(stream);
        server.await.unwrap();
    })
    .await
    .expect("session timed out");
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn tunneled_connections_handshake_before_the_banner() {
    let (server_addr, server) = spawn_server(
        tls_config("tunneled"),
        Box::new(DefaultHandler::new(None, None)),
        ConnectionKind::Tunneled,
    )
    .await;

    tokio::time::timeout(std::time::Duration::from_secs(10), async move {
        let stream = tokio::net::TcpStream::connect(server_addr).await.unwrap();
        let connector = tokio_rustls::TlsConnector::from(insecure_client_tls());
        let stream = connector
            .connect(
                rustls::ServerName::try_from("testserver.com").unwrap(),
                stream,
            )
            .await
            .unwrap();
        let mut stream = tokio::io::BufReader::new(stream);

        assert_eq!(
            read_reply(&mut stream).await,
            ["220 testserver.com ESMTP petrel"]
        );

        stream.get_mut().write_all(b"QUIT\r\n").await.unwrap();
        assert_eq!(
            read_reply(&mut stream).await,
            ["221 2.0.0 Service closing transmission channel"]
        );

        drop(stream);
        server.await.unwrap();
    })
    .await
    .expect("session timed out");
}
