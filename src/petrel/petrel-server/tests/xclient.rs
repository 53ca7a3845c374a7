mod common;

use common::{local_test, run_session, spawn_server_opts};
use petrel_common::ConnectionKind;
use petrel_server::DefaultHandler;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn unauthorized_peers_are_turned_away() {
    run_session(
        local_test(),
        Box::new(DefaultHandler::new(None, None)),
        &[
            ("", &["220 testserver.com ESMTP petrel"]),
            (
                "XCLIENT ADDR=192.0.2.7\r\n",
                &["550 5.7.0 Insufficient authorization"],
            ),
            (
                "QUIT\r\n",
                &["221 2.0.0 Service closing transmission channel"],
            ),
        ],
    )
    .await;
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn a_trusted_frontend_restarts_the_session() {
    let (server_addr, server) = spawn_server_opts(
        local_test(),
        Box::new(DefaultHandler::new(None, None)),
        ConnectionKind::Relay,
        true,
    )
    .await;

    tokio::time::timeout(std::time::Duration::from_secs(10), async move {
        let stream = tokio::net::TcpStream::connect(server_addr).await.unwrap();
        let mut stream = tokio::io::BufReader::new(stream);
        let mut line = String::new();

        stream.read_line(&mut line).await.unwrap();
        assert_eq!(line, "220 testserver.com ESMTP petrel\r\n");

        stream
            .get_mut()
            .write_all(b"EHLO frontend.test\r\n")
            .await
            .unwrap();
        loop {
            line.clear();
            stream.read_line(&mut line).await.unwrap();
            if line.chars().nth(3) != Some('-') {
                break;
            }
        }

        // the frontend forwards the original client and gets a fresh banner
        stream
            .get_mut()
            .write_all(b"XCLIENT NAME=client.test ADDR=192.0.2.7 PORT=4242 PROTO=ESMTP\r\n")
            .await
            .unwrap();
        line.clear();
        stream.read_line(&mut line).await.unwrap();
        assert_eq!(line, "220 testserver.com ESMTP petrel\r\n");

        // the forwarded client must greet again before a transaction
        stream
            .get_mut()
            .write_all(b"MAIL FROM:<a@x>\r\n")
            .await
            .unwrap();
        line.clear();
        stream.read_line(&mut line).await.unwrap();
        assert_eq!(line, "503 5.5.1 EHLO/HELO required\r\n");

        stream.get_mut().write_all(b"QUIT\r\n").await.unwrap();
        line.clear();
        stream.read_line(&mut line).await.unwrap();
        assert_eq!(line, "221 2.0.0 Service closing transmission channel\r\n");

        drop(stream);
        server.await.unwrap();
    })
    .await
    .expect("session timed out");
}
