#![allow(dead_code)]

use petrel_common::{auth::Credentials, ClientName, ConnectionKind, Envelope, Recipient};
use petrel_config::Config;
use petrel_protocol::{
    rustls, AcceptArgs, DataEndOutcome, DataStartOutcome, HelloOutcome, MessageSink,
    RecipientOutcome, SenderOutcome, SessionHandler, SinkDisposition,
};
use petrel_server::{Authenticator, Realm};

/// Bind an ephemeral localhost listener; the OS picks the port.
pub async fn bind_listener() -> (tokio::net::TcpListener, std::net::SocketAddr) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("an ephemeral port is always available");
    let server_addr = listener.local_addr().expect("bound listeners have an address");
    (listener, server_addr)
}

/// A test configuration with a fixed hostname and everything at defaults.
pub fn local_test() -> Config {
    let mut config = Config::default();
    config.server.name = "testserver.com".to_owned();
    config
}

/// Serve exactly one connection with the given handler, in the background.
pub async fn spawn_server(
    config: Config,
    handler: Box<dyn SessionHandler>,
    kind: ConnectionKind,
) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    spawn_server_opts(config, handler, kind, false).await
}

/// [`spawn_server`], with the XCLIENT authorization switch exposed.
pub async fn spawn_server_opts(
    config: Config,
    handler: Box<dyn SessionHandler>,
    kind: ConnectionKind,
    xclient_allowed: bool,
) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    let (listener, server_addr) = bind_listener().await;
    let tls_config = config
        .server
        .tls
        .as_ref()
        .map(|tls| std::sync::Arc::new(petrel_config::get_rustls_config(tls).unwrap()));
    let config = std::sync::Arc::new(config);

    let server = tokio::spawn(async move {
        let (stream, client_addr) = listener.accept().await.unwrap();
        petrel_server::serve(
            AcceptArgs::new(
                client_addr,
                server_addr,
                time::OffsetDateTime::now_utc(),
                uuid::Uuid::new_v4(),
                kind,
            ),
            stream,
            config,
            tls_config,
            handler,
            xclient_allowed,
        )
        .await
        .unwrap();
    });

    (server_addr, server)
}

/// Connect, run the scripted exchange and assert every reply line. Each step
/// writes its bytes (may hold several pipelined commands) and then reads
/// exactly the expected lines, CRLF included.
pub async fn run_session(
    config: Config,
    handler: Box<dyn SessionHandler>,
    steps: &[(&str, &[&str])],
) {
    let (server_addr, server) = spawn_server(config, handler, ConnectionKind::Relay).await;

    tokio::time::timeout(std::time::Duration::from_secs(10), async {
        let stream = tokio::net::TcpStream::connect(server_addr).await.unwrap();
        let mut stream = tokio::io::BufReader::new(stream);

        for (send, expect) in steps {
            if !send.is_empty() {
                tokio::io::AsyncWriteExt::write_all(stream.get_mut(), send.as_bytes())
                    .await
                    .unwrap();
            }
            for expected in *expect {
                let mut line = String::new();
                tokio::io::AsyncBufReadExt::read_line(&mut stream, &mut line)
                    .await
                    .unwrap();
                pretty_assertions::assert_eq!(format!("{expected}\r\n"), line);
            }
        }
        drop(stream);
        server.await.unwrap();
    })
    .await
    .expect("session timed out");
}

/// The full `EHLO client.test` reply the default test configuration sends.
pub const EHLO_DEFAULT: &[&str] = &[
    "250-testserver.com Hello client.test",
    "250-SIZE 35882577",
    "250-8BITMIME",
    "250-SMTPUTF8",
    "250-PIPELINING",
    "250-CHUNKING",
    "250-BINARYMIME",
    "250-ENHANCEDSTATUSCODES",
    "250-DSN",
    "250-LIMITS RCPTMAX=100",
    "250 MT-PRIORITY",
];

/// Pipeline channel discarding every octet.
pub struct DiscardSink;

#[async_trait::async_trait]
impl MessageSink for DiscardSink {
    async fn write(&mut self, _chunk: &[u8]) -> std::io::Result<()> {
        Ok(())
    }

    async fn close(&mut self, _disposition: SinkDisposition) {}
}

/// Accepts everything but only takes recipients of one domain; everything
/// else is refused as relaying.
pub struct LocalOnlyHandler {
    pub domain: String,
}

#[async_trait::async_trait]
impl SessionHandler for LocalOnlyHandler {
    async fn on_hello(&mut self, _extended: bool, _client_name: &ClientName) -> HelloOutcome {
        HelloOutcome::Accept
    }

    async fn on_mail_from(&mut self, _envelope: &Envelope) -> SenderOutcome {
        SenderOutcome::Accept
    }

    async fn on_rcpt_to(
        &mut self,
        _envelope: &Envelope,
        recipient: &Recipient,
    ) -> RecipientOutcome {
        if recipient.forward_path.domain().to_string() == self.domain {
            RecipientOutcome::Accept
        } else {
            RecipientOutcome::RejectRelayDenied
        }
    }

    async fn on_data_start(&mut self, _envelope: &Envelope) -> DataStartOutcome {
        DataStartOutcome::Accept {
            sink: Box::new(DiscardSink),
        }
    }

    async fn on_data_end(&mut self, _envelope: &Envelope) -> DataEndOutcome {
        DataEndOutcome::Accept
    }
}

/// Fixed-credentials authenticator for the AUTH tests.
pub struct SingleUser;

impl Authenticator for SingleUser {
    fn verify(&self, credentials: &Credentials) -> bool {
        matches!(
            credentials,
            Credentials::Verify { authid, authpass }
                if authid == "alice" && authpass == "password"
        )
    }
}

/// The realm every AUTH test uses.
pub fn test_realm() -> std::sync::Arc<Realm> {
    std::sync::Arc::new(Realm::new(std::sync::Arc::new(SingleUser)))
}

/// Self-signed TLS material written to a scratch directory.
pub fn write_test_certificate(tag: &str) -> (std::path::PathBuf, std::path::PathBuf) {
    let cert = rcgen::generate_simple_self_signed(vec!["testserver.com".to_owned()]).unwrap();
    let dir = std::env::temp_dir().join(format!("petrel-test-{tag}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let certificate = dir.join("certificate.crt");
    let private_key = dir.join("private_key.pem");
    std::fs::write(&certificate, cert.serialize_pem().unwrap()).unwrap();
    std::fs::write(&private_key, cert.serialize_private_key_pem()).unwrap();
    (certificate, private_key)
}

/// A client-side TLS configuration trusting whatever the server presents.
pub fn insecure_client_tls() -> std::sync::Arc<rustls::ClientConfig> {
    struct NoVerify;

    impl rustls::client::ServerCertVerifier for NoVerify {
        fn verify_server_cert(
            &self,
            _end_entity: &rustls::Certificate,
            _intermediates: &[rustls::Certificate],
            _server_name: &rustls::ServerName,
            _scts: &mut dyn Iterator<Item = &[u8]>,
            _ocsp_response: &[u8],
            _now: std::time::SystemTime,
        ) -> Result<rustls::client::ServerCertVerified, rustls::Error> {
            Ok(rustls::client::ServerCertVerified::assertion())
        }
    }

    std::sync::Arc::new(
        rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(std::sync::Arc::new(NoVerify))
            .with_no_client_auth(),
    )
}
