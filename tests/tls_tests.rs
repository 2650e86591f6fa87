use bounce::config::{Config, ConfigResolver};
use bounce::server::{ListenerSupervisor, RequestHandler};
use bounce::shutdown::ShutdownCoordinator;
use rustls::pki_types::ServerName;
use rustls::ProtocolVersion;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

struct Credentials {
    _dir: tempfile::TempDir,
    cert: PathBuf,
    key: PathBuf,
}

fn generate_credentials() -> Credentials {
    let dir = tempfile::tempdir().unwrap();
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert = dir.path().join("cert.pem");
    let key = dir.path().join("key.pem");
    std::fs::write(&cert, generated.serialize_pem().unwrap()).unwrap();
    std::fs::write(&key, generated.serialize_private_key_pem()).unwrap();
    Credentials { _dir: dir, cert, key }
}

fn tls_config(credentials: &Credentials) -> Config {
    ConfigResolver::with_env([
        ("HttpServerAddr", ""),
        ("HttpsServerAddr", "127.0.0.1:0"),
        ("HttpsServerName", "localhost"),
        ("HttpsCertificatePath", credentials.cert.to_str().unwrap()),
        ("HttpsKeyPath", credentials.key.to_str().unwrap()),
    ])
    .resolve(None)
    .unwrap()
}

async fn start_tls(config: &Config, coordinator: &ShutdownCoordinator) -> SocketAddr {
    let handler = Arc::new(RequestHandler::new(config));
    let bound = ListenerSupervisor::tls(config, handler)
        .unwrap()
        .unwrap()
        .bind()
        .await
        .unwrap();
    let addr = bound.local_addr().unwrap();
    tokio::spawn(bound.serve(coordinator.subscribe()));
    addr
}

fn client_for(
    cert: &Path,
    versions: &[&'static rustls::SupportedProtocolVersion],
) -> TlsConnector {
    let mut roots = rustls::RootCertStore::empty();
    let mut reader = BufReader::new(File::open(cert).unwrap());
    for cert in rustls_pemfile::certs(&mut reader) {
        roots.add(cert.unwrap()).unwrap();
    }
    let config = rustls::ClientConfig::builder_with_protocol_versions(versions)
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// Reads until EOF or error; a peer may close without close_notify.
async fn read_all<S: AsyncRead + Unpin>(stream: &mut S) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => return out,
            Ok(Ok(n)) => out.extend_from_slice(&buf[..n]),
        }
    }
}

async fn get_over_tls(
    connector: &TlsConnector,
    addr: SocketAddr,
    host: &str,
) -> (Option<ProtocolVersion>, String) {
    let tcp = TcpStream::connect(addr).await.unwrap();
    let server_name = ServerName::try_from("localhost").unwrap();
    let mut stream = connector.connect(server_name, tcp).await.unwrap();
    let version = stream.get_ref().1.protocol_version();

    let request = format!("GET / HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n", host);
    stream.write_all(request.as_bytes()).await.unwrap();
    let response = read_all(&mut stream).await;
    (version, String::from_utf8_lossy(&response).to_string())
}

#[tokio::test]
async fn test_tls12_client_gets_redirect() {
    let credentials = generate_credentials();
    let config = tls_config(&credentials);
    let coordinator = ShutdownCoordinator::new(Duration::from_millis(10));
    let addr = start_tls(&config, &coordinator).await;

    let connector = client_for(&credentials.cert, &[&rustls::version::TLS12]);
    let (version, response) = get_over_tls(&connector, addr, "localhost:443").await;

    assert_eq!(version, Some(ProtocolVersion::TLSv1_2));
    assert!(response.starts_with("HTTP/1.1 302"), "{}", response);
}

#[tokio::test]
async fn test_tls13_client_unknown_host_not_found() {
    let credentials = generate_credentials();
    let config = tls_config(&credentials);
    let coordinator = ShutdownCoordinator::new(Duration::from_millis(10));
    let addr = start_tls(&config, &coordinator).await;

    let connector = client_for(&credentials.cert, &[&rustls::version::TLS13]);
    let (version, response) = get_over_tls(&connector, addr, "elsewhere.example").await;

    assert_eq!(version, Some(ProtocolVersion::TLSv1_3));
    assert!(response.starts_with("HTTP/1.1 404"), "{}", response);
}

/// A bare TLS 1.1 ClientHello with legacy CBC suites and no extensions.
fn tls11_client_hello() -> Vec<u8> {
    let mut body = vec![0x03, 0x02];
    body.extend_from_slice(&[0x42; 32]);
    body.push(0x00);
    body.extend_from_slice(&[0x00, 0x04, 0x00, 0x2f, 0x00, 0x35]);
    body.extend_from_slice(&[0x01, 0x00]);

    let mut handshake = vec![0x01, 0x00];
    handshake.extend_from_slice(&(body.len() as u16).to_be_bytes());
    handshake.extend_from_slice(&body);

    let mut record = vec![0x16, 0x03, 0x01];
    record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
    record.extend_from_slice(&handshake);
    record
}

#[tokio::test]
async fn test_tls11_handshake_is_rejected() {
    let credentials = generate_credentials();
    let config = tls_config(&credentials);
    let coordinator = ShutdownCoordinator::new(Duration::from_millis(10));
    let addr = start_tls(&config, &coordinator).await;

    let mut tcp = TcpStream::connect(addr).await.unwrap();
    tcp.write_all(&tls11_client_hello()).await.unwrap();
    let reply = read_all(&mut tcp).await;

    // either an alert record or a bare close, never a ServerHello
    assert_ne!(
        reply.first(),
        Some(&0x16),
        "server answered with a handshake: {:?}",
        reply
    );
    if let Some(content_type) = reply.first() {
        assert_eq!(*content_type, 0x15);
    }
}
