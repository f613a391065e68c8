// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection-establishment integration tests.
//!
//! These tests run the full client against an in-process mock OPC UA
//! server speaking the binary protocol over real TCP: HEL/ACK, plaintext
//! OPN grants, GetEndpoints, CreateSession/ActivateSession, CloseSession,
//! and CLO. The mock records what it saw so tests can assert on the wire
//! behavior (request id monotonicity, OPN renewals, policy switches).

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use latch_core::encoding::{wire_time_now, BinaryDecodable, BinaryEncodable};
use latch_core::transport::{
    AcknowledgeMessage, ChunkType, ErrorMessage, HelloMessage, MessageType, TcpMessageHeader,
};
use latch_core::types::{
    ActivateSessionRequest, ActivateSessionResponse, ApplicationDescription, ApplicationType,
    ChannelSecurityToken, CloseSessionRequest, CloseSessionResponse, CreateSessionRequest,
    CreateSessionResponse, EndpointDescription, GetEndpointsRequest, GetEndpointsResponse,
    LocalizedText, MessageSecurityMode, NodeId, OpenSecureChannelRequest,
    OpenSecureChannelResponse, ResponseHeader, SecurityTokenRequestType, SignatureData,
    UserTokenPolicy,
};
use latch_core::{StatusCode, BINARY_TRANSPORT_PROFILE_URI, SECURITY_POLICY_NONE_URI};

use latch_client::client::transport::{
    ConnectionState, SendBuffer, TransportConnector, UaTransport,
};
use latch_client::error::{ClientError, ConnectionError};
use latch_client::security::{ChannelKeys, SecurityPolicy};
use latch_client::types::{ClientConfig, ClientState, TcpConnectionConfig};
use latch_client::Client;

use async_trait::async_trait;

// =============================================================================
// Mock Server
// =============================================================================

const BASIC256SHA256_URI: &str = "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256";

/// Routes client and mock-server tracing into the test harness output.
///
/// Safe to call from every test; only the first call installs a subscriber.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// How the mock server behaves for a test.
#[derive(Clone)]
struct ServerBehavior {
    /// Endpoints served by GetEndpoints and CreateSession.
    endpoints: Vec<EndpointDescription>,
    /// Swallow everything after accepting the connection.
    silent: bool,
    /// Reject the HEL with this transport-level error.
    reject_hel: Option<StatusCode>,
    /// Token lifetime granted in OPN responses, milliseconds.
    revised_lifetime_ms: u32,
}

impl Default for ServerBehavior {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            silent: false,
            reject_hel: None,
            revised_lifetime_ms: 600_000,
        }
    }
}

/// What the mock server observed.
#[derive(Default)]
struct ServerStats {
    connections: AtomicUsize,
    hel_count: AtomicUsize,
    opn_issue_count: AtomicUsize,
    opn_renew_count: AtomicUsize,
    create_session_count: AtomicUsize,
    activate_session_count: AtomicUsize,
    close_session_count: AtomicUsize,
    clo_count: AtomicUsize,
    /// Request ids observed in OPN and MSG frames, in arrival order.
    request_ids: Mutex<Vec<u32>>,
    /// Security policy uris named in OPN requests, in arrival order.
    opn_policy_uris: Mutex<Vec<String>>,
    /// Client nonce lengths observed in OPN requests.
    opn_nonce_lengths: Mutex<Vec<usize>>,
}

/// Binds a listener and serves connections sequentially.
async fn start_server(make: impl FnOnce(&str) -> ServerBehavior) -> (String, Arc<ServerStats>) {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("opc.tcp://{}", listener.local_addr().unwrap());
    let behavior = make(&url);
    let stats = Arc::new(ServerStats::default());

    let server_stats = stats.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            server_stats.connections.fetch_add(1, Ordering::SeqCst);
            let _ = serve_connection(stream, &behavior, &server_stats).await;
        }
    });

    (url, stats)
}

/// Per-connection channel state on the server side.
struct ServerChannel {
    channel_id: u32,
    token_id: u32,
    send_sequence: u32,
}

async fn serve_connection(
    mut stream: TcpStream,
    behavior: &ServerBehavior,
    stats: &ServerStats,
) -> std::io::Result<()> {
    let mut recv = BytesMut::new();
    let mut channel = ServerChannel {
        channel_id: 0,
        token_id: 0,
        send_sequence: 0,
    };

    loop {
        let Some(frame) = read_frame(&mut stream, &mut recv).await? else {
            return Ok(());
        };
        if behavior.silent {
            continue;
        }

        let word = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
        match MessageType::from_code(word) {
            Some(MessageType::Hel) => {
                stats.hel_count.fetch_add(1, Ordering::SeqCst);
                handle_hel(&mut stream, behavior, frame).await?;
                if behavior.reject_hel.is_some() {
                    return Ok(());
                }
            }
            Some(MessageType::Opn) => {
                handle_opn(&mut stream, behavior, stats, &mut channel, frame).await?;
            }
            Some(MessageType::Msg) => {
                handle_msg(&mut stream, behavior, stats, &mut channel, frame).await?;
            }
            Some(MessageType::Clo) => {
                stats.clo_count.fetch_add(1, Ordering::SeqCst);
                return Ok(());
            }
            _ => return Ok(()),
        }
    }
}

async fn read_frame(
    stream: &mut TcpStream,
    recv: &mut BytesMut,
) -> std::io::Result<Option<BytesMut>> {
    loop {
        if recv.len() >= 8 {
            let size = u32::from_le_bytes([recv[4], recv[5], recv[6], recv[7]]) as usize;
            if size >= 8 && recv.len() >= size {
                return Ok(Some(recv.split_to(size)));
            }
        }
        if stream.read_buf(recv).await? == 0 {
            return Ok(None);
        }
    }
}

async fn send_raw(stream: &mut TcpStream, frame: BytesMut) -> std::io::Result<()> {
    stream.write_all(&frame).await
}

async fn handle_hel(
    stream: &mut TcpStream,
    behavior: &ServerBehavior,
    frame: BytesMut,
) -> std::io::Result<()> {
    let mut buf = frame.freeze();
    let _header = TcpMessageHeader::decode(&mut buf).unwrap();
    let hello = HelloMessage::decode(&mut buf).unwrap();
    assert_eq!(hello.protocol_version, 0);

    let mut out = BytesMut::new();
    TcpMessageHeader::reserve(&mut out);
    if let Some(status) = behavior.reject_hel {
        ErrorMessage {
            error: status,
            reason: "rejected by test server".to_string(),
        }
        .encode(&mut out)
        .unwrap();
        TcpMessageHeader::finish(MessageType::Err, ChunkType::Final, &mut out);
    } else {
        AcknowledgeMessage {
            protocol_version: 0,
            receive_buffer_size: hello.receive_buffer_size.min(65_535),
            send_buffer_size: hello.send_buffer_size.min(65_535),
            max_message_size: 0,
            max_chunk_count: 0,
        }
        .encode(&mut out)
        .unwrap();
        TcpMessageHeader::finish(MessageType::Ack, ChunkType::Final, &mut out);
    }
    send_raw(stream, out).await
}

async fn handle_opn(
    stream: &mut TcpStream,
    behavior: &ServerBehavior,
    stats: &ServerStats,
    channel: &mut ServerChannel,
    frame: BytesMut,
) -> std::io::Result<()> {
    let mut buf = frame.freeze();
    let _header = TcpMessageHeader::decode(&mut buf).unwrap();
    let _channel_id = u32::decode(&mut buf).unwrap();
    let policy_uri = String::decode(&mut buf).unwrap();
    let _sender_certificate = Vec::<u8>::decode(&mut buf).unwrap();
    let _thumbprint = Vec::<u8>::decode(&mut buf).unwrap();
    let _sequence = u32::decode(&mut buf).unwrap();
    let request_id = u32::decode(&mut buf).unwrap();
    let _type_id = NodeId::decode(&mut buf).unwrap();
    let request = OpenSecureChannelRequest::decode(&mut buf).unwrap();

    match request.request_type {
        SecurityTokenRequestType::Issue => stats.opn_issue_count.fetch_add(1, Ordering::SeqCst),
        SecurityTokenRequestType::Renew => stats.opn_renew_count.fetch_add(1, Ordering::SeqCst),
    };
    stats.request_ids.lock().unwrap().push(request_id);
    stats.opn_policy_uris.lock().unwrap().push(policy_uri.clone());
    stats
        .opn_nonce_lengths
        .lock()
        .unwrap()
        .push(request.client_nonce.len());

    if channel.channel_id == 0 {
        channel.channel_id = 7;
    }
    channel.token_id += 1;

    let response = OpenSecureChannelResponse {
        response_header: ResponseHeader::good(request.request_header.request_handle),
        server_protocol_version: 0,
        security_token: ChannelSecurityToken {
            channel_id: channel.channel_id,
            token_id: channel.token_id,
            created_at: wire_time_now(),
            revised_lifetime: behavior.revised_lifetime_ms,
        },
        server_nonce: vec![0x5A; 32],
    };

    let mut out = BytesMut::new();
    TcpMessageHeader::reserve(&mut out);
    channel.channel_id.encode(&mut out).unwrap();
    policy_uri.encode(&mut out).unwrap();
    Vec::<u8>::new().encode(&mut out).unwrap();
    Vec::<u8>::new().encode(&mut out).unwrap();
    channel.send_sequence += 1;
    channel.send_sequence.encode(&mut out).unwrap();
    request_id.encode(&mut out).unwrap();
    OpenSecureChannelResponse::type_id().encode(&mut out).unwrap();
    response.encode(&mut out).unwrap();
    TcpMessageHeader::finish(MessageType::Opn, ChunkType::Final, &mut out);
    send_raw(stream, out).await
}

async fn handle_msg(
    stream: &mut TcpStream,
    behavior: &ServerBehavior,
    stats: &ServerStats,
    channel: &mut ServerChannel,
    frame: BytesMut,
) -> std::io::Result<()> {
    let mut buf = frame.freeze();
    let _header = TcpMessageHeader::decode(&mut buf).unwrap();
    let _channel_id = u32::decode(&mut buf).unwrap();
    let _token_id = u32::decode(&mut buf).unwrap();
    let _sequence = u32::decode(&mut buf).unwrap();
    let request_id = u32::decode(&mut buf).unwrap();
    let type_id = NodeId::decode(&mut buf).unwrap();
    stats.request_ids.lock().unwrap().push(request_id);

    let mut body = BytesMut::new();
    let response_type = match type_id.as_numeric() {
        Some(GetEndpointsRequest::TYPE_ID) => {
            let request = GetEndpointsRequest::decode(&mut buf).unwrap();
            GetEndpointsResponse {
                response_header: ResponseHeader::good(request.request_header.request_handle),
                endpoints: behavior.endpoints.clone(),
            }
            .encode(&mut body)
            .unwrap();
            GetEndpointsResponse::type_id()
        }
        Some(CreateSessionRequest::TYPE_ID) => {
            stats.create_session_count.fetch_add(1, Ordering::SeqCst);
            let request = CreateSessionRequest::decode(&mut buf).unwrap();
            CreateSessionResponse {
                response_header: ResponseHeader::good(request.request_header.request_handle),
                session_id: NodeId::numeric(1, 4242),
                authentication_token: NodeId::opaque(0, vec![0xAB; 16]),
                revised_session_timeout: 60_000.0,
                server_nonce: vec![0x3C; 32],
                server_certificate: Vec::new(),
                server_endpoints: behavior.endpoints.clone(),
                server_software_certificates: Vec::new(),
                server_signature: SignatureData::default(),
                max_request_message_size: 0,
            }
            .encode(&mut body)
            .unwrap();
            CreateSessionResponse::type_id()
        }
        Some(ActivateSessionRequest::TYPE_ID) => {
            stats.activate_session_count.fetch_add(1, Ordering::SeqCst);
            let request = ActivateSessionRequest::decode(&mut buf).unwrap();
            ActivateSessionResponse {
                response_header: ResponseHeader::good(request.request_header.request_handle),
                server_nonce: vec![0x77; 32],
                results: Vec::new(),
                diagnostic_infos: Vec::new(),
            }
            .encode(&mut body)
            .unwrap();
            ActivateSessionResponse::type_id()
        }
        Some(CloseSessionRequest::TYPE_ID) => {
            stats.close_session_count.fetch_add(1, Ordering::SeqCst);
            let request = CloseSessionRequest::decode(&mut buf).unwrap();
            assert!(request.delete_subscriptions);
            CloseSessionResponse {
                response_header: ResponseHeader::good(request.request_header.request_handle),
            }
            .encode(&mut body)
            .unwrap();
            CloseSessionResponse::type_id()
        }
        _ => return Ok(()),
    };

    let mut out = BytesMut::new();
    TcpMessageHeader::reserve(&mut out);
    channel.channel_id.encode(&mut out).unwrap();
    channel.token_id.encode(&mut out).unwrap();
    channel.send_sequence += 1;
    channel.send_sequence.encode(&mut out).unwrap();
    request_id.encode(&mut out).unwrap();
    response_type.encode(&mut out).unwrap();
    out.extend_from_slice(&body);
    TcpMessageHeader::finish(MessageType::Msg, ChunkType::Final, &mut out);
    send_raw(stream, out).await
}

// =============================================================================
// Test Fixtures
// =============================================================================

fn server_application(url: &str) -> ApplicationDescription {
    ApplicationDescription {
        application_uri: "urn:test:server".to_string(),
        product_uri: "urn:test".to_string(),
        application_name: LocalizedText::new("Test Server"),
        application_type: ApplicationType::Server,
        gateway_server_uri: String::new(),
        discovery_profile_uri: String::new(),
        discovery_urls: vec![url.to_string()],
    }
}

/// Endpoint with SecurityPolicy#None, an empty transport profile uri
/// (Siemens style), and one anonymous token.
fn none_endpoint(url: &str) -> EndpointDescription {
    EndpointDescription {
        endpoint_url: url.to_string(),
        server: server_application(url),
        server_certificate: Vec::new(),
        security_mode: MessageSecurityMode::None,
        security_policy_uri: SECURITY_POLICY_NONE_URI.to_string(),
        user_identity_tokens: vec![UserTokenPolicy::anonymous("anonymous")],
        transport_profile_uri: String::new(),
        security_level: 0,
    }
}

fn basic256sha256_endpoint(url: &str) -> EndpointDescription {
    EndpointDescription {
        endpoint_url: url.to_string(),
        server: server_application(url),
        server_certificate: Vec::new(),
        security_mode: MessageSecurityMode::Sign,
        security_policy_uri: BASIC256SHA256_URI.to_string(),
        user_identity_tokens: vec![UserTokenPolicy::anonymous("anonymous")],
        transport_profile_uri: BINARY_TRANSPORT_PROFILE_URI.to_string(),
        security_level: 10,
    }
}

fn test_config() -> ClientConfig {
    ClientConfig::builder()
        .timeout(Duration::from_millis(2_000))
        .application_uri("urn:test:client")
        .build()
        .unwrap()
}

/// Test double standing in for a real Basic256Sha256 implementation; the
/// transforms pass through so the mock server can stay plaintext.
#[derive(Debug)]
struct FakeBasic256Sha256;

impl SecurityPolicy for FakeBasic256Sha256 {
    fn uri(&self) -> &str {
        BASIC256SHA256_URI
    }

    fn local_certificate(&self) -> &[u8] {
        b"fake-der-certificate"
    }

    fn remote_certificate_thumbprint(&self, _remote: &[u8]) -> Vec<u8> {
        vec![0x11; 20]
    }

    fn generate_nonce(&self, nonce: &mut [u8]) -> latch_client::ClientResult<()> {
        use rand::RngCore;
        rand::thread_rng().fill_bytes(nonce);
        Ok(())
    }

    fn derive_keys(
        &self,
        _local: &[u8],
        _remote: &[u8],
    ) -> latch_client::ClientResult<ChannelKeys> {
        Ok(ChannelKeys::default())
    }

    fn protect_chunk(
        &self,
        _mode: MessageSecurityMode,
        _keys: &ChannelKeys,
        chunk: BytesMut,
    ) -> latch_client::ClientResult<BytesMut> {
        Ok(chunk)
    }

    fn unprotect_chunk(
        &self,
        _mode: MessageSecurityMode,
        _keys: &ChannelKeys,
        chunk: BytesMut,
    ) -> latch_client::ClientResult<BytesMut> {
        Ok(chunk)
    }
}

// =============================================================================
// Scenario: happy path with SecurityPolicy#None
// =============================================================================

#[tokio::test]
async fn test_connect_happy_none() {
    let (url, stats) = start_server(|url| ServerBehavior {
        endpoints: vec![none_endpoint(url)],
        ..Default::default()
    })
    .await;

    let mut client = Client::new(test_config());
    client.connect(&url).await.unwrap();

    assert_eq!(client.state(), ClientState::Session);
    assert!(!client.authentication_token().is_null());

    // Discovery ran and copied the endpoint into the configuration,
    // stripped of its token list.
    let selected = client.config().endpoint.as_ref().unwrap();
    assert_eq!(selected.security_policy_uri, SECURITY_POLICY_NONE_URI);
    assert!(selected.user_identity_tokens.is_empty());
    assert_eq!(
        client.config().user_token_policy.as_ref().unwrap().policy_id,
        "anonymous"
    );

    // One connection end to end: no policy switch happened.
    assert_eq!(stats.connections.load(Ordering::SeqCst), 1);
    assert_eq!(stats.hel_count.load(Ordering::SeqCst), 1);
    assert_eq!(stats.opn_issue_count.load(Ordering::SeqCst), 1);
    assert_eq!(stats.create_session_count.load(Ordering::SeqCst), 1);
    assert_eq!(stats.activate_session_count.load(Ordering::SeqCst), 1);

    // Fresh 32-byte nonce went out with the OPN.
    assert_eq!(stats.opn_nonce_lengths.lock().unwrap().as_slice(), &[32]);

    client.disconnect().await;
    assert_eq!(client.state(), ClientState::Disconnected);
    assert_eq!(stats.close_session_count.load(Ordering::SeqCst), 1);
    assert_eq!(stats.clo_count.load(Ordering::SeqCst), 1);

    // Cryptographic material is wiped on teardown.
    assert!(client.channel().local_nonce().is_empty());
    assert!(client.channel().keys().is_empty());
}

#[tokio::test]
async fn test_request_ids_strictly_increasing_on_the_wire() {
    let (url, stats) = start_server(|url| ServerBehavior {
        endpoints: vec![none_endpoint(url)],
        ..Default::default()
    })
    .await;

    let mut client = Client::new(test_config());
    client.connect(&url).await.unwrap();
    client.disconnect().await;

    let ids = stats.request_ids.lock().unwrap().clone();
    assert!(ids.len() >= 4, "expected OPN + discovery + session traffic");
    assert!(
        ids.windows(2).all(|w| w[0] < w[1]),
        "request ids must be strictly increasing within the channel: {ids:?}"
    );
}

#[tokio::test]
async fn test_state_callback_sequence() {
    let (url, _stats) = start_server(|url| ServerBehavior {
        endpoints: vec![none_endpoint(url)],
        ..Default::default()
    })
    .await;

    let observed: Arc<Mutex<Vec<ClientState>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = observed.clone();
    let config = ClientConfig::builder()
        .timeout(Duration::from_millis(2_000))
        .state_callback(Arc::new(move |state| {
            sink.lock().unwrap().push(state);
        }))
        .build()
        .unwrap();

    let mut client = Client::new(config);
    client.connect(&url).await.unwrap();
    client.disconnect().await;

    assert_eq!(
        observed.lock().unwrap().as_slice(),
        &[
            ClientState::Connected,
            ClientState::SecureChannel,
            ClientState::Session,
            ClientState::SecureChannel,
            ClientState::Connected,
            ClientState::Disconnected,
        ]
    );
}

// =============================================================================
// Scenario: reentry
// =============================================================================

#[tokio::test]
async fn test_connect_reentry_is_a_no_op() {
    let (url, stats) = start_server(|url| ServerBehavior {
        endpoints: vec![none_endpoint(url)],
        ..Default::default()
    })
    .await;

    let mut client = Client::new(test_config());
    client.connect(&url).await.unwrap();
    assert_eq!(client.state(), ClientState::Session);

    // Second connect returns Good immediately, without network traffic.
    client.connect(&url).await.unwrap();
    assert_eq!(stats.hel_count.load(Ordering::SeqCst), 1);
    assert_eq!(stats.create_session_count.load(Ordering::SeqCst), 1);

    client.disconnect().await;
}

// =============================================================================
// Scenario: policy switch after discovery
// =============================================================================

#[tokio::test]
async fn test_policy_switch_reconnects_once() {
    let (url, stats) = start_server(|url| ServerBehavior {
        endpoints: vec![basic256sha256_endpoint(url)],
        ..Default::default()
    })
    .await;

    let config = ClientConfig::builder()
        .timeout(Duration::from_millis(2_000))
        .security_policy_uri(BASIC256SHA256_URI)
        .add_security_policy(Arc::new(FakeBasic256Sha256))
        .build()
        .unwrap();

    let mut client = Client::new(config);
    client.connect(&url).await.unwrap();
    assert_eq!(client.state(), ClientState::Session);

    // First pass opened the channel with #None, discovered the endpoint,
    // tore down, and reconnected bound to Basic256Sha256.
    assert_eq!(stats.connections.load(Ordering::SeqCst), 2);
    assert_eq!(
        stats.opn_policy_uris.lock().unwrap().as_slice(),
        &[
            SECURITY_POLICY_NONE_URI.to_string(),
            BASIC256SHA256_URI.to_string(),
        ]
    );
    // The session was only established on the second pass.
    assert_eq!(stats.create_session_count.load(Ordering::SeqCst), 1);

    client.disconnect().await;
}

// =============================================================================
// Scenario: no matching user token policy
// =============================================================================

#[tokio::test]
async fn test_username_without_matching_policy_fails() {
    let (url, stats) = start_server(|url| ServerBehavior {
        endpoints: vec![none_endpoint(url)],
        ..Default::default()
    })
    .await;

    let config = ClientConfig::builder()
        .timeout(Duration::from_millis(2_000))
        .build()
        .unwrap();
    let mut client = Client::new(config);

    let error = client
        .connect_username(&url, "operator", "secret")
        .await
        .unwrap_err();

    assert_eq!(error.status_code(), StatusCode::BAD_INTERNAL_ERROR);
    assert_eq!(client.state(), ClientState::Disconnected);
    assert_eq!(stats.create_session_count.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Scenario: ACK timeout
// =============================================================================

#[tokio::test]
async fn test_ack_timeout_yields_connection_closed() {
    let (url, _stats) = start_server(|_url| ServerBehavior {
        silent: true,
        ..Default::default()
    })
    .await;

    let config = ClientConfig::builder()
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let mut client = Client::new(config);

    let error = client.connect(&url).await.unwrap_err();
    assert_eq!(error.status_code(), StatusCode::BAD_CONNECTION_CLOSED);
    assert_eq!(client.state(), ClientState::Disconnected);
}

// =============================================================================
// Scenario: server rejects the HEL
// =============================================================================

#[tokio::test]
async fn test_hel_rejection_surfaces_server_status() {
    let (url, _stats) = start_server(|_url| ServerBehavior {
        reject_hel: Some(StatusCode::BAD_TCP_MESSAGE_TOO_LARGE),
        ..Default::default()
    })
    .await;

    let mut client = Client::new(test_config());
    let error = client.connect(&url).await.unwrap_err();

    assert_eq!(error.status_code(), StatusCode::BAD_TCP_MESSAGE_TOO_LARGE);
    assert_eq!(client.state(), ClientState::Disconnected);
}

// =============================================================================
// Scenario: secure-channel renewal
// =============================================================================

#[tokio::test]
async fn test_channel_renewal_advances_deadline() {
    let (url, stats) = start_server(|url| ServerBehavior {
        endpoints: vec![none_endpoint(url)],
        // 400 ms lifetime: renewal due after 300 ms.
        revised_lifetime_ms: 400,
        ..Default::default()
    })
    .await;

    let mut client = Client::new(test_config());
    client.connect(&url).await.unwrap();
    assert_eq!(client.state(), ClientState::Session);
    let deadline_before = client.next_channel_renewal().unwrap();

    tokio::time::sleep(Duration::from_millis(350)).await;
    client.run_iterate(100).await.unwrap();

    assert!(stats.opn_renew_count.load(Ordering::SeqCst) >= 1);
    assert_eq!(client.state(), ClientState::Session);
    let deadline_after = client.next_channel_renewal().unwrap();
    assert!(deadline_after > deadline_before);

    // Symmetric traffic keeps flowing under the renewed token.
    let endpoints = client.get_endpoints(&url).await.unwrap();
    assert_eq!(endpoints.len(), 1);
    assert_eq!(client.state(), ClientState::Session);

    client.disconnect().await;
}

// =============================================================================
// Scenario: one-shot discovery helper
// =============================================================================

#[tokio::test]
async fn test_get_endpoints_one_shot() {
    let (url, stats) = start_server(|url| ServerBehavior {
        endpoints: vec![none_endpoint(url)],
        ..Default::default()
    })
    .await;

    let mut client = Client::new(test_config());
    let endpoints = client.get_endpoints(&url).await.unwrap();

    assert_eq!(endpoints.len(), 1);
    assert_eq!(endpoints[0].security_mode, MessageSecurityMode::None);
    // The helper tears its temporary channel back down.
    assert_eq!(client.state(), ClientState::Disconnected);
    assert_eq!(stats.create_session_count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_connect_no_session_stops_at_secure_channel() {
    let (url, stats) = start_server(|url| ServerBehavior {
        endpoints: vec![none_endpoint(url)],
        ..Default::default()
    })
    .await;

    let mut client = Client::new(test_config());
    client.connect_no_session(&url).await.unwrap();

    assert_eq!(client.state(), ClientState::SecureChannel);
    assert_eq!(stats.opn_issue_count.load(Ordering::SeqCst), 1);
    assert_eq!(stats.create_session_count.load(Ordering::SeqCst), 0);

    client.disconnect().await;
    assert_eq!(client.state(), ClientState::Disconnected);
}

// =============================================================================
// Buffer discipline on failing transports
// =============================================================================

/// Transport whose sends always fail; tracks buffer accounting through a
/// shared counter.
struct FailingSendTransport {
    outstanding: Arc<AtomicU32>,
    state: ConnectionState,
}

#[async_trait]
impl UaTransport for FailingSendTransport {
    fn state(&self) -> ConnectionState {
        self.state
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    fn get_send_buffer(&mut self, min_size: usize) -> latch_client::ClientResult<SendBuffer> {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        Ok(SendBuffer::with_capacity(min_size))
    }

    fn release_send_buffer(&mut self, _buffer: SendBuffer) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }

    async fn send(&mut self, buffer: SendBuffer) -> latch_client::ClientResult<()> {
        self.release_send_buffer(buffer);
        Err(ConnectionError::closed(Some("send always fails".to_string())).into())
    }

    async fn receive_message(
        &mut self,
        _deadline: tokio::time::Instant,
        _max_message_size: u32,
    ) -> latch_client::ClientResult<Option<BytesMut>> {
        Err(ConnectionError::closed(Some("receive always fails".to_string())).into())
    }

    async fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }

    fn outstanding_send_buffers(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst) as usize
    }
}

struct FailingConnector {
    outstanding: Arc<AtomicU32>,
}

#[async_trait]
impl TransportConnector for FailingConnector {
    async fn open(
        &self,
        _config: &TcpConnectionConfig,
        _endpoint_url: &str,
        _timeout: Duration,
    ) -> latch_client::ClientResult<Box<dyn UaTransport>> {
        Ok(Box::new(FailingSendTransport {
            outstanding: self.outstanding.clone(),
            state: ConnectionState::Opening,
        }))
    }
}

#[tokio::test]
async fn test_send_buffers_released_on_failure_paths() {
    init_tracing();
    let outstanding = Arc::new(AtomicU32::new(0));
    let config = ClientConfig::builder()
        .timeout(Duration::from_millis(200))
        .connector(Arc::new(FailingConnector {
            outstanding: outstanding.clone(),
        }))
        .build()
        .unwrap();

    let mut client = Client::new(config);
    let error = client.connect(&url_for_failing()).await.unwrap_err();

    assert!(matches!(error, ClientError::Connection(_)));
    assert_eq!(client.state(), ClientState::Disconnected);
    assert_eq!(
        outstanding.load(Ordering::SeqCst),
        0,
        "every acquired send buffer must be sent or released"
    );
}

fn url_for_failing() -> String {
    // The failing connector never dials, so any syntactically valid url works.
    "opc.tcp://unreachable:4840".to_string()
}
