//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! End-to-end tests: blocking client stubs against a Tokio server over TCP.

use chainrpc::RpcError;
use chainrpc::buffer::ByteBuffer;
use chainrpc::filter::{FilterId, FilterRegistry};
use chainrpc::framing::RemoteErrorCode;
use chainrpc::negotiation::NegotiationError;
use chainrpc::session::{Dispatcher, HandlerError, Request, Response, Server, SessionConfig};
use chainrpc::stub::{CallSemantics, ClientStub, StubConfig};
use chainrpc::transport::{CancelToken, ClientConnection, TcpTransport, WireConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

const ECHO: u32 = 0;
const SLOW: u32 = 1;
const COUNT: u32 = 2;
const LOCK: u32 = 3;
const FAIL: u32 = 4;

fn dispatcher(counter: Arc<AtomicUsize>) -> Dispatcher {
    Dispatcher::new().bind_fn("Echo", move |request: Request| {
        let counter = counter.clone();
        async move {
            match request.method_id {
                ECHO => {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Response::new(request.payload))
                }
                SLOW => {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    Ok(Response::new("done"))
                }
                COUNT => Ok(Response::new(counter.load(Ordering::SeqCst).to_string())),
                LOCK => {
                    request.session.lock_transport_filters();
                    Ok(Response::default())
                }
                FAIL => Err(HandlerError::exception("handler failed")),
                other => Err(HandlerError::unknown_method(other)),
            }
        }
    })
}

struct TestServer {
    address: SocketAddr,
    shutdown: CancelToken,
    thread: Option<JoinHandle<()>>,
    counter: Arc<AtomicUsize>,
}

impl TestServer {
    fn start(config: SessionConfig) -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let address = listener.local_addr().unwrap();
        let shutdown = CancelToken::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let server = Server::new(dispatcher(counter.clone()), FilterRegistry::with_defaults(), config);
        let thread = {
            let shutdown = shutdown.clone();
            std::thread::spawn(move || {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(2)
                    .enable_all()
                    .build()
                    .unwrap();
                runtime.block_on(async move {
                    let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                    server.serve_tcp(listener, shutdown).await.unwrap();
                });
            })
        };

        Self {
            address,
            shutdown,
            thread: Some(thread),
            counter,
        }
    }

    fn stub(&self, config: StubConfig) -> ClientStub {
        let transport = TcpTransport::new(self.address.to_string());
        let wire = WireConfig::tcp("127.0.0.1", self.address.port());
        let connection = ClientConnection::new(Box::new(transport), &wire).unwrap();
        ClientStub::with_config("Echo", connection, config, FilterRegistry::with_defaults()).unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn payload(text: &str) -> Vec<ByteBuffer> {
    vec![ByteBuffer::from(text)]
}

#[test]
fn test_hello_without_filters() {
    let server = TestServer::start(SessionConfig::default());
    let mut stub = server.stub(StubConfig::default());

    let reply = stub.call(ECHO, payload("hello"), CallSemantics::Twoway).unwrap();
    assert_eq!(reply.as_slice(), b"hello");
    assert!(stub.transport_filter_ids().is_empty());
    assert!(stub.is_connected());
}

#[test]
fn test_hello_with_zlib_message_filter() {
    let server = TestServer::start(SessionConfig::default());
    let config = StubConfig::default().with_message_filters(vec![FilterId::ZlibStateless]);
    let mut stub = server.stub(config);
    assert_eq!(stub.message_filter_ids(), vec![FilterId::ZlibStateless]);

    let text = "hello ".repeat(500);
    let reply = stub.call(ECHO, payload(&text), CallSemantics::Twoway).unwrap();
    assert_eq!(reply.as_slice(), text.as_bytes());
}

#[test]
fn test_transport_compression_negotiated() {
    let server = TestServer::start(SessionConfig::default());
    let mut stub = server.stub(StubConfig::default().with_compression(true));

    for i in 0..3 {
        let text = format!("compressed call {i}");
        let reply = stub.call(ECHO, payload(&text), CallSemantics::Twoway).unwrap();
        assert_eq!(reply.as_slice(), text.as_bytes());
    }
    assert_eq!(stub.transport_filter_ids(), vec![FilterId::ZlibStateful]);
}

#[test]
fn test_runtime_version_downgraded() {
    let server = TestServer::start(SessionConfig::default().with_runtime_version(8));
    let mut stub = server.stub(StubConfig::default());

    let reply = stub.call(ECHO, payload("versioned"), CallSemantics::Twoway).unwrap();
    assert_eq!(reply.as_slice(), b"versioned");
    assert_eq!(stub.config().runtime_version, 8);
}

#[test]
fn test_version_mismatch_without_auto_versioning() {
    let server = TestServer::start(SessionConfig::default().with_runtime_version(8));
    let mut stub = server.stub(StubConfig::default().with_auto_versioning(false));

    let error = stub.call(ECHO, payload("x"), CallSemantics::Twoway).unwrap_err();
    assert!(matches!(
        error.error(),
        RpcError::VersionMismatch {
            server_runtime_version: 8,
            ..
        }
    ));
    assert_eq!(stub.config().runtime_version, chainrpc::stub::RUNTIME_VERSION);
}

#[test]
fn test_ping_backs_during_slow_call() {
    let server = TestServer::start(SessionConfig::default());
    let config = StubConfig::default()
        .with_call_timeout(Duration::from_secs(5))
        .with_ping_back_interval(Duration::from_millis(50));
    let mut stub = server.stub(config);

    let reply = stub.call(SLOW, payload("x"), CallSemantics::Twoway).unwrap();
    assert_eq!(reply.as_slice(), b"done");
    assert!(stub.ping_back_count() >= 1);
    assert!(stub.last_ping_back().is_some());
}

#[test]
fn test_call_timeout_on_slow_handler() {
    let server = TestServer::start(SessionConfig::default());
    let mut stub = server.stub(StubConfig::default().with_call_timeout(Duration::from_millis(100)));

    let error = stub.call(SLOW, payload("x"), CallSemantics::Twoway).unwrap_err();
    assert!(error.is_timeout());
    assert!(!stub.is_connected());

    // The next call reconnects.
    stub.set_call_timeout(Duration::from_secs(2));
    let reply = stub.call(ECHO, payload("again"), CallSemantics::Twoway).unwrap();
    assert_eq!(reply.as_slice(), b"again");
}

#[test]
fn test_remote_errors() {
    let server = TestServer::start(SessionConfig::default());
    let mut stub = server.stub(StubConfig::default());

    let error = stub.call(FAIL, payload("x"), CallSemantics::Twoway).unwrap_err();
    assert!(matches!(
        error.error(),
        RpcError::Remote { code: RemoteErrorCode::Application, message } if message == "handler failed"
    ));
    assert!(stub.is_connected());

    let connection = ClientConnection::new(
        Box::new(TcpTransport::new(server.address.to_string())),
        &WireConfig::tcp("127.0.0.1", server.address.port()),
    )
    .unwrap();
    let mut missing = ClientStub::new("Missing", connection);
    let error = missing.call(ECHO, payload("x"), CallSemantics::Twoway).unwrap_err();
    assert!(matches!(
        error.error(),
        RpcError::Remote {
            code: RemoteErrorCode::UnknownTarget,
            ..
        }
    ));
}

#[test]
fn test_oneway_batch_processed_in_order() {
    let server = TestServer::start(SessionConfig::default());
    let mut stub = server.stub(StubConfig::default().with_max_batch_message_length(256));

    stub.enable_batching();
    for i in 0..20 {
        let reply = stub
            .call(ECHO, payload(&format!("batched {i}")), CallSemantics::Twoway)
            .unwrap();
        assert!(reply.is_empty());
    }
    assert!(stub.batches_sent() >= 1);
    stub.disable_batching(true).unwrap();

    let reply = stub.call(COUNT, payload("count"), CallSemantics::Twoway).unwrap();
    assert_eq!(reply.as_slice(), b"20");
    assert_eq!(server.counter.load(Ordering::SeqCst), 20);
}

#[test]
fn test_locked_transport_filters() {
    let server = TestServer::start(SessionConfig::default());
    let mut stub = server.stub(StubConfig::default());

    stub.call(LOCK, payload("lock"), CallSemantics::Twoway).unwrap();
    let xor = FilterRegistry::with_defaults().create_filter(FilterId::Xor).unwrap();
    let error = stub.request_transport_filters(vec![xor]).unwrap_err();
    assert!(matches!(
        error.error(),
        RpcError::Negotiation(NegotiationError::Rejected {
            code: RemoteErrorCode::FiltersLocked,
            ..
        })
    ));
}

#[test]
fn test_unsupported_protocol_rejected() {
    let config = SessionConfig::default()
        .with_supported_protocols(vec![chainrpc::negotiation::TransportProtocol::Clear]);
    let server = TestServer::start(config);
    let mut stub = server.stub(StubConfig::default());

    let xor = FilterRegistry::with_defaults().create_filter(FilterId::Xor).unwrap();
    let error = stub.request_transport_filters(vec![xor]).unwrap_err();
    assert!(matches!(
        error.error(),
        RpcError::Negotiation(NegotiationError::Rejected {
            code: RemoteErrorCode::UnsupportedTransportProtocol,
            ..
        })
    ));

    let reply = stub.call(ECHO, payload("clear"), CallSemantics::Twoway).unwrap();
    assert_eq!(reply.as_slice(), b"clear");
}
