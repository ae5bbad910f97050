//! HTTP/2 connection tests over loopback TCP
//!
//! A real client and server agent talk to each other through sockets:
//! - Request/response cycles, single and concurrent
//! - Bodies larger than the flow-control windows
//! - GOAWAY and shutdown behaviour
//! - Push refusal and compressed bodies

use h2engine::http::h2::{Error, H2Client, H2ClientBuilder, H2Server, H2ServerBuilder, PayloadCodec, StreamId};
use h2engine::http::{Message, Method, Request, Response, Status, TcpTransport};
use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Serve one connection; each request gets "hello <path>" plus `extra` bytes
fn spawn_server(builder: H2ServerBuilder, extra: usize) -> (u16, thread::JoinHandle<H2Server>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut server = builder.build().unwrap();
        let responder = server.agent();
        responder.clone().on_request(move |id, request| {
            let mut body = format!("hello {}", request.path()).into_bytes();
            body.extend(std::iter::repeat(b'x').take(extra));
            let response = Response::builder()
                .status(Status::OK)
                .header("content-type", "text/plain")
                .body(body)
                .build();
            responder.respond(id, &response).unwrap();
        });
        server.serve(Box::new(TcpTransport::new(stream))).unwrap();
        server
    });
    (port, handle)
}

fn connect(port: u16, builder: H2ClientBuilder) -> (H2Client, Receiver<(StreamId, Response)>) {
    let (tx, rx) = channel();
    let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let client = builder
        .on_response(move |id, response| {
            let _ = tx.send((id, response));
        })
        .connect(Box::new(TcpTransport::new(stream)))
        .unwrap();
    (client, rx)
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < TIMEOUT {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn test_get_round_trip() {
    let (port, server) = spawn_server(H2ServerBuilder::new(), 0);
    let (client, responses) = connect(port, H2ClientBuilder::new());

    let request = Request::builder()
        .path("/index.html")
        .authority("localhost")
        .build();
    let id = client.request(&request).unwrap();
    assert_eq!(id, 1);

    let (stream_id, response) = responses.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(stream_id, 1);
    assert_eq!(response.status(), Status::OK);
    assert_eq!(response.headers().get("content-type"), Some("text/plain"));
    assert_eq!(response.body(), b"hello /index.html");

    client.shut_down().unwrap();
    client.join().unwrap();
    server.join().unwrap().join().unwrap();
}

#[test]
fn test_concurrent_streams_with_large_bodies() {
    // larger than both the default connection window and a frame
    let extra = 100_000;
    let (port, server) = spawn_server(H2ServerBuilder::new(), extra);
    let (client, responses) = connect(port, H2ClientBuilder::new());

    let mut ids = Vec::new();
    for i in 0..10 {
        let request = Request::new(Method::Get, format!("/item/{}", i));
        ids.push(client.request(&request).unwrap());
    }
    assert_eq!(ids, vec![1, 3, 5, 7, 9, 11, 13, 15, 17, 19]);

    let mut seen = Vec::new();
    for _ in 0..10 {
        let (id, response) = responses.recv_timeout(TIMEOUT).unwrap();
        let index = ids.iter().position(|&s| s == id).unwrap();
        let prefix = format!("hello /item/{}", index);
        assert!(response.body().starts_with(prefix.as_bytes()));
        assert_eq!(response.body().len(), prefix.len() + extra);
        seen.push(id);
    }
    seen.sort_unstable();
    assert_eq!(seen, ids);

    client.shut_down().unwrap();
    client.join().unwrap();
    server.join().unwrap().join().unwrap();
}

#[test]
fn test_request_body_reaches_server() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, requests) = channel();
    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut server = H2ServerBuilder::new()
            .on_request(move |id, request| {
                let _ = tx.send((id, request));
            })
            .build()
            .unwrap();
        server.serve(Box::new(TcpTransport::new(stream))).unwrap();
        server
    });

    let (client, _responses) = connect(port, H2ClientBuilder::new());
    let request = Request::builder()
        .method(Method::Post)
        .path("/upload")
        .header("content-length", "6")
        .body("abcdef")
        .pad(true)
        .build();
    client.request(&request).unwrap();

    let (id, received) = requests.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(id, 1);
    assert_eq!(received.method(), &Method::Post);
    assert_eq!(received.body(), b"abcdef");

    client.shut_down().unwrap();
    client.join().unwrap();
    server.join().unwrap().join().unwrap();
}

#[test]
fn test_goaway_stops_new_requests() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut server = H2ServerBuilder::new().build().unwrap();
        let responder = server.agent();
        responder.clone().on_request(move |id, _| {
            responder.respond(id, &Response::new(Status::OK)).unwrap();
            responder.shut_down().unwrap();
        });
        server.serve(Box::new(TcpTransport::new(stream))).unwrap();
        server
    });

    let (client, responses) = connect(port, H2ClientBuilder::new());
    client.request(&Request::new(Method::Get, "/")).unwrap();
    let (_, response) = responses.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(response.status(), Status::OK);

    let agent = client.agent();
    assert!(wait_until(|| agent.is_shut_down()));
    assert!(matches!(
        client.request(&Request::new(Method::Get, "/again")),
        Err(Error::ShutDown)
    ));

    client.join().unwrap();
    server.join().unwrap().join().unwrap();
}

#[test]
fn test_request_after_shut_down_fails() {
    let (port, server) = spawn_server(H2ServerBuilder::new(), 0);
    let (client, _responses) = connect(port, H2ClientBuilder::new());

    client.shut_down().unwrap();
    client.shut_down().unwrap();
    assert!(matches!(
        client.request(&Request::new(Method::Get, "/")),
        Err(Error::ShutDown)
    ));
    assert!(matches!(client.ping(None), Err(Error::ShutDown)));

    client.join().unwrap();
    server.join().unwrap().join().unwrap();
}

#[test]
fn test_push_refused_by_client_settings() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, outcome) = channel();
    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut server = H2ServerBuilder::new().build().unwrap();
        let responder = server.agent();
        responder.clone().on_request(move |id, _| {
            let pushed = Request::new(Method::Get, "/style.css");
            let result = responder.push(id, &pushed, &Response::new(Status::OK));
            let _ = tx.send(result.is_err());
            responder.respond(id, &Response::new(Status::OK)).unwrap();
        });
        server.serve(Box::new(TcpTransport::new(stream))).unwrap();
        server
    });

    let (client, responses) = connect(port, H2ClientBuilder::new());
    // make sure the server has seen our SETTINGS before the request
    client.ping(Some(&b"settled!"[..])).unwrap();
    client.request(&Request::new(Method::Get, "/")).unwrap();

    assert!(outcome.recv_timeout(TIMEOUT).unwrap());
    let (id, _) = responses.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(id, 1);

    client.shut_down().unwrap();
    client.join().unwrap();
    server.join().unwrap().join().unwrap();
}

/// XOR codec standing in for gzip
#[derive(Debug)]
struct Xor;

impl PayloadCodec for Xor {
    fn compress(&self, input: &[u8]) -> io::Result<Vec<u8>> {
        Ok(input.iter().map(|b| b ^ 0x5A).collect())
    }

    fn decompress(&self, input: &[u8]) -> io::Result<Vec<u8>> {
        Ok(input.iter().map(|b| b ^ 0x5A).collect())
    }
}

#[test]
fn test_compressed_response_body() {
    let codec: Arc<dyn PayloadCodec> = Arc::new(Xor);
    let (port, server) = spawn_server(H2ServerBuilder::new().codec(Arc::clone(&codec)), 50_000);
    let (client, responses) = connect(port, H2ClientBuilder::new().codec(codec));

    let agent = client.agent();
    // the server sees our ACCEPT_GZIPPED_DATA before answering
    client.request(&Request::new(Method::Get, "/zipped")).unwrap();
    let (_, response) = responses.recv_timeout(TIMEOUT).unwrap();
    assert!(response.body().starts_with(b"hello /zipped"));
    assert_eq!(response.body().len(), "hello /zipped".len() + 50_000);
    assert!(agent.accepts_gzip());

    client.shut_down().unwrap();
    client.join().unwrap();
    server.join().unwrap().join().unwrap();
}
