//! End-to-end tests: a real server on an ephemeral port, driven over TCP,
//! with stub image loading and detection.
//!
//! Stub path grammar:
//! - `/faces/N` loads fine and yields `N` detections.
//! - `/slow/MS/N` sleeps `MS` milliseconds while loading, then as above.
//! - anything else fails to load.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use facedetect_core::detection::domain::detection_record::DetectionRecord;
use facedetect_core::detection::domain::face_detector::FaceDetector;
use facedetect_core::imaging::domain::image_loader::{ImageLoadError, ImageLoader};
use facedetect_core::request::process_request_use_case::ProcessRequestUseCase;
use facedetect_core::request::request_logger::NullRequestLogger;
use facedetect_core::server::event_loop::{OpenConnections, Server, ServerError, ShutdownHandle};
use facedetect_core::server::server_config::{FramingMode, ServerConfig};
use facedetect_core::shared::frame::Frame;

// --- Stubs ---

struct PathGrammarLoader;

impl ImageLoader for PathGrammarLoader {
    fn load(&self, path: &Path) -> Result<Frame, ImageLoadError> {
        let text = path.to_string_lossy();
        let parts: Vec<&str> = text.trim_start_matches('/').split('/').collect();
        let faces = match parts.as_slice() {
            ["faces", n] => n.parse::<u32>().ok(),
            ["slow", ms, n] => {
                let ms = ms.parse::<u64>().unwrap_or(0);
                std::thread::sleep(Duration::from_millis(ms));
                n.parse::<u32>().ok()
            }
            _ => None,
        };
        match faces {
            Some(n) => Ok(Frame::new(vec![0; ((n + 1) * 3) as usize], n + 1, 1, 3)),
            None => Err(ImageLoadError::Open {
                path: path.to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }),
        }
    }
}

/// One detection per pixel column beyond the first.
struct WidthDetector;

impl FaceDetector for WidthDetector {
    fn detect(
        &mut self,
        frame: &Frame,
    ) -> Result<Vec<DetectionRecord>, Box<dyn std::error::Error>> {
        Ok((1..frame.width())
            .map(|i| {
                DetectionRecord::from_corners(
                    [i as f64 - 1.0, 0.0, i as f64, 1.0],
                    0.9,
                    frame.width(),
                    frame.height(),
                )
            })
            .collect())
    }
}

// --- Harness ---

struct RunningServer {
    addr: SocketAddr,
    shutdown: ShutdownHandle,
    open: OpenConnections,
    thread: Option<JoinHandle<Result<(), ServerError>>>,
}

impl RunningServer {
    fn start(config: ServerConfig) -> Self {
        let loader: Arc<dyn ImageLoader> = Arc::new(PathGrammarLoader);
        let mut server = Server::bind(config, |_| {
            ProcessRequestUseCase::new(
                loader.clone(),
                Box::new(WidthDetector),
                Box::new(NullRequestLogger),
            )
        })
        .unwrap();
        let addr = server.local_addr();
        let shutdown = server.shutdown_handle();
        let open = server.open_connections();
        let thread = std::thread::spawn(move || server.run());
        Self {
            addr,
            shutdown,
            open,
            thread: Some(thread),
        }
    }

    fn connect(&self) -> Client {
        Client::connect(self.addr)
    }

    /// Waits up to five seconds for the open-connection count to reach `want`.
    fn wait_for_open(&self, want: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.open.get() != want {
            assert!(
                Instant::now() < deadline,
                "open connections stuck at {}, expected {want}",
                self.open.get()
            );
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.shutdown.shutdown();
        if let Some(thread) = self.thread.take() {
            let result = thread.join().unwrap();
            assert!(result.is_ok(), "server exited with {result:?}");
        }
    }
}

struct Client {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Client {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        Self {
            writer: stream.try_clone().unwrap(),
            reader: BufReader::new(stream),
        }
    }

    fn send(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).unwrap();
        self.writer.flush().unwrap();
    }

    fn send_and_shut_write(&mut self, bytes: &[u8]) {
        self.send(bytes);
        self.writer.shutdown(std::net::Shutdown::Write).unwrap();
    }

    fn recv_line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).unwrap();
        assert!(line.ends_with('\n'), "unterminated response {line:?}");
        line.pop();
        line
    }

    fn request(&mut self, path: &str) -> String {
        self.send(format!("{path}\n").as_bytes());
        self.recv_line()
    }
}

fn config() -> ServerConfig {
    ServerConfig {
        port: 0,
        ..Default::default()
    }
}

fn face_count(response: &str) -> usize {
    let records: Vec<DetectionRecord> = serde_json::from_str(response)
        .unwrap_or_else(|e| panic!("not a detection array: {response:?} ({e})"));
    records.len()
}

// --- Tests ---

#[test]
fn test_sentinels_and_connection_survives_errors() {
    let server = RunningServer::start(config());
    let mut client = server.connect();

    assert_eq!(client.request(""), "EMPTY_IMAGE_PATH");
    assert_eq!(client.request("   "), "EMPTY_IMAGE_PATH");
    assert_eq!(client.request("/nope/missing.png"), "ERROR");
    assert_eq!(face_count(&client.request("/faces/2")), 2);
    assert_eq!(client.request("/faces/0"), "[]");
}

#[test]
fn test_detection_json_shape() {
    let server = RunningServer::start(config());
    let mut client = server.connect();

    let value: serde_json::Value = serde_json::from_str(&client.request("/faces/1")).unwrap();

    assert_eq!(value[0]["box"], serde_json::json!([0, 0, 1, 1]));
    assert_eq!(value[0]["confidence"], serde_json::json!(0.9));
}

#[test]
fn test_pipelined_requests_answer_in_order() {
    let server = RunningServer::start(config());
    let mut client = server.connect();

    let batch: String = (0..20).map(|i| format!("/faces/{}\n", i % 5)).collect();
    client.send(batch.as_bytes());

    for i in 0..20 {
        assert_eq!(face_count(&client.recv_line()), i % 5);
    }
}

#[test]
fn test_out_of_order_completion_keeps_request_order() {
    let server = RunningServer::start(ServerConfig {
        workers: 4,
        ..config()
    });
    let mut client = server.connect();

    client.send(b"/slow/300/1\n/faces/2\n/faces/3\n/slow/100/4\n");

    assert_eq!(face_count(&client.recv_line()), 1);
    assert_eq!(face_count(&client.recv_line()), 2);
    assert_eq!(face_count(&client.recv_line()), 3);
    assert_eq!(face_count(&client.recv_line()), 4);
}

#[test]
fn test_concurrent_connections_do_not_cross_talk() {
    let server = RunningServer::start(config());
    let addr = server.addr;

    let handles: Vec<_> = (1..=8)
        .map(|i| {
            std::thread::spawn(move || {
                let mut client = Client::connect(addr);
                (0..5)
                    .map(|_| face_count(&client.request(&format!("/faces/{i}"))))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().unwrap(), vec![i + 1; 5]);
    }
}

#[test]
fn test_client_close_does_not_disturb_others() {
    let server = RunningServer::start(config());
    let mut stays = server.connect();
    let mut leaves = server.connect();

    assert_eq!(face_count(&leaves.request("/faces/1")), 1);
    leaves.send(b"/slow/200/1\n");
    drop(leaves);

    assert_eq!(face_count(&stays.request("/faces/3")), 3);
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(face_count(&stays.request("/faces/2")), 2);

    let mut late = server.connect();
    assert_eq!(late.request(""), "EMPTY_IMAGE_PATH");
}

#[test]
fn test_client_close_releases_connection() {
    let server = RunningServer::start(config());
    let mut stays = server.connect();
    let mut leaves = server.connect();
    assert_eq!(face_count(&leaves.request("/faces/1")), 1);
    assert_eq!(stays.request(""), "EMPTY_IMAGE_PATH");
    server.wait_for_open(2);

    leaves.send(b"/slow/200/1\n");
    drop(leaves);

    server.wait_for_open(1);
    assert_eq!(face_count(&stays.request("/faces/2")), 2);
}

#[test]
fn test_half_closed_client_is_released() {
    let server = RunningServer::start(config());
    let mut client = server.connect();
    client.send_and_shut_write(b"/faces/1\n");

    // Zero-byte read ends the session even though our read side is open.
    server.wait_for_open(0);
}

#[test]
fn test_unread_responses_to_vanished_client_are_released() {
    let server = RunningServer::start(config());
    let mut client = server.connect();
    server.wait_for_open(1);

    let batch: String = std::iter::once("/slow/100/0\n".to_string())
        .chain((0..200).map(|_| "/faces/64\n".to_string()))
        .collect();
    client.send(batch.as_bytes());
    drop(client);

    server.wait_for_open(0);
    let mut next = server.connect();
    assert_eq!(face_count(&next.request("/faces/1")), 1);
}

#[test]
fn test_line_split_across_writes_is_reassembled() {
    let server = RunningServer::start(config());
    let mut client = server.connect();

    client.send(b"/fa");
    std::thread::sleep(Duration::from_millis(50));
    client.send(b"ces/");
    std::thread::sleep(Duration::from_millis(50));
    client.send(b"3\r\n");

    assert_eq!(face_count(&client.recv_line()), 3);
}

#[test]
fn test_oversized_line_is_rejected_and_stream_recovers() {
    let server = RunningServer::start(ServerConfig {
        max_request_bytes: 16,
        ..config()
    });
    let mut client = server.connect();

    let long = format!("/faces/{}\n", "9".repeat(40));
    client.send(long.as_bytes());
    client.send(b"/faces/1\n");

    assert_eq!(client.recv_line(), "ERROR");
    assert_eq!(face_count(&client.recv_line()), 1);
}

#[test]
fn test_invalid_utf8_is_error() {
    let server = RunningServer::start(config());
    let mut client = server.connect();

    client.send(b"/faces/\xff\xfe\n");

    assert_eq!(client.recv_line(), "ERROR");
    assert_eq!(face_count(&client.request("/faces/1")), 1);
}

#[test]
fn test_read_framing_has_no_terminator() {
    let server = RunningServer::start(ServerConfig {
        framing: FramingMode::Read,
        ..config()
    });
    let mut client = server.connect();

    client.send(b"/faces/2");

    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        let n = client.reader.read(&mut buf).unwrap();
        assert!(n > 0, "server closed the connection");
        received.extend_from_slice(&buf[..n]);
        if serde_json::from_slice::<Vec<DetectionRecord>>(&received).is_ok() {
            break;
        }
    }
    let records: Vec<DetectionRecord> = serde_json::from_slice(&received).unwrap();
    assert_eq!(records.len(), 2);
    assert_ne!(received.last(), Some(&b'\n'));
}

#[test]
fn test_inline_processing_without_workers() {
    let server = RunningServer::start(ServerConfig {
        workers: 0,
        ..config()
    });
    let mut client = server.connect();

    assert_eq!(face_count(&client.request("/faces/4")), 4);
    assert_eq!(client.request("/bad"), "ERROR");
    assert_eq!(client.request(""), "EMPTY_IMAGE_PATH");
}

#[test]
fn test_timed_out_request_answers_error_and_drops_late_result() {
    let server = RunningServer::start(ServerConfig {
        workers: 2,
        request_timeout_ms: 200,
        ..config()
    });
    let mut client = server.connect();
    let started = Instant::now();

    client.send(b"/slow/1000/1\n/faces/2\n");

    assert_eq!(client.recv_line(), "ERROR");
    assert!(started.elapsed() < Duration::from_millis(900));
    assert_eq!(face_count(&client.recv_line()), 2);

    // The slow result arrives later and must not show up as a response.
    std::thread::sleep(Duration::from_millis(1000));
    assert_eq!(face_count(&client.request("/faces/3")), 3);
}

#[test]
fn test_full_queue_rejects_with_error() {
    let server = RunningServer::start(ServerConfig {
        workers: 1,
        queue_capacity: 1,
        ..config()
    });
    let mut client = server.connect();

    client.send(b"/slow/300/1\n/slow/300/1\n/faces/1\n");

    let responses: Vec<String> = (0..3).map(|_| client.recv_line()).collect();
    assert_eq!(face_count(&responses[0]), 1);
    assert!(
        responses[1..].iter().any(|r| r == "ERROR"),
        "expected an overload rejection in {responses:?}"
    );
}

#[test]
fn test_bind_rejects_invalid_config() {
    let result = Server::bind(
        ServerConfig {
            queue_capacity: 0,
            ..config()
        },
        |_| -> ProcessRequestUseCase { unreachable!("config is validated first") },
    );
    assert!(matches!(result, Err(ServerError::Config(_))));
}
