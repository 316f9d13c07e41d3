//! Minimal HTTP/1.1 server standing in for Loki's push endpoint.
//!
//! Each connection serves exactly one request and answers with
//! `Connection: close`, so the client never reuses a socket the server has
//! already dropped.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use femtologging_loki::test_util::{PushedLine, decode_push_body};

/// How the server answers.
#[derive(Clone, Debug)]
pub enum Behaviour {
    /// Reply with `script[n]` to the n-th request, then with `fallback`.
    Status { script: Vec<u16>, fallback: u16 },
    /// Read the request and never reply.
    Silent,
}

#[derive(Clone, Debug)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

pub struct MockLoki {
    addr: SocketAddr,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
    shutdown: Arc<AtomicBool>,
}

fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

fn parse_header_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    line.split_once(':')
        .map(|(key, value)| (key.trim().to_lowercase(), value.trim().to_string()))
}

fn read_http_request(stream: &TcpStream) -> Option<CapturedRequest> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let mut reader = BufReader::new(stream.try_clone().ok()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).ok()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = Vec::new();
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).ok()?;
        if line.trim().is_empty() {
            break;
        }
        let Some((key, value)) = parse_header_line(&line) else {
            continue;
        };
        if key == "content-length" {
            content_length = value.parse().unwrap_or(0);
        }
        headers.push((key, value));
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).ok()?;
    Some(CapturedRequest {
        method,
        path,
        headers,
        body,
    })
}

impl MockLoki {
    pub fn start(behaviour: Behaviour) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind ephemeral listener");
        let addr = listener.local_addr().expect("listener has address");
        let captured = Arc::new(Mutex::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let served = Arc::new(AtomicUsize::new(0));

        let captured_bg = Arc::clone(&captured);
        let shutdown_bg = Arc::clone(&shutdown);
        thread::spawn(move || {
            for stream in listener.incoming() {
                if shutdown_bg.load(Ordering::SeqCst) {
                    break;
                }
                let Ok(stream) = stream else {
                    continue;
                };
                let captured = Arc::clone(&captured_bg);
                let shutdown = Arc::clone(&shutdown_bg);
                let served = Arc::clone(&served);
                let behaviour = behaviour.clone();
                thread::spawn(move || {
                    serve(stream, &behaviour, &captured, &shutdown, &served);
                });
            }
        });

        Self {
            addr,
            captured,
            shutdown,
        }
    }

    pub fn always(status: u16) -> Self {
        Self::start(Behaviour::Status {
            script: Vec::new(),
            fallback: status,
        })
    }

    pub fn scripted(script: Vec<u16>, fallback: u16) -> Self {
        Self::start(Behaviour::Status { script, fallback })
    }

    pub fn silent() -> Self {
        Self::start(Behaviour::Silent)
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.captured.lock().expect("captured lock").clone()
    }

    pub fn request_count(&self) -> usize {
        self.captured.lock().expect("captured lock").len()
    }

    /// Lines from every captured request, in arrival order.
    pub fn lines(&self) -> Vec<PushedLine> {
        self.requests()
            .iter()
            .flat_map(|req| decode_push_body(&req.body))
            .collect()
    }

    /// Poll until at least `count` requests arrived or `timeout` elapses.
    pub fn wait_for_requests(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.request_count() >= count {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        self.request_count() >= count
    }
}

fn serve(
    mut stream: TcpStream,
    behaviour: &Behaviour,
    captured: &Mutex<Vec<CapturedRequest>>,
    shutdown: &AtomicBool,
    served: &AtomicUsize,
) {
    let Some(request) = read_http_request(&stream) else {
        return;
    };
    captured.lock().expect("captured lock").push(request);
    let index = served.fetch_add(1, Ordering::SeqCst);
    match behaviour {
        Behaviour::Status { script, fallback } => {
            let status = script.get(index).copied().unwrap_or(*fallback);
            let response = format!(
                "HTTP/1.1 {} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status,
                status_text(status)
            );
            let _ = stream.write_all(response.as_bytes());
            let _ = stream.flush();
        }
        Behaviour::Silent => {
            let until = Instant::now() + Duration::from_secs(30);
            while !shutdown.load(Ordering::SeqCst) && Instant::now() < until {
                thread::sleep(Duration::from_millis(10));
            }
        }
    }
}

impl Drop for MockLoki {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Unblock the accept loop.
        let _ = TcpStream::connect(self.addr);
    }
}
