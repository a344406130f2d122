//! Shared fixtures: a tiny HTTP/1.1 stub server and scripted speech
//! collaborators.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use her_os_core::errors::SpeechError;
use her_os_core::persona::PersonaId;
use her_os_core::speech::{session, Session, SessionControl, SpeechCapture, SpeechSynthesis};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Clone)]
pub struct Reply {
    status: u16,
    content_type: &'static str,
    body: String,
    declared_len: Option<usize>,
}

impl Reply {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.to_string(),
            declared_len: None,
        }
    }

    /// One `data:` event per fragment.
    pub fn sse(fragments: &[Value]) -> Self {
        let body = fragments
            .iter()
            .map(|f| format!("data: {f}\r\n\r\n"))
            .collect::<String>();
        Self {
            status: 200,
            content_type: "text/event-stream",
            body,
            declared_len: None,
        }
    }

    /// Advertise more bytes than are sent, so the client sees the connection
    /// drop partway through the body.
    pub fn cut_short(mut self) -> Self {
        self.declared_len = Some(self.body.len() + 64);
        self
    }

    pub fn gemini_text(text: &str) -> Self {
        Self::json(
            200,
            serde_json::json!({"candidates": [{"content": {"parts": [{"text": text}]}}]}),
        )
    }

    pub fn gemini_fragment(text: &str) -> Value {
        serde_json::json!({"candidates": [{"content": {"parts": [{"text": text}]}}]})
    }
}

#[derive(Debug, Clone)]
pub struct Hit {
    pub request_line: String,
    pub head: String,
    pub body: String,
}

/// Routes on a substring of the request line; the first match wins and
/// anything unmatched gets a 404.
pub struct StubServer {
    addr: String,
    hits: Arc<Mutex<Vec<Hit>>>,
}

impl StubServer {
    pub async fn start(routes: Vec<(&'static str, Reply)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(Mutex::new(Vec::new()));
        let routes = Arc::new(routes);
        let recorded = hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let routes = routes.clone();
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    serve(stream, &routes, &recorded).await;
                });
            }
        });
        Self { addr, hits }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    pub fn hits(&self) -> Vec<Hit> {
        self.hits.lock().unwrap().clone()
    }

    /// Request lines containing `needle`, in arrival order.
    pub fn count(&self, needle: &str) -> usize {
        self.hits()
            .iter()
            .filter(|h| h.request_line.contains(needle))
            .count()
    }
}

async fn serve(mut stream: TcpStream, routes: &[(&'static str, Reply)], hits: &Mutex<Vec<Hit>>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };
    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < head_end + content_length {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    let body = String::from_utf8_lossy(&buf[head_end..]).to_string();
    let request_line = head.lines().next().unwrap_or_default().to_string();

    let reply = routes
        .iter()
        .find(|(needle, _)| request_line.contains(needle))
        .map(|(_, reply)| reply.clone())
        .unwrap_or_else(|| Reply::json(404, serde_json::json!({"error": {"message": "no route"}})));
    hits.lock().unwrap().push(Hit {
        request_line,
        head,
        body,
    });

    let response = format!(
        "HTTP/1.1 {} Stub\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        reply.status,
        reply.content_type,
        reply.declared_len.unwrap_or(reply.body.len()),
        reply.body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

#[derive(Default)]
pub struct ScriptedCapture {
    sessions: Mutex<Vec<SessionControl<String>>>,
}

impl ScriptedCapture {
    pub fn say(&self, transcript: &str) {
        let control = self.sessions.lock().unwrap().pop().expect("listening");
        control.finish(Ok(transcript.to_string()));
    }
}

impl SpeechCapture for ScriptedCapture {
    fn start_listening(&self) -> Result<Session<String>, SpeechError> {
        let (session, control) = session();
        self.sessions.lock().unwrap().push(control);
        Ok(session)
    }
}

#[derive(Default)]
pub struct RecordingVoice {
    pub spoken: Mutex<Vec<(String, String)>>,
}

impl SpeechSynthesis for RecordingVoice {
    fn speak(&self, text: &str, persona: &PersonaId) -> Session<()> {
        self.spoken
            .lock()
            .unwrap()
            .push((persona.to_string(), text.to_string()));
        let (session, control) = session();
        control.finish(Ok(()));
        session
    }
}
