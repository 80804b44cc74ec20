use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use serde_json::Value;

#[derive(Debug, Clone)]
pub struct OpenAiStubConfig {
    pub expected_api_key: String,
    pub behavior: ProseBehavior,
}

#[allow(dead_code)]
#[derive(Debug, Clone, Copy)]
pub enum ProseBehavior {
    /// Unique prose inside the requested word band.
    Fitting,
    /// A single sentence, too short for any band.
    TooShort,
    /// HTTP 500 with an OpenAI-style error body.
    ServerError,
}

pub struct OpenAiStub {
    pub base_url: String,
    requests: Arc<AtomicUsize>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl OpenAiStub {
    pub fn spawn(config: OpenAiStubConfig) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start openai stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}/v1");
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&requests);

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let path = request.url().to_string();
                if request.method() != &tiny_http::Method::Post || path != "/v1/responses" {
                    let _ = request.respond(
                        tiny_http::Response::from_string("not found").with_status_code(404),
                    );
                    continue;
                }
                counter.fetch_add(1, Ordering::SeqCst);

                let expected_auth = format!("Bearer {}", config.expected_api_key);
                let authorized = request.headers().iter().any(|h| {
                    h.field.equiv("Authorization") && h.value.as_str() == expected_auth
                });
                if !authorized {
                    let _ = request.respond(
                        tiny_http::Response::from_string(
                            r#"{"error":{"message":"invalid api key"}}"#,
                        )
                        .with_status_code(401),
                    );
                    continue;
                }

                let mut body = String::new();
                if request.as_reader().read_to_string(&mut body).is_err() {
                    let _ = request.respond(
                        tiny_http::Response::from_string("invalid request body")
                            .with_status_code(400),
                    );
                    continue;
                }
                let parsed: Value = match serde_json::from_str(&body) {
                    Ok(value) => value,
                    Err(_) => {
                        let _ = request.respond(
                            tiny_http::Response::from_string("invalid json").with_status_code(400),
                        );
                        continue;
                    }
                };
                let instructions = parsed
                    .get("instructions")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                let input = parsed
                    .get("input")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();

                if matches!(config.behavior, ProseBehavior::ServerError) {
                    let _ = request.respond(
                        tiny_http::Response::from_string(
                            r#"{"error":{"message":"the model is overloaded"}}"#,
                        )
                        .with_status_code(500),
                    );
                    continue;
                }

                let output_text = if instructions.contains("Write a single") {
                    format!("Try this for {}.", section_line(input))
                } else {
                    match config.behavior {
                        ProseBehavior::TooShort => "Too short.".to_owned(),
                        _ => fitting_prose(instructions, input),
                    }
                };

                let response_body = serde_json::json!({
                    "id": "resp_stub",
                    "object": "response",
                    "model": parsed.get("model").cloned().unwrap_or(Value::String("stub-model".to_owned())),
                    "output": [
                        {
                            "type": "message",
                            "role": "assistant",
                            "content": [
                                { "type": "output_text", "text": output_text }
                            ]
                        }
                    ]
                });

                let header =
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                        .expect("build header");
                let response = tiny_http::Response::from_string(response_body.to_string())
                    .with_status_code(200)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    #[allow(dead_code)]
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for OpenAiStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// The unit address and title from the `Section: ...` line of the prompt input.
fn section_line(input: &str) -> &str {
    input
        .lines()
        .find_map(|line| line.strip_prefix("Section: "))
        .unwrap_or("this section")
}

/// Parses `between MIN and MAX words` from the instructions and writes
/// prose that lands on the midpoint.
fn fitting_prose(instructions: &str, input: &str) -> String {
    let (min, max) = word_band(instructions).unwrap_or((150, 600));
    let target = min + (max - min) / 2;
    let lead = format!("This part covers {}.", section_line(input));
    let mut words: Vec<&str> = lead.split_whitespace().collect();
    let filler = ["careful", "study", "builds", "steady", "understanding", "over", "time."];
    let mut i = 0;
    while words.len() < target {
        words.push(filler[i % filler.len()]);
        i += 1;
    }
    words.join(" ")
}

fn word_band(instructions: &str) -> Option<(usize, usize)> {
    let rest = instructions.split("between ").nth(1)?;
    let mut parts = rest.split_whitespace();
    let min = parts.next()?.parse().ok()?;
    parts.next()?;
    let max = parts.next()?.parse().ok()?;
    Some((min, max))
}
