use log::{debug, trace};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;
#[cfg(not(target_arch = "wasm32"))]
use std::time::Duration;

#[derive(Debug)]
pub enum TransportError {
    InvalidUrl(String),
    Connect { address: String, message: String },
    Io(io::Error),
    Http(String),
    Malformed(String),
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::InvalidUrl(url) => write!(f, "Invalid backend URL '{}'", url),
            TransportError::Connect { address, message } => {
                write!(f, "Cannot connect to backend at {}: {}", address, message)
            }
            TransportError::Io(err) => write!(f, "Backend connection failed: {}", err),
            TransportError::Http(message) => write!(f, "Backend request failed: {}", message),
            TransportError::Malformed(message) => write!(f, "Malformed backend response: {}", message),
        }
    }
}

impl Error for TransportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TransportError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        TransportError::Io(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    Running,
    Completed,
    Error(String),
}

impl RemoteStatus {
    /// First line names the state; an error may carry its message on the following lines.
    pub fn parse(body: &str) -> Option<RemoteStatus> {
        let body = body.trim();
        let (head, rest) = body.split_once('\n').unwrap_or((body, ""));
        match head.trim().to_ascii_lowercase().as_str() {
            "running" => Some(RemoteStatus::Running),
            "completed" => Some(RemoteStatus::Completed),
            "error" => Some(RemoteStatus::Error(rest.trim().to_string())),
            _ => None,
        }
    }
}

/// Answer to a per-block `start` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Accepted,
    Interrupted,
    Rejected(String),
}

impl StartOutcome {
    pub fn from_response(response: &Response) -> StartOutcome {
        match response.status {
            205 => StartOutcome::Interrupted,
            s if (200..300).contains(&s) => StartOutcome::Accepted,
            _ => StartOutcome::Rejected(response.body.clone()),
        }
    }
}

/// Answer to a whole-program `code` submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted(String),
    Rejected(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelInfo {
    pub name: String,
    /// Block types that may not be used in this level.
    pub blocked: Vec<String>,
}

impl LevelInfo {
    pub fn parse(body: &str) -> LevelInfo {
        let mut parts = body.split_whitespace();
        LevelInfo {
            name: parts.next().unwrap_or_default().to_string(),
            blocked: parts.map(str::to_string).collect(),
        }
    }
}

pub fn parse_variables(body: &str) -> Vec<(String, String)> {
    body.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .filter(|(name, _)| !name.is_empty())
        .collect()
}

/// The execution backend the remote controller talks to.
pub trait Backend {
    fn start(&mut self, code: &str, first: bool) -> Result<StartOutcome, TransportError>;
    fn submit_code(
        &mut self,
        program: &str,
        sleep_per_line_ms: Option<u64>,
    ) -> Result<SubmitOutcome, TransportError>;
    fn stop_code(&mut self) -> Result<String, TransportError>;
    fn status(&mut self) -> Result<RemoteStatus, TransportError>;
    /// Interrupts execution and restarts the level. Returns the hero position.
    fn reset(&mut self) -> Result<String, TransportError>;
    /// Clears backend variables. Returns the hero position.
    fn clear(&mut self) -> Result<String, TransportError>;
    fn variables(&mut self) -> Result<Vec<(String, String)>, TransportError>;
    fn levels(&mut self) -> Result<Vec<String>, TransportError>;
    fn level(&mut self, name: Option<&str>) -> Result<LevelInfo, TransportError>;
}

/// HTTP client for the dungeon backend. Every route is a `POST` with a plain-text body.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug, Clone)]
pub struct HttpBackend {
    agent: ureq::Agent,
    base_url: String,
}

#[cfg(not(target_arch = "wasm32"))]
impl HttpBackend {
    pub fn new(url: &str) -> Result<Self, TransportError> {
        let trimmed = url.trim().trim_end_matches('/');
        let authority = trimmed
            .strip_prefix("http://")
            .or_else(|| trimmed.strip_prefix("https://"))
            .ok_or_else(|| TransportError::InvalidUrl(url.to_string()))?;
        let host = authority.split('/').next().unwrap_or_default();
        if host.is_empty() || host.starts_with(':') {
            return Err(TransportError::InvalidUrl(url.to_string()));
        }
        Ok(Self {
            agent: ureq::Agent::new(),
            base_url: trimmed.to_string(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::AgentBuilder::new().timeout(timeout).build();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sends `body` to `route`. Error statuses come back as responses, not as errors.
    pub fn post(&self, route: &str, query: &[(&str, &str)], body: &str) -> Result<Response, TransportError> {
        let url = format!("{}/{}", self.base_url, route);
        debug!("POST {} {:?} ({} bytes)", url, query, body.len());
        let mut request = self
            .agent
            .post(&url)
            .set("Content-Type", "text/plain; charset=utf-8");
        for (name, value) in query {
            request = request.query(name, value);
        }
        let response = match request.send_string(body) {
            Ok(response) => Response {
                status: response.status(),
                body: response.into_string()?,
            },
            Err(ureq::Error::Status(status, response)) => Response {
                status,
                body: response.into_string().unwrap_or_default(),
            },
            Err(ureq::Error::Transport(transport)) => {
                return Err(match transport.kind() {
                    ureq::ErrorKind::InvalidUrl => TransportError::InvalidUrl(url),
                    ureq::ErrorKind::ConnectionFailed | ureq::ErrorKind::Dns => TransportError::Connect {
                        address: self.base_url.clone(),
                        message: transport.to_string(),
                    },
                    _ => TransportError::Http(transport.to_string()),
                })
            }
        };
        trace!("{} -> {} {:?}", url, response.status, response.body);
        Ok(response)
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl Backend for HttpBackend {
    fn start(&mut self, code: &str, first: bool) -> Result<StartOutcome, TransportError> {
        let query: &[(&str, &str)] = if first { &[("first", "true")] } else { &[] };
        Ok(StartOutcome::from_response(&self.post("start", query, code)?))
    }

    fn submit_code(
        &mut self,
        program: &str,
        sleep_per_line_ms: Option<u64>,
    ) -> Result<SubmitOutcome, TransportError> {
        let sleep = sleep_per_line_ms.map(|ms| ms.to_string());
        let query = match &sleep {
            Some(ms) => vec![("sleep", ms.as_str())],
            None => Vec::new(),
        };
        let response = self.post("code", &query, program)?;
        Ok(if response.is_success() {
            SubmitOutcome::Accepted(response.body)
        } else {
            SubmitOutcome::Rejected(response.body)
        })
    }

    fn stop_code(&mut self) -> Result<String, TransportError> {
        Ok(self.post("code", &[("stop", "1")], "")?.body)
    }

    fn status(&mut self) -> Result<RemoteStatus, TransportError> {
        let response = self.post("status", &[], "")?;
        RemoteStatus::parse(&response.body).ok_or_else(|| {
            TransportError::Malformed(format!("unknown status '{}'", response.body.trim()))
        })
    }

    fn reset(&mut self) -> Result<String, TransportError> {
        Ok(self.post("reset", &[], "")?.body)
    }

    fn clear(&mut self) -> Result<String, TransportError> {
        Ok(self.post("clear", &[], "")?.body)
    }

    fn variables(&mut self) -> Result<Vec<(String, String)>, TransportError> {
        Ok(parse_variables(&self.post("variables", &[], "")?.body))
    }

    fn levels(&mut self) -> Result<Vec<String>, TransportError> {
        let body = self.post("levels", &[], "")?.body;
        Ok(body
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn level(&mut self, name: Option<&str>) -> Result<LevelInfo, TransportError> {
        let query = match name {
            Some(name) => vec![("levelName", name)],
            None => Vec::new(),
        };
        Ok(LevelInfo::parse(&self.post("level", &query, "")?.body))
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use std::io::{BufRead, Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use test_log::test;

    #[test]
    fn status_205_means_interrupted() {
        let outcome = |status: u16, body: &str| {
            StartOutcome::from_response(&Response {
                status,
                body: body.to_string(),
            })
        };
        assert_eq!(outcome(200, "OK"), StartOutcome::Accepted);
        assert_eq!(outcome(205, "Execution interrupted"), StartOutcome::Interrupted);
        assert_eq!(
            outcome(400, "Fehlermeldung: wall"),
            StartOutcome::Rejected("Fehlermeldung: wall".to_string())
        );
    }

    #[test]
    fn remote_status_words() {
        assert_eq!(RemoteStatus::parse("running\n"), Some(RemoteStatus::Running));
        assert_eq!(RemoteStatus::parse("Completed"), Some(RemoteStatus::Completed));
        assert_eq!(
            RemoteStatus::parse("error\nUserScript:3: error: boom"),
            Some(RemoteStatus::Error("UserScript:3: error: boom".to_string()))
        );
        assert_eq!(RemoteStatus::parse("sleeping"), None);
    }

    #[test]
    fn variables_and_levels_parse() {
        assert_eq!(
            parse_variables("x=3\narr=[1, 2]\n\nbogus\nFeuerball = 5\n"),
            vec![
                ("x".to_string(), "3".to_string()),
                ("arr".to_string(), "[1, 2]".to_string()),
                ("Feuerball".to_string(), "5".to_string())
            ]
        );
        assert_eq!(
            LevelInfo::parse("level002 move_up fireball_left"),
            LevelInfo {
                name: "level002".to_string(),
                blocked: vec!["move_up".to_string(), "fireball_left".to_string()]
            }
        );
    }

    #[test]
    fn urls_keep_their_base_path() {
        let backend = HttpBackend::new("http://localhost:8080/api/").unwrap();
        assert_eq!(backend.base_url(), "http://localhost:8080/api");
        assert!(HttpBackend::new("https://dungeon.example").is_ok());
        assert!(HttpBackend::new("ftp://example").is_err());
        assert!(HttpBackend::new("http://:80").is_err());
        assert!(HttpBackend::new("http://").is_err());
    }

    /// Serves one request with `reply` and hands back its request line and body.
    fn serve_once(reply: &'static str) -> (u16, thread::JoinHandle<(String, String)>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = io::BufReader::new(stream);
            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            let mut length = 0;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        length = value.trim().parse().unwrap();
                    }
                }
            }
            let mut body = vec![0; length];
            reader.read_exact(&mut body).unwrap();
            let mut stream = reader.into_inner();
            stream.write_all(reply.as_bytes()).unwrap();
            stream.flush().unwrap();
            (request_line, String::from_utf8(body).unwrap())
        });
        (port, server)
    }

    #[test]
    fn requests_reach_a_live_server() {
        let (port, server) =
            serve_once("HTTP/1.1 205 Reset Content\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        let mut backend = HttpBackend::new(&format!("http://127.0.0.1:{}", port))
            .unwrap()
            .with_timeout(Duration::from_secs(5));
        let outcome = backend.start("move_up(1);", true).unwrap();
        assert_eq!(outcome, StartOutcome::Interrupted);
        let (request_line, body) = server.join().unwrap();
        assert_eq!(request_line, "POST /start?first=true HTTP/1.1\r\n");
        assert_eq!(body, "move_up(1);");
    }

    #[test]
    fn error_statuses_carry_the_backend_message() {
        let (port, server) = serve_once(
            "HTTP/1.1 400 Bad Request\r\nContent-Length: 24\r\nConnection: close\r\n\r\nUserScript:5: error: ';'",
        );
        let mut backend = HttpBackend::new(&format!("http://127.0.0.1:{}/", port))
            .unwrap()
            .with_timeout(Duration::from_secs(5));
        let outcome = backend.submit_code("move_up(1)", Some(250)).unwrap();
        assert_eq!(outcome, SubmitOutcome::Rejected("UserScript:5: error: ';'".to_string()));
        let (request_line, body) = server.join().unwrap();
        assert_eq!(request_line, "POST /code?sleep=250 HTTP/1.1\r\n");
        assert_eq!(body, "move_up(1)");
    }

    #[test]
    fn level_names_are_query_encoded() {
        let (port, server) =
            serve_once("HTTP/1.1 200 OK\r\nContent-Length: 16\r\nConnection: close\r\n\r\nlevel 2 move_up\n");
        let mut backend = HttpBackend::new(&format!("http://127.0.0.1:{}", port)).unwrap();
        let info = backend.level(Some("level 2")).unwrap();
        assert_eq!(info.blocked, vec!["2".to_string(), "move_up".to_string()]);
        let (request_line, _) = server.join().unwrap();
        assert!(request_line.starts_with("POST /level?levelName=level"));
        assert!(!request_line.contains("level 2"));
    }

    #[test]
    fn refused_connections_are_transport_errors() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let mut backend = HttpBackend::new(&format!("http://127.0.0.1:{}", port)).unwrap();
        assert!(matches!(
            backend.status(),
            Err(TransportError::Connect { .. })
        ));
    }
}
