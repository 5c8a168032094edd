//! In-process NNTP stub server for protocol tests.
//!
//! The stub understands the command subset the engine issues (AUTHINFO,
//! DATE, GROUP, STAT, HEAD, ARTICLE, BODY, QUIT) and serves articles from
//! an in-memory map, applying dot-stuffing on the wire exactly like a real
//! server. Message-ids not present in the map answer `430`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// One article the stub can serve.
#[derive(Debug, Clone)]
pub struct StubArticle {
    /// Header lines emitted for HEAD/ARTICLE, without trailing CRLF.
    pub headers: Vec<String>,
    /// Raw body bytes; CRLF-separated lines, no dot-stuffing applied.
    pub body: Vec<u8>,
}

impl StubArticle {
    /// Article with standard headers and the given body.
    #[must_use]
    pub fn with_body(body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers: vec!["Subject: fixture".to_owned(), "From: stub".to_owned()],
            body: body.into(),
        }
    }
}

#[derive(Default)]
struct StubState {
    articles: HashMap<String, StubArticle>,
    credentials: Option<(String, String)>,
}

/// Scripted NNTP server bound to an ephemeral localhost port.
pub struct StubNntpServer {
    addr: SocketAddr,
    state: Arc<Mutex<StubState>>,
    accept_task: JoinHandle<()>,
}

impl StubNntpServer {
    /// Bind the stub and start accepting sessions.
    ///
    /// # Panics
    ///
    /// Panics when the ephemeral bind fails; tests cannot proceed without it.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub nntp server");
        let addr = listener.local_addr().expect("stub local addr");
        let state = Arc::new(Mutex::new(StubState::default()));
        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let session_state = Arc::clone(&accept_state);
                tokio::spawn(async move {
                    let _ = serve_session(socket, session_state).await;
                });
            }
        });
        Self {
            addr,
            state,
            accept_task,
        }
    }

    /// Address the stub is listening on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Require `AUTHINFO` with these credentials before serving articles.
    pub async fn require_auth(&self, username: &str, password: &str) {
        self.state.lock().await.credentials = Some((username.to_owned(), password.to_owned()));
    }

    /// Register an article under a message-id (angle brackets included).
    pub async fn add_article(&self, message_id: &str, article: StubArticle) {
        self.state
            .lock()
            .await
            .articles
            .insert(message_id.to_owned(), article);
    }

    /// Remove an article so subsequent fetches answer 430.
    pub async fn remove_article(&self, message_id: &str) {
        self.state.lock().await.articles.remove(message_id);
    }
}

impl Drop for StubNntpServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_session(socket: TcpStream, state: Arc<Mutex<StubState>>) -> std::io::Result<()> {
    let mut stream = BufStream::new(socket);
    stream.write_all(b"200 nimbus-stub ready\r\n").await?;
    stream.flush().await?;

    let mut authenticated_user: Option<String> = None;
    loop {
        let mut line = String::new();
        if stream.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let line = line.trim_end();
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        match verb.to_ascii_uppercase().as_str() {
            "QUIT" => {
                respond(&mut stream, "205 bye").await?;
                return Ok(());
            }
            "DATE" => respond(&mut stream, "111 20260801000000").await?,
            "AUTHINFO" => {
                let (kind, value) = rest.split_once(' ').unwrap_or((rest, ""));
                let expected = state.lock().await.credentials.clone();
                match (kind.to_ascii_uppercase().as_str(), expected) {
                    ("USER", _) => {
                        authenticated_user = Some(value.to_owned());
                        respond(&mut stream, "381 password required").await?;
                    }
                    ("PASS", Some((user, pass))) => {
                        if authenticated_user.as_deref() == Some(user.as_str()) && value == pass {
                            respond(&mut stream, "281 authentication accepted").await?;
                        } else {
                            respond(&mut stream, "481 authentication failed").await?;
                        }
                    }
                    ("PASS", None) => respond(&mut stream, "281 authentication accepted").await?,
                    _ => respond(&mut stream, "501 unknown AUTHINFO").await?,
                }
            }
            "GROUP" => respond(&mut stream, &format!("211 0 0 0 {rest}")).await?,
            "STAT" => {
                if article_exists(&state, rest).await {
                    respond(&mut stream, &format!("223 0 {rest}")).await?;
                } else {
                    respond(&mut stream, "430 no such article").await?;
                }
            }
            "HEAD" => match lookup(&state, rest).await {
                Some(article) => {
                    respond(&mut stream, &format!("221 0 {rest}")).await?;
                    write_lines(&mut stream, &article.headers).await?;
                    finish_multiline(&mut stream).await?;
                }
                None => respond(&mut stream, "430 no such article").await?,
            },
            "ARTICLE" => match lookup(&state, rest).await {
                Some(article) => {
                    respond(&mut stream, &format!("220 0 {rest}")).await?;
                    write_lines(&mut stream, &article.headers).await?;
                    stream.write_all(b"\r\n").await?;
                    write_body(&mut stream, &article.body).await?;
                    finish_multiline(&mut stream).await?;
                }
                None => respond(&mut stream, "430 no such article").await?,
            },
            "BODY" => match lookup(&state, rest).await {
                Some(article) => {
                    respond(&mut stream, &format!("222 0 {rest}")).await?;
                    write_body(&mut stream, &article.body).await?;
                    finish_multiline(&mut stream).await?;
                }
                None => respond(&mut stream, "430 no such article").await?,
            },
            _ => respond(&mut stream, "500 unknown command").await?,
        }
    }
}

async fn respond(stream: &mut BufStream<TcpStream>, line: &str) -> std::io::Result<()> {
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;
    stream.flush().await
}

async fn lookup(state: &Arc<Mutex<StubState>>, message_id: &str) -> Option<StubArticle> {
    state.lock().await.articles.get(message_id).cloned()
}

async fn article_exists(state: &Arc<Mutex<StubState>>, message_id: &str) -> bool {
    state.lock().await.articles.contains_key(message_id)
}

async fn write_lines(stream: &mut BufStream<TcpStream>, lines: &[String]) -> std::io::Result<()> {
    for line in lines {
        write_stuffed_line(stream, line.as_bytes()).await?;
    }
    Ok(())
}

/// Write a body as CRLF lines with dot-stuffing applied.
async fn write_body(stream: &mut BufStream<TcpStream>, body: &[u8]) -> std::io::Result<()> {
    if body.is_empty() {
        return Ok(());
    }
    let body = body.strip_suffix(b"\r\n").unwrap_or(body);
    for line in body.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        write_stuffed_line(stream, line).await?;
    }
    Ok(())
}

async fn write_stuffed_line(
    stream: &mut BufStream<TcpStream>,
    line: &[u8],
) -> std::io::Result<()> {
    if line.starts_with(b".") {
        stream.write_all(b".").await?;
    }
    stream.write_all(line).await?;
    stream.write_all(b"\r\n").await
}

async fn finish_multiline(stream: &mut BufStream<TcpStream>) -> std::io::Result<()> {
    stream.write_all(b".\r\n").await?;
    stream.flush().await
}
