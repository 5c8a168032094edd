//! A single NNTP session.
//!
//! One command in flight at a time; the pool enforces exclusivity by
//! handing a connection to at most one caller. Every command writes
//! `<CMD>\r\n`, reads a status line `(code, message)`, and multiline
//! responses terminate at a lone `.` with dot-unstuffing applied.

use std::sync::Arc;

use nimbus_core::ErrorKind;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tracing::{debug, trace};

use crate::error::{NntpError, NntpResult};
use crate::pool::ProviderSettings;
use crate::yenc;

/// A parsed text article, used by diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    /// Normalised message-id.
    pub message_id: String,
    /// `Subject:` header when present.
    pub subject: String,
    /// `From:` header when present.
    pub from: String,
    /// Body with lines joined by `\n`.
    pub body: String,
}

enum Stream {
    Plain(BufStream<TcpStream>),
    Tls(Box<BufStream<TlsStream<TcpStream>>>),
    /// Transient state while `STARTTLS` swaps the transport.
    Detached,
}

impl Stream {
    async fn read_until_lf(&mut self, buf: &mut Vec<u8>) -> std::io::Result<usize> {
        match self {
            Self::Plain(s) => s.read_until(b'\n', buf).await,
            Self::Tls(s) => s.read_until(b'\n', buf).await,
            Self::Detached => Err(detached()),
        }
    }

    async fn write_all_flush(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Plain(s) => {
                s.write_all(data).await?;
                s.flush().await
            }
            Self::Tls(s) => {
                s.write_all(data).await?;
                s.flush().await
            }
            Self::Detached => Err(detached()),
        }
    }
}

fn detached() -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "transport detached during TLS upgrade",
    )
}

/// One NNTP connection to a single provider.
pub struct Connection {
    stream: Stream,
    provider: String,
    /// Last successfully selected group, memoised per connection so the
    /// streamer can skip redundant `GROUP` round-trips.
    current_group: Option<String>,
    /// Set while a command's response is outstanding. A connection dropped
    /// with this flag raised is protocol-desynced and must not be pooled.
    in_flight: bool,
}

impl Connection {
    /// Dial, greet, authenticate, and optionally upgrade to TLS.
    ///
    /// # Errors
    ///
    /// Returns a connection, authentication, or protocol error depending on
    /// which stage of the handshake failed.
    pub async fn connect(settings: &ProviderSettings) -> NntpResult<Self> {
        let tcp = TcpStream::connect((settings.address.as_str(), settings.port))
            .await
            .map_err(|source| NntpError::Io {
                operation: "dial",
                source,
            })?;

        let stream = if settings.ssl {
            let tls = tls_handshake(&settings.address, tcp).await?;
            Stream::Tls(Box::new(BufStream::new(tls)))
        } else {
            Stream::Plain(BufStream::new(tcp))
        };

        let mut connection = Self {
            stream,
            provider: settings.name.clone(),
            current_group: None,
            in_flight: false,
        };

        let (code, message) = connection.read_status().await?;
        if code != 200 && code != 201 {
            return Err(NntpError::UnexpectedStatus {
                command: "welcome",
                code,
                message,
                kind: ErrorKind::from_nntp_code(code),
            });
        }
        debug!(provider = %connection.provider, code, "nntp session established");

        if !settings.username.is_empty() {
            connection
                .authenticate(&settings.username, &settings.password)
                .await?;
        }
        if settings.use_tls && !settings.ssl {
            connection.start_tls(&settings.address).await?;
        }
        Ok(connection)
    }

    /// Provider this connection belongs to.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Whether every issued command has been fully answered.
    ///
    /// Cancellation can abandon a connection between a command and its
    /// response; such a session must be discarded, not reused.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        !self.in_flight
    }

    /// Run `AUTHINFO USER` / `AUTHINFO PASS`.
    ///
    /// # Errors
    ///
    /// Any status other than 381 / 281 maps to [`NntpError::Auth`].
    pub async fn authenticate(&mut self, username: &str, password: &str) -> NntpResult<()> {
        let (code, message) = self.command(&format!("AUTHINFO USER {username}")).await?;
        if code != 381 {
            return Err(NntpError::Auth { code, message });
        }
        let (code, message) = self.command(&format!("AUTHINFO PASS {password}")).await?;
        if code != 281 {
            return Err(NntpError::Auth { code, message });
        }
        trace!(provider = %self.provider, "authenticated");
        Ok(())
    }

    /// Upgrade the session with `STARTTLS`.
    ///
    /// # Errors
    ///
    /// A status other than 382 maps to a protocol error; handshake failures
    /// map to connection errors.
    pub async fn start_tls(&mut self, address: &str) -> NntpResult<()> {
        let (code, message) = self.command("STARTTLS").await?;
        if code != 382 {
            return Err(NntpError::UnexpectedStatus {
                command: "STARTTLS",
                code,
                message,
                kind: ErrorKind::Protocol,
            });
        }
        // The connection is discarded on any failure past this point, so
        // the detached placeholder never serves a command.
        let stream = std::mem::replace(&mut self.stream, Stream::Detached);
        let Stream::Plain(buffered) = stream else {
            return Err(NntpError::Protocol {
                detail: "STARTTLS on an already encrypted session".to_owned(),
            });
        };
        let tls = tls_handshake(address, buffered.into_inner()).await?;
        self.stream = Stream::Tls(Box::new(BufStream::new(tls)));
        Ok(())
    }

    /// Health probe: `DATE` must answer 111.
    ///
    /// # Errors
    ///
    /// Any other status or stream failure marks the connection dead.
    pub async fn ping(&mut self) -> NntpResult<()> {
        let (code, message) = self.command("DATE").await?;
        if code == 111 {
            Ok(())
        } else {
            Err(NntpError::UnexpectedStatus {
                command: "DATE",
                code,
                message,
                kind: ErrorKind::from_nntp_code(code),
            })
        }
    }

    /// Select a newsgroup, memoising the selection on this connection.
    ///
    /// # Errors
    ///
    /// A status other than 211 is classified via the response-code table.
    pub async fn select_group(&mut self, group: &str) -> NntpResult<()> {
        if self.current_group.as_deref() == Some(group) {
            return Ok(());
        }
        let (code, message) = self.command(&format!("GROUP {group}")).await?;
        if code != 211 {
            return Err(NntpError::UnexpectedStatus {
                command: "GROUP",
                code,
                message,
                kind: ErrorKind::from_nntp_code(code),
            });
        }
        self.current_group = Some(group.to_owned());
        Ok(())
    }

    /// `STAT` an article by message-id.
    ///
    /// # Errors
    ///
    /// A status other than 223 is classified via the response-code table.
    pub async fn stat(&mut self, message_id: &str) -> NntpResult<()> {
        let mid = normalize_message_id(message_id)?;
        let (code, message) = self.command(&format!("STAT {mid}")).await?;
        if code != 223 {
            return Err(NntpError::UnexpectedStatus {
                command: "STAT",
                code,
                message,
                kind: ErrorKind::from_nntp_code(code),
            });
        }
        Ok(())
    }

    /// Fetch the header block of an article.
    ///
    /// # Errors
    ///
    /// A status other than 221 is classified via the response-code table.
    pub async fn get_head(&mut self, message_id: &str) -> NntpResult<Vec<String>> {
        let mid = normalize_message_id(message_id)?;
        let (code, message) = self.command(&format!("HEAD {mid}")).await?;
        if code != 221 {
            return Err(NntpError::UnexpectedStatus {
                command: "HEAD",
                code,
                message,
                kind: ErrorKind::from_nntp_code(code),
            });
        }
        let lines = self.read_multiline().await?;
        Ok(lines
            .into_iter()
            .map(|line| String::from_utf8_lossy(&line).into_owned())
            .collect())
    }

    /// Fetch a full article (headers and text body).
    ///
    /// # Errors
    ///
    /// A status other than 220 is classified via the response-code table.
    pub async fn get_article(&mut self, message_id: &str) -> NntpResult<Article> {
        let mid = normalize_message_id(message_id)?;
        let (code, message) = self.command(&format!("ARTICLE {mid}")).await?;
        if code != 220 {
            return Err(NntpError::UnexpectedStatus {
                command: "ARTICLE",
                code,
                message,
                kind: ErrorKind::from_nntp_code(code),
            });
        }
        let lines = self.read_multiline().await?;

        let mut subject = String::new();
        let mut from = String::new();
        let mut body_lines = Vec::new();
        let mut in_body = false;
        for line in &lines {
            if in_body {
                body_lines.push(String::from_utf8_lossy(line).into_owned());
                continue;
            }
            if line.is_empty() {
                in_body = true;
                continue;
            }
            let text = String::from_utf8_lossy(line);
            if let Some(value) = header_value(&text, "Subject:") {
                subject = value;
            } else if let Some(value) = header_value(&text, "From:") {
                from = value;
            }
        }

        Ok(Article {
            message_id: mid,
            subject,
            from,
            body: body_lines.join("\n"),
        })
    }

    /// Fetch an article body preserving exact CRLF framing.
    ///
    /// Dot-unstuffed lines are joined with `\r\n` and a trailing `\r\n` is
    /// appended iff the body is non-empty, so the yEnc decoder sees the
    /// original line breaks.
    ///
    /// # Errors
    ///
    /// A status other than 222 is classified via the response-code table.
    pub async fn get_body(&mut self, message_id: &str) -> NntpResult<Vec<u8>> {
        let mid = normalize_message_id(message_id)?;
        let (code, message) = self.command(&format!("BODY {mid}")).await?;
        if code != 222 {
            return Err(NntpError::UnexpectedStatus {
                command: "BODY",
                code,
                message,
                kind: ErrorKind::from_nntp_code(code),
            });
        }
        let lines = self.read_multiline().await?;
        let mut body = Vec::new();
        for (index, line) in lines.iter().enumerate() {
            if index > 0 {
                body.extend_from_slice(b"\r\n");
            }
            body.extend_from_slice(line);
        }
        if !body.is_empty() {
            body.extend_from_slice(b"\r\n");
        }
        Ok(body)
    }

    /// Fetch and yEnc-decode one segment, selecting `group` first when given.
    ///
    /// # Errors
    ///
    /// Propagates group selection, body retrieval, and decode failures.
    pub async fn get_segment(
        &mut self,
        group: Option<&str>,
        message_id: &str,
    ) -> NntpResult<yenc::Decoded> {
        if let Some(group) = group {
            self.select_group(group).await?;
        }
        let body = self.get_body(message_id).await?;
        yenc::decode(&body).map_err(|source| NntpError::Yenc { source })
    }

    async fn command(&mut self, line: &str) -> NntpResult<(u16, String)> {
        self.in_flight = true;
        let mut wire = line.as_bytes().to_vec();
        wire.extend_from_slice(b"\r\n");
        self.stream
            .write_all_flush(&wire)
            .await
            .map_err(|source| NntpError::Io {
                operation: "write command",
                source,
            })?;
        let status = self.read_status().await?;
        self.in_flight = false;
        Ok(status)
    }

    async fn read_status(&mut self) -> NntpResult<(u16, String)> {
        let line = self.read_line().await?;
        let text = String::from_utf8_lossy(&line);
        let (code, message) = text.split_at_checked(3).ok_or_else(|| NntpError::Protocol {
            detail: format!("short status line '{text}'"),
        })?;
        let code: u16 = code.parse().map_err(|_| NntpError::Protocol {
            detail: format!("non-numeric status '{text}'"),
        })?;
        Ok((code, message.trim().to_owned()))
    }

    async fn read_line(&mut self) -> NntpResult<Vec<u8>> {
        let mut buf = Vec::new();
        let read = self
            .stream
            .read_until_lf(&mut buf)
            .await
            .map_err(|source| NntpError::Io {
                operation: "read line",
                source,
            })?;
        if read == 0 {
            return Err(NntpError::Io {
                operation: "read line",
                source: std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "server closed the connection",
                ),
            });
        }
        if buf.ends_with(b"\n") {
            buf.pop();
        }
        if buf.ends_with(b"\r") {
            buf.pop();
        }
        Ok(buf)
    }

    /// Read lines until the lone-dot terminator, applying dot-unstuffing.
    async fn read_multiline(&mut self) -> NntpResult<Vec<Vec<u8>>> {
        self.in_flight = true;
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await?;
            if line == b"." {
                self.in_flight = false;
                return Ok(lines);
            }
            if let Some(unstuffed) = line.strip_prefix(b".") {
                if unstuffed.starts_with(b".") {
                    lines.push(unstuffed.to_vec());
                    continue;
                }
            }
            lines.push(line);
        }
    }
}

fn header_value(line: &str, name: &str) -> Option<String> {
    let lower = line.to_ascii_lowercase();
    lower
        .starts_with(&name.to_ascii_lowercase())
        .then(|| line[name.len()..].trim().to_owned())
}

async fn tls_handshake(address: &str, tcp: TcpStream) -> NntpResult<TlsStream<TcpStream>> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));
    let server_name =
        ServerName::try_from(address.to_owned()).map_err(|_| NntpError::Protocol {
            detail: format!("'{address}' is not a valid TLS server name"),
        })?;
    connector
        .connect(server_name, tcp)
        .await
        .map_err(|source| NntpError::Io {
            operation: "tls handshake",
            source,
        })
}

/// Normalise a message-id: trim, require `@` and minimum length, wrap in
/// angle brackets.
///
/// # Errors
///
/// Returns [`NntpError::InvalidMessageId`] for ids shorter than three
/// characters or missing `@`.
pub fn normalize_message_id(id: &str) -> NntpResult<String> {
    let trimmed = id.trim();
    let mut bare = trimmed;
    if let Some(stripped) = bare.strip_prefix('<') {
        bare = stripped;
    }
    if let Some(stripped) = bare.strip_suffix('>') {
        bare = stripped;
    }
    if bare.len() < 3 || !bare.contains('@') {
        return Err(NntpError::InvalidMessageId {
            id: trimmed.to_owned(),
        });
    }
    Ok(format!("<{bare}>"))
}
