// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! MEP2 server
//!
//! The accept loop and the per-connection session: frame lines off the wire,
//! feed them to the parser, act on completed PDUs and answer each request
//! with a reply frame carrying the status code.

use anyhow::{Context, Result};
use std::mem;
use std::net::{Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::config;
use crate::envelope::Envelope;
use crate::mep2::checksum::Checksum;
use crate::mep2::error::{Mep2Error, SUCCESS};
use crate::mep2::parser::PduParser;
use crate::mep2::proto::{ContentType, Pdu, PduKind, TextOptions};
use crate::mep2::text;
use crate::store::{MailStore, MessageRecord, StoreError};
use crate::util;

/// Checksum failures tolerated before the session gives up on the link.
const MAX_CHECKSUM_ERRORS: u32 = 3;

/// Longest line the framer will buffer before declaring an overflow.
const MAX_LINE: usize = 4096;

/// Concurrent sessions accepted before newcomers are turned away with 408.
const MAX_SESSIONS: usize = 64;

/// An idle connection is told 409 and dropped after this long.
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);

pub async fn start(config: config::Server, store: Arc<MailStore>) -> Result<()> {
    let listener = TcpListener::bind((Ipv6Addr::UNSPECIFIED, config.port))
        .await
        .with_context(|| {
            format!("could not bind TCP socket on [{}]:{}", Ipv6Addr::UNSPECIFIED, config.port)
        })?;

    log::info!("Started MEP2 server on {}", listener.local_addr()?);

    let active = Arc::new(AtomicUsize::new(0));

    loop {
        let (mut socket, addr) = listener.accept()
            .await
            .context("could not accept connection")?;

        if active.load(Ordering::Relaxed) >= MAX_SESSIONS {
            log::warn!("turning away {addr}: {MAX_SESSIONS} sessions active");

            tokio::spawn(async move {
                let busy = Mep2Error::ConnectionsBusy;
                let response = reply(None, busy.code(), &busy.to_string());
                let _ = socket.write_all(response.data.as_bytes()).await;
            });

            continue;
        }

        active.fetch_add(1, Ordering::Relaxed);

        let active = active.clone();
        let store = store.clone();

        tokio::spawn(async move {
            if let Err(err) = handle_client(store, socket, addr).await {
                log::error!("error serving {addr}: {err:?}");
            }

            active.fetch_sub(1, Ordering::Relaxed);
        });
    }
}

/// Handle one MEP2 connection
async fn handle_client(
    store: Arc<MailStore>,
    mut socket: TcpStream,
    addr: SocketAddr,
) -> Result<()> {
    log::debug!("session opened by {addr}");

    let mut session = Session::new(store);
    let mut framer = LineFramer::default();

    loop {
        let framed = match tokio::time::timeout(IDLE_TIMEOUT, framer.read_line(&mut socket)).await {
            Err(_) => {
                let timeout = Mep2Error::Timeout;
                let response = reply(None, timeout.code(), &timeout.to_string());
                let _ = socket.write_all(response.data.as_bytes()).await;
                break;
            }
            Ok(framed) => framed?,
        };

        let (line, overflow) = match framed {
            Some(framed) => framed,
            None => break,
        };

        let response = if overflow {
            Some(session.line_overflow())
        } else {
            session.line(&line).await
        };

        if let Some(response) = response {
            log::trace!("<< {}", util::maybe_ascii(response.data.as_bytes()));
            socket.write_all(response.data.as_bytes()).await?;
            socket.flush().await?;

            if response.close_connection {
                break;
            }
        }
    }

    log::debug!("session with {addr} ended");

    Ok(())
}

/// Line framer: lines end in CR, optionally followed by LF.
///
/// The byte after a CR decides whether the LF belongs to this line, so the
/// framer reads one byte of lookahead unless the stream already ended.
#[derive(Default)]
struct LineFramer {
    buf: Vec<u8>,
    eof: bool,
    overflow: bool,
}

impl LineFramer {
    /// Read one line. `None` once the stream is drained. The flag reports
    /// that the line overran the buffer and was discarded.
    async fn read_line(&mut self, socket: &mut TcpStream) -> Result<Option<(Vec<u8>, bool)>> {
        loop {
            if let Some(cr) = memchr::memchr(b'\r', &self.buf) {
                if cr + 1 < self.buf.len() || self.eof {
                    let mut end = cr + 1;
                    if self.buf.get(end) == Some(&b'\n') {
                        end += 1;
                    }

                    let line: Vec<u8> = self.buf.drain(..end).collect();
                    return Ok(Some((line, mem::take(&mut self.overflow))));
                }
            } else if self.buf.len() > MAX_LINE {
                self.overflow = true;
                self.buf.clear();
            }

            if self.eof {
                if self.buf.is_empty() {
                    return Ok(None);
                }

                // Trailing bytes without a CR; the parser will reject them
                let line = mem::take(&mut self.buf);
                return Ok(Some((line, mem::take(&mut self.overflow))));
            }

            if socket.read_buf(&mut self.buf).await? == 0 {
                self.eof = true;
            }
        }
    }
}

struct Response {
    data: String,
    close_connection: bool,
}

/// Build the fixed reply frame `/REPLY [KIND] <code>` + message.
fn reply(kind: Option<PduKind>, code: u16, message: &str) -> Response {
    let mut data = match kind {
        Some(kind) => format!("/REPLY {} {code}\r\n", kind.name()),
        None => format!("/REPLY {code}\r\n"),
    };
    data.push_str(&text::encode(message.as_bytes()));
    data.push_str("\r\n");

    let mut sum = Checksum::default();
    sum.add_line(data.as_bytes());
    sum.add_line(b"/END REPLY*");
    data.push_str(&format!("/END REPLY*{sum}\r\n"));

    Response { data, close_connection: false }
}

/// A message under construction: envelope from `/ENV`, body from `/TEXT`,
/// committed to the store by `/SEND`.
#[derive(Default)]
struct Draft {
    envelope: Option<Envelope>,
    text: Option<TextOptions>,
    body: Vec<u8>,
}

struct Session {
    parser: PduParser,
    store: Arc<MailStore>,
    checksum_errors: u32,
    draft: Option<Draft>,
    /// Raw body lines of the Text PDU currently in flight.
    pending_body: Vec<u8>,
}

impl Session {
    fn new(store: Arc<MailStore>) -> Session {
        Session {
            parser: PduParser::default(),
            store,
            checksum_errors: 0,
            draft: None,
            pending_body: Vec::new(),
        }
    }

    fn line_overflow(&mut self) -> Response {
        self.parser.reset();
        self.pending_body.clear();
        self.error_response(None, Mep2Error::syntax("Line too long"))
    }

    async fn line(&mut self, line: &[u8]) -> Option<Response> {
        log::trace!(">> {}", util::maybe_ascii(line));

        // Body lines of an in-flight Text PDU are kept for storage; the
        // parser sees them too, for the checksum
        let body_line =
            self.parser.current_kind() == Some(PduKind::Text) && !line.starts_with(b"/");

        let kind = self.parser.current_kind();
        if let Err(err) = self.parser.parse_line(line) {
            let kind = kind.or(self.parser.current_kind());
            self.parser.reset();
            self.pending_body.clear();
            return Some(self.error_response(kind, err));
        }

        if body_line {
            if self.pending_body.len() + line.len() > self.store.max_message_size() as usize {
                self.parser.reset();
                self.pending_body.clear();
                return Some(self.error_response(kind, Mep2Error::InsufficientSpace));
            }
            self.pending_body.extend_from_slice(line);
        }

        if !self.parser.is_complete() {
            return None;
        }

        let pdu = self.parser.extract_pdu()?;
        let kind = pdu.kind();

        match self.handle_pdu(pdu).await {
            Ok(response) => Some(response),
            Err(err) => Some(self.error_response(Some(kind), err)),
        }
    }

    async fn handle_pdu(&mut self, pdu: Pdu) -> Result<Response, Mep2Error> {
        let kind = pdu.kind();

        match pdu {
            Pdu::Busy | Pdu::Comment | Pdu::Verify(_) => {}

            Pdu::Create => {
                self.draft = Some(Draft::default());
            }

            Pdu::Env(envelope) => {
                self.draft.get_or_insert_with(Draft::default).envelope = Some(envelope);
            }

            Pdu::Text(options) => {
                let draft = self.draft.get_or_insert_with(Draft::default);
                draft.text = Some(options);
                draft.body = mem::take(&mut self.pending_body);
            }

            Pdu::Scan(query) | Pdu::Turn(query) => {
                if let Some(subject) = &query.subject {
                    let matches = self
                        .store
                        .catalog
                        .by_subject(subject)
                        .map_err(|err| Mep2Error::System(err.to_string()))?;
                    log::debug!("{} query for {subject:?}: {} matches", kind.name(), matches.len());
                }
            }

            Pdu::Send => return self.send_draft().await,

            Pdu::Term => {
                let mut response =
                    reply(Some(kind), SUCCESS, "Request performed successfully");
                response.close_connection = true;
                return Ok(response);
            }
        }

        Ok(reply(Some(kind), SUCCESS, "Request performed successfully"))
    }

    async fn send_draft(&mut self) -> Result<Response, Mep2Error> {
        let draft = self
            .draft
            .take()
            .filter(|draft| draft.envelope.is_some())
            .ok_or_else(|| Mep2Error::ProtocolViolation("SEND without envelope".into()))?;
        let envelope = draft.envelope.expect("checked above");

        let mut file = self.store.create_file().await.map_err(store_error)?;
        file.write_encoded(&draft.body).await.map_err(store_error)?;

        let filename = file.filename().to_owned();
        let size = file.size();
        file.commit().await.map_err(store_error)?;

        // The envelope date wins over the arrival time when the client sent
        // one
        let posted = envelope
            .date
            .as_ref()
            .map(|date| date.utc())
            .unwrap_or_else(OffsetDateTime::now_utc)
            .unix_timestamp()
            / 60;

        let record = MessageRecord {
            filename,
            from: envelope.from.as_ref().map(ToString::to_string).unwrap_or_default(),
            subject: envelope.subject.clone().unwrap_or_default(),
            folder: "INBOX".into(),
            posted,
            size,
        };

        self.store
            .catalog
            .insert(&record)
            .map_err(|err| Mep2Error::System(err.to_string()))?;
        self.store
            .catalog
            .flush()
            .await
            .map_err(|err| Mep2Error::System(err.to_string()))?;

        let content = draft
            .text
            .as_ref()
            .map(|text| text.content_type)
            .unwrap_or(ContentType::Ascii);

        log::info!(
            "stored {:?} message {} ({} bytes) for {} recipients",
            content,
            record.filename,
            record.size,
            envelope.to.len(),
        );

        Ok(reply(Some(PduKind::Send), SUCCESS, "Request performed successfully"))
    }

    fn error_response(&mut self, kind: Option<PduKind>, err: Mep2Error) -> Response {
        log::debug!("request failed: {err}");

        if matches!(err, Mep2Error::Checksum(_)) {
            self.checksum_errors += 1;

            if self.checksum_errors >= MAX_CHECKSUM_ERRORS {
                let fatal = Mep2Error::TooManyChecksumErrors;
                let mut response = reply(kind, fatal.code(), &fatal.to_string());
                response.close_connection = true;
                return response;
            }
        }

        let mut response = reply(kind, err.code(), &err.to_string());
        response.close_connection = err.is_fatal();
        response
    }
}

fn store_error(err: StoreError) -> Mep2Error {
    match err {
        StoreError::Full => Mep2Error::InsufficientSpace,
        StoreError::Encoding => Mep2Error::malformed("invalid % escape in message body"),
        StoreError::Io(err) => Mep2Error::System(err.to_string()),
    }
}
