//! JSON-lines transport for the headlessd management socket.
//!
//! Every message is one JSON document terminated by `\n`. Lines longer than
//! the configured cap are rejected as `InvalidData` without buffering them.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::path::Path;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::UnixStream;
use tokio::sync::mpsc;

pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

fn invalid_data<E>(e: E) -> std::io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    std::io::Error::new(std::io::ErrorKind::InvalidData, e)
}

/// Read one raw line (without the trailing newline).
///
/// An oversized line is consumed up to its newline before the error is
/// returned so the next read starts on a fresh line.
async fn read_bounded_line<R>(reader: &mut R, max_bytes: usize) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut seen = 0usize;
    let mut overflow = false;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            if seen == 0 {
                return Ok(None);
            }
            break;
        }

        let (chunk, done) = match available.iter().position(|b| *b == b'\n') {
            Some(i) => (&available[..i], Some(i + 1)),
            None => (available, None),
        };
        seen += chunk.len();
        if seen > max_bytes {
            overflow = true;
        } else {
            buf.extend_from_slice(chunk);
        }

        let consumed = done.unwrap_or(available.len());
        reader.consume(consumed);
        if done.is_some() {
            break;
        }
    }

    if overflow {
        return Err(invalid_data(format!(
            "json line exceeds max length ({} > {})",
            seen, max_bytes
        )));
    }
    Ok(Some(buf))
}

pub async fn read_json_line_with_limit<R, T>(
    reader: &mut R,
    max_bytes: usize,
) -> std::io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let Some(line) = read_bounded_line(reader, max_bytes).await? else {
        return Ok(None);
    };
    let s = std::str::from_utf8(&line).map_err(invalid_data)?;
    serde_json::from_str::<T>(s).map(Some).map_err(invalid_data)
}

pub async fn read_json_line<R, T>(reader: &mut R) -> std::io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    read_json_line_with_limit(reader, DEFAULT_MAX_LINE_BYTES).await
}

pub async fn write_json_line<W, T>(writer: &mut W, value: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut json = serde_json::to_vec(value).map_err(invalid_data)?;
    json.push(b'\n');
    writer.write_all(&json).await?;
    writer.flush().await
}

/// What a connection handler wants done with a request.
pub enum Reply<Resp, Event> {
    /// Write one response and keep reading requests.
    Respond(Resp),
    /// Write `ack`, then forward every event until either side goes away.
    /// The connection ends with the stream.
    Stream {
        ack: Resp,
        events: mpsc::UnboundedReceiver<Event>,
    },
}

/// Serve a request/response session on a bidirectional stream.
///
/// Undecodable lines are answered with `invalid_response` and the session
/// continues. A [`Reply::Stream`] turns the connection into a one-way event
/// feed; further client input is ignored and EOF ends it.
pub async fn serve_jsonl_session<S, Req, Resp, Event, F, Fut, InvalidResp>(
    stream: S,
    max_line_bytes: usize,
    handler: F,
    invalid_response: InvalidResp,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    Req: DeserializeOwned,
    Resp: Serialize,
    Event: Serialize,
    F: Fn(Req) -> Fut,
    Fut: Future<Output = Reply<Resp, Event>>,
    InvalidResp: Fn(std::io::Error) -> Resp,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);

    loop {
        let req = match read_json_line_with_limit::<_, Req>(&mut reader, max_line_bytes).await {
            Ok(Some(req)) => req,
            Ok(None) => break,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                write_json_line(&mut writer, &invalid_response(e)).await?;
                continue;
            }
            Err(e) => return Err(e),
        };

        match handler(req).await {
            Reply::Respond(resp) => write_json_line(&mut writer, &resp).await?,
            Reply::Stream { ack, mut events } => {
                write_json_line(&mut writer, &ack).await?;
                let mut discard = [0_u8; 64];
                loop {
                    tokio::select! {
                        event = events.recv() => {
                            let Some(event) = event else {
                                break;
                            };
                            if write_json_line(&mut writer, &event).await.is_err() {
                                break;
                            }
                        }
                        read = reader.read(&mut discard) => {
                            match read {
                                Ok(0) | Err(_) => break,
                                Ok(_) => {}
                            }
                        }
                    }
                }
                break;
            }
        }
    }

    Ok(())
}

/// Client side of a management socket connection.
pub struct LineClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl LineClient {
    pub fn new(stream: UnixStream) -> Self {
        let (r, w) = stream.into_split();
        Self {
            reader: BufReader::new(r),
            writer: w,
        }
    }

    pub async fn connect(path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self::new(UnixStream::connect(path).await?))
    }

    pub async fn send<T: Serialize>(&mut self, value: &T) -> std::io::Result<()> {
        write_json_line(&mut self.writer, value).await
    }

    /// Next message from the server, `None` once it hung up.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> std::io::Result<Option<T>> {
        read_json_line(&mut self.reader).await
    }

    /// Send one request and wait for its response.
    pub async fn request<Req, Resp>(&mut self, req: &Req) -> std::io::Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        self.send(req).await?;
        self.recv().await?.ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "server closed the connection before responding",
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    struct Req {
        n: u64,
    }

    #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    struct Resp {
        ok: bool,
        n: u64,
    }

    #[tokio::test]
    async fn returns_invalid_data_on_bad_json() {
        let (a, b) = tokio::io::duplex(1024);
        let (_ar, mut aw) = tokio::io::split(a);
        let (br, _bw) = tokio::io::split(b);
        let mut br = BufReader::new(br);

        aw.write_all(b"{not json}\n").await.unwrap();

        let err = read_json_line::<_, serde_json::Value>(&mut br)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn oversized_line_is_skipped_and_next_line_reads() {
        let (a, b) = tokio::io::duplex(1024 * 1024);
        let (_ar, mut aw) = tokio::io::split(a);
        let (br, _bw) = tokio::io::split(b);
        let mut br = BufReader::with_capacity(8, br);

        let big = format!("\"{}\"\n", "a".repeat(64));
        aw.write_all(big.as_bytes()).await.unwrap();
        aw.write_all(b"{\"n\":3}\n").await.unwrap();

        let err = read_json_line_with_limit::<_, Req>(&mut br, 32)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);

        let next: Req = read_json_line_with_limit(&mut br, 32)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next, Req { n: 3 });
    }

    #[tokio::test]
    async fn last_line_without_newline_is_still_read() {
        let (a, b) = tokio::io::duplex(1024);
        let (_ar, mut aw) = tokio::io::split(a);
        let (br, _bw) = tokio::io::split(b);
        let mut br = BufReader::new(br);

        aw.write_all(b"{\"n\":9}").await.unwrap();
        aw.shutdown().await.unwrap();
        drop(aw);

        let got: Req = read_json_line(&mut br).await.unwrap().unwrap();
        assert_eq!(got, Req { n: 9 });
        assert!(read_json_line::<_, Req>(&mut br).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn session_answers_invalid_and_valid_requests() {
        let (a, b) = UnixStream::pair().unwrap();
        let h = tokio::spawn(async move {
            serve_jsonl_session::<_, Req, Resp, (), _, _, _>(
                a,
                32,
                |req: Req| async move { Reply::Respond(Resp { ok: true, n: req.n }) },
                |_e| Resp { ok: false, n: 0 },
            )
            .await
            .unwrap();
        });

        let mut client = LineClient::new(b);

        client.writer.write_all(b"{not json}\n").await.unwrap();
        let resp: Resp = client.recv().await.unwrap().unwrap();
        assert_eq!(resp, Resp { ok: false, n: 0 });

        let oversized = format!("{{\"n\":1,\"pad\":\"{}\"}}\n", "x".repeat(64));
        client.writer.write_all(oversized.as_bytes()).await.unwrap();
        let resp: Resp = client.recv().await.unwrap().unwrap();
        assert_eq!(resp, Resp { ok: false, n: 0 });

        let resp: Resp = client.request(&Req { n: 7 }).await.unwrap();
        assert_eq!(resp, Resp { ok: true, n: 7 });

        drop(client);
        h.await.unwrap();
    }

    #[tokio::test]
    async fn stream_reply_forwards_events_until_client_leaves() {
        let (a, b) = UnixStream::pair().unwrap();
        let (tx, rx) = mpsc::unbounded_channel::<Req>();
        let rx = std::sync::Mutex::new(Some(rx));

        let h = tokio::spawn(async move {
            serve_jsonl_session(
                a,
                DEFAULT_MAX_LINE_BYTES,
                |req: Req| {
                    let events = rx.lock().unwrap().take();
                    async move {
                        match events {
                            Some(events) if req.n == 0 => Reply::Stream {
                                ack: Resp { ok: true, n: 0 },
                                events,
                            },
                            _ => Reply::Respond(Resp { ok: true, n: req.n }),
                        }
                    }
                },
                |_e| Resp { ok: false, n: 0 },
            )
            .await
            .unwrap();
        });

        let mut client = LineClient::new(b);
        let ack: Resp = client.request(&Req { n: 0 }).await.unwrap();
        assert_eq!(ack, Resp { ok: true, n: 0 });

        tx.send(Req { n: 1 }).unwrap();
        tx.send(Req { n: 2 }).unwrap();
        let first: Req = client.recv().await.unwrap().unwrap();
        let second: Req = client.recv().await.unwrap().unwrap();
        assert_eq!((first.n, second.n), (1, 2));

        drop(client);
        tokio::time::timeout(std::time::Duration::from_secs(1), h)
            .await
            .unwrap()
            .unwrap();
    }
}
