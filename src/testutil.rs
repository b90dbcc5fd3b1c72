//! In-process protocol fakes for session and coordinator tests.
//!
//! Everything binds to an ephemeral loopback port; no test touches the real
//! network.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::bencode::{encode, Value};
use crate::constants::METADATA_PIECE_SIZE;
use crate::peer::{ExtensionHandshake, MetadataMessage, MetadataMessageType};

// ============================================================================
// Fake peer
// ============================================================================

pub struct FakePeerOptions {
    /// The bytes actually served as metadata pieces.
    pub served: Vec<u8>,
    /// `metadata_size` advertised in the extension handshake; defaults to
    /// the served length.
    pub advertised_size: Option<usize>,
    /// Whether the handshake advertises the extension protocol.
    pub extension_bit: bool,
    /// Whether `ut_metadata` appears in our `m` mapping.
    pub offer_metadata: bool,
    /// Reject every metadata request instead of serving data.
    pub reject_requests: bool,
    /// Artificial delay before each data message.
    pub serve_delay: Duration,
    /// The ut_metadata ID this peer listens on.
    pub metadata_id: u8,
}

impl Default for FakePeerOptions {
    fn default() -> Self {
        Self {
            served: Vec::new(),
            advertised_size: None,
            extension_bit: true,
            offer_metadata: true,
            reject_requests: false,
            serve_delay: Duration::ZERO,
            metadata_id: 7,
        }
    }
}

impl FakePeerOptions {
    pub fn serving(served: Vec<u8>) -> Self {
        Self {
            served,
            ..Self::default()
        }
    }
}

/// A fake peer accepting real TCP connections and speaking just enough of
/// the wire protocol to serve (or refuse) metadata.
pub struct FakePeer {
    pub addr: SocketAddr,
    /// Number of connections accepted.
    pub connections: Arc<AtomicUsize>,
    /// Set once any accepted connection ends (EOF, reset, or error).
    pub closed: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl FakePeer {
    pub async fn spawn(opts: FakePeerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicBool::new(false));

        let opts = Arc::new(opts);
        let accepted = connections.clone();
        let closed_flag = closed.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                accepted.fetch_add(1, Ordering::SeqCst);
                let opts = opts.clone();
                let closed = closed_flag.clone();
                tokio::spawn(async move {
                    let _ = serve_peer(stream, &opts).await;
                    closed.store(true, Ordering::SeqCst);
                });
            }
        });

        Self {
            addr,
            connections,
            closed,
            handle,
        }
    }
}

impl Drop for FakePeer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_peer(stream: TcpStream, opts: &Arc<FakePeerOptions>) -> std::io::Result<()> {
    let (mut reader, writer) = stream.into_split();
    // Delayed sends run in side tasks so the read loop keeps watching the
    // socket and notices the client hanging up right away.
    let writer = Arc::new(tokio::sync::Mutex::new(writer));

    let mut handshake = [0u8; 68];
    reader.read_exact(&mut handshake).await?;

    let mut reply = Vec::with_capacity(68);
    reply.push(19);
    reply.extend_from_slice(b"BitTorrent protocol");
    let mut reserved = [0u8; 8];
    if opts.extension_bit {
        reserved[5] |= 0x10;
    }
    reserved[7] |= 0x04;
    reply.extend_from_slice(&reserved);
    reply.extend_from_slice(&handshake[28..48]); // echo the info hash
    reply.extend_from_slice(b"-FK0001-fakefakefake");
    writer.lock().await.write_all(&reply).await?;

    let advertised = opts.advertised_size.unwrap_or(opts.served.len());
    // The ID the client told us to use for ut_metadata messages we send.
    let mut client_metadata_id: u8 = 1;

    loop {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len == 0 {
            continue;
        }
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        if body[0] != 20 {
            continue;
        }

        let ext_id = body[1];
        let payload = &body[2..];

        if ext_id == 0 {
            if let Ok(theirs) = ExtensionHandshake::decode(payload) {
                if let Some(id) = theirs.extension_id("ut_metadata") {
                    client_metadata_id = id;
                }
            }

            let mut m = BTreeMap::new();
            if opts.offer_metadata {
                m.insert(
                    Bytes::from_static(b"ut_metadata"),
                    Value::Integer(opts.metadata_id as i64),
                );
            }
            let mut dict = BTreeMap::new();
            dict.insert(Bytes::from_static(b"m"), Value::Dict(m));
            dict.insert(
                Bytes::from_static(b"metadata_size"),
                Value::Integer(advertised as i64),
            );
            let payload = encode(&Value::Dict(dict)).unwrap();
            write_extended(&writer, 0, payload).await?;
        } else if ext_id == opts.metadata_id {
            let Ok(Some(msg)) = MetadataMessage::decode(payload) else {
                continue;
            };
            if msg.msg_type != MetadataMessageType::Request {
                continue;
            }

            if opts.reject_requests {
                let reject = MetadataMessage::reject(msg.piece).encode().unwrap();
                write_extended(&writer, client_metadata_id, reject.to_vec()).await?;
                continue;
            }

            let start = (msg.piece as usize * METADATA_PIECE_SIZE).min(opts.served.len());
            let end = (start + METADATA_PIECE_SIZE).min(opts.served.len());
            let data = MetadataMessage::data(
                msg.piece,
                advertised as i64,
                Bytes::copy_from_slice(&opts.served[start..end]),
            )
            .encode()
            .unwrap();

            if opts.serve_delay.is_zero() {
                write_extended(&writer, client_metadata_id, data.to_vec()).await?;
            } else {
                let writer = writer.clone();
                let delay = opts.serve_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = write_extended(&writer, client_metadata_id, data.to_vec()).await;
                });
            }
        }
    }
}

async fn write_extended(
    writer: &tokio::sync::Mutex<tokio::net::tcp::OwnedWriteHalf>,
    ext_id: u8,
    payload: impl AsRef<[u8]>,
) -> std::io::Result<()> {
    let payload = payload.as_ref();
    let mut frame = Vec::with_capacity(6 + payload.len());
    frame.extend_from_slice(&((2 + payload.len()) as u32).to_be_bytes());
    frame.push(20);
    frame.push(ext_id);
    frame.extend_from_slice(payload);
    writer.lock().await.write_all(&frame).await
}

// ============================================================================
// Fake HTTP tracker
// ============================================================================

/// A minimal HTTP server answering every request with one canned body.
pub struct FakeHttpTracker {
    pub addr: SocketAddr,
    /// Request targets seen, in order.
    pub requests: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl FakeHttpTracker {
    pub async fn spawn(body: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let seen = requests.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let body = body.clone();
                let seen = seen.clone();
                tokio::spawn(async move {
                    let _ = serve_http(&mut stream, &body, &seen).await;
                });
            }
        });

        Self {
            addr,
            requests,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}/announce", self.addr)
    }
}

impl Drop for FakeHttpTracker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_http(
    stream: &mut TcpStream,
    body: &[u8],
    seen: &Mutex<Vec<String>>,
) -> std::io::Result<()> {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        request.extend_from_slice(&buf[..n]);
    }

    let head = String::from_utf8_lossy(&request);
    if let Some(line) = head.lines().next() {
        if let Some(target) = line.split_whitespace().nth(1) {
            seen.lock().push(target.to_string());
        }
    }

    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(header.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.shutdown().await
}

/// Builds a bencoded announce body with a compact IPv4 peer list.
pub fn announce_body(interval: i64, peers: &[SocketAddr]) -> Vec<u8> {
    let mut compact = Vec::new();
    for addr in peers {
        if let SocketAddr::V4(v4) = addr {
            compact.extend_from_slice(&v4.ip().octets());
            compact.extend_from_slice(&v4.port().to_be_bytes());
        }
    }
    let mut dict = BTreeMap::new();
    dict.insert(Bytes::from_static(b"interval"), Value::Integer(interval));
    dict.insert(Bytes::from_static(b"peers"), Value::Bytes(Bytes::from(compact)));
    encode(&Value::Dict(dict)).unwrap()
}

/// Builds a bencoded announce body carrying a `failure reason`.
pub fn failure_body(reason: &str) -> Vec<u8> {
    let mut dict = BTreeMap::new();
    dict.insert(Bytes::from_static(b"failure reason"), Value::string(reason));
    encode(&Value::Dict(dict)).unwrap()
}

// ============================================================================
// Fake UDP tracker
// ============================================================================

pub enum UdpBehavior {
    /// Connect then announce normally, returning these peers.
    Normal { peers: Vec<SocketAddr> },
    /// Like `Normal`, but the first announce reply carries a wrong
    /// transaction ID before the real reply follows.
    MismatchThenNormal { peers: Vec<SocketAddr> },
    /// Reply to announces with an error action carrying this message.
    Error(String),
    /// Never reply at all.
    Silent,
}

/// A fake BEP-15 tracker on a loopback UDP socket.
pub struct FakeUdpTracker {
    pub addr: SocketAddr,
    /// Reassembled BEP-41 URL-data from the last announce.
    pub urldata: Arc<Mutex<Option<Vec<u8>>>>,
    /// Instants at which datagrams arrived.
    pub received_at: Arc<Mutex<Vec<Instant>>>,
    handle: JoinHandle<()>,
}

impl FakeUdpTracker {
    pub async fn spawn(behavior: UdpBehavior) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let urldata = Arc::new(Mutex::new(None));
        let received_at = Arc::new(Mutex::new(Vec::new()));

        let urldata_out = urldata.clone();
        let received_out = received_at.clone();
        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let mut sent_mismatch = false;
            loop {
                let Ok((n, from)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                received_out.lock().push(Instant::now());
                let packet = &buf[..n];

                if matches!(behavior, UdpBehavior::Silent) {
                    continue;
                }

                if n == 16 && packet[..8] == 0x41727101980u64.to_be_bytes() {
                    // connect request
                    let mut reply = Vec::with_capacity(16);
                    reply.extend_from_slice(&0u32.to_be_bytes());
                    reply.extend_from_slice(&packet[12..16]); // echo transaction id
                    reply.extend_from_slice(&0x1122334455667788u64.to_be_bytes());
                    let _ = socket.send_to(&reply, from).await;
                    continue;
                }

                if n >= 98 && packet[8..12] == 1u32.to_be_bytes() {
                    // announce request
                    let txid = &packet[12..16];
                    *urldata_out.lock() = Some(parse_urldata(&packet[98..]));

                    match &behavior {
                        UdpBehavior::Error(message) => {
                            let mut reply = Vec::new();
                            reply.extend_from_slice(&3u32.to_be_bytes());
                            reply.extend_from_slice(txid);
                            reply.extend_from_slice(message.as_bytes());
                            let _ = socket.send_to(&reply, from).await;
                        }
                        UdpBehavior::Normal { peers }
                        | UdpBehavior::MismatchThenNormal { peers } => {
                            if matches!(behavior, UdpBehavior::MismatchThenNormal { .. })
                                && !sent_mismatch
                            {
                                sent_mismatch = true;
                                let mut bogus = announce_reply(txid, peers);
                                bogus[7] ^= 0xff; // corrupt the transaction id
                                let _ = socket.send_to(&bogus, from).await;
                            }
                            let reply = announce_reply(txid, peers);
                            let _ = socket.send_to(&reply, from).await;
                        }
                        UdpBehavior::Silent => unreachable!(),
                    }
                }
            }
        });

        Self {
            addr,
            urldata,
            received_at,
            handle,
        }
    }

    pub fn url(&self, path_qs: &str) -> String {
        format!("udp://{}{}", self.addr, path_qs)
    }
}

impl Drop for FakeUdpTracker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn announce_reply(txid: &[u8], peers: &[SocketAddr]) -> Vec<u8> {
    let mut reply = Vec::new();
    reply.extend_from_slice(&1u32.to_be_bytes());
    reply.extend_from_slice(txid);
    reply.extend_from_slice(&1800u32.to_be_bytes()); // interval
    reply.extend_from_slice(&0u32.to_be_bytes()); // leechers
    reply.extend_from_slice(&(peers.len() as u32).to_be_bytes()); // seeders
    for addr in peers {
        if let SocketAddr::V4(v4) = addr {
            reply.extend_from_slice(&v4.ip().octets());
            reply.extend_from_slice(&v4.port().to_be_bytes());
        }
    }
    reply
}

/// Concatenates BEP-41 URL-data option values in order.
fn parse_urldata(mut options: &[u8]) -> Vec<u8> {
    let mut urldata = Vec::new();
    while let Some((&kind, rest)) = options.split_first() {
        match kind {
            0 => break,      // end of options
            1 => options = rest, // NOP
            2 => {
                let Some((&len, rest)) = rest.split_first() else {
                    break;
                };
                let len = len as usize;
                if rest.len() < len {
                    break;
                }
                urldata.extend_from_slice(&rest[..len]);
                options = &rest[len..];
            }
            _ => break,
        }
    }
    urldata
}

/// RFC 4648 base32, no padding; used to exercise the alternate magnet
/// info-hash form.
pub fn base32_encode(bytes: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

    let mut out = String::new();
    let mut buffer: u64 = 0;
    let mut bits = 0;
    for &b in bytes {
        buffer = (buffer << 8) | b as u64;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[(buffer >> bits) as usize & 0x1f] as char);
        }
    }
    if bits > 0 {
        out.push(ALPHABET[(buffer << (5 - bits)) as usize & 0x1f] as char);
    }
    out
}

/// A bencoded info dictionary padded to roughly the requested size, with a
/// known name. Returns the canonical bytes.
pub fn sample_info(name: &str, target_len: usize) -> Vec<u8> {
    let overhead = 64;
    let padding = target_len.saturating_sub(name.len() + overhead);
    let mut dict = BTreeMap::new();
    dict.insert(Bytes::from_static(b"name"), Value::string(name));
    dict.insert(
        Bytes::from_static(b"piece length"),
        Value::Integer(16384),
    );
    dict.insert(
        Bytes::from_static(b"pieces"),
        Value::Bytes(Bytes::from(vec![0xabu8; padding])),
    );
    encode(&Value::Dict(dict)).unwrap()
}
