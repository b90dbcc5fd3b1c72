use std::time::Duration;

use bytes::Bytes;

use super::*;
use crate::constants::{METADATA_PIECE_SIZE, UT_METADATA_ID};
use crate::metainfo::InfoHash;
use crate::testutil::{sample_info, FakePeer, FakePeerOptions};

#[test]
fn test_peer_id_generate() {
    let id1 = PeerId::generate();
    let id2 = PeerId::generate();
    assert_ne!(id1.0, id2.0);
    assert_eq!(id1.client_id(), Some("TF0001"));
}

#[test]
fn test_peer_id_deterministic_with_rng() {
    use rand::SeedableRng;
    let mut a = rand::rngs::StdRng::seed_from_u64(7);
    let mut b = rand::rngs::StdRng::seed_from_u64(7);
    assert_eq!(
        PeerId::generate_with(&mut a).0,
        PeerId::generate_with(&mut b).0
    );
}

#[test]
fn test_handshake_reserved_bits() {
    let handshake = Handshake::new([1u8; 20], [2u8; 20]);
    let encoded = handshake.encode();

    assert_eq!(encoded.len(), 68);
    assert_eq!(encoded[0], 19);
    assert_eq!(&encoded[1..20], b"BitTorrent protocol");
    // Extension protocol bit (reserved byte 5) and fast bit (byte 7)
    assert_eq!(encoded[20 + 5] & 0x10, 0x10);
    assert_eq!(encoded[20 + 7] & 0x04, 0x04);

    let decoded = Handshake::decode(&encoded).unwrap();
    assert_eq!(decoded.info_hash, [1u8; 20]);
    assert_eq!(decoded.peer_id, [2u8; 20]);
    assert!(decoded.supports_extension_protocol());
    assert!(decoded.supports_fast_extension());
}

#[test]
fn test_handshake_decode_errors() {
    assert!(Handshake::decode(&[0u8; 10]).is_err());

    let mut bad = Handshake::new([1u8; 20], [2u8; 20]).encode().to_vec();
    bad[3] = b'X';
    assert!(Handshake::decode(&bad).is_err());
}

fn roundtrip(msg: Message) -> Message {
    let frame = msg.encode();
    let length = u32::from_be_bytes(frame[..4].try_into().unwrap()) as usize;
    assert_eq!(frame.len(), 4 + length);
    Message::decode(frame.slice(4..)).unwrap()
}

#[test]
fn test_message_roundtrip() {
    assert!(matches!(roundtrip(Message::KeepAlive), Message::KeepAlive));
    assert!(matches!(roundtrip(Message::Choke), Message::Choke));
    assert!(matches!(roundtrip(Message::Unchoke), Message::Unchoke));
    assert!(matches!(roundtrip(Message::HaveAll), Message::HaveAll));
    assert!(matches!(roundtrip(Message::HaveNone), Message::HaveNone));
    assert!(matches!(
        roundtrip(Message::Have { piece: 42 }),
        Message::Have { piece: 42 }
    ));
    assert!(matches!(
        roundtrip(Message::Port(6881)),
        Message::Port(6881)
    ));
    assert!(matches!(
        roundtrip(Message::Request {
            index: 1,
            begin: 2,
            length: 3
        }),
        Message::Request {
            index: 1,
            begin: 2,
            length: 3
        }
    ));
    assert!(matches!(
        roundtrip(Message::Reject {
            index: 4,
            begin: 5,
            length: 6
        }),
        Message::Reject {
            index: 4,
            begin: 5,
            length: 6
        }
    ));
    assert!(matches!(
        roundtrip(Message::AllowedFast { piece: 9 }),
        Message::AllowedFast { piece: 9 }
    ));
}

#[test]
fn test_piece_and_bitfield_payloads() {
    let data = Bytes::from_static(b"hello world");
    match roundtrip(Message::Piece {
        index: 3,
        begin: 16384,
        data: data.clone(),
    }) {
        Message::Piece {
            index,
            begin,
            data: decoded,
        } => {
            assert_eq!((index, begin), (3, 16384));
            assert_eq!(decoded, data);
        }
        other => panic!("unexpected message: {other:?}"),
    }

    let bits = Bytes::from_static(&[0xf0, 0x01]);
    match roundtrip(Message::Bitfield(bits.clone())) {
        Message::Bitfield(decoded) => assert_eq!(decoded, bits),
        other => panic!("unexpected message: {other:?}"),
    }
}

#[test]
fn test_small_extended_frames_accepted() {
    // Payloads of 1-7 bytes are legitimate (a tiny bencoded dict); the
    // codec must not impose a minimum.
    for payload in [&b"d"[..], b"de", b"d1:ai0ee"] {
        let body = {
            let mut v = vec![20u8, 3u8];
            v.extend_from_slice(payload);
            Bytes::from(v)
        };
        match Message::decode(body).unwrap() {
            Message::Extended { id, payload: p } => {
                assert_eq!(id, 3);
                assert_eq!(p.as_ref(), payload);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

#[test]
fn test_message_decode_errors() {
    assert!(Message::decode(Bytes::from_static(&[99])).is_err());
    assert!(Message::decode(Bytes::from_static(&[4, 0, 0])).is_err()); // have, short
    assert!(Message::decode(Bytes::from_static(&[20])).is_err()); // extended, no id
}

#[test]
fn test_extension_handshake_roundtrip() {
    let hs = ExtensionHandshake::with_extensions(&[("ut_metadata", 3)], "test/0.1");
    let encoded = hs.encode().unwrap();
    let decoded = ExtensionHandshake::decode(&encoded).unwrap();

    assert_eq!(decoded.extension_id("ut_metadata"), Some(3));
    assert_eq!(decoded.client.as_deref(), Some("test/0.1"));
    assert_eq!(decoded.metadata_size, None);
}

#[test]
fn test_extension_handshake_metadata_size() {
    let mut hs = ExtensionHandshake::with_extensions(&[("ut_metadata", 42)], "x");
    hs.metadata_size = Some(31235);
    let decoded = ExtensionHandshake::decode(&hs.encode().unwrap()).unwrap();
    assert_eq!(decoded.metadata_size, Some(31235));
}

#[test]
fn test_extension_handshake_ignores_disabled() {
    // id 0 disables an extension
    let decoded = ExtensionHandshake::decode(b"d1:md11:ut_metadatai0eee").unwrap();
    assert_eq!(decoded.extension_id("ut_metadata"), None);
}

#[test]
fn test_metadata_message_roundtrip() {
    let request = MetadataMessage::request(5);
    let decoded = MetadataMessage::decode(&request.encode().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(decoded.msg_type, MetadataMessageType::Request);
    assert_eq!(decoded.piece, 5);
    assert!(decoded.data.is_none());

    let payload = Bytes::from_static(b"chunk bytes");
    let data = MetadataMessage::data(2, 1000, payload.clone());
    let decoded = MetadataMessage::decode(&data.encode().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(decoded.msg_type, MetadataMessageType::Data);
    assert_eq!(decoded.piece, 2);
    assert_eq!(decoded.total_size, Some(1000));
    assert_eq!(decoded.data, Some(payload));

    let reject = MetadataMessage::reject(10);
    let decoded = MetadataMessage::decode(&reject.encode().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(decoded.msg_type, MetadataMessageType::Reject);
    assert_eq!(decoded.piece, 10);
}

#[test]
fn test_metadata_message_unknown_type_ignored() {
    assert!(MetadataMessage::decode(b"d8:msg_typei9e5:piecei0ee")
        .unwrap()
        .is_none());
}

#[test]
fn test_metadata_buffer_piece_sizes() {
    let buffer = MetadataBuffer::new(40000);
    assert_eq!(buffer.num_pieces(), 3);
    assert_eq!(buffer.piece_len(0), METADATA_PIECE_SIZE);
    assert_eq!(buffer.piece_len(1), METADATA_PIECE_SIZE);
    assert_eq!(buffer.piece_len(2), 40000 - 2 * METADATA_PIECE_SIZE);
    assert_eq!(buffer.piece_len(3), 0);

    let exact = MetadataBuffer::new(METADATA_PIECE_SIZE);
    assert_eq!(exact.num_pieces(), 1);
    assert_eq!(exact.piece_len(0), METADATA_PIECE_SIZE);
}

#[test]
fn test_metadata_buffer_rejects_bad_pieces() {
    let mut buffer = MetadataBuffer::new(20000);
    assert!(buffer
        .insert(0, Bytes::from(vec![0u8; 100]))
        .is_err()); // wrong size
    assert!(buffer
        .insert(5, Bytes::from(vec![0u8; METADATA_PIECE_SIZE]))
        .is_err()); // out of range
}

#[test]
fn test_metadata_buffer_assemble_validates_hash() {
    let info = sample_info("assemble-test", 20000);
    let hash = InfoHash::from_info_bytes(&info);

    let mut buffer = MetadataBuffer::new(info.len());
    // Insert out of order; assembly is by piece index.
    buffer
        .insert(1, Bytes::copy_from_slice(&info[METADATA_PIECE_SIZE..]))
        .unwrap();
    assert!(!buffer.is_complete());
    buffer
        .insert(0, Bytes::copy_from_slice(&info[..METADATA_PIECE_SIZE]))
        .unwrap();
    assert!(buffer.is_complete());

    let blob = buffer.assemble(&hash).unwrap();
    assert_eq!(blob.as_ref(), &info[..]);
}

#[test]
fn test_metadata_buffer_assemble_detects_mismatch() {
    let info = sample_info("mismatch-test", 1000);
    let wrong_hash = InfoHash::from_bytes([0xee; 20]);

    let mut buffer = MetadataBuffer::new(info.len());
    buffer.insert(0, Bytes::from(info)).unwrap();
    assert!(matches!(
        buffer.assemble(&wrong_hash),
        Err(PeerError::HashMismatch)
    ));
}

// ============================================================================
// Session tests against a fake peer
// ============================================================================

fn test_session_config() -> SessionConfig {
    SessionConfig {
        deadline: Duration::from_secs(5),
        read_timeout: Duration::from_secs(2),
        ..SessionConfig::default()
    }
}

#[tokio::test]
async fn test_session_fetches_metadata() {
    let info = sample_info("session-test", 40000);
    let hash = InfoHash::from_info_bytes(&info);
    let peer = FakePeer::spawn(FakePeerOptions::serving(info.clone())).await;

    let session =
        PeerSession::with_config(peer.addr, hash, PeerId::generate(), test_session_config());
    let blob = session.run().await.unwrap();
    assert_eq!(blob.as_ref(), &info[..]);
}

#[tokio::test]
async fn test_session_single_piece_metadata() {
    let info = sample_info("small", 1000);
    let hash = InfoHash::from_info_bytes(&info);
    let peer = FakePeer::spawn(FakePeerOptions::serving(info.clone())).await;

    let session =
        PeerSession::with_config(peer.addr, hash, PeerId::generate(), test_session_config());
    assert_eq!(session.run().await.unwrap().as_ref(), &info[..]);
}

#[tokio::test]
async fn test_session_requires_extension_bit() {
    let info = sample_info("no-ext", 1000);
    let hash = InfoHash::from_info_bytes(&info);
    let peer = FakePeer::spawn(FakePeerOptions {
        extension_bit: false,
        ..FakePeerOptions::serving(info)
    })
    .await;

    let session =
        PeerSession::with_config(peer.addr, hash, PeerId::generate(), test_session_config());
    assert!(matches!(
        session.run().await,
        Err(PeerError::Handshake(_))
    ));
}

#[tokio::test]
async fn test_session_requires_ut_metadata() {
    let info = sample_info("no-meta", 1000);
    let hash = InfoHash::from_info_bytes(&info);
    let peer = FakePeer::spawn(FakePeerOptions {
        offer_metadata: false,
        ..FakePeerOptions::serving(info)
    })
    .await;

    let session =
        PeerSession::with_config(peer.addr, hash, PeerId::generate(), test_session_config());
    assert!(matches!(
        session.run().await,
        Err(PeerError::Extension(_))
    ));
}

#[tokio::test]
async fn test_session_fails_after_repeated_reject() {
    let info = sample_info("rejecting", 1000);
    let hash = InfoHash::from_info_bytes(&info);
    let peer = FakePeer::spawn(FakePeerOptions {
        reject_requests: true,
        ..FakePeerOptions::serving(info)
    })
    .await;

    let session =
        PeerSession::with_config(peer.addr, hash, PeerId::generate(), test_session_config());
    assert!(matches!(
        session.run().await,
        Err(PeerError::MetadataReject { piece: 0 })
    ));
}

#[tokio::test]
async fn test_session_detects_lying_peer() {
    let info = sample_info("honest", 20000);
    let hash = InfoHash::from_info_bytes(&info);

    // Peer serves different bytes of the same length.
    let mut lie = info.clone();
    lie[100] ^= 0xff;
    let peer = FakePeer::spawn(FakePeerOptions::serving(lie)).await;

    let session =
        PeerSession::with_config(peer.addr, hash, PeerId::generate(), test_session_config());
    assert!(matches!(session.run().await, Err(PeerError::HashMismatch)));
}

#[tokio::test]
async fn test_session_times_out_on_stalled_peer() {
    let info = sample_info("stalled", 1000);
    let hash = InfoHash::from_info_bytes(&info);
    let peer = FakePeer::spawn(FakePeerOptions {
        serve_delay: Duration::from_secs(30),
        ..FakePeerOptions::serving(info)
    })
    .await;

    let config = SessionConfig {
        deadline: Duration::from_millis(500),
        read_timeout: Duration::from_millis(200),
        ..SessionConfig::default()
    };
    let session = PeerSession::with_config(peer.addr, hash, PeerId::generate(), config);
    assert!(matches!(session.run().await, Err(PeerError::Timeout)));
}

#[tokio::test]
async fn test_session_connect_refused() {
    // Nothing is listening on this freshly-bound-then-dropped port.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let session = PeerSession::with_config(
        addr,
        InfoHash::from_bytes([1; 20]),
        PeerId::generate(),
        test_session_config(),
    );
    assert!(matches!(session.run().await, Err(PeerError::Connect(_))));
}

#[test]
fn test_ut_metadata_id_constant() {
    // The ID we advertise must be non-zero (zero is the handshake itself).
    assert_ne!(UT_METADATA_ID, 0);
}
