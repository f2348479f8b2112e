use crate::engine::reader::{read_exact_timeout, ReadError};
use crate::error::ProbeError;
use bytes::{Buf, BytesMut};
use std::time::Duration;
use tokio::io::AsyncRead;

const CONTENT_CHANGE_CIPHER_SPEC: u8 = 0x14;
const CONTENT_ALERT: u8 = 0x15;
const CONTENT_HANDSHAKE: u8 = 0x16;

const HANDSHAKE_SERVER_HELLO: u8 = 0x02;
const HANDSHAKE_CERTIFICATE: u8 = 0x0b;
const HANDSHAKE_SERVER_HELLO_DONE: u8 = 0x0e;

/// Ciphertext limit from RFC 5246; anything larger is not a TLS peer.
const MAX_RECORD_LEN: usize = 16384 + 2048;
const MAX_FLIGHT_LEN: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerHello {
    pub version: u16,
    pub cipher_suite: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerFlight {
    pub server_hello: Option<ServerHello>,
    pub certificates: Vec<Vec<u8>>,
}

/// Reads the server's first flight until its Certificate message and returns
/// the DER chain in the order the server sent it.
pub async fn read_server_flight<T: AsyncRead + Unpin>(
    stream: &mut T,
    read_timeout: Duration,
) -> Result<ServerFlight, ProbeError> {
    let mut handshake = BytesMut::new();
    let mut received = 0usize;
    let mut server_hello = None;

    loop {
        while let Some(message) = next_message(&mut handshake)? {
            match message.msg_type {
                HANDSHAKE_SERVER_HELLO => {
                    server_hello = Some(parse_server_hello(&message.body)?);
                }
                HANDSHAKE_CERTIFICATE => {
                    let certificates = parse_certificate_list(&message.body)?;
                    if certificates.is_empty() {
                        return Err(ProbeError::NoCertificates);
                    }
                    return Ok(ServerFlight {
                        server_hello,
                        certificates,
                    });
                }
                HANDSHAKE_SERVER_HELLO_DONE => return Err(ProbeError::NoCertificates),
                _ => {}
            }
        }

        let mut header = [0u8; 5];
        read_exact_timeout(stream, &mut header, read_timeout)
            .await
            .map_err(read_failure)?;
        let content_type = header[0];
        let length = u16::from_be_bytes([header[3], header[4]]) as usize;

        let known_type = matches!(
            content_type,
            CONTENT_ALERT | CONTENT_HANDSHAKE | CONTENT_CHANGE_CIPHER_SPEC
        );
        if header[1] != 0x03 || !known_type {
            return Err(ProbeError::Handshake(format!(
                "peer does not speak TLS (first bytes {:02x?})",
                &header[..3]
            )));
        }
        if length > MAX_RECORD_LEN {
            return Err(ProbeError::Handshake(format!(
                "record of {length} bytes exceeds limit"
            )));
        }
        received += length;
        if received > MAX_FLIGHT_LEN {
            return Err(ProbeError::Handshake(
                "server flight exceeds size limit".into(),
            ));
        }

        let mut payload = vec![0u8; length];
        read_exact_timeout(stream, &mut payload, read_timeout)
            .await
            .map_err(read_failure)?;

        match content_type {
            CONTENT_HANDSHAKE => handshake.extend_from_slice(&payload),
            CONTENT_ALERT => return Err(alert_error(&payload)),
            _ => {
                return Err(ProbeError::Handshake(
                    "change_cipher_spec before certificate".into(),
                ))
            }
        }
    }
}

struct HandshakeMessage {
    msg_type: u8,
    body: BytesMut,
}

fn next_message(buf: &mut BytesMut) -> Result<Option<HandshakeMessage>, ProbeError> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let len = u32::from_be_bytes([0, buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FLIGHT_LEN {
        return Err(ProbeError::Handshake(format!(
            "handshake message of {len} bytes exceeds limit"
        )));
    }
    if buf.len() < 4 + len {
        return Ok(None);
    }
    let mut message = buf.split_to(4 + len);
    let msg_type = message.get_u8();
    message.advance(3);
    Ok(Some(HandshakeMessage {
        msg_type,
        body: message,
    }))
}

fn parse_server_hello(body: &[u8]) -> Result<ServerHello, ProbeError> {
    let malformed = || ProbeError::Handshake("malformed ServerHello".into());
    let mut buf = body;
    if buf.remaining() < 2 + 32 + 1 {
        return Err(malformed());
    }
    let version = buf.get_u16();
    buf.advance(32);
    let session_id_len = buf.get_u8() as usize;
    if buf.remaining() < session_id_len + 2 {
        return Err(malformed());
    }
    buf.advance(session_id_len);
    let cipher_suite = buf.get_u16();
    Ok(ServerHello {
        version,
        cipher_suite,
    })
}

fn parse_certificate_list(body: &[u8]) -> Result<Vec<Vec<u8>>, ProbeError> {
    let malformed = || ProbeError::Handshake("malformed Certificate message".into());
    let mut buf = body;
    if buf.remaining() < 3 {
        return Err(malformed());
    }
    let list_len = buf.get_uint(3) as usize;
    if list_len != buf.remaining() {
        return Err(malformed());
    }

    let mut certificates = Vec::new();
    while buf.has_remaining() {
        if buf.remaining() < 3 {
            return Err(malformed());
        }
        let cert_len = buf.get_uint(3) as usize;
        if cert_len == 0 || cert_len > buf.remaining() {
            return Err(malformed());
        }
        certificates.push(buf[..cert_len].to_vec());
        buf.advance(cert_len);
    }
    Ok(certificates)
}

fn read_failure(err: ReadError) -> ProbeError {
    match err {
        ReadError::Closed => ProbeError::Handshake("connection closed during handshake".into()),
        other => ProbeError::Handshake(other.to_string()),
    }
}

fn alert_error(payload: &[u8]) -> ProbeError {
    let description = payload.get(1).copied().unwrap_or(0);
    ProbeError::Handshake(format!(
        "server sent alert {} ({description})",
        alert_name(description)
    ))
}

fn alert_name(description: u8) -> &'static str {
    match description {
        0 => "close_notify",
        10 => "unexpected_message",
        40 => "handshake_failure",
        47 => "illegal_parameter",
        50 => "decode_error",
        70 => "protocol_version",
        71 => "insufficient_security",
        80 => "internal_error",
        86 => "inappropriate_fallback",
        112 => "unrecognized_name",
        120 => "no_application_protocol",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(content_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![content_type, 0x03, 0x03];
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn handshake(msg_type: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![msg_type];
        out.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
        out.extend_from_slice(body);
        out
    }

    fn server_hello(suite: u16) -> Vec<u8> {
        let mut body = vec![0x03, 0x03];
        body.extend_from_slice(&[0u8; 32]);
        body.push(0);
        body.extend_from_slice(&suite.to_be_bytes());
        body.push(0);
        handshake(HANDSHAKE_SERVER_HELLO, &body)
    }

    fn certificate(chain: &[&[u8]]) -> Vec<u8> {
        let mut list = Vec::new();
        for der in chain {
            list.extend_from_slice(&(der.len() as u32).to_be_bytes()[1..]);
            list.extend_from_slice(der);
        }
        let mut body = (list.len() as u32).to_be_bytes()[1..].to_vec();
        body.extend_from_slice(&list);
        handshake(HANDSHAKE_CERTIFICATE, &body)
    }

    async fn run(bytes: Vec<u8>) -> Result<ServerFlight, ProbeError> {
        let mut data: &[u8] = &bytes;
        read_server_flight(&mut data, Duration::from_secs(1)).await
    }

    #[tokio::test]
    async fn reads_chain_from_single_record() {
        let mut payload = server_hello(0xc02f);
        payload.extend(certificate(&[b"leaf", b"intermediate"]));
        let flight = run(record(CONTENT_HANDSHAKE, &payload)).await.unwrap();
        assert_eq!(flight.server_hello.unwrap().cipher_suite, 0xc02f);
        assert_eq!(flight.certificates, vec![b"leaf".to_vec(), b"intermediate".to_vec()]);
    }

    #[tokio::test]
    async fn reassembles_message_split_across_records() {
        let mut payload = server_hello(0xc02b);
        payload.extend(certificate(&[&[0x30; 300]]));
        let (first, second) = payload.split_at(50);
        let mut bytes = record(CONTENT_HANDSHAKE, first);
        bytes.extend(record(CONTENT_HANDSHAKE, second));
        let flight = run(bytes).await.unwrap();
        assert_eq!(flight.certificates, vec![vec![0x30; 300]]);
    }

    #[tokio::test]
    async fn alert_is_handshake_failure() {
        let err = run(record(CONTENT_ALERT, &[2, 40])).await.unwrap_err();
        match err {
            ProbeError::Handshake(msg) => assert!(msg.contains("handshake_failure")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn hello_done_without_certificate_is_empty() {
        let mut payload = server_hello(0xc02f);
        payload.extend(handshake(HANDSHAKE_SERVER_HELLO_DONE, &[]));
        let err = run(record(CONTENT_HANDSHAKE, &payload)).await.unwrap_err();
        assert!(matches!(err, ProbeError::NoCertificates));
    }

    #[tokio::test]
    async fn empty_certificate_list_is_empty() {
        let mut payload = server_hello(0xc02f);
        payload.extend(certificate(&[]));
        let err = run(record(CONTENT_HANDSHAKE, &payload)).await.unwrap_err();
        assert!(matches!(err, ProbeError::NoCertificates));
    }

    #[tokio::test]
    async fn rejects_plaintext_peer() {
        let err = run(b"HTTP/1.1 400 Bad Request\r\n\r\n".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Handshake(_)));
    }

    #[tokio::test]
    async fn eof_mid_flight_is_handshake_error() {
        let payload = server_hello(0xc02f);
        let err = run(record(CONTENT_HANDSHAKE, &payload)).await.unwrap_err();
        match err {
            ProbeError::Handshake(msg) => assert!(msg.contains("closed")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rejects_truncated_certificate_entry() {
        let body = [0, 0, 5, 0, 0, 9, 1, 2];
        assert!(parse_certificate_list(&body).is_err());
    }
}
