use crate::model::CipherFamily;
use bytes::{BufMut, BytesMut};
use rand::RngCore;

pub const CONTENT_HANDSHAKE: u8 = 0x16;
pub const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;

const RECORD_VERSION: u16 = 0x0301;
const CLIENT_VERSION: u16 = 0x0303;

const EXT_SERVER_NAME: u16 = 0x0000;
const EXT_SUPPORTED_GROUPS: u16 = 0x000a;
const EXT_EC_POINT_FORMATS: u16 = 0x000b;
const EXT_SIGNATURE_ALGORITHMS: u16 = 0x000d;
const EXT_ALPN: u16 = 0x0010;

/// x25519, secp256r1, secp384r1
pub const SUPPORTED_GROUPS: &[u16] = &[0x001d, 0x0017, 0x0018];

pub const ALPN_PROTOCOLS: &[&str] = &["h2", "http/1.1", "http/1.0", "h3", "spdy/3.1", "acme-tls/1"];

/// Serialises a TLS 1.2 ClientHello record with exactly the suites and
/// extensions added to it. Nothing is implied: no supported_versions, no
/// session ticket, no renegotiation info.
pub struct ClientHelloBuilder {
    cipher_suites: Vec<u16>,
    extensions: Vec<(u16, Vec<u8>)>,
    random: [u8; 32],
}

impl Default for ClientHelloBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientHelloBuilder {
    pub fn new() -> Self {
        let mut random = [0u8; 32];
        let now = crate::util::now_unix() as u32;
        random[..4].copy_from_slice(&now.to_be_bytes());
        rand::thread_rng().fill_bytes(&mut random[4..]);

        Self {
            cipher_suites: Vec::new(),
            extensions: Vec::new(),
            random,
        }
    }

    /// The hello offered when probing one cipher family.
    pub fn for_family(family: CipherFamily, server_name: Option<&str>) -> Self {
        let mut builder = Self::new();
        builder.add_ciphers(family.cipher_suites());
        if let Some(name) = server_name {
            builder.add_sni(name);
        }
        builder
            .add_supported_groups(SUPPORTED_GROUPS)
            .add_ec_point_formats()
            .add_signature_algorithms(family.signature_schemes())
            .add_alpn(ALPN_PROTOCOLS);
        builder
    }

    pub fn add_ciphers(&mut self, suites: &[u16]) -> &mut Self {
        self.cipher_suites.extend_from_slice(suites);
        self
    }

    pub fn add_sni(&mut self, hostname: &str) -> &mut Self {
        let mut data = BytesMut::new();
        data.put_u16((3 + hostname.len()) as u16);
        // host_name
        data.put_u8(0);
        data.put_u16(hostname.len() as u16);
        data.put_slice(hostname.as_bytes());
        self.extensions.push((EXT_SERVER_NAME, data.to_vec()));
        self
    }

    pub fn add_supported_groups(&mut self, groups: &[u16]) -> &mut Self {
        let mut data = BytesMut::new();
        data.put_u16((groups.len() * 2) as u16);
        for group in groups {
            data.put_u16(*group);
        }
        self.extensions.push((EXT_SUPPORTED_GROUPS, data.to_vec()));
        self
    }

    /// Uncompressed points only.
    pub fn add_ec_point_formats(&mut self) -> &mut Self {
        self.extensions.push((EXT_EC_POINT_FORMATS, vec![1, 0]));
        self
    }

    pub fn add_signature_algorithms(&mut self, schemes: &[u16]) -> &mut Self {
        let mut data = BytesMut::new();
        data.put_u16((schemes.len() * 2) as u16);
        for scheme in schemes {
            data.put_u16(*scheme);
        }
        self.extensions.push((EXT_SIGNATURE_ALGORITHMS, data.to_vec()));
        self
    }

    pub fn add_alpn(&mut self, protocols: &[&str]) -> &mut Self {
        let mut data = BytesMut::new();
        let list_len: usize = protocols.iter().map(|p| 1 + p.len()).sum();
        data.put_u16(list_len as u16);
        for protocol in protocols {
            data.put_u8(protocol.len() as u8);
            data.put_slice(protocol.as_bytes());
        }
        self.extensions.push((EXT_ALPN, data.to_vec()));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut body = BytesMut::new();
        body.put_u16(CLIENT_VERSION);
        body.put_slice(&self.random);
        // empty session id
        body.put_u8(0);
        body.put_u16((self.cipher_suites.len() * 2) as u16);
        for suite in &self.cipher_suites {
            body.put_u16(*suite);
        }
        // null compression only
        body.put_u8(1);
        body.put_u8(0);

        let ext_len: usize = self.extensions.iter().map(|(_, data)| 4 + data.len()).sum();
        body.put_u16(ext_len as u16);
        for (ext_type, data) in &self.extensions {
            body.put_u16(*ext_type);
            body.put_u16(data.len() as u16);
            body.put_slice(data);
        }

        let mut record = BytesMut::with_capacity(9 + body.len());
        record.put_u8(CONTENT_HANDSHAKE);
        record.put_u16(RECORD_VERSION);
        record.put_u16((4 + body.len()) as u16);
        record.put_u8(HANDSHAKE_CLIENT_HELLO);
        record.put_uint(body.len() as u64, 3);
        record.put_slice(&body);
        record.to_vec()
    }
}
