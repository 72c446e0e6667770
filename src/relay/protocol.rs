use serde::{Deserialize, Serialize};

/// Content type stamped on every `POST /server/response` body. The
/// relay's own wire format is the cloudrobotics http_relay protobuf message;
/// no `.proto` schema for it ships in this workspace, so the body itself is
/// JSON carrying the same field set — see DESIGN.md.
pub const RESPONSE_CONTENT_TYPE: &str =
    "application/vnd.google.protobuf;proto=cloudrobotics.http_relay.v1alpha1.HttpResponse";

/// A request pulled from the relay, destined for replay against the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayedRequest {
    pub id: String,
    pub method: String,
    /// The originating URL. Its host part is a placeholder — only the path
    /// and query are meaningful.
    pub url: String,
    #[serde(default)]
    pub host: Option<String>,
    /// Multi-valued headers, ordering within a name preserved.
    #[serde(default)]
    pub headers: Vec<HeaderPair>,
    #[serde(with = "base64_bytes", default)]
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeaderPair {
    pub name: String,
    pub value: String,
}

impl HeaderPair {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One serialized chunk of a backend response, posted to the relay.
///
/// `status_code` is set only on the first chunk emitted for a request;
/// `backend_duration_ms` only on the terminal (`eof=true`) chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseChunk {
    pub id: String,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub headers: Vec<HeaderPair>,
    #[serde(default)]
    pub trailers: Vec<HeaderPair>,
    #[serde(with = "base64_bytes", default)]
    pub body: Vec<u8>,
    #[serde(default)]
    pub eof: bool,
    #[serde(default)]
    pub backend_duration_ms: Option<u64>,
}

impl ResponseChunk {
    /// A pending chunk inheriting only `id`, as produced after each emission
    /// by the collator.
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status_code: None,
            headers: Vec::new(),
            trailers: Vec::new(),
            body: Vec::new(),
            eof: false,
            backend_duration_ms: None,
        }
    }

    pub fn synthesized_error(id: impl Into<String>, status_code: u16, message: &str) -> Self {
        Self {
            id: id.into(),
            status_code: Some(status_code),
            headers: vec![HeaderPair::new("Content-Type", "text/plain")],
            trailers: Vec::new(),
            body: message.as_bytes().to_vec(),
            eof: true,
            backend_duration_ms: None,
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
