//! HTTP tunnel models: a whole HTTP exchange carried as one chunked call.
//!
//! Frame layout (both directions):
//!
//! ```text
//! [u32 BE header length][JSON header][raw body bytes]
//! ```
//!
//! The body is kept out of the JSON header so it is never re-encoded;
//! the chunk layer already hex-encodes whatever it carries.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Method name the tunnel server is registered under.
pub const TUNNEL_METHOD: &str = "HttpTunnel";

/// Content type of a tunnel frame.
pub const TUNNEL_CONTENT_TYPE: &str = "application/x-tether-http";

/// Lowercased header name → values, in order received.
pub type HeaderMap = BTreeMap<String, Vec<String>>;

/// An HTTP request to be executed on the far side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpTunnelRequest {
    pub request_id: String,
    pub method: String,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub request_headers: HeaderMap,
    #[serde(default)]
    pub content_headers: HeaderMap,
    #[serde(skip)]
    pub body: Bytes,
}

/// Result of a tunneled HTTP request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpTunnelResponse {
    pub request_id: String,
    pub status: u16,
    #[serde(default)]
    pub headers: HeaderMap,
    #[serde(skip)]
    pub body: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("invalid frame header: {0}")]
    Header(#[from] serde_json::Error),
}

impl HttpTunnelRequest {
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        encode_frame(self, &self.body)
    }

    pub fn decode(frame: Bytes) -> Result<Self, FrameError> {
        let (mut req, body): (Self, Bytes) = decode_frame(frame)?;
        req.body = body;
        Ok(req)
    }

    /// All headers, request and content, merged for forwarding.
    pub fn all_headers(&self) -> impl Iterator<Item = (&String, &String)> {
        self.request_headers
            .iter()
            .chain(self.content_headers.iter())
            .flat_map(|(name, values)| values.iter().map(move |v| (name, v)))
    }
}

impl HttpTunnelResponse {
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        encode_frame(self, &self.body)
    }

    pub fn decode(frame: Bytes) -> Result<Self, FrameError> {
        let (mut resp, body): (Self, Bytes) = decode_frame(frame)?;
        resp.body = body;
        Ok(resp)
    }

    /// First value of a header, by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|v| v.first())
            .map(String::as_str)
    }
}

/// Split headers into request headers and `content-*` headers.
pub fn split_headers<'a, I>(headers: I) -> (HeaderMap, HeaderMap)
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut request = HeaderMap::new();
    let mut content = HeaderMap::new();
    for (name, value) in headers {
        let name = name.to_ascii_lowercase();
        let target = if name.starts_with("content-") {
            &mut content
        } else {
            &mut request
        };
        target.entry(name).or_default().push(value.to_string());
    }
    (request, content)
}

fn encode_frame<T: Serialize>(header: &T, body: &Bytes) -> Result<Bytes, FrameError> {
    let json = serde_json::to_vec(header)?;
    let mut buf = BytesMut::with_capacity(4 + json.len() + body.len());
    buf.put_u32(json.len() as u32);
    buf.put_slice(&json);
    buf.put_slice(body);
    Ok(buf.freeze())
}

fn decode_frame<T: for<'de> Deserialize<'de>>(mut frame: Bytes) -> Result<(T, Bytes), FrameError> {
    if frame.len() < 4 {
        return Err(FrameError::Truncated {
            need: 4,
            have: frame.len(),
        });
    }
    let header_len = frame.get_u32() as usize;
    if frame.len() < header_len {
        return Err(FrameError::Truncated {
            need: header_len,
            have: frame.len(),
        });
    }
    let header = frame.split_to(header_len);
    let value = serde_json::from_slice(&header)?;
    Ok((value, frame))
}
