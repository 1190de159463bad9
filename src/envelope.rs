//! Response envelope decoding.
//!
//! Every Withings response, success or failure, has the shape
//!
//! ```text
//! {"status": 0, "body": {...}, "error": "..."}
//! ```
//!
//! where `status == 0` means success and `body` differs per call. List calls
//! embed a pagination cursor (`more`, `offset`) inside `body`.
//!
//! The raw bytes are parsed into a [`serde_json::Value`] once. Protocol
//! metadata and the caller's payload are then both deserialized from that
//! same value by field name, so a single decoder serves every endpoint.

use std::fmt;

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DecodeStage, Error, Result};

/// Envelope status code.
///
/// Independent from the HTTP status: a `200 OK` response can carry a
/// failing envelope status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiStatus(i64);

impl ApiStatus {
    pub const SUCCESS: ApiStatus = ApiStatus(0);

    pub const fn new(code: i64) -> Self {
        Self(code)
    }

    pub const fn code(self) -> i64 {
        self.0
    }

    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Authentication failed (invalid or expired token, bad signature).
    pub const fn is_auth_failure(self) -> bool {
        matches!(self.0, 100 | 101 | 102 | 200 | 401)
    }

    /// Too many requests.
    pub const fn is_rate_limited(self) -> bool {
        self.0 == 601
    }
}

impl fmt::Display for ApiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pagination cursor embedded in `body` on list calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct Pagination {
    /// More results are available past `offset`.
    #[serde(default, deserialize_with = "flexible_bool")]
    pub more: bool,
    /// Offset to send with the next request.
    #[serde(default)]
    pub offset: i64,
}

/// Protocol metadata extracted from an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvelopeMeta {
    pub status: ApiStatus,
    pub pagination: Pagination,
    /// Provider error description, present on failures.
    pub error: Option<String>,
}

#[derive(Deserialize)]
struct RawMeta {
    #[serde(default)]
    status: ApiStatus,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl RawMeta {
    fn into_meta(self) -> std::result::Result<EnvelopeMeta, serde_json::Error> {
        let pagination = match self.body {
            Some(body @ Value::Object(_)) => Pagination::deserialize(body)?,
            _ => Pagination::default(),
        };
        Ok(EnvelopeMeta {
            status: self.status,
            pagination,
            error: self.error,
        })
    }
}

/// Generic `{ "body": T }` wrapper used to pull a typed payload out of the
/// envelope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Enveloped<T> {
    #[serde(default)]
    pub body: T,
}

/// A parsed envelope whose payload has not been decoded yet.
#[derive(Debug, Clone)]
pub struct Envelope {
    document: Value,
    meta: EnvelopeMeta,
}

impl Envelope {
    /// Parse raw bytes and run the metadata pass.
    ///
    /// An empty or whitespace-only body is treated as `{}`.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let document = if raw.iter().all(u8::is_ascii_whitespace) {
            Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_slice(raw).map_err(|e| Error::decode(DecodeStage::Json, e))?
        };
        if !document.is_object() {
            let err: serde_json::Error =
                de::Error::invalid_type(unexpected(&document), &"an envelope object");
            return Err(Error::decode(DecodeStage::Envelope, err));
        }

        let meta = RawMeta::deserialize(&document)
            .and_then(RawMeta::into_meta)
            .map_err(|e| Error::decode(DecodeStage::Envelope, e))?;

        Ok(Self { document, meta })
    }

    pub fn meta(&self) -> &EnvelopeMeta {
        &self.meta
    }

    pub fn status(&self) -> ApiStatus {
        self.meta.status
    }

    /// The whole parsed document.
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Run the payload pass against the full document.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.document).map_err(|e| Error::decode(DecodeStage::Payload, e))
    }

    /// Fail with [`Error::Api`] when the status is non-zero.
    pub fn check_status(&self) -> Result<()> {
        if self.meta.status.is_success() {
            Ok(())
        } else {
            Err(Error::Api {
                status: self.meta.status,
                message: self.meta.error.clone(),
                meta: self.meta.clone(),
            })
        }
    }
}

/// Outcome of a full two-pass decode.
#[derive(Debug, Clone)]
pub struct Decoded<T> {
    pub meta: EnvelopeMeta,
    pub payload: T,
}

/// Decode `raw` into protocol metadata and a caller payload.
///
/// Both passes must succeed. A non-zero status is reported in
/// `meta.status` and is not an error here; callers treat it as one.
pub fn decode<T: DeserializeOwned>(raw: &[u8]) -> Result<Decoded<T>> {
    let envelope = Envelope::parse(raw)?;
    let payload = envelope.payload()?;
    Ok(Decoded {
        meta: envelope.meta,
        payload,
    })
}

fn unexpected(value: &Value) -> de::Unexpected<'_> {
    match value {
        Value::Null => de::Unexpected::Unit,
        Value::Bool(b) => de::Unexpected::Bool(*b),
        Value::Number(_) => de::Unexpected::Other("number"),
        Value::String(s) => de::Unexpected::Str(s),
        Value::Array(_) => de::Unexpected::Seq,
        Value::Object(_) => de::Unexpected::Map,
    }
}

/// Accepts `true`/`false`, integers (non-zero is true) and `null`.
fn flexible_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|v| v != 0.0)),
        Value::Null => Ok(false),
        other => Err(de::Error::invalid_type(
            de::Unexpected::Other(&other.to_string()),
            &"a boolean or an integer",
        )),
    }
}
