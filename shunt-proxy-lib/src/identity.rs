//! Request parameters and the identity key derived from them.
//!
//! Clients spell their user id in several ways. The identity key is the
//! concatenation of every alias in [`IDENTITY_ALIASES`] order, so `userid=1`
//! plus `OpenID=23` and `userid=12` plus `OpenID=3` share the key `"123"`.
//! That collision is accepted: the key only groups requests for counting.

use std::convert::Infallible;

use bytes::Bytes;
use futures_util::stream;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, Method};
use tracing::debug;
use url::form_urlencoded;

/// Parameter names that carry a user id, in concatenation order
pub const IDENTITY_ALIASES: [&str; 7] =
    ["userid", "UserID", "phthon", "OpenID", "WeChatID", "wechatid", "user_id"];

pub const APPID_PARAM: &str = "appid";
pub const COMMAND_PARAM: &str = "cmd";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const MULTIPART_CONTENT_TYPE: &str = "multipart/form-data";

/// Form and query parameters of one request
///
/// Lookups return the first value. Url-encoded body values come before
/// query values; multipart text fields come after them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParams {
    pairs: Vec<(String, String)>,
}

#[derive(Debug, PartialEq, Eq)]
enum BodyKind {
    Form,
    Multipart { boundary: String },
    Other,
}

impl RequestParams {
    /// Collect parameters from a buffered request.
    ///
    /// The body is only read for `POST` with a url-encoded or multipart form
    /// content type. Nothing here fails: undecodable input is decoded lossily
    /// or skipped, and a broken multipart body keeps the fields read so far.
    pub async fn parse(
        method: &Method,
        headers: &HeaderMap,
        body: &Bytes,
        query: Option<&str>,
    ) -> Self {
        let kind = if method == Method::POST { body_kind(headers) } else { BodyKind::Other };

        let mut pairs = Vec::new();
        if kind == BodyKind::Form {
            pairs.extend(form_urlencoded::parse(body).into_owned());
        }
        if let Some(query) = query {
            pairs.extend(form_urlencoded::parse(query.as_bytes()).into_owned());
        }
        if let BodyKind::Multipart { boundary } = kind {
            pairs.extend(multipart_fields(body.clone(), boundary).await);
        }
        Self { pairs }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn appid(&self) -> &str {
        self.get(APPID_PARAM).unwrap_or_default()
    }

    pub fn command(&self) -> &str {
        self.get(COMMAND_PARAM).unwrap_or_default()
    }

    /// Identity key; empty if no alias is present.
    pub fn identity(&self) -> String {
        IDENTITY_ALIASES
            .iter()
            .filter_map(|alias| self.get(alias))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

fn body_kind(headers: &HeaderMap) -> BodyKind {
    let Some(content_type) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return BodyKind::Other;
    };
    let mime = content_type.split(';').next().unwrap_or_default().trim();
    if mime.eq_ignore_ascii_case(FORM_CONTENT_TYPE) {
        BodyKind::Form
    } else if mime.eq_ignore_ascii_case(MULTIPART_CONTENT_TYPE) {
        match multer::parse_boundary(content_type) {
            Ok(boundary) => BodyKind::Multipart { boundary },
            Err(e) => {
                debug!(error = %e, "multipart body without usable boundary");
                BodyKind::Other
            }
        }
    } else {
        BodyKind::Other
    }
}

/// Text fields of a multipart body, in order; file parts are skipped.
async fn multipart_fields(body: Bytes, boundary: String) -> Vec<(String, String)> {
    let body = stream::once(async move { Ok::<_, Infallible>(body) });
    let mut multipart = multer::Multipart::new(body, boundary);
    let mut fields = Vec::new();
    loop {
        let mut field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "malformed multipart body");
                break;
            }
        };
        let name = field
            .name()
            .filter(|_| field.file_name().is_none())
            .map(str::to_string);
        let Some(name) = name else {
            while let Ok(Some(_)) = field.chunk().await {}
            continue;
        };
        match field.text().await {
            Ok(value) => fields.push((name, value)),
            Err(e) => {
                debug!(error = %e, field = %name, "unreadable multipart field");
                break;
            }
        }
    }
    fields
}
