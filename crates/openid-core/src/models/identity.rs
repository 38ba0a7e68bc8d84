use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::Clock;

/// Namespace alias of the Simple Registration extension.
pub const SREG_ALIAS: &str = "sreg";

/// XRI global context symbols; an identifier starting with one is an i-name.
const XRI_GLOBAL_CONTEXT_SYMBOLS: &[char] = &['=', '@', '+', '$', '!', '('];

/// What the relying-party library exposes about a verified positive assertion.
///
/// Implement this for the library's success-response type.
pub trait AuthResponse {
    fn identity_url(&self) -> &str;

    /// Signed fields of the assertion, keyed by field name.
    fn signed_fields(&self) -> BTreeMap<String, String>;

    /// Arguments of the extension registered under `alias`, without the prefix.
    /// Empty when the response carries no such extension.
    fn extension_response(&self, alias: &str) -> BTreeMap<String, String>;
}

/// A verified OpenID identity, handed to the caller after authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenId {
    pub openid: String,
    pub issued: i64,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    #[serde(default)]
    pub sreg: BTreeMap<String, String>,
    pub is_iname: bool,
}

impl OpenId {
    pub fn new(
        openid: impl Into<String>,
        issued: i64,
        attrs: Option<BTreeMap<String, String>>,
        sreg: Option<BTreeMap<String, String>>,
    ) -> Self {
        let openid = openid.into();
        let is_iname = is_xri(&openid);
        Self {
            openid,
            issued,
            attrs: attrs.unwrap_or_default(),
            sreg: sreg.unwrap_or_default(),
            is_iname,
        }
    }

    /// Build the identity record for a response the library has already verified.
    pub fn from_response<R>(response: &R, clock: &dyn Clock) -> Self
    where
        R: AuthResponse + ?Sized,
    {
        Self::new(
            response.identity_url(),
            clock.now(),
            Some(response.signed_fields()),
            Some(response.extension_response(SREG_ALIAS)),
        )
    }
}

impl fmt::Display for OpenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.openid)
    }
}

/// Whether `identifier` uses the XRI naming scheme rather than a URI.
pub fn is_xri(identifier: &str) -> bool {
    identifier.starts_with("xri://") || identifier.starts_with(XRI_GLOBAL_CONTEXT_SYMBOLS)
}
