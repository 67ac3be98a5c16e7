//! URL-safe base64 key transcoding.

use crate::error::CodecError;

/// Public half of the application server (VAPID) key pair.
pub const APPLICATION_SERVER_KEY: &str =
    "BEl62iUYgUivxIkv69yViEuiBIa40HI0DLLcFb9pUniSJzLH-GN2ZpRgeLdCK6zp5AJjkG5LkG2dEz8fhqY7aI8";

/// Decodes URL-safe base64 that may be missing its `=` padding.
///
/// The input is padded to a multiple of four characters and `-`/`_` are
/// mapped to `+`/`/` before a standard decode. Anything still malformed is
/// returned as an error.
pub fn decode_url_safe(value: &str) -> Result<Vec<u8>, CodecError> {
    let padding = (4 - value.len() % 4) % 4;
    let mut standard = String::with_capacity(value.len() + padding);
    standard.extend(value.chars().map(|ch| match ch {
        '-' => '+',
        '_' => '/',
        other => other,
    }));
    standard.extend(std::iter::repeat_n('=', padding));

    Ok(base64::decode(standard)?)
}

pub fn encode_standard(bytes: &[u8]) -> String {
    base64::encode(bytes)
}

/// Binary application server key handed to the push manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VapidKey(Vec<u8>);

impl VapidKey {
    pub fn from_url_safe(value: &str) -> Result<Self, CodecError> {
        decode_url_safe(value).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}
