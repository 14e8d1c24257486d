use std::fmt::{self, Display, Formatter};
use std::{ops::Deref, str::FromStr};

use data_encoding::HEXLOWER;
use hmac::{Hmac, Mac};
use mongodb::bson::Bson;
use phonenumber::{Mode, PhoneNumber};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

pub type HmacSha256 = Hmac<Sha256>;

/// A voter's mobile number, in international format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Mobile {
    inner: PhoneNumber,
}

impl Mobile {
    /// The number in E.164 form, e.g. `+447700900123`.
    pub fn e164(&self) -> String {
        self.inner.format().mode(Mode::E164).to_string()
    }

    /// Derive the storage key for this number. The plaintext number is never
    /// stored; lookups go through this keyed digest instead.
    pub fn key(&self, hmac_secret: &[u8]) -> MobileKey {
        let mut hmac =
            HmacSha256::new_from_slice(hmac_secret).expect("HMAC can take key of any size");
        hmac.update(self.e164().as_bytes());
        MobileKey(HEXLOWER.encode(&hmac.finalize().into_bytes()))
    }

    /// The number with all but the last three digits hidden, for log lines.
    pub fn masked(&self) -> String {
        let e164 = self.e164();
        let visible = e164.len().saturating_sub(3);
        format!("{}{}", "*".repeat(visible), &e164[visible..])
    }
}

impl Deref for Mobile {
    type Target = PhoneNumber;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl Display for Mobile {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.e164())
    }
}

impl FromStr for Mobile {
    type Err = phonenumber::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Mobile {
            inner: s.trim().parse::<PhoneNumber>()?,
        })
    }
}

impl TryFrom<String> for Mobile {
    type Error = phonenumber::ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Mobile> for String {
    fn from(mobile: Mobile) -> Self {
        mobile.e164()
    }
}

/// Keyed digest of a [`Mobile`], hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MobileKey(String);

impl MobileKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<MobileKey> for Bson {
    fn from(key: MobileKey) -> Self {
        Bson::String(key.0)
    }
}
