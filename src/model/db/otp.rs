use chrono::{DateTime, Duration, Utc};
use data_encoding::HEXLOWER;
use hmac::Mac;
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{
    common::{Code, HmacSha256, MobileKey},
    mongodb::Id,
};

/// The live OTP for one mobile number. Issuing a new code replaces the
/// record wholesale, so at most one exists per mobile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpRecord {
    #[serde(rename = "_id")]
    pub mobile: MobileKey,
    /// Distinguishes this issuance from any earlier one for the same mobile.
    pub nonce: Id,
    /// Keyed digest of the nonce and the code; the code itself is never stored.
    pub code_hmac: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub issued_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub expire_at: DateTime<Utc>,
    pub consumed: bool,
    pub failed_attempts: u32,
}

impl OtpRecord {
    /// A fresh record for `code`, valid for `ttl` from `now`.
    pub fn issue(
        mobile: MobileKey,
        code: &Code,
        now: DateTime<Utc>,
        ttl: Duration,
        hmac_secret: &[u8],
    ) -> Self {
        let nonce = Id::new();
        let code_hmac = HEXLOWER.encode(&code_mac(hmac_secret, nonce, code).finalize().into_bytes());
        Self {
            mobile,
            nonce,
            code_hmac,
            issued_at: now,
            expire_at: now + ttl,
            consumed: false,
            failed_attempts: 0,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expire_at
    }

    /// Constant-time comparison of `code` against the stored digest.
    pub fn code_matches(&self, code: &Code, hmac_secret: &[u8]) -> bool {
        let Ok(expected) = HEXLOWER.decode(self.code_hmac.as_bytes()) else {
            return false;
        };
        code_mac(hmac_secret, self.nonce, code)
            .verify_slice(&expected)
            .is_ok()
    }
}

fn code_mac(hmac_secret: &[u8], nonce: Id, code: &Code) -> HmacSha256 {
    let mut hmac =
        HmacSha256::new_from_slice(hmac_secret).expect("HMAC can take key of any size");
    hmac.update(nonce.to_string().as_bytes());
    hmac.update(b":");
    hmac.update(code.to_string().as_bytes());
    hmac
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::common::Mobile;

    const SECRET: &[u8] = b"otp test secret";

    #[test]
    fn matches_only_its_own_code() {
        let code: Code = "1234".parse().unwrap();
        let record = OtpRecord::issue(
            Mobile::example().key(SECRET),
            &code,
            Utc::now(),
            Duration::minutes(5),
            SECRET,
        );
        assert!(record.code_matches(&code, SECRET));
        assert!(!record.code_matches(&"1235".parse().unwrap(), SECRET));
        assert!(!record.code_matches(&code, b"wrong secret"));
        assert!(!record.code_hmac.contains("1234"));
    }

    #[test]
    fn same_code_different_issuance() {
        let code: Code = "0000".parse().unwrap();
        let key = Mobile::example().key(SECRET);
        let first = OtpRecord::issue(key.clone(), &code, Utc::now(), Duration::minutes(5), SECRET);
        let second = OtpRecord::issue(key, &code, Utc::now(), Duration::minutes(5), SECRET);
        assert_ne!(first.code_hmac, second.code_hmac);
    }

    #[test]
    fn expiry_boundary() {
        let now = Utc::now();
        let record = OtpRecord::issue(
            Mobile::example().key(SECRET),
            &Code::random(),
            now,
            Duration::minutes(5),
            SECRET,
        );
        assert!(!record.is_expired(now + Duration::seconds(299)));
        assert!(record.is_expired(now + Duration::minutes(5)));
    }
}
