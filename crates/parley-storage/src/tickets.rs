use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// A signed, time-limited permission to upload one or more blobs.
#[derive(Debug, Clone)]
pub struct UploadTicket {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies upload tickets of the form `{uploader}.{expiry}.{signature}`,
/// where the signature is HMAC-SHA256 over `{uploader}.{expiry}`.
pub struct UploadSigner {
    key: Vec<u8>,
    ttl: Duration,
}

impl UploadSigner {
    pub fn new(key: Vec<u8>, ttl: Duration) -> Self {
        Self { key, ttl }
    }

    /// Derive a signing key from a shared secret so upload tickets and
    /// identity tokens never share key material.
    pub fn derive_key(secret: &str) -> Vec<u8> {
        sign(secret.as_bytes(), "parley-upload-ticket").to_vec()
    }

    pub fn issue(&self, uploader: Uuid, now: DateTime<Utc>) -> UploadTicket {
        let expires_at = now + self.ttl;
        let payload = format!("{}.{}", uploader, expires_at.timestamp());
        let signature = hex::encode(sign(&self.key, &payload));

        UploadTicket {
            token: format!("{}.{}", payload, signature),
            expires_at,
        }
    }

    /// Returns the uploader the ticket was issued to.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Uuid> {
        let (payload, signature) = token
            .rsplit_once('.')
            .ok_or_else(|| anyhow!("malformed ticket"))?;
        let signature = hex::decode(signature).map_err(|_| anyhow!("malformed signature"))?;

        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|_| anyhow!("invalid signing key"))?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| anyhow!("bad signature"))?;

        let (uploader, expiry) = payload
            .split_once('.')
            .ok_or_else(|| anyhow!("malformed ticket"))?;
        let expiry: i64 = expiry.parse()?;
        if now.timestamp() > expiry {
            bail!("ticket expired");
        }

        Ok(uploader.parse()?)
    }
}

fn sign(key: &[u8], payload: &str) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC-SHA256 accepts any key length");
    mac.update(payload.as_bytes());

    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> UploadSigner {
        UploadSigner::new(UploadSigner::derive_key("secret"), Duration::seconds(60))
    }

    #[test]
    fn issued_ticket_verifies_until_expiry() {
        let signer = signer();
        let uploader = Uuid::new_v4();
        let now = Utc::now();
        let ticket = signer.issue(uploader, now);

        assert_eq!(ticket.expires_at, now + Duration::seconds(60));
        assert_eq!(signer.verify(&ticket.token, now).unwrap(), uploader);
        assert!(signer.verify(&ticket.token, now + Duration::seconds(61)).is_err());
    }

    #[test]
    fn tampered_ticket_is_rejected() {
        let signer = signer();
        let now = Utc::now();
        let ticket = signer.issue(Uuid::new_v4(), now);

        let forged = ticket
            .token
            .replacen(&ticket.token[..36], &Uuid::new_v4().to_string(), 1);
        assert!(signer.verify(&forged, now).is_err());
        assert!(signer.verify("garbage", now).is_err());

        let other = UploadSigner::new(UploadSigner::derive_key("other"), Duration::seconds(60));
        assert!(other.verify(&ticket.token, now).is_err());
    }
}
