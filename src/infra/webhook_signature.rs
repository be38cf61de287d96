//! Processor webhook signature verification.
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac>[,v1=<hex hmac>...]`. The MAC
//! is HMAC-SHA256 over `"{t}."` followed by the raw request body bytes.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use time::Duration;

use crate::app_error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Clone)]
pub struct WebhookVerifier {
    secret: SecretString,
    tolerance: Duration,
}

impl WebhookVerifier {
    pub fn new(secret: SecretString, tolerance: Duration) -> Self {
        Self { secret, tolerance }
    }

    /// Verify `header` against the exact bytes received. `now` is unix seconds.
    pub fn verify(&self, header: &str, body: &[u8], now: i64) -> AppResult<()> {
        let mut timestamp: Option<&str> = None;
        let mut signatures: Vec<&str> = Vec::new();

        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = Some(value),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| AppError::InvalidSignature("Missing timestamp in signature".into()))?;
        let ts: i64 = timestamp
            .parse()
            .map_err(|_| AppError::InvalidSignature("Invalid timestamp".into()))?;

        if signatures.is_empty() {
            return Err(AppError::InvalidSignature("Missing signature".into()));
        }

        let matched = signatures.iter().any(|sig| {
            let Ok(expected) = hex::decode(sig) else {
                return false;
            };
            // verify_slice compares in constant time
            self.mac(timestamp, body)
                .map(|mac| mac.verify_slice(&expected).is_ok())
                .unwrap_or(false)
        });

        if !matched {
            return Err(AppError::InvalidSignature("Invalid signature".into()));
        }

        if (now - ts).abs() > self.tolerance.whole_seconds() {
            return Err(AppError::InvalidSignature("Timestamp outside tolerance".into()));
        }

        Ok(())
    }

    /// Produce a header the processor would send for `body` at `timestamp`.
    pub fn sign(&self, body: &[u8], timestamp: i64) -> AppResult<String> {
        let ts = timestamp.to_string();
        let mac = self.mac(&ts, body)?;
        Ok(format!("t={},v1={}", ts, hex::encode(mac.finalize().into_bytes())))
    }

    fn mac(&self, timestamp: &str, body: &[u8]) -> AppResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| AppError::Internal("HMAC error".into()))?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        Ok(mac)
    }
}
