//! Payment receipt checks: file type, fingerprint, amount/payee validation and archiving.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::{
    domain::UserId,
    errors::Error,
    ports::{ReceiptArchive, ReceiptValidator},
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReceiptVerdict {
    Accepted { amount: u64 },
    Rejected(RejectReason),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectReason {
    NoAmount,
    AmountMismatch { expected: u64, found: u64 },
    PayeeMismatch,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::NoAmount => write!(f, "no amount found"),
            RejectReason::AmountMismatch { expected, found } => {
                write!(f, "amount mismatch: expected {expected}, found {found}")
            }
            RejectReason::PayeeMismatch => write!(f, "payee identifier not found"),
        }
    }
}

/// Only PDF receipts are accepted; the check is on the file name.
pub fn is_pdf_name(name: Option<&str>) -> bool {
    name.and_then(|n| Path::new(n).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// Content fingerprint used to refuse the same receipt twice.
pub fn fingerprint(pdf: &[u8]) -> String {
    hex::encode(Sha256::digest(pdf))
}

/// Validator for Kaspi-style receipts: the amount sits next to a currency marker and the
/// payee's business identifier appears somewhere in the text.
pub struct KaspiReceiptValidator {
    amount_re: Regex,
}

impl KaspiReceiptValidator {
    pub fn new() -> Result<Self> {
        let amount_re = Regex::new(
            r"(?i)(\d{1,3}(?:[ \x{00A0}\x{202F}]\d{3})+|\d+)(?:[.,]\d{1,2})?\s*(?:₸|тг|kzt)",
        )
        .map_err(|e| Error::Config(format!("invalid amount pattern: {e}")))?;
        Ok(Self { amount_re })
    }

    fn amounts(&self, lines: &[String]) -> Vec<u64> {
        lines
            .iter()
            .flat_map(|line| self.amount_re.captures_iter(line))
            .filter_map(|caps| caps.get(1))
            .filter_map(|m| digits_only(m.as_str()).parse::<u64>().ok())
            .collect()
    }
}

impl ReceiptValidator for KaspiReceiptValidator {
    fn validate(
        &self,
        lines: &[String],
        expected_total: u64,
        expected_payee: &str,
    ) -> ReceiptVerdict {
        let amounts = self.amounts(lines);
        let Some(&first) = amounts.first() else {
            return ReceiptVerdict::Rejected(RejectReason::NoAmount);
        };
        if !amounts.contains(&expected_total) {
            return ReceiptVerdict::Rejected(RejectReason::AmountMismatch {
                expected: expected_total,
                found: first,
            });
        }

        let payee = digits_only(expected_payee);
        if payee.is_empty() || !lines.iter().any(|l| digits_only(l).contains(&payee)) {
            return ReceiptVerdict::Rejected(RejectReason::PayeeMismatch);
        }

        ReceiptVerdict::Accepted {
            amount: expected_total,
        }
    }
}

fn digits_only(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

static RECEIPT_COUNTER: AtomicUsize = AtomicUsize::new(1);

/// Writes accepted receipts to `{dir}/{user}_{unix_ms}_{n}.pdf`.
pub struct FsReceiptArchive {
    dir: PathBuf,
}

impl FsReceiptArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ReceiptArchive for FsReceiptArchive {
    async fn store(&self, user: UserId, pdf: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let ts = chrono::Utc::now().timestamp_millis();
        let n = RECEIPT_COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = self.dir.join(format!("{}_{ts}_{n}.pdf", user.0));
        tokio::fs::write(&path, pdf).await?;
        Ok(path)
    }
}
