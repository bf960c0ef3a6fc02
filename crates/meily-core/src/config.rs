use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Typed configuration for the bot, read from the environment (and an optional `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    pub admin_user_ids: Vec<i64>,

    // Shop
    pub unit_cost: u64,
    pub max_quantity: u32,
    pub payee_bin: String,
    pub payment_url: String,
    pub delivery_form_url: String,
    pub promo_photo_id: Option<String>,
    pub instruction_video_id: Option<String>,

    // Storage
    pub database_url: String,
    pub state_ttl: Duration,
    pub payments_dir: PathBuf,
    pub max_receipt_bytes: u64,

    // Receipt extraction
    pub pdftotext_path: PathBuf,
    pub extract_timeout: Duration,

    // Broadcast
    pub broadcast_rate_per_sec: u32,
    pub broadcast_concurrency: usize,
    pub broadcast_progress_every: usize,
}

/// Keeps `MAX_QUANTITY * UNIT_COST` far from overflow.
const MAX_UNIT_COST: u64 = 100_000_000;
const DEFAULT_PAYMENT_URL: &str = "https://pay.kaspi.kz/pay/ndy27jz5";
const DEFAULT_DELIVERY_FORM_URL: &str = "https://t.me/meilly_cosmetics_bot/MeiLyCosmetics";

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (the process environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Env(&lookup);

        // Required env vars
        let telegram_bot_token = env.str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        let admin_user_ids = parse_csv_i64(env.str("ADMIN_USER_IDS"));
        let payee_bin = env.str("PAYEE_BIN").unwrap_or_default().trim().to_string();

        if telegram_bot_token.trim().is_empty() {
            return Err(required("TELEGRAM_BOT_TOKEN"));
        }
        if admin_user_ids.is_empty() {
            return Err(required("ADMIN_USER_IDS"));
        }
        if payee_bin.is_empty() {
            return Err(required("PAYEE_BIN"));
        }

        let unit_cost = env.u64("UNIT_COST").unwrap_or(18_900);
        if unit_cost == 0 || unit_cost > MAX_UNIT_COST {
            return Err(Error::Config(format!(
                "UNIT_COST must be between 1 and {MAX_UNIT_COST}"
            )));
        }
        let max_quantity = env.u32("MAX_QUANTITY").unwrap_or(30).clamp(1, 100);

        let payment_url = env
            .str("PAYMENT_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_PAYMENT_URL.to_string());
        let delivery_form_url = env
            .str("DELIVERY_FORM_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_DELIVERY_FORM_URL.to_string());
        let promo_photo_id = env.str("PROMO_PHOTO_ID").and_then(non_empty);
        let instruction_video_id = env.str("INSTRUCTION_VIDEO_ID").and_then(non_empty);

        let database_url = env
            .str("DATABASE_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| "sqlite://meily.db".to_string());
        let state_ttl = Duration::from_secs(env.u64("STATE_TTL_SECS").unwrap_or(24 * 60 * 60));
        let payments_dir = PathBuf::from(env.str("PAYMENTS_DIR").unwrap_or("./payment".to_string()));
        let max_receipt_bytes = env.u64("MAX_RECEIPT_BYTES").unwrap_or(10 * 1024 * 1024);

        let pdftotext_path =
            PathBuf::from(env.str("PDFTOTEXT_PATH").unwrap_or("pdftotext".to_string()));
        let extract_timeout =
            Duration::from_millis(env.u64("EXTRACT_TIMEOUT_MS").unwrap_or(15_000));

        let broadcast_rate_per_sec = env.u32("BROADCAST_RATE_PER_SEC").unwrap_or(29).max(1);
        let broadcast_concurrency = env.usize("BROADCAST_CONCURRENCY").unwrap_or(10).max(1);
        let broadcast_progress_every = env.usize("BROADCAST_PROGRESS_EVERY").unwrap_or(10).max(1);

        Ok(Self {
            telegram_bot_token,
            admin_user_ids,
            unit_cost,
            max_quantity,
            payee_bin,
            payment_url,
            delivery_form_url,
            promo_photo_id,
            instruction_video_id,
            database_url,
            state_ttl,
            payments_dir,
            max_receipt_bytes,
            pdftotext_path,
            extract_timeout,
            broadcast_rate_per_sec,
            broadcast_concurrency,
            broadcast_progress_every,
        })
    }

    /// Amount due for `quantity` sets.
    pub fn order_total(&self, quantity: u32) -> u64 {
        u64::from(quantity).saturating_mul(self.unit_cost)
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_user_ids.contains(&user_id)
    }
}

fn required(key: &str) -> Error {
    Error::Config(format!("{key} environment variable is required"))
}

struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn str(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn u64(&self, key: &str) -> Option<u64> {
        self.str(key).and_then(|s| s.trim().parse::<u64>().ok())
    }

    fn u32(&self, key: &str) -> Option<u32> {
        self.str(key).and_then(|s| s.trim().parse::<u32>().ok())
    }

    fn usize(&self, key: &str) -> Option<usize> {
        self.str(key).and_then(|s| s.trim().parse::<usize>().ok())
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}
