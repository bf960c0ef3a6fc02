use std::sync::Arc;

use sqlx::SqlitePool;
use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use meily_core::{
    config::Config,
    conversation::{Collaborators, ConversationMachine},
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    receipt::{FsReceiptArchive, KaspiReceiptValidator},
};
use meily_pdf::PdftotextExtractor;
use meily_store::{SqliteRecords, SqliteStateStore};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub machine: Arc<ConversationMachine>,
}

/// Wire every adapter around the conversation machine and poll until Ctrl-C.
///
/// `shutdown` is passed to running broadcasts; the caller cancels it on Ctrl-C.
pub async fn run_polling(
    cfg: Arc<Config>,
    pool: SqlitePool,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    match bot.get_me().await {
        Ok(me) => info!(username = %me.username(), "bot started"),
        Err(e) => warn!(error = %e, "could not fetch bot identity"),
    }
    info!(
        admins = cfg.admin_user_ids.len(),
        unit_cost = cfg.unit_cost,
        database = %cfg.database_url,
        "configuration loaded"
    );

    // Throttle on top of the raw messenger to stay under flood limits; the adapter itself
    // still retries once on RetryAfter.
    let telegram = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> =
        Arc::new(ThrottledMessenger::new(telegram.clone(), ThrottleConfig::default()));

    let records = Arc::new(SqliteRecords::new(pool.clone()));
    let machine = ConversationMachine::new(
        cfg.clone(),
        Collaborators {
            states: Arc::new(SqliteStateStore::new(pool, cfg.state_ttl)),
            messenger,
            fetch: telegram,
            extractor: Arc::new(PdftotextExtractor::new(
                cfg.pdftotext_path.clone(),
                cfg.extract_timeout,
            )),
            validator: Arc::new(KaspiReceiptValidator::new()?),
            archive: Arc::new(FsReceiptArchive::new(cfg.payments_dir.clone())),
            records: records.clone(),
            audiences: records,
        },
        shutdown,
    );

    let state = Arc::new(AppState {
        machine: Arc::new(machine),
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("dispatcher stopped");
    Ok(())
}
