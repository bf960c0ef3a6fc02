//! User-facing copy and keyboards.
//!
//! Everything the bot says lives here, in the shop's language. Admin menu labels are the
//! single source for both rendering the keyboards and mapping replies back to intents.

use chrono::{DateTime, Local};

use crate::{
    broadcast::{BroadcastSummary, ProgressSnapshot},
    config::Config,
    conversation::event::{AdminIntent, ButtonAction, BUY_CALLBACK},
    formatting::{format_price, format_ticket},
    messaging::types::{
        Content, InlineButton, InlineKeyboard, KeyButton, OutgoingMessage, ReplyKeyboard,
        ReplyMarkup,
    },
    records::{LotteryEntry, RecordStats},
    state::Audience,
};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const BRAND_URL: &str = "https://t.me/meilly_cosmetics_bot";

// ============== Buyer flow ==============

pub const BUY_LABEL: &str = "🛍 Сатып алу";
pub const PAY_LABEL: &str = "💳 Төлем жасау";
pub const SHARE_CONTACT_LABEL: &str = "📲 Контактіні бөлісу";
pub const ENTER_ADDRESS_LABEL: &str = "📍 Мекен-жайды енгізу";

pub const ONLY_PDF: &str = "❌ Қате! Тек қана PDF форматындағы файлдарды қабылдаймыз.";
pub const INVALID_RECEIPT: &str = "Дұрыс емес pdf file, қайталап көріңіз";
pub const RECEIPT_REUSED: &str =
    "❌ Бұл чек бұрын қолданылған. Жаңа төлемнің чегін PDF форматында жіберіңіз.";
pub const RECEIPT_TOO_LARGE: &str = "❌ Файл тым үлкен. Төлем чегін PDF форматында жіберіңіз.";
pub const TECHNICAL_ERROR: &str =
    "⚠️ Техникалық қате орын алды, сәл кейінірек қайталап көріңіз.";
pub const CONTACT_REPROMPT: &str =
    "Cізбен кері байланысқа шығу үшін контактіні 📲 бөлісу түймесін басыңыз.";
pub const DELIVERY_REJECTED: &str = "❌ Мекен-жай қабылданбады. Аты-жөніңізді, телефоныңызды және мекен-жайыңызды толтырып, қайта жіберіңіз.\n\
❌ Адрес не принят. Заполните имя, телефон и адрес и отправьте форму ещё раз.";
pub const QUANTITY_PROMPT: &str = "🧴 Косметика санын таңдаңыз 🧴";
const ADDRESS_PROMPT: &str = "✅ Контактіңіз сәтті алынды! 😊\n\
Косметикалық жинақты қай мекен-жайға жеткізу керек екенін көрсетіңіз. 🚚\n\
⤵️ Мекен-жайыңызды енгізу үшін батырманы басыңыз👇\n\
Толығырақ 📹 видео инструкцияда";

pub fn promo(cfg: &Config) -> OutgoingMessage {
    let caption = format!(
        "{} теңгеге косметикалық жиынтық сатып алыңыз және сыйлықтар ұтып алыңыз!",
        format_price(cfg.unit_cost)
    );
    let content = match &cfg.promo_photo_id {
        Some(file_id) => Content::Photo {
            file_id: file_id.clone(),
            caption: Some(caption),
        },
        None => Content::Text(caption),
    };
    OutgoingMessage::new(content).with_markup(ReplyMarkup::Inline(InlineKeyboard::single(
        InlineButton::callback(BUY_LABEL, BUY_CALLBACK),
    )))
}

pub fn quantity_menu(max_quantity: u32) -> OutgoingMessage {
    let buttons = (1..=max_quantity)
        .map(|n| InlineButton::callback(n.to_string(), ButtonAction::quantity_data(n)))
        .collect();
    OutgoingMessage::text(QUANTITY_PROMPT)
        .with_markup(ReplyMarkup::Inline(InlineKeyboard::grid(buttons, 5)))
}

pub fn payment_instructions(total: u64, payment_url: &str) -> OutgoingMessage {
    let text = format!(
        "✅ Тамаша! Енді төмендегі сілтемеге өтіп {} теңге төлем жасап, төлемді растайтын чекті PDF форматында ботқа кері жіберіңіз.",
        format_price(total)
    );
    OutgoingMessage::text(text).with_markup(ReplyMarkup::Inline(InlineKeyboard::single(
        InlineButton::url(PAY_LABEL, payment_url),
    )))
}

fn contact_keyboard() -> ReplyMarkup {
    ReplyMarkup::Reply(ReplyKeyboard {
        rows: vec![vec![KeyButton::contact(SHARE_CONTACT_LABEL)]],
        resize: true,
        one_time: true,
    })
}

pub fn tickets_issued(tickets: &[u32]) -> OutgoingMessage {
    let list = tickets
        .iter()
        .map(|t| format!("•{}", format_ticket(*t)))
        .collect::<Vec<_>>()
        .join("\n");
    let text = format!(
        "✅ Чек PDF сәтті қабылданды!\nCізбен кері байланысқа шығу үшін төмендегі\n📲 Контактіні бөлісу түймесін 👇 міндетті басыңыз.\n\n🎟️ Сізге берілген {} билет:\n\n{list}",
        tickets.len()
    );
    OutgoingMessage::text(text).with_markup(contact_keyboard())
}

pub fn contact_reprompt() -> OutgoingMessage {
    OutgoingMessage::text(CONTACT_REPROMPT).with_markup(contact_keyboard())
}

pub fn delivery_prompt(cfg: &Config) -> OutgoingMessage {
    let content = match &cfg.instruction_video_id {
        Some(file_id) => Content::Video {
            file_id: file_id.clone(),
            caption: Some(ADDRESS_PROMPT.to_string()),
        },
        None => Content::Text(ADDRESS_PROMPT.to_string()),
    };
    OutgoingMessage::new(content).with_markup(ReplyMarkup::Inline(InlineKeyboard::single(
        InlineButton::url(ENTER_ADDRESS_LABEL, &cfg.delivery_form_url),
    )))
}

pub fn delivery_confirmation(full_name: &str, contact: &str, address: &str) -> OutgoingMessage {
    let ru = format!(
        "🎉 Ваш заказ подтвержден!\n\n👤 ФИО: {full_name}\n📱 Контакт: {contact}\n📍 Адрес доставки: {address}\n\n🚚 Косметический набор Meily будет доставлен по указанному адресу!\n📦 Ожидайте звонка курьера для уточнения времени доставки.\n\n💄 Спасибо за выбор Meily Cosmetics!"
    );
    let kz = format!(
        "🎉 Тапсырысыңыз расталды!\n\n👤 Аты-жөні: {full_name}\n📱 Байланыс: {contact}\n📍 Жеткізу мекенжайы: {address}\n\n🚚 Meily косметикалық жинағы көрсетілген мекенжайға жеткізіледі!\n📦 Жеткізу уақытын нақтылау үшін курьердің қоңырауын күтіңіз.\n\n💄 Meily Cosmetics брендін таңдағаныңыз үшін рахмет!"
    );
    OutgoingMessage::text(format!("{ru}\n\n═══════════════════\n\n{kz}")).with_markup(
        ReplyMarkup::Inline(InlineKeyboard::single(InlineButton::url(
            "💄 Meily Cosmetics",
            BRAND_URL,
        ))),
    )
}

pub fn file_id_echo(kind: &str, file_id: &str) -> OutgoingMessage {
    OutgoingMessage::text(format!("{kind} file_id:\n{file_id}"))
}

// ============== Admin panel ==============

pub const BACK_LABEL: &str = "🔙 Артқа (Back)";
pub const ADMIN_WELCOME: &str = "🔧 Админ панеліне қош келдіңіз!\n\nТаңдаңыз:";
pub const ADMIN_UNKNOWN: &str = "Белгісіз команда. Төмендегі батырмаларды пайдаланыңыз:";
pub const ADMIN_CLOSED: &str = "✅ Админ панелі жабылды";
pub const STATS_FAILED: &str = "❌ Қате: деректерді алу мүмкін болмады";
pub const PICK_AUDIENCE_FIRST: &str = "Алдымен хабарлама жіберілетін топты таңдаңыз:";
pub const NO_RECIPIENTS: &str = "📭 Хабарлама жіберуге пайдаланушылар табылмады";
pub const BROADCAST_NOT_STARTED: &str = "❌ Қате: хабарлама жіберуді бастау мүмкін болмады";

pub fn admin_label(intent: AdminIntent) -> &'static str {
    match intent {
        AdminIntent::Money => "💰 Ақша (Money)",
        AdminIntent::Registered => "👥 Тіркелгендер (Just Clicked)",
        AdminIntent::Clients => "🛍 Клиенттер (Clients)",
        AdminIntent::Lottery => "🎲 Лото (Loto)",
        AdminIntent::Broadcast => "📢 Хабарлама (Messages)",
        AdminIntent::Gift => "🎁 Сыйлық (Gift)",
        AdminIntent::Statistics => "📊 Статистика (Statistics)",
        AdminIntent::Close => "❌ Жабу (Close)",
    }
}

pub fn audience_label(audience: Audience) -> &'static str {
    match audience {
        Audience::All => "📢 Барлығына жіберу",
        Audience::Clients => "🛍 Клиенттерге жіберу",
        Audience::LotteryParticipants => "🎲 Лото қатысушыларына",
        Audience::Registered => "👥 Тіркелгендерге",
    }
}

pub fn audience_name(audience: Audience) -> &'static str {
    match audience {
        Audience::All => "Барлық пайдаланушылар",
        Audience::Clients => "Барлық клиенттер",
        Audience::LotteryParticipants => "Лото қатысушылары",
        Audience::Registered => "Тіркелген пайдаланушылар",
    }
}

pub fn admin_menu(text: &str) -> OutgoingMessage {
    let rows = AdminIntent::MENU
        .chunks(2)
        .map(|pair| pair.iter().map(|i| KeyButton::new(admin_label(*i))).collect())
        .collect();
    OutgoingMessage::text(text).with_markup(ReplyMarkup::Reply(ReplyKeyboard {
        rows,
        resize: true,
        one_time: true,
    }))
}

pub fn admin_closed() -> OutgoingMessage {
    OutgoingMessage::text(ADMIN_CLOSED).with_markup(ReplyMarkup::Remove)
}

fn audience_keyboard() -> ReplyMarkup {
    let mut rows: Vec<Vec<KeyButton>> = Audience::ALL
        .chunks(2)
        .map(|pair| pair.iter().map(|a| KeyButton::new(audience_label(*a))).collect())
        .collect();
    rows.push(vec![KeyButton::new(BACK_LABEL)]);
    ReplyMarkup::Reply(ReplyKeyboard {
        rows,
        resize: true,
        one_time: false,
    })
}

/// Broadcast menu with the size of every audience.
pub fn broadcast_menu(counts: &[(Audience, Option<usize>)]) -> OutgoingMessage {
    let count_of = |a: Audience| {
        counts
            .iter()
            .find(|(x, _)| *x == a)
            .and_then(|(_, n)| *n)
            .map(|n| n.to_string())
            .unwrap_or_else(|| "?".to_string())
    };
    let text = format!(
        "📢 ХАБАРЛАМА ЖІБЕРУ\n\n📊 Қол жетімді аудитория:\n• 👥 Барлық пайдаланушылар: {}\n• 🛍 Клиенттер: {}\n• 🎲 Лото қатысушылары: {}\n• 📅 Тіркелгендер: {}\n\n⚠️ Ескерту: Хабарлама барлық таңдалған пайдаланушыларға жіберіледі. Сақ болыңыз!\n\nҚайсы топқа хабарлама жіберуді қалайсыз?",
        count_of(Audience::All),
        count_of(Audience::Clients),
        count_of(Audience::LotteryParticipants),
        count_of(Audience::Registered),
    );
    OutgoingMessage::text(text).with_markup(audience_keyboard())
}

pub fn pick_audience_first() -> OutgoingMessage {
    OutgoingMessage::text(PICK_AUDIENCE_FIRST).with_markup(audience_keyboard())
}

pub fn compose_prompt(audience: Audience) -> OutgoingMessage {
    let text = format!(
        "📝 ХАБАРЛАМА ЖАЗУ\n\n🎯 Мақсатты аудитория: {}\n\n💡 Қолдаулатын форматтар:\n• 📝 Мәтін хабарлама\n• 📷 Фото + мәтін\n• 🎥 Видео + мәтін\n• 📎 Файл + мәтін\n• 🎵 Аудио\n• ⭕ Видеохабарлама\n\nХабарламаңызды жіберіңіз:",
        audience_name(audience)
    );
    OutgoingMessage::text(text).with_markup(ReplyMarkup::Reply(ReplyKeyboard {
        rows: vec![vec![KeyButton::new(BACK_LABEL)]],
        resize: true,
        one_time: false,
    }))
}

pub fn audience_load_failed(err: &str) -> String {
    format!("❌ Қате: Пайдаланушы тізімін алу мүмкін болмады\n{err}")
}

pub fn money_stats(units: u64, revenue: u64) -> String {
    format!(
        "💰 АҚША СТАТИСТИКАСЫ\n\n🧴 Сатылған жиынтық: {units}\n💵 Түсім: {} ₸",
        format_price(revenue)
    )
}

pub fn registered_stats(registered: u64) -> String {
    format!("👥 ТІРКЕЛГЕН ПАЙДАЛАНУШЫЛАР\n\nЖалпы: {registered} пайдаланушы")
}

pub fn clients_stats(clients: u64, with_address: u64) -> String {
    format!("🛍 КЛИЕНТТЕР\n\nЖалпы: {clients}\n📍 Мекен-жай енгізгендер: {with_address}")
}

pub fn lottery_stats(entries: u64, participants: u64) -> String {
    format!("🎲 ЛОТО\n\n🎟 Билеттер: {entries}\n👥 Қатысушылар: {participants}")
}

pub fn gift_draw(winner: Option<&LotteryEntry>) -> String {
    match winner {
        Some(entry) => format!(
            "🎁 СЫЙЛЫҚ\n\n🎟 Жеңімпаз билет: •{}\n👤 Пайдаланушы: {}",
            format_ticket(entry.ticket),
            entry.user_id.0
        ),
        None => "🎁 СЫЙЛЫҚ\n\n📭 Лото билеттері әлі жоқ.".to_string(),
    }
}

pub fn overall_stats(stats: &RecordStats, now: DateTime<Local>) -> String {
    format!(
        "📊 ЖАЛПЫ СТАТИСТИКА\n\n👥 Жалпы пайдаланушылар: {}\n🛍 Клиенттер: {}\n🎲 Лото қатысушылары: {}\n🎟 Лото билеттері: {}\n\n📅 Соңғы жаңарту: {}",
        stats.registered,
        stats.clients,
        stats.lottery_participants,
        stats.lottery_entries,
        now.format(TIME_FORMAT)
    )
}

// ============== Broadcast status ==============

pub fn broadcast_started(total: u64) -> String {
    format!("📤 Хабарлама жіберіліп жатыр...\n👥 Жалпы: {total} пайдаланушы")
}

pub fn broadcast_progress(snap: &ProgressSnapshot) -> String {
    format!(
        "📤 Хабарлама жіберіліп жатыр...\n👥 Жалпы: {}\n✅ Жіберілді: {}\n❌ Қате: {}\n📊 Прогресс: {:.1}%",
        snap.total,
        snap.succeeded,
        snap.failed,
        snap.percent()
    )
}

pub fn broadcast_summary(summary: &BroadcastSummary) -> String {
    let header = if summary.cancelled {
        "⏹ ХАБАРЛАМА ЖІБЕРУ ТОҚТАТЫЛДЫ!"
    } else {
        "✅ ХАБАРЛАМА ЖІБЕРУ АЯҚТАЛДЫ!"
    };
    format!(
        "{header}\n\n👥 Жалпы: {} пайдаланушы\n✅ Сәтті: {}\n❌ Қате: {}\n📊 Сәттілік: {:.1}%\n\n📋 Хабарлама түрі: {}\n⏰ Уақыт: {}",
        summary.total,
        summary.succeeded,
        summary.failed,
        summary.success_rate(),
        audience_name(summary.audience),
        summary.finished_at.format(TIME_FORMAT)
    )
}
