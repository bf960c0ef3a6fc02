use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{
    event::{AdminIntent, ButtonAction, DocumentRef, EventKind, InboundEvent, Media, MenuIntent},
    Collaborators, ConversationMachine, DeliveryForm,
};
use crate::{
    config::Config,
    domain::{ChatId, MessageId, MessageRef, UserId},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{ButtonTarget, Content, OutgoingMessage, ReplyMarkup},
    },
    ports::{
        AudienceProvider, DocumentFetch, ReceiptArchive, ReceiptValidator, RecordStore,
        TextExtractor,
    },
    receipt::{ReceiptVerdict, RejectReason},
    records::{
        AdminAction, ClientRecord, DeliveryRecord, EntryOutcome, LotteryEntry, RecordStats,
        UserProfile,
    },
    state::{Audience, ConversationState, InMemoryStateStore, Phase, StateStore},
    texts, Result,
};

const ADMIN: i64 = 1;
const BUYER: i64 = 42;
const PAYEE: &str = "990340005977";

// ============== Fakes ==============

#[derive(Default)]
struct FakeMessenger {
    next_id: AtomicUsize,
    sent: Mutex<Vec<(ChatId, OutgoingMessage)>>,
    edits: Mutex<Vec<String>>,
    answered: Mutex<Vec<String>>,
}

impl FakeMessenger {
    fn sent_to(&self, chat: i64) -> Vec<OutgoingMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| c.0 == chat)
            .map(|(_, m)| m.clone())
            .collect()
    }

    fn texts_to(&self, chat: i64) -> Vec<String> {
        self.sent_to(chat)
            .iter()
            .filter_map(|m| m.content.text().map(str::to_string))
            .collect()
    }

    fn last_to(&self, chat: i64) -> OutgoingMessage {
        self.sent_to(chat).pop().expect("no message sent to chat")
    }

    fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    async fn send(&self, chat_id: ChatId, msg: OutgoingMessage) -> Result<MessageRef> {
        self.sent.lock().unwrap().push((chat_id, msg));
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as i32;
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(id),
        })
    }

    async fn edit_text(&self, _msg: MessageRef, text: &str) -> Result<()> {
        self.edits.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn answer_callback_query(&self, callback_id: &str, _text: Option<&str>) -> Result<()> {
        self.answered.lock().unwrap().push(callback_id.to_string());
        Ok(())
    }
}

/// In-memory store whose reads or writes can be made to fail.
#[derive(Default)]
struct FlakyStates {
    inner: InMemoryStateStore,
    fail_get: AtomicBool,
    fail_put: AtomicBool,
    puts: AtomicUsize,
}

#[async_trait]
impl StateStore for FlakyStates {
    async fn get(&self, user: UserId) -> Result<Option<ConversationState>> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(Error::Storage("connection refused".into()));
        }
        self.inner.get(user).await
    }

    async fn put(&self, user: UserId, state: &ConversationState) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(Error::Storage("connection refused".into()));
        }
        self.inner.put(user, state).await
    }

    async fn delete(&self, user: UserId) -> Result<()> {
        self.inner.delete(user).await
    }
}

struct FakeFetch {
    bytes: Mutex<Option<Vec<u8>>>,
    calls: AtomicUsize,
}

#[async_trait]
impl DocumentFetch for FakeFetch {
    async fn fetch_bytes(&self, _doc: &DocumentRef) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.bytes
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::External("download failed".into()))
    }
}

struct FakeExtractor {
    lines: Mutex<Option<Vec<String>>>,
}

#[async_trait]
impl TextExtractor for FakeExtractor {
    async fn extract_lines(&self, _pdf: &[u8]) -> Result<Vec<String>> {
        self.lines
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::External("pdftotext exited with status 1".into()))
    }
}

struct FakeValidator {
    verdict: Mutex<ReceiptVerdict>,
    calls: Mutex<Vec<(u64, String)>>,
}

impl ReceiptValidator for FakeValidator {
    fn validate(&self, _lines: &[String], expected_total: u64, payee: &str) -> ReceiptVerdict {
        self.calls
            .lock()
            .unwrap()
            .push((expected_total, payee.to_string()));
        self.verdict.lock().unwrap().clone()
    }
}

struct FakeArchive;

#[async_trait]
impl ReceiptArchive for FakeArchive {
    async fn store(&self, user: UserId, _pdf: &[u8]) -> Result<PathBuf> {
        Ok(PathBuf::from(format!("payment/{}_1.pdf", user.0)))
    }
}

#[derive(Default)]
struct FakeRecords {
    registered: Mutex<Vec<UserId>>,
    clients: Mutex<Vec<ClientRecord>>,
    seen: Mutex<HashSet<String>>,
    entries: Mutex<Vec<LotteryEntry>>,
    deliveries: Mutex<Vec<DeliveryRecord>>,
    actions: Mutex<Vec<AdminAction>>,
    fail_lottery: AtomicBool,
    fail_delivery: AtomicBool,
    /// Another buyer's concurrent claim that `receipt_seen` has not observed yet.
    claimed_elsewhere: Mutex<HashSet<String>>,
    /// Upcoming batches that clash with someone else's ticket.
    ticket_clashes: AtomicUsize,
    lottery_calls: AtomicUsize,
}

#[async_trait]
impl RecordStore for FakeRecords {
    async fn register_user(&self, profile: &UserProfile) -> Result<bool> {
        let mut registered = self.registered.lock().unwrap();
        if registered.contains(&profile.user_id) {
            return Ok(false);
        }
        registered.push(profile.user_id);
        Ok(true)
    }

    async fn is_client_unique(&self, user: UserId) -> Result<bool> {
        Ok(!self.clients.lock().unwrap().iter().any(|c| c.user_id == user))
    }

    async fn insert_client(&self, client: &ClientRecord) -> Result<()> {
        self.clients.lock().unwrap().push(client.clone());
        Ok(())
    }

    async fn receipt_seen(&self, fingerprint: &str) -> Result<bool> {
        Ok(self.seen.lock().unwrap().contains(fingerprint))
    }

    async fn record_lottery_entries(&self, entries: &[LotteryEntry]) -> Result<EntryOutcome> {
        self.lottery_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_lottery.load(Ordering::SeqCst) {
            return Err(Error::Storage("database is locked".into()));
        }
        let Some(first) = entries.first() else {
            return Ok(EntryOutcome::Recorded);
        };
        let fingerprint = &first.receipt_fingerprint;
        let mut seen = self.seen.lock().unwrap();
        if seen.contains(fingerprint) || self.claimed_elsewhere.lock().unwrap().contains(fingerprint)
        {
            return Ok(EntryOutcome::ReceiptUsed);
        }
        let clashes = self.ticket_clashes.load(Ordering::SeqCst);
        if clashes > 0 {
            self.ticket_clashes.store(clashes - 1, Ordering::SeqCst);
            return Ok(EntryOutcome::TicketTaken);
        }
        let mut stored = self.entries.lock().unwrap();
        if entries
            .iter()
            .any(|e| stored.iter().any(|s| s.ticket == e.ticket))
        {
            return Ok(EntryOutcome::TicketTaken);
        }
        seen.insert(fingerprint.clone());
        stored.extend_from_slice(entries);
        Ok(EntryOutcome::Recorded)
    }

    async fn save_delivery(&self, delivery: &DeliveryRecord) -> Result<()> {
        if self.fail_delivery.load(Ordering::SeqCst) {
            return Err(Error::Storage("disk I/O error".into()));
        }
        self.deliveries.lock().unwrap().push(delivery.clone());
        Ok(())
    }

    async fn stats(&self) -> Result<RecordStats> {
        let entries = self.entries.lock().unwrap();
        let participants: HashSet<UserId> = entries.iter().map(|e| e.user_id).collect();
        Ok(RecordStats {
            registered: self.registered.lock().unwrap().len() as u64,
            clients: self.clients.lock().unwrap().len() as u64,
            clients_with_address: self.deliveries.lock().unwrap().len() as u64,
            lottery_entries: entries.len() as u64,
            lottery_participants: participants.len() as u64,
        })
    }

    async fn draw_lottery_entry(&self) -> Result<Option<LotteryEntry>> {
        Ok(self.entries.lock().unwrap().first().cloned())
    }

    async fn log_admin_action(&self, action: &AdminAction) -> Result<()> {
        self.actions.lock().unwrap().push(action.clone());
        Ok(())
    }
}

#[derive(Default)]
struct FakeAudiences {
    groups: Mutex<HashMap<Audience, Vec<UserId>>>,
}

#[async_trait]
impl AudienceProvider for FakeAudiences {
    async fn list_recipients(&self, audience: Audience) -> Result<Vec<UserId>> {
        Ok(self
            .groups
            .lock()
            .unwrap()
            .get(&audience)
            .cloned()
            .unwrap_or_default())
    }
}

// ============== Harness ==============

struct Harness {
    machine: ConversationMachine,
    messenger: Arc<FakeMessenger>,
    states: Arc<FlakyStates>,
    fetch: Arc<FakeFetch>,
    extractor: Arc<FakeExtractor>,
    validator: Arc<FakeValidator>,
    records: Arc<FakeRecords>,
    audiences: Arc<FakeAudiences>,
}

fn test_config() -> Config {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("TELEGRAM_BOT_TOKEN", "123:abc"),
        ("ADMIN_USER_IDS", "1"),
        ("PAYEE_BIN", PAYEE),
        ("BROADCAST_RATE_PER_SEC", "1000"),
        ("PROMO_PHOTO_ID", "promo-photo"),
    ]);
    Config::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap()
}

fn harness() -> Harness {
    let messenger = Arc::new(FakeMessenger::default());
    let states = Arc::new(FlakyStates::default());
    let fetch = Arc::new(FakeFetch {
        bytes: Mutex::new(Some(b"%PDF-1.4 receipt".to_vec())),
        calls: AtomicUsize::new(0),
    });
    let extractor = Arc::new(FakeExtractor {
        lines: Mutex::new(Some(vec!["37 800 ₸".into(), format!("БИН {PAYEE}")])),
    });
    let validator = Arc::new(FakeValidator {
        verdict: Mutex::new(ReceiptVerdict::Accepted { amount: 37_800 }),
        calls: Mutex::new(Vec::new()),
    });
    let records = Arc::new(FakeRecords::default());
    let audiences = Arc::new(FakeAudiences::default());

    let machine = ConversationMachine::new(
        Arc::new(test_config()),
        Collaborators {
            states: states.clone(),
            messenger: messenger.clone(),
            fetch: fetch.clone(),
            extractor: extractor.clone(),
            validator: validator.clone(),
            archive: Arc::new(FakeArchive),
            records: records.clone(),
            audiences: audiences.clone(),
        },
        CancellationToken::new(),
    );

    Harness {
        machine,
        messenger,
        states,
        fetch,
        extractor,
        validator,
        records,
        audiences,
    }
}

impl Harness {
    async fn seed(&self, user: i64, state: ConversationState) {
        self.states.inner.put(UserId(user), &state).await.unwrap();
    }

    async fn stored(&self, user: i64) -> Option<ConversationState> {
        self.states.inner.get(UserId(user)).await.unwrap()
    }
}

fn event(user: i64, kind: EventKind) -> InboundEvent {
    InboundEvent {
        chat_id: ChatId(user),
        user_id: UserId(user),
        first_name: "Аружан".into(),
        kind,
    }
}

fn text(user: i64, body: &str) -> InboundEvent {
    event(user, EventKind::Text(body.into()))
}

fn button(user: i64, action: ButtonAction) -> InboundEvent {
    event(
        user,
        EventKind::Button {
            callback_id: "cb-1".into(),
            action,
        },
    )
}

fn document(user: i64, name: &str) -> InboundEvent {
    event(
        user,
        EventKind::Document(DocumentRef {
            file_id: "doc-1".into(),
            file_name: Some(name.into()),
            mime_type: Some("application/pdf".into()),
            file_size: Some(2048),
            caption: None,
        }),
    )
}

fn menu(user: i64, intent: MenuIntent) -> InboundEvent {
    event(user, EventKind::Menu(intent))
}

fn awaiting_payment(quantity: u32) -> ConversationState {
    ConversationState {
        phase: Phase::AwaitingPayment,
        quantity,
        ..ConversationState::default()
    }
}

fn awaiting_contact() -> ConversationState {
    ConversationState {
        phase: Phase::AwaitingContact,
        quantity: 2,
        is_paid: true,
        ..ConversationState::default()
    }
}

// ============== Buyer flow ==============

#[tokio::test]
async fn unknown_user_is_treated_as_start_and_gets_the_promo() {
    let h = harness();

    let state = h.machine.handle(text(BUYER, "сәлем")).await;

    assert_eq!(state.phase, Phase::Start);
    assert_eq!(h.stored(BUYER).await, Some(ConversationState::default()));
    let promo = h.messenger.last_to(BUYER);
    assert!(matches!(promo.content, Content::Photo { ref file_id, .. } if file_id == "promo-photo"));
    assert!(promo.content.text().unwrap().contains("18 900 теңгеге"));
    assert_eq!(h.records.registered.lock().unwrap().as_slice(), &[UserId(BUYER)]);
}

#[tokio::test]
async fn buy_then_quantity_prices_exactly() {
    let h = harness();

    let state = h.machine.handle(button(BUYER, ButtonAction::Buy)).await;
    assert_eq!(state.phase, Phase::AwaitingQuantity);
    assert_eq!(h.messenger.texts_to(BUYER), vec![texts::QUANTITY_PROMPT.to_string()]);

    for n in [1u32, 3, 30] {
        h.seed(BUYER, ConversationState::in_phase(Phase::AwaitingQuantity))
            .await;
        let state = h
            .machine
            .handle(button(BUYER, ButtonAction::Quantity(n)))
            .await;
        assert_eq!(state.phase, Phase::AwaitingPayment);
        assert_eq!(state.quantity, n);
        assert!(!state.is_paid);

        let total = crate::formatting::format_price(u64::from(n) * 18_900);
        let msg = h.messenger.last_to(BUYER);
        assert!(msg.content.text().unwrap().contains(&format!("{total} теңге")));
        let Some(ReplyMarkup::Inline(kb)) = msg.markup else {
            panic!("payment message must link to the payment page");
        };
        assert!(matches!(&kb.rows[0][0].action, ButtonTarget::Url(u) if u.starts_with("https://pay.kaspi.kz")));
    }
    assert_eq!(h.messenger.answered.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn text_while_awaiting_quantity_reprompts_without_pricing() {
    let h = harness();
    h.seed(BUYER, ConversationState::in_phase(Phase::AwaitingQuantity))
        .await;

    let state = h.machine.handle(text(BUYER, "5")).await;

    assert_eq!(state.phase, Phase::AwaitingQuantity);
    assert_eq!(state.quantity, 0);
    assert_eq!(h.messenger.texts_to(BUYER), vec![texts::QUANTITY_PROMPT.to_string()]);
}

#[tokio::test]
async fn forged_quantity_outside_the_menu_is_ignored() {
    let h = harness();
    for n in [0u32, 31, 1000] {
        h.seed(BUYER, ConversationState::in_phase(Phase::AwaitingQuantity))
            .await;
        let state = h
            .machine
            .handle(button(BUYER, ButtonAction::Quantity(n)))
            .await;
        assert_eq!(state.phase, Phase::AwaitingQuantity);
    }
}

#[tokio::test]
async fn unlisted_events_never_advance_the_phase() {
    let h = harness();
    let strays = [
        EventKind::Text("hello".into()),
        EventKind::Location {
            latitude: 43.2,
            longitude: 76.9,
        },
        EventKind::Other {
            kind: "sticker".into(),
        },
        EventKind::Button {
            callback_id: "cb".into(),
            action: ButtonAction::Unknown("noop".into()),
        },
        EventKind::Command {
            name: "admin".into(),
            args: String::new(),
        },
        EventKind::Menu(MenuIntent::Admin(AdminIntent::Money)),
    ];
    let phases = [
        ConversationState::default(),
        ConversationState::in_phase(Phase::AwaitingQuantity),
        awaiting_payment(2),
        awaiting_contact(),
    ];

    for start in phases {
        for kind in strays.clone() {
            h.seed(BUYER, start.clone()).await;
            let state = h.machine.handle(event(BUYER, kind.clone())).await;
            assert_eq!(state, start, "{kind:?} moved {:?}", start.phase);
            assert_eq!(h.stored(BUYER).await, Some(start.clone()));
        }
    }
    assert!(h.records.entries.lock().unwrap().is_empty());
    assert!(h.records.clients.lock().unwrap().is_empty());
}

#[tokio::test]
async fn accepted_receipt_issues_three_unique_tickets_per_unit() {
    let h = harness();
    h.seed(BUYER, awaiting_payment(2)).await;

    let state = h.machine.handle(document(BUYER, "Kaspi_check.PDF")).await;

    assert_eq!(state.phase, Phase::AwaitingContact);
    assert!(state.is_paid);
    assert_eq!(state.quantity, 2);
    assert_eq!(h.stored(BUYER).await, Some(state));

    assert_eq!(
        h.validator.calls.lock().unwrap().as_slice(),
        &[(37_800, PAYEE.to_string())]
    );

    let entries = h.records.entries.lock().unwrap().clone();
    assert_eq!(entries.len(), 6);
    let unique: HashSet<u32> = entries.iter().map(|e| e.ticket).collect();
    assert_eq!(unique.len(), 6);
    assert!(entries.iter().all(|e| (10_000_000..=99_999_999).contains(&e.ticket)));
    assert!(entries.iter().all(|e| e.user_id == UserId(BUYER)));
    assert!(entries
        .iter()
        .all(|e| e.receipt_path.as_deref() == Some("payment/42_1.pdf")));

    let msg = h.messenger.last_to(BUYER);
    let body = msg.content.text().unwrap();
    for e in &entries {
        assert!(body.contains(&format!("•{:08}", e.ticket)));
    }
    assert!(matches!(msg.markup, Some(ReplyMarkup::Reply(ref kb)) if kb.rows[0][0].request_contact));
}

#[tokio::test]
async fn rejected_receipt_keeps_awaiting_payment() {
    let h = harness();
    h.seed(BUYER, awaiting_payment(1)).await;
    *h.validator.verdict.lock().unwrap() =
        ReceiptVerdict::Rejected(RejectReason::AmountMismatch {
            expected: 18_900,
            found: 9_000,
        });

    let state = h.machine.handle(document(BUYER, "check.pdf")).await;

    assert_eq!(state, awaiting_payment(1));
    assert!(h.records.entries.lock().unwrap().is_empty());
    assert_eq!(h.messenger.texts_to(BUYER), vec![texts::INVALID_RECEIPT.to_string()]);
}

#[tokio::test]
async fn non_pdf_is_refused_before_download() {
    let h = harness();
    h.seed(BUYER, awaiting_payment(1)).await;

    let state = h.machine.handle(document(BUYER, "check.jpg")).await;

    assert_eq!(state, awaiting_payment(1));
    assert_eq!(h.fetch.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.messenger.texts_to(BUYER), vec![texts::ONLY_PDF.to_string()]);
}

#[tokio::test]
async fn oversized_receipt_is_refused_before_download() {
    let h = harness();
    h.seed(BUYER, awaiting_payment(1)).await;
    let mut ev = document(BUYER, "check.pdf");
    if let EventKind::Document(doc) = &mut ev.kind {
        doc.file_size = Some(50 * 1024 * 1024);
    }

    let state = h.machine.handle(ev).await;

    assert_eq!(state.phase, Phase::AwaitingPayment);
    assert_eq!(h.fetch.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.messenger.texts_to(BUYER), vec![texts::RECEIPT_TOO_LARGE.to_string()]);
}

#[tokio::test]
async fn extraction_failure_asks_for_another_receipt() {
    let h = harness();
    h.seed(BUYER, awaiting_payment(1)).await;
    *h.extractor.lines.lock().unwrap() = None;

    let state = h.machine.handle(document(BUYER, "check.pdf")).await;

    assert_eq!(state, awaiting_payment(1));
    assert!(h.validator.calls.lock().unwrap().is_empty());
    assert_eq!(h.messenger.texts_to(BUYER), vec![texts::INVALID_RECEIPT.to_string()]);
}

#[tokio::test]
async fn download_failure_reports_a_technical_error() {
    let h = harness();
    h.seed(BUYER, awaiting_payment(1)).await;
    *h.fetch.bytes.lock().unwrap() = None;

    let state = h.machine.handle(document(BUYER, "check.pdf")).await;

    assert_eq!(state, awaiting_payment(1));
    assert_eq!(h.messenger.texts_to(BUYER), vec![texts::TECHNICAL_ERROR.to_string()]);
}

#[tokio::test]
async fn the_same_receipt_cannot_be_used_twice() {
    let h = harness();
    h.seed(BUYER, awaiting_payment(2)).await;
    h.machine.handle(document(BUYER, "check.pdf")).await;

    let other = 77;
    h.seed(other, awaiting_payment(2)).await;
    let state = h.machine.handle(document(other, "check.pdf")).await;

    assert_eq!(state, awaiting_payment(2));
    assert_eq!(h.records.entries.lock().unwrap().len(), 6);
    assert_eq!(h.messenger.texts_to(other), vec![texts::RECEIPT_REUSED.to_string()]);
}

#[tokio::test]
async fn failed_ticket_insert_leaves_the_user_unpaid() {
    let h = harness();
    h.seed(BUYER, awaiting_payment(1)).await;
    h.records.fail_lottery.store(true, Ordering::SeqCst);

    let state = h.machine.handle(document(BUYER, "check.pdf")).await;

    assert_eq!(state, awaiting_payment(1));
    assert_eq!(h.messenger.texts_to(BUYER), vec![texts::TECHNICAL_ERROR.to_string()]);
}

#[tokio::test]
async fn ticket_clash_is_redrawn_until_the_batch_is_stored() {
    let h = harness();
    h.seed(BUYER, awaiting_payment(1)).await;
    h.records.ticket_clashes.store(2, Ordering::SeqCst);

    let state = h.machine.handle(document(BUYER, "check.pdf")).await;

    assert_eq!(state.phase, Phase::AwaitingContact);
    assert!(state.is_paid);
    assert_eq!(h.records.lottery_calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.records.entries.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn endless_ticket_clashes_give_up_and_leave_the_user_unpaid() {
    let h = harness();
    h.seed(BUYER, awaiting_payment(1)).await;
    h.records.ticket_clashes.store(usize::MAX, Ordering::SeqCst);

    let state = h.machine.handle(document(BUYER, "check.pdf")).await;

    assert_eq!(state, awaiting_payment(1));
    assert_eq!(h.records.lottery_calls.load(Ordering::SeqCst), 5);
    assert!(h.records.entries.lock().unwrap().is_empty());
    assert_eq!(h.messenger.texts_to(BUYER), vec![texts::TECHNICAL_ERROR.to_string()]);
}

#[tokio::test]
async fn receipt_claimed_concurrently_is_refused_at_insert() {
    let h = harness();
    h.seed(BUYER, awaiting_payment(1)).await;
    // Someone else's batch for the same file commits between the lookup and the insert.
    let bytes = h.fetch.bytes.lock().unwrap().clone().unwrap();
    h.records
        .claimed_elsewhere
        .lock()
        .unwrap()
        .insert(crate::receipt::fingerprint(&bytes));

    let state = h.machine.handle(document(BUYER, "check.pdf")).await;

    assert_eq!(state, awaiting_payment(1));
    assert!(h.records.entries.lock().unwrap().is_empty());
    assert_eq!(h.messenger.texts_to(BUYER), vec![texts::RECEIPT_REUSED.to_string()]);
}

#[tokio::test]
async fn shared_contact_creates_one_client_and_asks_for_the_address() {
    let h = harness();
    h.seed(BUYER, awaiting_contact()).await;

    let contact = event(
        BUYER,
        EventKind::Contact {
            phone: "+77011234567".into(),
        },
    );
    let state = h.machine.handle(contact.clone()).await;

    assert_eq!(state.phase, Phase::AwaitingContact);
    assert_eq!(state.contact.as_deref(), Some("+77011234567"));
    assert!(state.is_paid);

    let clients = h.records.clients.lock().unwrap().clone();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].contact, "+77011234567");
    assert_eq!(clients[0].first_name, "Аружан");

    let Some(ReplyMarkup::Inline(kb)) = h.messenger.last_to(BUYER).markup else {
        panic!("delivery prompt must carry the form link");
    };
    assert_eq!(kb.rows[0][0].label, texts::ENTER_ADDRESS_LABEL);

    h.machine.handle(contact).await;
    assert_eq!(h.records.clients.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn message_without_contact_reprompts() {
    let h = harness();
    h.seed(BUYER, awaiting_contact()).await;

    let state = h.machine.handle(text(BUYER, "+77011234567")).await;

    assert_eq!(state, awaiting_contact());
    assert!(state.contact.is_none());
    assert_eq!(h.messenger.texts_to(BUYER), vec![texts::CONTACT_REPROMPT.to_string()]);
    assert!(h.records.clients.lock().unwrap().is_empty());
}

// ============== Store failures ==============

#[tokio::test]
async fn unreadable_state_falls_back_to_start_without_overwriting() {
    let h = harness();
    h.seed(BUYER, awaiting_payment(3)).await;
    h.states.fail_get.store(true, Ordering::SeqCst);

    let state = h.machine.handle(text(BUYER, "hi")).await;

    assert_eq!(state.phase, Phase::Start);
    assert_eq!(h.states.puts.load(Ordering::SeqCst), 0);
    assert_eq!(h.stored(BUYER).await, Some(awaiting_payment(3)));
    assert!(h.messenger.last_to(BUYER).content.text().unwrap().contains("теңгеге"));
}

// A write failure is swallowed: the reply already went out and the returned state reflects
// the decision, but the next event re-observes the stale stored state.
#[tokio::test]
async fn failed_state_write_is_swallowed_and_next_event_sees_stale_state() {
    let h = harness();
    h.states.fail_put.store(true, Ordering::SeqCst);

    let state = h.machine.handle(button(BUYER, ButtonAction::Buy)).await;
    assert_eq!(state.phase, Phase::AwaitingQuantity);
    assert_eq!(h.messenger.texts_to(BUYER), vec![texts::QUANTITY_PROMPT.to_string()]);
    assert_eq!(h.stored(BUYER).await, None);

    h.states.fail_put.store(false, Ordering::SeqCst);
    let state = h
        .machine
        .handle(button(BUYER, ButtonAction::Quantity(2)))
        .await;
    assert_eq!(state.phase, Phase::Start);
}

// ============== Admin panel ==============

#[tokio::test]
async fn admin_command_opens_the_panel_from_any_phase() {
    let h = harness();
    h.seed(ADMIN, awaiting_payment(2)).await;

    let state = h
        .machine
        .handle(event(
            ADMIN,
            EventKind::Command {
                name: "admin".into(),
                args: String::new(),
            },
        ))
        .await;

    assert_eq!(state, ConversationState::in_phase(Phase::AdminPanel));
    let msg = h.messenger.last_to(ADMIN);
    assert_eq!(msg.content.text(), Some(texts::ADMIN_WELCOME));
    assert!(matches!(msg.markup, Some(ReplyMarkup::Reply(_))));
}

#[tokio::test]
async fn non_admin_cannot_open_or_stay_in_the_panel() {
    let h = harness();
    let cmd = EventKind::Command {
        name: "admin".into(),
        args: String::new(),
    };
    let state = h.machine.handle(event(BUYER, cmd)).await;
    assert_eq!(state.phase, Phase::Start);

    h.seed(BUYER, ConversationState::in_phase(Phase::AdminPanel))
        .await;
    let state = h
        .machine
        .handle(menu(BUYER, MenuIntent::Admin(AdminIntent::Money)))
        .await;
    assert_eq!(state.phase, Phase::Start);
    assert_eq!(h.stored(BUYER).await, None);
}

#[tokio::test]
async fn admin_reports_use_record_stats() {
    let h = harness();
    h.seed(BUYER, awaiting_payment(3)).await;
    h.machine.handle(document(BUYER, "check.pdf")).await;
    h.seed(ADMIN, ConversationState::in_phase(Phase::AdminPanel))
        .await;

    let state = h
        .machine
        .handle(menu(ADMIN, MenuIntent::Admin(AdminIntent::Money)))
        .await;
    assert_eq!(state.phase, Phase::AdminPanel);
    let money = h.messenger.last_to(ADMIN).content.text().unwrap().to_string();
    assert!(money.contains("Сатылған жиынтық: 3"));
    assert!(money.contains("56 700 ₸"));

    h.machine
        .handle(menu(ADMIN, MenuIntent::Admin(AdminIntent::Lottery)))
        .await;
    let lottery = h.messenger.last_to(ADMIN).content.text().unwrap().to_string();
    assert!(lottery.contains("Билеттер: 9"));
    assert!(lottery.contains("Қатысушылар: 1"));

    h.machine
        .handle(menu(ADMIN, MenuIntent::Admin(AdminIntent::Gift)))
        .await;
    let gift = h.messenger.last_to(ADMIN).content.text().unwrap().to_string();
    assert!(gift.contains(&format!("Пайдаланушы: {BUYER}")));
    let actions = h.records.actions.lock().unwrap().clone();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].action, "gift");
}

#[tokio::test]
async fn unknown_admin_input_keeps_the_panel_open() {
    let h = harness();
    h.seed(ADMIN, ConversationState::in_phase(Phase::AdminPanel))
        .await;

    let state = h.machine.handle(text(ADMIN, "what?")).await;

    assert_eq!(state.phase, Phase::AdminPanel);
    assert_eq!(h.messenger.texts_to(ADMIN), vec![texts::ADMIN_UNKNOWN.to_string()]);
}

#[tokio::test]
async fn closing_the_panel_forgets_the_state() {
    let h = harness();
    h.seed(ADMIN, ConversationState::in_phase(Phase::AdminPanel))
        .await;

    let state = h
        .machine
        .handle(menu(ADMIN, MenuIntent::Admin(AdminIntent::Close)))
        .await;

    assert_eq!(state, ConversationState::default());
    assert_eq!(h.stored(ADMIN).await, None);
    assert_eq!(h.messenger.last_to(ADMIN).markup, Some(ReplyMarkup::Remove));
}

#[tokio::test]
async fn admin_media_outside_compose_echoes_the_file_id() {
    let h = harness();
    h.seed(ADMIN, ConversationState::in_phase(Phase::AdminPanel))
        .await;

    let state = h
        .machine
        .handle(event(
            ADMIN,
            EventKind::Media(Media::Video {
                file_id: "BAACAgIAAx".into(),
                caption: None,
            }),
        ))
        .await;

    assert_eq!(state.phase, Phase::AdminPanel);
    let echo = h.messenger.last_to(ADMIN);
    assert!(echo.content.text().unwrap().contains("BAACAgIAAx"));
}

#[tokio::test]
async fn full_broadcast_flow_reaches_the_chosen_audience() {
    let h = harness();
    h.audiences.groups.lock().unwrap().extend([
        (Audience::All, vec![UserId(10), UserId(11), UserId(12)]),
        (Audience::Clients, vec![UserId(10), UserId(11)]),
    ]);
    h.seed(ADMIN, ConversationState::in_phase(Phase::AdminPanel))
        .await;

    let state = h
        .machine
        .handle(menu(ADMIN, MenuIntent::Admin(AdminIntent::Broadcast)))
        .await;
    assert_eq!(
        state,
        ConversationState::in_phase(Phase::AdminBroadcastCompose)
    );
    let overview = h.messenger.last_to(ADMIN).content.text().unwrap().to_string();
    assert!(overview.contains("Барлық пайдаланушылар: 3"));
    assert!(overview.contains("Клиенттер: 2"));

    // A payload before choosing the audience only re-asks for it.
    let state = h.machine.handle(text(ADMIN, "Жаңа жиынтық!")).await;
    assert_eq!(state.broadcast_audience, None);
    assert_eq!(
        h.messenger.last_to(ADMIN).content.text(),
        Some(texts::PICK_AUDIENCE_FIRST)
    );

    let state = h
        .machine
        .handle(menu(ADMIN, MenuIntent::PickAudience(Audience::Clients)))
        .await;
    assert_eq!(state.phase, Phase::AdminBroadcastCompose);
    assert_eq!(state.broadcast_audience, Some(Audience::Clients));

    h.messenger.clear();
    let state = h
        .machine
        .handle(event(
            ADMIN,
            EventKind::Media(Media::Photo {
                file_id: "AgACAgIAAx".into(),
                caption: Some("Жаңа жиынтық!".into()),
            }),
        ))
        .await;
    assert_eq!(state, ConversationState::in_phase(Phase::AdminPanel));

    for user in [10, 11] {
        let got = h.messenger.sent_to(user);
        assert_eq!(got.len(), 1);
        assert!(matches!(&got[0].content, Content::Photo { file_id, .. } if file_id == "AgACAgIAAx"));
    }
    assert!(h.messenger.sent_to(12).is_empty());

    let edits = h.messenger.edits.lock().unwrap().clone();
    let summary = edits.last().unwrap();
    assert!(summary.contains("✅ Сәтті: 2"));
    assert!(summary.contains("Барлық клиенттер"));

    let actions = h.records.actions.lock().unwrap().clone();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].action, "broadcast");
    assert!(actions[0].details.contains("audience=clients"));
    assert_eq!(
        h.messenger.last_to(ADMIN).content.text(),
        Some(texts::ADMIN_WELCOME)
    );
}

#[tokio::test]
async fn empty_audience_returns_to_the_panel() {
    let h = harness();
    h.seed(
        ADMIN,
        ConversationState {
            broadcast_audience: Some(Audience::LotteryParticipants),
            ..ConversationState::in_phase(Phase::AdminBroadcastCompose)
        },
    )
    .await;

    let state = h.machine.handle(text(ADMIN, "hello")).await;

    assert_eq!(state.phase, Phase::AdminPanel);
    assert!(h
        .messenger
        .texts_to(ADMIN)
        .contains(&texts::NO_RECIPIENTS.to_string()));
    assert!(h.records.actions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn back_from_compose_returns_to_the_panel() {
    let h = harness();
    h.seed(
        ADMIN,
        ConversationState {
            broadcast_audience: Some(Audience::All),
            ..ConversationState::in_phase(Phase::AdminBroadcastCompose)
        },
    )
    .await;

    let state = h.machine.handle(menu(ADMIN, MenuIntent::Back)).await;

    assert_eq!(state, ConversationState::in_phase(Phase::AdminPanel));
    assert!(h.messenger.edits.lock().unwrap().is_empty());
}

// ============== Delivery ==============

fn form(user: i64) -> DeliveryForm {
    DeliveryForm {
        user_id: UserId(user),
        full_name: "Аружан Сейітова".into(),
        contact: "+77011234567".into(),
        address: "Алматы, Абай 10".into(),
        latitude: None,
        longitude: None,
    }
}

#[tokio::test]
async fn completed_delivery_is_saved_confirmed_and_resets_the_conversation() {
    let h = harness();
    h.seed(BUYER, awaiting_contact()).await;
    h.machine
        .handle(event(
            BUYER,
            EventKind::Contact {
                phone: "+77011234567".into(),
            },
        ))
        .await;
    h.messenger.clear();

    h.machine.complete_delivery(form(BUYER)).await.unwrap();

    let saved = h.records.deliveries.lock().unwrap().clone();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].address, "Алматы, Абай 10");
    assert_eq!((saved[0].latitude, saved[0].longitude), (43.238949, 76.889709));

    let sent = h.messenger.sent_to(BUYER);
    assert_eq!(sent.len(), 2);
    assert!(matches!(sent[0].content, Content::Location { .. }));
    let confirmation = sent[1].content.text().unwrap();
    assert!(confirmation.contains("Ваш заказ подтвержден"));
    assert!(confirmation.contains("Тапсырысыңыз расталды"));

    assert_eq!(h.stored(BUYER).await, None);
}

#[tokio::test]
async fn delivery_requires_a_client_and_complete_fields() {
    let h = harness();

    let err = h.machine.complete_delivery(form(BUYER)).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let mut blank = form(BUYER);
    blank.address = "   ".into();
    let err = h.machine.complete_delivery(blank).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    assert!(h.records.deliveries.lock().unwrap().is_empty());
    assert_eq!(
        h.messenger.texts_to(BUYER),
        vec![texts::DELIVERY_REJECTED.to_string(); 2]
    );
}

#[tokio::test]
async fn failed_delivery_save_reports_a_technical_error_and_keeps_the_state() {
    let h = harness();
    h.seed(BUYER, awaiting_contact()).await;
    h.machine
        .handle(event(
            BUYER,
            EventKind::Contact {
                phone: "+77011234567".into(),
            },
        ))
        .await;
    let before = h.stored(BUYER).await;
    h.messenger.clear();
    h.records.fail_delivery.store(true, Ordering::SeqCst);

    let err = h.machine.complete_delivery(form(BUYER)).await.unwrap_err();

    assert!(matches!(err, Error::Storage(_)));
    assert_eq!(h.messenger.texts_to(BUYER), vec![texts::TECHNICAL_ERROR.to_string()]);
    assert_eq!(h.stored(BUYER).await, before);
}

#[tokio::test]
async fn malformed_form_is_answered_with_a_resubmit_request() {
    let h = harness();

    let err = Error::Validation("malformed delivery form: expected value".into());
    h.machine.reject_delivery(UserId(BUYER), &err).await;

    assert_eq!(h.messenger.texts_to(BUYER), vec![texts::DELIVERY_REJECTED.to_string()]);
}
