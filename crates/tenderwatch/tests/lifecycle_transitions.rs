use std::env;
use std::sync::Arc;

use anyhow::Result;
use tokio::runtime::Runtime;

use tenderwatch_core::actions::CallbackAction;
use tenderwatch_core::config::{AppConfig, Operator, RoleTable};
use tenderwatch_core::db::{self, DbPool};
use tenderwatch_core::dispatch::Dispatcher;
use tenderwatch_core::lifecycle::{ClaimOutcome, Lifecycle, TransitionOutcome};
use tenderwatch_core::mirror::RecordingMirror;
use tenderwatch_core::notifier::Notifier;
use tenderwatch_core::reminders::DeadlineScheduler;
use tenderwatch_core::sessions::InMemorySessions;
use tenderwatch_core::store::{actions, announcements};
use tenderwatch_core::transport::{InboundEvent, RecordingTransport, SentItem};
use tenderwatch_core::types::{
    ActionKind, AnnouncementStatus, Lot, NewAnnouncement,
};

fn test_config() -> AppConfig {
    let mut config = AppConfig::from_toml(
        r#"
        keywords = ["аренда"]
        admin_chat_id = 9001
        coordinator_chat_id = 9002

        [source]
        base_url = "https://example.invalid/v3"

        [[operators]]
        id = 1
        name = "Айгерим"
        chat_id = 1001
        regions = ["г. Алматы"]
        keywords = ["аренда"]

        [[operators]]
        id = 2
        name = "Данияр"
        chat_id = 1002
        regions = ["г. Алматы"]
        keywords = ["аренда"]
        "#,
    )
    .expect("test config parses");
    config.notify_delay_ms = 0;
    // Disable quiet hours so the sweep always runs in this suite.
    config.quiet_hours.start_hour = 0;
    config.quiet_hours.end_hour = 0;
    config
}

struct Ctx {
    config: Arc<AppConfig>,
    roles: Arc<RoleTable>,
    transport: Arc<RecordingTransport>,
    mirror: Arc<RecordingMirror>,
    lifecycle: Arc<Lifecycle>,
    notifier: Arc<Notifier>,
}

fn build_ctx(pool: &DbPool) -> Ctx {
    let config = Arc::new(test_config());
    let roles = Arc::new(config.role_table());
    let transport = Arc::new(RecordingTransport::new());
    let mirror = Arc::new(RecordingMirror::new());
    let notifier = Arc::new(Notifier::new(
        transport.clone(),
        config.admin_chat_id,
        config.coordinator_chat_id,
    ));
    let lifecycle = Arc::new(Lifecycle::new(
        pool.clone(),
        notifier.clone(),
        mirror.clone(),
        config.timezone,
    ));
    Ctx {
        config,
        roles,
        transport,
        mirror,
        lifecycle,
        notifier,
    }
}

fn dispatcher(pool: &DbPool, ctx: &Ctx, transport: Arc<RecordingTransport>) -> Dispatcher {
    Dispatcher::new(
        pool.clone(),
        ctx.config.clone(),
        ctx.roles.clone(),
        transport,
        Arc::new(InMemorySessions::new()),
        ctx.lifecycle.clone(),
    )
}

fn operator(ctx: &Ctx, id: i64) -> Operator {
    ctx.roles
        .operator_by_id(id)
        .expect("operator configured")
        .clone()
}

fn lead(number: &str, assignment: Option<(i64, String)>, lots: Vec<Lot>) -> NewAnnouncement {
    NewAnnouncement {
        announcement_number: number.to_string(),
        announcement_url: None,
        organization_name: Some("ТОО Заказчик".into()),
        organization_bin: None,
        legal_address: None,
        region: Some("г. Алматы".into()),
        lots,
        procurement_method: None,
        keyword_matched: Some("аренда".into()),
        assignment,
        application_deadline: None,
    }
}

fn lot(number: &str, name: &str) -> Lot {
    Lot {
        number: Some(number.to_string()),
        name: name.to_string(),
        description: String::new(),
        keyword: "аренда".to_string(),
    }
}

async fn reset(pool: &DbPool) -> Result<()> {
    sqlx::query(
        "TRUNCATE TABLE manager_actions, announcements, parsing_logs RESTART IDENTITY CASCADE",
    )
    .execute(pool)
    .await?;
    Ok(())
}

#[test]
fn lifecycle_state_machine_properties() -> Result<()> {
    let database_url = match env::var("TENDERWATCH_TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping lifecycle integration test because TENDERWATCH_TEST_DATABASE_URL is not set"
            );
            return Ok(());
        }
    };

    let rt = Runtime::new()?;
    rt.block_on(async move {
        let pool = db::connect(&database_url).await?;
        db::run_migrations(&pool).await?;

        accept_enforces_ownership_and_fans_out(&pool).await?;
        reject_captures_next_message_as_reason(&pool).await?;
        claim_race_has_exactly_one_winner(&pool).await?;
        expiry_preempts_operator_actions(&pool).await?;
        participation_survives_restart(&pool).await?;
        status_invariant_holds(&pool).await?;

        Ok::<_, anyhow::Error>(())
    })?;
    Ok(())
}

async fn accept_enforces_ownership_and_fans_out(pool: &DbPool) -> Result<()> {
    reset(pool).await?;
    let ctx = build_ctx(pool);
    let op1 = operator(&ctx, 1);
    let op2 = operator(&ctx, 2);

    let created =
        announcements::create(pool, &lead("LC-1", Some((1, op1.name.clone())), vec![lot("1", "Лот")]))
            .await?;

    // Not the assignee: the race-shaped outcome, not an error.
    assert!(matches!(
        ctx.lifecycle.accept(&op2, created.id).await?,
        TransitionOutcome::NotFound
    ));

    let outcome = ctx.lifecycle.accept(&op1, created.id).await?;
    let TransitionOutcome::Done(accepted) = outcome else {
        panic!("owner accept must succeed");
    };
    assert_eq!(accepted.status, AnnouncementStatus::Accepted);
    assert!(accepted.response_at.is_some());

    // Second accept finds nothing pending.
    assert!(matches!(
        ctx.lifecycle.accept(&op1, created.id).await?,
        TransitionOutcome::NotFound
    ));

    // Admin and coordinator each got their own notification.
    assert_eq!(ctx.transport.messages_to(9001).await.len(), 1);
    assert_eq!(ctx.transport.messages_to(9002).await.len(), 1);

    // Mirror saw the accepted row, best-effort after commit.
    let rows = ctx.mirror.rows().await;
    assert_eq!(rows.last().map(|r| r.status.as_str()), Some("Принято"));

    let audit = actions::by_announcement(pool, created.id).await?;
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, ActionKind::Accepted);
    assert_eq!(audit[0].manager_id, 1);

    Ok(())
}

async fn reject_captures_next_message_as_reason(pool: &DbPool) -> Result<()> {
    reset(pool).await?;
    let ctx = build_ctx(pool);
    let op1 = operator(&ctx, 1);

    let created =
        announcements::create(pool, &lead("LC-2", Some((1, op1.name.clone())), vec![lot("1", "Лот")]))
            .await?;

    let d = dispatcher(pool, &ctx, ctx.transport.clone());
    d.handle(InboundEvent::Callback {
        chat: 1001,
        message_id: 10,
        callback_id: "cb-r".into(),
        token: CallbackAction::Reject(created.id).encode(),
    })
    .await?;

    // The prompt went out; the next free-text message is the reason.
    let prompts = ctx.transport.messages_to(1001).await;
    assert!(prompts.iter().any(|m| m.contains("причину отказа")));

    d.handle(InboundEvent::Text {
        chat: 1001,
        message_id: 11,
        text: "слишком сжатые сроки".into(),
    })
    .await?;

    let rejected = announcements::get(pool, created.id).await?.expect("present");
    assert_eq!(rejected.status, AnnouncementStatus::Rejected);
    assert_eq!(
        rejected.rejection_reason.as_deref(),
        Some("слишком сжатые сроки")
    );
    assert!(rejected.response_at.is_some());

    let audit = actions::by_announcement(pool, created.id).await?;
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, ActionKind::Rejected);
    assert_eq!(audit[0].comment.as_deref(), Some("слишком сжатые сроки"));

    // Admin learned about the rejection.
    assert!(ctx
        .transport
        .messages_to(9001)
        .await
        .iter()
        .any(|m| m.contains("отклонено") || m.contains("Отклонено")));

    Ok(())
}

async fn claim_race_has_exactly_one_winner(pool: &DbPool) -> Result<()> {
    reset(pool).await?;
    let ctx = build_ctx(pool);
    let op1 = operator(&ctx, 1);
    let op2 = operator(&ctx, 2);

    let shared = announcements::create(pool, &lead("LC-3", None, vec![lot("1", "Лот")])).await?;
    assert_eq!(shared.assigned_manager_id, None);

    let (first, second) = tokio::join!(
        ctx.lifecycle.claim(&op1, shared.id),
        ctx.lifecycle.claim(&op2, shared.id)
    );
    let outcomes = [first?, second?];

    let winners = outcomes
        .iter()
        .filter(|o| matches!(o, ClaimOutcome::Claimed(_)))
        .count();
    let losers = outcomes
        .iter()
        .filter(|o| matches!(o, ClaimOutcome::AlreadyClaimed))
        .count();
    assert_eq!(winners, 1, "exactly one claim must win");
    assert_eq!(losers, 1, "the other claim must be told it lost");

    let after = announcements::get(pool, shared.id).await?.expect("present");
    assert!(after.assigned_manager_id.is_some());
    assert_eq!(after.status, AnnouncementStatus::Pending);

    // The lead now behaves as a normal single-operator announcement.
    let winner_id = after.assigned_manager_id.expect("assigned");
    let winner = operator(&ctx, winner_id);
    assert!(matches!(
        ctx.lifecycle.accept(&winner, shared.id).await?,
        TransitionOutcome::Done(_)
    ));

    Ok(())
}

async fn expiry_preempts_operator_actions(pool: &DbPool) -> Result<()> {
    reset(pool).await?;
    let ctx = build_ctx(pool);
    let op1 = operator(&ctx, 1);

    let mut stale = lead("LC-4", Some((1, op1.name.clone())), vec![lot("1", "Лот")]);
    let now_local = chrono::Utc::now()
        .with_timezone(&ctx.config.timezone)
        .naive_local();
    stale.application_deadline = Some(now_local - chrono::Duration::hours(5));
    let created = announcements::create(pool, &stale).await?;

    let sweeper = DeadlineScheduler::new(
        pool.clone(),
        ctx.config.clone(),
        ctx.roles.clone(),
        ctx.notifier.clone(),
    );
    let summary = sweeper.run_once().await?;
    assert!(!summary.skipped_quiet);
    assert_eq!(summary.expired, 1);

    let expired = announcements::get(pool, created.id).await?.expect("present");
    assert_eq!(expired.status, AnnouncementStatus::Expired);
    assert!(expired.expired_at.is_some());

    // The operator's late accept reads as not-found.
    assert!(matches!(
        ctx.lifecycle.accept(&op1, created.id).await?,
        TransitionOutcome::NotFound
    ));

    // Sweeping again changes nothing.
    let again = sweeper.run_once().await?;
    assert_eq!(again.expired, 0);

    Ok(())
}

async fn participation_survives_restart(pool: &DbPool) -> Result<()> {
    reset(pool).await?;
    let ctx = build_ctx(pool);
    let op1 = operator(&ctx, 1);

    let created = announcements::create(
        pool,
        &lead(
            "ANN-001",
            Some((1, op1.name.clone())),
            vec![lot("1", "Лот A"), lot("2", "Лот B")],
        ),
    )
    .await?;
    assert!(matches!(
        ctx.lifecycle.accept(&op1, created.id).await?,
        TransitionOutcome::Done(_)
    ));

    let d1 = dispatcher(pool, &ctx, ctx.transport.clone());
    d1.handle(InboundEvent::Callback {
        chat: 1001,
        message_id: 20,
        callback_id: "cb-p1".into(),
        token: CallbackAction::Process(created.id).encode(),
    })
    .await?;
    d1.handle(InboundEvent::Callback {
        chat: 1001,
        message_id: 20,
        callback_id: "cb-p2".into(),
        token: CallbackAction::SelectLot(created.id, 0).encode(),
    })
    .await?;
    d1.handle(InboundEvent::Text {
        chat: 1001,
        message_id: 21,
        text: "foo".into(),
    })
    .await?;

    // Entry captured into the draft and the raw message discarded.
    let mid_flight = announcements::get(pool, created.id).await?.expect("present");
    assert_eq!(
        mid_flight.participation_details_draft.as_deref(),
        Some("Лот 1: foo")
    );
    assert!(ctx
        .transport
        .sent()
        .await
        .contains(&SentItem::Delete { chat: 1001, message: 21 }));

    // Process restart: sessions are gone, a fresh dispatcher recovers the
    // progress from the persisted draft.
    let transport2 = Arc::new(RecordingTransport::new());
    let d2 = dispatcher(pool, &ctx, transport2.clone());
    d2.handle(InboundEvent::Callback {
        chat: 1001,
        message_id: 30,
        callback_id: "cb-p3".into(),
        token: CallbackAction::Process(created.id).encode(),
    })
    .await?;

    // Only lot B is offered (plus the cancel row).
    let selection = transport2
        .sent()
        .await
        .into_iter()
        .find_map(|item| match item {
            SentItem::Message { chat: 1001, keyboard: Some(k), .. } => Some(k),
            _ => None,
        })
        .expect("selection keyboard sent");
    assert_eq!(selection.rows.len(), 2);
    assert_eq!(
        selection.rows[0][0].action,
        CallbackAction::SelectLot(created.id, 1)
    );

    d2.handle(InboundEvent::Callback {
        chat: 1001,
        message_id: 30,
        callback_id: "cb-p4".into(),
        token: CallbackAction::SelectLot(created.id, 1).encode(),
    })
    .await?;
    d2.handle(InboundEvent::Text {
        chat: 1001,
        message_id: 31,
        text: "bar".into(),
    })
    .await?;

    let finalized = announcements::get(pool, created.id).await?.expect("present");
    assert!(finalized.is_processed);
    assert_eq!(finalized.participation_details_draft, None);
    assert_eq!(
        finalized.participation_details.as_deref(),
        Some("Лот 1: Лот A\nfoo\n\nЛот 2: Лот B\nbar")
    );

    let audit = actions::by_announcement(pool, created.id).await?;
    let kinds: Vec<ActionKind> = audit.iter().map(|a| a.action).collect();
    assert!(kinds.contains(&ActionKind::Accepted));
    assert!(kinds.contains(&ActionKind::Processed));

    Ok(())
}

async fn status_invariant_holds(pool: &DbPool) -> Result<()> {
    // Whatever the earlier scenarios left behind must satisfy the at-rest
    // invariants.
    let violations: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM announcements
        WHERE status NOT IN ('pending', 'accepted', 'rejected', 'expired')
           OR ((status IN ('accepted', 'rejected')) != (response_at IS NOT NULL))
           OR ((status = 'expired') != (expired_at IS NOT NULL))
           OR (rejection_reason IS NOT NULL AND status != 'rejected')
        "#,
    )
    .fetch_one(pool)
    .await?;
    assert_eq!(violations, 0);
    Ok(())
}
