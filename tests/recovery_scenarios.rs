//! End-to-end reconciliation passes over an in-memory ledger, a scripted
//! exchange and a snapshot file in a temp directory. A "restart" is a fresh
//! registry and engine over the same ledger and snapshot.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tradekeeper::{
    config::RegistryConfig,
    errors::{TradeKeeperError, TradeKeeperResult},
    exchange::{ExchangeClient, StaticExchange},
    ledger::TradeLedger,
    recovery::{ReconciliationEngine, RecoveryAction, RecoverySettings, RecoveryState},
    registry::PositionRegistry,
    snapshot::StateSnapshotStore,
    types::{ExchangePosition, OperationalPhase, SessionScope, Side, TradeOrigin},
};

struct World {
    ledger: Arc<TradeLedger>,
    snapshots: Arc<StateSnapshotStore>,
    _dir: tempfile::TempDir,
}

impl World {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self {
            ledger: Arc::new(TradeLedger::open_in_memory().unwrap()),
            snapshots: Arc::new(StateSnapshotStore::new(dir.path().join("state.json"))),
            _dir: dir,
        }
    }

    fn boot(&self, exchange: Arc<dyn ExchangeClient>) -> ReconciliationEngine {
        let registry = Arc::new(PositionRegistry::new(
            self.ledger.clone(),
            &RegistryConfig::default(),
        ));
        ReconciliationEngine::new(
            registry,
            self.snapshots.clone(),
            exchange,
            RecoverySettings::default(),
        )
    }
}

async fn recover(engine: &ReconciliationEngine) -> tradekeeper::recovery::RecoveryOutcome {
    let (needed, info) = engine.check_recovery_needed().unwrap();
    assert!(needed, "expected an unclean previous run: {}", info.reason);
    engine.execute_recovery(&info).await.unwrap()
}

fn btc() -> ExchangePosition {
    ExchangePosition::new("BTCUSDT", Side::Long, 0.01, 65000.0)
}

#[tokio::test]
async fn test_idle_crash_with_flat_exchange_keeps_seeking() {
    let world = World::new();
    world
        .snapshots
        .save_running(OperationalPhase::SeekingEntry, vec![], None)
        .unwrap();

    let engine = world.boot(Arc::new(StaticExchange::new(vec![])));
    let outcome = recover(&engine).await;

    assert!(outcome.success);
    assert_eq!(outcome.action, Some(RecoveryAction::ContinueSeeking));
    assert_eq!(outcome.phase, OperationalPhase::SeekingEntry);
    assert_eq!(world.ledger.count_trades(None).unwrap(), 0);
    // nothing to adopt, so no session was started
    assert!(outcome.session_id.is_none());
}

#[tokio::test]
async fn test_unknown_exchange_position_becomes_orphan() {
    let world = World::new();
    world
        .snapshots
        .save_running(OperationalPhase::SeekingEntry, vec![], None)
        .unwrap();

    let engine = world.boot(Arc::new(StaticExchange::new(vec![btc()])));
    let outcome = recover(&engine).await;

    assert!(outcome.success);
    assert_eq!(outcome.action, Some(RecoveryAction::SwitchToManaging));
    assert_eq!(outcome.phase, OperationalPhase::ManagingPositions);
    assert_eq!(outcome.orphans_created, 1);
    assert_eq!(engine.registry().len().await, 1);
    assert_eq!(
        world
            .ledger
            .count_trades(Some(TradeOrigin::RecoveryOrphan))
            .unwrap(),
        1
    );

    let snapshot = world.snapshots.load().unwrap().unwrap();
    assert_eq!(snapshot.phase(), OperationalPhase::ManagingPositions);
    assert_eq!(snapshot.active_trades.len(), 1);
    assert!(snapshot.active_trades[0].internal_id.is_some());
    assert_eq!(snapshot.session_id, outcome.session_id);
}

#[tokio::test]
async fn test_saved_trade_matches_within_tolerance() {
    let world = World::new();
    let session = world.ledger.start_session("SHIBUSDT", "", 1000.0).unwrap();

    // first run opens a position, heartbeats, then dies
    let first = world.boot(Arc::new(StaticExchange::new(vec![])));
    first.registry().bind_session(&session).await.unwrap();
    let id = first
        .registry()
        .open("SHIBUSDT", Side::Short, 750.0, 0.00002)
        .await
        .unwrap();
    world
        .snapshots
        .save_running(
            OperationalPhase::ManagingPositions,
            first.registry().snapshot_trades().await,
            Some(session.clone()),
        )
        .unwrap();
    drop(first);

    let engine = world.boot(Arc::new(StaticExchange::new(vec![ExchangePosition::new(
        "SHIBUSDT",
        Side::Short,
        753.0,
        0.00002,
    )])));
    let outcome = recover(&engine).await;

    assert!(outcome.success);
    assert_eq!(outcome.action, Some(RecoveryAction::ContinueNormal));
    assert_eq!(outcome.phase, OperationalPhase::ManagingPositions);
    assert_eq!(outcome.orphans_created, 0);
    assert_eq!(outcome.session_id, Some(session));
    assert_eq!(world.ledger.count_trades(None).unwrap(), 1);

    let tracked = engine.registry().snapshot().await;
    assert_eq!(tracked.len(), 1);
    assert_eq!(tracked[0].internal_id, Some(id));
    assert!(tracked[0].recovered);
}

#[tokio::test]
async fn test_position_closed_externally_is_flagged_not_closed() {
    let world = World::new();
    let session = world.ledger.start_session("ETHUSDT", "", 1000.0).unwrap();

    let first = world.boot(Arc::new(StaticExchange::new(vec![])));
    first.registry().bind_session(&session).await.unwrap();
    let id = first
        .registry()
        .open("ETHUSDT", Side::Long, 1.5, 3000.0)
        .await
        .unwrap();
    world
        .snapshots
        .save_running(
            OperationalPhase::ManagingPositions,
            first.registry().snapshot_trades().await,
            Some(session.clone()),
        )
        .unwrap();
    drop(first);

    let engine = world.boot(Arc::new(StaticExchange::new(vec![])));
    let outcome = recover(&engine).await;

    assert!(outcome.success);
    assert_eq!(outcome.action, Some(RecoveryAction::SwitchToSeeking));
    assert_eq!(outcome.phase, OperationalPhase::SeekingEntry);
    assert!(engine.registry().is_empty().await);

    let trade = world.ledger.get_trade(id).unwrap().unwrap();
    assert!(trade.is_open());
    assert!(trade.review_reason.is_some());
    assert_eq!(world.ledger.list_flagged_trades().unwrap().len(), 1);
}

#[tokio::test]
async fn test_exchange_outage_fails_pass_and_keeps_snapshot() {
    let world = World::new();
    world
        .snapshots
        .save_running(OperationalPhase::ManagingPositions, vec![], None)
        .unwrap();
    let before = world.snapshots.load().unwrap().unwrap();

    let exchange = Arc::new(StaticExchange::new(vec![btc()]));
    exchange.fail_next("503 Service Unavailable");
    let engine = world.boot(exchange.clone());
    let outcome = recover(&engine).await;

    assert!(!outcome.success);
    assert_eq!(outcome.final_state, RecoveryState::Failed);
    assert_eq!(outcome.phase, OperationalPhase::SeekingEntry);
    assert!(outcome.error.unwrap().contains("503"));
    assert_eq!(world.snapshots.load().unwrap().unwrap(), before);
    assert!(world.snapshots.should_auto_restart().unwrap());
    assert_eq!(world.ledger.count_trades(None).unwrap(), 0);

    // the next attempt goes through
    let outcome = recover(&engine).await;
    assert!(outcome.success);
    assert_eq!(outcome.phase, OperationalPhase::ManagingPositions);
    assert_eq!(exchange.call_count(), 2);
}

#[tokio::test]
async fn test_recovery_is_idempotent() {
    let world = World::new();
    world
        .snapshots
        .save_running(OperationalPhase::SeekingEntry, vec![], None)
        .unwrap();
    let exchange: Arc<dyn ExchangeClient> = Arc::new(StaticExchange::new(vec![
        btc(),
        ExchangePosition::new("SOLUSDT", Side::Short, 12.0, 150.0),
    ]));

    let engine = world.boot(exchange.clone());
    let first = recover(&engine).await;
    let trades_after_first = world.ledger.count_trades(None).unwrap();

    let second = recover(&engine).await;
    assert_eq!(second.phase, first.phase);
    assert_eq!(second.orphans_created, 0);
    assert_eq!(world.ledger.count_trades(None).unwrap(), trades_after_first);

    // and again after a restart
    let restarted = world.boot(exchange);
    let third = recover(&restarted).await;
    assert_eq!(third.phase, first.phase);
    assert_eq!(third.session_id, first.session_id);
    assert_eq!(world.ledger.count_trades(None).unwrap(), trades_after_first);
    assert_eq!(restarted.registry().len().await, 2);
}

#[tokio::test]
async fn test_each_orphan_gets_unique_ids_and_mapping() {
    let world = World::new();
    world
        .snapshots
        .save_running(OperationalPhase::SeekingEntry, vec![], None)
        .unwrap();
    let positions = vec![
        btc(),
        ExchangePosition::new("ETHUSDT", Side::Long, 2.0, 3000.0),
        ExchangePosition::new("ETHUSDT", Side::Short, 1.0, 3010.0),
        ExchangePosition::new("XRPUSDT", Side::Long, 400.0, 0.6),
    ];
    let engine = world.boot(Arc::new(StaticExchange::new(positions.clone())));

    let outcome = recover(&engine).await;
    assert_eq!(outcome.orphans_created, positions.len());
    assert_eq!(outcome.orphans_bound, positions.len());

    let trades = world.ledger.list_open_trades(&SessionScope::AnySession).unwrap();
    assert_eq!(trades.len(), positions.len());
    assert!(trades
        .iter()
        .all(|t| t.origin == TradeOrigin::RecoveryOrphan));

    let ids: HashSet<_> = trades.iter().map(|t| t.internal_id).collect();
    assert_eq!(ids.len(), positions.len());

    let mappings = world.ledger.list_mappings(100).unwrap();
    assert_eq!(mappings.len(), positions.len());
    let external: HashSet<_> = mappings.iter().map(|m| m.external_id.clone()).collect();
    assert_eq!(external.len(), positions.len());
    for trade in &trades {
        let mapped = world.ledger.resolve_external(trade.internal_id).unwrap();
        assert_eq!(mapped, trade.external_id);
    }
}

#[tokio::test]
async fn test_retried_exchange_sync_creates_no_duplicates() {
    let world = World::new();
    let session = world.ledger.start_session("MULTI", "", 0.0).unwrap();
    let registry = PositionRegistry::new(world.ledger.clone(), &RegistryConfig::default());
    let positions = vec![btc(), ExchangePosition::new("ETHUSDT", Side::Long, 2.0, 3000.0)];

    // unbound: orphans wait in memory
    let first = registry.sync_from_exchange(&positions).await.unwrap();
    let retry = registry.sync_from_exchange(&positions).await.unwrap();
    assert_eq!(first.created, 2);
    assert_eq!(retry.created, 0);
    assert_eq!(retry.matched, 2);
    assert_eq!(registry.pending_orphan_count().await, 2);

    // bound: orphans are persisted once
    assert_eq!(registry.bind_session(&session).await.unwrap(), 2);
    let retry = registry.sync_from_exchange(&positions).await.unwrap();
    assert_eq!(retry.created, 0);
    assert_eq!(world.ledger.count_trades(None).unwrap(), 2);
    assert_eq!(registry.len().await, 2);
}

#[tokio::test]
async fn test_quantity_conflict_needs_review_without_second_row() {
    let world = World::new();
    let session = world.ledger.start_session("BTCUSDT", "", 1000.0).unwrap();
    let id = world
        .ledger
        .add_trade(&session, "BTCUSDT", Side::Long, 65000.0, 0.01, TradeOrigin::Normal)
        .unwrap();
    world
        .snapshots
        .save_running(OperationalPhase::ManagingPositions, vec![], Some(session))
        .unwrap();

    // exchange holds five times what the ledger recorded
    let engine = world.boot(Arc::new(StaticExchange::new(vec![ExchangePosition::new(
        "BTCUSDT",
        Side::Long,
        0.05,
        65000.0,
    )])));

    for _ in 0..2 {
        let outcome = recover(&engine).await;
        assert!(outcome.success);
        assert_eq!(outcome.action, Some(RecoveryAction::ManualReviewNeeded));
        assert_eq!(outcome.phase, OperationalPhase::SeekingEntry);
        assert_eq!(outcome.orphans_created, 0);
    }

    let open = world
        .ledger
        .open_trades_for("BTCUSDT", Side::Long, &SessionScope::AnySession)
        .unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].internal_id, id);
    assert!(open[0].review_reason.is_some());
}

/// Holds every fetch long enough for a second pass to collide with it
struct SlowExchange {
    delay: Duration,
}

#[async_trait]
impl ExchangeClient for SlowExchange {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn list_open_positions(&self, _category: &str) -> TradeKeeperResult<Vec<ExchangePosition>> {
        tokio::time::sleep(self.delay).await;
        Ok(vec![])
    }
}

#[tokio::test]
async fn test_second_pass_is_rejected_while_first_runs() {
    let world = World::new();
    world
        .snapshots
        .save_running(OperationalPhase::SeekingEntry, vec![], None)
        .unwrap();
    let engine = Arc::new(world.boot(Arc::new(SlowExchange {
        delay: Duration::from_millis(300),
    })));
    let (_, info) = engine.check_recovery_needed().unwrap();

    let running = {
        let engine = engine.clone();
        let info = info.clone();
        tokio::spawn(async move { engine.execute_recovery(&info).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = engine.execute_recovery(&info).await.unwrap_err();
    assert!(matches!(err, TradeKeeperError::RecoveryInProgress));

    let outcome = running.await.unwrap().unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.action, Some(RecoveryAction::ContinueSeeking));
}

#[tokio::test]
async fn test_clean_stop_skips_recovery() {
    let world = World::new();
    world
        .snapshots
        .save_running(OperationalPhase::ManagingPositions, vec![], None)
        .unwrap();
    world.snapshots.mark_stopped_manually().unwrap();

    let exchange = Arc::new(StaticExchange::new(vec![btc()]));
    let engine = world.boot(exchange.clone());
    let (needed, info) = engine.check_recovery_needed().unwrap();
    assert!(!needed);

    let outcome = engine.execute_recovery(&info).await.unwrap();
    assert!(outcome.success);
    assert!(outcome.action.is_none());
    assert_eq!(outcome.phase, OperationalPhase::ManagingPositions);
    assert_eq!(exchange.call_count(), 0);
}
