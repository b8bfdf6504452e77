use std::sync::Arc;

use ordersync_core::{ChangeValue, OrderField, Unit};
use ordersync_engine::{EngineError, FlushReport, Refresh, RemoteError, SyncOutcome};
use ordersync_harness::{MockRemote, TestDevice, fixtures, init_tracing};

async fn device_with_pending_edits() -> Result<TestDevice, Box<dyn std::error::Error>> {
    let device = TestDevice::synced(fixtures::orders(5)).await?;
    let (a, b, c) = (fixtures::order_id(0), fixtures::order_id(1), fixtures::order_id(2));

    device.engine.record_change(&a, OrderField::Quantity, 7_i64).await?;
    device.engine.record_change(&a, OrderField::Name, "Rush order").await?;
    device.engine.record_change(&b, OrderField::Unit, Unit::Kg).await?;
    device.engine.record_change(&b, OrderField::Department, "Bakery").await?;
    device.engine.record_change(&c, OrderField::Quantity, "12").await?;
    assert_eq!(device.change_count().await?, 5);
    Ok(device)
}

#[tokio::test]
async fn flush_clears_exactly_its_batch() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let device = device_with_pending_edits().await?;

    let report = device.engine.flush().await?;
    assert_eq!(report.sent_changes, 5);
    assert_eq!(report.cleared_changes, 5);
    assert_eq!(report.refresh, Refresh::NotRequested);
    assert_eq!(device.remote.apply_count(), 1);
    assert_eq!(device.change_count().await?, 0);

    let ids: Vec<_> = report.orders.iter().map(|o| o.order_id.clone()).collect();
    assert_eq!(
        ids,
        vec![fixtures::order_id(0), fixtures::order_id(1), fixtures::order_id(2)]
    );
    assert_eq!(
        report.orders[0].changed_fields,
        vec![OrderField::Name, OrderField::Quantity]
    );
    assert_eq!(
        report.orders[1].changed_fields,
        vec![OrderField::Unit, OrderField::Department]
    );
    assert!(report.orders.iter().all(|o| o.diverged_fields.is_empty()));

    for id in &ids {
        let effective = device.engine.order(id).await?.ok_or("missing order")?;
        assert!(!effective.has_pending());
        assert_eq!(Some(effective.order), device.remote.order(id));
    }
    let c = device.effective(&fixtures::order_id(2)).await?.ok_or("missing")?;
    assert_eq!(c.quantity, 12);

    // Orders outside the batch keep their synced rows.
    assert_eq!(device.base(&fixtures::order_id(4)).await?, Some(fixtures::order(4)));
    Ok(())
}

#[tokio::test]
async fn edit_made_during_flush_stays_pending() -> Result<(), Box<dyn std::error::Error>> {
    let device = TestDevice::synced(fixtures::orders(2)).await?;
    let id = fixtures::order_id(0);
    device.engine.record_change(&id, OrderField::Quantity, 5_i64).await?;
    device.engine.record_change(&id, OrderField::Name, "Rush order").await?;

    device.remote.gate_applies();
    let engine = device.engine.clone();
    let flush = tokio::spawn(async move { engine.flush().await });
    while device.remote.apply_count() == 0 {
        tokio::task::yield_now().await;
    }

    // The batch carrying quantity 5 is in flight.
    device.engine.record_change(&id, OrderField::Quantity, 9_i64).await?;
    device.remote.open_applies();

    let report = flush.await??;
    assert_eq!(report.sent_changes, 2);
    assert_eq!(report.cleared_changes, 1);

    let pending = device.engine.pending_changes().await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].field, OrderField::Quantity);
    assert_eq!(pending[0].value, ChangeValue::Integer(9));

    let base = device.base(&id).await?.ok_or("missing")?;
    assert_eq!(base.quantity, 5);
    assert_eq!(base.name, "Rush order");
    let effective = device.effective(&id).await?.ok_or("missing")?;
    assert_eq!(effective.quantity, 9);
    Ok(())
}

#[tokio::test]
async fn short_response_keeps_every_change() -> Result<(), Box<dyn std::error::Error>> {
    let device = device_with_pending_edits().await?;
    let before = device.base_orders().await?;
    device.remote.truncate_apply_response(2);

    let err = device.engine.flush().await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::FlushMismatch {
            expected: 3,
            received: 2
        }
    ));
    assert_eq!(device.change_count().await?, 5);
    assert_eq!(device.base_orders().await?, before);
    Ok(())
}

#[tokio::test]
async fn failed_request_keeps_every_change() -> Result<(), Box<dyn std::error::Error>> {
    let device = device_with_pending_edits().await?;
    device.remote.fail_next_apply();

    let err = device.engine.flush().await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Remote(RemoteError::Status { status: 500, .. })
    ));
    assert_eq!(device.change_count().await?, 5);

    // Nothing was lost; the retry goes through.
    let report = device.engine.flush().await?;
    assert_eq!(report.cleared_changes, 5);
    assert_eq!(device.remote.apply_count(), 2);
    Ok(())
}

#[tokio::test]
async fn empty_log_makes_no_request() -> Result<(), Box<dyn std::error::Error>> {
    let device = TestDevice::synced(fixtures::orders(2)).await?;

    let report = device.engine.flush().await?;
    assert_eq!(
        report,
        FlushReport {
            sent_changes: 0,
            cleared_changes: 0,
            orders: Vec::new(),
            refresh: Refresh::NotRequested,
        }
    );
    assert_eq!(device.remote.apply_count(), 0);
    Ok(())
}

#[tokio::test]
async fn server_normalisation_is_reported_and_wins() -> Result<(), Box<dyn std::error::Error>> {
    let device = TestDevice::synced(fixtures::orders(1)).await?;
    let id = fixtures::order_id(0);
    device.remote.on_apply(|order| order.quantity = order.quantity.min(10));

    device.engine.record_change(&id, OrderField::Quantity, 50_i64).await?;
    device.engine.record_change(&id, OrderField::Name, "Bulk").await?;
    let report = device.engine.flush().await?;

    assert_eq!(
        report.orders[0].changed_fields,
        vec![OrderField::Name, OrderField::Quantity]
    );
    assert_eq!(report.orders[0].diverged_fields, vec![OrderField::Quantity]);
    let effective = device.effective(&id).await?.ok_or("missing")?;
    assert_eq!(effective.quantity, 10);
    assert_eq!(effective.name, "Bulk");
    Ok(())
}

#[tokio::test]
async fn flush_refreshes_base_table_when_configured() -> Result<(), Box<dyn std::error::Error>> {
    let remote = Arc::new(MockRemote::with_orders(fixtures::orders(3)));
    let mut config = TestDevice::test_config();
    config.sync.refresh_after_flush = true;
    let device = TestDevice::with_config(remote.clone(), config)?;
    device.engine.sync_orders().await?;

    device
        .engine
        .record_change(&fixtures::order_id(1), OrderField::Quantity, 2_i64)
        .await?;
    // A row another device added since our last sync.
    remote.put_order(fixtures::order(3));

    let report = device.engine.flush().await?;
    assert_eq!(
        report.refresh,
        Refresh::Completed(SyncOutcome::Replaced {
            fetched: 4,
            inserted: 4,
            orphaned_changes: 0
        })
    );
    assert_eq!(remote.fetch_count(), 2);
    assert_eq!(device.base_orders().await?.len(), 4);
    Ok(())
}

#[tokio::test]
async fn refresh_failure_does_not_fail_the_flush() -> Result<(), Box<dyn std::error::Error>> {
    let remote = Arc::new(MockRemote::with_orders(fixtures::orders(2)));
    let mut config = TestDevice::test_config();
    config.sync.refresh_after_flush = true;
    let device = TestDevice::with_config(remote.clone(), config)?;
    device.engine.sync_orders().await?;

    device
        .engine
        .record_change(&fixtures::order_id(0), OrderField::Name, "Renamed")
        .await?;
    remote.fail_next_fetch();

    let report = device.engine.flush().await?;
    assert!(matches!(report.refresh, Refresh::Failed(_)));
    assert_eq!(report.cleared_changes, 1);
    assert_eq!(device.change_count().await?, 0);
    let base = device.base(&fixtures::order_id(0)).await?.ok_or("missing")?;
    assert_eq!(base.name, "Renamed");
    Ok(())
}
