use ordersync_core::{ChangeValue, OrderField};
use ordersync_harness::{TestDevice, fixtures};

#[tokio::test]
async fn edit_is_visible_before_commit() -> Result<(), Box<dyn std::error::Error>> {
    let device = TestDevice::synced(fixtures::orders(2)).await?;
    let id = fixtures::order_id(0);

    let edit = device.engine.edit(&id, OrderField::Quantity, 8_i64).await?;
    assert_eq!(edit.effective().order.quantity, 8);
    assert!(edit.previous().is_none());
    assert_eq!(device.effective(&id).await?.ok_or("missing")?.quantity, 8);

    let effective = edit.commit();
    assert!(effective.is_changed(OrderField::Quantity));
    assert_eq!(device.change_count().await?, 1);
    Ok(())
}

#[tokio::test]
async fn rollback_removes_a_fresh_edit() -> Result<(), Box<dyn std::error::Error>> {
    let device = TestDevice::synced(fixtures::orders(1)).await?;
    let id = fixtures::order_id(0);

    let edit = device.engine.edit(&id, OrderField::Name, "Typo").await?;
    assert!(edit.rollback(&device.engine).await?);

    assert_eq!(device.change_count().await?, 0);
    assert_eq!(device.effective(&id).await?, Some(fixtures::order(0)));
    Ok(())
}

#[tokio::test]
async fn rollback_restores_the_previous_pending_value() -> Result<(), Box<dyn std::error::Error>> {
    let device = TestDevice::synced(fixtures::orders(1)).await?;
    let id = fixtures::order_id(0);

    let first = device.engine.record_change(&id, OrderField::Quantity, 4_i64).await?;
    let edit = device.engine.edit(&id, OrderField::Quantity, 40_i64).await?;
    assert_eq!(edit.previous(), Some(&first));

    assert!(edit.rollback(&device.engine).await?);
    let pending = device.engine.pending_changes().await?;
    assert_eq!(pending, vec![first]);
    assert_eq!(device.effective(&id).await?.ok_or("missing")?.quantity, 4);
    Ok(())
}

#[tokio::test]
async fn rollback_leaves_a_newer_edit_alone() -> Result<(), Box<dyn std::error::Error>> {
    let device = TestDevice::synced(fixtures::orders(1)).await?;
    let id = fixtures::order_id(0);

    let edit = device.engine.edit(&id, OrderField::Quantity, 5_i64).await?;
    device.engine.record_change(&id, OrderField::Quantity, 6_i64).await?;

    assert!(!edit.rollback(&device.engine).await?);
    let pending = device.engine.pending_changes().await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].value, ChangeValue::Integer(6));
    Ok(())
}

#[tokio::test]
async fn rollback_after_flush_is_a_no_op() -> Result<(), Box<dyn std::error::Error>> {
    let device = TestDevice::synced(fixtures::orders(1)).await?;
    let id = fixtures::order_id(0);

    let edit = device.engine.edit(&id, OrderField::Department, "Frozen").await?;
    device.engine.flush().await?;

    assert!(!edit.rollback(&device.engine).await?);
    assert_eq!(device.change_count().await?, 0);
    assert_eq!(device.effective(&id).await?.ok_or("missing")?.department, "Frozen");
    Ok(())
}
