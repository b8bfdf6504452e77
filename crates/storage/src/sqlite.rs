use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params, params_from_iter};
use tracing::debug;

use ordersync_core::{ChangeId, ChangeValue, Order, OrderChange, OrderField, OrderId, ProductId, Unit};

use crate::error::StorageError;
use crate::traits::{ChangeWrite, FlushStats, ReplaceStats, Storage};

/// SQLite's default upper bound on bound parameters in one statement.
const SQLITE_MAX_VARIABLES: usize = 32_766;
const ORDER_COLUMNS: usize = 7;

/// Largest batch a single multi-row order insert can carry.
pub const MAX_ORDER_BATCH: usize = SQLITE_MAX_VARIABLES / ORDER_COLUMNS;

const INSERT_ORDERS: &str =
    "INSERT INTO orders (id, name, product_id, quantity, unit, department, updated_at) VALUES";

// Duplicate ids inside one snapshot are dropped, so the inserted count can fall
// short of the fetched count.
const ON_CONFLICT_SKIP: &str = "ON CONFLICT (id) DO NOTHING";

const ON_CONFLICT_OVERWRITE: &str = "ON CONFLICT (id) DO UPDATE SET
    name = excluded.name,
    product_id = excluded.product_id,
    quantity = excluded.quantity,
    unit = excluded.unit,
    department = excluded.department,
    updated_at = excluded.updated_at";

const SELECT_ORDER: &str =
    "SELECT id, name, product_id, quantity, unit, department, updated_at FROM orders";

const SELECT_CHANGE: &str =
    "SELECT id, order_id, change_key, change_value, updated_at FROM order_changes";

type OrderRow = (String, String, String, i64, String, String, i64);
type ChangeRow = (String, String, String, Vec<u8>, i64);

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

fn read_order_row(row: &rusqlite::Row) -> rusqlite::Result<OrderRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn order_from_row(raw: OrderRow) -> Result<Order, StorageError> {
    let (id, name, product_id, quantity, unit, department, updated_at) = raw;
    Ok(Order {
        id: OrderId::new(id),
        name,
        product_id: ProductId::new(product_id),
        quantity,
        unit: Unit::parse(&unit)?,
        department,
        updated_at,
    })
}

fn read_change_row(row: &rusqlite::Row) -> rusqlite::Result<ChangeRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn change_from_row(raw: ChangeRow) -> Result<OrderChange, StorageError> {
    let (id, order_id, change_key, value_bytes, updated_at) = raw;
    let value = ChangeValue::from_msgpack(&value_bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(OrderChange {
        id: id.parse::<ChangeId>()?,
        order_id: OrderId::new(order_id),
        field: OrderField::parse(&change_key)?,
        value,
        updated_at,
    })
}

fn order_values(order: &Order) -> [Value; ORDER_COLUMNS] {
    [
        Value::Text(order.id.to_string()),
        Value::Text(order.name.clone()),
        Value::Text(order.product_id.to_string()),
        Value::Integer(order.quantity),
        Value::Text(order.unit.as_str().to_string()),
        Value::Text(order.department.clone()),
        Value::Integer(order.updated_at),
    ]
}

fn clamp_batch(batch_size: usize) -> usize {
    batch_size.clamp(1, MAX_ORDER_BATCH)
}

/// One multi-row INSERT for the whole batch. Returns the number of rows written.
fn insert_batch(conn: &Connection, batch: &[Order], on_conflict: &str) -> Result<usize, StorageError> {
    if batch.is_empty() {
        return Ok(0);
    }
    let placeholders = vec!["(?, ?, ?, ?, ?, ?, ?)"; batch.len()].join(", ");
    let sql = format!("{INSERT_ORDERS} {placeholders} {on_conflict}");
    let values: Vec<Value> = batch.iter().flat_map(order_values).collect();
    Ok(conn.execute(&sql, params_from_iter(values.iter()))?)
}

/// Insert every batch inside its own savepoint. Caller owns the outer transaction.
fn insert_batches(
    tx: &mut rusqlite::Transaction,
    orders: &[Order],
    batch_size: usize,
    on_conflict: &str,
) -> Result<(usize, usize), StorageError> {
    let mut written = 0;
    let mut batches = 0;
    for batch in orders.chunks(clamp_batch(batch_size)) {
        let sp = tx.savepoint()?;
        written += insert_batch(&sp, batch, on_conflict)?;
        sp.commit()?;
        batches += 1;
    }
    Ok((written, batches))
}

fn replace_in_transaction(
    conn: &mut Connection,
    orders: &[Order],
    batch_size: usize,
) -> Result<ReplaceStats, StorageError> {
    let mut tx = conn.transaction()?;
    let deleted = tx.execute("DELETE FROM orders", [])?;
    let (inserted, batches) = insert_batches(&mut tx, orders, batch_size, ON_CONFLICT_SKIP)?;
    // Foreign keys are off here, so apply the cascade by hand for orders that
    // did not come back.
    let orphaned_changes = tx.execute(
        "DELETE FROM order_changes WHERE order_id NOT IN (SELECT id FROM orders)",
        [],
    )?;
    tx.commit()?;
    Ok(ReplaceStats {
        deleted,
        inserted,
        batches,
        orphaned_changes,
    })
}

fn query_change(
    conn: &Connection,
    order_id: &OrderId,
    field: OrderField,
) -> Result<Option<OrderChange>, StorageError> {
    let raw = conn
        .query_row(
            &format!("{SELECT_CHANGE} WHERE order_id = ?1 AND change_key = ?2"),
            params![order_id.as_str(), field.as_str()],
            read_change_row,
        )
        .optional()?;
    raw.map(change_from_row).transpose()
}

/// Map a foreign-key failure on `order_changes.order_id` to `OrderNotFound`.
fn map_change_write_error(err: rusqlite::Error, order_id: &OrderId) -> StorageError {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            StorageError::OrderNotFound(order_id.to_string())
        }
        other => StorageError::Sqlite(other),
    }
}

impl Storage for SqliteStorage {
    fn get_orders(&self) -> Result<Vec<Order>, StorageError> {
        let mut stmt = self.conn.prepare(&format!("{SELECT_ORDER} ORDER BY rowid"))?;
        let rows = stmt.query_map([], read_order_row)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(order_from_row(row?)?);
        }
        Ok(result)
    }

    fn get_order(&self, order_id: &OrderId) -> Result<Option<Order>, StorageError> {
        let raw = self
            .conn
            .query_row(
                &format!("{SELECT_ORDER} WHERE id = ?1"),
                params![order_id.as_str()],
                read_order_row,
            )
            .optional()?;
        raw.map(order_from_row).transpose()
    }

    fn order_count(&self) -> Result<u64, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM orders", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn replace_orders(
        &mut self,
        orders: &[Order],
        batch_size: usize,
    ) -> Result<ReplaceStats, StorageError> {
        // Deleting the base rows must not cascade into the change log, and the
        // pragma is ignored inside a transaction, so toggle it around one.
        self.conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
        let result = replace_in_transaction(&mut self.conn, orders, batch_size);
        let restored = self.conn.execute_batch("PRAGMA foreign_keys = ON;");
        let stats = result?;
        restored?;
        debug!(
            deleted = stats.deleted,
            inserted = stats.inserted,
            batches = stats.batches,
            orphaned_changes = stats.orphaned_changes,
            "replaced base orders"
        );
        Ok(stats)
    }

    fn upsert_orders(&mut self, orders: &[Order], batch_size: usize) -> Result<usize, StorageError> {
        let mut tx = self.conn.transaction()?;
        let (written, _) = insert_batches(&mut tx, orders, batch_size, ON_CONFLICT_OVERWRITE)?;
        tx.commit()?;
        Ok(written)
    }

    fn delete_order(&mut self, order_id: &OrderId) -> Result<bool, StorageError> {
        let deleted = self
            .conn
            .execute("DELETE FROM orders WHERE id = ?1", params![order_id.as_str()])?;
        Ok(deleted > 0)
    }

    fn get_changes(&self) -> Result<Vec<OrderChange>, StorageError> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_CHANGE} ORDER BY updated_at, id"))?;
        let rows = stmt.query_map([], read_change_row)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(change_from_row(row?)?);
        }
        Ok(result)
    }

    fn get_changes_for_order(&self, order_id: &OrderId) -> Result<Vec<OrderChange>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_CHANGE} WHERE order_id = ?1 ORDER BY updated_at, id"
        ))?;
        let rows = stmt.query_map(params![order_id.as_str()], read_change_row)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(change_from_row(row?)?);
        }
        Ok(result)
    }

    fn get_change(
        &self,
        order_id: &OrderId,
        field: OrderField,
    ) -> Result<Option<OrderChange>, StorageError> {
        query_change(&self.conn, order_id, field)
    }

    fn change_count(&self) -> Result<u64, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM order_changes", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn upsert_change(
        &mut self,
        order_id: &OrderId,
        field: OrderField,
        value: &ChangeValue,
        updated_at: i64,
    ) -> Result<ChangeWrite, StorageError> {
        let value_bytes = value
            .to_msgpack()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let tx = self.conn.transaction()?;
        let previous = query_change(&tx, order_id, field)?;

        // The slot keeps its original id when it is overwritten.
        let raw = tx
            .query_row(
                "INSERT INTO order_changes (id, order_id, change_key, change_value, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (order_id, change_key) DO UPDATE SET change_value = excluded.change_value, updated_at = excluded.updated_at
                 RETURNING id, order_id, change_key, change_value, updated_at",
                params![
                    ChangeId::new().to_string(),
                    order_id.as_str(),
                    field.as_str(),
                    value_bytes,
                    updated_at,
                ],
                read_change_row,
            )
            .map_err(|e| map_change_write_error(e, order_id))?;
        let change = change_from_row(raw)?;

        tx.commit()?;
        Ok(ChangeWrite { change, previous })
    }

    fn restore_change(&mut self, change: &OrderChange) -> Result<(), StorageError> {
        let value_bytes = change
            .value
            .to_msgpack()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.conn
            .execute(
                "INSERT INTO order_changes (id, order_id, change_key, change_value, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (order_id, change_key) DO UPDATE SET id = excluded.id, change_value = excluded.change_value, updated_at = excluded.updated_at",
                params![
                    change.id.to_string(),
                    change.order_id.as_str(),
                    change.field.as_str(),
                    value_bytes,
                    change.updated_at,
                ],
            )
            .map_err(|e| map_change_write_error(e, &change.order_id))?;
        Ok(())
    }

    fn delete_change(&mut self, order_id: &OrderId, field: OrderField) -> Result<bool, StorageError> {
        let deleted = self.conn.execute(
            "DELETE FROM order_changes WHERE order_id = ?1 AND change_key = ?2",
            params![order_id.as_str(), field.as_str()],
        )?;
        Ok(deleted > 0)
    }

    fn apply_flush(
        &mut self,
        canonical: &[Order],
        flushed: &[OrderChange],
    ) -> Result<FlushStats, StorageError> {
        let tx = self.conn.transaction()?;
        let mut stats = FlushStats::default();
        {
            let mut update = tx.prepare(
                "UPDATE orders SET name = ?1, product_id = ?2, quantity = ?3, unit = ?4, department = ?5, updated_at = ?6 WHERE id = ?7",
            )?;
            for order in canonical {
                stats.updated_orders += update.execute(params![
                    order.name,
                    order.product_id.as_str(),
                    order.quantity,
                    order.unit.as_str(),
                    order.department,
                    order.updated_at,
                    order.id.as_str(),
                ])?;
            }

            // A slot edited again after it was read keeps its id but not its
            // timestamp, and must stay pending.
            let mut delete =
                tx.prepare("DELETE FROM order_changes WHERE id = ?1 AND updated_at = ?2")?;
            for change in flushed {
                stats.deleted_changes +=
                    delete.execute(params![change.id.to_string(), change.updated_at])?;
            }
        }
        tx.commit()?;
        Ok(stats)
    }

    fn get_meta(&self, key: &str) -> Result<Option<i64>, StorageError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM sync_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_meta(&mut self, key: &str, value: i64) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO sync_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::LAST_SYNC_AT;

    fn order(id: &str, quantity: i64) -> Order {
        Order {
            id: OrderId::new(id),
            name: format!("Order {id}"),
            product_id: ProductId::new("p1"),
            quantity,
            unit: Unit::Pcs,
            department: "Groceries".into(),
            updated_at: 100,
        }
    }

    fn foreign_keys_enabled(storage: &SqliteStorage) -> bool {
        storage
            .conn()
            .query_row("PRAGMA foreign_keys", [], |row| row.get::<_, i64>(0))
            .unwrap()
            == 1
    }

    #[test]
    fn upsert_change_keeps_one_row_per_field() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        storage.replace_orders(&[order("o1", 1)], 100).unwrap();
        let id = OrderId::new("o1");

        let first = storage
            .upsert_change(&id, OrderField::Quantity, &ChangeValue::Integer(5), 1)
            .unwrap();
        assert!(first.previous.is_none());

        let second = storage
            .upsert_change(&id, OrderField::Quantity, &ChangeValue::Integer(9), 2)
            .unwrap();
        assert_eq!(second.change.id, first.change.id);
        assert_eq!(second.previous.unwrap().value, ChangeValue::Integer(5));

        let changes = storage.get_changes().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].value, ChangeValue::Integer(9));
        assert_eq!(changes[0].updated_at, 2);
    }

    #[test]
    fn change_for_unknown_order_is_rejected() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let err = storage
            .upsert_change(&OrderId::new("ghost"), OrderField::Name, &"x".into(), 1)
            .unwrap_err();
        assert!(matches!(err, StorageError::OrderNotFound(id) if id == "ghost"));
    }

    #[test]
    fn delete_order_cascades_to_changes() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        storage.replace_orders(&[order("o1", 1), order("o2", 2)], 100).unwrap();
        storage
            .upsert_change(&OrderId::new("o1"), OrderField::Quantity, &ChangeValue::Integer(3), 1)
            .unwrap();
        storage
            .upsert_change(&OrderId::new("o2"), OrderField::Quantity, &ChangeValue::Integer(4), 1)
            .unwrap();

        assert!(storage.delete_order(&OrderId::new("o1")).unwrap());
        let changes = storage.get_changes().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].order_id, OrderId::new("o2"));
    }

    #[test]
    fn replace_keeps_changes_of_surviving_orders() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        storage.replace_orders(&[order("o1", 1), order("o2", 2)], 100).unwrap();
        storage
            .upsert_change(&OrderId::new("o1"), OrderField::Quantity, &ChangeValue::Integer(3), 1)
            .unwrap();
        storage
            .upsert_change(&OrderId::new("o2"), OrderField::Quantity, &ChangeValue::Integer(4), 1)
            .unwrap();

        let stats = storage.replace_orders(&[order("o1", 10), order("o3", 30)], 100).unwrap();
        assert_eq!(stats.deleted, 2);
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.orphaned_changes, 1);

        let changes = storage.get_changes().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].order_id, OrderId::new("o1"));
        assert!(foreign_keys_enabled(&storage));
    }

    #[test]
    fn replace_skips_duplicate_ids_in_snapshot() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let stats = storage
            .replace_orders(&[order("o1", 1), order("o1", 2), order("o2", 3)], 2)
            .unwrap();
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.batches, 2);
        assert_eq!(storage.get_order(&OrderId::new("o1")).unwrap().unwrap().quantity, 1);
    }

    #[test]
    fn upsert_orders_leaves_other_rows() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        storage.replace_orders(&[order("o1", 1), order("o2", 2)], 100).unwrap();
        storage.upsert_orders(&[order("o2", 20), order("o3", 30)], 100).unwrap();

        let orders = storage.get_orders().unwrap();
        let quantities: Vec<i64> = orders.iter().map(|o| o.quantity).collect();
        assert_eq!(quantities, vec![1, 20, 30]);
    }

    #[test]
    fn apply_flush_keeps_slots_edited_after_read() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        storage.replace_orders(&[order("o1", 1)], 100).unwrap();
        let id = OrderId::new("o1");
        storage
            .upsert_change(&id, OrderField::Quantity, &ChangeValue::Integer(5), 1)
            .unwrap();
        storage
            .upsert_change(&id, OrderField::Name, &"renamed".into(), 2)
            .unwrap();
        let flushed = storage.get_changes().unwrap();

        storage
            .upsert_change(&id, OrderField::Quantity, &ChangeValue::Integer(7), 3)
            .unwrap();

        let mut canonical = order("o1", 5);
        canonical.name = "renamed".into();
        canonical.updated_at = 500;
        let stats = storage.apply_flush(&[canonical], &flushed).unwrap();
        assert_eq!(stats.updated_orders, 1);
        assert_eq!(stats.deleted_changes, 1);

        let remaining = storage.get_changes().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].value, ChangeValue::Integer(7));
        assert_eq!(storage.get_order(&id).unwrap().unwrap().updated_at, 500);
    }

    #[test]
    fn batch_size_is_clamped() {
        assert_eq!(clamp_batch(0), 1);
        assert_eq!(clamp_batch(usize::MAX), MAX_ORDER_BATCH);
        assert!(MAX_ORDER_BATCH * ORDER_COLUMNS <= SQLITE_MAX_VARIABLES);
    }

    #[test]
    fn meta_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.db");
        let path = path.to_str().unwrap();
        {
            let mut storage = SqliteStorage::open(path).unwrap();
            assert_eq!(storage.get_meta(LAST_SYNC_AT).unwrap(), None);
            storage.set_meta(LAST_SYNC_AT, 42).unwrap();
            storage.set_meta(LAST_SYNC_AT, 43).unwrap();
        }
        let storage = SqliteStorage::open(path).unwrap();
        assert_eq!(storage.get_meta(LAST_SYNC_AT).unwrap(), Some(43));
    }
}
