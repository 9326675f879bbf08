//! Refund records
//!
//! Refunds are read and written inside the caller's write transaction so
//! that the refundable-balance check and the insert of a new refund are one
//! serialized step.

use redb::{ReadableTable, TableDefinition, WriteTransaction};
use shared::refund::Refund;
use shared::util::format_refund_id;

use crate::db::{Storage, StorageError, StorageResult};

/// Refunds: key = refund_id, value = JSON-serialized Refund
const REFUNDS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("refunds");

/// Per-order index: key = (order_id, refund_id), value = empty
const ORDER_REFUNDS_TABLE: TableDefinition<(&str, &str), ()> =
    TableDefinition::new("order_refunds");

/// Gateway lookup: key = gateway refund id, value = refund_id
const GATEWAY_REFUNDS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("gateway_refunds");

const REFUND_SEQUENCE: &str = "refund";

#[derive(Clone)]
pub struct RefundStore {
    storage: Storage,
}

impl RefundStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub(crate) fn init_tables(txn: &WriteTransaction) -> StorageResult<()> {
        let _ = txn.open_table(REFUNDS_TABLE)?;
        let _ = txn.open_table(ORDER_REFUNDS_TABLE)?;
        let _ = txn.open_table(GATEWAY_REFUNDS_TABLE)?;
        Ok(())
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn next_refund_id(txn: &WriteTransaction) -> StorageResult<String> {
        Storage::next_sequence(txn, REFUND_SEQUENCE).map(format_refund_id)
    }

    pub fn insert_in(txn: &WriteTransaction, refund: &Refund) -> StorageResult<()> {
        let mut refunds = txn.open_table(REFUNDS_TABLE)?;
        if refunds.get(refund.refund_id.as_str())?.is_some() {
            return Err(StorageError::VersionConflict {
                id: refund.refund_id.clone(),
                expected: 0,
                actual: refund.version,
            });
        }
        let value = serde_json::to_vec(refund)?;
        refunds.insert(refund.refund_id.as_str(), value.as_slice())?;

        let mut by_order = txn.open_table(ORDER_REFUNDS_TABLE)?;
        by_order.insert((refund.order_id.as_str(), refund.refund_id.as_str()), ())?;
        Ok(())
    }

    pub fn get(&self, refund_id: &str) -> StorageResult<Option<Refund>> {
        let txn = self.storage.begin_read()?;
        let table = txn.open_table(REFUNDS_TABLE)?;
        match table.get(refund_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_in(txn: &WriteTransaction, refund_id: &str) -> StorageResult<Option<Refund>> {
        let table = txn.open_table(REFUNDS_TABLE)?;
        match table.get(refund_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Overwrite a refund whose stored version equals `expected_version`
    pub fn update_in(
        txn: &WriteTransaction,
        refund: &Refund,
        expected_version: u64,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(REFUNDS_TABLE)?;
        let stored: Refund = match table.get(refund.refund_id.as_str())? {
            Some(value) => serde_json::from_slice(value.value())?,
            None => return Err(StorageError::NotFound(refund.refund_id.clone())),
        };
        if stored.version != expected_version {
            return Err(StorageError::VersionConflict {
                id: refund.refund_id.clone(),
                expected: expected_version,
                actual: stored.version,
            });
        }
        let value = serde_json::to_vec(refund)?;
        table.insert(refund.refund_id.as_str(), value.as_slice())?;
        Ok(())
    }

    /// Refunds of one order, oldest first
    pub fn list_for_order(&self, order_id: &str) -> StorageResult<Vec<Refund>> {
        let txn = self.storage.begin_read()?;
        let index = txn.open_table(ORDER_REFUNDS_TABLE)?;
        let refunds = txn.open_table(REFUNDS_TABLE)?;
        collect_for_order(&index, &refunds, order_id)
    }

    pub fn list_for_order_in(txn: &WriteTransaction, order_id: &str) -> StorageResult<Vec<Refund>> {
        let index = txn.open_table(ORDER_REFUNDS_TABLE)?;
        let refunds = txn.open_table(REFUNDS_TABLE)?;
        collect_for_order(&index, &refunds, order_id)
    }

    pub fn index_gateway_in(
        txn: &WriteTransaction,
        gateway_refund_id: &str,
        refund_id: &str,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(GATEWAY_REFUNDS_TABLE)?;
        table.insert(gateway_refund_id, refund_id)?;
        Ok(())
    }

    pub fn find_by_gateway(&self, gateway_refund_id: &str) -> StorageResult<Option<String>> {
        let txn = self.storage.begin_read()?;
        let table = txn.open_table(GATEWAY_REFUNDS_TABLE)?;
        Ok(table
            .get(gateway_refund_id)?
            .map(|guard| guard.value().to_string()))
    }
}

fn collect_for_order(
    index: &impl ReadableTable<(&'static str, &'static str), ()>,
    refunds: &impl ReadableTable<&'static str, &'static [u8]>,
    order_id: &str,
) -> StorageResult<Vec<Refund>> {
    let mut result = Vec::new();
    for entry in index.range((order_id, "")..)? {
        let (key, _) = entry?;
        let (owner, refund_id) = key.value();
        if owner != order_id {
            break;
        }
        if let Some(value) = refunds.get(refund_id)? {
            result.push(serde_json::from_slice::<Refund>(value.value())?);
        }
    }
    result.sort_by(|a, b| a.refund_id.cmp(&b.refund_id));
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::order::{Actor, Money};
    use shared::refund::*;

    fn sample(refund_id: &str, order_id: &str) -> Refund {
        Refund {
            refund_id: refund_id.into(),
            order_id: order_id.into(),
            amount: Money::from_pence(500),
            refund_type: RefundType::Partial,
            reason: RefundReason::DamagedProduct,
            description: None,
            status: RefundStatus::Pending,
            requested_by: Actor::customer("c-1"),
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            processed_by: None,
            processed_at: None,
            completed_at: None,
            gateway_refund_id: None,
            failure_reason: None,
            admin_notes: None,
            restock: vec![],
            restock_state: RestockState::NotRequested,
            status_history: vec![],
            version: 1,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn store() -> RefundStore {
        RefundStore::new(Storage::open_in_memory().unwrap())
    }

    #[test]
    fn test_refund_ids_are_sequential() {
        let store = store();
        let txn = store.storage().begin_write().unwrap();
        assert_eq!(RefundStore::next_refund_id(&txn).unwrap(), "REF-000001");
        assert_eq!(RefundStore::next_refund_id(&txn).unwrap(), "REF-000002");
    }

    #[test]
    fn test_list_for_order_only_returns_that_order() {
        let store = store();
        let txn = store.storage().begin_write().unwrap();
        RefundStore::insert_in(&txn, &sample("REF-000001", "ORD-00001")).unwrap();
        RefundStore::insert_in(&txn, &sample("REF-000002", "ORD-00002")).unwrap();
        RefundStore::insert_in(&txn, &sample("REF-000003", "ORD-00001")).unwrap();
        assert_eq!(RefundStore::list_for_order_in(&txn, "ORD-00001").unwrap().len(), 2);
        txn.commit().unwrap();

        let refunds = store.list_for_order("ORD-00001").unwrap();
        let ids: Vec<_> = refunds.iter().map(|r| r.refund_id.as_str()).collect();
        assert_eq!(ids, ["REF-000001", "REF-000003"]);
        assert!(store.list_for_order("ORD-00009").unwrap().is_empty());
    }

    #[test]
    fn test_stale_update_conflicts() {
        let store = store();
        let txn = store.storage().begin_write().unwrap();
        let refund = sample("REF-000001", "ORD-00001");
        RefundStore::insert_in(&txn, &refund).unwrap();

        let mut next = refund.clone();
        next.version = 2;
        RefundStore::update_in(&txn, &next, 1).unwrap();
        assert!(matches!(
            RefundStore::update_in(&txn, &next, 1),
            Err(StorageError::VersionConflict { expected: 1, actual: 2, .. })
        ));
    }

    #[test]
    fn test_gateway_index() {
        let store = store();
        let txn = store.storage().begin_write().unwrap();
        RefundStore::index_gateway_in(&txn, "re_123", "REF-000001").unwrap();
        txn.commit().unwrap();
        assert_eq!(store.find_by_gateway("re_123").unwrap().as_deref(), Some("REF-000001"));
        assert_eq!(store.find_by_gateway("re_404").unwrap(), None);
    }
}
