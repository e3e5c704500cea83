//! # Integration Test Flows
//!
//! Storage-backed cells composed with the core cell variants:
//!
//! 1. **Lens → collection → file**: a lens write lands in the persisted map
//! 2. **Collection → formula**: derived values follow writes from any handle,
//!    including formulas over cells of different types
//! 3. **Validation**: rejected writes neither persist nor notify
//! 4. **Stoppable**: a timer bounds an iteration over derived state

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use futures::StreamExt;
    use serde_json::json;
    use tokio::time::timeout;

    use cells_core::{
        FormulaCell, Inputs, JsonSchema, Readable, Step, Stoppable, TransformCell, Writable,
    };
    use cells_storage::{CellCollection, InMemoryStore, JsonFileStore, KeyValueStore};

    type Accounts = BTreeMap<String, u64>;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    fn accounts_schema() -> JsonSchema<Accounts> {
        JsonSchema::new("Accounts")
    }

    fn default_accounts() -> Accounts {
        BTreeMap::from([("main".to_string(), 0)])
    }

    fn amount_schema() -> JsonSchema<u64> {
        JsonSchema::new("Amount").with_check("at most 1000", |amount: &u64| *amount <= 1000)
    }

    // =============================================================================
    // LENS → COLLECTION → FILE
    // =============================================================================

    #[tokio::test]
    async fn test_lens_write_persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cells.json");

        {
            let collection = CellCollection::new(Arc::new(JsonFileStore::new(&path)));
            let accounts: Arc<dyn Writable<Accounts>> = collection
                .cell("accounts", accounts_schema(), default_accounts)
                .unwrap();
            let savings = TransformCell::sub_with_default(accounts.clone(), "savings".into(), 0);

            assert_eq!(savings.read().await.unwrap(), 0);
            savings.write(250).await.unwrap();

            assert_eq!(
                accounts.read().await.unwrap(),
                BTreeMap::from([("main".to_string(), 0), ("savings".to_string(), 250)])
            );
        }

        let reopened = JsonFileStore::new(&path);
        assert_eq!(
            reopened.get("accounts").await.unwrap(),
            Some(json!({"main": 0, "savings": 250}))
        );

        let collection = CellCollection::new(Arc::new(reopened));
        let accounts: Arc<dyn Writable<Accounts>> = collection
            .cell("accounts", accounts_schema(), Accounts::new)
            .unwrap();
        let savings = TransformCell::sub(accounts, "savings".to_string());
        assert_eq!(savings.read().await.unwrap(), 250);
    }

    #[tokio::test]
    async fn test_lens_iteration_ignores_sibling_writes() {
        let collection = CellCollection::new(Arc::new(InMemoryStore::new()));
        let accounts: Arc<dyn Writable<Accounts>> = collection
            .cell("accounts", accounts_schema(), default_accounts)
            .unwrap();
        let main = TransformCell::sub(accounts.clone(), "main".to_string());
        let mut changes = main.changes();

        let first = timeout(Duration::from_secs(1), changes.next()).await.unwrap();
        assert_eq!(first.unwrap().unwrap(), 0);

        let savings = TransformCell::sub_with_default(accounts, "savings".to_string(), 0);
        savings.write(10).await.unwrap();
        assert!(timeout(Duration::from_millis(50), changes.next())
            .await
            .is_err());

        main.write(5).await.unwrap();
        let next = timeout(Duration::from_secs(1), changes.next()).await.unwrap();
        assert_eq!(next.unwrap().unwrap(), 5);
    }

    // =============================================================================
    // COLLECTION → FORMULA
    // =============================================================================

    #[tokio::test]
    async fn test_formula_follows_writes_from_any_handle() {
        let collection = CellCollection::new(Arc::new(InMemoryStore::new()));
        let a: Arc<dyn Readable<u64>> = collection.cell("a", amount_schema(), || 1).unwrap();
        let b: Arc<dyn Readable<u64>> = collection.cell("b", amount_schema(), || 2).unwrap();

        let total = FormulaCell::new("total", [("a", a), ("b", b)], |inputs: &Inputs<u64>| {
            inputs["a"] + inputs["b"]
        });
        assert_eq!(total.read().await.unwrap(), 3);

        let mut changes = total.changes();
        let first = timeout(Duration::from_secs(1), changes.next()).await.unwrap();
        assert_eq!(first.unwrap().unwrap(), 3);

        // A second handle for "a" is the same cell.
        let a_again = collection.cell("a", amount_schema(), || 0).unwrap();
        a_again.write(10).await.unwrap();

        let next = timeout(Duration::from_secs(1), changes.next()).await.unwrap();
        assert_eq!(next.unwrap().unwrap(), 12);
    }

    #[tokio::test]
    async fn test_formula_combines_price_and_currency() {
        let collection = CellCollection::new(Arc::new(InMemoryStore::new()));
        let price: Arc<dyn Readable<f64>> = collection
            .cell("price", JsonSchema::<f64>::new("Price"), || 19.99)
            .unwrap();
        let currency = collection
            .cell("currency", JsonSchema::<String>::new("Currency"), || "EUR".to_string())
            .unwrap();

        let approx = FormulaCell::combine(
            "approx",
            price,
            currency.clone() as Arc<dyn Readable<String>>,
            |price: &f64, currency: &String| format!("about {} {currency}", price.round()),
        );
        assert_eq!(approx.read().await.unwrap(), "about 20 EUR");

        let mut changes = approx.changes();
        let first = timeout(Duration::from_secs(1), changes.next()).await.unwrap();
        assert_eq!(first.unwrap().unwrap(), "about 20 EUR");

        currency.write("GBP".to_string()).await.unwrap();
        let next = timeout(Duration::from_secs(1), changes.next()).await.unwrap();
        assert_eq!(next.unwrap().unwrap(), "about 20 GBP");
    }

    // =============================================================================
    // VALIDATION
    // =============================================================================

    #[tokio::test]
    async fn test_rejected_write_neither_persists_nor_notifies() {
        let store = Arc::new(InMemoryStore::new());
        let collection = CellCollection::new(store.clone());
        let amount = collection.cell("amount", amount_schema(), || 1).unwrap();

        let mut changes = amount.changes();
        let first = timeout(Duration::from_secs(1), changes.next()).await.unwrap();
        assert_eq!(first.unwrap().unwrap(), 1);

        let err = amount.write(5000).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(amount.read().await.unwrap(), 1);
        assert_eq!(store.get("amount").await.unwrap(), Some(json!(1)));
        assert!(timeout(Duration::from_millis(50), changes.next())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_corrupt_stored_value_fails_formula_read() {
        let store = Arc::new(InMemoryStore::with_entries([(
            "a".to_string(),
            json!("not a number"),
        )]));
        let collection = CellCollection::new(store);
        let a: Arc<dyn Readable<u64>> = collection.cell("a", amount_schema(), || 0).unwrap();
        let doubled = FormulaCell::map("doubled", a, |a: &u64| a * 2);

        let err = doubled.read().await.unwrap_err();
        assert!(err.is_validation());
    }

    // =============================================================================
    // STOPPABLE
    // =============================================================================

    #[tokio::test]
    async fn test_timer_stops_iteration_over_derived_state() {
        let collection = CellCollection::new(Arc::new(InMemoryStore::new()));
        let a: Arc<dyn Readable<u64>> = collection.cell("a", amount_schema(), || 4).unwrap();
        let squared: Arc<dyn Readable<u64>> =
            Arc::new(FormulaCell::map("squared", a, |a: &u64| a * a));

        let mut iteration = Stoppable::new(squared);
        let timer = iteration.handle().stop_after(Duration::from_millis(50));

        assert_eq!(iteration.next().await.unwrap(), Step::Value(16));
        let step = timeout(Duration::from_secs(1), iteration.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(step, Step::Stopped);
        timer.await.unwrap();
    }
}
