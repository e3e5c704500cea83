//! # End-to-End Synchronization
//!
//! Storage-backed cells served by a `LongPollController` and mirrored by
//! `LongPollingCell` clients:
//!
//! 1. Server writes reach client iterations, ending at the latest value
//! 2. Visibility: a public client sees a public lens but not its private parent
//! 3. Dropping a client iteration releases the server's handle
//! 4. The JSON wire encoding carries every request and response shape

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::StreamExt;
    use serde::{Deserialize, Serialize};
    use tokio::time::timeout;

    use cells_core::{CellError, JsonSchema, Readable, TransformCell, Writable};
    use cells_longpoll::{
        Access, CancelRequest, CellRegistry, LocalTransport, LongPollConfig, LongPollController,
        LongPollError, LongPollRequest, LongPollResponse, LongPollTransport, LongPollingCell,
        Requester, Visibility,
    };
    use cells_storage::{CellCollection, CollectionCell, InMemoryStore};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Wallet {
        owner: String,
        balances: BTreeMap<String, u64>,
    }

    fn default_wallet() -> Wallet {
        Wallet {
            owner: "alice".into(),
            balances: BTreeMap::from([("main".to_string(), 100)]),
        }
    }

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    struct Server {
        collection: CellCollection,
        wallet: Arc<CollectionCell<Wallet>>,
        controller: Arc<LongPollController>,
    }

    /// A wallet stored privately, with its owner exposed publicly.
    fn server() -> Server {
        let collection = CellCollection::new(Arc::new(InMemoryStore::new()));
        let wallet = collection
            .cell("wallet", JsonSchema::new("Wallet"), default_wallet)
            .unwrap();

        let parent: Arc<dyn Writable<Wallet>> = wallet.clone();
        let owner: Arc<dyn Readable<String>> = Arc::new(TransformCell::new(
            "wallet.owner",
            parent,
            |wallet: &Wallet| Ok(wallet.owner.clone()),
            |wallet: &Wallet, owner: String| {
                Ok(Wallet {
                    owner,
                    ..wallet.clone()
                })
            },
        ));
        let whole: Arc<dyn Readable<Wallet>> = wallet.clone();

        let mut registry = CellRegistry::new();
        registry
            .register("wallet", whole, Visibility::Privileged)
            .register("wallet.owner", owner, Visibility::Public);
        let controller = Arc::new(LongPollController::new(
            Arc::new(registry),
            LongPollConfig::default(),
        ));

        Server {
            collection,
            wallet,
            controller,
        }
    }

    fn connect(server: &Server, id: &str, access: Access) -> Arc<dyn LongPollTransport> {
        Arc::new(LocalTransport::new(
            server.controller.clone(),
            Requester::new(id, access),
        ))
    }

    async fn until_pending(controller: &LongPollController, count: usize) {
        timeout(Duration::from_secs(1), async {
            while controller.pending_count() != count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    // =============================================================================
    // SERVER WRITES → CLIENT ITERATION
    // =============================================================================

    #[tokio::test]
    async fn test_client_mirrors_server_writes() {
        let server = server();
        let transport = connect(&server, "app", Access::Privileged);
        let remote = LongPollingCell::<Wallet>::new("wallet", transport);
        let mut changes = remote.changes();

        let first = timeout(Duration::from_secs(1), changes.next()).await.unwrap();
        assert_eq!(first.unwrap().unwrap(), default_wallet());

        let mut updated = default_wallet();
        for amount in [150, 175, 200] {
            updated.balances.insert("main".into(), amount);
            server.wallet.write(updated.clone()).await.unwrap();
        }

        // Intermediate writes may coalesce; the last one always arrives.
        let mut seen = Vec::new();
        while seen.last() != Some(&updated) {
            let next = timeout(Duration::from_secs(1), changes.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            seen.push(next);
        }
        let amounts: Vec<u64> = seen.iter().map(|w| w.balances["main"]).collect();
        assert!(amounts.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[tokio::test]
    async fn test_collection_handle_writes_reach_client() {
        let server = server();
        let transport = connect(&server, "app", Access::Privileged);
        let remote = LongPollingCell::<Wallet>::new("wallet", transport);
        let mut changes = remote.changes();
        timeout(Duration::from_secs(1), changes.next())
            .await
            .unwrap();

        let another_handle = server
            .collection
            .cell("wallet", JsonSchema::<Wallet>::new("Wallet"), default_wallet)
            .unwrap();
        let renamed = Wallet {
            owner: "bob".into(),
            ..default_wallet()
        };
        another_handle.write(renamed.clone()).await.unwrap();

        let next = timeout(Duration::from_secs(1), changes.next()).await.unwrap();
        assert_eq!(next.unwrap().unwrap(), renamed);
    }

    // =============================================================================
    // VISIBILITY
    // =============================================================================

    #[tokio::test]
    async fn test_public_client_sees_only_public_lens() {
        let server = server();
        let transport = connect(&server, "page", Access::Public);

        let owner = LongPollingCell::<String>::new("wallet.owner", transport.clone());
        assert_eq!(owner.read().await.unwrap(), "alice");

        let wallet = LongPollingCell::<Wallet>::new("wallet", transport);
        let err = wallet.read().await.unwrap_err();
        assert!(matches!(err, CellError::Permission { cell } if cell == "wallet"));
        assert_eq!(
            server
                .controller
                .stats()
                .rejected
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn test_lens_client_ignores_unrelated_writes() {
        let server = server();
        let transport = connect(&server, "page", Access::Public);
        let owner = LongPollingCell::<String>::new("wallet.owner", transport);
        let mut changes = owner.changes();
        let first = timeout(Duration::from_secs(1), changes.next()).await.unwrap();
        assert_eq!(first.unwrap().unwrap(), "alice");

        let mut richer = default_wallet();
        richer.balances.insert("main".into(), 1_000);
        server.wallet.write(richer.clone()).await.unwrap();
        assert!(timeout(Duration::from_millis(50), changes.next())
            .await
            .is_err());

        server
            .wallet
            .write(Wallet {
                owner: "carol".into(),
                ..richer
            })
            .await
            .unwrap();
        let next = timeout(Duration::from_secs(1), changes.next()).await.unwrap();
        assert_eq!(next.unwrap().unwrap(), "carol");
    }

    // =============================================================================
    // HANDLE LIFETIME
    // =============================================================================

    #[tokio::test]
    async fn test_dropped_client_iteration_releases_server_handle() {
        let server = server();
        let transport = connect(&server, "app", Access::Privileged);
        let remote = LongPollingCell::<Wallet>::new("wallet", transport);

        let mut changes = remote.changes();
        timeout(Duration::from_secs(1), changes.next())
            .await
            .unwrap();
        let waiting = tokio::spawn(async move { changes.next().await });
        until_pending(&server.controller, 1).await;

        waiting.abort();
        until_pending(&server.controller, 0).await;
    }

    // =============================================================================
    // JSON WIRE
    // =============================================================================

    /// Pushes every message through its JSON text form.
    struct JsonWire {
        inner: LocalTransport,
    }

    fn through_json<T: Serialize + serde::de::DeserializeOwned>(message: &T) -> T {
        let text = serde_json::to_string(message).unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[async_trait]
    impl LongPollTransport for JsonWire {
        async fn long_poll(
            &self,
            request: LongPollRequest,
        ) -> Result<LongPollResponse, LongPollError> {
            let response = self.inner.long_poll(through_json(&request)).await?;
            Ok(through_json(&response))
        }

        async fn cancel(&self, request: CancelRequest) -> Result<(), LongPollError> {
            self.inner.cancel(through_json(&request)).await
        }
    }

    #[tokio::test]
    async fn test_sync_over_json_wire() {
        let server = server();
        let wire: Arc<dyn LongPollTransport> = Arc::new(JsonWire {
            inner: LocalTransport::new(
                server.controller.clone(),
                Requester::new("remote", Access::Public),
            ),
        });
        let owner = LongPollingCell::<String>::new("wallet.owner", wire);
        let mut changes = owner.changes();

        let first = timeout(Duration::from_secs(1), changes.next()).await.unwrap();
        assert_eq!(first.unwrap().unwrap(), "alice");

        server
            .wallet
            .write(Wallet {
                owner: "dave".into(),
                ..default_wallet()
            })
            .await
            .unwrap();
        let next = timeout(Duration::from_secs(1), changes.next()).await.unwrap();
        assert_eq!(next.unwrap().unwrap(), "dave");

        // Shutdown cancels the open wait, which ends the client iteration.
        let waiting = tokio::spawn(async move { changes.next().await });
        until_pending(&server.controller, 1).await;
        server.controller.shutdown();
        let ended = timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
        assert!(ended.is_none());
    }
}
