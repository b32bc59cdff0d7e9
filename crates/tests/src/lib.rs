//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 完整链路 e2e 测试：LogPersistence -> QosSource -> Dispatcher -> Consumer

#[cfg(test)]
mod contract_tests {
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{BrokerConfig, Message};

    #[test]
    fn test_contracts_compile() {
        let msg = Message::new(1, "payload");
        assert_eq!(msg.id(), 1);
        assert_eq!(msg.data().as_ref(), b"payload");
    }

    #[test]
    fn test_default_config_round_trips_through_loader() {
        let toml = ConfigLoader::to_toml(&BrokerConfig::default()).unwrap();
        let config = ConfigLoader::load_from_str(&toml, ConfigFormat::Toml).unwrap();
        assert_eq!(config, BrokerConfig::default());
    }

    #[test]
    fn test_checkpoint_matches_ledger_reconciliation() {
        use ledger::{Checkpoint, InFlightLedger};
        use rand::seq::SliceRandom;

        let mut ids: Vec<u64> = (1..=32).collect();
        let ledger = InFlightLedger::new(ids.len());
        for id in &ids {
            ledger.record(Message::empty(*id));
        }
        ids.shuffle(&mut rand::rng());

        let mut checkpoint = Checkpoint::new();
        for id in ids {
            ledger.acknowledge(id).unwrap();
            checkpoint.acknowledge(id);
            assert_eq!(ledger.checkpoint(), checkpoint.value());
        }
        assert_eq!(checkpoint.value(), 32);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{handler, BrokerConfig, Message, Source};
    use dispatcher::{Consumer, Dispatcher};
    use persistence::LogPersistence;
    use qos::QosSource;
    use tokio::sync::mpsc;

    type Received = Arc<Mutex<Vec<u64>>>;

    async fn eventually(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn feed(count: u64) -> Vec<Message> {
        (1..=count)
            .map(|id| Message::new(id, format!("message-{id}")))
            .collect()
    }

    fn broker(
        config: &BrokerConfig,
        messages: Vec<Message>,
    ) -> (Dispatcher, Arc<QosSource<LogPersistence>>) {
        let persistence = LogPersistence::from_messages(config.persistence.capacity, messages);
        let source = Arc::new(QosSource::new(config.source.clone(), persistence));
        let dispatcher = Dispatcher::new(&config.dispatcher, source.clone()).unwrap();
        dispatcher.spawn();
        (dispatcher, source)
    }

    /// Consumer that acknowledges every message from a separate task
    fn acking_consumer(dispatcher: &Dispatcher) -> (Arc<Consumer>, Received) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let consumer = dispatcher.register(handler(move |msg: &Message| {
            let _ = tx.send(msg.clone());
            Ok(())
        }));

        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let acker = Arc::clone(&consumer);
        let log = Arc::clone(&received);
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                log.lock().unwrap().push(msg.id());
                acker.ack(&msg, false);
            }
        });
        (consumer, received)
    }

    /// Consumer that never acknowledges
    fn silent_consumer(dispatcher: &Dispatcher) -> (Arc<Consumer>, Received) {
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&received);
        let consumer = dispatcher.register(handler(move |msg: &Message| {
            log.lock().unwrap().push(msg.id());
            Ok(())
        }));
        (consumer, received)
    }

    /// End-to-end: every message is delivered once and checkpointed
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_e2e_all_messages_checkpointed() {
        let config = ConfigLoader::load_from_str(
            r#"
[dispatcher]
event_queue_size = 64
quota = 4

[persistence]
capacity = 16
"#,
            ConfigFormat::Toml,
        )
        .unwrap();
        let (dispatcher, source) = broker(&config, feed(40));

        let (first, first_received) = acking_consumer(&dispatcher);
        let (second, second_received) = acking_consumer(&dispatcher);

        eventually(|| source.persistence().checkpoint() == 40).await;

        let mut all: Vec<u64> = first_received.lock().unwrap().clone();
        all.extend(second_received.lock().unwrap().iter());
        all.sort_unstable();
        assert_eq!(all, (1..=40).collect::<Vec<_>>());
        assert!(first.pending() <= config.dispatcher.quota);
        assert!(second.pending() <= config.dispatcher.quota);

        dispatcher.shutdown();
        source.shutdown().await.unwrap();
        let stats = source.persistence().stats();
        assert_eq!(stats.acks, 40);
        assert_eq!(stats.duplicates, 0);
        assert_eq!(stats.sents, 40);
    }

    /// A consumer leaving mid-stream hands its messages to the survivor
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_e2e_unregistered_consumer_messages_redelivered() {
        let mut config = BrokerConfig::default();
        config.dispatcher.quota = 4;
        config.persistence.capacity = 16;
        let (dispatcher, source) = broker(&config, feed(24));

        let (quitter, quitter_received) = silent_consumer(&dispatcher);
        eventually(|| quitter_received.lock().unwrap().len() == 4).await;

        let (_survivor, survivor_received) = acking_consumer(&dispatcher);
        eventually(|| survivor_received.lock().unwrap().len() >= 4).await;

        quitter.unregister();
        assert_eq!(quitter.pending(), 0);

        eventually(|| source.persistence().checkpoint() == 24).await;

        let survivor: HashSet<u64> = survivor_received.lock().unwrap().iter().copied().collect();
        for id in quitter_received.lock().unwrap().iter() {
            assert!(survivor.contains(id), "message {id} was not redelivered");
        }
        assert_eq!(survivor.len(), 24);

        dispatcher.shutdown();
        source.shutdown().await.unwrap();
        assert_eq!(source.persistence().stats().duplicates, 0);
    }

    /// Token bucket caps deliveries within one refill window
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_e2e_rate_limit_caps_window() {
        let mut config = BrokerConfig::default();
        config.dispatcher.quota = 100;
        config.source.rate_per_sec = 5;
        config.source.refill_interval_ms = 60_000;
        config.persistence.capacity = 16;
        let (dispatcher, source) = broker(&config, feed(10));

        let (consumer, received) = silent_consumer(&dispatcher);
        eventually(|| received.lock().unwrap().len() == 5).await;

        dispatcher.trigger();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(received.lock().unwrap().len(), 5);
        assert_eq!(consumer.pending(), 5);
        assert_eq!(source.available_tokens(), 0);

        dispatcher.shutdown();
        source.shutdown().await.unwrap();
    }

    /// A failing handler loses its consumer, never its messages
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_e2e_handler_failure_redelivers_to_next_consumer() {
        let mut config = BrokerConfig::default();
        config.dispatcher.quota = 2;
        config.persistence.capacity = 8;
        let (dispatcher, source) = broker(&config, feed(6));

        let broken = dispatcher.register(handler(|msg: &Message| {
            Err(contracts::ContractError::handler(1, format!("cannot take {}", msg.id())))
        }));
        eventually(|| !broken.is_active()).await;

        let (_consumer, received) = acking_consumer(&dispatcher);
        eventually(|| source.persistence().checkpoint() == 6).await;

        let delivered: HashSet<u64> = received.lock().unwrap().iter().copied().collect();
        assert_eq!(delivered, (1..=6).collect());

        dispatcher.shutdown();
        source.shutdown().await.unwrap();
    }

    /// A requeued message comes back without further acks at the default unlimited rate
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_e2e_requeued_message_redelivered_when_unlimited() {
        let mut config = BrokerConfig::default();
        config.source.rate_per_sec = 0;
        config.source.refill_interval_ms = 100;
        config.dispatcher.quota = 2;
        config.persistence.capacity = 4;
        let (dispatcher, source) = broker(&config, feed(1));

        let (consumer, received) = silent_consumer(&dispatcher);
        eventually(|| received.lock().unwrap().len() == 1).await;

        consumer.ack(&Message::empty(1), true);
        assert_eq!(consumer.pending(), 0);
        eventually(|| *received.lock().unwrap() == vec![1, 1]).await;

        consumer.ack(&Message::empty(1), false);
        eventually(|| source.persistence().checkpoint() == 1).await;
        assert_eq!(consumer.pending(), 0);

        dispatcher.shutdown();
        source.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_source_capacity_follows_persistence() {
        let config = BrokerConfig::default();
        let source = QosSource::new(
            config.source.clone(),
            LogPersistence::from_config(&config.persistence),
        );
        assert_eq!(source.capacity(), config.persistence.capacity);
    }
}
