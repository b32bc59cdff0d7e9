//! Test doubles shared by the unit tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use contracts::{handler, ContractError, Message, ReceiveHandler, Source, Trigger};

/// In-memory source recording every callback
///
/// Requeued messages are recorded, not redelivered.
#[derive(Default)]
pub(crate) struct VecSource {
    queue: Mutex<VecDeque<Message>>,
    acked: Mutex<Vec<u64>>,
    nacked: Mutex<Vec<u64>>,
    sent: Mutex<Vec<u64>>,
    trigger: Mutex<Option<Trigger>>,
}

impl VecSource {
    pub(crate) fn with_ids(ids: impl IntoIterator<Item = u64>) -> Arc<Self> {
        let source = Arc::new(Self::default());
        source.extend(ids);
        source
    }

    pub(crate) fn extend(&self, ids: impl IntoIterator<Item = u64>) {
        self.queue
            .lock()
            .unwrap()
            .extend(ids.into_iter().map(Message::empty));
    }

    /// Invoke the trigger handed over by `start`
    pub(crate) fn fire(&self) {
        let trigger = self.trigger.lock().unwrap().clone();
        if let Some(trigger) = trigger {
            trigger();
        }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub(crate) fn acked(&self) -> Vec<u64> {
        self.acked.lock().unwrap().clone()
    }

    pub(crate) fn nacked(&self) -> Vec<u64> {
        self.nacked.lock().unwrap().clone()
    }

    pub(crate) fn sent(&self) -> Vec<u64> {
        self.sent.lock().unwrap().clone()
    }
}

impl Source for VecSource {
    fn next(&self) -> Option<Message> {
        self.queue.lock().unwrap().pop_front()
    }

    fn on_ack(&self, msg: &Message) {
        self.acked.lock().unwrap().push(msg.id());
    }

    fn on_nack(&self, msg: Message) {
        self.nacked.lock().unwrap().push(msg.id());
    }

    fn on_sent(&self, msg: &Message) {
        self.sent.lock().unwrap().push(msg.id());
    }

    fn start(&self, trigger: Trigger) -> Result<(), ContractError> {
        *self.trigger.lock().unwrap() = Some(trigger);
        Ok(())
    }

    fn capacity(&self) -> usize {
        usize::MAX
    }
}

/// Handler collecting every delivered message
pub(crate) fn collecting_handler() -> (ReceiveHandler, Arc<Mutex<Vec<Message>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let handler = handler(move |msg: &Message| {
        sink.lock().unwrap().push(msg.clone());
        Ok(())
    });
    (handler, received)
}

/// Poll until `condition` holds, failing after two seconds
pub(crate) async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
