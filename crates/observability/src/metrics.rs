//! Broker 指标收集模块
//!
//! 基于 `metrics` facade 记录分发、确认与持久化的运行指标。
//! 未安装 recorder 时所有调用均为空操作。

use contracts::Message;
use metrics::{counter, gauge, histogram};

/// 记录消息投递给消费者
pub fn record_delivered(consumer_id: u64, msg: &Message) {
    counter!(
        "broker_messages_delivered_total",
        "consumer_id" => consumer_id.to_string()
    )
    .increment(1);
    histogram!("broker_message_payload_bytes").record(msg.data().len() as f64);
}

/// 记录消费者确认
pub fn record_acked(consumer_id: u64, requeue: bool) {
    let outcome = if requeue { "requeue" } else { "ack" };
    counter!(
        "broker_messages_acked_total",
        "consumer_id" => consumer_id.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// 记录退回 Source 的消息
pub fn record_requeued(count: usize) {
    counter!("broker_messages_requeued_total").increment(count as u64);
}

/// 记录 handler 失败（消费者被强制注销）
pub fn record_handler_failure(consumer_id: u64) {
    counter!(
        "broker_handler_failures_total",
        "consumer_id" => consumer_id.to_string()
    )
    .increment(1);
}

/// 记录当前注册的消费者数量
pub fn record_consumers(count: usize) {
    gauge!("broker_consumers_registered").set(count as f64);
}

/// 记录消费者在途消息数
pub fn record_pending(consumer_id: u64, pending: usize) {
    gauge!(
        "broker_consumer_pending",
        "consumer_id" => consumer_id.to_string()
    )
    .set(pending as f64);
}

/// 记录预取补充
pub fn record_prefetch_refill(requested: usize, filled: usize) {
    counter!("broker_prefetch_requested_total").increment(requested as u64);
    counter!("broker_prefetch_filled_total").increment(filled as u64);
}

/// 记录持久化读取失败
pub fn record_read_failure() {
    counter!("broker_persistence_read_failures_total").increment(1);
}

/// 记录持久化 checkpoint
pub fn record_checkpoint(checkpoint: u64) {
    gauge!("broker_durable_checkpoint").set(checkpoint as f64);
}

/// 记录限流拒绝
pub fn record_throttled() {
    counter!("broker_source_throttled_total").increment(1);
}
