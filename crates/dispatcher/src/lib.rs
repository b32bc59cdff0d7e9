//! # Dispatcher
//!
//! 消息分发模块。
//!
//! 负责：
//! - 单一事件循环维护消费者注册表
//! - 按配额 (quota) 从 `Source` 拉取消息并推送给消费者
//! - 乱序确认的对账与 checkpoint 推进 (`Consumer::ack`)
//! - 注销时将未确认消息全部退回 `Source`
//!
//! ## 使用示例
//!
//! ```ignore
//! use contracts::{handler, DispatcherConfig};
//! use dispatcher::Dispatcher;
//!
//! let dispatcher = Dispatcher::new(&DispatcherConfig::default(), source)?;
//! let event_loop = dispatcher.spawn();
//!
//! let consumer = dispatcher.register(handler(|msg| {
//!     println!("received {}", msg.id());
//!     Ok(())
//! }));
//! // ... later
//! consumer.ack(&msg, false);
//! consumer.unregister();
//! dispatcher.shutdown();
//! ```

pub mod consumer;
pub mod dispatcher;
pub mod error;

#[cfg(test)]
mod testing;

pub use consumer::Consumer;
pub use contracts::{handler, Message, ReceiveHandler, Source};
pub use dispatcher::Dispatcher;
pub use error::DispatcherError;
