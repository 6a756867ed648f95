//! 通知分发服务
//!
//! 负责将业务事件（预约创建/改期/取消、新消息）推送到用户注册的设备，
//! 并将每次分发的结果落库为通知记录。推送失败是数据而非异常：
//! 无论推送成败，每次分发都恰好产生一条通知记录，只有记录写入失败
//! 才会作为错误向调用方传播。

pub mod api;
pub mod channel;
pub mod composer;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod fanout;
pub mod memory;
pub mod store;
pub mod types;
