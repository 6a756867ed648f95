//! 通知服务错误类型
//!
//! 分发层唯一会向调用方传播的失败是通知记录写入失败——
//! 推送侧的所有失败（无 token、服务商拒绝、超时）都被吸收为
//! 记录状态，不走错误通道。

use clinic_shared::error::ClinicError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// 通知记录主写入失败（兜底写入已尝试过）
    #[error("通知记录写入失败: {0}")]
    StoreWriteFailed(#[source] ClinicError),

    #[error("收件人列表为空")]
    EmptyRecipients,

    #[error(transparent)]
    Shared(#[from] ClinicError),
}
