//! 业务事件通知编排
//!
//! 把预约、留言等业务事件翻译成面向患者和医生的通知文案并触发分发。
//! 文案为英文，与既有客户端展示保持一致。
//!
//! 事件编排是尽力而为的：单个收件人的分发失败只记日志，
//! 不向触发事件的业务流程传播。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, instrument};

use crate::dispatcher::Dispatcher;
use crate::types::{NotificationContent, NotificationType};

/// 通知参与者（患者、医生或留言发送者）
///
/// 展示名优先使用姓名，姓名为空时退回用户名。
#[derive(Debug, Clone)]
pub struct Participant {
    pub user_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: String,
}

impl Participant {
    pub fn display_name(&self) -> String {
        let full = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        );
        let full = full.trim();
        if full.is_empty() {
            self.username.clone()
        } else {
            full.to_string()
        }
    }
}

/// 对方缺席时的占位称呼
fn name_or(participant: Option<&Participant>, fallback: &str) -> String {
    participant
        .map(Participant::display_name)
        .unwrap_or_else(|| fallback.to_string())
}

/// 留言正文超过 50 字符时截断为前 47 字符加省略号
fn truncate_preview(text: &str) -> String {
    if text.chars().count() > 50 {
        let head: String = text.chars().take(47).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn format_time(date: &DateTime<Utc>) -> String {
    date.format("%H:%M").to_string()
}

/// 业务事件通知编排器
pub struct EventNotifier {
    dispatcher: Arc<Dispatcher>,
}

impl EventNotifier {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// 分发一条事件通知，失败只记日志
    async fn notify(&self, recipient: &str, content: NotificationContent) {
        if let Err(e) = self.dispatcher.dispatch(recipient, &content).await {
            error!(recipient, error = %e, "事件通知分发失败");
        }
    }

    /// 预约创建：通知患者和医生双方
    ///
    /// 任一方缺席时跳过对应通知，另一方照常发送。
    #[instrument(skip(self, patient, doctor))]
    pub async fn appointment_scheduled(
        &self,
        appointment_id: &str,
        date: DateTime<Utc>,
        patient: Option<&Participant>,
        doctor: Option<&Participant>,
    ) {
        let formatted_date = format_date(&date);
        let formatted_time = format_time(&date);

        if let Some(patient) = patient {
            let doctor_name = name_or(doctor, "Your doctor");
            let content = NotificationContent::new(
                NotificationType::Appointment,
                "New Appointment Confirmed",
                format!(
                    "Your appointment with {doctor_name} has been scheduled for \
                     {formatted_date} at {formatted_time}."
                ),
            )
            .with_data("appointmentId", appointment_id)
            .with_data("type", "NEW_APPOINTMENT");
            self.notify(&patient.user_id, content).await;
        }

        if let Some(doctor) = doctor {
            let patient_name = name_or(patient, "A patient");
            let content = NotificationContent::new(
                NotificationType::Appointment,
                "New Appointment Scheduled",
                format!(
                    "{patient_name} has scheduled an appointment with you for \
                     {formatted_date} at {formatted_time}."
                ),
            )
            .with_data("appointmentId", appointment_id)
            .with_data("type", "NEW_APPOINTMENT");
            self.notify(&doctor.user_id, content).await;
        }
    }

    /// 预约改期：向双方通知新的时间
    #[instrument(skip(self, patient, doctor))]
    pub async fn appointment_rescheduled(
        &self,
        appointment_id: &str,
        new_date: DateTime<Utc>,
        patient: Option<&Participant>,
        doctor: Option<&Participant>,
    ) {
        let formatted_date = format_date(&new_date);
        let formatted_time = format_time(&new_date);

        if let Some(patient) = patient {
            let doctor_name = name_or(doctor, "Your doctor");
            let content = NotificationContent::new(
                NotificationType::Appointment,
                "Appointment Rescheduled",
                format!(
                    "Your appointment with {doctor_name} has been rescheduled to \
                     {formatted_date} at {formatted_time}."
                ),
            )
            .with_data("appointmentId", appointment_id)
            .with_data("type", "UPDATED_APPOINTMENT");
            self.notify(&patient.user_id, content).await;
        }

        if let Some(doctor) = doctor {
            let patient_name = name_or(patient, "A patient");
            let content = NotificationContent::new(
                NotificationType::Appointment,
                "Appointment Rescheduled",
                format!(
                    "Your appointment with {patient_name} has been rescheduled to \
                     {formatted_date} at {formatted_time}."
                ),
            )
            .with_data("appointmentId", appointment_id)
            .with_data("type", "UPDATED_APPOINTMENT");
            self.notify(&doctor.user_id, content).await;
        }
    }

    /// 预约取消：向双方通知，不附带时间
    #[instrument(skip(self, patient, doctor))]
    pub async fn appointment_cancelled(
        &self,
        appointment_id: &str,
        patient: Option<&Participant>,
        doctor: Option<&Participant>,
    ) {
        if let Some(patient) = patient {
            let doctor_name = name_or(doctor, "Your doctor");
            let content = NotificationContent::new(
                NotificationType::Appointment,
                "Appointment Cancelled",
                format!("Your appointment with {doctor_name} has been cancelled."),
            )
            .with_data("appointmentId", appointment_id)
            .with_data("type", "CANCELLED_APPOINTMENT");
            self.notify(&patient.user_id, content).await;
        }

        if let Some(doctor) = doctor {
            let patient_name = name_or(patient, "A patient");
            let content = NotificationContent::new(
                NotificationType::Appointment,
                "Appointment Cancelled",
                format!("Your appointment with {patient_name} has been cancelled."),
            )
            .with_data("appointmentId", appointment_id)
            .with_data("type", "CANCELLED_APPOINTMENT");
            self.notify(&doctor.user_id, content).await;
        }
    }

    /// 新留言：通知收件人，正文为截断后的留言预览
    #[instrument(skip(self, sender, content))]
    pub async fn message_received(
        &self,
        message_id: &str,
        recipient_id: &str,
        sender: Option<&Participant>,
        content: &str,
    ) {
        let sender_name = sender
            .map(|s| s.username.clone())
            .unwrap_or_else(|| "Someone".to_string());
        let sender_id = sender.map(|s| s.user_id.clone()).unwrap_or_default();

        let notification = NotificationContent::new(
            NotificationType::Message,
            format!("New message from {sender_name}"),
            truncate_preview(content),
        )
        .with_data("messageId", message_id)
        .with_data("senderId", sender_id)
        .with_data("type", "NEW_MESSAGE");

        self.notify(recipient_id, notification).await;
    }
}
