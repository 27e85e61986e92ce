// Direct messages and notifications, both pushed live through the event hub.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::events::LiveEvent;
use crate::model::{Chat, Notification, NotificationStatus, User, UserProfile};
use crate::uploads::{check_upload, store_upload, Upload};
use crate::Marketplace;

#[derive(Debug, Clone, Serialize)]
pub struct UnreadCount {
    pub unread: u64,
}

impl Marketplace {
    /// Store a notification and push it to the recipient.
    pub(crate) fn notify(
        &self,
        user_id: i64,
        request_id: Option<i64>,
        content: &str,
    ) -> AppResult<Notification> {
        let notification = self
            .db
            .insert_notification(user_id, request_id, content, Utc::now())?;
        let delivered = self.events.publish(
            user_id,
            LiveEvent::Notification {
                notification: notification.clone(),
            },
        );
        debug!(notification_id = notification.id, delivered, "notification published");
        Ok(notification)
    }

    pub fn messages(&self, user: &User) -> AppResult<Vec<Chat>> {
        Ok(self.db.chats_for_user(user.id)?)
    }

    pub fn conversation(&self, user: &User, other_id: i64) -> AppResult<Vec<Chat>> {
        Ok(self.db.conversation(user.id, other_id)?)
    }

    /// Everyone the user has exchanged messages with.
    pub fn chat_list(&self, user: &User) -> AppResult<Vec<UserProfile>> {
        self.db
            .chat_partners(user.id)?
            .into_iter()
            .map(|partner| self.current_user(partner))
            .collect()
    }

    /// Exactly one of `content` and `file` must be present.
    pub async fn send_message(
        &self,
        sender: &User,
        receiver_id: i64,
        content: Option<String>,
        file: Option<Upload>,
    ) -> AppResult<Chat> {
        if self.db.get_user(receiver_id)?.is_none() {
            return Err(AppError::invalid(
                "receiver_id",
                "The selected receiver id is invalid.",
            ));
        }
        let content = content.filter(|c| !c.trim().is_empty());

        let file_path = match (&content, file) {
            (Some(_), Some(_)) => {
                return Err(AppError::BadRequest(
                    "You cannot send a message with both text and a file.".into(),
                ))
            }
            (None, None) => {
                return Err(AppError::invalid(
                    "content",
                    "The content field is required when file is not present.",
                ))
            }
            (Some(_), None) => None,
            (None, Some(upload)) => {
                let uploads = &self.config.uploads;
                let allowed: Vec<&str> =
                    uploads.allowed_extensions.iter().map(String::as_str).collect();
                let ext = check_upload(uploads, "file", &upload, &allowed)?;
                Some(store_upload(uploads, "chat_files", &upload, &ext).await?)
            }
        };

        let chat = self.db.insert_chat(
            sender.id,
            receiver_id,
            content.as_deref(),
            file_path.as_deref(),
            Utc::now(),
        )?;
        info!(chat_id = chat.id, sender = sender.id, receiver_id, "message sent");
        self.events.publish(
            receiver_id,
            LiveEvent::MessageSent {
                message: chat.clone(),
            },
        );
        Ok(chat)
    }

    pub fn notifications(&self, user: &User) -> AppResult<Vec<Notification>> {
        Ok(self.db.notifications_for(user.id)?)
    }

    pub fn mark_notification_read(&self, user: &User, id: i64) -> AppResult<Notification> {
        let notification = self
            .db
            .get_notification(id)?
            .ok_or_else(|| AppError::not_found("Notification"))?;
        if notification.user_id != user.id {
            return Err(AppError::Forbidden(
                "You can only update your own notifications.".into(),
            ));
        }
        self.db
            .set_notification_status(id, NotificationStatus::Read)?;
        Ok(Notification {
            status: NotificationStatus::Read,
            ..notification
        })
    }

    pub fn unread_count(&self, user: &User) -> AppResult<UnreadCount> {
        Ok(UnreadCount {
            unread: self.db.unread_notification_count(user.id)?,
        })
    }
}
