use talkify_relay::{validate_content, MessageStore, StoreError, StoredMessage, UserId};
use tracing::error;

use crate::users::UserRepository;

use super::MessageRepository;

/// [`MessageStore`] backed by the user and message tables.
#[derive(Clone)]
pub struct SqlMessageStore {
    users: UserRepository,
    messages: MessageRepository,
}

impl SqlMessageStore {
    pub fn new(users: UserRepository, messages: MessageRepository) -> Self {
        Self { users, messages }
    }
}

impl MessageStore for SqlMessageStore {
    async fn send(
        &self,
        sender: UserId,
        receiver: UserId,
        content: &str,
    ) -> Result<StoredMessage, StoreError> {
        validate_content(content)?;

        match self.users.get_by_id(receiver).await {
            Ok(Some(_)) => {}
            Ok(None) => return Err(StoreError::UnknownReceiver),
            Err(e) => {
                error!(receiver = %receiver, error = %e, "Receiver lookup failed");
                return Err(StoreError::persistence(e.to_string()));
            }
        }

        self.messages
            .create(sender, receiver, content)
            .await
            .map_err(|e| StoreError::persistence(e.to_string()))
    }
}
