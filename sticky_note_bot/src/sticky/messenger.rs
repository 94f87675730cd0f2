use async_trait::async_trait;
use teloxide::{
    prelude::Requester,
    types::{ChatId, MessageId},
    Bot, RequestError,
};

/// The slice of the chat platform the sticky message subsystem talks to.
/// [`Bot`] is the real implementation; tests substitute their own to
/// simulate platform failures.
#[async_trait]
pub trait ChannelMessenger: Send + Sync {
    /// Delete a previously sent message. "Message is already gone" and
    /// "no permission" both come back as errors.
    async fn delete_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<(), RequestError>;

    /// Send a plain text message to the chat and return its id.
    async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<MessageId, RequestError>;
}

#[async_trait]
impl ChannelMessenger for Bot {
    async fn delete_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<(), RequestError> {
        Requester::delete_message(self, chat_id, message_id).await?;
        Ok(())
    }

    async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<MessageId, RequestError> {
        let message = Requester::send_message(self, chat_id, text.to_owned()).await?;
        Ok(message.id)
    }
}
