use async_trait::async_trait;

use crate::Result;

use super::types::*;

/// Model client interface used by the hostess pipeline.
///
/// One call = one completion; tool execution loops live in the caller.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn provider(&self) -> ProviderKind;

    async fn complete(&self, req: ChatRequest) -> Result<ChatResponse>;
}
