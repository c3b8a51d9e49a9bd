use futures::stream::BoxStream;
use serde_json::Value;

use crate::scheduler::AgentSpec;

/// Stream of raw operations emitted by an agent
pub type OperationStream = BoxStream<'static, anyhow::Result<Value>>;

/// Read-only view of the run handed to producers
#[derive(Debug, Clone)]
pub struct ProducerContext {
    pub run_id: String,
    pub attempt: u32,
    pub max_attempts: u32,
    /// Error of the previous attempt, if any
    pub previous_error: Option<String>,
    /// Current completion of the agent's requirements
    pub requirement_completion: Vec<(String, f64)>,
}

/// Source of agent behavior
///
/// Implemented by the application; the engine only consumes the operations.
#[async_trait::async_trait]
pub trait AgentProducer: Send + Sync {
    /// Start one attempt of `agent` and return its operation stream
    async fn produce(
        &self,
        agent: &AgentSpec,
        context: &ProducerContext,
    ) -> anyhow::Result<OperationStream>;
}

#[async_trait::async_trait]
impl<T: AgentProducer + ?Sized> AgentProducer for std::sync::Arc<T> {
    async fn produce(
        &self,
        agent: &AgentSpec,
        context: &ProducerContext,
    ) -> anyhow::Result<OperationStream> {
        (**self).produce(agent, context).await
    }
}
