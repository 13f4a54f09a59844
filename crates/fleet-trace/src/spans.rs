//! Span creation for fleet operations.

use tracing::{Level, Span, span};

/// Attributes attached to a task execution span.
#[derive(Debug, Default)]
pub struct TaskAttributes {
    pub task_id: Option<String>,
    pub task_type: Option<String>,
    pub agent_id: Option<String>,
    pub server_id: Option<String>,
}

impl TaskAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task(mut self, id: impl Into<String>, task_type: impl Into<String>) -> Self {
        self.task_id = Some(id.into());
        self.task_type = Some(task_type.into());
        self
    }

    pub fn agent(mut self, id: impl Into<String>) -> Self {
        self.agent_id = Some(id.into());
        self
    }

    pub fn server(mut self, id: impl Into<String>) -> Self {
        self.server_id = Some(id.into());
        self
    }
}

/// Span around one task execution.
pub fn task_span(attrs: &TaskAttributes) -> Span {
    span!(
        Level::INFO,
        "task.execute",
        task.id = attrs.task_id.as_deref().unwrap_or(""),
        task.kind = attrs.task_type.as_deref().unwrap_or(""),
        agent.id = attrs.agent_id.as_deref().unwrap_or(""),
        server.id = attrs.server_id.as_deref().unwrap_or(""),
    )
}

/// Span for an agent-level operation such as registration or a poll tick.
pub fn agent_span(agent_id: &str, operation: &str) -> Span {
    span!(
        Level::INFO,
        "agent.operation",
        operation = operation,
        agent.id = agent_id,
    )
}

/// Span for one HTTP request handled by the manager.
pub fn request_span(request_id: &str, method: &str, path: &str) -> Span {
    span!(
        Level::INFO,
        "http.request",
        request.id = request_id,
        http.method = method,
        http.path = path,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_attributes_builder() {
        let attrs = TaskAttributes::new()
            .task("tsk_1", "PROVISION")
            .agent("agt_1")
            .server("srv-9");

        assert_eq!(attrs.task_id.as_deref(), Some("tsk_1"));
        assert_eq!(attrs.task_type.as_deref(), Some("PROVISION"));
        assert_eq!(attrs.server_id.as_deref(), Some("srv-9"));
    }
}
