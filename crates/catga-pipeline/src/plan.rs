//! Extracts a `PipelinePlan` from a message type's `BehaviorAttribute`s
//! once at registration (spec §9 "attributes on message classes ->
//! descriptor records"; spec §4.H "materialized once per
//! (messageType, handlerType) pair and cached").

use std::time::Duration;

use catga_core::BehaviorAttribute;

#[derive(Debug, Clone, Default)]
pub struct PipelinePlan {
    pub idempotent: bool,
    pub lock_key_template: Option<String>,
    pub timeout: Option<Duration>,
    pub retry_max_attempts: Option<u32>,
    pub circuit_breaker_name: Option<String>,
    /// spec §4.H stage 7: only meaningful for event dispatch, set by
    /// the mediator's event registration, not derived from attributes.
    pub append_to_outbox: bool,
}

impl PipelinePlan {
    pub fn from_attributes(attrs: &[BehaviorAttribute]) -> Self {
        let mut plan = PipelinePlan::default();
        for attr in attrs {
            match attr {
                BehaviorAttribute::Idempotent => plan.idempotent = true,
                BehaviorAttribute::DistributedLock { key_template } => plan.lock_key_template = Some(key_template.clone()),
                BehaviorAttribute::Timeout { duration } => plan.timeout = Some(*duration),
                BehaviorAttribute::Retry { max_attempts } => plan.retry_max_attempts = Some(*max_attempts),
                BehaviorAttribute::CircuitBreaker { breaker_name } => plan.circuit_breaker_name = Some(breaker_name.clone()),
                // Routing is interpreted by the mediator, not the pipeline.
                BehaviorAttribute::Routing(_) => {}
            }
        }
        plan
    }

    pub fn with_outbox(mut self, append: bool) -> Self {
        self.append_to_outbox = append;
        self
    }
}

/// Expands `{field}` placeholders in a `DistributedLock` key template
/// against dispatch metadata (spec §4.H stage 4: "acquire lock keyed
/// by templated expansion of message fields").
pub fn expand_lock_key(template: &str, metadata: &catga_core::Metadata) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let field = &after[..end];
                match metadata.get(field) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 1 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use catga_core::Metadata;

    #[test]
    fn extracts_idempotent_and_lock_and_timeout() {
        let attrs = vec![
            BehaviorAttribute::Idempotent,
            BehaviorAttribute::DistributedLock { key_template: "order:{orderId}".into() },
            BehaviorAttribute::Timeout { duration: Duration::from_secs(5) },
        ];
        let plan = PipelinePlan::from_attributes(&attrs);
        assert!(plan.idempotent);
        assert_eq!(plan.lock_key_template.as_deref(), Some("order:{orderId}"));
        assert_eq!(plan.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn expand_lock_key_substitutes_known_fields() {
        let meta = Metadata::single("orderId", "O1");
        assert_eq!(expand_lock_key("order:{orderId}", &meta), "order:O1");
    }

    #[test]
    fn expand_lock_key_leaves_unknown_placeholders_untouched() {
        let meta = Metadata::new();
        assert_eq!(expand_lock_key("order:{missing}", &meta), "order:{missing}");
    }
}
