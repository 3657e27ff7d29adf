//! Second enrichment stage: semantic context merge.
//!
//! Merge order is host first, then the logger's own context, then the
//! event's explicit properties — later writers win, so an event can always
//! override ambient state. Whether the host map participates at all is the
//! scope decision that isolates guest modules.

use std::sync::Arc;

use beacon_core::{ContextScope, EventProperties, SemanticContext};
use parking_lot::RwLock;

use super::EventDecorator;

/// Merges host and per-logger semantic context into events.
pub struct SemanticContextDecorator {
    host: Arc<RwLock<SemanticContext>>,
    local: Arc<RwLock<SemanticContext>>,
    scope: ContextScope,
}

impl SemanticContextDecorator {
    /// Creates the stage for one logger.
    #[must_use]
    pub fn new(
        host: Arc<RwLock<SemanticContext>>,
        local: Arc<RwLock<SemanticContext>>,
        scope: ContextScope,
    ) -> Self {
        Self { host, local, scope }
    }

    fn apply(context: &SemanticContext, event: &mut EventProperties) {
        for (key, property) in context.iter() {
            if event.property(key).is_some() {
                continue; // the event's own value wins
            }
            if event.set_property_with(key, property.clone()).is_err() {
                tracing::warn!(key, "context key fails name validation, skipped");
            }
        }
    }
}

impl EventDecorator for SemanticContextDecorator {
    fn name(&self) -> &'static str {
        "semantic-context"
    }

    fn decorate(&self, event: &mut EventProperties) -> bool {
        // Logger context first so it shadows the host map below it.
        Self::apply(&self.local.read(), event);
        if self.scope.merges_host_context() {
            Self::apply(&self.host.read(), event);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(scope: ContextScope) -> SemanticContextDecorator {
        let mut host = SemanticContext::new();
        host.set("X", "host");
        let mut local = SemanticContext::new();
        local.set("Y", "local");
        SemanticContextDecorator::new(
            Arc::new(RwLock::new(host)),
            Arc::new(RwLock::new(local)),
            scope,
        )
    }

    #[test]
    fn all_scope_merges_host() {
        let mut event = EventProperties::new("e").unwrap();
        assert!(stage(ContextScope::All).decorate(&mut event));
        assert_eq!(event.property("X").unwrap().value.as_str(), Some("host"));
        assert_eq!(event.property("Y").unwrap().value.as_str(), Some("local"));
    }

    #[test]
    fn none_scope_sees_only_local() {
        let mut event = EventProperties::new("e").unwrap();
        assert!(stage(ContextScope::None).decorate(&mut event));
        assert!(event.property("X").is_none());
        assert_eq!(event.property("Y").unwrap().value.as_str(), Some("local"));
    }

    #[test]
    fn event_value_beats_context() {
        let mut event = EventProperties::new("e").unwrap();
        event.set_property("X", "explicit").unwrap();
        stage(ContextScope::All).decorate(&mut event);
        assert_eq!(
            event.property("X").unwrap().value.as_str(),
            Some("explicit")
        );
    }

    #[test]
    fn local_context_shadows_host() {
        let mut host = SemanticContext::new();
        host.set("K", "host");
        let mut local = SemanticContext::new();
        local.set("K", "local");
        let stage = SemanticContextDecorator::new(
            Arc::new(RwLock::new(host)),
            Arc::new(RwLock::new(local)),
            ContextScope::All,
        );
        let mut event = EventProperties::new("e").unwrap();
        stage.decorate(&mut event);
        assert_eq!(event.property("K").unwrap().value.as_str(), Some("local"));
    }
}
