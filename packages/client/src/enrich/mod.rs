//! Event enrichment: the ordered decorator chain applied to every event
//! between `log_event` and serialization.
//!
//! Each decorator mutates the event in place and may veto it entirely by
//! returning `false`; a vetoed event disappears silently (the caller
//! already got `Ok`). Composition is a plain ordered vector — no
//! hierarchies.

pub mod common_fields;
pub mod inspector;
pub mod semantic;

use std::sync::Arc;

use beacon_core::EventProperties;

pub use common_fields::CommonFieldsDecorator;
pub use inspector::{DataConcernType, DataInspectorDecorator};
pub use semantic::SemanticContextDecorator;

/// Reserved property names stamped by the standard decorators.
pub mod fields {
    /// Tenant token the event is billed under.
    pub const IKEY: &str = "iKey";
    /// Per-logger submission sequence number.
    pub const SEQUENCE: &str = "EventInfo.Sequence";
    /// Event source (the logger's source string).
    pub const SOURCE: &str = "EventInfo.Source";
    /// SDK version stamp.
    pub const SDK_VERSION: &str = "EventInfo.SdkVersion";
    /// Data-inspector annotations: `"field:Concern"` strings.
    pub const PRIVACY_CONCERNS: &str = "PrivacyGuard.Concerns";
}

/// One stage of the enrichment chain.
///
/// Used as `Arc<dyn EventDecorator>`.
pub trait EventDecorator: Send + Sync {
    /// Decorator name, for diagnostics.
    fn name(&self) -> &'static str;

    /// Mutates the event; `false` drops it silently.
    fn decorate(&self, event: &mut EventProperties) -> bool;
}

/// Ordered decorator pipeline.
#[derive(Clone, Default)]
pub struct DecoratorChain {
    decorators: Vec<Arc<dyn EventDecorator>>,
}

impl DecoratorChain {
    /// Builds a chain from the given stages, applied in order.
    #[must_use]
    pub fn new(decorators: Vec<Arc<dyn EventDecorator>>) -> Self {
        Self { decorators }
    }

    /// Appends a stage.
    pub fn push(&mut self, decorator: Arc<dyn EventDecorator>) {
        self.decorators.push(decorator);
    }

    /// Runs every stage; `false` as soon as any stage vetoes the event.
    pub fn decorate(&self, event: &mut EventProperties) -> bool {
        for decorator in &self.decorators {
            if !decorator.decorate(event) {
                tracing::debug!(
                    event = event.name(),
                    decorator = decorator.name(),
                    "event vetoed by decorator"
                );
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Veto;

    impl EventDecorator for Veto {
        fn name(&self) -> &'static str {
            "veto"
        }

        fn decorate(&self, _event: &mut EventProperties) -> bool {
            false
        }
    }

    struct Tag(&'static str);

    impl EventDecorator for Tag {
        fn name(&self) -> &'static str {
            "tag"
        }

        fn decorate(&self, event: &mut EventProperties) -> bool {
            event.set_property(self.0, true).is_ok()
        }
    }

    #[test]
    fn chain_runs_in_order_until_veto() {
        let chain = DecoratorChain::new(vec![Arc::new(Tag("first")), Arc::new(Veto)]);
        let mut event = EventProperties::new("e").unwrap();
        assert!(!chain.decorate(&mut event));
        // The stage before the veto already ran.
        assert!(event.property("first").is_some());
    }

    #[test]
    fn empty_chain_accepts() {
        let chain = DecoratorChain::default();
        let mut event = EventProperties::new("e").unwrap();
        assert!(chain.decorate(&mut event));
    }
}
