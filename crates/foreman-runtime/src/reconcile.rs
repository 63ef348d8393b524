//! Entity reconciliation: merge what a conversation says into the persisted
//! record of one entity kind.

use foreman_core::{Context, Message, Result};
use foreman_llm::{ExtractionRequest, ExtractionTarget, ModelCapability};
use foreman_memory::{EntityKind, EntityStore};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::template::{Bindings, render};

const RECONCILE_TEMPLATE: &str = "{guidance}

The current {label} record is shown below. It is the baseline for your update and may be empty.

<{kind}>
{baseline}
</{kind}>

Call the {kind} tool with the complete updated record. Start from the baseline and change only \
what the conversation states explicitly. Never invent values the conversation does not contain; \
leave unknown fields out. If the conversation adds nothing, return the baseline unchanged.";

/// Outcome of one reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// The model proposed nothing.
    NoUpdate,
    /// The canonical value that was persisted.
    Updated(Value),
}

pub struct Reconciler {
    model: Arc<dyn ModelCapability>,
    entities: Arc<dyn EntityStore>,
}

impl Reconciler {
    pub fn new(model: Arc<dyn ModelCapability>, entities: Arc<dyn EntityStore>) -> Self {
        Self { model, entities }
    }

    /// Current persisted value for `kind` in the scope of `ctx`.
    pub async fn snapshot(&self, ctx: &Context, kind: EntityKind) -> Result<Option<Value>> {
        let key = kind.identity(ctx)?;
        self.entities.find(kind, &key).await
    }

    /// Ask the model for an updated record of `kind` given `slice`, validate
    /// every candidate, and persist the first.
    ///
    /// No write happens unless every candidate validates. Empty-object
    /// candidates count as no proposal.
    pub async fn reconcile(
        &self,
        ctx: &Context,
        slice: &[Message],
        kind: EntityKind,
        guidance: &str,
    ) -> Result<Reconciliation> {
        let key = kind.identity(ctx)?;
        let baseline = self
            .entities
            .find(kind, &key)
            .await?
            .unwrap_or_else(|| json!({}));

        let request = ExtractionRequest {
            instruction: instruction(kind, &baseline, guidance),
            messages: slice.to_vec(),
            existing: json!({ kind.name(): baseline }),
            target: ExtractionTarget {
                name: kind.name().into(),
                description: kind.description().into(),
                schema: kind.schema(),
            },
        };

        let candidates = self.model.extract(&request).await?;
        debug!(kind = %kind, key = %key, candidates = candidates.len(), "Extraction returned");

        let validated = candidates
            .into_iter()
            .map(|c| kind.validate(c))
            .collect::<Result<Vec<_>>>()
            .inspect_err(|e| warn!(kind = %kind, key = %key, error = %e, "Rejected extraction"))?;

        let Some(mut value) = validated.into_iter().find(|v| !is_empty_object(v)) else {
            return Ok(Reconciliation::NoUpdate);
        };

        kind.stamp_identity(&mut value, &key);
        self.entities.store(kind, &key, &value).await?;
        info!(kind = %kind, key = %key, "Entity updated");
        Ok(Reconciliation::Updated(value))
    }
}

/// The system instruction for an extraction, carrying the baseline.
pub fn instruction(kind: EntityKind, baseline: &Value, guidance: &str) -> String {
    let baseline = serde_json::to_string_pretty(baseline).unwrap_or_else(|_| baseline.to_string());
    render(
        RECONCILE_TEMPLATE,
        &Bindings::from([
            ("guidance", guidance.to_string()),
            ("label", kind.label().to_string()),
            ("kind", kind.name().to_string()),
            ("baseline", baseline),
        ]),
    )
}

fn is_empty_object(v: &Value) -> bool {
    v.as_object().is_some_and(|o| o.is_empty())
}
