//! Persisted structured entities.
//!
//! Each kind is stored as its latest JSON value under an identity key taken
//! from the request context. Every field is optional: an absent field means
//! unknown, never empty or false.

pub mod iiot;
pub mod profile;

use foreman_core::{Context, ForemanError, Result};
use schemars::schema_for;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

pub use iiot::{Customer, CustomerStatus, Factory, SurveyFactory};
pub use profile::{Knowledge, Triple, UserProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Customer,
    Factory,
    SurveyFactory,
    UserProfile,
    Triple,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Customer,
        EntityKind::Factory,
        EntityKind::SurveyFactory,
        EntityKind::UserProfile,
        EntityKind::Triple,
    ];

    /// Name used for storage and as the extraction tool name.
    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Customer => "Customer",
            EntityKind::Factory => "Factory",
            EntityKind::SurveyFactory => "SurveyFactory",
            EntityKind::UserProfile => "UserProfile",
            EntityKind::Triple => "Triple",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Lowercase label for user-facing text, e.g. "updated survey factory".
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Customer => "customer",
            EntityKind::Factory => "factory",
            EntityKind::SurveyFactory => "survey factory",
            EntityKind::UserProfile => "user profile",
            EntityKind::Triple => "knowledge",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            EntityKind::Customer => "Business information and project status of the customer.",
            EntityKind::Factory => "Deployable factory model: production lines, machines, controllers and points.",
            EntityKind::SurveyFactory => "Field survey of the customer's factory: areas, machines, controllers and points.",
            EntityKind::UserProfile => "What is known about the user.",
            EntityKind::Triple => "Facts about the workspace as subject/predicate/object triples.",
        }
    }

    /// Context field whose value is the identity key.
    pub fn scope_field(&self) -> &'static str {
        match self {
            EntityKind::Customer | EntityKind::Factory | EntityKind::SurveyFactory => "customer_id",
            EntityKind::UserProfile => "user_id",
            EntityKind::Triple => "workspace_id",
        }
    }

    /// Resolve the identity key for this kind from the request context.
    pub fn identity(&self, ctx: &Context) -> Result<String> {
        ctx.field(self.scope_field())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ForemanError::MissingScope {
                kind: self.name().into(),
                field: self.scope_field().into(),
            })
    }

    /// JSON Schema of the kind, used as the extraction tool parameters.
    pub fn schema(&self) -> Value {
        let root = match self {
            EntityKind::Customer => schema_for!(Customer),
            EntityKind::Factory => schema_for!(Factory),
            EntityKind::SurveyFactory => schema_for!(SurveyFactory),
            EntityKind::UserProfile => schema_for!(UserProfile),
            EntityKind::Triple => schema_for!(Knowledge),
        };
        let mut schema = serde_json::to_value(root).unwrap_or_else(|_| Value::Object(Default::default()));
        if let Some(obj) = schema.as_object_mut() {
            obj.remove("$schema");
        }
        schema
    }

    /// Validate a candidate against the kind's schema and return its
    /// canonical form (known fields only, keys sorted).
    pub fn validate(&self, candidate: Value) -> Result<Value> {
        if !candidate.is_object() {
            return Err(self.invalid(format!("expected an object, got {}", type_name(&candidate))));
        }
        match self {
            EntityKind::Customer => self.canonical::<Customer>(candidate),
            EntityKind::Factory => self.canonical::<Factory>(candidate),
            EntityKind::SurveyFactory => self.canonical::<SurveyFactory>(candidate),
            EntityKind::UserProfile => self.canonical::<UserProfile>(candidate),
            EntityKind::Triple => self.canonical::<Knowledge>(candidate),
        }
    }

    fn canonical<T: DeserializeOwned + Serialize>(&self, candidate: Value) -> Result<Value> {
        let typed: T = serde_json::from_value(candidate).map_err(|e| self.invalid(e.to_string()))?;
        Ok(serde_json::to_value(typed)?)
    }

    fn invalid(&self, reason: String) -> ForemanError {
        ForemanError::Validation {
            kind: self.name().into(),
            reason,
        }
    }

    /// Overwrite the identity field of a canonical value with `key`, so an
    /// extraction can never move an entity to another key.
    pub fn stamp_identity(&self, value: &mut Value, key: &str) {
        if let Some(obj) = value.as_object_mut() {
            obj.insert(self.scope_field().into(), Value::String(key.into()));
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
