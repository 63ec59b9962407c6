use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::ast::PolicySet;
use crate::entities::Entities;
use crate::error::PolicyError;
use crate::evaluator::{Authorizer, Request, Response};
use crate::loader;
use crate::schema::Schema;

#[derive(Clone)]
struct Loaded {
    policies: Arc<PolicySet>,
    schema: Option<Arc<Schema>>,
}

/// The main engine handle. Cloneable and thread-safe.
///
/// Policies are validated against the schema, when there is one, every time
/// they are loaded. Evaluation works on a snapshot, so a reload never blocks
/// or changes an evaluation in flight.
#[derive(Clone)]
pub struct PolicyEngine {
    inner: Arc<RwLock<Loaded>>,
}

impl PolicyEngine {
    pub fn new_from_str(policy_text: &str) -> Result<Self, PolicyError> {
        Self::load(policy_text, None)
    }

    pub fn new_from_str_with_schema(policy_text: &str, schema: Schema) -> Result<Self, PolicyError> {
        Self::load(policy_text, Some(Arc::new(schema)))
    }

    /// Like [`PolicyEngine::new_from_str_with_schema`], with the schema given
    /// as text in either schema format.
    pub fn new_from_str_with_schema_text(
        policy_text: &str,
        schema_text: &str,
    ) -> Result<Self, PolicyError> {
        let schema = loader::compile_schema(schema_text)?;
        Self::new_from_str_with_schema(policy_text, schema)
    }

    fn load(policy_text: &str, schema: Option<Arc<Schema>>) -> Result<Self, PolicyError> {
        let policies = loader::compile_policy(policy_text, schema.as_ref())?;
        Ok(PolicyEngine {
            inner: Arc::new(RwLock::new(Loaded {
                policies: Arc::new(policies),
                schema,
            })),
        })
    }

    /// Replace the policies. The new text is validated against the current
    /// schema; on failure the old policies stay in place.
    pub fn reload_from_str(&self, policy_text: &str) -> Result<(), PolicyError> {
        let schema = self.inner.read()?.schema.clone();
        let new_set = loader::compile_policy(policy_text, schema.as_ref())?;
        info!(
            event = "Reload",
            phase = "Policies",
            policies = new_set.num_of_policies()
        );
        self.inner.write()?.policies = Arc::new(new_set);
        Ok(())
    }

    fn snapshot(&self) -> Result<Loaded, PolicyError> {
        Ok(self.inner.read()?.clone())
    }

    /// Read entity JSON, typed and checked by the engine's schema if any.
    pub fn entities_from_json(&self, json: &str) -> Result<Entities, PolicyError> {
        let loaded = self.snapshot()?;
        Ok(Entities::from_json_str(json, loaded.schema.as_deref())?)
    }

    pub fn evaluate(&self, request: &Request, entities: &Entities) -> Result<Response, PolicyError> {
        let loaded = self.snapshot()?;
        let response = Authorizer::new().is_authorized(
            request,
            &loaded.policies,
            entities,
            loaded.schema.as_deref(),
        )?;

        for reason in response.reasons() {
            if let Some(policy) = loaded.policies.policy(reason) {
                debug!(
                    event = "Request",
                    phase = "Reason",
                    reason = reason.as_str(),
                    policy = policy.to_string()
                );
            }
        }
        Ok(response)
    }

    pub fn policies(&self) -> Result<Arc<PolicySet>, PolicyError> {
        Ok(self.snapshot()?.policies)
    }

    pub fn schema(&self) -> Result<Option<Arc<Schema>>, PolicyError> {
        Ok(self.snapshot()?.schema)
    }
}

#[cfg(test)]
mod tests;
