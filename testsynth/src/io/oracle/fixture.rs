//! Deterministic oracle backed by a TOML script.
//!
//! ```toml
//! initial = """
//! def test_add_negative():
//!     assert add(-1, 2) == 0
//! """
//!
//! [[incremental]]
//! response = "def test_add_positive():\n    assert add(1, 2) == 3\n"
//!
//! [[incremental]]
//! error = "rate limited"
//! transient = true
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::debug;

use super::{IncrementalRequest, InitialRequest, Oracle, OracleError};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureScript {
    pub initial: String,
    #[serde(default)]
    pub incremental: Vec<ScriptedResponse>,
}

/// One scripted reply: either a response body or an error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptedResponse {
    pub response: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub transient: bool,
}

impl ScriptedResponse {
    fn into_result(self) -> Result<String, OracleError> {
        match (self.response, self.error) {
            (_, Some(err)) if self.transient => Err(OracleError::Transient(err)),
            (_, Some(err)) => Err(OracleError::Fatal(err)),
            (Some(body), None) => Ok(body),
            (None, None) => Err(OracleError::Fatal("empty scripted response".to_string())),
        }
    }
}

/// Replays a [`FixtureScript`]. Once the incremental script runs out every
/// further call is a fatal error.
#[derive(Debug)]
pub struct FixtureOracle {
    initial: String,
    remaining: RefCell<VecDeque<ScriptedResponse>>,
}

impl FixtureOracle {
    pub fn new(script: FixtureScript) -> Self {
        Self {
            initial: script.initial,
            remaining: RefCell::new(script.incremental.into()),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read oracle fixture {}", path.display()))?;
        Self::from_toml_str(&contents).with_context(|| format!("parse {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let script: FixtureScript = toml::from_str(contents)?;
        for (idx, entry) in script.incremental.iter().enumerate() {
            if entry.response.is_some() == entry.error.is_some() {
                bail!("incremental[{idx}]: exactly one of `response` or `error` is required");
            }
        }
        Ok(Self::new(script))
    }
}

impl Oracle for FixtureOracle {
    fn synthesize_initial(&self, request: &InitialRequest<'_>) -> Result<String, OracleError> {
        debug!(module = request.module_name, "fixture initial response");
        Ok(self.initial.clone())
    }

    fn synthesize_incremental(
        &self,
        request: &IncrementalRequest<'_>,
    ) -> Result<String, OracleError> {
        let next = self.remaining.borrow_mut().pop_front();
        debug!(
            module = request.module_name,
            scripted = next.is_some(),
            "fixture incremental response"
        );
        match next {
            Some(entry) => entry.into_result(),
            None => Err(OracleError::Fatal(
                "fixture has no more incremental responses".to_string(),
            )),
        }
    }
}
