//! Scopes and variables: the leaves of the lazy object graph. Scopes are
//! classified into the handful of kinds UIs care about; variables know how
//! to expand their children and how to materialize adapter-side lazy
//! values.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::errors::{ClientError, Result};
use crate::requests::{Command, VariablesArguments};
use crate::responses::{Response, VariablesResponse};
use crate::session::Session;
use crate::types::{ScopeInfo, VariableInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Locals,
    Globals,
    Registers,
    Generic,
}

impl ScopeKind {
    /// Adapters mark scopes with a presentation hint when they feel like
    /// it; names are the fallback signal.
    fn classify(info: &ScopeInfo) -> Self {
        if let Some(hint) = info.presentation_hint.as_deref() {
            match hint {
                "locals" | "arguments" => return Self::Locals,
                "globals" => return Self::Globals,
                "registers" => return Self::Registers,
                _ => {}
            }
        }
        let name = info.name.to_ascii_lowercase();
        if name.contains("local") || name.contains("argument") {
            Self::Locals
        } else if name.contains("global") {
            Self::Globals
        } else if name.contains("register") {
            Self::Registers
        } else {
            Self::Generic
        }
    }
}

pub struct Scope {
    session: Weak<Session>,
    stack_valid: Arc<AtomicBool>,
    kind: ScopeKind,
    info: ScopeInfo,
    variables: Mutex<Option<Vec<Arc<Variable>>>>,
}

impl Scope {
    pub(crate) fn new(
        session: &Arc<Session>,
        stack_valid: Arc<AtomicBool>,
        info: ScopeInfo,
    ) -> Arc<Self> {
        Arc::new(Self {
            session: Arc::downgrade(session),
            stack_valid,
            kind: ScopeKind::classify(&info),
            info,
            variables: Mutex::new(None),
        })
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &ScopeInfo {
        &self.info
    }

    pub fn expensive(&self) -> bool {
        self.info.expensive.unwrap_or(false)
    }

    /// The variables of this scope, fetched on first use.
    pub async fn variables(&self) -> Result<Vec<Arc<Variable>>> {
        if let Some(variables) = self.variables.lock().clone() {
            return Ok(variables);
        }
        if !self.stack_valid.load(Ordering::SeqCst) {
            return Err(ClientError::InvalidStack);
        }
        let session = self.session.upgrade().ok_or(ClientError::Terminated)?;
        let variables =
            fetch_variables(&session, self.info.variables_reference).await?;
        *self.variables.lock() = Some(variables.clone());
        Ok(variables)
    }
}

pub struct Variable {
    session: Weak<Session>,
    info: Mutex<VariableInfo>,
}

impl Variable {
    fn new(session: &Arc<Session>, info: VariableInfo) -> Arc<Self> {
        Arc::new(Self {
            session: Arc::downgrade(session),
            info: Mutex::new(info),
        })
    }

    pub fn name(&self) -> String {
        self.info.lock().name.clone()
    }

    pub fn value(&self) -> String {
        self.info.lock().value.clone()
    }

    pub fn type_name(&self) -> Option<String> {
        self.info.lock().type_field.clone()
    }

    pub fn variables_reference(&self) -> i64 {
        self.info.lock().variables_reference
    }

    pub fn info(&self) -> VariableInfo {
        self.info.lock().clone()
    }

    pub fn has_children(&self) -> bool {
        self.variables_reference() > 0
    }

    /// True for values the adapter wants fetched on demand (getters and
    /// the like).
    pub fn is_lazy(&self) -> bool {
        self.info
            .lock()
            .presentation_hint
            .as_ref()
            .and_then(|hint| hint.lazy)
            .unwrap_or(false)
    }

    fn session(&self) -> Result<Arc<Session>> {
        self.session.upgrade().ok_or(ClientError::Terminated)
    }

    /// The child variables, when this value is structured.
    pub async fn children(&self) -> Result<Vec<Arc<Variable>>> {
        let reference = self.variables_reference();
        if reference <= 0 {
            return Ok(Vec::new());
        }
        let session = self.session()?;
        fetch_variables(&session, reference).await
    }

    /// Materializes a lazy value in place.
    ///
    /// The protocol says a lazy variable has exactly one child holding the
    /// real value: that child's value, type and reference replace ours.
    /// Some JavaScript adapters return several children instead; in that
    /// case the reference is kept so the children stay reachable.
    pub async fn resolve(&self) -> Result<()> {
        if !self.is_lazy() {
            return Ok(());
        }
        let children = self.children().await?;
        let mut info = self.info.lock();
        match children.len() {
            1 => {
                let child = children[0].info();
                info.value = child.value;
                info.type_field = child.type_field.or(info.type_field.take());
                info.variables_reference = child.variables_reference;
            }
            _ => {
                tracing::debug!(
                    name = %info.name,
                    children = children.len(),
                    "lazy variable resolved to an unexpected child count; keeping reference"
                );
            }
        }
        if let Some(hint) = info.presentation_hint.as_mut() {
            hint.lazy = Some(false);
        }
        Ok(())
    }
}

async fn fetch_variables(session: &Arc<Session>, reference: i64) -> Result<Vec<Arc<Variable>>> {
    let body = session
        .request(Command::Variables(VariablesArguments {
            variables_reference: reference,
            filter: None,
            start: None,
            count: None,
        }))
        .await?;
    let response: VariablesResponse = Response::parse(body)?;
    Ok(response
        .variables
        .into_iter()
        .map(|info| Variable::new(session, info))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope_info(name: &str, hint: Option<&str>) -> ScopeInfo {
        ScopeInfo {
            name: name.to_string(),
            presentation_hint: hint.map(str::to_string),
            variables_reference: 1,
            named_variables: None,
            indexed_variables: None,
            expensive: None,
            source: None,
            line: None,
            column: None,
            end_line: None,
            end_column: None,
        }
    }

    #[test]
    fn scope_kind_prefers_presentation_hint() {
        assert_eq!(
            ScopeKind::classify(&scope_info("Whatever", Some("registers"))),
            ScopeKind::Registers
        );
        assert_eq!(
            ScopeKind::classify(&scope_info("Whatever", Some("arguments"))),
            ScopeKind::Locals
        );
    }

    #[test]
    fn scope_kind_falls_back_to_name_heuristics() {
        assert_eq!(
            ScopeKind::classify(&scope_info("Local variables", None)),
            ScopeKind::Locals
        );
        assert_eq!(
            ScopeKind::classify(&scope_info("Global", None)),
            ScopeKind::Globals
        );
        assert_eq!(
            ScopeKind::classify(&scope_info("CPU Registers", None)),
            ScopeKind::Registers
        );
        assert_eq!(
            ScopeKind::classify(&scope_info("Closure", None)),
            ScopeKind::Generic
        );
    }
}
