use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::app::error::WebError;
use crate::app::host::{Activity, ActivityId};
use crate::app::scenario::ActivityScenario;

use super::atom::{Atom, ElementReference, Evaluation, WindowReference};

/// Everything a host needs to run one atom.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptInvocation {
    pub atom: &'static str,
    pub source: String,
    pub arguments: Vec<Value>,
    pub window: Option<WindowReference>,
}

/// Implemented by activities that embed web content. Called on the main thread; returns the
/// evaluation as JSON text (see [`Evaluation`]).
pub trait WebContentHost {
    fn evaluate_javascript(&mut self, invocation: &ScriptInvocation) -> String;
}

/// Drives the web content of a scenario's activity through atoms.
///
/// The selected window and element belong to the activity instance they were obtained from. After
/// [`ActivityScenario::recreate`] they are stale; call [`reset`](Self::reset) and select again.
pub struct WebInteraction<'a, A: Activity + WebContentHost> {
    scenario: &'a ActivityScenario<A>,
    window: Option<WindowReference>,
    element: Option<ElementReference>,
    bound_to: Option<ActivityId>,
}

impl<'a, A: Activity + WebContentHost> WebInteraction<'a, A> {
    pub fn on_web_view(scenario: &'a ActivityScenario<A>) -> Self {
        Self {
            scenario,
            window: None,
            element: None,
            bound_to: None,
        }
    }

    pub fn in_window(mut self, window: WindowReference) -> Result<Self, WebError> {
        self.ensure_fresh()?;
        self.bind();
        self.window = Some(window);
        Ok(self)
    }

    /// Selects the element `atom` finds; later element atoms act on it.
    pub fn with_element<F>(mut self, atom: F) -> Result<Self, WebError>
    where
        F: Atom<ElementReference>,
    {
        let element = self.evaluate::<ElementReference, F>(&atom)?;
        debug!(element = %element.id, "selected element");
        self.bind();
        self.element = Some(element);
        Ok(self)
    }

    pub fn perform<F>(self, atom: F) -> Result<Self, WebError>
    where
        F: Atom<()>,
    {
        self.evaluate::<(), F>(&atom)?;
        Ok(self)
    }

    /// Evaluates `atom` and fails with [`WebError::CheckFailed`] unless `predicate` accepts the
    /// result.
    pub fn check<R, F, P>(self, atom: F, predicate: P) -> Result<Self, WebError>
    where
        R: std::fmt::Debug,
        F: Atom<R>,
        P: FnOnce(&R) -> bool,
    {
        let value = self.evaluate::<R, F>(&atom)?;
        if !predicate(&value) {
            return Err(WebError::CheckFailed(format!("{} returned {value:?}", atom.name())));
        }
        Ok(self)
    }

    pub fn get<R, F>(&self, atom: F) -> Result<R, WebError>
    where
        F: Atom<R>,
    {
        self.evaluate::<R, F>(&atom)
    }

    /// Forgets the selected window and element.
    pub fn reset(mut self) -> Self {
        self.window = None;
        self.element = None;
        self.bound_to = None;
        self
    }

    pub fn element(&self) -> Option<&ElementReference> {
        self.element.as_ref()
    }

    pub fn window(&self) -> Option<&WindowReference> {
        self.window.as_ref()
    }

    fn bind(&mut self) {
        if self.bound_to.is_none() {
            self.bound_to = self.scenario.activity_id();
        }
    }

    fn ensure_fresh(&self) -> Result<(), WebError> {
        match self.bound_to {
            Some(bound) if self.scenario.activity_id() != Some(bound) => Err(WebError::StaleElement),
            _ => Ok(()),
        }
    }

    fn evaluate<R, F>(&self, atom: &F) -> Result<R, WebError>
    where
        F: Atom<R>,
    {
        self.ensure_fresh()?;
        let element = if atom.requires_element() {
            Some(self.element.as_ref().ok_or(WebError::NoElement)?)
        } else {
            None
        };
        let invocation = ScriptInvocation {
            atom: atom.name(),
            source: atom.source().to_string(),
            arguments: atom.arguments(element),
            window: self.window.clone(),
        };
        let raw = self
            .scenario
            .with_activity(move |activity: &mut A| activity.evaluate_javascript(&invocation))?;
        atom.transform(Evaluation::parse(&raw)?)
    }
}
