//! Activities used by the unit tests, the integration tests and the smoke binary.

use serde_json::{json, Value};

use crate::app::events::Bundle;
use crate::app::host::{Activity, ActivityContext};
use crate::app::web::{
    ElementReference, Evaluation, ScriptInvocation, WebContentHost, STATUS_JAVASCRIPT_ERROR,
    STATUS_NO_SUCH_ELEMENT, STATUS_NO_SUCH_WINDOW,
};

const RECREATIONS_KEY: &str = "number_of_recreations";

/// Counts how many times it has been recreated, carried through saved instance state.
#[derive(Debug, Default)]
pub struct RecreationRecordingActivity {
    number_of_recreations: i32,
    callbacks: Vec<&'static str>,
}

impl RecreationRecordingActivity {
    pub fn number_of_recreations(&self) -> i32 {
        self.number_of_recreations
    }

    /// Callbacks this instance received, oldest first.
    pub fn callbacks(&self) -> &[&'static str] {
        &self.callbacks
    }
}

impl Activity for RecreationRecordingActivity {
    fn on_create(&mut self, _context: &ActivityContext, saved_state: Option<&Bundle>) {
        self.callbacks.push("on_create");
        if let Some(previous) = saved_state.and_then(|state| state.get_int(RECREATIONS_KEY)) {
            self.number_of_recreations = previous + 1;
        }
    }

    fn on_start(&mut self) {
        self.callbacks.push("on_start");
    }

    fn on_resume(&mut self) {
        self.callbacks.push("on_resume");
    }

    fn on_pause(&mut self) {
        self.callbacks.push("on_pause");
    }

    fn on_stop(&mut self) {
        self.callbacks.push("on_stop");
    }

    fn on_destroy(&mut self) {
        self.callbacks.push("on_destroy");
    }

    fn on_save_instance_state(&mut self, out_state: &mut Bundle) {
        out_state.put_int(RECREATIONS_KEY, self.number_of_recreations);
    }
}

#[derive(Debug, Default)]
pub struct EmptyActivity;

impl Activity for EmptyActivity {}

/// Keeps its context so a test can make it finish with a result.
#[derive(Default)]
pub struct ResultActivity {
    context: Option<ActivityContext>,
}

impl ResultActivity {
    pub const RESULT_KEY: &'static str = "result";

    pub fn finish_with(&self, result_code: i32, value: &str) {
        if let Some(context) = &self.context {
            let mut data = Bundle::new();
            data.put_string(Self::RESULT_KEY, value);
            context.set_result(result_code, data);
            context.finish();
        }
    }
}

impl Activity for ResultActivity {
    fn on_create(&mut self, context: &ActivityContext, _saved_state: Option<&Bundle>) {
        self.context = Some(context.clone());
    }
}

#[derive(Debug, Clone)]
struct FormField {
    id: &'static str,
    tag: &'static str,
    text: String,
}

/// Hosts a small simulated page: a name input, a submit button and a greeting paragraph.
/// Clicking submit greets whoever was typed into the input. Page state is not saved, so a
/// recreated instance starts blank.
#[derive(Debug)]
pub struct WebFormActivity {
    title: &'static str,
    fields: Vec<FormField>,
}

impl Default for WebFormActivity {
    fn default() -> Self {
        let field = |id, tag| FormField {
            id,
            tag,
            text: String::new(),
        };
        Self {
            title: "Web form",
            fields: vec![field("name_input", "input"), field("submit", "button"), field("greeting", "p")],
        }
    }
}

impl WebFormActivity {
    const MAIN_WINDOW: &'static str = "main";

    fn locate(&self, locator: &Value) -> Option<usize> {
        let (strategy, value) = locator.as_object()?.iter().next()?;
        let value = value.as_str()?;
        self.fields.iter().position(|field| match strategy.as_str() {
            "id" => field.id == value,
            "tagName" => field.tag == value,
            _ => false,
        })
    }

    fn element_at(&self, argument: Option<&Value>) -> Option<usize> {
        let reference: ElementReference = serde_json::from_value(argument?.clone()).ok()?;
        reference.id.strip_prefix('e')?.parse::<usize>().ok().filter(|index| *index < self.fields.len())
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.id == id)
    }

    fn evaluate(&mut self, invocation: &ScriptInvocation) -> Evaluation {
        if let Some(window) = &invocation.window {
            if window.id != Self::MAIN_WINDOW {
                return Evaluation::failure(STATUS_NO_SUCH_WINDOW, format!("no window {}", window.id));
            }
        }
        if invocation.atom == "script" {
            return if invocation.source.contains("document.title") {
                Evaluation::success(json!(self.title))
            } else {
                Evaluation::failure(STATUS_JAVASCRIPT_ERROR, "unsupported script")
            };
        }
        if invocation.atom == "find_element" {
            return match invocation.arguments.first().and_then(|locator| self.locate(locator)) {
                Some(index) => Evaluation::success(json!({ "ELEMENT": format!("e{index}") })),
                None => Evaluation::success(Value::Null),
            };
        }
        let Some(index) = self.element_at(invocation.arguments.first()) else {
            return Evaluation::failure(STATUS_NO_SUCH_ELEMENT, "unknown element reference");
        };
        match invocation.atom {
            "get_text" => Evaluation::success(json!(self.fields[index].text)),
            "clear" => {
                self.fields[index].text.clear();
                Evaluation::success(Value::Null)
            }
            "send_keys" => {
                let keys = invocation.arguments.get(1).and_then(Value::as_str).unwrap_or_default();
                self.fields[index].text.push_str(keys);
                Evaluation::success(Value::Null)
            }
            "click" => {
                if self.fields[index].id == "submit" {
                    if let (Some(input), Some(greeting)) = (self.index_of("name_input"), self.index_of("greeting")) {
                        self.fields[greeting].text = format!("Hello, {}", self.fields[input].text);
                    }
                }
                Evaluation::success(Value::Null)
            }
            other => Evaluation::failure(STATUS_JAVASCRIPT_ERROR, format!("unsupported atom {other}")),
        }
    }
}

impl Activity for WebFormActivity {}

impl WebContentHost for WebFormActivity {
    fn evaluate_javascript(&mut self, invocation: &ScriptInvocation) -> String {
        self.evaluate(invocation).to_json()
    }
}
