use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::app::error::WebError;

/// WebDriver wire status codes an evaluation can carry.
pub const STATUS_SUCCESS: i32 = 0;
pub const STATUS_NO_SUCH_ELEMENT: i32 = 7;
pub const STATUS_STALE_ELEMENT: i32 = 10;
pub const STATUS_JAVASCRIPT_ERROR: i32 = 17;
pub const STATUS_NO_SUCH_WINDOW: i32 = 23;

/// Result of running one atom in web content: `{"status": 0, "value": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub status: i32,
    #[serde(default)]
    pub value: Value,
}

impl Evaluation {
    pub fn success(value: Value) -> Self {
        Self {
            status: STATUS_SUCCESS,
            value,
        }
    }

    pub fn failure(status: i32, message: impl Into<String>) -> Self {
        Self {
            status,
            value: json!({ "message": message.into() }),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, WebError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json(&self) -> String {
        // Serializing a struct of an integer and a Value cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"status\":{}}}", self.status))
    }

    fn message(&self) -> String {
        match &self.value {
            Value::String(message) => message.clone(),
            Value::Object(map) => map
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// The value of a successful evaluation, or the error its status describes.
    pub fn into_value(self) -> Result<Value, WebError> {
        match self.status {
            STATUS_SUCCESS => Ok(self.value),
            STATUS_NO_SUCH_ELEMENT => Err(WebError::NoSuchElement(self.message())),
            STATUS_STALE_ELEMENT => Err(WebError::StaleElement),
            status => Err(WebError::ScriptFailed {
                status,
                message: self.message(),
            }),
        }
    }
}

/// Element handle as exchanged with web content: `{"ELEMENT": "<id>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementReference {
    #[serde(rename = "ELEMENT")]
    pub id: String,
}

/// Window (frame) handle: `{"WINDOW": "<id>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowReference {
    #[serde(rename = "WINDOW")]
    pub id: String,
}

impl WindowReference {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locator {
    ClassName,
    CssSelector,
    Id,
    LinkText,
    Name,
    PartialLinkText,
    TagName,
    XPath,
}

impl Locator {
    pub fn strategy(self) -> &'static str {
        match self {
            Locator::ClassName => "className",
            Locator::CssSelector => "css",
            Locator::Id => "id",
            Locator::LinkText => "linkText",
            Locator::Name => "name",
            Locator::PartialLinkText => "partialLinkText",
            Locator::TagName => "tagName",
            Locator::XPath => "xpath",
        }
    }
}

/// A script evaluated in web content together with the arguments it expects and the conversion of
/// its result.
pub trait Atom<R> {
    /// Stable identifier hosts can dispatch on.
    fn name(&self) -> &'static str;

    fn source(&self) -> &str;

    /// Whether the script operates on the element selected with `with_element`.
    fn requires_element(&self) -> bool {
        false
    }

    fn arguments(&self, element: Option<&ElementReference>) -> Vec<Value>;

    fn transform(&self, evaluation: Evaluation) -> Result<R, WebError>;
}

/// Arbitrary script returning its raw JSON value.
#[derive(Debug, Clone)]
pub struct Script {
    source: String,
    arguments: Vec<Value>,
}

pub fn script(source: impl Into<String>, arguments: Vec<Value>) -> Script {
    Script {
        source: source.into(),
        arguments,
    }
}

impl Atom<Value> for Script {
    fn name(&self) -> &'static str {
        "script"
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn arguments(&self, _element: Option<&ElementReference>) -> Vec<Value> {
        self.arguments.clone()
    }

    fn transform(&self, evaluation: Evaluation) -> Result<Value, WebError> {
        evaluation.into_value()
    }
}

const FIND_ELEMENT_SOURCE: &str =
    "function(locator, root) { var key = Object.keys(locator)[0]; return bot.locators.findElement({[key]: locator[key]}, root || document); }";

#[derive(Debug, Clone)]
pub struct FindElement {
    locator: Locator,
    value: String,
}

pub fn find_element(locator: Locator, value: impl Into<String>) -> FindElement {
    FindElement {
        locator,
        value: value.into(),
    }
}

impl Atom<ElementReference> for FindElement {
    fn name(&self) -> &'static str {
        "find_element"
    }

    fn source(&self) -> &str {
        FIND_ELEMENT_SOURCE
    }

    fn arguments(&self, _element: Option<&ElementReference>) -> Vec<Value> {
        vec![json!({ self.locator.strategy(): self.value })]
    }

    fn transform(&self, evaluation: Evaluation) -> Result<ElementReference, WebError> {
        match evaluation.into_value()? {
            Value::Null => Err(WebError::NoSuchElement(format!(
                "{}={}",
                self.locator.strategy(),
                self.value
            ))),
            value => Ok(serde_json::from_value(value)?),
        }
    }
}

/// Click, key entry and clear share one shape: run against the selected element, return nothing.
#[derive(Debug, Clone)]
pub struct ElementAction {
    name: &'static str,
    source: &'static str,
    extra: Vec<Value>,
}

impl Atom<()> for ElementAction {
    fn name(&self) -> &'static str {
        self.name
    }

    fn source(&self) -> &str {
        self.source
    }

    fn requires_element(&self) -> bool {
        true
    }

    fn arguments(&self, element: Option<&ElementReference>) -> Vec<Value> {
        let mut arguments = vec![json!(element)];
        arguments.extend(self.extra.iter().cloned());
        arguments
    }

    fn transform(&self, evaluation: Evaluation) -> Result<(), WebError> {
        evaluation.into_value().map(|_| ())
    }
}

pub fn web_click() -> ElementAction {
    ElementAction {
        name: "click",
        source: "function(element) { bot.action.click(element); }",
        extra: Vec::new(),
    }
}

pub fn web_keys(text: impl Into<String>) -> ElementAction {
    ElementAction {
        name: "send_keys",
        source: "function(element, keys) { bot.action.type(element, keys); }",
        extra: vec![Value::String(text.into())],
    }
}

pub fn clear_element() -> ElementAction {
    ElementAction {
        name: "clear",
        source: "function(element) { bot.action.clear(element); }",
        extra: Vec::new(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct GetText;

pub fn get_text() -> GetText {
    GetText
}

impl Atom<String> for GetText {
    fn name(&self) -> &'static str {
        "get_text"
    }

    fn source(&self) -> &str {
        "function(element) { return bot.dom.getVisibleText(element); }"
    }

    fn requires_element(&self) -> bool {
        true
    }

    fn arguments(&self, element: Option<&ElementReference>) -> Vec<Value> {
        vec![json!(element)]
    }

    fn transform(&self, evaluation: Evaluation) -> Result<String, WebError> {
        match evaluation.into_value()? {
            Value::String(text) => Ok(text),
            Value::Null => Ok(String::new()),
            other => Ok(other.to_string()),
        }
    }
}
