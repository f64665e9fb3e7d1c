//! Atoms evaluated inside an activity's web content, and the interaction that drives them.

mod atom;
mod interaction;

pub use atom::{
    clear_element, find_element, get_text, script, web_click, web_keys, Atom, ElementAction, ElementReference,
    Evaluation, FindElement, GetText, Locator, Script, WindowReference, STATUS_JAVASCRIPT_ERROR,
    STATUS_NO_SUCH_ELEMENT, STATUS_NO_SUCH_WINDOW, STATUS_STALE_ELEMENT, STATUS_SUCCESS,
};
pub use interaction::{ScriptInvocation, WebContentHost, WebInteraction};
