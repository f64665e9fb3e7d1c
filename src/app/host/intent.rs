use serde::{Deserialize, Serialize};

use crate::app::events::{Bundle, BundleValue};

use super::activity::Activity;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub component: Option<String>,
    pub action: Option<String>,
    pub extras: Bundle,
}

impl Intent {
    pub fn for_activity<A: Activity>() -> Self {
        Self {
            component: Some(activity_class_name::<A>()),
            ..Self::default()
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<BundleValue>) -> Self {
        self.extras.put(key, value);
        self
    }

    pub fn component(&self) -> Option<&str> {
        self.component.as_deref()
    }

    /// Intent resolution equality: extras do not take part.
    pub fn filter_equals(&self, other: &Intent) -> bool {
        self.component == other.component && self.action == other.action
    }
}

pub fn activity_class_name<A: Activity>() -> String {
    std::any::type_name::<A>().to_string()
}

pub fn simple_class_name(class_name: &str) -> &str {
    class_name.rsplit("::").next().unwrap_or(class_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Sample;

    impl Activity for Sample {}

    #[test]
    fn filter_equals_ignores_extras() {
        let plain = Intent::for_activity::<Sample>();
        let decorated = Intent::for_activity::<Sample>().with_extra("token", "abc");
        assert!(plain.filter_equals(&decorated));
        assert_ne!(plain, decorated);
        assert!(!plain.filter_equals(&plain.clone().with_action("VIEW")));
    }

    #[test]
    fn simple_class_name_strips_module_path() {
        let intent = Intent::for_activity::<Sample>();
        assert_eq!(simple_class_name(intent.component().expect("component")), "Sample");
        assert_eq!(simple_class_name("Plain"), "Plain");
    }
}
