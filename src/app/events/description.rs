use serde::{Deserialize, Serialize};

use crate::app::error::ParcelError;

use super::model::{AnnotationInfo, FailureInfo, TestCaseInfo};
use super::parcel::{Parcel, ParcelReader, Parcelable};

/// Node of the runner's test tree. Leaves are individual test methods; inner nodes are suites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    pub display_name: String,
    pub class_name: Option<String>,
    pub method_name: Option<String>,
    pub annotations: Vec<AnnotationInfo>,
    pub children: Vec<Description>,
}

impl Description {
    pub fn suite(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            class_name: Some(name),
            method_name: None,
            annotations: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn test(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        let class_name = class_name.into();
        let method_name = method_name.into();
        Self {
            display_name: format!("{method_name}({class_name})"),
            class_name: Some(class_name),
            method_name: Some(method_name),
            annotations: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: Description) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_annotation(mut self, annotation: AnnotationInfo) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn is_test(&self) -> bool {
        self.children.is_empty() && self.method_name.is_some()
    }

    pub fn is_suite(&self) -> bool {
        !self.is_test()
    }

    /// Number of leaf tests below (or at) this node.
    pub fn test_count(&self) -> usize {
        if self.is_test() {
            return 1;
        }
        self.children.iter().map(Description::test_count).sum()
    }

    /// Leaf tests in depth-first order. Suites without tests contribute nothing.
    pub fn leaves(&self) -> Vec<&Description> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Description>) {
        if self.is_test() {
            out.push(self);
            return;
        }
        for child in &self.children {
            child.collect_leaves(out);
        }
    }

    pub fn to_test_case(&self) -> TestCaseInfo {
        TestCaseInfo {
            class_name: self
                .class_name
                .clone()
                .unwrap_or_else(|| self.display_name.clone()),
            method_name: self.method_name.clone().unwrap_or_default(),
            method_annotations: self.annotations.clone(),
            class_annotations: Vec::new(),
        }
    }
}

/// A test failure as seen by a run listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub description: Description,
    pub message: Option<String>,
    pub exception_type: Option<String>,
    pub trace: String,
}

impl Failure {
    pub fn new(description: Description, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            description,
            trace: message.clone(),
            message: Some(message),
            exception_type: None,
        }
    }

    pub fn with_exception(mut self, exception_type: impl Into<String>, trace: impl Into<String>) -> Self {
        self.exception_type = Some(exception_type.into());
        self.trace = trace.into();
        self
    }

    pub fn to_failure_info(&self) -> FailureInfo {
        FailureInfo {
            failure_message: self.message.clone(),
            failure_type: self.exception_type.clone(),
            stack_trace: self.trace.clone(),
            test_case: self.description.to_test_case(),
        }
    }
}

/// Aggregate outcome of a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_count: i32,
    pub ignore_count: i32,
    pub run_time_ms: i64,
    pub failures: Vec<Failure>,
}

impl RunResult {
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn was_successful(&self) -> bool {
        self.failures.is_empty()
    }
}

impl Parcelable for Description {
    fn write_to(&self, parcel: &mut Parcel) {
        parcel.write_str(&self.display_name);
        parcel.write_nullable_str(self.class_name.as_deref());
        parcel.write_nullable_str(self.method_name.as_deref());
        parcel.write_list(&self.annotations);
        parcel.write_list(&self.children);
    }

    fn read_from(reader: &mut ParcelReader<'_>) -> Result<Self, ParcelError> {
        Ok(Self {
            display_name: reader.read_string("display name")?,
            class_name: reader.read_nullable_string("class name")?,
            method_name: reader.read_nullable_string("method name")?,
            annotations: reader.read_list("annotations")?,
            children: reader.read_list("children")?,
        })
    }
}

impl Parcelable for Failure {
    fn write_to(&self, parcel: &mut Parcel) {
        parcel.write_parcelable(&self.description);
        parcel.write_nullable_str(self.message.as_deref());
        parcel.write_nullable_str(self.exception_type.as_deref());
        parcel.write_str(&self.trace);
    }

    fn read_from(reader: &mut ParcelReader<'_>) -> Result<Self, ParcelError> {
        Ok(Self {
            description: reader.read_parcelable()?,
            message: reader.read_nullable_string("failure message")?,
            exception_type: reader.read_nullable_string("exception type")?,
            trace: reader.read_string("trace")?,
        })
    }
}

impl Parcelable for RunResult {
    fn write_to(&self, parcel: &mut Parcel) {
        parcel.write_i32(self.run_count);
        parcel.write_i32(self.ignore_count);
        parcel.write_i64(self.run_time_ms);
        parcel.write_list(&self.failures);
    }

    fn read_from(reader: &mut ParcelReader<'_>) -> Result<Self, ParcelError> {
        Ok(Self {
            run_count: reader.read_i32("run count")?,
            ignore_count: reader.read_i32("ignore count")?,
            run_time_ms: reader.read_i64("run time")?,
            failures: reader.read_list("failures")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> Description {
        Description::suite("org.example.AllTests")
            .with_child(
                Description::suite("org.example.A")
                    .with_child(Description::test("org.example.A", "one"))
                    .with_child(Description::test("org.example.A", "two")),
            )
            .with_child(Description::suite("org.example.Empty"))
            .with_child(Description::suite("org.example.B").with_child(Description::test("org.example.B", "three")))
    }

    #[test]
    fn leaves_are_depth_first_and_skip_empty_suites() {
        let root = tree();
        let ids: Vec<String> = root.leaves().iter().map(|leaf| leaf.to_test_case().test_id()).collect();
        assert_eq!(ids, vec!["org.example.A#one", "org.example.A#two", "org.example.B#three"]);
        assert_eq!(root.test_count(), 3);
        assert!(Description::suite("org.example.Empty").is_suite());
    }

    #[test]
    fn failure_maps_to_failure_info() {
        let failure = Failure::new(Description::test("org.example.A", "one"), "expected:<1> but was:<2>")
            .with_exception("java.lang.AssertionError", "java.lang.AssertionError: expected:<1>\n\tat A.one");
        let info = failure.to_failure_info();
        assert_eq!(info.failure_type.as_deref(), Some("java.lang.AssertionError"));
        assert_eq!(info.test_case.test_id(), "org.example.A#one");
        assert!(info.stack_trace.contains("at A.one"));
    }

    #[test]
    fn tree_survives_the_wire() {
        let root = tree();
        assert_eq!(Description::from_parcel(&root.to_parcel()).expect("decode"), root);

        let result = RunResult {
            run_count: 3,
            ignore_count: 0,
            run_time_ms: 42,
            failures: vec![Failure::new(Description::test("org.example.B", "three"), "boom")],
        };
        let decoded = RunResult::from_parcel(&result.to_parcel()).expect("decode");
        assert_eq!(decoded.failure_count(), 1);
        assert!(!decoded.was_successful());
    }
}
