mod bundle;
mod description;
mod model;
mod parcel;

pub use bundle::{Bundle, BundleValue};
pub use description::{Description, Failure, RunResult};
pub use model::{
    AnnotationInfo, AnnotationValue, ErrorInfo, FailureInfo, TestCaseInfo, TestDiscoveryEvent, TestRunEvent,
    TestRunInfo,
};
pub use parcel::{Parcel, ParcelReader, Parcelable};
