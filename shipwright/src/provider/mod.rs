//! Build provider drivers

pub mod backoff;
pub mod cloud_build;
pub mod driver;
pub mod fake;

pub use backoff::RetryPolicy;
pub use cloud_build::{CloudBuildConfig, CloudBuildDriver};
pub use driver::{
    BuildReceipt, Capabilities, EventStream, ProviderDriver, ProviderEvent, StreamOptions,
    SubmitReceipt,
};
pub use fake::FakeDriver;
