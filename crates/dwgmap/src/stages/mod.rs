//! Concrete stage implementations backed by external tools and services.

pub mod convert;
pub mod package;
pub mod publish;
pub mod tool;

pub use convert::ConvertStage;
pub use package::PackageStage;
pub use publish::PublishStage;
