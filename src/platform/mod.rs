//! Platform Catalog & Kernel Classifier
//!
//! Decides which node workload variant runs on which node, from the node's
//! kernel version.

pub mod catalog;
pub mod classifier;
pub mod kernel;

pub use catalog::{PlatformCatalog, PlatformDescriptor, DEFAULT_PLATFORM, NODE_WORKLOAD_BASE};
pub use classifier::{
    filter_nodes, ClassificationOutcome, KernelClassifier, PlatformAssignment, PLATFORM_LABEL,
};
pub use kernel::KernelVersion;
