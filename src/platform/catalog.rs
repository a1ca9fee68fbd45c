//! Platform Catalog
//!
//! Ordered list of node platforms. Each platform has its own node workload
//! variant; the first entry whose predicate accepts a node's kernel wins, and
//! the trailing `default` entry is selected only when nothing else matched.

use super::kernel::KernelVersion;
use std::fmt;

/// Key and label value of the catch-all platform
pub const DEFAULT_PLATFORM: &str = "default";

/// Base name of the node workload; variants append their suffix
pub const NODE_WORKLOAD_BASE: &str = "csi-baremetal-node";

type VersionPredicate = Box<dyn Fn(&KernelVersion) -> bool + Send + Sync>;

/// One catalog entry
pub struct PlatformDescriptor {
    key: String,
    label_tag: String,
    workload_suffix: String,
    predicate: VersionPredicate,
}

impl PlatformDescriptor {
    pub fn new(
        key: impl Into<String>,
        label_tag: impl Into<String>,
        workload_suffix: impl Into<String>,
        predicate: impl Fn(&KernelVersion) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            key: key.into(),
            label_tag: label_tag.into(),
            workload_suffix: workload_suffix.into(),
            predicate: Box::new(predicate),
        }
    }

    /// Platform for kernels at or above `minimum`
    pub fn kernel_at_least(minimum: KernelVersion) -> Self {
        let tag = format!("kernel-{}", minimum);
        Self::new(tag.clone(), tag.clone(), format!("-{}", tag), move |v| *v >= minimum)
    }

    fn catch_all() -> Self {
        Self::new(DEFAULT_PLATFORM, DEFAULT_PLATFORM, "", |_| false)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Value written to the platform node label
    pub fn label_tag(&self) -> &str {
        &self.label_tag
    }

    /// Name of the node workload variant serving this platform
    pub fn workload_name(&self) -> String {
        format!("{}{}", NODE_WORKLOAD_BASE, self.workload_suffix)
    }

    pub fn matches(&self, version: &KernelVersion) -> bool {
        (self.predicate)(version)
    }
}

impl fmt::Debug for PlatformDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformDescriptor")
            .field("key", &self.key)
            .field("label_tag", &self.label_tag)
            .field("workload_suffix", &self.workload_suffix)
            .finish()
    }
}

/// Immutable, ordered platform catalog. Build once and share.
#[derive(Debug)]
pub struct PlatformCatalog {
    ordered: Vec<PlatformDescriptor>,
    fallback: PlatformDescriptor,
}

impl PlatformCatalog {
    /// Catalog evaluating `entries` top-down, followed by the catch-all
    pub fn new(entries: Vec<PlatformDescriptor>) -> Self {
        Self {
            ordered: entries
                .into_iter()
                .filter(|e| e.key != DEFAULT_PLATFORM)
                .collect(),
            fallback: PlatformDescriptor::catch_all(),
        }
    }

    /// Platforms the driver ships node workloads for
    pub fn standard() -> Self {
        Self::new(vec![PlatformDescriptor::kernel_at_least(KernelVersion::new(5, 4))])
    }

    /// Select the platform for a kernel version
    pub fn select(&self, version: &KernelVersion) -> &PlatformDescriptor {
        self.ordered
            .iter()
            .find(|entry| entry.matches(version))
            .unwrap_or(&self.fallback)
    }

    pub fn get(&self, key: &str) -> Option<&PlatformDescriptor> {
        self.entries().find(|e| e.key == key)
    }

    /// Entries in evaluation order, catch-all last
    pub fn entries(&self) -> impl Iterator<Item = &PlatformDescriptor> {
        self.ordered.iter().chain(std::iter::once(&self.fallback))
    }
}

impl Default for PlatformCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
