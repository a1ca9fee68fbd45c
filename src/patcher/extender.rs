//! Scheduler extender documents
//!
//! Renders the legacy scheduling `Policy` and the `KubeSchedulerConfiguration`
//! documents that register the csi-baremetal extender with a scheduler.

use crate::error::Result;
use serde::Serialize;
use std::collections::BTreeMap;

pub const FILTER_VERB: &str = "filter";
pub const PRIORITIZE_VERB: &str = "prioritize";

/// ConfigMap keys of the static-pod flavors
pub const POLICY_KEY: &str = "policy.yaml";
pub const CONFIG_KEY: &str = "config.yaml";
pub const CONFIG_23_KEY: &str = "config23.yaml";
pub const CONFIG_25_KEY: &str = "config25.yaml";

/// Scheduler configuration API versions, oldest first
pub const CONFIG_API_V1BETA2: &str = "kubescheduler.config.k8s.io/v1beta2";
pub const CONFIG_API_V1BETA3: &str = "kubescheduler.config.k8s.io/v1beta3";
pub const CONFIG_API_V1: &str = "kubescheduler.config.k8s.io/v1";

/// Extender entry of the legacy policy format
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct PolicyExtender {
    url_prefix: String,
    filter_verb: &'static str,
    prioritize_verb: &'static str,
    weight: i64,
    enable_https: bool,
    node_cache_capable: bool,
    ignorable: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Policy {
    kind: &'static str,
    api_version: &'static str,
    extenders: Vec<PolicyExtender>,
}

/// Extender entry of `KubeSchedulerConfiguration`, which spells HTTPS in caps
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigExtender {
    url_prefix: String,
    filter_verb: &'static str,
    prioritize_verb: &'static str,
    weight: i64,
    #[serde(rename = "enableHTTPS")]
    enable_https: bool,
    node_cache_capable: bool,
    ignorable: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientConnection {
    kubeconfig: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Profile {
    scheduler_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SchedulerConfiguration {
    api_version: &'static str,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_connection: Option<ClientConnection>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    profiles: Vec<Profile>,
    extenders: Vec<ConfigExtender>,
}

/// The extender endpoint served next to each scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extender {
    pub port: u16,
}

impl Extender {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub fn url_prefix(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    fn policy_entry(&self) -> PolicyExtender {
        PolicyExtender {
            url_prefix: self.url_prefix(),
            filter_verb: FILTER_VERB,
            prioritize_verb: PRIORITIZE_VERB,
            weight: 1,
            enable_https: false,
            node_cache_capable: false,
            ignorable: true,
        }
    }

    fn config_entry(&self) -> ConfigExtender {
        ConfigExtender {
            url_prefix: self.url_prefix(),
            filter_verb: FILTER_VERB,
            prioritize_verb: PRIORITIZE_VERB,
            weight: 1,
            enable_https: false,
            node_cache_capable: false,
            ignorable: true,
        }
    }

    fn policy(&self) -> Policy {
        Policy {
            kind: "Policy",
            api_version: "v1",
            extenders: vec![self.policy_entry()],
        }
    }

    /// Legacy scheduling policy as YAML
    pub fn policy_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.policy())?)
    }

    /// Legacy scheduling policy as JSON, the format OpenShift reads `policy.cfg` in
    pub fn policy_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.policy())?)
    }

    /// `KubeSchedulerConfiguration` for a static-pod scheduler
    pub fn scheduler_config(&self, api_version: &'static str, kubeconfig: &str) -> Result<String> {
        let config = SchedulerConfiguration {
            api_version,
            kind: "KubeSchedulerConfiguration",
            client_connection: Some(ClientConnection {
                kubeconfig: kubeconfig.to_string(),
            }),
            profiles: Vec::new(),
            extenders: vec![self.config_entry()],
        };
        Ok(serde_yaml::to_string(&config)?)
    }

    /// `KubeSchedulerConfiguration` for a named secondary scheduler profile
    pub fn secondary_scheduler_config(&self, scheduler_name: &str) -> Result<String> {
        let config = SchedulerConfiguration {
            api_version: CONFIG_API_V1,
            kind: "KubeSchedulerConfiguration",
            client_connection: None,
            profiles: vec![Profile {
                scheduler_name: scheduler_name.to_string(),
            }],
            extenders: vec![self.config_entry()],
        };
        Ok(serde_yaml::to_string(&config)?)
    }

    /// Data of the extender ConfigMap for static-pod flavors
    pub fn static_pod_data(&self, kubeconfig: &str) -> Result<BTreeMap<String, String>> {
        let mut data = BTreeMap::new();
        data.insert(POLICY_KEY.to_string(), self.policy_yaml()?);
        data.insert(CONFIG_KEY.to_string(), self.scheduler_config(CONFIG_API_V1BETA2, kubeconfig)?);
        data.insert(CONFIG_23_KEY.to_string(), self.scheduler_config(CONFIG_API_V1BETA3, kubeconfig)?);
        data.insert(CONFIG_25_KEY.to_string(), self.scheduler_config(CONFIG_API_V1, kubeconfig)?);
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(doc: &str) -> serde_yaml::Value {
        serde_yaml::from_str(doc).unwrap()
    }

    #[test]
    fn test_policy_extender_fields() {
        let policy = parse(&Extender::new(8889).policy_yaml().unwrap());
        assert_eq!(policy["kind"], "Policy");
        let extender = &policy["extenders"][0];
        assert_eq!(extender["urlPrefix"], "http://127.0.0.1:8889");
        assert_eq!(extender["filterVerb"], "filter");
        assert_eq!(extender["prioritizeVerb"], "prioritize");
        assert_eq!(extender["weight"], 1);
        assert_eq!(extender["enableHttps"], false);
        assert_eq!(extender["nodeCacheCapable"], false);
        assert_eq!(extender["ignorable"], true);
    }

    #[test]
    fn test_static_pod_documents() {
        let data = Extender::new(9000).static_pod_data("/etc/kubernetes/scheduler.conf").unwrap();
        assert_eq!(data.len(), 4);

        for (key, version) in [
            (CONFIG_KEY, CONFIG_API_V1BETA2),
            (CONFIG_23_KEY, CONFIG_API_V1BETA3),
            (CONFIG_25_KEY, CONFIG_API_V1),
        ] {
            let doc = parse(&data[key]);
            assert_eq!(doc["apiVersion"], version);
            assert_eq!(doc["clientConnection"]["kubeconfig"], "/etc/kubernetes/scheduler.conf");
            assert_eq!(doc["extenders"][0]["urlPrefix"], "http://127.0.0.1:9000");
            assert_eq!(doc["extenders"][0]["enableHTTPS"], false);
        }
    }

    #[test]
    fn test_policy_json_is_json() {
        let json: serde_json::Value =
            serde_json::from_str(&Extender::new(8889).policy_json().unwrap()).unwrap();
        assert_eq!(json["apiVersion"], "v1");
        assert_eq!(json["extenders"][0]["ignorable"], true);
    }

    #[test]
    fn test_secondary_scheduler_profile() {
        let doc = parse(&Extender::new(8889).secondary_scheduler_config("secondary-scheduler").unwrap());
        assert_eq!(doc["profiles"][0]["schedulerName"], "secondary-scheduler");
        assert!(doc.get("clientConnection").is_none());
    }
}
