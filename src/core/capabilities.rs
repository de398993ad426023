use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::{Error, Result};

/// The four independent negotiation universes checked during bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapabilityKind {
    InstanceExtensions,
    InstanceLayers,
    DeviceExtensions,
    DeviceLayers,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InstanceExtensions => "instance extensions",
            Self::InstanceLayers => "instance validation layers",
            Self::DeviceExtensions => "device extensions",
            Self::DeviceLayers => "device validation layers",
        };
        f.write_str(name)
    }
}

/// Names from `requested` that also appear in `available`, in requested order.
///
/// Matching is exact and case-sensitive. Duplicates in `requested` are kept.
pub fn intersect<R, A>(requested: &[R], available: &[A]) -> Vec<String>
where
    R: AsRef<str>,
    A: AsRef<str>,
{
    requested
        .iter()
        .filter(|name| available.iter().any(|a| a.as_ref() == name.as_ref()))
        .map(|name| name.as_ref().to_string())
        .collect()
}

/// Succeeds only when every requested name is available.
pub fn negotiate<R, A>(kind: CapabilityKind, requested: &[R], available: &[A]) -> Result<Vec<String>>
where
    R: AsRef<str>,
    A: AsRef<str>,
{
    debug!(
        %kind,
        count = available.len(),
        available = %join(available),
        "available capabilities"
    );

    let satisfied = intersect(requested, available);
    if satisfied.len() == requested.len() {
        info!(%kind, count = requested.len(), "all requested capabilities enabled");
        return Ok(satisfied);
    }

    let err = Error::CapabilityNegotiation {
        kind,
        requested: requested.iter().map(|s| s.as_ref().to_string()).collect(),
        available: available.iter().map(|s| s.as_ref().to_string()).collect(),
        satisfied,
    };
    error!(%kind, "{err}");
    Err(err)
}

/// Removes repeated names, keeping the first occurrence.
pub fn dedup_preserving_order(names: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

fn join<A: AsRef<str>>(names: &[A]) -> String {
    names.iter().map(|n| n.as_ref()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersect_keeps_requested_order() {
        let requested = ["b", "a", "c"];
        let available = ["a", "b", "c", "d"];
        assert_eq!(intersect(&requested, &available), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_intersect_is_case_sensitive() {
        let requested = ["VK_EXT_debug_report"];
        let available = ["vk_ext_debug_report"];
        assert!(intersect(&requested, &available).is_empty());
    }

    #[test]
    fn test_intersect_keeps_duplicates() {
        let requested = ["x", "x", "y"];
        let available = ["x"];
        assert_eq!(intersect(&requested, &available), vec!["x", "x"]);
    }

    #[test]
    fn test_negotiate_empty_request_succeeds() {
        let requested: [&str; 0] = [];
        let enabled = negotiate(CapabilityKind::InstanceLayers, &requested, &["anything"]).unwrap();
        assert!(enabled.is_empty());
    }

    #[test]
    fn test_negotiate_reports_partial_match() {
        let requested = ["VK_EXT_debug_report", "VK_EXT_debug_utils"];
        let available = ["VK_EXT_debug_utils", "VK_KHR_surface"];
        let err = negotiate(CapabilityKind::InstanceExtensions, &requested, &available).unwrap_err();
        match err {
            Error::CapabilityNegotiation { kind, requested, available, satisfied } => {
                assert_eq!(kind, CapabilityKind::InstanceExtensions);
                assert_eq!(requested.len(), 2);
                assert_eq!(available, vec!["VK_EXT_debug_utils", "VK_KHR_surface"]);
                assert_eq!(satisfied, vec!["VK_EXT_debug_utils"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_negotiation_error_message_lists_sets() {
        let err = negotiate(CapabilityKind::DeviceLayers, &["L1"], &["L2"]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("0 out of 1"));
        assert!(msg.contains("device validation layers"));
        assert!(msg.contains("L1") && msg.contains("L2"));
    }

    #[test]
    fn test_dedup_preserving_order() {
        let names = vec!["a".to_string(), "b".to_string(), "a".to_string(), "c".to_string()];
        assert_eq!(dedup_preserving_order(names), vec!["a", "b", "c"]);
    }
}
