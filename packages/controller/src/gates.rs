// ABOUTME: Feature gates for the optional virtualization backends
// ABOUTME: Injected at construction, never global; the container backend is always on

use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    MachineInstance,
    VirtualMachine,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Feature::MachineInstance => "MACHINE_INSTANCE",
            Feature::VirtualMachine => "VIRTUAL_MACHINE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeatureGates {
    enabled: HashSet<Feature>,
}

impl FeatureGates {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            enabled: [Feature::MachineInstance, Feature::VirtualMachine]
                .into_iter()
                .collect(),
        }
    }

    /// Parses a comma-separated gate list, case-insensitively. Unknown names
    /// are reported back to the caller.
    pub fn parse(list: &str) -> Result<Self, String> {
        let mut enabled = HashSet::new();
        for raw in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match raw.to_uppercase().as_str() {
                "MACHINE_INSTANCE" => {
                    enabled.insert(Feature::MachineInstance);
                }
                "VIRTUAL_MACHINE" => {
                    enabled.insert(Feature::VirtualMachine);
                }
                other => return Err(format!("unknown feature gate {other:?}")),
            }
        }
        Ok(Self { enabled })
    }

    pub fn with(mut self, feature: Feature) -> Self {
        self.enabled.insert(feature);
        self
    }

    pub fn enabled(&self, feature: Feature) -> bool {
        self.enabled.contains(&feature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_case_insensitive() {
        let gates = FeatureGates::parse("machine_instance, VIRTUAL_MACHINE").unwrap();
        assert!(gates.enabled(Feature::MachineInstance));
        assert!(gates.enabled(Feature::VirtualMachine));
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(FeatureGates::parse("WARP_DRIVE").is_err());
    }

    #[test]
    fn test_empty_list_enables_nothing() {
        let gates = FeatureGates::parse("").unwrap();
        assert!(!gates.enabled(Feature::MachineInstance));
        assert!(!gates.enabled(Feature::VirtualMachine));
    }
}
