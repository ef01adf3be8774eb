// ABOUTME: Watch-event predicates for derived resources
// ABOUTME: Only phase transitions trigger a reconcile, bounding reconcile frequency

use sandpit_api::{ContainerWorkload, MachineInstance, VirtualMachine};

pub fn workload_phase_changed(old: &ContainerWorkload, new: &ContainerWorkload) -> bool {
    old.status.phase != new.status.phase
}

pub fn instance_phase_changed(old: &MachineInstance, new: &MachineInstance) -> bool {
    old.status.phase != new.status.phase
}

pub fn machine_phase_changed(old: &VirtualMachine, new: &VirtualMachine) -> bool {
    old.status.phase != new.status.phase
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandpit_api::ContainerPhase;

    #[test]
    fn test_no_op_updates_are_suppressed() {
        let old = ContainerWorkload::default();
        let mut new = old.clone();
        new.metadata.resource_version = 42;
        assert!(!workload_phase_changed(&old, &new));

        new.status.phase = ContainerPhase::Running;
        assert!(workload_phase_changed(&old, &new));
    }
}
