// ABOUTME: Deterministic names for storage resources derived from a sandbox
// ABOUTME: Pure functions of sandbox uid and logical volume name

use sandpit_api::Sandbox;

const CLAIM_PREFIX: &str = "sandbox-claim-";
const IMPORT_PREFIX: &str = "sandbox-import-";
const DISK_PREFIX: &str = "sandbox-disk-";

pub fn claim_name(sandbox: &Sandbox, logical: &str) -> String {
    format!("{CLAIM_PREFIX}{}-{logical}", sandbox.metadata.uid)
}

pub fn import_name(sandbox: &Sandbox, logical: &str) -> String {
    format!("{IMPORT_PREFIX}{}-{logical}", sandbox.metadata.uid)
}

pub fn disk_name(sandbox: &Sandbox, logical: &str) -> String {
    format!("{DISK_PREFIX}{}-{logical}", sandbox.metadata.uid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandpit_api::ObjectMeta;

    fn sandbox_with_uid(uid: &str) -> Sandbox {
        let mut sb = Sandbox {
            metadata: ObjectMeta::named("s1", "default"),
            ..Default::default()
        };
        sb.metadata.uid = uid.to_string();
        sb
    }

    #[test]
    fn test_names_are_deterministic() {
        let sb = sandbox_with_uid("abc-123");
        assert_eq!(sb.compute_name(), "sandbox-abc-123");
        assert_eq!(claim_name(&sb, "data"), "sandbox-claim-abc-123-data");
        assert_eq!(claim_name(&sb, "data"), claim_name(&sb, "data"));
        assert_eq!(import_name(&sb, "root"), "sandbox-import-abc-123-root");
        assert_eq!(disk_name(&sb, "root"), "sandbox-disk-abc-123-root");
    }
}
