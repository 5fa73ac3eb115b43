//! vSphere storage driver (CSI) configuration
//!
//! Renders the INI-style `csi-vsphere.conf` stored in the CSI secret.

use crate::crd::{VDOConfig, VsphereCloudConfig};

// =============================================================================
// Well-known Names
// =============================================================================

/// Namespace the CSI driver runs in
pub const CSI_NAMESPACE: &str = "vmware-system-csi";

/// Secret carrying the CSI configuration
pub const CSI_SECRET_NAME: &str = "vsphere-config-secret";

/// Secret key of the CSI configuration
pub const CSI_CONFIG_KEY: &str = "csi-vsphere.conf";

/// Daemonset of the CSI node plugin
pub const CSI_DAEMONSET_NAME: &str = "vsphere-csi-node";

/// Pod selector of the CSI node plugin
pub const CSI_POD_SELECTOR: &str = "app=vsphere-csi-node";

/// Render the CSI configuration file.
///
/// Sections are emitted in a fixed order: `[Global]`, one
/// `[VirtualCenter "<vc>"]`, then one `[NetPermissions "<label>"]` per rule
/// labelled A, B, C... in input order. Every value is quoted.
pub fn build_csi_secret_config(
    vdo: &VDOConfig,
    cloud_config: &VsphereCloudConfig,
    username: &str,
    password: &str,
) -> String {
    let spec = &cloud_config.spec;
    let file_volumes = &vdo.spec.storage_provider.file_volumes;
    let mut out = String::new();

    section(&mut out, "Global", None);
    entry(&mut out, "cluster-id", &spec.vc_ip);

    section(&mut out, "VirtualCenter", Some(&spec.vc_ip));
    entry(&mut out, "insecure-flag", &spec.insecure_flag.to_string());
    entry(&mut out, "user", username);
    entry(&mut out, "password", password);
    entry(&mut out, "datacenters", &spec.datacenters.join(","));
    if !file_volumes.vsan_datastore_urls.is_empty() {
        entry(
            &mut out,
            "targetvSANFileShareDatastoreURLs",
            &file_volumes.vsan_datastore_urls.join(","),
        );
    }

    for (index, permission) in file_volumes.net_permissions.iter().enumerate() {
        section(&mut out, "NetPermissions", Some(&permission_label(index)));
        entry(&mut out, "ips", &permission.ip);
        if let Some(access) = permission.permissions {
            entry(&mut out, "permissions", &access.to_string());
        }
        if permission.root_squash {
            entry(&mut out, "rootsquash", "true");
        }
    }

    out
}

/// Section header, separated from a previous section by a blank line
fn section(out: &mut String, name: &str, label: Option<&str>) {
    if !out.is_empty() {
        out.push('\n');
    }
    match label {
        Some(label) => out.push_str(&format!("[{} {}]\n", name, quote(label))),
        None => out.push_str(&format!("[{}]\n", name)),
    }
}

fn entry(out: &mut String, key: &str, value: &str) {
    out.push_str(&format!("{} = {}\n", key, quote(value)));
}

/// Section label for the n-th rule: A..Z, then AA, AB...
pub fn permission_label(index: usize) -> String {
    let mut n = index + 1;
    let mut label = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        label.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    label.reverse();
    String::from_utf8_lossy(&label).into_owned()
}

fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        FileVolumes, NetPermission, NetPermissionAccess, StorageProviderConfig, VDOConfigSpec,
        VsphereCloudConfigSpec,
    };

    fn vcc() -> VsphereCloudConfig {
        VsphereCloudConfig::new(
            "vc1",
            VsphereCloudConfigSpec {
                vc_ip: "1.1.1.1".into(),
                insecure_flag: true,
                credentials: "vc-creds".into(),
                thumbprint: None,
                datacenters: vec!["dc1".into(), "dc2".into()],
            },
        )
    }

    fn vdo(file_volumes: FileVolumes) -> VDOConfig {
        VDOConfig::new(
            "vdo-config",
            VDOConfigSpec {
                storage_provider: StorageProviderConfig {
                    vsphere_cloud_config: "vc1".into(),
                    cluster_distribution: String::new(),
                    file_volumes,
                },
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_minimal_config() {
        let text = build_csi_secret_config(&vdo(FileVolumes::default()), &vcc(), "admin", "pass");

        let expected = "[Global]\n\
                        cluster-id = \"1.1.1.1\"\n\
                        \n\
                        [VirtualCenter \"1.1.1.1\"]\n\
                        insecure-flag = \"true\"\n\
                        user = \"admin\"\n\
                        password = \"pass\"\n\
                        datacenters = \"dc1,dc2\"\n";
        assert_eq!(text, expected);
        assert!(!text.contains("NetPermissions"));
    }

    #[test]
    fn test_file_volumes_and_net_permissions() {
        let file_volumes = FileVolumes {
            vsan_datastore_urls: vec!["ds:///vmfs/volumes/vsan:1/".into()],
            net_permissions: vec![
                NetPermission {
                    ip: "10.0.0.0/8".into(),
                    permissions: Some(NetPermissionAccess::ReadWrite),
                    root_squash: false,
                },
                NetPermission {
                    ip: "192.168.1.0/24".into(),
                    permissions: None,
                    root_squash: true,
                },
            ],
        };
        let text = build_csi_secret_config(&vdo(file_volumes), &vcc(), "admin", "pass");

        assert!(text.contains("targetvSANFileShareDatastoreURLs = \"ds:///vmfs/volumes/vsan:1/\"\n"));
        assert!(text.contains(
            "[NetPermissions \"A\"]\nips = \"10.0.0.0/8\"\npermissions = \"READ_WRITE\"\n"
        ));
        assert!(text.ends_with("[NetPermissions \"B\"]\nips = \"192.168.1.0/24\"\nrootsquash = \"true\"\n"));
        assert_eq!(text.matches("rootsquash").count(), 1);
    }

    #[test]
    fn test_cluster_distribution_not_written() {
        let mut config = vdo(FileVolumes::default());
        config.spec.storage_provider.cluster_distribution = "OpenShift".into();
        let text = build_csi_secret_config(&config, &vcc(), "admin", "pass");

        assert!(!text.contains("OpenShift"));
        assert_eq!(
            text,
            build_csi_secret_config(&vdo(FileVolumes::default()), &vcc(), "admin", "pass")
        );
    }

    #[test]
    fn test_values_are_escaped() {
        let text =
            build_csi_secret_config(&vdo(FileVolumes::default()), &vcc(), "admin", "pa\"ss\\");
        assert!(text.contains("password = \"pa\\\"ss\\\\\"\n"));
    }

    #[test]
    fn test_output_is_deterministic() {
        let first = build_csi_secret_config(&vdo(FileVolumes::default()), &vcc(), "a", "b");
        let second = build_csi_secret_config(&vdo(FileVolumes::default()), &vcc(), "a", "b");
        assert_eq!(first, second);
    }

    #[test]
    fn test_permission_labels() {
        assert_eq!(permission_label(0), "A");
        assert_eq!(permission_label(2), "C");
        assert_eq!(permission_label(25), "Z");
        assert_eq!(permission_label(26), "AA");
    }
}
