//! Resource families mirrored from the platform.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A family of platform resources with its own list API and mirror table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceFamily {
    /// Virtual machine instances.
    Instance,
    /// Block storage volumes.
    Volume,
    /// Guest networks.
    Network,
    /// Network offerings.
    NetworkOffering,
    /// Disk offerings.
    DiskOffering,
    /// Compute (service) offerings.
    ServiceOffering,
    /// Users.
    User,
    /// Accounts.
    Account,
    /// Domains.
    Domain,
    /// Zones.
    Zone,
    /// Guest OS types.
    OsType,
    /// Volume snapshots.
    Snapshot,
    /// VM snapshots.
    VmSnapshot,
    /// Templates.
    Template,
    /// Projects.
    Project,
    /// Network interfaces.
    Nic,
}

impl ResourceFamily {
    /// Every family, in sync order for a full resync.
    pub const ALL: [ResourceFamily; 16] = [
        ResourceFamily::Domain,
        ResourceFamily::Zone,
        ResourceFamily::Account,
        ResourceFamily::User,
        ResourceFamily::Project,
        ResourceFamily::OsType,
        ResourceFamily::ServiceOffering,
        ResourceFamily::DiskOffering,
        ResourceFamily::NetworkOffering,
        ResourceFamily::Template,
        ResourceFamily::Network,
        ResourceFamily::Instance,
        ResourceFamily::Nic,
        ResourceFamily::Volume,
        ResourceFamily::Snapshot,
        ResourceFamily::VmSnapshot,
    ];

    /// Returns the snake_case name used in logs and snapshots.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceFamily::Instance => "instance",
            ResourceFamily::Volume => "volume",
            ResourceFamily::Network => "network",
            ResourceFamily::NetworkOffering => "network_offering",
            ResourceFamily::DiskOffering => "disk_offering",
            ResourceFamily::ServiceOffering => "service_offering",
            ResourceFamily::User => "user",
            ResourceFamily::Account => "account",
            ResourceFamily::Domain => "domain",
            ResourceFamily::Zone => "zone",
            ResourceFamily::OsType => "os_type",
            ResourceFamily::Snapshot => "snapshot",
            ResourceFamily::VmSnapshot => "vm_snapshot",
            ResourceFamily::Template => "template",
            ResourceFamily::Project => "project",
            ResourceFamily::Nic => "nic",
        }
    }

    /// Returns the platform list command for this family.
    pub fn list_command(&self) -> &'static str {
        match self {
            ResourceFamily::Instance => "listVirtualMachines",
            ResourceFamily::Volume => "listVolumes",
            ResourceFamily::Network => "listNetworks",
            ResourceFamily::NetworkOffering => "listNetworkOfferings",
            ResourceFamily::DiskOffering => "listDiskOfferings",
            ResourceFamily::ServiceOffering => "listServiceOfferings",
            ResourceFamily::User => "listUsers",
            ResourceFamily::Account => "listAccounts",
            ResourceFamily::Domain => "listDomains",
            ResourceFamily::Zone => "listZones",
            ResourceFamily::OsType => "listOsTypes",
            ResourceFamily::Snapshot => "listSnapshots",
            ResourceFamily::VmSnapshot => "listVMSnapshot",
            ResourceFamily::Template => "listTemplates",
            ResourceFamily::Project => "listProjects",
            ResourceFamily::Nic => "listNics",
        }
    }

    /// Extra parameters every list call for this family carries.
    pub fn default_params(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            ResourceFamily::Template => &[("templatefilter", "all"), ("listall", "true")],
            ResourceFamily::Domain
            | ResourceFamily::Zone
            | ResourceFamily::OsType
            | ResourceFamily::NetworkOffering
            | ResourceFamily::DiskOffering
            | ResourceFamily::ServiceOffering => &[],
            _ => &[("listall", "true")],
        }
    }

    /// Maps a platform resource type name (`VirtualMachine`) to a family.
    pub fn from_resource_type(resource: &str) -> Option<Self> {
        let normalized: String = resource
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "virtualmachine" | "uservm" | "vm" | "instance" => Some(ResourceFamily::Instance),
            "volume" => Some(ResourceFamily::Volume),
            "network" => Some(ResourceFamily::Network),
            "snapshot" => Some(ResourceFamily::Snapshot),
            "vmsnapshot" => Some(ResourceFamily::VmSnapshot),
            "template" | "virtualmachinetemplate" => Some(ResourceFamily::Template),
            "nic" => Some(ResourceFamily::Nic),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceFamily::ALL
            .into_iter()
            .find(|family| family.as_str() == s)
            .ok_or_else(|| format!("unknown resource family: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for family in ResourceFamily::ALL {
            assert_eq!(family.as_str().parse::<ResourceFamily>().unwrap(), family);
        }
        assert!("router".parse::<ResourceFamily>().is_err());
    }

    #[test]
    fn resource_type_mapping() {
        assert_eq!(
            ResourceFamily::from_resource_type("VirtualMachine"),
            Some(ResourceFamily::Instance)
        );
        assert_eq!(
            ResourceFamily::from_resource_type("VMSnapshot"),
            Some(ResourceFamily::VmSnapshot)
        );
        assert_eq!(
            ResourceFamily::from_resource_type("Volume"),
            Some(ResourceFamily::Volume)
        );
        assert_eq!(ResourceFamily::from_resource_type("Host"), None);
    }

    #[test]
    fn list_commands() {
        assert_eq!(ResourceFamily::Volume.list_command(), "listVolumes");
        assert_eq!(
            ResourceFamily::Template.default_params(),
            &[("templatefilter", "all"), ("listall", "true")]
        );
        assert!(ResourceFamily::Zone.default_params().is_empty());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&ResourceFamily::VmSnapshot).unwrap();
        assert_eq!(json, "\"vm_snapshot\"");
    }
}
