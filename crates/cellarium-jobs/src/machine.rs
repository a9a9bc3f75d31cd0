//! Machine-type selection and compute resource derivation.
//!
//! The orchestrator only ever requests high-memory VM shapes from one family.
//! File-size scaling walks an ordered tier table and clamps at the configured
//! maximum so a runaway upload cannot request an unbounded machine.

use cellarium_core::defaults;

use crate::params::{FieldError, ValidationErrors};

/// Allowed machine types, smallest to largest.
pub const MACHINE_TIERS: [&str; 8] = [
    "n2d-highmem-4",
    "n2d-highmem-8",
    "n2d-highmem-16",
    "n2d-highmem-32",
    "n2d-highmem-48",
    "n2d-highmem-64",
    "n2d-highmem-80",
    "n2d-highmem-96",
];

/// GiB of RAM per vCPU in the highmem family.
const MEMORY_GIB_PER_CPU: i64 = 8;

const GIB: i64 = 1024 * 1024 * 1024;

/// Size thresholds (exclusive upper bounds, bytes) mapped to tier indexes.
/// Files at or past the last threshold get the largest tier.
const SIZE_TIERS: [(i64, usize); 6] = [
    (2 * GIB, 1),   // <2 GiB  -> n2d-highmem-8
    (5 * GIB, 2),   // <5 GiB  -> n2d-highmem-16
    (10 * GIB, 3),  // <10 GiB -> n2d-highmem-32
    (25 * GIB, 4),  // <25 GiB -> n2d-highmem-48
    (50 * GIB, 5),  // <50 GiB -> n2d-highmem-64
    (100 * GIB, 6), // <100 GiB -> n2d-highmem-80
];

/// Index of a machine type in the tier table, `None` for unknown strings.
pub fn tier_index(machine_type: &str) -> Option<usize> {
    MACHINE_TIERS.iter().position(|t| *t == machine_type)
}

/// Whether the machine type names an allowed tier.
pub fn is_valid_machine_type(machine_type: &str) -> bool {
    tier_index(machine_type).is_some()
}

/// Validate an explicitly requested machine type as a field-level error.
pub fn validate_machine_type(machine_type: &str) -> Result<(), ValidationErrors> {
    if is_valid_machine_type(machine_type) {
        Ok(())
    } else {
        Err(ValidationErrors {
            errors: vec![FieldError {
                field: "machine_type".to_string(),
                message: format!(
                    "'{}' is not an allowed machine type",
                    machine_type
                ),
            }],
        })
    }
}

/// Machine type for an input of the given size, clamped at `max_machine_type`.
///
/// An unknown maximum clamps at the family ceiling rather than failing; the
/// configured maximum is validated at startup.
pub fn machine_for_file_size(size_bytes: i64, max_machine_type: &str) -> String {
    let tier = SIZE_TIERS
        .iter()
        .find(|(threshold, _)| size_bytes < *threshold)
        .map(|(_, tier)| *tier)
        .unwrap_or(MACHINE_TIERS.len() - 1);

    let max_tier = tier_index(max_machine_type).unwrap_or(MACHINE_TIERS.len() - 1);
    MACHINE_TIERS[tier.min(max_tier)].to_string()
}

/// vCPU count encoded in the machine type suffix.
pub fn cpu_count(machine_type: &str) -> Option<i64> {
    machine_type
        .rsplit_once('-')
        .and_then(|(_, n)| n.parse::<i64>().ok())
}

/// CPU milli / memory MiB requested for one task on the given machine.
///
/// Requests slightly under the full machine so the batch agent has headroom.
pub fn compute_resource(machine_type: &str) -> cellarium_batch::ComputeResource {
    let cpus = cpu_count(machine_type).unwrap_or(8);
    cellarium_batch::ComputeResource {
        cpu_milli: cpus * 1000,
        memory_mib: cpus * MEMORY_GIB_PER_CPU * 1024,
        boot_disk_mib: Some(defaults::BOOT_DISK_SIZE_GB * 1024),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_table_ordered() {
        let cpus: Vec<i64> = MACHINE_TIERS
            .iter()
            .map(|t| cpu_count(t).unwrap())
            .collect();
        let mut sorted = cpus.clone();
        sorted.sort();
        assert_eq!(cpus, sorted);
    }

    #[test]
    fn test_default_machine_in_tiers() {
        assert!(is_valid_machine_type(defaults::DEFAULT_MACHINE_TYPE));
        assert!(is_valid_machine_type(defaults::MAX_MACHINE_TYPE));
    }

    #[test]
    fn test_small_file_gets_default_tier() {
        assert_eq!(
            machine_for_file_size(1_048_576, "n2d-highmem-96"),
            "n2d-highmem-8"
        );
    }

    #[test]
    fn test_scaling_is_monotone() {
        let sizes = [
            0,
            GIB,
            3 * GIB,
            8 * GIB,
            20 * GIB,
            40 * GIB,
            80 * GIB,
            200 * GIB,
        ];
        let mut last_tier = 0;
        for size in sizes {
            let machine = machine_for_file_size(size, "n2d-highmem-96");
            let tier = tier_index(&machine).unwrap();
            assert!(tier >= last_tier, "tier shrank at size {}", size);
            last_tier = tier;
        }
    }

    #[test]
    fn test_scaling_clamps_at_max() {
        assert_eq!(
            machine_for_file_size(200 * GIB, "n2d-highmem-32"),
            "n2d-highmem-32"
        );
        assert_eq!(
            machine_for_file_size(200 * GIB, "n2d-highmem-96"),
            "n2d-highmem-96"
        );
    }

    #[test]
    fn test_invalid_machine_is_field_error() {
        let errors = validate_machine_type("e2-standard-4").unwrap_err();
        assert_eq!(errors.errors.len(), 1);
        assert_eq!(errors.errors[0].field, "machine_type");
    }

    #[test]
    fn test_compute_resource_derivation() {
        let resource = compute_resource("n2d-highmem-16");
        assert_eq!(resource.cpu_milli, 16_000);
        assert_eq!(resource.memory_mib, 16 * 8 * 1024);
        assert_eq!(
            resource.boot_disk_mib,
            Some(defaults::BOOT_DISK_SIZE_GB * 1024)
        );
    }
}
