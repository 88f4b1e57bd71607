//! Default configuration values for Labforge
//!
//! This module centralizes all default values to make them easy to find and modify.

// Naming defaults
pub const DEFAULT_MASTER_PREFIX: &str = "(MASTER) ";
pub const DEFAULT_MASTER_ROOT_NAME: &str = "MASTER-FOLDERS";
pub const DEFAULT_GENERIC_INFIX: &str = "-GENERIC-";
pub const DEFAULT_INSTANCE_PADDING: usize = 2;

// Instance threshold defaults
pub const DEFAULT_FOLDER_WARN_THRESHOLD: u64 = 25;
pub const DEFAULT_FOLDER_ERROR_THRESHOLD: u64 = 50;
pub const DEFAULT_SERVICE_WARN_THRESHOLD: u64 = 50;
pub const DEFAULT_SERVICE_ERROR_THRESHOLD: u64 = 70;

// VLAN allocation defaults
pub const DEFAULT_VLAN_START: u16 = 2000;
pub const DEFAULT_VLAN_END: u16 = 4095;
pub const MAX_VLAN_TAG: u16 = 4095;

// Snapshot defaults
pub const DEFAULT_MASTERING_SNAPSHOT: &str = "initial mastering snapshot";
pub const DEFAULT_MASTERING_SNAPSHOT_DESCRIPTION: &str = "Beginning of Master configuration";
pub const DEFAULT_EXERCISE_SNAPSHOT: &str = "Start of exercise";
pub const DEFAULT_EXERCISE_SNAPSHOT_DESCRIPTION: &str =
    "Beginning of deployment phase, post-master configuration";

// Infrastructure defaults
pub const DEFAULT_BACKEND: &str = "simulated";
pub const DEFAULT_HYPERVISOR_PORT: u16 = 443;
pub const DEFAULT_TEMPLATE_FOLDER: &str = "Templates";
pub const DEFAULT_STATE_FILE: &str = "./labforge-state.json";
