//! Fallback values used when neither the config file nor the environment
//! supplies a setting

pub const DEFAULT_PORT: u16 = 4000;

pub const DEFAULT_NAMESPACE: &str = "/files";

pub const DEFAULT_STORAGE_ROOT: &str = "/var/lib/shipd/artifacts";
