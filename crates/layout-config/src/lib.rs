//! Platform catalog (§4.1): immutable per-platform layout records plus the
//! mapper descriptors each platform wants instantiated.
//!
//! Platforms are compiled-in constant data, not a user-editable file — there
//! is nothing here resembling `oxidized.toml`. What survives from that idiom
//! is the validation shape: a fallible constructor that rejects a malformed
//! record instead of panicking, and structured logging on the one derived
//! value it computes (`hi_app_beg_hint`).

use layout_types::Address;
use thiserror::Error;

/// Per-detector configuration carried by a platform's mapper list.
#[derive(Debug, Clone, Copy)]
pub enum MapperSpec {
    Asan {
        shadow_offset: Address,
        shadow_scale: u32,
    },
    Msan {
        xor_alignment: Address,
    },
    Tsan {
        shadow_mask: Address,
        cell: u64,
        multiplier: u64,
        meta_cell: u64,
        meta_size: u64,
        meta_alignment: Address,
    },
}

/// Failures detected while constructing a [`PlatformConfig`] (§7 "Configuration error").
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error(
        "platform \"{platform}\": exactly one of hi_app_beg or hi_app_beg_hint must be set \
         (hi_app_beg={hi_app_beg:?}, hi_app_beg_hint={hi_app_beg_hint:?})"
    )]
    HiAppBegAmbiguous {
        platform: String,
        hi_app_beg: Option<Address>,
        hi_app_beg_hint: Option<Address>,
    },
    #[error(
        "platform \"{platform}\": region {region} size 0x{size:x} is below its floor 0x{floor:x}"
    )]
    RegionBelowFloor {
        platform: String,
        region: &'static str,
        size: u64,
        floor: u64,
    },
    #[error("unknown platform key \"{0}\"")]
    UnknownPlatform(String),
}

/// A bound that is either a fixed platform anchor or left symbolic for the
/// solver to choose.
pub type Bound = Option<Address>;

/// Immutable description of one hardware platform's address space (§3
/// "Platform record").
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub name: &'static str,
    pub key: &'static str,
    pub lo_app_beg: Address,
    pub lo_app_end: Address,
    /// Loose low-app ceiling used by non-address detectors; distinct from
    /// the strict `lo_app_end` the address detector uses.
    pub lo_app_end_loose: Address,
    pub mid_app_beg: Bound,
    pub mid_app_end: Bound,
    pub hi_app_beg: Bound,
    pub hi_app_beg_hint: Address,
    pub hi_app_end: Bound,
    pub heap_beg: Bound,
    pub heap_end: Bound,
    pub vdso_beg: Address,
    pub alignment: Address,
    pub min_mid_app_size: u64,
    pub min_hi_app_size: u64,
    pub min_heap_size: u64,
    pub mappers: Vec<MapperSpec>,
}

#[allow(clippy::too_many_arguments)]
struct RawPlatform {
    name: &'static str,
    key: &'static str,
    lo_app_beg: Address,
    lo_app_end: Address,
    lo_app_end_loose: Address,
    mid_app_beg: Bound,
    mid_app_end: Bound,
    hi_app_beg: Bound,
    hi_app_beg_hint: Bound,
    hi_app_end: Bound,
    heap_beg: Bound,
    heap_end: Bound,
    vdso_beg: Address,
    alignment: Address,
    min_mid_app_size: u64,
    min_hi_app_size: u64,
    min_heap_size: u64,
    mappers: Vec<MapperSpec>,
}

impl PlatformConfig {
    fn try_build(raw: RawPlatform) -> Result<Self, ConfigError> {
        let hi_beg_set = raw.hi_app_beg.is_some();
        let hi_hint_set = raw.hi_app_beg_hint.is_some();
        if hi_beg_set == hi_hint_set {
            return Err(ConfigError::HiAppBegAmbiguous {
                platform: raw.name.to_string(),
                hi_app_beg: raw.hi_app_beg,
                hi_app_beg_hint: raw.hi_app_beg_hint,
            });
        }

        let hi_app_beg_hint = match (raw.hi_app_beg, raw.hi_app_beg_hint) {
            (Some(beg), None) => beg,
            (None, Some(hint)) => hint,
            _ => unreachable!("checked above"),
        };
        if raw.hi_app_beg.is_some() {
            tracing::info!(
                target: "config",
                platform = raw.name,
                hi_app_beg_hint,
                "normalized hi_app_beg_hint from fixed hi_app_beg"
            );
        }

        let config = PlatformConfig {
            name: raw.name,
            key: raw.key,
            lo_app_beg: raw.lo_app_beg,
            lo_app_end: raw.lo_app_end,
            lo_app_end_loose: raw.lo_app_end_loose,
            mid_app_beg: raw.mid_app_beg,
            mid_app_end: raw.mid_app_end,
            hi_app_beg: raw.hi_app_beg,
            hi_app_beg_hint,
            hi_app_end: raw.hi_app_end,
            heap_beg: raw.heap_beg,
            heap_end: raw.heap_end,
            vdso_beg: raw.vdso_beg,
            alignment: raw.alignment,
            min_mid_app_size: raw.min_mid_app_size,
            min_hi_app_size: raw.min_hi_app_size,
            min_heap_size: raw.min_heap_size,
            mappers: raw.mappers,
        };

        config.check_fixed_floor("MidApp", config.mid_app_beg, config.mid_app_end, config.min_mid_app_size)?;
        config.check_fixed_floor("HiApp", config.hi_app_beg, config.hi_app_end, config.min_hi_app_size)?;
        config.check_fixed_floor("Heap", config.heap_beg, config.heap_end, config.min_heap_size)?;
        Ok(config)
    }

    fn check_fixed_floor(
        &self,
        region: &'static str,
        beg: Bound,
        end: Bound,
        floor: u64,
    ) -> Result<(), ConfigError> {
        if floor == 0 {
            return Ok(());
        }
        if let (Some(beg), Some(end)) = (beg, end) {
            let size = end.saturating_sub(beg);
            if size < floor {
                return Err(ConfigError::RegionBelowFloor {
                    platform: self.name.to_string(),
                    region,
                    size,
                    floor,
                });
            }
        }
        Ok(())
    }

    /// Apply a `--align` override, replacing the platform's alignment
    /// granularity without touching any other field.
    pub fn with_alignment_override(mut self, alignment: Address) -> Self {
        self.alignment = alignment;
        self
    }
}

const PAGE_SIZE: Address = 0x1000;

fn x64_48() -> Result<PlatformConfig, ConfigError> {
    PlatformConfig::try_build(RawPlatform {
        name: "x64_48",
        key: "x64_48",
        lo_app_beg: 0x0000_0000_0000,
        lo_app_end: 0x0000_7FFF_8000 - PAGE_SIZE,
        lo_app_end_loose: 0x0100_0000_0000,
        mid_app_beg: Some(0x5500_0000_0000),
        mid_app_end: Some(0x5A00_0000_0000),
        hi_app_beg: Some(0x7A00_0000_0000),
        hi_app_beg_hint: None,
        hi_app_end: Some(0x8000_0000_0000),
        heap_beg: None,
        heap_end: None,
        vdso_beg: 0xF000_0000_0000_0000,
        alignment: 0x0100_0000_0000,
        min_mid_app_size: 0x0500_0000_0000,
        min_hi_app_size: 0x0600_0000_0000,
        min_heap_size: 0x0200_0000_0000,
        mappers: vec![
            MapperSpec::Asan {
                shadow_offset: 0x0000_0000_7FFF_8000,
                shadow_scale: 3,
            },
            MapperSpec::Msan {
                xor_alignment: 0x1000_0000_0000,
            },
            MapperSpec::Tsan {
                shadow_mask: 0x7000_0000_0000,
                cell: 8,
                multiplier: 2,
                meta_cell: 8,
                meta_size: 4,
                meta_alignment: 0x1000_0000_0000,
            },
        ],
    })
}

fn aarch64_48() -> Result<PlatformConfig, ConfigError> {
    PlatformConfig::try_build(RawPlatform {
        name: "aarch64_48",
        key: "aarch64_48",
        lo_app_beg: 0x0000_0000_0000,
        lo_app_end: 0x0010_0000_0000 - PAGE_SIZE,
        lo_app_end_loose: 0x0100_0000_0000,
        mid_app_beg: Some(0xAAAA_0000_0000),
        mid_app_end: Some(0xAC00_0000_0000),
        hi_app_beg: Some(0xFC00_0000_0000),
        hi_app_beg_hint: None,
        hi_app_end: Some(0x1_0000_0000_0000),
        heap_beg: None,
        heap_end: None,
        vdso_beg: 0x000F_FFF0_0000_0000,
        alignment: 0x0100_0000_0000,
        min_mid_app_size: 0x0500_0000_0000,
        min_hi_app_size: 0x0600_0000_0000,
        min_heap_size: 0x0200_0000_0000,
        mappers: vec![
            MapperSpec::Asan {
                shadow_offset: 0x0010_0000_0000,
                shadow_scale: 3,
            },
            MapperSpec::Msan {
                xor_alignment: 0x1000_0000_0000,
            },
            MapperSpec::Tsan {
                shadow_mask: 0xF000_0000_0000,
                cell: 8,
                multiplier: 2,
                meta_cell: 8,
                meta_size: 4,
                meta_alignment: 0x1000_0000_0000,
            },
        ],
    })
}

/// Look up a platform by its CLI key. Unknown keys are reported the same
/// way a malformed record is: as a `ConfigError`, so the CLI layer has one
/// error type to format.
pub fn lookup(key: &str) -> Result<PlatformConfig, ConfigError> {
    match key {
        "x64_48" => x64_48(),
        "aarch64_48" => aarch64_48(),
        other => Err(ConfigError::UnknownPlatform(other.to_string())),
    }
}

/// The ordered list of platform keys this catalog knows about, for usage
/// messages and `--platform`'s `clap::ValueEnum`-style choice validation.
pub const KNOWN_PLATFORMS: &[&str] = &["x64_48", "aarch64_48"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_platforms_build_cleanly() {
        assert!(x64_48().is_ok());
        assert!(aarch64_48().is_ok());
    }

    #[test]
    fn hi_app_beg_normalizes_into_hint() {
        let p = x64_48().unwrap();
        assert_eq!(p.hi_app_beg_hint, 0x7A00_0000_0000);
    }

    #[test]
    fn both_hi_app_fields_set_is_a_config_error() {
        let err = PlatformConfig::try_build(RawPlatform {
            name: "bogus",
            key: "bogus",
            lo_app_beg: 0,
            lo_app_end: 0x1000,
            lo_app_end_loose: 0x1000,
            mid_app_beg: Some(1),
            mid_app_end: Some(2),
            hi_app_beg: Some(0x7A00_0000_0000),
            hi_app_beg_hint: Some(0x7A00_0000_0000),
            hi_app_end: Some(3),
            heap_beg: None,
            heap_end: None,
            vdso_beg: 0,
            alignment: 0x1000,
            min_mid_app_size: 0,
            min_hi_app_size: 0,
            min_heap_size: 0,
            mappers: vec![],
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::HiAppBegAmbiguous { .. }));
    }

    #[test]
    fn unknown_platform_is_reported() {
        let err = lookup("does_not_exist").unwrap_err();
        assert_eq!(err, ConfigError::UnknownPlatform("does_not_exist".to_string()));
    }

    #[test]
    fn undersized_fixed_region_is_rejected() {
        let raw = RawPlatform {
            name: "tiny",
            key: "tiny",
            lo_app_beg: 0,
            lo_app_end: 0x1000,
            lo_app_end_loose: 0x1000,
            mid_app_beg: Some(0x1000),
            mid_app_end: Some(0x2000),
            hi_app_beg: Some(0x3000),
            hi_app_beg_hint: None,
            hi_app_end: Some(0x4000),
            heap_beg: None,
            heap_end: None,
            vdso_beg: 0,
            alignment: 0x1000,
            min_mid_app_size: 0x10000,
            min_hi_app_size: 0,
            min_heap_size: 0,
            mappers: vec![],
        };
        let err = PlatformConfig::try_build(raw).unwrap_err();
        assert!(matches!(err, ConfigError::RegionBelowFloor { region: "MidApp", .. }));
    }
}
