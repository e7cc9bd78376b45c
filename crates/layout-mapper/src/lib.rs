//! Detector mapper family (§3 "Mapper", §4.2): one variant per supported
//! bug-detection runtime, each knowing its own address-to-shadow formula,
//! its free parameter variables and the constraints those variables carry.
//!
//! The family is a sealed tagged sum dispatched with `match`, per the
//! "polymorphism without inheritance chains" design note — there is no
//! trait object here, just three variants and the handful of operations
//! the solver and emitter need from any of them.

use layout_config::{MapperSpec, PlatformConfig};
use layout_types::{AppRegion, AppRegionName, Address, Detector, ShadowKind, ShadowRegion};

/// The indicator bit window TSan uses to compress/restore application
/// addresses (bits 41:44). Application regions must be distinguishable by
/// these bits alone.
pub const TSAN_INDICATOR_MASK: Address = 0x0E00_0000_0000;

/// A free quantity a mapper contributes to the model. ASan has none; MSan
/// and TSan each contribute two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FreeVar {
    MsanXorMask,
    MsanOriginAdd,
    TsanShadowAdd,
    TsanMetaBeg,
}

/// Concrete values chosen for whichever free variables are in play. Unset
/// fields are simply not consulted by mappers that don't declare them.
#[derive(Debug, Clone, Copy, Default)]
pub struct Assignment {
    pub msan_xor_mask: Option<Address>,
    pub msan_origin_add: Option<Address>,
    pub tsan_shadow_add: Option<Address>,
    pub tsan_meta_beg: Option<Address>,
}

impl Assignment {
    pub fn get(&self, var: FreeVar) -> Option<Address> {
        match var {
            FreeVar::MsanXorMask => self.msan_xor_mask,
            FreeVar::MsanOriginAdd => self.msan_origin_add,
            FreeVar::TsanShadowAdd => self.tsan_shadow_add,
            FreeVar::TsanMetaBeg => self.tsan_meta_beg,
        }
    }

    pub fn set(&mut self, var: FreeVar, value: Address) {
        match var {
            FreeVar::MsanXorMask => self.msan_xor_mask = Some(value),
            FreeVar::MsanOriginAdd => self.msan_origin_add = Some(value),
            FreeVar::TsanShadowAdd => self.tsan_shadow_add = Some(value),
            FreeVar::TsanMetaBeg => self.tsan_meta_beg = Some(value),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AsanParams {
    pub shadow_offset: Address,
    pub shadow_scale: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct MsanParams {
    pub xor_alignment: Address,
}

#[derive(Debug, Clone, Copy)]
pub struct TsanParams {
    pub shadow_mask: Address,
    pub cell: u64,
    pub multiplier: u64,
    pub meta_cell: u64,
    pub meta_size: u64,
    pub meta_alignment: Address,
}

impl TsanParams {
    /// `(~shadow_mask + 1)` restricted to `shadow_mask`'s own bit width —
    /// the span of application addresses a single shadow mask covers.
    fn available_user_space_size(&self) -> u64 {
        let width = 64 - self.shadow_mask.leading_zeros();
        (1u64 << width) - self.shadow_mask
    }
}

/// One variant per supported detector; each owns its fixed per-platform
/// configuration. Free variables live in the [`Assignment`] passed to the
/// methods below, never inside the mapper itself — once a solution is
/// extracted the whole model, mappers included, is read-only data.
#[derive(Debug, Clone, Copy)]
pub enum ShadowMapper {
    Asan(AsanParams),
    Msan(MsanParams),
    Tsan(TsanParams),
}

impl ShadowMapper {
    pub fn from_spec(spec: &MapperSpec) -> Self {
        match *spec {
            MapperSpec::Asan {
                shadow_offset,
                shadow_scale,
            } => ShadowMapper::Asan(AsanParams {
                shadow_offset,
                shadow_scale,
            }),
            MapperSpec::Msan { xor_alignment } => ShadowMapper::Msan(MsanParams { xor_alignment }),
            MapperSpec::Tsan {
                shadow_mask,
                cell,
                multiplier,
                meta_cell,
                meta_size,
                meta_alignment,
            } => ShadowMapper::Tsan(TsanParams {
                shadow_mask,
                cell,
                multiplier,
                meta_cell,
                meta_size,
                meta_alignment,
            }),
        }
    }

    pub fn detector(&self) -> Detector {
        match self {
            ShadowMapper::Asan(_) => Detector::Asan,
            ShadowMapper::Msan(_) => Detector::Msan,
            ShadowMapper::Tsan(_) => Detector::Tsan,
        }
    }

    /// The free variables this mapper contributes to the model, in the
    /// order the solver should bind them.
    pub fn free_vars(&self) -> &'static [FreeVar] {
        match self {
            ShadowMapper::Asan(_) => &[],
            ShadowMapper::Msan(_) => &[FreeVar::MsanXorMask, FreeVar::MsanOriginAdd],
            ShadowMapper::Tsan(_) => &[FreeVar::TsanShadowAdd, FreeVar::TsanMetaBeg],
        }
    }

    /// The ascending, alignment-respecting candidate set for one free
    /// variable — every value the constructive search in `layout-solver`
    /// needs to try, already narrowed by the variable's modulus and hard
    /// upper bound so the search space stays small.
    pub fn candidate_domain(&self, var: FreeVar, platform: &PlatformConfig) -> Vec<Address> {
        let ascending_multiples = |step: Address, lo: Address, hi: Address| -> Vec<Address> {
            if step == 0 {
                return vec![lo];
            }
            let first = lo.div_ceil(step) * step;
            let mut out = Vec::new();
            let mut v = first;
            while v < hi {
                out.push(v);
                v += step;
            }
            out
        };

        match (self, var) {
            (ShadowMapper::Msan(cfg), FreeVar::MsanXorMask) => {
                ascending_multiples(cfg.xor_alignment, 0, platform.hi_app_beg_hint)
            }
            (ShadowMapper::Msan(_), FreeVar::MsanOriginAdd) => {
                ascending_multiples(platform.alignment, 0, platform.hi_app_beg_hint)
            }
            (ShadowMapper::Tsan(_), FreeVar::TsanShadowAdd) => {
                ascending_multiples(platform.alignment, 0, platform.hi_app_beg_hint)
            }
            (ShadowMapper::Tsan(cfg), FreeVar::TsanMetaBeg) => ascending_multiples(
                cfg.meta_alignment,
                platform.lo_app_end_loose,
                platform.hi_app_beg_hint,
            ),
            _ => Vec::new(),
        }
    }

    /// Per-application-region shadow (and origin/meta) regions. ASan
    /// publishes nothing here — its shadow is global, see
    /// [`ShadowMapper::global_regions`].
    pub fn enumerate_regions(&self, app_regions: &[AppRegion], asn: &Assignment) -> Vec<ShadowRegion> {
        match self {
            ShadowMapper::Asan(_) => Vec::new(),
            ShadowMapper::Msan(cfg) => {
                let xor_mask = asn.msan_xor_mask.expect("msan xor_mask bound before use");
                let origin_add = asn
                    .msan_origin_add
                    .expect("msan origin_add bound before use");
                app_regions
                    .iter()
                    .flat_map(|region| {
                        let name = region.name;
                        let shadow = ShadowRegion {
                            name: format!("MSan Shadow ({name})"),
                            detector: Detector::Msan,
                            kind: ShadowKind::Shadow,
                            shadows: Some(name),
                            interval: layout_types::Interval::new(
                                msan_shadow(region.interval.beg, false, xor_mask),
                                msan_shadow(region.interval.end, true, xor_mask),
                            ),
                        };
                        let origin = ShadowRegion {
                            name: format!("MSan Origin ({name})"),
                            detector: Detector::Msan,
                            kind: ShadowKind::Origin,
                            shadows: Some(name),
                            interval: layout_types::Interval::new(
                                msan_origin(region.interval.beg, false, xor_mask, origin_add),
                                msan_origin(region.interval.end, true, xor_mask, origin_add),
                            ),
                        };
                        [shadow, origin]
                    })
                    .collect()
            }
            ShadowMapper::Tsan(cfg) => {
                let shadow_add = asn.tsan_shadow_add.expect("tsan shadow_add bound before use");
                let meta_beg = asn.tsan_meta_beg.expect("tsan meta_beg bound before use");
                app_regions
                    .iter()
                    .flat_map(|region| {
                        let name = region.name;
                        let shadow = ShadowRegion {
                            name: format!("TSan Shadow ({name})"),
                            detector: Detector::Tsan,
                            kind: ShadowKind::Shadow,
                            shadows: Some(name),
                            interval: layout_types::Interval::new(
                                tsan_shadow(region.interval.beg, false, cfg, shadow_add),
                                tsan_shadow(region.interval.end, true, cfg, shadow_add),
                            ),
                        };
                        let meta = ShadowRegion {
                            name: format!("TSan Meta ({name})"),
                            detector: Detector::Tsan,
                            kind: ShadowKind::Meta,
                            shadows: Some(name),
                            interval: layout_types::Interval::new(
                                tsan_meta(region.interval.beg, false, cfg, meta_beg),
                                tsan_meta(region.interval.end, true, cfg, meta_beg),
                            ),
                        };
                        [shadow, meta]
                    })
                    .collect()
            }
        }
    }

    /// MSan's shadow-only regions for a candidate `xor_mask`, before
    /// `origin_add` has been chosen. Used by the solver to validate one
    /// free variable at a time instead of the whole mapper at once.
    pub fn msan_shadow_regions(&self, app_regions: &[AppRegion], xor_mask: Address) -> Vec<ShadowRegion> {
        let ShadowMapper::Msan(_) = self else {
            return Vec::new();
        };
        app_regions
            .iter()
            .map(|region| ShadowRegion {
                name: format!("MSan Shadow ({})", region.name),
                detector: Detector::Msan,
                kind: ShadowKind::Shadow,
                shadows: Some(region.name),
                interval: layout_types::Interval::new(
                    msan_shadow(region.interval.beg, false, xor_mask),
                    msan_shadow(region.interval.end, true, xor_mask),
                ),
            })
            .collect()
    }

    /// MSan's origin-only regions once `xor_mask` is already fixed.
    pub fn msan_origin_regions(
        &self,
        app_regions: &[AppRegion],
        xor_mask: Address,
        origin_add: Address,
    ) -> Vec<ShadowRegion> {
        let ShadowMapper::Msan(_) = self else {
            return Vec::new();
        };
        app_regions
            .iter()
            .map(|region| ShadowRegion {
                name: format!("MSan Origin ({})", region.name),
                detector: Detector::Msan,
                kind: ShadowKind::Origin,
                shadows: Some(region.name),
                interval: layout_types::Interval::new(
                    msan_origin(region.interval.beg, false, xor_mask, origin_add),
                    msan_origin(region.interval.end, true, xor_mask, origin_add),
                ),
            })
            .collect()
    }

    /// TSan's shadow-only regions for a candidate `shadow_add`.
    pub fn tsan_shadow_regions(&self, app_regions: &[AppRegion], shadow_add: Address) -> Vec<ShadowRegion> {
        let ShadowMapper::Tsan(cfg) = self else {
            return Vec::new();
        };
        app_regions
            .iter()
            .map(|region| ShadowRegion {
                name: format!("TSan Shadow ({})", region.name),
                detector: Detector::Tsan,
                kind: ShadowKind::Shadow,
                shadows: Some(region.name),
                interval: layout_types::Interval::new(
                    tsan_shadow(region.interval.beg, false, cfg, shadow_add),
                    tsan_shadow(region.interval.end, true, cfg, shadow_add),
                ),
            })
            .collect()
    }

    /// TSan's meta-only regions for a candidate `meta_beg`.
    pub fn tsan_meta_regions(&self, app_regions: &[AppRegion], meta_beg: Address) -> Vec<ShadowRegion> {
        let ShadowMapper::Tsan(cfg) = self else {
            return Vec::new();
        };
        app_regions
            .iter()
            .map(|region| ShadowRegion {
                name: format!("TSan Meta ({})", region.name),
                detector: Detector::Tsan,
                kind: ShadowKind::Meta,
                shadows: Some(region.name),
                interval: layout_types::Interval::new(
                    tsan_meta(region.interval.beg, false, cfg, meta_beg),
                    tsan_meta(region.interval.end, true, cfg, meta_beg),
                ),
            })
            .collect()
    }

    /// The address detector's two global shadow regions — not tied to any
    /// one application region, since the same linear shadow covers all of
    /// them. Other detectors contribute nothing here.
    pub fn global_regions(&self, app_regions: &[AppRegion]) -> Vec<ShadowRegion> {
        match self {
            ShadowMapper::Asan(cfg) => {
                let hi_app = app_regions
                    .iter()
                    .find(|r| r.name == AppRegionName::HiApp)
                    .expect("HiApp region is always present");
                let shadow = |mem: Address| (mem >> cfg.shadow_scale) + cfg.shadow_offset;

                let lo_shadow_beg = cfg.shadow_offset;
                let lo_shadow_end = shadow(lo_shadow_beg);
                let rest_shadow_end = shadow(hi_app.interval.end);
                let rest_shadow_beg = shadow(rest_shadow_end);

                vec![
                    ShadowRegion {
                        name: "ASan Shadow (LoApp)".to_string(),
                        detector: Detector::Asan,
                        kind: ShadowKind::Shadow,
                        shadows: None,
                        interval: layout_types::Interval::new(lo_shadow_beg, lo_shadow_end),
                    },
                    ShadowRegion {
                        name: "ASan Shadow (Rest)".to_string(),
                        detector: Detector::Asan,
                        kind: ShadowKind::Shadow,
                        shadows: None,
                        interval: layout_types::Interval::new(rest_shadow_beg, rest_shadow_end),
                    },
                ]
            }
            ShadowMapper::Msan(_) | ShadowMapper::Tsan(_) => Vec::new(),
        }
    }

    /// Hard constraints beyond what `candidate_domain` already bakes in via
    /// modulus and range (§3 per-mapper variants, §8 property 7).
    pub fn extra_constraints_hold(&self, app_regions: &[AppRegion]) -> bool {
        match self {
            ShadowMapper::Asan(_) | ShadowMapper::Msan(_) => true,
            ShadowMapper::Tsan(_) => indicator_separated(app_regions),
        }
    }

    /// Parameter name/value pairs using the header's contractual constant
    /// names (which rename some fields relative to the prose in §3 — MSan's
    /// `xor_mask`/`origin_add` become `kMSanShadowXor`/`kMSanShadowAdd`).
    pub fn format_params(&self, app_regions: &[AppRegion], asn: &Assignment) -> Vec<(&'static str, Address)> {
        match self {
            ShadowMapper::Asan(cfg) => vec![
                ("kAsanShadowOffset", cfg.shadow_offset),
                ("kAsanShadowScale", cfg.shadow_scale as Address),
            ],
            ShadowMapper::Msan(_) => vec![
                ("kMSanShadowXor", asn.msan_xor_mask.unwrap_or_default()),
                ("kMSanShadowAdd", asn.msan_origin_add.unwrap_or_default()),
            ],
            ShadowMapper::Tsan(cfg) => {
                let shadow_add = asn.tsan_shadow_add.unwrap_or_default();
                let meta_beg = asn.tsan_meta_beg.unwrap_or_default();
                let meta_end = meta_beg
                    + (cfg.available_user_space_size() / cfg.meta_cell) * cfg.meta_size;

                let regions = self.enumerate_regions(app_regions, asn);
                let shadow_beg = regions
                    .iter()
                    .filter(|r| r.kind == ShadowKind::Shadow)
                    .map(|r| r.interval.beg)
                    .min()
                    .unwrap_or(0);
                let shadow_end = regions
                    .iter()
                    .filter(|r| r.kind == ShadowKind::Shadow)
                    .map(|r| r.interval.end)
                    .max()
                    .unwrap_or(0);

                vec![
                    ("kTsanShadowXor", 0),
                    ("kTsanShadowAdd", shadow_add),
                    ("kTsanShadowMsk", cfg.shadow_mask),
                    ("kTsanMetaShadowBeg", meta_beg),
                    ("kTsanMetaShadowEnd", meta_end),
                    ("kTsanShadowBeg", shadow_beg),
                    ("kTsanShadowEnd", shadow_end),
                ]
            }
        }
    }
}

fn msan_shadow(mem: Address, is_end: bool, xor_mask: Address) -> Address {
    let mem = if is_end { mem - 1 } else { mem };
    let shadow = mem ^ xor_mask;
    if is_end { shadow + 1 } else { shadow }
}

fn msan_origin(mem: Address, is_end: bool, xor_mask: Address, origin_add: Address) -> Address {
    msan_shadow(mem, is_end, xor_mask) + origin_add
}

fn tsan_shadow(mem: Address, is_end: bool, cfg: &TsanParams, shadow_add: Address) -> Address {
    let mem = if is_end { mem - 1 } else { mem };
    let masked = mem & !(cfg.shadow_mask | (cfg.cell - 1));
    // shadow_xor is pinned to 0 (§9 open question: known coupling with the
    // runtime's address-restoration code, preserved rather than relaxed).
    let shadow = (masked ^ 0) * cfg.multiplier + shadow_add;
    if is_end {
        shadow + cfg.cell * cfg.multiplier
    } else {
        shadow
    }
}

fn tsan_meta(mem: Address, is_end: bool, cfg: &TsanParams, meta_beg: Address) -> Address {
    let mem = if is_end { mem - 1 } else { mem };
    let masked = mem & !(cfg.shadow_mask | (cfg.meta_cell - 1));
    let meta = (masked / cfg.meta_cell) * cfg.meta_size | meta_beg;
    if is_end { meta + cfg.meta_size } else { meta }
}

/// §3/§8 property 7: every pair of application regions must be
/// distinguishable by the indicator bits alone, in one order or the other.
pub fn indicator_separated(app_regions: &[AppRegion]) -> bool {
    for (i, r1) in app_regions.iter().enumerate() {
        for r2 in &app_regions[i + 1..] {
            let r1_beg = r1.interval.beg & TSAN_INDICATOR_MASK;
            let r1_end = (r1.interval.end - 1) & TSAN_INDICATOR_MASK;
            let r2_beg = r2.interval.beg & TSAN_INDICATOR_MASK;
            let r2_end = (r2.interval.end - 1) & TSAN_INDICATOR_MASK;
            if !(r1_end <= r2_beg || r2_end <= r1_beg) {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use layout_types::Interval;

    fn app(name: AppRegionName, beg: Address, end: Address) -> AppRegion {
        AppRegion {
            name,
            interval: Interval::new(beg, end),
        }
    }

    #[test]
    fn asan_shadow_of_zero_is_shadow_offset() {
        let mapper = ShadowMapper::Asan(AsanParams {
            shadow_offset: 0x0000_0000_7FFF_8000,
            shadow_scale: 3,
        });
        let app_regions = [
            app(AppRegionName::LoApp, 0, 0x1000),
            app(AppRegionName::MidApp, 0x5500_0000_0000, 0x5A00_0000_0000),
            app(AppRegionName::HiApp, 0x7A00_0000_0000, 0x8000_0000_0000),
            app(AppRegionName::Heap, 0x6000_0000_0000, 0x6100_0000_0000),
        ];
        let regions = mapper.global_regions(&app_regions);
        assert_eq!(regions[0].interval.beg, 0x0000_0000_7FFF_8000);
    }

    #[test]
    fn msan_round_trips_region_bounds() {
        let assignment = Assignment {
            msan_xor_mask: Some(0x5000_0000_0000),
            msan_origin_add: Some(0x1000_0000_0000),
            ..Default::default()
        };
        let mapper = ShadowMapper::Msan(MsanParams {
            xor_alignment: 0x1000_0000_0000,
        });
        let region = app(AppRegionName::MidApp, 0x5500_0000_0000, 0x5A00_0000_0000);
        let regions = mapper.enumerate_regions(std::slice::from_ref(&region), &assignment);
        assert_eq!(regions.len(), 2);
        let shadow = &regions[0];
        assert_eq!(
            shadow.interval.beg,
            region.interval.beg ^ assignment.msan_xor_mask.unwrap()
        );
    }

    #[test]
    fn indicator_separation_detects_overlap() {
        let separated = [
            app(AppRegionName::LoApp, 0, 0x1000),
            app(AppRegionName::MidApp, 0x5500_0000_0000, 0x5A00_0000_0000),
        ];
        assert!(indicator_separated(&separated));

        let overlapping = [
            app(AppRegionName::MidApp, 0, 0x0E00_0000_1000),
            app(AppRegionName::HiApp, 0x0E00_0000_0500, 0x1000_0000_0000),
        ];
        assert!(!indicator_separated(&overlapping));
    }

    #[test]
    fn candidate_domain_respects_modulus_and_bound() {
        let mapper = ShadowMapper::Msan(MsanParams {
            xor_alignment: 0x1000_0000_0000,
        });
        let platform = layout_config::lookup("x64_48").unwrap();
        let domain = mapper.candidate_domain(FreeVar::MsanXorMask, &platform);
        assert!(domain.iter().all(|v| v % 0x1000_0000_0000 == 0));
        assert!(domain.iter().all(|v| *v < platform.hi_app_beg_hint));
        assert!(domain.windows(2).all(|w| w[0] < w[1]));
    }
}
