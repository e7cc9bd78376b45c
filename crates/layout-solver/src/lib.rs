//! Constraint builder & solver driver (§4.3).
//!
//! Builds the full region/constraint system for a platform and searches it
//! for a satisfying assignment. There is no SMT solver underneath: most
//! bounds are already fixed platform anchors, and the handful of genuinely
//! free quantities (Heap's bounds, MSan's `xor_mask`/`origin_add`, TSan's
//! `shadow_add`/`meta_beg`) each have a small, alignment-narrowed candidate
//! domain over which a first-fit ascending search is sound and complete —
//! see `SPEC_FULL.md` §C for the full argument. `ConstraintModel` still
//! separates "what the constraints are" from "how we search them", so this
//! reads like a constraint solver even though the search itself is plain
//! Rust control flow.

use layout_config::PlatformConfig;
use layout_mapper::{Assignment, FreeVar, ShadowMapper};
use layout_types::{AppRegion, AppRegionName, Interval, ShadowRegion};
use thiserror::Error;

/// The solver's one failure kind (§7 "Infeasible layout"). There is no
/// UNSAT/unknown distinction worth keeping here — both collapse to "no
/// candidate within the bounded domain satisfied every constraint".
#[derive(Debug, Error, PartialEq, Eq)]
#[error("platform \"{platform}\" is infeasible: {reason}")]
pub struct SolveError {
    pub platform: String,
    pub reason: String,
}

fn infeasible(platform: &str, reason: impl Into<String>) -> SolveError {
    SolveError {
        platform: platform.to_string(),
        reason: reason.into(),
    }
}

/// A fully solved layout: every application region, every mapper with its
/// resolved free variables, and the shadow regions they produce. Immutable
/// once built — the emitter only ever reads from it.
#[derive(Debug, Clone)]
pub struct LayoutModel {
    pub platform: PlatformConfig,
    pub app_regions: Vec<AppRegion>,
    pub mappers: Vec<ShadowMapper>,
    pub assignment: Assignment,
}

impl LayoutModel {
    /// Every shadow region any mapper produces, application-region-scoped
    /// plus global, in mapper-declaration order.
    pub fn shadow_regions(&self) -> Vec<ShadowRegion> {
        let mut out = Vec::new();
        for mapper in &self.mappers {
            out.extend(mapper.global_regions(&self.app_regions));
            out.extend(mapper.enumerate_regions(&self.app_regions, &self.assignment));
        }
        out
    }

    pub fn app_region(&self, name: AppRegionName) -> Interval {
        self.app_regions
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.interval)
            .expect("well-known application region always present")
    }
}

fn align_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

/// §4.3 rule 5: every shadow region must lie strictly between `LoApp` and
/// `HiApp`. Callers pass the strict `LoApp.end` for the address detector's
/// own global regions and the loose ceiling for every other mapper's
/// shadow/origin/meta regions (§3 "loose low-app ceiling").
fn shadow_reachable(interval: &Interval, lo_app_end: u64, hi_app_beg: u64) -> bool {
    lo_app_end < interval.beg && interval.beg < interval.end && interval.end < hi_app_beg
}

/// §4.3 rule 7: no two regions in `reserved` may overlap the candidate.
fn fits_reserved(interval: &Interval, reserved: &[Interval]) -> bool {
    reserved.iter().all(|r| !interval.overlaps(r))
}

fn resolve_heap(platform: &PlatformConfig, mid_app_end: u64, hi_app_beg: u64) -> Result<Interval, SolveError> {
    let align = platform.alignment;
    let beg = align_up(mid_app_end + 1, align);
    if beg >= hi_app_beg {
        return Err(infeasible(
            platform.name,
            "no room for Heap between MidApp and HiApp",
        ));
    }
    let end_floor = beg.saturating_add(platform.min_heap_size).max(beg + 1);
    let end = align_up(end_floor, align);
    if end >= hi_app_beg {
        return Err(infeasible(
            platform.name,
            format!(
                "min_heap_size 0x{:x} does not fit before HiApp begins",
                platform.min_heap_size
            ),
        ));
    }
    Ok(Interval::new(beg, end))
}

/// Run the constraint builder and the bounded search (§4.3, §4.5 driver
/// entry point). Returns a fully solved, immutable [`LayoutModel`] or a
/// single [`SolveError`] diagnostic naming the platform.
pub fn solve(platform: &PlatformConfig) -> Result<LayoutModel, SolveError> {
    tracing::info!(target: "solver", platform = platform.name, "building constraint model");

    let mid_app_beg = platform
        .mid_app_beg
        .ok_or_else(|| infeasible(platform.name, "MidApp.beg is symbolic; unsupported"))?;
    let mid_app_end = platform
        .mid_app_end
        .ok_or_else(|| infeasible(platform.name, "MidApp.end is symbolic; unsupported"))?;
    let hi_app_beg = platform.hi_app_beg_hint;
    let hi_app_end = platform
        .hi_app_end
        .ok_or_else(|| infeasible(platform.name, "HiApp.end is symbolic; unsupported"))?;

    let heap = resolve_heap(platform, mid_app_end, hi_app_beg)?;

    let app_regions = vec![
        AppRegion {
            name: AppRegionName::LoApp,
            interval: Interval::new(platform.lo_app_beg, platform.lo_app_end),
        },
        AppRegion {
            name: AppRegionName::MidApp,
            interval: Interval::new(mid_app_beg, mid_app_end),
        },
        AppRegion {
            name: AppRegionName::HiApp,
            interval: Interval::new(hi_app_beg, hi_app_end),
        },
        AppRegion {
            name: AppRegionName::Heap,
            interval: heap,
        },
    ];

    // Ordering invariants (§3, §8 property 1) — platform anchors plus the
    // Heap placement we just chose must already satisfy them by
    // construction; assert rather than re-derive.
    debug_assert!(platform.lo_app_end < mid_app_beg);
    debug_assert!(mid_app_beg < mid_app_end);
    debug_assert!(mid_app_end < hi_app_beg);
    debug_assert!(hi_app_beg < hi_app_end);
    debug_assert!(mid_app_end < heap.beg && heap.end < hi_app_beg);

    let mappers: Vec<ShadowMapper> = platform.mappers.iter().map(ShadowMapper::from_spec).collect();

    if mappers.iter().any(|m| matches!(m, ShadowMapper::Tsan(_)))
        && !layout_mapper::indicator_separated(&app_regions)
    {
        return Err(infeasible(
            platform.name,
            "application regions are not distinguishable by the TSan indicator bits",
        ));
    }

    // Non-overlap (§4.3 rule 7) excludes LoApp — ASan's global shadow is
    // defined to cover it.
    let mut reserved: Vec<Interval> = vec![
        app_regions[1].interval, // MidApp
        app_regions[2].interval, // HiApp
        heap,
    ];

    let mut assignment = Assignment::default();

    for mapper in &mappers {
        match mapper {
            ShadowMapper::Asan(_) => {
                let regions = mapper.global_regions(&app_regions);
                for region in &regions {
                    if !shadow_reachable(&region.interval, platform.lo_app_end, hi_app_beg)
                        || !fits_reserved(&region.interval, &reserved)
                    {
                        return Err(infeasible(
                            platform.name,
                            format!("ASan global region \"{}\" is not reachable/non-overlapping", region.name),
                        ));
                    }
                }
                reserved.extend(regions.iter().map(|r| r.interval));
            }
            ShadowMapper::Msan(_) => {
                let xor_mask = search_free_var(
                    platform,
                    mapper,
                    FreeVar::MsanXorMask,
                    &reserved,
                    |candidate| mapper.msan_shadow_regions(&app_regions, candidate),
                )?;
                assignment.set(FreeVar::MsanXorMask, xor_mask);
                reserved.extend(
                    mapper
                        .msan_shadow_regions(&app_regions, xor_mask)
                        .iter()
                        .map(|r| r.interval),
                );

                let origin_add = search_free_var(
                    platform,
                    mapper,
                    FreeVar::MsanOriginAdd,
                    &reserved,
                    |candidate| mapper.msan_origin_regions(&app_regions, xor_mask, candidate),
                )?;
                assignment.set(FreeVar::MsanOriginAdd, origin_add);
                reserved.extend(
                    mapper
                        .msan_origin_regions(&app_regions, xor_mask, origin_add)
                        .iter()
                        .map(|r| r.interval),
                );
            }
            ShadowMapper::Tsan(_) => {
                let shadow_add = search_free_var(
                    platform,
                    mapper,
                    FreeVar::TsanShadowAdd,
                    &reserved,
                    |candidate| mapper.tsan_shadow_regions(&app_regions, candidate),
                )?;
                assignment.set(FreeVar::TsanShadowAdd, shadow_add);
                reserved.extend(
                    mapper
                        .tsan_shadow_regions(&app_regions, shadow_add)
                        .iter()
                        .map(|r| r.interval),
                );

                let meta_beg = search_free_var(
                    platform,
                    mapper,
                    FreeVar::TsanMetaBeg,
                    &reserved,
                    |candidate| mapper.tsan_meta_regions(&app_regions, candidate),
                )?;
                assignment.set(FreeVar::TsanMetaBeg, meta_beg);
                reserved.extend(
                    mapper
                        .tsan_meta_regions(&app_regions, meta_beg)
                        .iter()
                        .map(|r| r.interval),
                );
            }
        }
    }

    tracing::info!(target: "solver", platform = platform.name, "solved");
    Ok(LayoutModel {
        platform: platform.clone(),
        app_regions,
        mappers,
        assignment,
    })
}

/// First-fit ascending search over one free variable's candidate domain:
/// the first value whose produced regions are all shadow-reachable and
/// non-overlapping with everything reserved so far wins.
fn search_free_var(
    platform: &PlatformConfig,
    mapper: &ShadowMapper,
    var: FreeVar,
    reserved: &[Interval],
    produce: impl Fn(u64) -> Vec<ShadowRegion>,
) -> Result<u64, SolveError> {
    let hi_app_beg = platform.hi_app_beg_hint;
    for candidate in mapper.candidate_domain(var, platform) {
        let regions = produce(candidate);
        let feasible = regions.iter().all(|r| {
            shadow_reachable(&r.interval, platform.lo_app_end_loose, hi_app_beg) && fits_reserved(&r.interval, reserved)
        });
        if feasible {
            tracing::debug!(target: "solver", platform = platform.name, ?var, candidate, "bound free variable");
            return Ok(candidate);
        }
    }
    Err(infeasible(
        platform.name,
        format!("no feasible value for {var:?} within its candidate domain"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x64_48_solves() {
        let platform = layout_config::lookup("x64_48").unwrap();
        let model = solve(&platform).unwrap();
        let heap = model.app_region(AppRegionName::Heap);
        assert!(heap.size() >= platform.min_heap_size);
        let mid = model.app_region(AppRegionName::MidApp);
        let hi = model.app_region(AppRegionName::HiApp);
        assert!(mid.end < heap.beg && heap.end < hi.beg);
    }

    #[test]
    fn aarch64_48_solves() {
        let platform = layout_config::lookup("aarch64_48").unwrap();
        assert!(solve(&platform).is_ok());
    }

    #[test]
    fn oversized_min_heap_size_is_infeasible() {
        let mut platform = layout_config::lookup("x64_48").unwrap();
        platform.min_heap_size = 0x0010_0000_0000_0000;
        let err = solve(&platform).unwrap_err();
        assert_eq!(err.platform, "x64_48");
    }

    #[test]
    fn solved_regions_never_overlap() {
        let platform = layout_config::lookup("x64_48").unwrap();
        let model = solve(&platform).unwrap();
        let mut intervals: Vec<Interval> = model
            .app_regions
            .iter()
            .filter(|r| r.name != AppRegionName::LoApp)
            .map(|r| r.interval)
            .collect();
        intervals.extend(model.shadow_regions().iter().map(|r| r.interval));
        for (i, a) in intervals.iter().enumerate() {
            for b in &intervals[i + 1..] {
                assert!(!a.overlaps(b), "{a:?} overlaps {b:?}");
            }
        }
    }
}
