//! Solution emitter (§4.4): renders a solved [`LayoutModel`] into the
//! print-mode report and the generated C++ header.
//!
//! Both output modes walk the same region list and reuse the same
//! parameter table; the only thing that differs between them is
//! formatting and, for header mode, the trip through the filesystem.

use chrono::{DateTime, SecondsFormat, Utc};
use layout_solver::LayoutModel;
use layout_types::{format_address_literal, format_address_plain, human_size, AppRegionName};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failures writing the generated header (§7 "Output I/O error").
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("failed to create output directory \"{path}\": {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write header \"{path}\": {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegionType {
    App,
    Shadow,
}

impl RegionType {
    fn header_tag(self) -> &'static str {
        match self {
            RegionType::App => "RegionType::App",
            RegionType::Shadow => "RegionType::Shadow",
        }
    }
}

struct Row {
    name: String,
    beg: u64,
    end: u64,
    kind: RegionType,
}

/// Parameters shown only on an address scale rather than a byte count;
/// everything else in the contractual constant list is an address.
fn is_scalar_param(name: &str) -> bool {
    name == "kAsanShadowScale"
}

fn format_param_value(name: &str, value: u64) -> String {
    if is_scalar_param(name) {
        value.to_string()
    } else {
        format_address_literal(value)
    }
}

/// Every named constant in platform-record order, then mapper order (§6).
fn named_constants(model: &LayoutModel) -> Vec<(&'static str, u64)> {
    let platform = &model.platform;
    let lo_app = model.app_region(AppRegionName::LoApp);
    let mid_app = model.app_region(AppRegionName::MidApp);
    let hi_app = model.app_region(AppRegionName::HiApp);
    let heap = model.app_region(AppRegionName::Heap);

    let mut out = vec![
        ("kLoAppMemBeg", lo_app.beg),
        ("kLoAppMemEnd", lo_app.end),
        // The address detector's own LoApp boundary is the same strict
        // value in this model; kept as a distinct constant because the
        // header contract names it separately (§6).
        ("kAsanLoAppMemEnd", platform.lo_app_end),
        ("kMidAppMemBeg", mid_app.beg),
        ("kMidAppMemEnd", mid_app.end),
        ("kHiAppMemBeg", hi_app.beg),
        ("kHiAppMemEnd", hi_app.end),
        ("kHeapMemBeg", heap.beg),
        ("kHeapMemEnd", heap.end),
        ("kVdsoBeg", platform.vdso_beg),
    ];

    for mapper in &model.mappers {
        out.extend(mapper.format_params(&model.app_regions, &model.assignment));
    }
    out
}

fn layout_rows(model: &LayoutModel) -> Vec<Row> {
    let mut rows: Vec<Row> = model
        .app_regions
        .iter()
        .map(|r| Row {
            name: r.name.to_string(),
            beg: r.interval.beg,
            end: r.interval.end,
            kind: RegionType::App,
        })
        .collect();
    rows.extend(model.shadow_regions().iter().map(|r| Row {
        name: r.name.clone(),
        beg: r.interval.beg,
        end: r.interval.end,
        kind: RegionType::Shadow,
    }));
    // §4.4 "Region sort": by `end` ascending.
    rows.sort_by_key(|r| r.end);
    rows
}

fn layout_table_lines(rows: &[Row]) -> Vec<String> {
    let mut lines = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        lines.push(format!(
            "{} - {}: {} ({})",
            format_address_plain(row.beg),
            format_address_plain(row.end),
            row.name,
            human_size(row.end.saturating_sub(row.beg)),
        ));
        if let Some(next) = rows.get(i + 1)
            && row.end < next.beg
        {
            lines.push(format!(
                "{} - {}: - gap ({})",
                format_address_plain(row.end),
                format_address_plain(next.beg),
                human_size(next.beg - row.end),
            ));
        }
    }
    lines
}

/// Build the print-mode report (§4.4 "Print"): parameter lines, then the
/// sorted layout table with gap rows.
pub fn render_report(model: &LayoutModel) -> String {
    let mut out = String::new();
    for (name, value) in named_constants(model) {
        out.push_str(&format!(
            "static constexpr const uintptr {name} = {};\n",
            format_param_value(name, value)
        ));
    }
    out.push('\n');
    for line in layout_table_lines(&layout_rows(model)) {
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn platform_struct_name(key: &str) -> String {
    let mut chars = key.chars();
    let first = chars.next().map(|c| c.to_ascii_uppercase());
    let rest: String = chars.collect();
    format!("Mapping{}{}", first.unwrap_or_default(), rest)
}

fn banner_line(text: &str) -> String {
    format!("// {text:<76}//")
}

/// Build the generated header's full text (§4.4 "Header", §6 "Generated
/// header contract"). `cmdline` is the shell-quoted command line that
/// produced this run; `timestamp` is captured once at emission time.
pub fn render_header(model: &LayoutModel, cmdline: &str, timestamp: DateTime<Utc>) -> String {
    let platform = &model.platform;
    let struct_name = platform_struct_name(platform.key);
    let mut out = String::new();

    out.push_str(&"/".repeat(80));
    out.push('\n');
    out.push_str(&banner_line("GENERATED FILE - DO NOT EDIT"));
    out.push('\n');
    out.push_str(&banner_line(&format!("platform: {}", platform.name)));
    out.push('\n');
    out.push_str(&banner_line(&format!(
        "generated: {}",
        timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
    )));
    out.push('\n');
    out.push_str(&banner_line(&format!("command: {cmdline}")));
    out.push('\n');
    out.push_str(&"/".repeat(80));
    out.push_str("\n\n");

    out.push_str("/*\n");
    for line in layout_table_lines(&layout_rows(model)) {
        out.push_str(" * ");
        out.push_str(&line);
        out.push('\n');
    }
    out.push_str(" */\n\n");

    out.push_str("#pragma once\n\n");
    out.push_str("#include <cstdint>\n\n");
    out.push_str("using uintptr = uintptr_t;\n\n");
    out.push_str("enum class RegionType { App, Shadow };\n\n");
    out.push_str("struct MemRegion {\n");
    out.push_str("  uintptr beg;\n");
    out.push_str("  uintptr end;\n");
    out.push_str("  RegionType kind;\n");
    out.push_str("  const char *name;\n");
    out.push_str("};\n\n");

    out.push_str(&format!("struct {struct_name} {{\n"));
    for (name, value) in named_constants(model) {
        out.push_str(&format!(
            "  static constexpr const uintptr {name} = {};\n",
            format_param_value(name, value)
        ));
    }
    out.push('\n');

    let rows = layout_rows(model);
    out.push_str(&format!(
        "  static constexpr const MemRegion kRegions[{}] = {{\n",
        rows.len()
    ));
    for row in &rows {
        out.push_str(&format!(
            "    {{{}, {}, {}, \"{}\"}},\n",
            format_address_literal(row.beg),
            format_address_literal(row.end),
            row.kind.header_tag(),
            row.name,
        ));
    }
    out.push_str("  };\n");
    out.push_str("};\n");

    out
}

/// Write the generated header to `<outdir>/xsan_platform_<key>.h`, creating
/// `outdir` if it doesn't exist. Returns the path written.
pub fn write_header(outdir: &Path, model: &LayoutModel, cmdline: &str) -> Result<PathBuf, EmitError> {
    fs::create_dir_all(outdir).map_err(|source| EmitError::CreateDir {
        path: outdir.to_path_buf(),
        source,
    })?;
    let path = outdir.join(format!("xsan_platform_{}.h", model.platform.key));
    let contents = render_header(model, cmdline, Utc::now());
    tracing::info!(target: "emit", platform = model.platform.name, path = %path.display(), "writing header");
    fs::write(&path, contents).map_err(|source| EmitError::WriteFile {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn solved_x64() -> LayoutModel {
        let platform = layout_config::lookup("x64_48").unwrap();
        layout_solver::solve(&platform).unwrap()
    }

    #[test]
    fn report_contains_scenario_a_lines() {
        let model = solved_x64();
        let report = render_report(&model);
        assert!(report.contains(
            "static constexpr const uintptr kAsanShadowOffset = 0x0000'7fff'8000ull;"
        ));
        assert!(report.contains("static constexpr const uintptr kAsanShadowScale = 3;"));
        assert!(report.contains("000000000000 - 00007fff7000: LoApp"));
    }

    #[test]
    fn header_contains_struct_and_contractual_names() {
        let model = solved_x64();
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let header = render_header(&model, "xsan-layout --platform x64_48", ts);
        assert!(header.contains("struct MappingX64_48 {"));
        for name in [
            "kLoAppMemBeg",
            "kLoAppMemEnd",
            "kAsanLoAppMemEnd",
            "kMidAppMemBeg",
            "kMidAppMemEnd",
            "kHiAppMemBeg",
            "kHiAppMemEnd",
            "kHeapMemBeg",
            "kHeapMemEnd",
            "kVdsoBeg",
        ] {
            assert!(header.contains(name), "missing {name}");
        }
    }

    #[test]
    fn aarch64_header_has_expected_tsan_mask() {
        let platform = layout_config::lookup("aarch64_48").unwrap();
        let model = layout_solver::solve(&platform).unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let header = render_header(&model, "xsan-layout --platform aarch64_48", ts);
        assert!(header.contains("kTsanShadowMsk = 0xf000'0000'0000ull"));
    }

    #[test]
    fn layout_table_inserts_gap_rows() {
        let model = solved_x64();
        let report = render_report(&model);
        assert!(report.contains("- gap ("));
    }

    #[test]
    fn write_header_creates_file_in_outdir() {
        let dir = tempfile::tempdir().unwrap();
        let model = solved_x64();
        let path = write_header(dir.path(), &model, "xsan-layout --platform x64_48").unwrap();
        assert_eq!(path.file_name().unwrap(), "xsan_platform_x64_48.h");
        assert!(path.exists());
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("struct MappingX64_48 {"));
    }
}
