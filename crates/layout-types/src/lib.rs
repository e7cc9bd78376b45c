//! Address-space data model shared by the catalog, mapper, solver and emitter crates.
//!
//! Everything here is inert data: intervals, region names and the small
//! formatting helpers that both the print-mode report and the generated
//! header need to agree on. No solving happens in this crate.

use std::fmt;

/// A 64-bit virtual address, used both for fixed platform anchors and for
/// values extracted from a solved model. All arithmetic on addresses is
/// unsigned; comparisons use unsigned ordering.
pub type Address = u64;

/// A half-open address interval `[beg, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval {
    pub beg: Address,
    pub end: Address,
}

impl Interval {
    pub fn new(beg: Address, end: Address) -> Self {
        Self { beg, end }
    }

    pub fn size(&self) -> u64 {
        self.end.saturating_sub(self.beg)
    }

    /// True if `self` and `other` share at least one address.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.beg < other.end && other.beg < self.end
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.beg && addr < self.end
    }
}

/// The four well-known application regions (§3 Data Model).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppRegionName {
    LoApp,
    MidApp,
    HiApp,
    Heap,
}

impl fmt::Display for AppRegionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AppRegionName::LoApp => "LoApp",
            AppRegionName::MidApp => "MidApp",
            AppRegionName::HiApp => "HiApp",
            AppRegionName::Heap => "Heap",
        };
        f.write_str(s)
    }
}

/// A concrete application region once every bound has a value.
#[derive(Debug, Clone, Copy)]
pub struct AppRegion {
    pub name: AppRegionName,
    pub interval: Interval,
}

/// The three supported bug-detection runtimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Detector {
    Asan,
    Msan,
    Tsan,
}

impl fmt::Display for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Detector::Asan => "ASan",
            Detector::Msan => "MSan",
            Detector::Tsan => "TSan",
        };
        f.write_str(s)
    }
}

/// What kind of auxiliary data a shadow region carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowKind {
    Shadow,
    Origin,
    Meta,
}

/// A region a mapper produces to shadow either one named application region
/// or, for the address detector, the whole address space (`shadows: None`).
#[derive(Debug, Clone)]
pub struct ShadowRegion {
    pub name: String,
    pub detector: Detector,
    pub kind: ShadowKind,
    pub shadows: Option<AppRegionName>,
    pub interval: Interval,
}

/// Render a byte count the way the layout table and header banner do:
/// the largest unit (`TB`/`GB`/`MB`/`KB`/`B`) the value reaches, printed as
/// an integer when it divides evenly and with two decimals otherwise.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [(u64, &str); 4] = [
        (1u64 << 40, "TB"),
        (1u64 << 30, "GB"),
        (1u64 << 20, "MB"),
        (1u64 << 10, "KB"),
    ];
    for (factor, label) in UNITS {
        if bytes >= factor {
            return if bytes % factor == 0 {
                format!("{} {}", bytes / factor, label)
            } else {
                format!("{:.2} {}", bytes as f64 / factor as f64, label)
            };
        }
    }
    format!("{bytes} B")
}

/// Render an address as bare 12 zero-padded hex digits with no `0x`/`ull`
/// dressing — the form the print-mode layout table uses for its `beg - end`
/// columns, distinct from [`format_address_literal`]'s C++ literal form.
pub fn format_address_plain(addr: Address) -> String {
    format!("{addr:012x}")
}

/// Render an address the normative way: 12 hex digits, zero-padded, `'`
/// separators every four digits, `ull` suffix. The generated header is
/// parsed by a C++ compiler that understands digit separators, so this
/// format is contractual, not cosmetic.
pub fn format_address_literal(addr: Address) -> String {
    let digits = format!("{addr:012x}");
    let grouped: Vec<&str> = digits
        .as_bytes()
        .rchunks(4)
        .rev()
        .map(|c| std::str::from_utf8(c).unwrap())
        .collect();
    format!("0x{}ull", grouped.join("'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_size_and_overlap() {
        let a = Interval::new(0, 10);
        let b = Interval::new(10, 20);
        let c = Interval::new(5, 15);
        assert_eq!(a.size(), 10);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
    }

    #[test]
    fn human_size_picks_largest_exact_unit() {
        assert_eq!(human_size(5 * (1u64 << 40)), "5 TB");
        assert_eq!(human_size((1u64 << 40) + (1u64 << 39)), "1.50 TB");
        assert_eq!(human_size(512), "512 B");
    }

    #[test]
    fn format_address_plain_has_no_dressing() {
        assert_eq!(format_address_plain(0x7fff_7000), "00007fff7000");
    }

    #[test]
    fn format_address_literal_groups_by_four() {
        assert_eq!(
            format_address_literal(0x7fff_8000_0000),
            "0x7fff'8000'0000ull"
        );
        assert_eq!(format_address_literal(0), "0x0000'0000'0000ull");
    }
}
