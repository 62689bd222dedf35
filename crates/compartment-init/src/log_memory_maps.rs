//! `ia2_log_memory_maps`: a non-authoritative, in-process dump of
//! `/proc/self/maps` annotated with
//! the per-compartment stack labels this process's threads have recorded.
//! Debugging aid only; the tracer's shadow map in `ia2-tracer` remains the
//! source of truth for policy decisions.

use std::fs;

use ia2_gate_runtime::locate_address;

/// One annotated `/proc/self/maps` line.
#[derive(Debug, Clone)]
pub struct MappedRange {
    pub raw_line: String,
    pub start: usize,
    pub end: usize,
    pub label: Option<&'static str>,
}

fn parse_range(line: &str) -> Option<(usize, usize)> {
    let range = line.split_whitespace().next()?;
    let (start, end) = range.split_once('-')?;
    Some((usize::from_str_radix(start, 16).ok()?, usize::from_str_radix(end, 16).ok()?))
}

/// Reads and annotates `/proc/self/maps`. Each range is labeled "stack" if
/// any recorded per-compartment stack top falls inside it (via
/// [`ia2_gate_runtime::locate_address`]), otherwise left unlabeled.
pub fn log_memory_maps() -> Vec<MappedRange> {
    let contents = match fs::read_to_string("/proc/self/maps") {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read /proc/self/maps");
            return Vec::new();
        }
    };
    contents
        .lines()
        .filter_map(|line| {
            let (start, end) = parse_range(line)?;
            let label = locate_address(start).name.or_else(|| locate_address(end.saturating_sub(1)).name);
            Some(MappedRange {
                raw_line: line.to_string(),
                start,
                end,
                label,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_typical_maps_line() {
        let line = "7f0000000000-7f0000021000 rw-p 00000000 00:00 0 [heap]";
        assert_eq!(parse_range(line), Some((0x7f0000000000, 0x7f0000021000)));
    }

    #[test]
    fn self_maps_is_non_empty_and_parseable() {
        let ranges = log_memory_maps();
        assert!(!ranges.is_empty());
        assert!(ranges.iter().all(|r| r.start <= r.end));
    }
}
