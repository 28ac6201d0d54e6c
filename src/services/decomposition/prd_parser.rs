//! PRD section parser (spec §6 "PRD sections"): a line-oriented, regex-based
//! splitter. Never interprets TDD-cycle content itself — each section's raw
//! text is handed to the decomposition pipeline's LM passes as-is.

use regex::Regex;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPrd {
    /// Allowed `impl_file` path prefixes, extracted from MODULE STRUCTURE.
    pub module_structure_prefixes: Vec<String>,
    /// One entry per install/scaffold line under DEPENDENCY CHANGES.
    pub dependency_changes: Vec<String>,
    pub tdd_cycles_text: String,
    pub module_api_text: Option<String>,
}

const HEADERS: &[&str] = &["DEPENDENCY CHANGES", "MODULE STRUCTURE", "MODULE API SPECIFICATION", "TDD CYCLES"];

pub fn parse_prd(source: &str) -> ParsedPrd {
    let header_re = Regex::new(r"(?m)^#{0,3}\s*(DEPENDENCY CHANGES|MODULE STRUCTURE|MODULE API SPECIFICATION|TDD CYCLES)\s*$").unwrap();

    let mut matches: Vec<(usize, usize, &str)> = header_re
        .captures_iter(source)
        .map(|c| {
            let m = c.get(0).unwrap();
            (m.start(), m.end(), c.get(1).unwrap().as_str())
        })
        .collect();
    matches.sort_by_key(|(start, _, _)| *start);

    let mut sections: HashMap<&str, String> = HashMap::new();
    for (i, (_, end, name)) in matches.iter().enumerate() {
        let body_end = matches.get(i + 1).map(|(start, _, _)| *start).unwrap_or(source.len());
        sections.insert(name, source[*end..body_end].trim().to_string());
    }

    let module_structure_prefixes =
        sections.get(HEADERS[1]).map(|body| extract_path_prefixes(body)).unwrap_or_default();

    let dependency_changes = sections
        .get(HEADERS[0])
        .map(|body| {
            body.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(|l| l.trim_start_matches(['-', '*']).trim().to_string())
                .collect()
        })
        .unwrap_or_default();

    ParsedPrd {
        module_structure_prefixes,
        dependency_changes,
        tdd_cycles_text: sections.get(HEADERS[3]).cloned().unwrap_or_else(|| source.to_string()),
        module_api_text: sections.get(HEADERS[2]).cloned(),
    }
}

fn extract_path_prefixes(body: &str) -> Vec<String> {
    let path_re = Regex::new(r"[\w./-]+/").unwrap();
    let mut prefixes: Vec<String> =
        body.lines().filter_map(|l| path_re.find(l.trim()).map(|m| m.as_str().to_string())).collect();
    prefixes.sort();
    prefixes.dedup();
    prefixes
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
DEPENDENCY CHANGES
- install: fastapi
- scaffold: pkg/__init__.py

MODULE STRUCTURE
- pkg/api/
- pkg/core/

TDD CYCLES
Cycle 1: build the health endpoint.
";

    #[test]
    fn splits_sections_by_header() {
        let parsed = parse_prd(SAMPLE);
        assert_eq!(parsed.dependency_changes, vec!["install: fastapi", "scaffold: pkg/__init__.py"]);
        assert_eq!(parsed.module_structure_prefixes, vec!["pkg/api/", "pkg/core/"]);
        assert!(parsed.tdd_cycles_text.contains("health endpoint"));
        assert!(parsed.module_api_text.is_none());
    }

    #[test]
    fn missing_tdd_cycles_header_falls_back_to_whole_source() {
        let parsed = parse_prd("just a goal description, no headers at all");
        assert!(parsed.tdd_cycles_text.contains("goal description"));
        assert!(parsed.dependency_changes.is_empty());
    }
}
