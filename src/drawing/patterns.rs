//! Shared regex pattern sets for construction entities
//!
//! Used both by the drawing extractor and by query entity linking in
//! graph retrieval, so the two stay in agreement about what counts as a
//! component code, material grade, specification or dimension.

use regex::Regex;
use std::sync::OnceLock;

/// Component kind derived from a code pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Beam,
    Column,
    Slab,
    Wall,
    Foundation,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Beam => "beam",
            ComponentKind::Column => "column",
            ComponentKind::Slab => "slab",
            ComponentKind::Wall => "wall",
            ComponentKind::Foundation => "foundation",
        }
    }
}

/// Material kind derived from a grade pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaterialKind {
    Concrete,
    Rebar,
    Steel,
}

impl MaterialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaterialKind::Concrete => "concrete",
            MaterialKind::Rebar => "rebar",
            MaterialKind::Steel => "steel",
        }
    }
}

/// Component code patterns by kind.
/// Wall numbering is one or two digits; a Q followed by three digits is
/// a steel grade, not a wall.
pub fn component_patterns() -> &'static [(Regex, ComponentKind)] {
    static PATTERNS: OnceLock<Vec<(Regex, ComponentKind)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            (
                Regex::new(r"(?-u:\b)[KDL]{1,3}-?\d{1,3}[a-z]?(?-u:\b)").unwrap(),
                ComponentKind::Beam,
            ),
            (
                Regex::new(r"(?-u:\b)KZ-?\d{1,3}[a-z]?(?-u:\b)").unwrap(),
                ComponentKind::Column,
            ),
            (
                Regex::new(r"(?-u:\b)LB-?\d{1,3}[a-z]?(?-u:\b)").unwrap(),
                ComponentKind::Slab,
            ),
            (
                Regex::new(r"(?-u:\b)Q-?\d{1,2}[a-z]?(?-u:\b)").unwrap(),
                ComponentKind::Wall,
            ),
            (
                Regex::new(r"(?-u:\b)JC-?\d{1,3}[a-z]?(?-u:\b)").unwrap(),
                ComponentKind::Foundation,
            ),
        ]
    })
}

/// Material grade patterns by kind
pub fn material_patterns() -> &'static [(Regex, MaterialKind)] {
    static PATTERNS: OnceLock<Vec<(Regex, MaterialKind)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            (
                Regex::new(r"(?-u:\b)C\d{2,3}(?-u:\b)").unwrap(),
                MaterialKind::Concrete,
            ),
            (
                Regex::new(r"(?-u:\b)HRB\d{3}E?(?-u:\b)").unwrap(),
                MaterialKind::Rebar,
            ),
            (
                Regex::new(r"(?-u:\b)Q\d{3}[A-Z]?(?-u:\b)").unwrap(),
                MaterialKind::Steel,
            ),
        ]
    })
}

/// National and industry standard code patterns
pub fn spec_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"GB/T\s*\d{4,6}[-–]\d{4}").unwrap(),
            Regex::new(r"GB\s*\d{4,6}[-–]\d{4}").unwrap(),
            Regex::new(r"JGJ\s*\d{2,4}[-–]\d{4}").unwrap(),
            Regex::new(r"DBJ\s*\d{2,4}[-–]\d{2,4}").unwrap(),
        ]
    })
}

/// Dimension patterns: (regex, dimension type).
/// The first capture group holds the value.
pub fn dimension_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            (
                Regex::new(r"(?-u:\b)(\d{2,4}[x×]\d{2,4})(?-u:\b)").unwrap(),
                "section",
            ),
            (
                Regex::new(r"(?:板厚|厚度?)\s*[:：]?\s*(\d{2,4})\s*(?:mm)?").unwrap(),
                "thickness",
            ),
            (
                Regex::new(r"(?:层高|高度?)\s*[:：]?\s*(\d{3,5})\s*(?:mm)?").unwrap(),
                "height",
            ),
            (
                Regex::new(r"宽度?\s*[:：]?\s*(\d{2,4})\s*(?:mm)?").unwrap(),
                "width",
            ),
            (
                Regex::new(r"跨度\s*[:：]?\s*(\d{3,5})\s*(?:mm)?").unwrap(),
                "span",
            ),
            (
                Regex::new(r"(?:间距|@)\s*(\d{2,4})\s*(?:mm)?").unwrap(),
                "spacing",
            ),
        ]
    })
}

/// Floor markers like "3层" / "三层" / "F3"
pub fn floor_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:F(\d{1,2})|([0-9一二三四五六七八九十]{1,3})层)").unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find_components(text: &str) -> Vec<(String, ComponentKind)> {
        let mut found = Vec::new();
        for (pattern, kind) in component_patterns() {
            for m in pattern.find_iter(text) {
                found.push((m.as_str().to_string(), *kind));
            }
        }
        found
    }

    #[test]
    fn test_component_codes() {
        let found = find_components("KL-1 KZ-2 LB-3 Q-1 JC1");
        assert!(found.contains(&("KL-1".to_string(), ComponentKind::Beam)));
        assert!(found.contains(&("KZ-2".to_string(), ComponentKind::Column)));
        assert!(found.contains(&("LB-3".to_string(), ComponentKind::Slab)));
        assert!(found.contains(&("Q-1".to_string(), ComponentKind::Wall)));
        assert!(found.contains(&("JC1".to_string(), ComponentKind::Foundation)));
    }

    #[test]
    fn test_steel_grade_is_not_a_wall() {
        let found = find_components("钢材采用Q235B");
        assert!(found.iter().all(|(_, kind)| *kind != ComponentKind::Wall));

        let mut materials = Vec::new();
        for (pattern, kind) in material_patterns() {
            for m in pattern.find_iter("钢材采用Q235B") {
                materials.push((m.as_str().to_string(), *kind));
            }
        }
        assert!(materials.contains(&("Q235B".to_string(), MaterialKind::Steel)));
    }

    #[test]
    fn test_codes_adjacent_to_cjk_text() {
        // ASCII word boundaries: codes embedded directly in CJK prose
        // must still match
        let found = find_components("KL-1梁采用C30混凝土");
        assert!(found.contains(&("KL-1".to_string(), ComponentKind::Beam)));

        let mut materials = Vec::new();
        for (pattern, kind) in material_patterns() {
            for m in pattern.find_iter("KL-1梁采用C30混凝土") {
                materials.push((m.as_str().to_string(), *kind));
            }
        }
        assert!(materials.contains(&("C30".to_string(), MaterialKind::Concrete)));
    }

    #[test]
    fn test_material_grades() {
        let text = "C30混凝土，HRB400E钢筋";
        let mut found = Vec::new();
        for (pattern, kind) in material_patterns() {
            for m in pattern.find_iter(text) {
                found.push((m.as_str().to_string(), *kind));
            }
        }
        assert!(found.contains(&("C30".to_string(), MaterialKind::Concrete)));
        assert!(found.contains(&("HRB400E".to_string(), MaterialKind::Rebar)));
    }

    #[test]
    fn test_spec_codes() {
        let text = "依据GB50010-2010和JGJ 18-2012";
        let mut found = Vec::new();
        for pattern in spec_patterns() {
            for m in pattern.find_iter(text) {
                found.push(m.as_str().replace(' ', ""));
            }
        }
        assert!(found.contains(&"GB50010-2010".to_string()));
        assert!(found.contains(&"JGJ18-2012".to_string()));
    }

    #[test]
    fn test_dimensions() {
        let text = "截面300x500，板厚120mm，跨度6000";
        let mut found = Vec::new();
        for (pattern, dim_type) in dimension_patterns() {
            for caps in pattern.captures_iter(text) {
                let value = caps
                    .iter()
                    .skip(1)
                    .flatten()
                    .next()
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default();
                found.push((dim_type.to_string(), value));
            }
        }
        assert!(found.contains(&("section".to_string(), "300x500".to_string())));
        assert!(found.contains(&("thickness".to_string(), "120".to_string())));
        assert!(found.contains(&("span".to_string(), "6000".to_string())));
    }
}
