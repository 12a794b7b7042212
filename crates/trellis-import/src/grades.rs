//! Grade level normalization for educational alignment.

/// Grade codes kept as they are.
const PASSTHROUGH: &[&str] = &[
    "IT", "PR", "PK", "TK", "KG", "AS", "BA", "PB", "MD", "PM", "DO", "PD", "AE", "PT", "OT",
];

/// Normalize a comma separated list of grade levels.
///
/// Kindergarten spellings become `KG`, `HS` expands to `09,10,11,12`, known
/// codes pass through, numbers from 1 to 9 are zero padded, 10 to 13 are kept,
/// and everything else is `OT`. Duplicates are dropped keeping the first
/// occurrence. Returns `None` when nothing is left.
pub fn normalize_grades(raw: &str) -> Option<String> {
    let mut grades: Vec<String> = Vec::new();
    let mut push = |grade: String| {
        if !grades.contains(&grade) {
            grades.push(grade);
        }
    };

    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match token {
            "0" | "00" | "K" | "KG" => push("KG".to_string()),
            "HS" => {
                for grade in ["09", "10", "11", "12"] {
                    push(grade.to_string());
                }
            }
            code if PASSTHROUGH.contains(&code) => push(code.to_string()),
            other => push(numeric_grade(other).unwrap_or_else(|| "OT".to_string())),
        }
    }

    if grades.is_empty() {
        None
    } else {
        Some(grades.join(","))
    }
}

fn numeric_grade(token: &str) -> Option<String> {
    let value = parse_numeric(token)?;
    if !(1.0..14.0).contains(&value) {
        return None;
    }
    let whole = value.trunc() as i64;
    if whole < 10 {
        Some(format!("0{whole}"))
    } else {
        Some(whole.to_string())
    }
}

/// An integer or decimal literal, optionally signed, with an optional exponent.
fn parse_numeric(token: &str) -> Option<f64> {
    let digits = token.trim_start_matches(&['+', '-'][..]);
    let looks_numeric = digits.starts_with(|c: char| c.is_ascii_digit() || c == '.')
        && digits
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'));
    if !looks_numeric {
        return None;
    }
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}
