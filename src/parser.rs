use crate::record::{ContactRecord, Field};

/// A detail line classifier: lines starting with `prefix` feed `field`,
/// after the first occurrence of each `strip` keyword is removed.
struct Rule {
    prefix: &'static str,
    strip: &'static [&'static str],
    field: Field,
}

// First match wins, so order matters.
const RULES: &[Rule] = &[
    Rule { prefix: "office", strip: &["office"], field: Field::Office },
    Rule { prefix: "direct", strip: &["direct", "line"], field: Field::DirectLine },
    Rule { prefix: "cell", strip: &["cell"], field: Field::Cell },
    Rule { prefix: "fax", strip: &["fax"], field: Field::Fax },
    Rule { prefix: "personal", strip: &["personal", "fax"], field: Field::PersonalFax },
];

/// Build a contact record from the agent heading (`"Jane Doe, REALTOR"`) and
/// the lines of the agent's detail block.
///
/// The first detail line is always the company. A trailing line containing
/// `@` is taken as the email and removed; every other line is lower-cased and
/// matched against [`RULES`]. Lines that match no rule but contain `@` replace
/// the email. Anything else is dropped.
pub fn parse<S: AsRef<str>>(name_line: &str, detail_lines: &[S]) -> ContactRecord {
    let mut record = ContactRecord {
        name: name_line.split(',').next().unwrap_or_default().trim().to_string(),
        ..Default::default()
    };

    let mut lines: Vec<&str> = detail_lines.iter().map(AsRef::as_ref).collect();
    if lines.is_empty() {
        return record;
    }
    record.company = lines.remove(0).trim().to_string();

    if let Some(last) = lines.last().map(|l| l.trim()) {
        if last.contains('@') {
            record.email = first_segment(last);
            lines.pop();
        }
    }

    for line in lines {
        classify(line, &mut record);
    }

    record
}

fn classify(line: &str, record: &mut ContactRecord) {
    let lowered = line.trim().to_lowercase();

    if let Some(rule) = RULES.iter().find(|r| lowered.starts_with(r.prefix)) {
        let value = rule
            .strip
            .iter()
            .fold(lowered.clone(), |acc, kw| acc.replacen(kw, "", 1));
        record.set(rule.field, value.trim().to_string());
    } else if lowered.contains('@') {
        record.email = first_segment(&lowered);
    }
}

/// `"a@x.com; b@y.com"` → `"a@x.com"`
fn first_segment(s: &str) -> String {
    s.split(';').next().unwrap_or_default().trim().to_string()
}
