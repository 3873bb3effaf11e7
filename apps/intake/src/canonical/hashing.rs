//! Canonical hash and core text.

use sha2::{Digest, Sha256};

use super::{classify_section, SectionKind, SectionMap};

/// SHA-256 over the key-sorted `"key:\n" + lines + "\n"` rendering of the section map.
///
/// Line endings are folded to `\n`, trailing whitespace is stripped per line and the
/// whole document is trimmed before hashing, so formatting noise never changes the hash.
pub fn canonical_hash(sections: &SectionMap) -> String {
    let mut keyed: Vec<(&str, &Vec<String>)> = sections
        .iter()
        .map(|(key, lines)| (key.trim(), lines))
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(b.0));

    let mut document = String::new();
    for (key, lines) in keyed {
        document.push_str(key);
        document.push_str(":\n");
        if lines.is_empty() {
            document.push('\n');
        }
        for line in lines.iter() {
            document.push_str(line.trim_end());
            document.push('\n');
        }
    }

    let mut hasher = Sha256::new();
    hasher.update(normalize_document(&document).as_bytes());
    format!("{:x}", hasher.finalize())
}

fn normalize_document(document: &str) -> String {
    document
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Whitespace-normalized text of the high-weight sections (plus process), in a fixed
/// section order: responsibilities, requirements, preferred, process.
pub fn core_text(sections: &SectionMap) -> String {
    let mut picked: Vec<(SectionKind, &str, &Vec<String>)> = sections
        .iter()
        .map(|(key, lines)| (classify_section(key), key.as_str(), lines))
        .filter(|(kind, _, _)| kind.in_core_text())
        .collect();
    picked.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));

    picked
        .iter()
        .flat_map(|(_, _, lines)| lines.iter())
        .flat_map(|line| line.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}
