//! Diacritic folding.
//!
//! Maps accented Latin letters to their unaccented ASCII forms and drops
//! combining marks. Letters outside the table (Cyrillic, CJK, ...) pass
//! through unchanged.

use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Base letter followed by every accented form that folds to it.
const FOLDS: &[(&str, &str)] = &[
    ("a", "àáâãäåāăąǎǟǡǻȁȃȧạảấầẩẫậắằẳẵặ"),
    ("A", "ÀÁÂÃÄÅĀĂĄǍǞǠǺȀȂȦẠẢẤẦẨẪẬẮẰẲẴẶ"),
    ("ae", "æǣǽ"),
    ("AE", "ÆǢǼ"),
    ("b", "ḃḅḇ"),
    ("B", "ḂḄḆ"),
    ("c", "çćĉċčḉ"),
    ("C", "ÇĆĈĊČḈ"),
    ("d", "ďđḋḍḏḑḓ"),
    ("D", "ĎĐḊḌḎḐḒ"),
    ("e", "èéêëēĕėęěȅȇȩẹẻẽếềểễệḕḗḙḛḝ"),
    ("E", "ÈÉÊËĒĔĖĘĚȄȆȨẸẺẼẾỀỂỄỆḔḖḘḚḜ"),
    ("f", "ḟ"),
    ("F", "Ḟ"),
    ("g", "ĝğġģǧǵḡ"),
    ("G", "ĜĞĠĢǦǴḠ"),
    ("h", "ĥħȟḣḥḧḩḫẖ"),
    ("H", "ĤĦȞḢḤḦḨḪ"),
    ("i", "ìíîïĩīĭįıǐȉȋịỉḭḯ"),
    ("I", "ÌÍÎÏĨĪĬĮİǏȈȊỊỈḬḮ"),
    ("ij", "ĳ"),
    ("IJ", "Ĳ"),
    ("j", "ĵǰ"),
    ("J", "Ĵ"),
    ("k", "ķǩḱḳḵ"),
    ("K", "ĶǨḰḲḴ"),
    ("l", "ĺļľŀłḷḹḻḽ"),
    ("L", "ĹĻĽĿŁḶḸḺḼ"),
    ("m", "ḿṁṃ"),
    ("M", "ḾṀṂ"),
    ("n", "ñńņňŉǹṅṇṉṋ"),
    ("N", "ÑŃŅŇǸṄṆṈṊ"),
    ("o", "òóôõöøōŏőǒǫǭǿȍȏȫȭȯȱọỏốồổỗộớờởỡợơṍṏṑṓ"),
    ("O", "ÒÓÔÕÖØŌŎŐǑǪǬǾȌȎȪȬȮȰỌỎỐỒỔỖỘỚỜỞỠỢƠṌṎṐṒ"),
    ("oe", "œ"),
    ("OE", "Œ"),
    ("p", "ṕṗ"),
    ("P", "ṔṖ"),
    ("r", "ŕŗřȑȓṙṛṝṟ"),
    ("R", "ŔŖŘȐȒṘṚṜṞ"),
    ("s", "śŝşšșṡṣṥṧṩ"),
    ("S", "ŚŜŞŠȘṠṢṤṦṨ"),
    ("ss", "ß"),
    ("t", "ţťŧțṫṭṯṱẗ"),
    ("T", "ŢŤŦȚṪṬṮṰ"),
    ("u", "ùúûüũūŭůűųǔǖǘǚǜȕȗụủứừửữựưṳṵṷṹṻ"),
    ("U", "ÙÚÛÜŨŪŬŮŰŲǓǕǗǙǛȔȖỤỦỨỪỬỮỰƯṲṴṶṸṺ"),
    ("v", "ṽṿ"),
    ("V", "ṼṾ"),
    ("w", "ŵẁẃẅẇẉẘ"),
    ("W", "ŴẀẂẄẆẈ"),
    ("x", "ẋẍ"),
    ("X", "ẊẌ"),
    ("y", "ýÿŷȳẏẙỳỵỷỹ"),
    ("Y", "ÝŸŶȲẎỲỴỶỸ"),
    ("z", "źżžẑẓẕ"),
    ("Z", "ŹŻŽẐẒẔ"),
];

static FOLD_MAP: LazyLock<BTreeMap<char, &'static str>> = LazyLock::new(|| {
    FOLDS
        .iter()
        .flat_map(|(base, accented)| accented.chars().map(move |c| (c, *base)))
        .collect()
});

const fn is_combining_mark(c: char) -> bool {
    matches!(c, '\u{0300}'..='\u{036F}' | '\u{1AB0}'..='\u{1AFF}' | '\u{20D0}'..='\u{20DF}')
}

/// Folds accented Latin letters to ASCII and drops combining marks.
#[must_use]
pub fn strip_diacritics(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if is_combining_mark(c) {
            continue;
        }
        match FOLD_MAP.get(&c) {
            Some(folded) => out.push_str(folded),
            None => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_common_accents() {
        assert_eq!(strip_diacritics("Łódź"), "Lodz");
        assert_eq!(strip_diacritics("São Paulo"), "Sao Paulo");
        assert_eq!(strip_diacritics("straße"), "strasse");
    }

    #[test]
    fn drops_combining_marks() {
        assert_eq!(strip_diacritics("e\u{0301}cole"), "ecole");
    }

    #[test]
    fn leaves_other_scripts_alone() {
        assert_eq!(strip_diacritics("Москва 北京"), "Москва 北京");
    }
}
