//! Field access inside packet text.

use crate::header::{PACKET_DELIMITER, PAYLOAD_DELIMITER};

/// A single field located inside packet text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element<'a> {
    /// Field text, record delimiter excluded
    pub value: &'a str,
    /// Offset of the following field, if there is one
    pub next: Option<usize>,
}

/// Extract the field starting at `offset`.
///
/// The field runs to the next payload delimiter or to the end of the text.
pub fn get_element(text: &str, offset: usize) -> Option<Element<'_>> {
    let rest = text.get(offset..)?;
    if rest.is_empty() {
        return None;
    }
    match rest.find(PAYLOAD_DELIMITER) {
        Some(pos) => {
            let next = offset + pos + 1;
            Some(Element {
                value: &rest[..pos],
                next: (next < text.len()).then_some(next),
            })
        }
        None => Some(Element {
            value: rest.trim_end_matches(['\r', PACKET_DELIMITER]),
            next: None,
        }),
    }
}

/// Scan interleaved key/value pairs from `offset` for `key`.
///
/// Returns the value and its offset. Keys compare after trimming whitespace;
/// an empty value counts as absent.
pub fn get_keyed_value<'a>(text: &'a str, key: &str, offset: usize) -> Option<(&'a str, usize)> {
    let key = key.trim();
    let mut cursor = Some(offset);
    while let Some(pos) = cursor {
        let element = get_element(text, pos)?;
        if element.value.trim() == key {
            let value_pos = element.next?;
            let value = get_element(text, value_pos)?;
            return (!value.value.is_empty()).then_some((value.value, value_pos));
        }
        cursor = element.next;
    }
    None
}

/// Split a packet into fields, dropping empty tokens and the record delimiter
pub fn split_fields(text: &str) -> Vec<&str> {
    text.trim_end_matches(['\r', PACKET_DELIMITER])
        .split(PAYLOAD_DELIMITER)
        .filter(|f| !f.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_element_walks_fields() {
        let text = "DP,3132,DI,MD-V5";
        let first = get_element(text, 0).unwrap();
        assert_eq!(first.value, "DP");
        assert_eq!(first.next, Some(3));

        let second = get_element(text, 3).unwrap();
        assert_eq!(second.value, "3132");

        let last = get_element(text, 11).unwrap();
        assert_eq!(last.value, "MD-V5");
        assert_eq!(last.next, None);
    }

    #[test]
    fn test_get_element_end_of_text() {
        assert_eq!(get_element("a,b", 2).unwrap().value, "b");
        assert_eq!(get_element("a,b\n", 2).unwrap().value, "b");
        assert!(get_element("a,b", 3).is_none());
        assert!(get_element("a,b", 10).is_none());

        // a trailing comma leaves no following field
        assert_eq!(get_element("a,", 0).unwrap().next, None);
    }

    #[test]
    fn test_get_keyed_value() {
        let text = "100,5,4,HH,1,100,DP,-1,DI,MD-V5-0000001\n";
        let start = text.find("DP").unwrap();

        let (dp, pos) = get_keyed_value(text, "DP", start).unwrap();
        assert_eq!(dp, "-1");
        assert_eq!(&text[pos..pos + 2], "-1");

        let (id, _) = get_keyed_value(text, "DI", start).unwrap();
        assert_eq!(id, "MD-V5-0000001");

        assert!(get_keyed_value(text, "CP", start).is_none());
        assert!(get_keyed_value(text, " DP ", start).is_some());
    }

    #[test]
    fn test_get_keyed_value_missing_value() {
        assert!(get_keyed_value("DP", "DP", 0).is_none());
        assert!(get_keyed_value("DP,", "DP", 0).is_none());
        assert!(get_keyed_value("DI,,DP,1", "DI", 0).is_none());
    }

    #[test]
    fn test_split_fields_skips_empty_tokens() {
        assert_eq!(split_fields("1,2,,EA,1,100,0.5\n"), vec!["1", "2", "EA", "1", "100", "0.5"]);
        assert!(split_fields("\n").is_empty());
    }
}
