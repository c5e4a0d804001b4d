use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Width of one hex cell identifier inside a signature. H3 cell indexes
/// render as 15 hexadecimal characters at every resolution, which is what
/// makes the concatenation re-segmentable.
pub const CELL_WIDTH: usize = 15;

/// Separator between a signature and an entry id in a pool membership record.
pub const MEMBER_SEPARATOR: &str = "::";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature length {0} is not a multiple of the cell width")]
    UnalignedLength(usize),
    #[error("signature is empty")]
    Empty,
    #[error("signature contains non-ASCII characters")]
    NonAscii,
}

/// The travel-ordered concatenation of the hex cells a route traverses,
/// from the airport to the destination.
///
/// Two routes sharing the same leading `K * CELL_WIDTH` characters share
/// their first `K` cells of travel, so containment and divergence reduce to
/// plain lexicographic prefix tests.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteSignature(String);

impl RouteSignature {
    pub fn new(raw: impl Into<String>) -> Result<Self, SignatureError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(SignatureError::Empty);
        }
        if !raw.is_ascii() {
            return Err(SignatureError::NonAscii);
        }
        if raw.len() % CELL_WIDTH != 0 {
            return Err(SignatureError::UnalignedLength(raw.len()));
        }
        Ok(Self(raw))
    }

    pub fn from_cells<I, S>(cells: I) -> Result<Self, SignatureError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut raw = String::new();
        for cell in cells {
            raw.push_str(cell.as_ref());
        }
        Self::new(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn cell_count(&self) -> usize {
        self.0.len() / CELL_WIDTH
    }

    pub fn cells(&self) -> impl Iterator<Item = &str> {
        // Chunk boundaries are char boundaries: construction enforces ASCII.
        (0..self.cell_count()).map(move |i| &self.0[i * CELL_WIDTH..(i + 1) * CELL_WIDTH])
    }

    /// The last cell of the signature, i.e. where the route ends.
    pub fn destination_cell(&self) -> &str {
        &self.0[self.0.len() - CELL_WIDTH..]
    }

    /// Whether `self` travels through every cell of `other` first.
    pub fn extends(&self, other: &RouteSignature) -> bool {
        self.0.starts_with(other.as_str())
    }

    /// Number of leading cells shared with `other`.
    pub fn shared_prefix_cells(&self, other: &RouteSignature) -> usize {
        let mut shared = 0;
        for (a, b) in self.cells().zip(other.cells()) {
            if a != b {
                break;
            }
            shared += 1;
        }
        shared
    }

    /// The `k`-th cell of the route counting from one, i.e. the cell at which
    /// two routes sharing a `k`-cell prefix part ways.
    pub fn cell_at(&self, k: usize) -> Option<&str> {
        if k == 0 || k > self.cell_count() {
            return None;
        }
        Some(&self.0[(k - 1) * CELL_WIDTH..k * CELL_WIDTH])
    }

    /// Of two signatures, the one traversing more cells. Ties go to `self`.
    pub fn longer<'a>(&'a self, other: &'a RouteSignature) -> &'a RouteSignature {
        if other.0.len() > self.0.len() {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for RouteSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds the membership record stored in the shared lex-ordered set.
pub fn member_record(signature: &RouteSignature, entry_id: &str) -> String {
    format!("{}{}{}", signature.as_str(), MEMBER_SEPARATOR, entry_id)
}

/// Splits a membership record back into `(signature, entry_id)`.
///
/// Records are `signature::entry_id`; the split is on the last separator so
/// that entry ids are free to contain anything but `::`.
pub fn parse_member_record(record: &str) -> Option<(&str, &str)> {
    record.rsplit_once(MEMBER_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(c: char) -> String {
        std::iter::repeat(c).take(CELL_WIDTH).collect()
    }

    fn sig(cells: &[char]) -> RouteSignature {
        RouteSignature::from_cells(cells.iter().map(|c| cell(*c))).unwrap()
    }

    #[test]
    fn rejects_unaligned_input() {
        assert_eq!(
            RouteSignature::new("abc"),
            Err(SignatureError::UnalignedLength(3))
        );
        assert_eq!(RouteSignature::new(""), Err(SignatureError::Empty));
    }

    #[test]
    fn segments_back_into_cells() {
        let s = sig(&['a', 'b', 'c']);
        assert_eq!(s.cell_count(), 3);
        let cells: Vec<&str> = s.cells().collect();
        assert_eq!(cells[0], cell('a'));
        assert_eq!(s.destination_cell(), cell('c'));
    }

    #[test]
    fn prefix_containment() {
        let short = sig(&['a', 'b']);
        let long = sig(&['a', 'b', 'c']);
        assert!(long.extends(&short));
        assert!(!short.extends(&long));
        assert_eq!(long.shared_prefix_cells(&short), 2);
        assert_eq!(long.longer(&short).cell_count(), 3);
    }

    #[test]
    fn divergence_cell_is_last_shared() {
        let a = sig(&['a', 'b', 'c']);
        let b = sig(&['a', 'b', 'd']);
        let shared = a.shared_prefix_cells(&b);
        assert_eq!(shared, 2);
        assert_eq!(a.cell_at(shared), Some(cell('b').as_str()));
        assert_eq!(a.cell_at(0), None);
        assert_eq!(a.cell_at(4), None);
    }

    #[test]
    fn member_record_round_trip() {
        let s = sig(&['a', 'b']);
        let record = member_record(&s, "rider-7");
        let (parsed_sig, id) = parse_member_record(&record).unwrap();
        assert_eq!(parsed_sig, s.as_str());
        assert_eq!(id, "rider-7");
    }
}
