use std::sync::LazyLock;

use regex::Regex;

#[allow(clippy::unwrap_used)]
static METER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r">([0-9,]{7,})<").unwrap());

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Dealer,
    Buffer,
    Other,
}

impl Role {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "딜러" => Self::Dealer,
            "버퍼" => Self::Buffer,
            s if s.eq_ignore_ascii_case("dealer") => Self::Dealer,
            s if s.eq_ignore_ascii_case("buffer") => Self::Buffer,
            _ => Self::Other,
        }
    }

    const fn scale(self) -> (u64, &'static str) {
        match self {
            Self::Dealer => (100_000_000, "억"),
            Self::Buffer => (10_000, "만"),
            Self::Other => (1, ""),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reading {
    pub damage: u64,
    pub unit: &'static str,
}

/// All 7+ digit numbers sitting directly between tags, in document order.
pub fn extract(html: &str) -> Vec<u64> {
    let values = METER
        .captures_iter(html)
        .filter_map(|c| {
            let digits = c.get(1)?.as_str().replace(',', "");
            digits.parse().ok()
        })
        .collect::<Vec<u64>>();

    tracing::debug!(
        target: "damage",
        "{} bytes -> {} values, head {:?}",
        html.len(),
        values.len(),
        &values[..values.len().min(3)],
    );
    values
}

/// Picks the role's reading out of the first two values and scales it to the role's unit.
pub fn select(values: &[u64], role: Role) -> Option<Reading> {
    let chosen = match (values, role) {
        ([], _) => return None,
        ([a, b, ..], Role::Dealer) => *a.max(b),
        ([a, b, ..], Role::Buffer) => *a.min(b),
        ([a, ..], _) => *a,
    };
    let (divisor, unit) = role.scale();
    Some(Reading {
        damage: chosen / divisor,
        unit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_comma_grouped_numbers() {
        let html = "<td>12,345,678,901</td><td>1,234,567</td><span>99,999</span><b>abc</b><i>9876543</i>";
        assert_eq!(extract(html), [12_345_678_901, 1_234_567, 9_876_543]);
    }

    #[test]
    fn ignores_numbers_not_between_tags() {
        assert!(extract("damage 12,345,678 total").is_empty());
        assert!(extract(">,,,,,,,<").is_empty());
    }

    #[test]
    fn roles() {
        assert_eq!(Role::parse(" 딜러 "), Role::Dealer);
        assert_eq!(Role::parse("버퍼"), Role::Buffer);
        assert_eq!(Role::parse("Dealer"), Role::Dealer);
        assert_eq!(Role::parse("BUFFER"), Role::Buffer);
        assert_eq!(Role::parse(""), Role::Other);
    }

    #[test]
    fn dealer_takes_larger_of_first_two_in_eok() {
        let r = select(&[35_000_000_000, 120_099_999_999, 999_999_999_999], Role::Dealer).unwrap();
        assert_eq!(r, Reading { damage: 1200, unit: "억" });
    }

    #[test]
    fn buffer_takes_smaller_of_first_two_in_man() {
        let r = select(&[8_765_432_100, 45_678_912], Role::Buffer).unwrap();
        assert_eq!(r, Reading { damage: 4567, unit: "만" });
    }

    #[test]
    fn other_role_is_raw_first_value() {
        assert_eq!(select(&[7_000_000, 9_000_000], Role::Other), Some(Reading { damage: 7_000_000, unit: "" }));
    }

    #[test]
    fn single_value_still_scaled() {
        assert_eq!(select(&[250_000_000], Role::Dealer), Some(Reading { damage: 2, unit: "억" }));
        assert_eq!(select(&[25_000], Role::Buffer), Some(Reading { damage: 2, unit: "만" }));
        assert_eq!(select(&[], Role::Dealer), None);
    }
}
