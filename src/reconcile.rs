//! Positional lookups over grids read from a sheet.
//!
//! Rows and columns here are 1-based, matching A1 notation.

/// `A` -> 1, `Z` -> 26, `AA` -> 27. Anything but ASCII letters is rejected.
pub fn column_index(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }
    letters.bytes().try_fold(0usize, |acc, b| {
        let b = b.to_ascii_uppercase();
        b.is_ascii_uppercase()
            .then(|| acc.checked_mul(26)?.checked_add(usize::from(b - b'A') + 1))
            .flatten()
    })
}

/// Inverse of [`column_index`]; `0` has no letter form.
pub fn column_letter(mut index: usize) -> String {
    let mut buf = Vec::new();
    while index > 0 {
        index -= 1;
        buf.push(b'A' + (index % 26) as u8);
        index /= 26;
    }
    buf.reverse();
    // only ASCII letters were pushed
    String::from_utf8(buf).unwrap_or_default()
}

/// Splits one corner of an A1 range into its column and row; either may be
/// missing (`A`, `7`), but not both.
pub fn corner(s: &str) -> Option<(Option<usize>, Option<u32>)> {
    let split = s.find(|c: char| c.is_ascii_digit()).unwrap_or(s.len());
    let (letters, digits) = s.split_at(split);
    let col = if letters.is_empty() { None } else { Some(column_index(letters)?) };
    let row = if digits.is_empty() { None } else { Some(digits.parse().ok()?) };
    (col.is_some() || row.is_some()).then_some((col, row))
}

/// Top-left `(row, column)` of an A1 range, defaulting to row 1 / column A.
pub fn range_origin(range: &str) -> Option<(u32, usize)> {
    let start = range.split_once(':').map_or(range, |(start, _)| start);
    let (col, row) = corner(start)?;
    Some((row.unwrap_or(1), col.unwrap_or(1)))
}

#[inline]
pub fn cell(column: &str, row: u32) -> String {
    format!("{column}{row}")
}

/// First row whose leading cell, trimmed, is exactly `name`.
pub fn find_character_row<R: AsRef<[String]>>(grid: &[R], name: &str) -> Option<u32> {
    grid.iter()
        .position(|row| row.as_ref().first().is_some_and(|c| c.trim() == name))
        .map(|i| i as u32 + 1)
}

#[inline]
pub fn is_checkbox_value(value: &str) -> bool {
    matches!(value, "TRUE" | "FALSE" | "")
}

/// Column of the `ordinal`-th checkbox-like cell, skipping the name column.
///
/// The API drops trailing empty cells, so a checkbox past the last returned
/// cell cannot be found.
pub fn find_checkbox(row: &[String], ordinal: usize) -> Option<usize> {
    row.iter()
        .enumerate()
        .skip(1)
        .filter(|(_, v)| is_checkbox_value(v))
        .nth(ordinal)
        .map(|(i, _)| i + 1)
}

/// Whether a cell already holds a number, as opposed to a marker or nothing.
pub fn is_numeric(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && value.parse::<f64>().is_ok_and(f64::is_finite)
}

/// Cell `(row, column)` of a grid read starting at `origin_row`, empty when absent.
pub fn grid_cell(grid: &[Vec<String>], origin_row: u32, row: u32, column: usize) -> &str {
    row.checked_sub(origin_row)
        .and_then(|r| grid.get(r as usize))
        .and_then(|r| r.get(column))
        .map_or("", String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|&s| s.to_owned()).collect()
    }

    #[test]
    fn letters() {
        assert_eq!(column_index("A"), Some(1));
        assert_eq!(column_index("z"), Some(26));
        assert_eq!(column_index("AA"), Some(27));
        assert_eq!(column_index("AZ"), Some(52));
        assert_eq!(column_index(""), None);
        assert_eq!(column_index("A1"), None);
        assert_eq!(column_letter(1), "A");
        assert_eq!(column_letter(26), "Z");
        assert_eq!(column_letter(27), "AA");
        assert_eq!(column_letter(703), "AAA");
        assert_eq!(column_letter(0), "");
    }

    #[test]
    fn corners_and_origins() {
        assert_eq!(corner("B3"), Some((Some(2), Some(3))));
        assert_eq!(corner("AA"), Some((Some(27), None)));
        assert_eq!(corner("12"), Some((None, Some(12))));
        assert_eq!(corner(""), None);
        assert_eq!(corner("3B"), None);
        assert_eq!(range_origin("A:Z"), Some((1, 1)));
        assert_eq!(range_origin("C5:Z"), Some((5, 3)));
        assert_eq!(range_origin("B7:B30"), Some((7, 2)));
    }

    #[test]
    fn finds_row_by_trimmed_name() {
        let grid = [row(&["캐릭터", "나벨"]), row(&[]), row(&[" 홍길동 ", "FALSE"]), row(&["홍길동", "TRUE"])];
        assert_eq!(find_character_row(&grid, "홍길동"), Some(3));
        assert_eq!(find_character_row(&grid, "없음"), None);
    }

    #[test]
    fn checkbox_scan_skips_name_and_text() {
        let r = row(&["FALSE", "명성", "FALSE", "", "TRUE"]);
        assert_eq!(find_checkbox(&r, 0), Some(3));
        assert_eq!(find_checkbox(&r, 1), Some(4));
        assert_eq!(find_checkbox(&r, 2), Some(5));
        assert_eq!(find_checkbox(&r, 3), None);
        assert_eq!(find_checkbox(&row(&["홍길동"]), 0), None);
    }

    #[test]
    fn numeric_cells() {
        assert!(is_numeric("123"));
        assert!(is_numeric(" 12.5 "));
        assert!(!is_numeric(""));
        assert!(!is_numeric("수집실패"));
        assert!(!is_numeric("1,234"));
        assert!(!is_numeric("NaN"));
    }

    #[test]
    fn grid_cells_out_of_range_are_empty() {
        let grid = vec![row(&["a", "b"]), row(&["c"])];
        assert_eq!(grid_cell(&grid, 7, 7, 1), "b");
        assert_eq!(grid_cell(&grid, 7, 8, 1), "");
        assert_eq!(grid_cell(&grid, 7, 6, 0), "");
        assert_eq!(grid_cell(&grid, 7, 9, 0), "");
    }
}
