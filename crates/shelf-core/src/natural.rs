//! Natural ("human") ordering of file names.
//!
//! Runs of ASCII digits compare by numeric value, everything else compares
//! case-insensitively, so `page2` sorts before `page10` and `Chapter 3`
//! before `chapter 12`.

use std::cmp::Ordering;
use std::iter::Peekable;
use std::str::Chars;

use camino::Utf8Path;

/// Compares two strings using natural ordering.
///
/// Names that are equal under these rules (e.g. `a1` vs `A1`, or `007` vs
/// `7`) are then ordered by the first digit run with fewer leading zeros,
/// then bytewise, so the result is a total order.
///
/// # Examples
///
/// ```
/// use std::cmp::Ordering;
/// use shelf_core::natural_cmp;
///
/// assert_eq!(natural_cmp("page2.jpg", "page10.jpg"), Ordering::Less);
/// assert_eq!(natural_cmp("10.jpg", "9.jpg"), Ordering::Greater);
///
/// let mut names = vec!["10.jpg", "1.jpg", "2.jpg"];
/// names.sort_by(|a, b| natural_cmp(a, b));
/// assert_eq!(names, ["1.jpg", "2.jpg", "10.jpg"]);
/// ```
#[must_use]
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();
    let mut zeros = Ordering::Equal;

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return zeros.then_with(|| a.cmp(b)),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let l_run = take_digits(&mut left);
                let r_run = take_digits(&mut right);
                let (ord, padding) = cmp_digit_runs(&l_run, &r_run);
                if ord != Ordering::Equal {
                    return ord;
                }
                zeros = zeros.then(padding);
            }
            (Some(l), Some(r)) => {
                let ord = l.to_lowercase().cmp(r.to_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
                left.next();
                right.next();
            }
        }
    }
}

/// Compares two paths by their final component using [`natural_cmp`].
///
/// Paths without a file name (e.g. `/`) sort first.
#[must_use]
pub fn natural_cmp_paths(a: &Utf8Path, b: &Utf8Path) -> Ordering {
    natural_cmp(a.file_name().unwrap_or(""), b.file_name().unwrap_or(""))
}

fn take_digits(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.next_if(char::is_ascii_digit) {
        run.push(c);
    }
    run
}

/// Numeric comparison of two digit runs, plus their leading-zero ordering.
fn cmp_digit_runs(l: &str, r: &str) -> (Ordering, Ordering) {
    let l_trim = l.trim_start_matches('0');
    let r_trim = r.trim_start_matches('0');
    let value = l_trim
        .len()
        .cmp(&r_trim.len())
        .then_with(|| l_trim.cmp(r_trim));
    (value, l.len().cmp(&r.len()))
}
