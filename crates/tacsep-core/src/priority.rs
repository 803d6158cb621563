//! Which aircraft of a pair resolves the conflict.
//!
//! Lower priority numbers are more urgent and keep their course, so the aircraft
//! with the numerically larger priority resolves. Equal priorities are broken by
//! the digits in the identifier: the larger number (the newer aircraft) resolves.
//! Identifiers without digits, or with equal numbers, fall back to comparing the
//! full identifiers, the lexicographically larger one resolving.

use std::cmp::Ordering;

use crate::models::Aircraft;

/// True when `own` must resolve its conflict with `intruder`.
pub fn own_resolves(own: &Aircraft, intruder: &Aircraft) -> bool {
    resolves(own.priority, &own.id, intruder.priority, &intruder.id)
}

pub fn resolves(own_priority: u32, own_id: &str, int_priority: u32, int_id: &str) -> bool {
    match own_priority.cmp(&int_priority) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => compare_ids(own_id, int_id) == Ordering::Greater,
    }
}

/// Order identifiers by their digits, then by the full text.
fn compare_ids(a: &str, b: &str) -> Ordering {
    match (id_number(a), id_number(b)) {
        (Some(na), Some(nb)) => compare_digit_strings(&na, &nb).then_with(|| a.cmp(b)),
        _ => a.cmp(b),
    }
}

/// All digits of an identifier concatenated, leading zeros stripped.
fn id_number(id: &str) -> Option<String> {
    let digits: String = id.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let trimmed = digits.trim_start_matches('0');
    Some(if trimmed.is_empty() { "0".to_string() } else { trimmed.to_string() })
}

/// Numeric comparison of digit strings of any length.
fn compare_digit_strings(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Highest-priority aircraft of a group: the one nobody else outranks.
pub fn highest_priority<'a>(group: &[&'a Aircraft]) -> Option<&'a Aircraft> {
    let mut best = *group.first()?;
    for &candidate in &group[1..] {
        if own_resolves(best, candidate) {
            best = candidate;
        }
    }
    Some(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ac(id: &str, priority: u32) -> Aircraft {
        Aircraft::new(id, 0.0, 0.0, 30.0).with_priority(priority)
    }

    #[test]
    fn equal_priority_larger_number_resolves() {
        let d12 = ac("D12", 1);
        let d7 = ac("D7", 1);
        for _ in 0..3 {
            assert!(own_resolves(&d12, &d7));
            assert!(!own_resolves(&d7, &d12));
        }
    }

    #[test]
    fn less_urgent_priority_resolves() {
        let urgent = ac("D1", 1);
        let routine = ac("D2", 2);
        assert!(own_resolves(&routine, &urgent));
        assert!(!own_resolves(&urgent, &routine));
    }

    #[test]
    fn ids_without_digits_fall_back_to_text() {
        assert!(resolves(1, "BRAVO", 1, "ALPHA"));
        assert!(!resolves(1, "ALPHA", 1, "BRAVO"));
        assert!(resolves(1, "X5", 1, "ALPHA"));
        assert!(!resolves(1, "ALPHA", 1, "ALPHA"));
    }

    #[test]
    fn long_digit_runs_do_not_overflow() {
        assert!(resolves(1, "D123456789012345678901234567890", 1, "D99"));
        assert!(resolves(1, "D010", 1, "D9"));
    }

    #[test]
    fn group_leader_is_most_urgent() {
        let a = ac("D3", 2);
        let b = ac("D8", 1);
        let c = ac("D5", 1);
        let leader = highest_priority(&[&a, &b, &c]).unwrap();
        assert_eq!(leader.id, "D5");
    }
}
