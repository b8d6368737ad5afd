//! 显示单元（DisplayUnit）校验
//!
//! 分组建议来自模型，可能编造序号、遗漏子句或给出不连续的组；
//! 只有「按顺序连续、不重复、恰好覆盖全部子句」的分组才能被采用，否则回退为每子句一个单元。

use std::collections::HashSet;

use crate::analysis::DisplayUnit;

/// 校验结果
#[derive(Debug, Clone, PartialEq)]
pub enum UnitValidation {
    Valid(Vec<DisplayUnit>),
    Invalid { reason: String },
}

impl UnitValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, UnitValidation::Valid(_))
    }
}

/// 分组是否构成对 all_clause_ids 的连续划分
pub fn validate(units: &[DisplayUnit], all_clause_ids: &[u32]) -> bool {
    check_units(units, all_clause_ids).is_valid()
}

/// 同 validate，但返回具体的拒绝原因
pub fn check_units(units: &[DisplayUnit], all_clause_ids: &[u32]) -> UnitValidation {
    let known: HashSet<u32> = all_clause_ids.iter().copied().collect();
    let mut seen: HashSet<u32> = HashSet::new();
    let mut flattened: Vec<u32> = Vec::with_capacity(all_clause_ids.len());

    for (pos, unit) in units.iter().enumerate() {
        if unit.clause_ids.is_empty() {
            return invalid(format!("unit {} is empty", pos + 1));
        }
        for pair in unit.clause_ids.windows(2) {
            if pair[0].checked_add(1) != Some(pair[1]) {
                return invalid(format!(
                    "unit {} is not contiguous ({} followed by {})",
                    pos + 1,
                    pair[0],
                    pair[1]
                ));
            }
        }
        for &id in &unit.clause_ids {
            if !known.contains(&id) {
                return invalid(format!("unit {} references unknown clause {}", pos + 1, id));
            }
            if !seen.insert(id) {
                return invalid(format!("clause {} appears more than once", id));
            }
            flattened.push(id);
        }
    }

    if flattened != all_clause_ids {
        let missing: Vec<u32> = all_clause_ids
            .iter()
            .copied()
            .filter(|id| !seen.contains(id))
            .collect();
        return if missing.is_empty() {
            invalid("units are out of clause order".to_string())
        } else {
            invalid(format!("clauses not covered: {:?}", missing))
        };
    }

    UnitValidation::Valid(units.to_vec())
}

/// 默认划分：每个子句一个未合并单元
pub fn default_units(all_clause_ids: &[u32]) -> Vec<DisplayUnit> {
    all_clause_ids.iter().map(|&id| DisplayUnit::single(id)).collect()
}

fn invalid(reason: String) -> UnitValidation {
    UnitValidation::Invalid { reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(groups: &[&[u32]]) -> Vec<DisplayUnit> {
        groups.iter().map(|g| DisplayUnit::new(g.to_vec())).collect()
    }

    #[test]
    fn test_valid_partition() {
        assert!(validate(&units(&[&[1], &[2, 3], &[4]]), &[1, 2, 3, 4]));
        assert!(validate(&units(&[&[1, 2, 3, 4]]), &[1, 2, 3, 4]));
    }

    #[test]
    fn test_non_contiguous_rejected() {
        assert!(!validate(&units(&[&[1], &[3], &[2, 4]]), &[1, 2, 3, 4]));
        match check_units(&units(&[&[1, 3], &[2]]), &[1, 2, 3]) {
            UnitValidation::Invalid { reason } => assert!(reason.contains("not contiguous")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_incomplete_coverage_rejected() {
        assert!(!validate(&units(&[&[1], &[2]]), &[1, 2, 3]));
        match check_units(&units(&[&[1], &[2]]), &[1, 2, 3]) {
            UnitValidation::Invalid { reason } => assert!(reason.contains("[3]")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_duplicate_empty_rejected() {
        assert!(!validate(&units(&[&[1], &[2, 3], &[4]]), &[1, 2, 3]));
        assert!(!validate(&units(&[&[1, 2], &[2, 3]]), &[1, 2, 3]));
        assert!(!validate(&units(&[&[1], &[], &[2]]), &[1, 2]));
    }

    #[test]
    fn test_out_of_order_rejected() {
        assert!(!validate(&units(&[&[2, 3], &[1]]), &[1, 2, 3]));
        assert!(!validate(&units(&[&[3, 2], &[1]]), &[1, 2, 3]));
    }

    #[test]
    fn test_default_units() {
        let d = default_units(&[1, 2, 3]);
        assert_eq!(d.len(), 3);
        assert!(d.iter().all(|u| !u.merged && u.clause_ids.len() == 1));
        assert!(validate(&d, &[1, 2, 3]));
    }

    #[test]
    fn test_empty_passage() {
        assert!(validate(&[], &[]));
        assert!(!validate(&units(&[&[1]]), &[]));
    }
}
