//! 从环境变量 (或 `$HOME/dataset` 下的默认位置) 读取评估程序的输入输出位置与选项.

use std::env;
use std::path::PathBuf;

use tre_berry::config::CohortFilter;
use tre_berry::dataset::home_dataset_dir_with;
use tre_berry::evidence::RegType;

/// 读取非空环境变量.
fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn dir_from_env_or_home(key: &str, rest: &[&str]) -> Option<PathBuf> {
    non_empty_var(key)
        .map(PathBuf::from)
        .or_else(|| home_dataset_dir_with(rest))
}

/// 获取基准点根目录.
///
/// 1. 若环境变量 `$TRE_LANDMARK_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/landmarks`.
pub fn landmark_dir_from_env_or_home() -> Option<PathBuf> {
    dir_from_env_or_home("TRE_LANDMARK_DIR", &["landmarks"])
}

/// 获取前瞻性病例根目录.
///
/// 1. 若环境变量 `$TRE_CASE_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/cases`.
pub fn case_dir_from_env_or_home() -> Option<PathBuf> {
    dir_from_env_or_home("TRE_CASE_DIR", &["cases"])
}

/// 获取报表输出目录.
///
/// 1. 若环境变量 `$TRE_OUTPUT_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/reports`.
pub fn output_dir_from_env_or_home() -> Option<PathBuf> {
    dir_from_env_or_home("TRE_OUTPUT_DIR", &["reports"])
}

/// 解析以逗号分隔的病例编号列表. 空列表表示所有病例.
pub fn parse_cohort(s: &str) -> CohortFilter {
    let ids: Vec<&str> = s
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .collect();
    if ids.is_empty() {
        CohortFilter::All
    } else {
        CohortFilter::allowlist(ids)
    }
}

/// 从 `$TRE_COHORT` 读取参与评估的病例, 未设置时为所有病例.
pub fn cohort_from_env() -> CohortFilter {
    non_empty_var("TRE_COHORT").map_or(CohortFilter::All, |s| parse_cohort(&s))
}

/// 从 `$TRE_TRANSFORM_TYPE` 读取请求的配准类型, 默认为 `bSpline`.
pub fn transform_type_from_env() -> RegType {
    match non_empty_var("TRE_TRANSFORM_TYPE").map(|s| s.parse::<RegType>()) {
        Some(Ok(t)) => t,
        Some(Err(e)) => {
            log::warn!("{e}, using {}", RegType::BSpline);
            RegType::BSpline
        }
        None => RegType::BSpline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tre_berry::evidence::CaseId;

    #[test]
    fn test_parse_cohort() {
        assert!(matches!(parse_cohort(" , "), CohortFilter::All));
        let c = parse_cohort("278, 301,");
        assert!(c.accepts(&CaseId::from("278")));
        assert!(c.accepts(&CaseId::from("301")));
        assert!(!c.accepts(&CaseId::from("1")));
    }
}
