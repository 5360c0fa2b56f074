//! Diff computation: audited state vs. target policy
//!
//! Each strategy decides per subject whether it violates the target and
//! what action would fix it. Output order follows audit order, duplicates
//! keep their first occurrence, and no timestamps are recorded, so the
//! same inputs always produce the same bytes.

use crate::error::DiffError;
use crate::pattern::PatternSet;
use crate::types::{AuditResult, DiffAction, DiffItem, DiffList, StrategyKind, Subject, SubjectState};
use crate::unit::UnitConfig;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Declared target state for one component
#[derive(Debug, Clone, PartialEq)]
pub enum TargetPolicy {
    /// Present subjects matching `deny` (or listed in `desired_absent`) and
    /// not matching `allow` should be removed
    Exclusion {
        deny: Vec<String>,
        allow: Vec<String>,
        desired_absent: Vec<String>,
    },
    /// Subjects listed in `desired` should hold exactly that value
    Setting { desired: BTreeMap<String, String> },
    /// Subjects listed in `targets` should stay within tolerance of the target
    Threshold {
        targets: BTreeMap<String, f64>,
        tolerance: f64,
        tolerances: BTreeMap<String, f64>,
    },
}

impl TargetPolicy {
    /// Build a policy from the component's configuration.
    ///
    /// Keys: `deny`/`allow`/`desired_absent` (exclusion), `desired`
    /// (setting), `targets`/`tolerance`/`tolerances` (threshold).
    pub fn from_config(strategy: StrategyKind, config: &UnitConfig) -> Result<Self, DiffError> {
        match strategy {
            StrategyKind::Exclusion => Ok(Self::Exclusion {
                deny: config.string_list("deny")?,
                allow: config.string_list("allow")?,
                desired_absent: config.string_list("desired_absent")?,
            }),
            StrategyKind::Setting => Ok(Self::Setting {
                desired: config.string_map("desired")?,
            }),
            StrategyKind::Threshold => {
                let tolerance = config.f64("tolerance")?.unwrap_or(0.0);
                let tolerances = config.f64_map("tolerances")?;
                if tolerance < 0.0 || tolerances.values().any(|t| *t < 0.0) {
                    return Err(DiffError::InvalidPolicy {
                        strategy,
                        message: "tolerances must not be negative".to_string(),
                    });
                }
                Ok(Self::Threshold {
                    targets: config.f64_map("targets")?,
                    tolerance,
                    tolerances,
                })
            }
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Exclusion { .. } => StrategyKind::Exclusion,
            Self::Setting { .. } => StrategyKind::Setting,
            Self::Threshold { .. } => StrategyKind::Threshold,
        }
    }

    /// Policy description recorded inside the diff list
    pub fn metadata(&self) -> BTreeMap<String, Value> {
        let mut meta = BTreeMap::new();
        match self {
            Self::Exclusion {
                deny,
                allow,
                desired_absent,
            } => {
                meta.insert("deny".into(), json!(deny));
                meta.insert("allow".into(), json!(allow));
                meta.insert("desired_absent".into(), json!(desired_absent));
            }
            Self::Setting { desired } => {
                meta.insert("desired".into(), json!(desired));
            }
            Self::Threshold {
                targets,
                tolerance,
                tolerances,
            } => {
                meta.insert("targets".into(), json!(targets));
                meta.insert("tolerance".into(), json!(tolerance));
                meta.insert("tolerances".into(), json!(tolerances));
            }
        }
        meta
    }
}

/// Compute the ordered, deduplicated diff for an audit result
pub fn compute_diff(audit: &AuditResult, policy: &TargetPolicy) -> Result<DiffList, DiffError> {
    let strategy = policy.kind();
    let mut diff = DiffList::empty(audit.component, strategy);
    diff.policy = policy.metadata();

    let mut seen: HashSet<&str> = HashSet::new();
    let subjects = audit.items.iter().filter(|s| seen.insert(s.key.as_str()));

    match policy {
        TargetPolicy::Exclusion {
            deny,
            allow,
            desired_absent,
        } => {
            let deny = PatternSet::new(deny)?;
            let allow = PatternSet::new(allow)?;
            let absent: BTreeSet<String> = desired_absent.iter().map(|k| k.to_lowercase()).collect();
            for subject in subjects {
                if let Some(action) = exclusion_action(subject, &deny, &allow, &absent)? {
                    diff.items.push(item(subject, action));
                }
            }
        }
        TargetPolicy::Setting { desired } => {
            for subject in subjects {
                if let Some(action) = setting_action(subject, desired)? {
                    diff.items.push(item(subject, action));
                }
            }
        }
        TargetPolicy::Threshold {
            targets,
            tolerance,
            tolerances,
        } => {
            for subject in subjects {
                let tol = tolerances.get(&subject.key).copied().unwrap_or(*tolerance);
                if let Some(action) = threshold_action(subject, targets, tol)? {
                    diff.items.push(item(subject, action));
                }
            }
        }
    }

    Ok(diff)
}

fn item(subject: &Subject, action: DiffAction) -> DiffItem {
    DiffItem {
        key: subject.key.clone(),
        name: subject.name.clone(),
        action,
    }
}

fn mismatch(subject: &Subject, strategy: StrategyKind) -> DiffError {
    DiffError::StateMismatch {
        key: subject.key.clone(),
        strategy,
        state: subject.state.label(),
    }
}

fn exclusion_action(
    subject: &Subject,
    deny: &PatternSet,
    allow: &PatternSet,
    desired_absent: &BTreeSet<String>,
) -> Result<Option<DiffAction>, DiffError> {
    match subject.state {
        SubjectState::Present => {}
        // Already gone, or nothing we can act on
        SubjectState::Absent | SubjectState::Unknown => return Ok(None),
        _ => return Err(mismatch(subject, StrategyKind::Exclusion)),
    }

    let candidates = [subject.key.as_str(), subject.name.as_str()];
    let denied = deny.first_match(&candidates).is_some()
        || desired_absent.contains(&subject.key.to_lowercase());
    if denied && allow.first_match(&candidates).is_none() {
        Ok(Some(DiffAction::Remove))
    } else {
        Ok(None)
    }
}

fn setting_action(
    subject: &Subject,
    desired: &BTreeMap<String, String>,
) -> Result<Option<DiffAction>, DiffError> {
    let Some(target) = desired.get(&subject.key) else {
        return Ok(None);
    };
    match &subject.state {
        SubjectState::Setting { value } if value == target => Ok(None),
        SubjectState::Setting { value } => Ok(Some(DiffAction::Set {
            from: Some(value.clone()),
            to: target.clone(),
        })),
        SubjectState::Absent => Ok(Some(DiffAction::Set {
            from: None,
            to: target.clone(),
        })),
        SubjectState::Unknown => Ok(None),
        _ => Err(mismatch(subject, StrategyKind::Setting)),
    }
}

fn threshold_action(
    subject: &Subject,
    targets: &BTreeMap<String, f64>,
    tolerance: f64,
) -> Result<Option<DiffAction>, DiffError> {
    let Some(target) = targets.get(&subject.key).copied() else {
        return Ok(None);
    };
    match subject.state {
        SubjectState::Numeric { value } if value.is_nan() => {
            Err(mismatch(subject, StrategyKind::Threshold))
        }
        SubjectState::Numeric { value } if (value - target).abs() > tolerance => {
            Ok(Some(DiffAction::Adjust {
                from: value,
                to: target,
            }))
        }
        SubjectState::Numeric { .. } | SubjectState::Absent | SubjectState::Unknown => Ok(None),
        _ => Err(mismatch(subject, StrategyKind::Threshold)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session::Component;

    fn bloatware_audit() -> AuditResult {
        AuditResult::new(
            Component::Bloatware,
            vec![
                Subject::present("Microsoft.WindowsCalculator"),
                Subject::present("king.com.CandyCrushSaga"),
                Subject::present("Microsoft.XboxApp"),
                Subject::present("Microsoft.WindowsStore"),
                Subject::present("Microsoft.ZuneMusic"),
                Subject::new("Microsoft.BingNews", "Bing News", SubjectState::Absent),
            ],
        )
    }

    fn deny_five() -> TargetPolicy {
        TargetPolicy::Exclusion {
            deny: vec![
                "*CandyCrush*".into(),
                "*Xbox*".into(),
                "*Zune*".into(),
                "*BingNews*".into(),
                "*Solitaire*".into(),
            ],
            allow: vec![],
            desired_absent: vec![],
        }
    }

    #[test]
    fn test_exclusion_matches_in_audit_order() {
        let diff = compute_diff(&bloatware_audit(), &deny_five()).unwrap();
        assert_eq!(
            diff.keys(),
            vec!["king.com.CandyCrushSaga", "Microsoft.XboxApp", "Microsoft.ZuneMusic"]
        );
        assert!(diff.items.iter().all(|i| i.action == DiffAction::Remove));
        assert!(diff.is_subset_of(&bloatware_audit()));
    }

    #[test]
    fn test_allow_overrides_deny() {
        let policy = TargetPolicy::Exclusion {
            deny: vec!["Microsoft.*".into()],
            allow: vec!["*Store*".into(), "*Calculator*".into()],
            desired_absent: vec!["king.com.candycrushsaga".into()],
        };
        let diff = compute_diff(&bloatware_audit(), &policy).unwrap();
        assert_eq!(
            diff.keys(),
            vec!["king.com.CandyCrushSaga", "Microsoft.XboxApp", "Microsoft.ZuneMusic"]
        );
    }

    #[test]
    fn test_diff_is_deterministic() {
        let audit = bloatware_audit();
        let a = compute_diff(&audit, &deny_five()).unwrap();
        let b = compute_diff(&audit, &deny_five()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
    }

    #[test]
    fn test_duplicates_keep_first_occurrence() {
        let audit = AuditResult::new(
            Component::Bloatware,
            vec![
                Subject::new("pkg.Xbox", "first", SubjectState::Present),
                Subject::present("pkg.Zune"),
                Subject::new("pkg.Xbox", "second", SubjectState::Present),
            ],
        );
        let diff = compute_diff(&audit, &deny_five()).unwrap();
        assert_eq!(diff.keys(), vec!["pkg.Xbox", "pkg.Zune"]);
        assert_eq!(diff.items[0].name, "first");
    }

    #[test]
    fn test_removed_items_do_not_reappear() {
        let before = bloatware_audit();
        let diff = compute_diff(&before, &deny_five()).unwrap();
        let removed: HashSet<&str> = diff.keys().into_iter().collect();

        // State after applying the removals
        let after = AuditResult::new(
            Component::Bloatware,
            before
                .items
                .iter()
                .map(|s| {
                    if removed.contains(s.key.as_str()) {
                        Subject::new(s.key.clone(), s.name.clone(), SubjectState::Absent)
                    } else {
                        s.clone()
                    }
                })
                .collect(),
        );
        let again = compute_diff(&after, &deny_five()).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_empty_policy_yields_explicit_empty_diff() {
        let policy = TargetPolicy::Exclusion {
            deny: vec![],
            allow: vec![],
            desired_absent: vec![],
        };
        let diff = compute_diff(&bloatware_audit(), &policy).unwrap();
        assert!(diff.is_empty());
        assert_eq!(diff.component, Component::Bloatware);
        assert_eq!(diff.strategy, StrategyKind::Exclusion);
    }

    #[test]
    fn test_setting_strategy_apply_if_different() {
        let audit = AuditResult::new(
            Component::Telemetry,
            vec![
                Subject::setting("AllowTelemetry", "3"),
                Subject::setting("DoNotShowFeedback", "1"),
                Subject::new("AdvertisingId", "AdvertisingId", SubjectState::Absent),
                Subject::setting("Unmanaged", "1"),
            ],
        );
        let policy = TargetPolicy::Setting {
            desired: BTreeMap::from([
                ("AllowTelemetry".to_string(), "0".to_string()),
                ("DoNotShowFeedback".to_string(), "1".to_string()),
                ("AdvertisingId".to_string(), "0".to_string()),
            ]),
        };
        let diff = compute_diff(&audit, &policy).unwrap();
        assert_eq!(diff.keys(), vec!["AllowTelemetry", "AdvertisingId"]);
        assert_eq!(
            diff.items[0].action,
            DiffAction::Set {
                from: Some("3".into()),
                to: "0".into()
            }
        );
        assert_eq!(
            diff.items[1].action,
            DiffAction::Set {
                from: None,
                to: "0".into()
            }
        );
    }

    #[test]
    fn test_threshold_strategy_uses_tolerance() {
        let audit = AuditResult::new(
            Component::Optimization,
            vec![
                Subject::numeric("vm.swappiness", 60.0),
                Subject::numeric("vm.dirty_ratio", 21.0),
                Subject::numeric("fs.inotify.max_user_watches", 8192.0),
            ],
        );
        let policy = TargetPolicy::Threshold {
            targets: BTreeMap::from([
                ("vm.swappiness".to_string(), 10.0),
                ("vm.dirty_ratio".to_string(), 20.0),
                ("fs.inotify.max_user_watches".to_string(), 524_288.0),
            ]),
            tolerance: 2.0,
            tolerances: BTreeMap::from([("fs.inotify.max_user_watches".to_string(), 600_000.0)]),
        };
        let diff = compute_diff(&audit, &policy).unwrap();
        assert_eq!(diff.keys(), vec!["vm.swappiness"]);
        assert_eq!(
            diff.items[0].action,
            DiffAction::Adjust {
                from: 60.0,
                to: 10.0
            }
        );
    }

    #[test]
    fn test_state_mismatch_is_an_error() {
        let audit = AuditResult::new(Component::Optimization, vec![Subject::present("vm.swappiness")]);
        let policy = TargetPolicy::Threshold {
            targets: BTreeMap::from([("vm.swappiness".to_string(), 10.0)]),
            tolerance: 0.0,
            tolerances: BTreeMap::new(),
        };
        let err = compute_diff(&audit, &policy).unwrap_err();
        assert!(matches!(err, DiffError::StateMismatch { strategy: StrategyKind::Threshold, .. }));
    }

    #[test]
    fn test_policy_from_config() {
        let config = UnitConfig::new()
            .with("targets", json!({"vm.swappiness": 10}))
            .with("tolerance", 1);
        let policy = TargetPolicy::from_config(StrategyKind::Threshold, &config).unwrap();
        assert_eq!(policy.kind(), StrategyKind::Threshold);

        let negative = UnitConfig::new().with("tolerance", -1.0);
        assert!(matches!(
            TargetPolicy::from_config(StrategyKind::Threshold, &negative),
            Err(DiffError::InvalidPolicy { .. })
        ));

        let bad = UnitConfig::new().with("deny", 5);
        assert!(matches!(
            TargetPolicy::from_config(StrategyKind::Exclusion, &bad),
            Err(DiffError::Config(_))
        ));
    }
}
