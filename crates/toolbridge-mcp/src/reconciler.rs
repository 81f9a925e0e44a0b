//! Diffing desired configuration against live connection records.
//!
//! [`plan`] is pure: it looks at what the manager currently holds and what
//! the store says should exist, and returns the ordered actions that bring
//! the former in line with the latter. Applying them is the manager's job.

use std::collections::BTreeMap;

use toolbridge_core::McpServerConfig;

/// What the reconciler needs to know about an existing record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordState {
    pub config: McpServerConfig,
}

impl RecordState {
    pub const fn disabled(&self) -> bool {
        self.config.disabled
    }
}

/// Equal in everything but the disabled flag.
fn same_settings(a: &McpServerConfig, b: &McpServerConfig) -> bool {
    a.clone().with_disabled(false) == b.clone().with_disabled(false)
}

/// One step of a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Name left the configuration: close the transport and drop the record.
    Remove { name: String },
    /// Install a disabled record without connecting.
    CreateDisabled { name: String, config: McpServerConfig },
    /// Close the live transport but keep the record.
    Disable { name: String, config: McpServerConfig },
    /// New enabled server. Failures are returned to the caller.
    Connect { name: String, config: McpServerConfig },
    /// Configuration changed: rebuild the transport. Failures are logged.
    Reconnect { name: String, config: McpServerConfig },
    /// Disabled record became enabled. Failures are logged.
    Enable { name: String, config: McpServerConfig },
}

impl Action {
    pub fn name(&self) -> &str {
        match self {
            Self::Remove { name }
            | Self::CreateDisabled { name, .. }
            | Self::Disable { name, .. }
            | Self::Connect { name, .. }
            | Self::Reconnect { name, .. }
            | Self::Enable { name, .. } => name,
        }
    }
}

/// Compute the actions turning `current` into `desired`.
///
/// Removals come first, then one action (at most) per desired entry, both in
/// name order.
pub fn plan(
    current: &BTreeMap<String, RecordState>,
    desired: &BTreeMap<String, McpServerConfig>,
) -> Vec<Action> {
    let mut actions: Vec<Action> = current
        .keys()
        .filter(|name| !desired.contains_key(*name))
        .map(|name| Action::Remove { name: name.clone() })
        .collect();

    for (name, config) in desired {
        let name = name.clone();
        let config = config.clone();
        let existing = current.get(&name);

        let action = if config.disabled {
            match existing {
                None => Some(Action::CreateDisabled { name, config }),
                Some(record) if !record.disabled() => Some(Action::Disable { name, config }),
                // Already disabled: only refresh the stored configuration.
                Some(record) if record.config != config => {
                    Some(Action::CreateDisabled { name, config })
                }
                Some(_) => None,
            }
        } else {
            match existing {
                None => Some(Action::Connect { name, config }),
                Some(record) if !same_settings(&record.config, &config) => {
                    Some(Action::Reconnect { name, config })
                }
                Some(record) if record.disabled() => Some(Action::Enable { name, config }),
                Some(_) => None,
            }
        };

        actions.extend(action);
    }

    actions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdio(command: &str) -> McpServerConfig {
        McpServerConfig::stdio(command, vec![])
    }

    fn live(config: &McpServerConfig) -> RecordState {
        RecordState {
            config: config.clone(),
        }
    }

    #[test]
    fn test_fresh_start_connects_and_creates_disabled() {
        let desired = BTreeMap::from([
            ("b".to_string(), stdio("b")),
            ("a".to_string(), stdio("a").with_disabled(true)),
        ]);

        let actions = plan(&BTreeMap::new(), &desired);

        assert_eq!(
            actions,
            vec![
                Action::CreateDisabled {
                    name: "a".to_string(),
                    config: stdio("a").with_disabled(true)
                },
                Action::Connect {
                    name: "b".to_string(),
                    config: stdio("b")
                },
            ]
        );
    }

    #[test]
    fn test_removals_come_first() {
        let current = BTreeMap::from([
            ("z".to_string(), live(&stdio("z"))),
            ("old".to_string(), live(&stdio("old"))),
        ]);
        let desired = BTreeMap::from([("a".to_string(), stdio("a"))]);

        let names: Vec<_> = plan(&current, &desired)
            .iter()
            .map(|a| a.name().to_string())
            .collect();

        assert_eq!(names, vec!["old", "z", "a"]);
    }

    #[test]
    fn test_unchanged_is_noop() {
        let config = stdio("a");
        let disabled = stdio("b").with_disabled(true);
        let current = BTreeMap::from([
            ("a".to_string(), live(&config)),
            ("b".to_string(), live(&disabled)),
        ]);
        let desired = BTreeMap::from([("a".to_string(), config), ("b".to_string(), disabled)]);

        assert!(plan(&current, &desired).is_empty());
    }

    #[test]
    fn test_disable_and_reenable() {
        let enabled = stdio("a");
        let disabled = stdio("a").with_disabled(true);

        let to_disable = plan(
            &BTreeMap::from([("a".to_string(), live(&enabled))]),
            &BTreeMap::from([("a".to_string(), disabled.clone())]),
        );
        assert!(matches!(to_disable.as_slice(), [Action::Disable { .. }]));

        let to_enable = plan(
            &BTreeMap::from([("a".to_string(), live(&disabled))]),
            &BTreeMap::from([("a".to_string(), enabled)]),
        );
        assert!(matches!(to_enable.as_slice(), [Action::Enable { .. }]));
    }

    #[test]
    fn test_reenable_with_changed_settings_reconnects() {
        let disabled = stdio("a").with_disabled(true);
        let changed = stdio("a").with_env("TOKEN", "x");

        let actions = plan(
            &BTreeMap::from([("a".to_string(), live(&disabled))]),
            &BTreeMap::from([("a".to_string(), changed)]),
        );
        assert!(matches!(actions.as_slice(), [Action::Reconnect { .. }]));
    }

    #[test]
    fn test_changed_config_reconnects() {
        let current = BTreeMap::from([("a".to_string(), live(&stdio("a")))]);
        let desired = BTreeMap::from([("a".to_string(), stdio("a").with_env("TOKEN", "x"))]);

        assert!(matches!(
            plan(&current, &desired).as_slice(),
            [Action::Reconnect { .. }]
        ));
    }

    #[test]
    fn test_disabled_config_refreshed_in_place() {
        let before = stdio("a").with_disabled(true);
        let after = stdio("a")
            .with_disabled(true)
            .with_auto_approve(vec!["read".to_string()]);

        let actions = plan(
            &BTreeMap::from([("a".to_string(), live(&before))]),
            &BTreeMap::from([("a".to_string(), after)]),
        );
        assert!(matches!(actions.as_slice(), [Action::CreateDisabled { .. }]));
    }
}
