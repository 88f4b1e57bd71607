//! Group registry
//!
//! Resolves group names from the specification to [`Group`] objects. Template
//! groups (`instances: N`) expand into N per-instance groups. Membership of
//! directory-service groups is looked up through a [`DirectoryService`]; the
//! default [`UnresolvedDirectory`] knows nobody, which leaves those groups
//! without a size.

use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

use crate::error::{LabforgeError, LabforgeResult};
use crate::spec::GroupSpec;

/// Where a group's principals come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipSource {
    Directory(String),
    UserList,
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub source: MembershipSource,
    pub members: Vec<String>,
    /// Known size; `None` until directory membership has been resolved
    pub size: Option<usize>,
    /// 1-based instance number for members of a template group
    pub instance: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupEntry {
    Standard(Group),
    Template(Vec<Group>),
}

/// Lookup of directory-service group membership
pub trait DirectoryService: Send + Sync {
    /// Principals belonging to `group`, or `None` if the directory could not
    /// answer
    fn members_of(&self, group: &str) -> Option<Vec<String>>;
}

/// Directory that cannot resolve any group
#[derive(Debug, Clone, Copy, Default)]
pub struct UnresolvedDirectory;

impl DirectoryService for UnresolvedDirectory {
    fn members_of(&self, _group: &str) -> Option<Vec<String>> {
        None
    }
}

#[derive(Debug, Clone, Default)]
pub struct GroupRegistry {
    groups: IndexMap<String, GroupEntry>,
}

impl GroupRegistry {
    /// Build every declared group and resolve directory membership
    pub fn build(
        specs: &IndexMap<String, GroupSpec>,
        base_dir: Option<&Path>,
        directory: &dyn DirectoryService,
    ) -> LabforgeResult<Self> {
        let mut groups = IndexMap::new();

        for (name, spec) in specs {
            let entry = match spec.instances {
                Some(count) => GroupEntry::Template(
                    (1..=count)
                        .map(|i| build_group(name, spec, Some(i), base_dir, directory))
                        .collect::<LabforgeResult<Vec<_>>>()?,
                ),
                None => GroupEntry::Standard(build_group(name, spec, None, base_dir, directory)?),
            };
            groups.insert(name.clone(), entry);
        }

        debug!("Initialized {} groups", groups.len());
        Ok(Self { groups })
    }

    /// Resolve a group name; template groups resolve to their first instance
    pub fn get(&self, name: &str) -> Option<&Group> {
        match self.groups.get(name) {
            Some(GroupEntry::Standard(group)) => Some(group),
            Some(GroupEntry::Template(instances)) => instances.first(),
            None => {
                error!("Could not get group '{}' from the group registry", name);
                None
            }
        }
    }

    /// Size of a group for `size-of` instance directives
    pub fn size_of(&self, name: &str) -> LabforgeResult<u64> {
        match self.groups.get(name) {
            Some(GroupEntry::Template(instances)) => Ok(instances.len() as u64),
            Some(GroupEntry::Standard(group)) => match group.size {
                Some(size) => Ok(size as u64),
                None => Err(LabforgeError::Unsupported {
                    feature: format!(
                        "size of directory group '{}' is unknown until its membership is resolved",
                        name
                    ),
                }),
            },
            None => Err(LabforgeError::not_found(format!("group '{}'", name))),
        }
    }
}

fn build_group(
    name: &str,
    spec: &GroupSpec,
    instance: Option<usize>,
    base_dir: Option<&Path>,
    directory: &dyn DirectoryService,
) -> LabforgeResult<Group> {
    let path = format!("groups.{}", name);
    let suffix = |base: &str| match instance {
        Some(i) => format!("{} {:02}", base, i),
        None => base.to_string(),
    };

    let (source, members, size) = match (&spec.ad_group, &spec.user_list, &spec.filename) {
        (Some(ad_group), None, None) => {
            let ad_group = suffix(ad_group);
            match directory.members_of(&ad_group) {
                Some(members) => {
                    let size = members.len().max(1);
                    (MembershipSource::Directory(ad_group), members, Some(size))
                }
                None => {
                    error!("Could not initialize directory group '{}'", ad_group);
                    (MembershipSource::Directory(ad_group), Vec::new(), None)
                }
            }
        }
        (None, Some(users), None) => {
            let size = users.len().max(1);
            (MembershipSource::UserList, users.clone(), Some(size))
        }
        (None, None, Some(filename)) => {
            let file = match base_dir {
                Some(dir) if filename.is_relative() => dir.join(filename),
                _ => filename.clone(),
            };
            let members = read_member_file(&path, &file)?;
            let size = members.len().max(1);
            (MembershipSource::File(file), members, Some(size))
        }
        _ => {
            return Err(LabforgeError::invalid_spec(
                path,
                "exactly one of 'ad-group', 'user-list' or 'filename' is required",
            ))
        }
    };

    Ok(Group {
        name: suffix(name),
        source,
        members,
        size,
        instance,
    })
}

fn read_member_file(path: &str, file: &Path) -> LabforgeResult<Vec<String>> {
    let contents = std::fs::read_to_string(file).map_err(|e| {
        LabforgeError::invalid_spec(
            path,
            format!("could not read member file '{}': {}", file.display(), e),
        )
    })?;
    serde_yaml::from_str(&contents).map_err(|e| {
        LabforgeError::invalid_spec(
            path,
            format!("member file '{}' is not a list of principals: {}", file.display(), e),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tracing_test::traced_test;

    struct StaticDirectory(HashMap<String, Vec<String>>);

    impl DirectoryService for StaticDirectory {
        fn members_of(&self, group: &str) -> Option<Vec<String>> {
            self.0.get(group).cloned()
        }
    }

    fn specs(yaml: &str) -> IndexMap<String, GroupSpec> {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_template_group_expands_and_resolves_to_first_instance() {
        let registry = GroupRegistry::build(
            &specs(
                r#"
Teams:
  instances: 3
  user-list: [alice]
"#,
            ),
            None,
            &UnresolvedDirectory,
        )
        .unwrap();

        let GroupEntry::Template(instances) = registry.groups.get("Teams").unwrap() else {
            panic!("expected template group");
        };
        assert_eq!(instances.len(), 3);
        assert_eq!(instances[2].name, "Teams 03");
        assert_eq!(registry.get("Teams").unwrap().instance, Some(1));
        assert_eq!(registry.size_of("Teams").unwrap(), 3);
    }

    #[test]
    #[traced_test]
    fn test_unresolved_directory_group_has_no_size() {
        let registry = GroupRegistry::build(
            &specs(
                r#"
Blue:
  ad-group: Blue Team
"#,
            ),
            None,
            &UnresolvedDirectory,
        )
        .unwrap();

        assert_eq!(registry.get("Blue").unwrap().size, None);
        assert!(matches!(
            registry.size_of("Blue"),
            Err(LabforgeError::Unsupported { .. })
        ));
        assert!(logs_contain("Could not initialize directory group"));
    }

    #[test]
    fn test_resolved_directory_group_size() {
        let directory = StaticDirectory(HashMap::from([
            ("Red 01".to_string(), vec!["eve".to_string(), "mallory".to_string()]),
            ("Red 02".to_string(), vec![]),
        ]));
        let registry = GroupRegistry::build(
            &specs(
                r#"
Red:
  ad-group: Red
  instances: 2
"#,
            ),
            None,
            &directory,
        )
        .unwrap();

        let GroupEntry::Template(instances) = registry.groups.get("Red").unwrap() else {
            panic!("expected template group");
        };
        assert_eq!(instances[0].size, Some(2));
        // An empty directory answer still counts as one seat
        assert_eq!(instances[1].size, Some(1));
    }

    #[test]
    fn test_member_file_relative_to_spec() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("players.yaml"), "[alice, bob, carol]").unwrap();

        let registry = GroupRegistry::build(
            &specs(
                r#"
Players:
  filename: players.yaml
"#,
            ),
            Some(dir.path()),
            &UnresolvedDirectory,
        )
        .unwrap();

        assert_eq!(registry.size_of("Players").unwrap(), 3);
        assert_eq!(registry.get("Players").unwrap().members[1], "bob");
    }

    #[test]
    fn test_group_needs_exactly_one_source() {
        let result = GroupRegistry::build(
            &specs(
                r#"
Broken:
  ad-group: X
  user-list: [a]
"#,
            ),
            None,
            &UnresolvedDirectory,
        );
        assert!(matches!(result, Err(LabforgeError::InvalidSpec { .. })));

        let result = GroupRegistry::build(
            &specs("Empty:\n  instances: 2\n"),
            None,
            &UnresolvedDirectory,
        );
        assert!(matches!(result, Err(LabforgeError::InvalidSpec { .. })));
    }

    #[test]
    #[traced_test]
    fn test_unknown_group_logs_error() {
        let registry = GroupRegistry::default();
        assert!(registry.get("Nobody").is_none());
        assert!(logs_contain("Could not get group 'Nobody'"));
        assert!(matches!(
            registry.size_of("Nobody"),
            Err(LabforgeError::NotFound { .. })
        ));
    }
}
