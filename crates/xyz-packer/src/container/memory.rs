use std::collections::BTreeMap;

use anyhow::{Result, anyhow, bail};

use super::{Dataset, GroupPath, HierarchicalContainer, check_entry_name};
use crate::structure::MetaValue;

/// Contents of one group in a [`MemoryContainer`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MemoryGroup {
    pub datasets: BTreeMap<String, Dataset>,
    pub attributes: BTreeMap<String, MetaValue>,
}

/// Container held entirely in ordered maps. Two containers compare equal when
/// they hold the same groups, datasets and attributes.
#[derive(Clone, Debug, PartialEq)]
pub struct MemoryContainer {
    groups: BTreeMap<GroupPath, MemoryGroup>,
}

impl Default for MemoryContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryContainer {
    pub fn new() -> Self {
        let mut groups = BTreeMap::new();
        groups.insert(GroupPath::root(), MemoryGroup::default());
        Self { groups }
    }

    pub fn group(&self, path: &str) -> Option<&MemoryGroup> {
        self.groups.get(&GroupPath(path.to_string()))
    }

    /// Look up a dataset by its full path, e.g. `config_batch_0/config_0/cell`.
    pub fn dataset(&self, path: &str) -> Option<&Dataset> {
        let (group, name) = path.rsplit_once('/').unwrap_or(("", path));
        self.group(group)?.datasets.get(name)
    }

    pub fn attribute(&self, group: &str, key: &str) -> Option<&MetaValue> {
        self.group(group)?.attributes.get(key)
    }

    /// Names of the direct child groups of `path`, sorted.
    pub fn child_groups(&self, path: &str) -> Vec<String> {
        let parent = GroupPath(path.to_string());
        self.groups
            .keys()
            .filter(|g| !g.is_root())
            .filter_map(|g| {
                let (head, tail) = g.as_str().rsplit_once('/').unwrap_or(("", g.as_str()));
                (head == parent.as_str()).then(|| tail.to_string())
            })
            .collect()
    }

    fn group_mut(&mut self, path: &GroupPath) -> Result<&mut MemoryGroup> {
        self.groups
            .get_mut(path)
            .ok_or_else(|| anyhow!("group {path} does not exist"))
    }
}

impl HierarchicalContainer for MemoryContainer {
    fn create_group(&mut self, parent: &GroupPath, name: &str) -> Result<GroupPath> {
        check_entry_name(name)?;
        if !self.groups.contains_key(parent) {
            bail!("group {parent} does not exist");
        }
        let path = parent.child(name);
        if self.groups.contains_key(&path) || self.groups[parent].datasets.contains_key(name) {
            bail!("{path} already exists");
        }
        self.groups.insert(path.clone(), MemoryGroup::default());
        Ok(path)
    }

    fn create_dataset(&mut self, group: &GroupPath, name: &str, dataset: &Dataset) -> Result<()> {
        check_entry_name(name)?;
        if self.groups.contains_key(&group.child(name)) {
            bail!("{} already exists", group.child(name));
        }
        let entry = self.group_mut(group)?;
        if entry.datasets.contains_key(name) {
            bail!("dataset {} already exists", group.child(name));
        }
        entry.datasets.insert(name.to_string(), dataset.clone());
        Ok(())
    }

    fn set_attribute(&mut self, target: &GroupPath, key: &str, value: &MetaValue) -> Result<()> {
        check_entry_name(key)?;
        self.group_mut(target)?
            .attributes
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    fn close(self) -> Result<()> {
        Ok(())
    }
}
