use std::collections::BTreeMap;
use serde::{Serialize,Deserialize};
use crate::attr::Attrs;

/// A node of the hierarchical record. Attributes hold the data, groups hold the children.
#[derive(Clone,Debug,Default,PartialEq,Serialize,Deserialize)]
pub struct Group {
    #[serde(default)]
    pub attrs:Attrs,
    #[serde(default)]
    pub groups:BTreeMap<String,Group>,
}

impl Group {

    pub fn with_attrs(attrs:Attrs) -> Self {
        Self {
            attrs,
            groups:BTreeMap::new(),
        }
    }

    /// follow a slash separated path such as "Subjects/A1/epoch_runs"
    pub fn get(&self,path:&str) -> Option<&Group> {
        path.split('/')
            .filter(|name| !name.is_empty())
            .try_fold(self,|group,name| group.groups.get(name))
    }

    pub fn get_mut(&mut self,path:&str) -> Option<&mut Group> {
        path.split('/')
            .filter(|name| !name.is_empty())
            .try_fold(self,|group,name| group.groups.get_mut(name))
    }

    /// returns the child, creating an empty one if it is missing
    pub fn require_group(&mut self,name:&str) -> &mut Group {
        self.groups.entry(name.to_string()).or_default()
    }

    pub fn child_names(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }
}
