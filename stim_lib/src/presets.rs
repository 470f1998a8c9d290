/*
    Named parameter bundles, one JSON file per protocol id:

    {
        "<preset name>": { "run_parameters": {...}, "protocol_parameters": {...} },
        ...
    }
 */
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use serde::{Serialize,Deserialize};
use tracing::debug;
use crate::params::Params;
use crate::protocol::ProtocolError;

const PRESET_EXTENSION:&str = "json";

#[derive(Clone,Debug,Default,PartialEq,Serialize,Deserialize)]
pub struct Preset {
    #[serde(default)]
    pub run_parameters:Params,
    #[serde(default)]
    pub protocol_parameters:Params,
}

#[derive(Clone,Debug)]
pub struct PresetStore {
    dir:Option<PathBuf>,
    protocol_id:String,
    presets:BTreeMap<String,Preset>,
}

impl PresetStore {

    /// read the presets of protocol_id from dir. A missing file is an empty store.
    pub fn load(dir:&Path,protocol_id:&str) -> Result<Self,ProtocolError> {
        let mut store = Self {
            dir:Some(dir.to_owned()),
            protocol_id:protocol_id.to_string(),
            presets:BTreeMap::new(),
        };
        store.reload()?;
        Ok(store)
    }

    /// a store that is never written to disk
    pub fn in_memory(protocol_id:&str) -> Self {
        Self {
            dir:None,
            protocol_id:protocol_id.to_string(),
            presets:BTreeMap::new(),
        }
    }

    pub fn file(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(format!("{}.{}",self.protocol_id,PRESET_EXTENSION)))
    }

    pub fn reload(&mut self) -> Result<(),ProtocolError> {
        let file = match self.file() {
            Some(file) => file,
            None => return Ok(())
        };
        self.presets = match file.exists() {
            true => {
                let s = utils::read_to_string(&file,PRESET_EXTENSION)?;
                serde_json::from_str(&s)?
            }
            false => BTreeMap::new()
        };
        debug!(protocol = %self.protocol_id,count = self.presets.len(),"loaded parameter presets");
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.presets.keys().cloned().collect()
    }

    pub fn get(&self,name:&str) -> Option<&Preset> {
        self.presets.get(name)
    }

    /// insert or replace a preset and rewrite the file
    pub fn update(&mut self,name:&str,preset:Preset) -> Result<(),ProtocolError> {
        self.presets.insert(name.to_string(),preset);
        if let Some(file) = self.file() {
            if let Some(dir) = file.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let s = serde_json::to_string_pretty(&self.presets)?;
            utils::write_atomic(&file,&s)?;
        }
        Ok(())
    }
}

/// protocol ids that have a preset file in dir
pub fn list_protocols(dir:&Path) -> Vec<String> {
    utils::get_all_matches(dir,&format!("*.{}",PRESET_EXTENSION))
        .unwrap_or_default()
        .iter()
        .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(|s| s.to_string()))
        .collect()
}
